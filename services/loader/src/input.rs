//! CSV ingestion: column normalization and type coercion.
//!
//! Every field is read as text first. Numeric and date fields are then
//! coerced, and a value that fails to parse becomes `None` rather than an
//! error. Only framing-level CSV failures abort the run.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tokio::fs;
use tracing::warn;

use crate::error::{LoadError, Result};

/// Tokens read as missing values, whatever column they appear in.
const NA_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// One review row after normalization and coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewRecord {
    pub review_id: Option<String>,
    pub review_text: Option<String>,
    pub rating: Option<i32>,
    pub review_date: Option<NaiveDate>,
    pub review_year: Option<i32>,
    pub review_month: Option<i32>,
    pub bank_code: Option<String>,
    pub bank_name: Option<String>,
    pub user_name: Option<String>,
    pub thumbs_up: Option<i32>,
    pub text_length: Option<i32>,
    pub source: Option<String>,
    pub sentiment_label: Option<String>,
    pub sentiment_score: Option<f64>,
    /// Line in the source file, for diagnostics.
    pub line: u64,
}

/// Positions of the expected columns in the header row. A column absent from
/// the file maps to `None` and reads as null for every row.
#[derive(Debug)]
struct ColumnMap {
    review_id: Option<usize>,
    review_text: Option<usize>,
    rating: Option<usize>,
    review_date: Option<usize>,
    review_year: Option<usize>,
    review_month: Option<usize>,
    bank_code: Option<usize>,
    bank_name: Option<usize>,
    user_name: Option<usize>,
    thumbs_up: Option<usize>,
    text_length: Option<usize>,
    source: Option<usize>,
    sentiment_label: Option<usize>,
    sentiment_score: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            // first occurrence wins on duplicated headers
            index.entry(header).or_insert(i);
        }
        let col = |name: &str| index.get(name).copied();

        Self {
            review_id: col("review_id"),
            review_text: col("review_text"),
            rating: col("rating"),
            review_date: col("review_date"),
            review_year: col("review_year"),
            review_month: col("review_month"),
            bank_code: col("bank_code"),
            bank_name: col("bank_name"),
            user_name: col("user_name"),
            thumbs_up: col("thumbs_up"),
            text_length: col("text_length"),
            source: col("source"),
            // Upstream exports call it `sentiment`; the store calls it `sentiment_label`.
            sentiment_label: col("sentiment").or_else(|| col("sentiment_label")),
            sentiment_score: col("sentiment_score"),
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        [
            ("review_id", self.review_id),
            ("review_text", self.review_text),
            ("rating", self.rating),
            ("review_date", self.review_date),
            ("review_year", self.review_year),
            ("review_month", self.review_month),
            ("bank_code", self.bank_code),
            ("bank_name", self.bank_name),
            ("user_name", self.user_name),
            ("thumbs_up", self.thumbs_up),
            ("text_length", self.text_length),
            ("source", self.source),
            ("sentiment", self.sentiment_label),
            ("sentiment_score", self.sentiment_score),
        ]
        .into_iter()
        .filter_map(|(name, idx)| idx.is_none().then_some(name))
        .collect()
    }
}

/// Reads and parses the CSV at `path`.
pub async fn read_reviews(path: &Path) -> Result<Vec<ReviewRecord>> {
    let bytes = fs::read(path).await.map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content = decode(&bytes);
    parse_reviews(&content)
}

/// Decodes file bytes as UTF-8, falling back to Windows-1252 for legacy
/// spreadsheet exports.
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) => {
            warn!(
                valid_up_to = e.valid_up_to(),
                "input is not valid UTF-8; decoding as Windows-1252"
            );
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Parses CSV content into coerced review records.
/// Same input always yields the same records in the same order.
pub fn parse_reviews(content: &str) -> Result<Vec<ReviewRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| LoadError::Csv { line: 1, source })?
        .clone();
    let columns = ColumnMap::from_headers(&headers);

    let missing = columns.missing();
    if !missing.is_empty() {
        warn!(columns = ?missing, "columns missing from input; treating them as null");
    }

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|source| LoadError::Csv {
            line: source.position().map(|p| p.line()).unwrap_or(0),
            source,
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let field = |idx: Option<usize>| idx.and_then(|i| record.get(i));

        records.push(ReviewRecord {
            review_id: coerce_text(field(columns.review_id)),
            review_text: coerce_text(field(columns.review_text)),
            rating: coerce_int(field(columns.rating)),
            review_date: coerce_date(field(columns.review_date)),
            review_year: coerce_int(field(columns.review_year)),
            review_month: coerce_int(field(columns.review_month)),
            bank_code: coerce_text(field(columns.bank_code)),
            bank_name: coerce_text(field(columns.bank_name)),
            user_name: coerce_text(field(columns.user_name)),
            thumbs_up: coerce_int(field(columns.thumbs_up)),
            text_length: coerce_int(field(columns.text_length)),
            source: coerce_text(field(columns.source)),
            sentiment_label: coerce_text(field(columns.sentiment_label)),
            sentiment_score: coerce_float(field(columns.sentiment_score)),
            line,
        });
    }

    Ok(records)
}

fn is_missing(raw: &str) -> bool {
    NA_TOKENS.contains(&raw)
}

/// Text passes through untouched unless it is a missing-value token.
pub fn coerce_text(raw: Option<&str>) -> Option<String> {
    raw.filter(|s| !is_missing(s)).map(str::to_string)
}

/// Accepts plain integers and integral floats (`"4.0"`) within `i32` range.
pub fn coerce_int(raw: Option<&str>) -> Option<i32> {
    let raw = raw?.trim();
    if is_missing(raw) {
        return None;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return i32::try_from(n).ok();
    }
    let f = raw.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64 {
        Some(f as i32)
    } else {
        None
    }
}

pub fn coerce_float(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    if is_missing(raw) {
        return None;
    }
    raw.parse::<f64>().ok().filter(|f| f.is_finite())
}

pub fn coerce_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if is_missing(raw) {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}
