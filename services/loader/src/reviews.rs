//! Review fact loading.
//!
//! Rows are written in multi-row INSERT batches with
//! `ON CONFLICT (review_id) DO NOTHING`, so a rerun only adds reviews that
//! are not stored yet and never rewrites an existing one.

use chrono::NaiveDate;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use crate::banks::{ensure_bank_by_name, BankMap};
use crate::config::validate_batch_size;
use crate::error::{LoadError, Result};
use crate::input::ReviewRecord;

/// Bound parameters per review row.
pub const REVIEW_COLUMNS: usize = 13;

const INSERT_REVIEWS: &str = "INSERT INTO reviews (review_id, bank_id, review_text, rating, review_date, review_year, review_month, user_name, thumbs_up, text_length, source, sentiment_label, sentiment_score) ";

/// A review ready for insertion, with its bank resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRow {
    pub review_id: Option<String>,
    pub bank_id: i32,
    pub review_text: Option<String>,
    pub rating: Option<i32>,
    pub review_date: Option<NaiveDate>,
    pub review_year: Option<i32>,
    pub review_month: Option<i32>,
    pub user_name: Option<String>,
    pub thumbs_up: Option<i32>,
    pub text_length: Option<i32>,
    pub source: Option<String>,
    pub sentiment_label: Option<String>,
    pub sentiment_score: Option<f64>,
}

impl ReviewRow {
    pub fn new(record: &ReviewRecord, bank_id: i32) -> Self {
        Self {
            review_id: record.review_id.clone(),
            bank_id,
            review_text: record.review_text.clone(),
            rating: record.rating,
            review_date: record.review_date,
            review_year: record.review_year,
            review_month: record.review_month,
            user_name: record.user_name.clone(),
            thumbs_up: record.thumbs_up,
            text_length: record.text_length,
            source: record.source.clone(),
            sentiment_label: record.sentiment_label.clone(),
            sentiment_score: record.sentiment_score,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactSummary {
    /// Rows handed to the database.
    pub prepared: usize,
    pub inserted: u64,
    /// Rows discarded because their review_id was already stored.
    pub skipped_existing: u64,
    /// Records with neither a bank code nor a bank name.
    pub skipped_unresolved: usize,
    pub batches: usize,
}

/// Resolves banks for every record, then writes the rows in batches.
pub async fn load_reviews(
    conn: &mut PgConnection,
    records: &[ReviewRecord],
    banks: &mut BankMap,
    batch_size: usize,
) -> Result<FactSummary> {
    let batch_size = validate_batch_size(batch_size)?;
    let (rows, skipped_unresolved) = prepare_rows(conn, records, banks).await?;
    let mut summary = write_batches(conn, &rows, batch_size).await?;
    summary.skipped_unresolved = skipped_unresolved;
    Ok(summary)
}

/// Attaches a bank id to each record. Unknown bank names get a bank created
/// on the spot; records with no bank information at all are dropped.
pub async fn prepare_rows(
    conn: &mut PgConnection,
    records: &[ReviewRecord],
    banks: &mut BankMap,
) -> Result<(Vec<ReviewRow>, usize)> {
    let mut rows = Vec::with_capacity(records.len());
    let mut unresolved = 0usize;

    for record in records {
        let code = record.bank_code.as_deref();
        let name = record.bank_name.as_deref();

        let bank_id = match (banks.resolve(code, name), name) {
            (Some(bank_id), _) => bank_id,
            (None, Some(name)) => ensure_bank_by_name(conn, banks, name).await?,
            (None, None) => {
                debug!(line = record.line, bank_code = ?code, "review has no resolvable bank");
                unresolved += 1;
                continue;
            }
        };

        rows.push(ReviewRow::new(record, bank_id));
    }

    if unresolved > 0 {
        warn!(
            skipped = unresolved,
            "skipped reviews with neither a known bank_code nor a bank_name"
        );
    }

    Ok((rows, unresolved))
}

/// Writes `rows` in chunks of `batch_size`. The first failing batch aborts
/// the write; earlier batches stay in the caller's transaction.
pub async fn write_batches(
    conn: &mut PgConnection,
    rows: &[ReviewRow],
    batch_size: usize,
) -> Result<FactSummary> {
    let batch_size = validate_batch_size(batch_size)?;
    let mut summary = FactSummary {
        prepared: rows.len(),
        ..Default::default()
    };

    for (idx, batch) in rows.chunks(batch_size).enumerate() {
        let batch_no = idx + 1;
        let inserted = insert_batch(conn, batch)
            .await
            .map_err(|source| LoadError::Fact {
                batch: batch_no,
                source,
            })?;

        debug!(batch = batch_no, rows = batch.len(), inserted, "wrote review batch");
        summary.inserted += inserted;
        summary.skipped_existing += batch.len() as u64 - inserted;
        summary.batches += 1;
    }

    info!(
        prepared = summary.prepared,
        inserted = summary.inserted,
        skipped_existing = summary.skipped_existing,
        batches = summary.batches,
        "loaded reviews"
    );
    Ok(summary)
}

/// One multi-row INSERT; returns how many rows were actually inserted.
async fn insert_batch(conn: &mut PgConnection, batch: &[ReviewRow]) -> Result<u64, sqlx::Error> {
    let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(INSERT_REVIEWS);
    qb.push_values(batch, |mut b, row| {
        b.push_bind(row.review_id.as_deref())
            .push_bind(row.bank_id)
            .push_bind(row.review_text.as_deref())
            .push_bind(row.rating)
            .push_bind(row.review_date)
            .push_bind(row.review_year)
            .push_bind(row.review_month)
            .push_bind(row.user_name.as_deref())
            .push_bind(row.thumbs_up)
            .push_bind(row.text_length)
            .push_bind(row.source.as_deref())
            .push_bind(row.sentiment_label.as_deref())
            .push_bind(row.sentiment_score);
    });
    qb.push(" ON CONFLICT (review_id) DO NOTHING");

    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}
