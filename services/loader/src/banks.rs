//! Bank dimension reconciliation.
//!
//! Coded banks are upserted on `bank_code` (last name wins). Banks without a
//! code are inserted by name through a conditional insert that the store
//! evaluates against the `banks_name_without_code_key` partial unique index,
//! so two loaders racing on the same name still end up with one row.

use std::collections::{HashMap, HashSet};

use sqlx::PgConnection;
use tracing::{debug, info, warn};

use crate::error::{LoadError, Result};
use crate::input::ReviewRecord;

/// A distinct (bank_code, bank_name) combination seen in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankPair {
    pub code: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct BankRow {
    bank_id: i32,
    bank_code: Option<String>,
    bank_name: String,
}

/// Bank identifiers keyed by code and by name, built once per run and then
/// extended by the fact loader when it has to create a bank lazily.
#[derive(Debug, Clone, Default)]
pub struct BankMap {
    by_code: HashMap<String, i32>,
    by_name: HashMap<String, i32>,
}

impl BankMap {
    /// Code wins over name: a renamed bank keeps its identity.
    pub fn resolve(&self, code: Option<&str>, name: Option<&str>) -> Option<i32> {
        code.and_then(|c| self.by_code.get(c))
            .or_else(|| name.and_then(|n| self.by_name.get(n)))
            .copied()
    }

    pub fn by_name(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    pub fn by_code(&self, code: &str) -> Option<i32> {
        self.by_code.get(code).copied()
    }

    pub fn insert_name(&mut self, name: impl Into<String>, bank_id: i32) {
        self.by_name.insert(name.into(), bank_id);
    }

    /// Number of distinct bank names known.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn add_row(&mut self, row: BankRow) {
        if let Some(code) = row.bank_code {
            self.by_code.insert(code, row.bank_id);
        }
        // rows arrive coded-first, oldest-first; the first claim on a name sticks
        self.by_name.entry(row.bank_name).or_insert(row.bank_id);
    }
}

/// Distinct bank pairs in first-seen order.
///
/// Pairs sharing a code collapse into one whose name is the last non-null
/// name seen for that code. Uncoded pairs collapse by name. Rows with
/// neither field yield a single empty pair.
pub fn distinct_banks(records: &[ReviewRecord]) -> Vec<BankPair> {
    let mut pairs: Vec<BankPair> = Vec::new();
    let mut code_slots: HashMap<&str, usize> = HashMap::new();
    let mut uncoded_names: HashSet<&str> = HashSet::new();
    let mut saw_empty = false;

    for record in records {
        match (record.bank_code.as_deref(), record.bank_name.as_deref()) {
            (Some(code), name) => match code_slots.get(code) {
                Some(&slot) => {
                    if let Some(name) = name {
                        pairs[slot].name = Some(name.to_string());
                    }
                }
                None => {
                    code_slots.insert(code, pairs.len());
                    pairs.push(BankPair {
                        code: Some(code.to_string()),
                        name: name.map(str::to_string),
                    });
                }
            },
            (None, Some(name)) => {
                if uncoded_names.insert(name) {
                    pairs.push(BankPair {
                        code: None,
                        name: Some(name.to_string()),
                    });
                }
            }
            (None, None) => {
                if !saw_empty {
                    saw_empty = true;
                    pairs.push(BankPair {
                        code: None,
                        name: None,
                    });
                }
            }
        }
    }

    pairs
}

/// Writes every pair to `banks` and reads the whole table back into a map.
pub async fn reconcile_banks(conn: &mut PgConnection, pairs: &[BankPair]) -> Result<BankMap> {
    let mut upserted = 0usize;
    let mut inserted_by_name = 0usize;

    // Coded pairs first, so an uncoded name finds its coded twin regardless
    // of file order.
    let (coded, uncoded): (Vec<&BankPair>, Vec<&BankPair>) =
        pairs.iter().partition(|pair| pair.code.is_some());

    for pair in coded.into_iter().chain(uncoded) {
        match (pair.code.as_deref(), pair.name.as_deref()) {
            (None, None) => {
                warn!("skipping bank with neither bank_code nor bank_name");
            }
            (Some(code), name) => {
                let bank_id = upsert_by_code(conn, code, name).await?;
                debug!(bank_code = code, bank_id, "upserted bank");
                upserted += 1;
            }
            (None, Some(name)) => {
                if let Some(bank_id) = insert_name_if_absent(conn, name).await? {
                    debug!(bank_name = name, bank_id, "inserted uncoded bank");
                    inserted_by_name += 1;
                }
            }
        }
    }

    // Name-only inserts that hit an existing row return nothing, so the map
    // always comes from the table itself.
    let map = read_bank_map(conn).await?;
    info!(
        upserted,
        inserted_by_name,
        known = map.len(),
        "reconciled banks"
    );
    Ok(map)
}

/// Insert-or-rename keyed on `bank_code`. A missing name keeps the stored
/// one, or falls back to the code for a brand-new row.
async fn upsert_by_code(conn: &mut PgConnection, code: &str, name: Option<&str>) -> Result<i32> {
    sqlx::query_scalar(
        r#"
        INSERT INTO banks (bank_code, bank_name)
        VALUES ($1, COALESCE($2, $1))
        ON CONFLICT (bank_code) DO UPDATE SET bank_name = COALESCE($2, banks.bank_name)
        RETURNING bank_id
        "#,
    )
    .bind(code)
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|source| LoadError::Dimension {
        key: format!("bank_code={code}"),
        source,
    })
}

/// Inserts an uncoded bank unless any bank, coded or not, already has this
/// name. Returns the new identifier, or `None` when the existing row was left
/// untouched.
///
/// Concurrent writers can both pass the NOT EXISTS check; the partial unique
/// index then turns the second insert into a no-op.
async fn insert_name_if_absent(conn: &mut PgConnection, name: &str) -> Result<Option<i32>> {
    sqlx::query_scalar(
        r#"
        INSERT INTO banks (bank_name)
        SELECT $1::text
        WHERE NOT EXISTS (SELECT 1 FROM banks WHERE bank_name = $1::text)
        ON CONFLICT (bank_name) WHERE bank_code IS NULL DO NOTHING
        RETURNING bank_id
        "#,
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|source| LoadError::Dimension {
        key: format!("bank_name={name}"),
        source,
    })
}

/// Lazy path for a name the map does not know: creates a minimal uncoded
/// bank (or finds the one a concurrent loader created) and caches its id.
pub async fn ensure_bank_by_name(
    conn: &mut PgConnection,
    map: &mut BankMap,
    name: &str,
) -> Result<i32> {
    if let Some(bank_id) = map.by_name(name) {
        return Ok(bank_id);
    }

    // The no-op update makes RETURNING yield the existing row's id too;
    // xmax is 0 only for a freshly inserted tuple.
    let (bank_id, inserted): (i32, bool) = sqlx::query_as(
        r#"
        INSERT INTO banks (bank_name)
        VALUES ($1)
        ON CONFLICT (bank_name) WHERE bank_code IS NULL
            DO UPDATE SET bank_name = EXCLUDED.bank_name
        RETURNING bank_id, (xmax = 0) AS inserted
        "#,
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|source| LoadError::Dimension {
        key: format!("bank_name={name}"),
        source,
    })?;

    if inserted {
        info!(bank_name = name, bank_id, "created bank missing from dimension map");
    } else {
        info!(bank_name = name, bank_id, "found existing bank missing from dimension map");
    }
    map.insert_name(name, bank_id);
    Ok(bank_id)
}

/// Reads every bank. Coded rows are loaded first so that a name shared by a
/// coded and an uncoded bank resolves to the coded one.
pub async fn read_bank_map(conn: &mut PgConnection) -> Result<BankMap> {
    let rows: Vec<BankRow> = sqlx::query_as(
        "SELECT bank_id, bank_code, bank_name FROM banks ORDER BY bank_code IS NULL, bank_id",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|source| LoadError::Dimension {
        key: "read-back".to_string(),
        source,
    })?;

    let mut map = BankMap::default();
    for row in rows {
        map.add_row(row);
    }
    Ok(map)
}
