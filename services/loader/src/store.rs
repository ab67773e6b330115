//! Database access: pool creation, schema bootstrap and the transactional
//! load run.

use std::path::Path;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tokio::fs;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::banks::{distinct_banks, reconcile_banks};
use crate::config::Config;
use crate::error::{LoadError, Result};
use crate::input::ReviewRecord;
use crate::reviews::{load_reviews, FactSummary};

/// What a committed run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub records: usize,
    /// Distinct bank names known after reconciliation, before lazy inserts.
    pub banks: usize,
    pub reviews: FactSummary,
}

// The connection string may carry credentials; keep it out of spans.
#[instrument(skip(config), fields(max_connections = config.max_connections))]
pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.db_url)
        .await?;
    info!("connected to database");
    Ok(pool)
}

pub async fn read_schema(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Runs the schema definition as one multi-statement batch.
pub async fn bootstrap_schema(conn: &mut PgConnection, ddl: &str) -> Result<()> {
    sqlx::raw_sql(ddl)
        .execute(&mut *conn)
        .await
        .map_err(LoadError::Schema)?;
    Ok(())
}

/// Bootstraps the schema, reconciles banks and loads reviews inside a single
/// transaction. Any error drops the transaction, which rolls back every
/// write made by this run.
#[instrument(skip_all, fields(run_id = %Uuid::new_v4(), records = records.len()))]
pub async fn run_load(
    pool: &PgPool,
    ddl: &str,
    records: &[ReviewRecord],
    batch_size: usize,
) -> Result<LoadSummary> {
    let mut tx = pool.begin().await?;

    bootstrap_schema(&mut *tx, ddl).await?;

    let pairs = distinct_banks(records);
    let mut banks = reconcile_banks(&mut *tx, &pairs).await?;
    let known_banks = banks.len();

    let reviews = load_reviews(&mut *tx, records, &mut banks, batch_size).await?;

    tx.commit().await?;
    info!(inserted = reviews.inserted, "load committed");

    Ok(LoadSummary {
        records: records.len(),
        banks: known_banks,
        reviews,
    })
}
