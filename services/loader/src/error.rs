//! Error types for the loader library.

use std::path::PathBuf;

use thiserror::Error;

/// Every way a load run can fail. Anything returned after the transaction
/// has begun rolls the whole run back.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Missing or invalid environment configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A file could not be read (CSV input or schema definition).
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The CSV could not be parsed at the framing level.
    #[error("unreadable CSV near line {line}: {source}")]
    Csv {
        line: u64,
        #[source]
        source: csv::Error,
    },

    /// Executing the schema definition failed.
    #[error("schema bootstrap failed: {0}")]
    Schema(#[source] sqlx::Error),

    /// A write or read against the banks table failed.
    #[error("bank reconciliation failed for {key}: {source}")]
    Dimension {
        key: String,
        #[source]
        source: sqlx::Error,
    },

    /// A batched review insert failed.
    #[error("review batch {batch} failed: {source}")]
    Fact {
        batch: usize,
        #[source]
        source: sqlx::Error,
    },

    /// Connection, begin or commit failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;
