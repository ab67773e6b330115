//! Loads processed bank review exports into PostgreSQL.
//!
//! A run reads the CSV, reconciles the `banks` dimension, then bulk-inserts
//! `reviews`, all inside one transaction. Reruns are safe: banks are upserted
//! and reviews already stored are skipped.

pub mod banks;
pub mod config;
pub mod error;
pub mod input;
pub mod reviews;
pub mod store;

pub use banks::{distinct_banks, reconcile_banks, BankMap, BankPair};
pub use config::Config;
pub use error::{LoadError, Result};
pub use input::{parse_reviews, read_reviews, ReviewRecord};
pub use reviews::{load_reviews, FactSummary, ReviewRow};
pub use store::{bootstrap_schema, connect, read_schema, run_load, LoadSummary};
