//! Shared PostgreSQL fixtures. Each test gets a throwaway schema on the
//! server named by `TEST_DB_URL`. The tests using these are `#[ignore]`d, so
//! run them with `cargo test -- --ignored` once the variable is set.

#![allow(dead_code)]

use std::str::FromStr;

use loader::bootstrap_schema;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

pub const SCHEMA_SQL: &str = include_str!("../../../../database/schema.sql");

pub const HEADER: &str = "review_id,review_text,rating,review_date,review_year,review_month,bank_code,bank_name,user_name,thumbs_up,text_length,source,sentiment,sentiment_score";

pub struct TestDb {
    pub pool: PgPool,
    admin: PgPool,
    schema: String,
}

/// Connects and creates an isolated schema.
pub async fn test_db() -> TestDb {
    let url = std::env::var("TEST_DB_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
        .expect("TEST_DB_URL must point at a PostgreSQL server for ignored database tests");

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("connect to TEST_DB_URL");

    let schema = format!("loader_test_{}", Uuid::new_v4().simple());
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create test schema");

    let options = PgConnectOptions::from_str(&url)
        .expect("parse TEST_DB_URL")
        .options([("search_path", schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .expect("connect with test search_path");

    TestDb {
        pool,
        admin,
        schema,
    }
}

impl TestDb {
    /// Creates the tables outside any load transaction.
    pub async fn bootstrap(&self) {
        let mut conn = self.pool.acquire().await.expect("acquire");
        bootstrap_schema(&mut *conn, SCHEMA_SQL)
            .await
            .expect("bootstrap schema");
    }

    pub async fn count(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .expect("count rows")
    }

    pub async fn banks(&self) -> Vec<(Option<String>, String)> {
        sqlx::query_as("SELECT bank_code, bank_name FROM banks ORDER BY bank_id")
            .fetch_all(&self.pool)
            .await
            .expect("select banks")
    }

    pub async fn teardown(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .expect("drop test schema");
        self.admin.close().await;
    }
}

/// Builds a CSV with the standard header from `(review_id, review_text,
/// rating, bank_code, bank_name)` tuples; other columns get fixed values.
pub fn csv(rows: &[(&str, &str, &str, &str, &str)]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (id, text, rating, code, name) in rows {
        out.push_str(&format!(
            "{id},{text},{rating},2024-05-01,2024,5,{code},{name},tester,0,{},Google Play,neutral,0.1\n",
            text.len()
        ));
    }
    out
}
