//! SQLite adapter for safety state.
//!
//! This is the reference durable backend: a crash must not reset a tracked
//! invariant to an optimistic default, so rows live in a database file, not
//! process memory. The compare-and-swap is a conditional UPDATE keyed on the
//! row's last-write timestamp; SQLite serializes writers, which gives the
//! per-key linearizable ordering the filter relies on.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::StoreError;
use crate::state::SafetyState;
use crate::store::{CasOutcome, StateStore};

/// SQLite-backed [`StateStore`].
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Self::connect_with_options(database_url, 5, 5).await
    }

    /// Connect with explicit pool parameters.
    ///
    /// In-memory databases (`sqlite::memory:`) need `max_connections = 1`,
    /// since each pooled connection would otherwise see its own database.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Backend(format!("invalid sqlite url: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect sqlite: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the adapter from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warden_safety_state (
                key TEXT PRIMARY KEY,
                value REAL NOT NULL,
                limit_value REAL NOT NULL,
                decay_rate REAL NOT NULL,
                updated_at_us INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        Ok(())
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(us: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {us}")))
}

fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<SafetyState, StoreError> {
    Ok(SafetyState {
        key: row.get::<String, _>("key"),
        value: row.get::<f64, _>("value"),
        limit: row.get::<f64, _>("limit_value"),
        decay_rate: row.get::<f64, _>("decay_rate"),
        updated_at: from_micros(row.get::<i64, _>("updated_at_us"))?,
    })
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<SafetyState>, StoreError> {
        let row = sqlx::query(
            "SELECT key, value, limit_value, decay_rate, updated_at_us
               FROM warden_safety_state WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.as_ref().map(row_to_state).transpose()
    }

    async fn compare_and_swap(
        &self,
        expected: &SafetyState,
        next: &SafetyState,
    ) -> Result<CasOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE warden_safety_state
               SET value = ?,
                   limit_value = ?,
                   decay_rate = ?,
                   updated_at_us = ?
             WHERE key = ?
               AND updated_at_us = ?
            "#,
        )
        .bind(next.value)
        .bind(next.limit)
        .bind(next.decay_rate)
        .bind(to_micros(next.updated_at))
        .bind(expected.key.as_str())
        .bind(to_micros(expected.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 1 {
            return Ok(CasOutcome::Applied);
        }
        if self.get(&expected.key).await?.is_some() {
            Ok(CasOutcome::Conflict)
        } else {
            Err(StoreError::NotFound(expected.key.clone()))
        }
    }

    async fn insert(&self, state: SafetyState) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO warden_safety_state
                (key, value, limit_value, decay_rate, updated_at_us)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(state.key.as_str())
        .bind(state.value)
        .bind(state.limit)
        .bind(state.decay_rate)
        .bind(to_micros(state.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateKey(state.key));
        }
        Ok(())
    }

    async fn reset(&self, state: SafetyState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO warden_safety_state
                (key, value, limit_value, decay_rate, updated_at_us)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                limit_value = excluded.limit_value,
                decay_rate = excluded.decay_rate,
                updated_at_us = excluded.updated_at_us
            "#,
        )
        .bind(state.key.as_str())
        .bind(state.value)
        .bind(state.limit)
        .bind(state.decay_rate)
        .bind(to_micros(state.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
