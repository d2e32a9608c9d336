use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;
use warden_types::ActionLedgerEntry;

use crate::error::LedgerError;
use crate::ledger::{LedgerFilter, OutcomeKind};
use crate::sink::LedgerSink;

/// SQLite-backed ledger sink.
///
/// Each finalized entry is one row, keyed by action id, with the full entry
/// serialized as JSON alongside indexed columns for filtering. Rows are never
/// updated or deleted; a duplicate insert is rejected at the primary key.
pub struct SqliteLedgerSink {
    pool: SqlitePool,
}

impl SqliteLedgerSink {
    /// Open (creating if necessary) a ledger database at the given URL.
    ///
    /// For `sqlite::memory:` keep the pool at a single connection; each pooled
    /// connection would otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|err| LedgerError::Backend(err.to_string()))?
            .create_if_missing(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|err| LedgerError::Backend(err.to_string()))?;
        let sink = Self { pool };
        sink.init_schema().await?;
        Ok(sink)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warden_action_ledger (
                action_id       TEXT PRIMARY KEY,
                kind            TEXT NOT NULL,
                outcome         TEXT NOT NULL,
                entry           TEXT NOT NULL,
                finalized_at_us INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|err| LedgerError::Backend(err.to_string()))?;
        Ok(())
    }

    /// Finalized entries matching a filter, oldest first.
    pub async fn query(&self, filter: &LedgerFilter) -> Result<Vec<ActionLedgerEntry>, LedgerError> {
        let rows = sqlx::query(
            "SELECT entry FROM warden_action_ledger ORDER BY finalized_at_us ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| LedgerError::Backend(err.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("entry");
            let entry: ActionLedgerEntry = serde_json::from_str(&raw)
                .map_err(|err| LedgerError::Serialization(err.to_string()))?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn count(&self) -> Result<u64, LedgerError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM warden_action_ledger")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| LedgerError::Backend(err.to_string()))?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

fn outcome_label(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Committed => "committed",
        OutcomeKind::Aborted => "aborted",
        OutcomeKind::TimedOut => "timed_out",
        OutcomeKind::ExecutionFailed => "execution_failed",
    }
}

#[async_trait]
impl LedgerSink for SqliteLedgerSink {
    async fn append(&self, entry: ActionLedgerEntry) -> Result<(), LedgerError> {
        let raw = serde_json::to_string(&entry)
            .map_err(|err| LedgerError::Serialization(err.to_string()))?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO warden_action_ledger
                (action_id, kind, outcome, entry, finalized_at_us)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.action_id.to_string())
        .bind(&entry.proposed.kind)
        .bind(outcome_label(OutcomeKind::from(&entry.outcome)))
        .bind(raw)
        .bind(entry.finalized_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(|err| LedgerError::Backend(err.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DuplicateEntry(entry.action_id));
        }
        debug!(action_id = %entry.action_id, "ledger row inserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_types::{ActionOutcome, ProposedAction, StakesTier};

    async fn memory_sink() -> SqliteLedgerSink {
        SqliteLedgerSink::connect("sqlite::memory:").await.unwrap()
    }

    fn entry(kind: &str, outcome: ActionOutcome) -> ActionLedgerEntry {
        let action = ProposedAction::builder(kind)
            .stakes(StakesTier::Medium)
            .build();
        ActionLedgerEntry {
            action_id: action.action_id,
            proposed: action,
            verdicts: vec![],
            ballots: vec![],
            outcome,
            total_latency_ms: 12,
            finalized_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_and_query_round_trip() {
        let sink = memory_sink().await;
        let e = entry("transfer", ActionOutcome::Committed);
        let id = e.action_id;
        sink.append(e).await.unwrap();

        let all = sink.query(&LedgerFilter::new()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].action_id, id);
        assert_eq!(all[0].outcome, ActionOutcome::Committed);
    }

    #[tokio::test]
    async fn duplicate_action_id_is_rejected() {
        let sink = memory_sink().await;
        let e = entry("transfer", ActionOutcome::Committed);
        sink.append(e.clone()).await.unwrap();
        assert!(matches!(
            sink.append(e).await.unwrap_err(),
            LedgerError::DuplicateEntry(_)
        ));
        assert_eq!(sink.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn filter_narrows_by_outcome() {
        let sink = memory_sink().await;
        sink.append(entry("transfer", ActionOutcome::Committed))
            .await
            .unwrap();
        sink.append(entry(
            "transfer",
            ActionOutcome::Aborted {
                reason: "policy denied".into(),
            },
        ))
        .await
        .unwrap();

        let aborted = sink
            .query(&LedgerFilter::new().with_outcome(OutcomeKind::Aborted))
            .await
            .unwrap();
        assert_eq!(aborted.len(), 1);
    }
}
