use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use warden_types::ActionLedgerEntry;

use crate::error::LedgerError;

/// Durable append-only destination for finalized ledger entries.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn append(&self, entry: ActionLedgerEntry) -> Result<(), LedgerError>;
}

/// In-memory sink for tests.
pub struct MemorySink {
    entries: Mutex<Vec<ActionLedgerEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<ActionLedgerEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerSink for MemorySink {
    async fn append(&self, entry: ActionLedgerEntry) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.action_id == entry.action_id) {
            return Err(LedgerError::DuplicateEntry(entry.action_id));
        }
        entries.push(entry);
        Ok(())
    }
}

/// Write-behind pump from the coordinator to a [`LedgerSink`].
///
/// The coordinator's critical path only pays for a bounded channel send;
/// a background task drains entries into the sink. `shutdown` closes the
/// channel and awaits the drain, so no enqueued entry is lost on a clean
/// shutdown.
pub struct LedgerWriter {
    tx: mpsc::Sender<ActionLedgerEntry>,
    drain: JoinHandle<()>,
}

impl LedgerWriter {
    /// Start the background drain task.
    pub fn spawn(sink: Arc<dyn LedgerSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<ActionLedgerEntry>(capacity);
        let drain = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let action_id = entry.action_id;
                match sink.append(entry).await {
                    Ok(()) => debug!(%action_id, "ledger entry persisted"),
                    // The in-process ledger still holds the entry; losing the
                    // durable copy is logged loudly rather than crashing the
                    // adjudication path.
                    Err(err) => error!(%action_id, error = %err, "ledger sink append failed"),
                }
            }
        });
        Self { tx, drain }
    }

    /// Enqueue a finalized entry without blocking the adjudication path.
    pub fn submit(&self, entry: ActionLedgerEntry) -> Result<(), LedgerError> {
        let action_id = entry.action_id;
        self.tx.try_send(entry).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => LedgerError::QueueFull(action_id),
            mpsc::error::TrySendError::Closed(_) => LedgerError::WriterClosed,
        })
    }

    /// Close the queue and wait for every enqueued entry to reach the sink.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(err) = self.drain.await {
            error!(error = %err, "ledger writer drain task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_types::{ActionOutcome, ProposedAction, StakesTier};

    fn entry() -> ActionLedgerEntry {
        let action = ProposedAction::builder("transfer")
            .stakes(StakesTier::Low)
            .build();
        ActionLedgerEntry {
            action_id: action.action_id,
            proposed: action,
            verdicts: vec![],
            ballots: vec![],
            outcome: ActionOutcome::Committed,
            total_latency_ms: 3,
            finalized_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn shutdown_flushes_every_enqueued_entry() {
        let sink = Arc::new(MemorySink::new());
        let writer = LedgerWriter::spawn(sink.clone(), 16);

        for _ in 0..5 {
            writer.submit(entry()).unwrap();
        }
        writer.shutdown().await;

        assert_eq!(sink.len(), 5);
    }

    #[tokio::test]
    async fn full_queue_reports_backpressure() {
        // A sink that never completes, so the queue cannot drain.
        struct StuckSink;

        #[async_trait]
        impl LedgerSink for StuckSink {
            async fn append(&self, _entry: ActionLedgerEntry) -> Result<(), LedgerError> {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }

        let writer = LedgerWriter::spawn(Arc::new(StuckSink), 1);
        writer.submit(entry()).unwrap();

        // The sink never finishes, so at most one more entry fits in the
        // channel slot; the next submit must report a full queue.
        let mut saw_full = false;
        for _ in 0..8 {
            match writer.submit(entry()) {
                Ok(()) => tokio::task::yield_now().await,
                Err(LedgerError::QueueFull(_)) => {
                    saw_full = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_full);
        writer.drain.abort();
    }

    #[tokio::test]
    async fn memory_sink_rejects_duplicates() {
        let sink = MemorySink::new();
        let e = entry();
        sink.append(e.clone()).await.unwrap();
        assert!(matches!(
            sink.append(e).await.unwrap_err(),
            LedgerError::DuplicateEntry(_)
        ));
    }
}
