use thiserror::Error;
use warden_types::ActionId;

/// Errors from the action ledger and its sinks.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("action {0} was never opened in the ledger")]
    NotOpened(ActionId),

    #[error("action {0} is already finalized; entries are immutable")]
    AlreadyFinalized(ActionId),

    #[error("sink already holds an entry for action {0}")]
    DuplicateEntry(ActionId),

    #[error("write-behind queue full; entry for {0} not enqueued")]
    QueueFull(ActionId),

    #[error("write-behind writer is shut down")]
    WriterClosed,

    #[error("ledger backend error: {0}")]
    Backend(String),

    #[error("ledger serialization error: {0}")]
    Serialization(String),
}
