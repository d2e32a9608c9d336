//! Warden Ledger - append-only decision trail with write-behind persistence.
//!
//! Every adjudicated action leaves exactly one [`warden_types::ActionLedgerEntry`]:
//! the proposal, every stage verdict, any consensus ballots, the terminal
//! outcome, and timings. Denied and timed-out actions are first-class records;
//! accountability is preserved regardless of outcome.
//!
//! The in-process [`ActionLedger`] is the authoritative exactly-once index;
//! the [`LedgerWriter`] drains finalized entries to a durable [`LedgerSink`]
//! off the coordinator's critical path, flushing fully on clean shutdown.
#![deny(unsafe_code)]

pub mod error;
pub mod ledger;
pub mod sink;
pub mod sqlite;

pub use error::LedgerError;
pub use ledger::{ActionLedger, BeginOutcome, LedgerFilter, OutcomeKind};
pub use sink::{LedgerSink, LedgerWriter, MemorySink};
pub use sqlite::SqliteLedgerSink;
