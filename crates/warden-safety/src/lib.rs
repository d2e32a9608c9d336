//! Warden Safety - forward-invariance filter over durable keyed state.
//!
//! Each tracked invariant (e.g. a cash balance) is one [`SafetyState`] row in
//! a durable store. The barrier function `h(x) = value - limit` measures
//! distance from the unsafe boundary; a proposed delta is admitted iff
//! `h(next) >= (1 - decay_rate) * h(current)`, so the state may approach the
//! boundary only at a bounded rate.
//!
//! The filter fails closed: an unreadable or missing row denies the action
//! with reason `"state unavailable"`. There is no optimistic default — an
//! assumed balance is a known unsafe failure mode.
//!
//! All mutations go through the store's compare-and-swap, keyed on
//! `updated_at`, so concurrent checks on one key serialize through the
//! backend rather than through in-process locks.
#![deny(unsafe_code)]

pub mod error;
pub mod filter;
pub mod sqlite;
pub mod state;
pub mod store;

pub use error::{SafetyError, StoreError};
pub use filter::{SafetyDecision, SafetyFilter};
pub use sqlite::SqliteStateStore;
pub use state::SafetyState;
pub use store::{CasOutcome, MemoryStateStore, StateStore};

/// Reason string used whenever the backing state cannot be read.
pub const STATE_UNAVAILABLE: &str = "state unavailable";
