//! Warden Consensus - multi-reviewer escalation with fail-safe aggregation.
//!
//! Actions flagged ESCALATE by policy, or carrying high stakes, are put to a
//! roster of independent reviewers. Any implementation of [`Reviewer`]
//! (heuristic, model-based, human) is substitutable. The aggregate biases
//! toward rejection: reviewer timeouts become implicit REJECT ballots, and
//! approval requires a strict majority of *expected* ballots, not just those
//! that arrived.

pub mod engine;
pub mod error;
pub mod reviewer;

pub use engine::{ConsensusEngine, ConsensusOutcome, ConsensusVerdict};
pub use error::{ConsensusError, ReviewError};
pub use reviewer::{ReviewOpinion, Reviewer};

/// Reason string used when too few ballots were collectible.
pub const INSUFFICIENT_QUORUM: &str = "insufficient quorum";
