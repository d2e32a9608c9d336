use thiserror::Error;

use crate::ActionId;

/// Error taxonomy for the governance gateway.
///
/// Every evaluator-side variant is converted to a DENY verdict before it
/// reaches the coordinator; the distinction between "policy said no" and
/// "policy was unreachable" survives only in verdict reasons for audit.
/// Only `ExecutionFailed` is surfaced to the caller as its own outcome,
/// because its remediation (retry with backoff) differs from a governance
/// denial (revise the proposal).
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("safety invariant would be breached: {0}")]
    SafetyViolation(String),

    #[error("policy denied action: {0}")]
    PolicyDenied(String),

    #[error("policy decision point unavailable: {0}")]
    PolicyUnavailable(String),

    #[error("consensus rejected action: {0}")]
    ConsensusRejected(String),

    #[error("consensus quorum failure: {0}")]
    ConsensusQuorumFailure(String),

    #[error("execution failed after commit for action {action_id}: {detail}")]
    ExecutionFailed { action_id: ActionId, detail: String },

    #[error("adjudication race timed out for action {0}")]
    RaceTimeout(ActionId),

    #[error("safety state contention retries exhausted: {0}")]
    ContentionExceeded(String),
}
