use thiserror::Error;

/// Error from a single reviewer.
#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("reviewer failed: {0}")]
    Failed(String),
}

/// Errors from the escalation engine itself.
///
/// Timeouts and rejections are not errors — they fold into the aggregate
/// verdict. Only a misconfigured escalation fails outright.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("no reviewers configured for escalation")]
    EmptyRoster,
}
