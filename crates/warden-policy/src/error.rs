use thiserror::Error;

/// Errors from the PDP client path.
///
/// All of these map to a DENY verdict at the gateway (fail closed); the
/// variant is preserved only in the verdict reason for audit.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("circuit open")]
    CircuitOpen,

    #[error("pdp request timed out after {0} ms")]
    Timeout(u64),

    #[error("pdp returned status {0}")]
    UpstreamStatus(u16),

    #[error("pdp response malformed: {0}")]
    MalformedResponse(String),

    #[error("pdp transport error: {0}")]
    Transport(String),
}

impl PolicyError {
    /// Whether this failure should trip the circuit breaker.
    ///
    /// `CircuitOpen` itself never counts: no request was attempted.
    pub fn counts_as_breaker_failure(&self) -> bool {
        !matches!(self, PolicyError::CircuitOpen)
    }
}
