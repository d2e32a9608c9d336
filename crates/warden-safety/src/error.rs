use thiserror::Error;

/// Errors from a [`crate::StateStore`] backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("safety state already exists for key: {0}")]
    DuplicateKey(String),

    #[error("no safety state for key: {0}")]
    NotFound(String),
}

/// Errors surfaced by the safety filter.
#[derive(Error, Debug)]
pub enum SafetyError {
    /// Compare-and-swap retries exhausted. The gate maps this to a denial
    /// with reason "contention" (fail closed).
    #[error("compare-and-swap contention exceeded for key {key} after {attempts} attempts")]
    ContentionExceeded { key: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
