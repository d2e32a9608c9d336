use thiserror::Error;
use warden_types::ActionId;

/// Errors the coordinator surfaces to its caller.
///
/// Governance denials are not errors: they resolve to
/// [`warden_types::ActionOutcome::Aborted`] in a normal result. Only
/// conditions the caller must handle differently end up here.
#[derive(Error, Debug)]
pub enum GateError {
    /// The same action id is being adjudicated right now. Retry after the
    /// in-flight adjudication resolves; the ledger will then replay it.
    #[error("action {0} is already being adjudicated")]
    AlreadyInFlight(ActionId),

    #[error(transparent)]
    Ledger(#[from] warden_ledger::LedgerError),
}
