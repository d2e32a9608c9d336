use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use warden_types::{ActionId, ProposedAction};

/// Errors from the effect boundary.
#[derive(Error, Debug)]
pub enum EffectorError {
    #[error("prepare failed: {0}")]
    Prepare(String),

    #[error("commit failed: {0}")]
    Commit(String),
}

/// A staged effect, ready to commit.
///
/// Preparation must be free of irreversible side effects; everything up to
/// and including `prepare` can be discarded when the interrupt fires.
#[derive(Clone, Debug)]
pub struct PreparedEffect {
    pub action_id: ActionId,
    /// Opaque handle the effector needs to commit (e.g. a payment intent id).
    pub token: String,
}

/// Proof that the external effect happened.
#[derive(Clone, Debug)]
pub struct EffectReceipt {
    pub action_id: ActionId,
    pub reference: String,
    pub committed_at: DateTime<Utc>,
}

/// The irreversible boundary to the outside world.
///
/// Split into two phases so the final interrupt checkpoint sits between
/// them: `prepare` runs concurrently with evaluation, `commit` runs only
/// after the published verdict reads `Cleared`.
#[async_trait]
pub trait Effector: Send + Sync {
    async fn prepare(&self, action: &ProposedAction) -> Result<PreparedEffect, EffectorError>;

    async fn commit(&self, effect: PreparedEffect) -> Result<EffectReceipt, EffectorError>;
}
