use async_trait::async_trait;
use warden_types::{ProposedAction, Vote};

use crate::error::ReviewError;

/// One reviewer's opinion on an escalated action.
#[derive(Clone, Debug)]
pub struct ReviewOpinion {
    pub vote: Vote,
    pub rationale: String,
}

impl ReviewOpinion {
    pub fn approve(rationale: impl Into<String>) -> Self {
        Self {
            vote: Vote::Approve,
            rationale: rationale.into(),
        }
    }

    pub fn reject(rationale: impl Into<String>) -> Self {
        Self {
            vote: Vote::Reject,
            rationale: rationale.into(),
        }
    }
}

/// An independent reviewer of escalated actions.
///
/// Implementations must be side-effect free with respect to the action:
/// reviewing must not execute anything.
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Stable identifier recorded on every ballot.
    fn id(&self) -> &str;

    async fn review(&self, action: &ProposedAction) -> Result<ReviewOpinion, ReviewError>;
}
