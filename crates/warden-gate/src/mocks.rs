//! Test doubles for wiring a gate without external services.
//!
//! Used by the crate's own tests and the examples; deliberately simple and
//! fully deterministic except where a delay is scripted in.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use warden_consensus::{ReviewError, ReviewOpinion, Reviewer};
use warden_policy::{PdpClient, PdpResponse, PolicyError};
use warden_types::{Decision, ProposedAction, Vote};

use crate::effector::{EffectReceipt, Effector, EffectorError, PreparedEffect};

/// Effector with scriptable delays and failures, counting commits.
pub struct MockEffector {
    prepare_delay: Duration,
    commit_delay: Duration,
    fail_prepare: bool,
    fail_commit: bool,
    commits: AtomicU32,
}

impl MockEffector {
    pub fn new() -> Self {
        Self {
            prepare_delay: Duration::ZERO,
            commit_delay: Duration::ZERO,
            fail_prepare: false,
            fail_commit: false,
            commits: AtomicU32::new(0),
        }
    }

    pub fn with_prepare_delay(mut self, delay: Duration) -> Self {
        self.prepare_delay = delay;
        self
    }

    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// How many effects actually committed.
    pub fn commit_count(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }
}

impl Default for MockEffector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Effector for MockEffector {
    async fn prepare(&self, action: &ProposedAction) -> Result<PreparedEffect, EffectorError> {
        tokio::time::sleep(self.prepare_delay).await;
        if self.fail_prepare {
            return Err(EffectorError::Prepare("scripted prepare failure".into()));
        }
        Ok(PreparedEffect {
            action_id: action.action_id,
            token: format!("intent-{}", Uuid::new_v4()),
        })
    }

    async fn commit(&self, effect: PreparedEffect) -> Result<EffectReceipt, EffectorError> {
        tokio::time::sleep(self.commit_delay).await;
        if self.fail_commit {
            return Err(EffectorError::Commit("scripted commit failure".into()));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(EffectReceipt {
            action_id: effect.action_id,
            reference: effect.token,
            committed_at: Utc::now(),
        })
    }
}

/// PDP client that always answers the same verdict, optionally after a delay.
pub struct StaticPdpClient {
    decision: Decision,
    reason: String,
    delay: Duration,
}

impl StaticPdpClient {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: "within limits".into(),
            delay: Duration::ZERO,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn escalate(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Escalate,
            reason: reason.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl PdpClient for StaticPdpClient {
    async fn evaluate(&self, _action: &ProposedAction) -> Result<PdpResponse, PolicyError> {
        tokio::time::sleep(self.delay).await;
        Ok(PdpResponse {
            decision: self.decision,
            reason: self.reason.clone(),
            policy_id: "static-v1".into(),
        })
    }
}

/// PDP client whose transport always fails.
pub struct UnreachablePdpClient;

#[async_trait]
impl PdpClient for UnreachablePdpClient {
    async fn evaluate(&self, _action: &ProposedAction) -> Result<PdpResponse, PolicyError> {
        Err(PolicyError::Transport("connection refused".into()))
    }
}

struct ScriptedReviewer {
    id: String,
    vote: Vote,
    delay: Duration,
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn review(&self, _action: &ProposedAction) -> Result<ReviewOpinion, ReviewError> {
        tokio::time::sleep(self.delay).await;
        Ok(match self.vote {
            Vote::Approve => ReviewOpinion::approve("scripted approval"),
            Vote::Reject => ReviewOpinion::reject("scripted rejection"),
        })
    }
}

pub fn approving_reviewer(id: &str) -> Arc<dyn Reviewer> {
    Arc::new(ScriptedReviewer {
        id: id.into(),
        vote: Vote::Approve,
        delay: Duration::ZERO,
    })
}

pub fn rejecting_reviewer(id: &str) -> Arc<dyn Reviewer> {
    Arc::new(ScriptedReviewer {
        id: id.into(),
        vote: Vote::Reject,
        delay: Duration::ZERO,
    })
}

/// A reviewer that never answers within any sane timeout.
pub fn stalled_reviewer(id: &str) -> Arc<dyn Reviewer> {
    Arc::new(ScriptedReviewer {
        id: id.into(),
        vote: Vote::Reject,
        delay: Duration::from_secs(3600),
    })
}
