//! Warden Types - shared data model for action adjudication.
//!
//! Every effectful action proposed by the reasoning layer is represented as a
//! [`ProposedAction`]. The gateway adjudicates it into exactly one
//! [`ActionOutcome`], accumulating [`PolicyVerdict`]s (one per evaluation
//! stage) and, for escalated actions, [`ConsensusBallot`]s along the way.
//! The full trail is retained as an [`ActionLedgerEntry`].
#![deny(unsafe_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::GovernanceError;

/// Identifier of a proposed action. Stable across idempotent retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much is at stake if this action goes wrong.
///
/// High-stakes actions are routed through consensus escalation regardless
/// of the policy verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StakesTier {
    Low,
    Medium,
    High,
}

/// An effectful action proposed by the reasoning layer.
///
/// Immutable once created; the `action_id` is the idempotency key for
/// retried adjudication calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action_id: ActionId,
    pub kind: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub requested_at: DateTime<Utc>,
    pub stakes_tier: StakesTier,
}

impl ProposedAction {
    /// Start building an action of the given kind.
    pub fn builder(kind: impl Into<String>) -> ProposedActionBuilder {
        ProposedActionBuilder {
            action_id: None,
            kind: kind.into(),
            parameters: BTreeMap::new(),
            stakes_tier: StakesTier::Low,
        }
    }

    /// Fetch a parameter as a float, if present and numeric.
    pub fn numeric_parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).and_then(|v| v.as_f64())
    }

    /// Fetch a parameter as a string, if present.
    pub fn string_parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|v| v.as_str())
    }
}

/// Builder for [`ProposedAction`].
pub struct ProposedActionBuilder {
    action_id: Option<ActionId>,
    kind: String,
    parameters: BTreeMap<String, serde_json::Value>,
    stakes_tier: StakesTier,
}

impl ProposedActionBuilder {
    /// Pin the action id (for idempotent retries). Defaults to a fresh v4 UUID.
    pub fn action_id(mut self, id: ActionId) -> Self {
        self.action_id = Some(id);
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn stakes(mut self, tier: StakesTier) -> Self {
        self.stakes_tier = tier;
        self
    }

    pub fn build(self) -> ProposedAction {
        ProposedAction {
            action_id: self.action_id.unwrap_or_else(ActionId::generate),
            kind: self.kind,
            parameters: self.parameters,
            requested_at: Utc::now(),
            stakes_tier: self.stakes_tier,
        }
    }
}

/// Three-valued decision produced by an evaluation stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    Deny,
    Escalate,
}

impl Decision {
    pub fn allows_execution(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Which evaluation stage produced a verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictSource {
    Safety,
    Policy,
    Consensus,
}

impl std::fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictSource::Safety => write!(f, "safety"),
            VerdictSource::Policy => write!(f, "policy"),
            VerdictSource::Consensus => write!(f, "consensus"),
        }
    }
}

/// One evaluation stage's verdict on one action. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub action_id: ActionId,
    pub source: VerdictSource,
    pub decision: Decision,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl PolicyVerdict {
    pub fn new(
        action_id: ActionId,
        source: VerdictSource,
        decision: Decision,
        reason: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            action_id,
            source,
            decision,
            reason: reason.into(),
            evaluated_at: Utc::now(),
            latency_ms,
        }
    }

    pub fn allow(
        action_id: ActionId,
        source: VerdictSource,
        reason: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self::new(action_id, source, Decision::Allow, reason, latency_ms)
    }

    pub fn deny(
        action_id: ActionId,
        source: VerdictSource,
        reason: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self::new(action_id, source, Decision::Deny, reason, latency_ms)
    }

    pub fn escalate(
        action_id: ActionId,
        source: VerdictSource,
        reason: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self::new(action_id, source, Decision::Escalate, reason, latency_ms)
    }
}

/// A single reviewer's vote during consensus escalation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Approve,
    Reject,
}

/// One reviewer's ballot for one escalated action.
///
/// Reviewers that time out are recorded with an implicit `Reject` ballot so
/// the audit trail shows who failed to answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusBallot {
    pub action_id: ActionId,
    pub reviewer_id: String,
    pub vote: Vote,
    pub rationale: String,
}

/// Terminal outcome of an adjudicated action.
///
/// `ExecutionFailed` is distinct from `Aborted`: a governance denial needs a
/// revised proposal, a post-commit execution error needs a retry with backoff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Committed,
    Aborted { reason: String },
    TimedOut,
    ExecutionFailed { detail: String },
}

impl ActionOutcome {
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, ActionOutcome::Committed)
    }
}

impl std::fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionOutcome::Committed => write!(f, "committed"),
            ActionOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
            ActionOutcome::TimedOut => write!(f, "timed out"),
            ActionOutcome::ExecutionFailed { detail } => write!(f, "execution failed: {detail}"),
        }
    }
}

/// The full decision trail for one adjudicated action.
///
/// Created when an action enters the coordinator, finalized exactly once,
/// never mutated after finalization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionLedgerEntry {
    pub action_id: ActionId,
    pub proposed: ProposedAction,
    pub verdicts: Vec<PolicyVerdict>,
    pub ballots: Vec<ConsensusBallot>,
    pub outcome: ActionOutcome,
    pub total_latency_ms: u64,
    pub finalized_at: DateTime<Utc>,
}

impl ActionLedgerEntry {
    /// Verify the committed-entry invariant: a `Committed` outcome requires an
    /// `Allow` verdict from both the safety and policy stages, and a passed
    /// consensus aggregate for high-stakes actions.
    ///
    /// A violation here is a defect in the coordinator, not a runtime state.
    pub fn check_committed_invariants(&self) -> Result<(), String> {
        if self.outcome != ActionOutcome::Committed {
            return Ok(());
        }
        for source in [VerdictSource::Safety, VerdictSource::Policy] {
            let allowed = self
                .verdicts
                .iter()
                .any(|v| v.source == source && v.decision == Decision::Allow);
            if !allowed {
                return Err(format!("committed without {source} allow verdict"));
            }
        }
        if self.proposed.stakes_tier == StakesTier::High {
            let consensus_allowed = self
                .verdicts
                .iter()
                .any(|v| v.source == VerdictSource::Consensus && v.decision == Decision::Allow);
            if !consensus_allowed {
                return Err("high-stakes commit without consensus approval".into());
            }
        }
        Ok(())
    }
}
