use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use warden_consensus::{ConsensusEngine, ConsensusError, ConsensusVerdict, Reviewer};
use warden_policy::{GuardedPdpClient, PdpClient};
use warden_safety::{SafetyError, SafetyFilter};
use warden_types::{
    ConsensusBallot, Decision, PolicyVerdict, ProposedAction, VerdictSource,
};

use crate::config::{ConsensusConfig, SafetyRoutingConfig};
use crate::interrupt::InterruptSignal;

/// Everything one evaluation run produced.
#[derive(Clone, Debug, Default)]
pub struct EvaluationReport {
    pub verdicts: Vec<PolicyVerdict>,
    pub ballots: Vec<ConsensusBallot>,
    pub allowed: bool,
}

impl EvaluationReport {
    /// The reason of the first denying verdict, if any.
    pub fn deny_reason(&self) -> Option<&str> {
        self.verdicts
            .iter()
            .find(|v| v.decision == Decision::Deny)
            .map(|v| v.reason.as_str())
    }
}

/// Runs the fixed evaluation order: safety, policy, consensus.
///
/// Any deny raises the interrupt immediately and short-circuits the
/// remaining stages. A full pass clears the signal. This function never
/// errors: every failure of a stage folds into a DENY verdict, and the
/// deny/unavailable distinction survives only in verdict reasons.
pub struct Evaluator {
    safety: SafetyFilter,
    routing: SafetyRoutingConfig,
    policy: GuardedPdpClient<Box<dyn PdpClient>>,
    consensus: ConsensusEngine,
    consensus_config: ConsensusConfig,
    reviewers: Vec<Arc<dyn Reviewer>>,
}

impl Evaluator {
    pub fn new(
        safety: SafetyFilter,
        routing: SafetyRoutingConfig,
        policy: GuardedPdpClient<Box<dyn PdpClient>>,
        consensus_config: ConsensusConfig,
        reviewers: Vec<Arc<dyn Reviewer>>,
    ) -> Self {
        let consensus = ConsensusEngine::new(
            consensus_config.reviewer_timeout,
            consensus_config.escalation_timeout,
        );
        Self {
            safety,
            routing,
            policy,
            consensus,
            consensus_config,
            reviewers,
        }
    }

    pub async fn evaluate(
        &self,
        action: &ProposedAction,
        interrupt: &InterruptSignal,
    ) -> EvaluationReport {
        let mut report = EvaluationReport::default();

        let safety_verdict = self.safety_stage(action).await;
        let safety_denied = safety_verdict.decision == Decision::Deny;
        report.verdicts.push(safety_verdict);
        if safety_denied {
            self.raise(interrupt, &report);
            return report;
        }

        let policy_verdict = self.policy.verdict_for(action).await;
        let policy_decision = policy_verdict.decision;
        report.verdicts.push(policy_verdict);
        if policy_decision == Decision::Deny {
            self.raise(interrupt, &report);
            return report;
        }

        let needs_consensus = policy_decision == Decision::Escalate
            || self
                .consensus_config
                .consensus_tiers
                .contains(&action.stakes_tier);
        if needs_consensus {
            let consensus_verdict = self.consensus_stage(action, &mut report.ballots).await;
            let consensus_denied = consensus_verdict.decision == Decision::Deny;
            report.verdicts.push(consensus_verdict);
            if consensus_denied {
                self.raise(interrupt, &report);
                return report;
            }
        }

        report.allowed = true;
        interrupt.clear();
        debug!(action_id = %action.action_id, "evaluation passed, signal cleared");
        report
    }

    fn raise(&self, interrupt: &InterruptSignal, report: &EvaluationReport) {
        let reason = report.deny_reason().unwrap_or("denied").to_string();
        interrupt.raise(reason);
    }

    async fn safety_stage(&self, action: &ProposedAction) -> PolicyVerdict {
        let started = Instant::now();
        let id = action.action_id;

        let binding = match self.routing.bindings.get(&action.kind) {
            Some(binding) => binding,
            None => {
                return PolicyVerdict::allow(
                    id,
                    VerdictSource::Safety,
                    "no tracked invariant affected",
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let key = match action.string_parameter(&binding.state_key_parameter) {
            Some(key) => key.to_string(),
            None => {
                return PolicyVerdict::deny(
                    id,
                    VerdictSource::Safety,
                    format!("missing parameter: {}", binding.state_key_parameter),
                    started.elapsed().as_millis() as u64,
                );
            }
        };
        let delta = match action.numeric_parameter(&binding.delta_parameter) {
            Some(delta) => delta,
            None => {
                return PolicyVerdict::deny(
                    id,
                    VerdictSource::Safety,
                    format!("missing or non-numeric parameter: {}", binding.delta_parameter),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        match self.safety.check(&key, delta).await {
            Ok(decision) if decision.allowed => PolicyVerdict::allow(
                id,
                VerdictSource::Safety,
                decision.reason,
                started.elapsed().as_millis() as u64,
            ),
            Ok(decision) => PolicyVerdict::deny(
                id,
                VerdictSource::Safety,
                decision.reason,
                started.elapsed().as_millis() as u64,
            ),
            Err(SafetyError::ContentionExceeded { key, attempts }) => {
                warn!(%key, attempts, "safety check lost every retry, denying");
                PolicyVerdict::deny(
                    id,
                    VerdictSource::Safety,
                    "contention",
                    started.elapsed().as_millis() as u64,
                )
            }
            Err(err) => {
                warn!(error = %err, "safety stage failed, denying");
                PolicyVerdict::deny(
                    id,
                    VerdictSource::Safety,
                    format!("safety stage failed: {err}"),
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }

    async fn consensus_stage(
        &self,
        action: &ProposedAction,
        ballots: &mut Vec<ConsensusBallot>,
    ) -> PolicyVerdict {
        let started = Instant::now();
        let id = action.action_id;

        match self
            .consensus
            .resolve(action, &self.reviewers, self.consensus_config.quorum)
            .await
        {
            Ok(outcome) => {
                ballots.extend(outcome.ballots);
                match outcome.verdict {
                    ConsensusVerdict::Approve => PolicyVerdict::allow(
                        id,
                        VerdictSource::Consensus,
                        outcome.reason,
                        started.elapsed().as_millis() as u64,
                    ),
                    ConsensusVerdict::Reject => PolicyVerdict::deny(
                        id,
                        VerdictSource::Consensus,
                        outcome.reason,
                        started.elapsed().as_millis() as u64,
                    ),
                }
            }
            Err(ConsensusError::EmptyRoster) => {
                warn!(action_id = %id, "escalation required but no reviewers configured");
                PolicyVerdict::deny(
                    id,
                    VerdictSource::Consensus,
                    "no reviewer roster configured",
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }
}
