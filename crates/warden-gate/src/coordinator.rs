use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use warden_consensus::{Reviewer, INSUFFICIENT_QUORUM};
use warden_ledger::{ActionLedger, BeginOutcome, LedgerSink, LedgerWriter};
use warden_policy::{GuardedPdpClient, PdpClient, CIRCUIT_OPEN};
use warden_safety::{SafetyFilter, StateStore};
use warden_types::{
    ActionId, ActionLedgerEntry, ActionOutcome, ConsensusBallot, Decision, GovernanceError,
    PolicyVerdict, ProposedAction, VerdictSource,
};

use crate::config::GatewayConfig;
use crate::effector::{EffectReceipt, Effector};
use crate::error::GateError;
use crate::evaluator::{EvaluationReport, Evaluator};
use crate::interrupt::{DecidedSignal, InterruptSignal};

/// What the caller gets back for one adjudicated action.
#[derive(Clone, Debug)]
pub struct ActionResult {
    pub action_id: ActionId,
    pub outcome: ActionOutcome,
    pub verdicts: Vec<PolicyVerdict>,
    pub ballots: Vec<ConsensusBallot>,
    pub total_latency_ms: u64,
}

impl ActionResult {
    /// View this result as `Ok(())` or the matching [`GovernanceError`],
    /// for callers that prefer error-style handling over outcome matching.
    pub fn governance_result(&self) -> Result<(), GovernanceError> {
        let denied_by = self
            .verdicts
            .iter()
            .find(|v| v.decision == Decision::Deny)
            .map(|v| v.source);
        match &self.outcome {
            ActionOutcome::Committed => Ok(()),
            ActionOutcome::TimedOut => Err(GovernanceError::RaceTimeout(self.action_id)),
            ActionOutcome::ExecutionFailed { detail } => Err(GovernanceError::ExecutionFailed {
                action_id: self.action_id,
                detail: detail.clone(),
            }),
            ActionOutcome::Aborted { reason } => Err(match denied_by {
                Some(VerdictSource::Safety) if reason == "contention" => {
                    GovernanceError::ContentionExceeded(reason.clone())
                }
                Some(VerdictSource::Safety) => GovernanceError::SafetyViolation(reason.clone()),
                Some(VerdictSource::Policy)
                    if reason == CIRCUIT_OPEN || reason.contains("policy unavailable") =>
                {
                    GovernanceError::PolicyUnavailable(reason.clone())
                }
                Some(VerdictSource::Policy) => GovernanceError::PolicyDenied(reason.clone()),
                Some(VerdictSource::Consensus) if reason == INSUFFICIENT_QUORUM => {
                    GovernanceError::ConsensusQuorumFailure(reason.clone())
                }
                Some(VerdictSource::Consensus) => {
                    GovernanceError::ConsensusRejected(reason.clone())
                }
                None => GovernanceError::PolicyDenied(reason.clone()),
            }),
        }
    }
}

impl From<ActionLedgerEntry> for ActionResult {
    fn from(entry: ActionLedgerEntry) -> Self {
        Self {
            action_id: entry.action_id,
            outcome: entry.outcome,
            verdicts: entry.verdicts,
            ballots: entry.ballots,
            total_latency_ms: entry.total_latency_ms,
        }
    }
}

enum ExecutorOutcome {
    Committed(EffectReceipt),
    Interrupted(String),
    PrepareFailed(String),
    CommitFailed(String),
}

/// Optimistic Execution Coordinator.
///
/// For each action, forks an evaluator task (safety, policy, consensus in
/// order) and an executor task (`prepare` overlapping evaluation, `commit`
/// gated on the published interrupt signal), races them under a hard
/// wall-clock budget, and finalizes exactly one ledger entry.
pub struct Coordinator {
    evaluator: Arc<Evaluator>,
    effector: Arc<dyn Effector>,
    ledger: Arc<ActionLedger>,
    writer: LedgerWriter,
    race_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn StateStore>,
        pdp: Box<dyn PdpClient>,
        reviewers: Vec<Arc<dyn Reviewer>>,
        effector: Arc<dyn Effector>,
        sink: Arc<dyn LedgerSink>,
    ) -> Self {
        let safety =
            SafetyFilter::new(store).with_max_cas_retries(config.safety.max_cas_retries);
        let policy = GuardedPdpClient::new(pdp, config.breaker.clone());
        let evaluator = Evaluator::new(
            safety,
            config.safety.clone(),
            policy,
            config.consensus.clone(),
            reviewers,
        );
        Self {
            evaluator: Arc::new(evaluator),
            effector,
            ledger: Arc::new(ActionLedger::new()),
            writer: LedgerWriter::spawn(sink, 256),
            race_timeout: config.race_timeout,
        }
    }

    pub fn ledger(&self) -> &ActionLedger {
        &self.ledger
    }

    /// Flush the write-behind queue and stop. Call once, at teardown.
    pub async fn shutdown(self) {
        self.writer.shutdown().await;
    }

    /// Adjudicate one proposed action to a terminal outcome.
    ///
    /// Idempotent on `action_id`: a retry of an already-finalized action
    /// returns the recorded outcome without re-running anything.
    pub async fn adjudicate(&self, action: ProposedAction) -> Result<ActionResult, GateError> {
        let started = Instant::now();
        let action_id = action.action_id;

        match self.ledger.begin(action_id) {
            BeginOutcome::AlreadyFinalized(entry) => {
                debug!(%action_id, outcome = %entry.outcome, "replaying recorded outcome");
                return Ok(ActionResult::from(*entry));
            }
            BeginOutcome::InFlight => return Err(GateError::AlreadyInFlight(action_id)),
            BeginOutcome::Opened => {}
        }

        let (interrupt, reader) = InterruptSignal::channel();
        let timed_out = Arc::new(AtomicBool::new(false));

        let eval_task = {
            let evaluator = Arc::clone(&self.evaluator);
            let interrupt = interrupt.clone();
            let action = action.clone();
            tokio::spawn(async move { evaluator.evaluate(&action, &interrupt).await })
        };

        let exec_task = {
            let effector = Arc::clone(&self.effector);
            let action = action.clone();
            let mut reader = reader;
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                // Preparation overlaps evaluation; only commit is gated.
                let prepared = match effector.prepare(&action).await {
                    Ok(prepared) => prepared,
                    Err(err) => return ExecutorOutcome::PrepareFailed(err.to_string()),
                };
                match reader.wait_decided().await {
                    DecidedSignal::Raised { reason } => ExecutorOutcome::Interrupted(reason),
                    DecidedSignal::Cleared => match effector.commit(prepared).await {
                        Ok(receipt) => {
                            if timed_out.load(Ordering::SeqCst) {
                                warn!(
                                    action_id = %receipt.action_id,
                                    reference = %receipt.reference,
                                    "commit landed after timeout finalization, reconcile externally"
                                );
                            }
                            ExecutorOutcome::Committed(receipt)
                        }
                        Err(err) => ExecutorOutcome::CommitFailed(err.to_string()),
                    },
                }
            })
        };

        let eval_abort = eval_task.abort_handle();
        let exec_abort = exec_task.abort_handle();
        let race = async move { (eval_task.await, exec_task.await) };

        let (report, exec_outcome) = match tokio::time::timeout(self.race_timeout, race).await {
            Ok((eval_joined, exec_joined)) => {
                let report = match eval_joined {
                    Ok(report) => report,
                    Err(err) => {
                        error!(%action_id, error = %err, "evaluator task failed");
                        EvaluationReport::default()
                    }
                };
                let exec = match exec_joined {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!(%action_id, error = %err, "executor task failed");
                        ExecutorOutcome::Interrupted("executor task failed".into())
                    }
                };
                (report, Some(exec))
            }
            Err(_) => {
                warn!(
                    %action_id,
                    budget_ms = self.race_timeout.as_millis() as u64,
                    "adjudication exceeded its budget, raising interrupt"
                );
                timed_out.store(true, Ordering::SeqCst);
                interrupt.raise("adjudication timed out");
                eval_abort.abort();
                exec_abort.abort();
                (EvaluationReport::default(), None)
            }
        };

        let outcome = match exec_outcome {
            None => ActionOutcome::TimedOut,
            Some(ExecutorOutcome::Committed(receipt)) => {
                info!(%action_id, reference = %receipt.reference, "effect committed");
                ActionOutcome::Committed
            }
            Some(ExecutorOutcome::Interrupted(reason)) => ActionOutcome::Aborted { reason },
            Some(ExecutorOutcome::PrepareFailed(detail)) => {
                ActionOutcome::Aborted { reason: detail }
            }
            Some(ExecutorOutcome::CommitFailed(detail)) => {
                ActionOutcome::ExecutionFailed { detail }
            }
        };

        let entry = ActionLedgerEntry {
            action_id,
            proposed: action,
            verdicts: report.verdicts,
            ballots: report.ballots,
            outcome,
            total_latency_ms: started.elapsed().as_millis() as u64,
            finalized_at: Utc::now(),
        };
        if let Err(violation) = entry.check_committed_invariants() {
            error!(%action_id, %violation, "finalized entry violates commit invariants");
        }
        self.ledger.finalize(entry.clone())?;
        if let Err(err) = self.writer.submit(entry.clone()) {
            // The in-process ledger already holds the authoritative entry.
            warn!(%action_id, error = %err, "write-behind enqueue failed");
        }
        debug!(%action_id, outcome = %entry.outcome, latency_ms = entry.total_latency_ms, "adjudication finalized");
        Ok(ActionResult::from(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(
        outcome: ActionOutcome,
        verdicts: Vec<PolicyVerdict>,
    ) -> ActionResult {
        ActionResult {
            action_id: ActionId::generate(),
            outcome,
            verdicts,
            ballots: vec![],
            total_latency_ms: 1,
        }
    }

    #[test]
    fn committed_maps_to_ok() {
        let id = ActionId::generate();
        let r = result(
            ActionOutcome::Committed,
            vec![
                PolicyVerdict::allow(id, VerdictSource::Safety, "ok", 1),
                PolicyVerdict::allow(id, VerdictSource::Policy, "ok", 1),
            ],
        );
        assert!(r.governance_result().is_ok());
    }

    #[test]
    fn safety_abort_maps_to_safety_violation() {
        let id = ActionId::generate();
        let r = result(
            ActionOutcome::Aborted {
                reason: "barrier condition violated for cash".into(),
            },
            vec![PolicyVerdict::deny(
                id,
                VerdictSource::Safety,
                "barrier condition violated for cash",
                1,
            )],
        );
        assert!(matches!(
            r.governance_result().unwrap_err(),
            GovernanceError::SafetyViolation(_)
        ));
    }

    #[test]
    fn open_circuit_maps_to_policy_unavailable() {
        let id = ActionId::generate();
        let r = result(
            ActionOutcome::Aborted {
                reason: CIRCUIT_OPEN.into(),
            },
            vec![PolicyVerdict::deny(id, VerdictSource::Policy, CIRCUIT_OPEN, 1)],
        );
        assert!(matches!(
            r.governance_result().unwrap_err(),
            GovernanceError::PolicyUnavailable(_)
        ));
    }

    #[test]
    fn quorum_failure_maps_to_its_own_variant() {
        let id = ActionId::generate();
        let r = result(
            ActionOutcome::Aborted {
                reason: INSUFFICIENT_QUORUM.into(),
            },
            vec![PolicyVerdict::deny(
                id,
                VerdictSource::Consensus,
                INSUFFICIENT_QUORUM,
                1,
            )],
        );
        assert!(matches!(
            r.governance_result().unwrap_err(),
            GovernanceError::ConsensusQuorumFailure(_)
        ));
    }

    #[test]
    fn timeout_and_execution_failure_map_directly() {
        let r = result(ActionOutcome::TimedOut, vec![]);
        assert!(matches!(
            r.governance_result().unwrap_err(),
            GovernanceError::RaceTimeout(_)
        ));

        let r = result(
            ActionOutcome::ExecutionFailed {
                detail: "wire transfer bounced".into(),
            },
            vec![],
        );
        assert!(matches!(
            r.governance_result().unwrap_err(),
            GovernanceError::ExecutionFailed { .. }
        ));
    }
}
