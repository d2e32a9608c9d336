use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};
use warden_types::{ConsensusBallot, ProposedAction, Vote};

use crate::error::ConsensusError;
use crate::reviewer::Reviewer;
use crate::INSUFFICIENT_QUORUM;

/// Aggregate verdict from one escalation round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusVerdict {
    Approve,
    Reject,
}

/// Result of resolving one escalated action.
#[derive(Clone, Debug)]
pub struct ConsensusOutcome {
    pub verdict: ConsensusVerdict,
    pub reason: String,
    pub ballots: Vec<ConsensusBallot>,
}

/// Consensus Escalation Engine.
///
/// Dispatches the action to every reviewer concurrently, each bounded by an
/// individual timeout, the whole round bounded by an escalation timeout.
pub struct ConsensusEngine {
    reviewer_timeout: Duration,
    escalation_timeout: Duration,
}

impl ConsensusEngine {
    pub fn new(reviewer_timeout: Duration, escalation_timeout: Duration) -> Self {
        Self {
            reviewer_timeout,
            escalation_timeout,
        }
    }

    /// Resolve an escalated action against a reviewer roster.
    ///
    /// Decision rule:
    /// - at least `quorum` explicit ballots must be collected, otherwise the
    ///   verdict is REJECT with reason "insufficient quorum";
    /// - APPROVE requires strictly more than half of all *expected* ballots
    ///   (the full roster), so timeouts bias toward rejection;
    /// - reviewers that time out or fail are recorded with implicit REJECT
    ///   ballots for audit, but do not count toward quorum.
    pub async fn resolve(
        &self,
        action: &ProposedAction,
        reviewers: &[Arc<dyn Reviewer>],
        quorum: usize,
    ) -> Result<ConsensusOutcome, ConsensusError> {
        if reviewers.is_empty() {
            return Err(ConsensusError::EmptyRoster);
        }

        let expected = reviewers.len();
        let mut tasks = JoinSet::new();
        for reviewer in reviewers {
            let reviewer = Arc::clone(reviewer);
            let reviewer_id = reviewer.id().to_string();
            let action = action.clone();
            let timeout = self.reviewer_timeout;
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, reviewer.review(&action)).await;
                (reviewer_id, result)
            });
        }

        let mut ballots: Vec<ConsensusBallot> = Vec::with_capacity(expected);
        let mut responded: HashSet<String> = HashSet::new();
        let mut collected = 0usize;

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                let (reviewer_id, result) = match joined {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(error = %err, "reviewer task panicked");
                        continue;
                    }
                };
                responded.insert(reviewer_id.clone());
                match result {
                    Ok(Ok(opinion)) => {
                        collected += 1;
                        debug!(reviewer = %reviewer_id, vote = ?opinion.vote, "ballot collected");
                        ballots.push(ConsensusBallot {
                            action_id: action.action_id,
                            reviewer_id,
                            vote: opinion.vote,
                            rationale: opinion.rationale,
                        });
                    }
                    Ok(Err(err)) => {
                        warn!(reviewer = %reviewer_id, error = %err, "reviewer failed, implicit reject");
                        ballots.push(ConsensusBallot {
                            action_id: action.action_id,
                            reviewer_id,
                            vote: Vote::Reject,
                            rationale: format!("reviewer error: {err}"),
                        });
                    }
                    Err(_) => {
                        warn!(reviewer = %reviewer_id, "reviewer timed out, implicit reject");
                        ballots.push(ConsensusBallot {
                            action_id: action.action_id,
                            reviewer_id,
                            vote: Vote::Reject,
                            rationale: "review timed out".into(),
                        });
                    }
                }
            }
        };

        if tokio::time::timeout(self.escalation_timeout, drain).await.is_err() {
            tasks.abort_all();
            for reviewer in reviewers {
                if !responded.contains(reviewer.id()) {
                    ballots.push(ConsensusBallot {
                        action_id: action.action_id,
                        reviewer_id: reviewer.id().to_string(),
                        vote: Vote::Reject,
                        rationale: "escalation round timed out".into(),
                    });
                }
            }
        }

        if collected < quorum {
            return Ok(ConsensusOutcome {
                verdict: ConsensusVerdict::Reject,
                reason: INSUFFICIENT_QUORUM.into(),
                ballots,
            });
        }

        let approvals = ballots
            .iter()
            .filter(|b| b.vote == Vote::Approve)
            .count();
        // Strict majority of the full roster, not of collected ballots.
        let verdict = if approvals * 2 > expected {
            ConsensusVerdict::Approve
        } else {
            ConsensusVerdict::Reject
        };
        let reason = format!("{approvals} of {expected} expected ballots approved");
        debug!(action_id = %action.action_id, ?verdict, %reason, "consensus resolved");

        Ok(ConsensusOutcome {
            verdict,
            reason,
            ballots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReviewError;
    use crate::reviewer::ReviewOpinion;
    use async_trait::async_trait;
    use warden_types::StakesTier;

    struct FixedReviewer {
        id: String,
        vote: Vote,
    }

    #[async_trait]
    impl Reviewer for FixedReviewer {
        fn id(&self) -> &str {
            &self.id
        }
        async fn review(&self, _action: &ProposedAction) -> Result<ReviewOpinion, ReviewError> {
            Ok(match self.vote {
                Vote::Approve => ReviewOpinion::approve("looks fine"),
                Vote::Reject => ReviewOpinion::reject("too risky"),
            })
        }
    }

    struct SilentReviewer {
        id: String,
    }

    #[async_trait]
    impl Reviewer for SilentReviewer {
        fn id(&self) -> &str {
            &self.id
        }
        async fn review(&self, _action: &ProposedAction) -> Result<ReviewOpinion, ReviewError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("silent reviewer never answers");
        }
    }

    fn approver(id: &str) -> Arc<dyn Reviewer> {
        Arc::new(FixedReviewer {
            id: id.into(),
            vote: Vote::Approve,
        })
    }

    fn rejecter(id: &str) -> Arc<dyn Reviewer> {
        Arc::new(FixedReviewer {
            id: id.into(),
            vote: Vote::Reject,
        })
    }

    fn silent(id: &str) -> Arc<dyn Reviewer> {
        Arc::new(SilentReviewer { id: id.into() })
    }

    fn action() -> ProposedAction {
        ProposedAction::builder("transfer")
            .stakes(StakesTier::High)
            .build()
    }

    fn engine() -> ConsensusEngine {
        ConsensusEngine::new(Duration::from_millis(100), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn clear_majority_approves() {
        let roster = vec![approver("a"), approver("b"), approver("c"), rejecter("d")];
        let outcome = engine().resolve(&action(), &roster, 2).await.unwrap();
        assert_eq!(outcome.verdict, ConsensusVerdict::Approve);
        assert_eq!(outcome.ballots.len(), 4);
    }

    #[tokio::test]
    async fn tie_resolves_to_reject() {
        let roster = vec![approver("a"), approver("b"), rejecter("c"), rejecter("d")];
        let outcome = engine().resolve(&action(), &roster, 2).await.unwrap();
        assert_eq!(outcome.verdict, ConsensusVerdict::Reject);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_against_approval() {
        // 2 approvals out of 4 expected: not a strict majority.
        let roster = vec![approver("a"), approver("b"), silent("c"), silent("d")];
        let outcome = engine().resolve(&action(), &roster, 2).await.unwrap();
        assert_eq!(outcome.verdict, ConsensusVerdict::Reject);

        let implicit: Vec<_> = outcome
            .ballots
            .iter()
            .filter(|b| b.rationale.contains("timed out"))
            .collect();
        assert_eq!(implicit.len(), 2);
        assert!(implicit.iter().all(|b| b.vote == Vote::Reject));
    }

    #[tokio::test(start_paused = true)]
    async fn too_few_ballots_is_insufficient_quorum() {
        let roster = vec![approver("a"), silent("b"), silent("c")];
        let outcome = engine().resolve(&action(), &roster, 2).await.unwrap();
        assert_eq!(outcome.verdict, ConsensusVerdict::Reject);
        assert_eq!(outcome.reason, INSUFFICIENT_QUORUM);
    }

    #[tokio::test]
    async fn failing_reviewer_is_implicit_reject() {
        struct BrokenReviewer;

        #[async_trait]
        impl Reviewer for BrokenReviewer {
            fn id(&self) -> &str {
                "broken"
            }
            async fn review(
                &self,
                _action: &ProposedAction,
            ) -> Result<ReviewOpinion, ReviewError> {
                Err(ReviewError::Failed("model endpoint 500".into()))
            }
        }

        let roster: Vec<Arc<dyn Reviewer>> =
            vec![approver("a"), approver("b"), Arc::new(BrokenReviewer)];
        let outcome = engine().resolve(&action(), &roster, 2).await.unwrap();
        // 2 of 3 expected approved: strict majority holds despite the failure.
        assert_eq!(outcome.verdict, ConsensusVerdict::Approve);
        assert!(outcome
            .ballots
            .iter()
            .any(|b| b.reviewer_id == "broken" && b.vote == Vote::Reject));
    }

    #[tokio::test]
    async fn empty_roster_is_an_error() {
        let err = engine().resolve(&action(), &[], 1).await.unwrap_err();
        assert!(matches!(err, ConsensusError::EmptyRoster));
    }
}
