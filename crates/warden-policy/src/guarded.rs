use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};
use warden_types::{Decision, PolicyVerdict, ProposedAction, VerdictSource};

use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::client::{PdpClient, PdpResponse};
use crate::error::PolicyError;
use crate::CIRCUIT_OPEN;

/// A [`PdpClient`] wrapped in a circuit breaker with fail-closed verdicts.
///
/// While the circuit is open, no network call is attempted and the verdict is
/// an immediate DENY with reason `"circuit open"`. Transport failures deny
/// too; the deny/unavailable distinction survives only in the verdict reason.
pub struct GuardedPdpClient<C> {
    inner: C,
    breaker: CircuitBreaker,
}

impl<C: PdpClient> GuardedPdpClient<C> {
    pub fn new(inner: C, config: BreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Evaluate and fold the result into a [`PolicyVerdict`] (never errors;
    /// every failure is a DENY).
    pub async fn verdict_for(&self, action: &ProposedAction) -> PolicyVerdict {
        let started = Instant::now();
        let result = self.evaluate(action).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                debug!(
                    action_id = %action.action_id,
                    decision = ?response.decision,
                    policy_id = %response.policy_id,
                    "pdp verdict"
                );
                PolicyVerdict::new(
                    action.action_id,
                    VerdictSource::Policy,
                    response.decision,
                    format!("{} [{}]", response.reason, response.policy_id),
                    latency_ms,
                )
            }
            Err(PolicyError::CircuitOpen) => PolicyVerdict::new(
                action.action_id,
                VerdictSource::Policy,
                Decision::Deny,
                CIRCUIT_OPEN,
                latency_ms,
            ),
            Err(err) => {
                warn!(action_id = %action.action_id, error = %err, "pdp unavailable, denying");
                PolicyVerdict::new(
                    action.action_id,
                    VerdictSource::Policy,
                    Decision::Deny,
                    format!("policy unavailable: {err}"),
                    latency_ms,
                )
            }
        }
    }
}

#[async_trait]
impl<C: PdpClient> PdpClient for GuardedPdpClient<C> {
    async fn evaluate(&self, action: &ProposedAction) -> Result<PdpResponse, PolicyError> {
        if !self.breaker.allow_request() {
            return Err(PolicyError::CircuitOpen);
        }
        match self.inner.evaluate(action).await {
            Ok(response) => {
                self.breaker.record_success();
                Ok(response)
            }
            Err(err) => {
                if err.counts_as_breaker_failure() {
                    self.breaker.record_failure();
                }
                Err(err)
            }
        }
    }
}
