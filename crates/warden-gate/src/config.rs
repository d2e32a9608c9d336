use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_policy::BreakerConfig;
use warden_types::StakesTier;

/// Top-level gateway configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Hard wall-clock budget for one adjudication, evaluation and
    /// execution included.
    #[serde(default = "default_race_timeout")]
    pub race_timeout: Duration,

    #[serde(default)]
    pub pdp: PdpConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub safety: SafetyRoutingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            race_timeout: default_race_timeout(),
            pdp: PdpConfig::default(),
            breaker: BreakerConfig::default(),
            consensus: ConsensusConfig::default(),
            safety: SafetyRoutingConfig::default(),
        }
    }
}

fn default_race_timeout() -> Duration {
    Duration::from_secs(3)
}

/// Where the external Policy Decision Point lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdpConfig {
    pub endpoint: String,

    /// Per-call timeout, applied on each request.
    #[serde(default = "default_pdp_timeout")]
    pub request_timeout: Duration,
}

impl Default for PdpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8181/v1/decide".into(),
            request_timeout: default_pdp_timeout(),
        }
    }
}

fn default_pdp_timeout() -> Duration {
    Duration::from_secs(1)
}

/// Escalation round parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum explicit ballots for a round to count at all.
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    #[serde(default = "default_reviewer_timeout")]
    pub reviewer_timeout: Duration,

    #[serde(default = "default_escalation_timeout")]
    pub escalation_timeout: Duration,

    /// Stakes tiers routed through consensus regardless of the policy
    /// verdict. ESCALATE verdicts always go to consensus.
    #[serde(default = "default_consensus_tiers")]
    pub consensus_tiers: Vec<StakesTier>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            reviewer_timeout: default_reviewer_timeout(),
            escalation_timeout: default_escalation_timeout(),
            consensus_tiers: default_consensus_tiers(),
        }
    }
}

fn default_quorum() -> usize {
    2
}

fn default_reviewer_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_escalation_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_consensus_tiers() -> Vec<StakesTier> {
    vec![StakesTier::High]
}

/// Which action kinds touch which tracked invariant, and how.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SafetyRoutingConfig {
    /// Map from action `kind` to its safety binding. Kinds absent from the
    /// map do not affect any tracked invariant and pass the safety stage.
    #[serde(default)]
    pub bindings: BTreeMap<String, SafetyBinding>,

    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,
}

fn default_max_cas_retries() -> u32 {
    3
}

/// How a bound action kind maps onto the safety state.
///
/// `state_key_parameter` names the action parameter holding the state key
/// (e.g. `"account"`), `delta_parameter` the one holding the signed numeric
/// delta (e.g. `"amount"`). A bound kind with either parameter missing or
/// malformed is denied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafetyBinding {
    pub state_key_parameter: String,
    pub delta_parameter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GatewayConfig::default();
        assert_eq!(config.race_timeout, Duration::from_secs(3));
        assert_eq!(config.consensus.quorum, 2);
        assert_eq!(config.consensus.consensus_tiers, vec![StakesTier::High]);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert!(config.safety.bindings.is_empty());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "pdp": { "endpoint": "http://pdp.internal/v1/decide" },
                "safety": {
                    "bindings": {
                        "transfer": {
                            "state_key_parameter": "account",
                            "delta_parameter": "amount"
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.pdp.endpoint, "http://pdp.internal/v1/decide");
        assert_eq!(config.race_timeout, Duration::from_secs(3));
        assert_eq!(
            config.safety.bindings["transfer"].delta_parameter,
            "amount"
        );
    }
}
