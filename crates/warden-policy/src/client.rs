use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_types::{ActionId, Decision, ProposedAction, StakesTier};

use crate::error::PolicyError;

/// Structured query sent to the Policy Decision Point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdpRequest {
    pub action_kind: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub requester_context: RequesterContext,
}

/// Who is asking, and with how much at stake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequesterContext {
    pub action_id: ActionId,
    pub stakes_tier: StakesTier,
}

/// Structured response from the Policy Decision Point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdpResponse {
    pub decision: Decision,
    pub reason: String,
    pub policy_id: String,
}

impl PdpRequest {
    pub fn for_action(action: &ProposedAction) -> Self {
        Self {
            action_kind: action.kind.clone(),
            parameters: action.parameters.clone(),
            requester_context: RequesterContext {
                action_id: action.action_id,
                stakes_tier: action.stakes_tier,
            },
        }
    }
}

/// A rule-evaluation transport. Anything that answers a [`PdpRequest`] with
/// a three-valued verdict satisfies the contract.
#[async_trait]
pub trait PdpClient: Send + Sync {
    async fn evaluate(&self, action: &ProposedAction) -> Result<PdpResponse, PolicyError>;
}

#[async_trait]
impl PdpClient for Box<dyn PdpClient> {
    async fn evaluate(&self, action: &ProposedAction) -> Result<PdpResponse, PolicyError> {
        (**self).evaluate(action).await
    }
}

/// HTTP transport to an external PDP endpoint.
pub struct HttpPdpClient {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
}

impl HttpPdpClient {
    /// Build a client for the given endpoint with a per-call timeout.
    ///
    /// The per-call timeout is applied to each request independently of the
    /// transport's own defaults.
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            request_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PdpClient for HttpPdpClient {
    async fn evaluate(&self, action: &ProposedAction) -> Result<PdpResponse, PolicyError> {
        let request = PdpRequest::for_action(action);
        debug!(action_id = %action.action_id, kind = %action.kind, "querying pdp");

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PolicyError::Timeout(self.request_timeout.as_millis() as u64)
                } else {
                    PolicyError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PolicyError::UpstreamStatus(status.as_u16()));
        }

        response
            .json::<PdpResponse>()
            .await
            .map_err(|e| PolicyError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn action() -> ProposedAction {
        ProposedAction::builder("transfer")
            .parameter("amount", -25.0)
            .stakes(StakesTier::Medium)
            .build()
    }

    async fn pdp_server(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/decide"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    fn client_for(server: &MockServer) -> HttpPdpClient {
        HttpPdpClient::new(
            format!("{}/v1/decide", server.uri()),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn maps_allow_response() {
        let server = pdp_server(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "decision": "Allow",
            "reason": "within daily limit",
            "policy_id": "spend-limits-v3",
        })))
        .await;

        let response = client_for(&server).evaluate(&action()).await.unwrap();
        assert_eq!(response.decision, Decision::Allow);
        assert_eq!(response.policy_id, "spend-limits-v3");
    }

    #[tokio::test]
    async fn maps_escalate_response() {
        let server = pdp_server(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "decision": "Escalate",
            "reason": "novel counterparty",
            "policy_id": "counterparty-v1",
        })))
        .await;

        let response = client_for(&server).evaluate(&action()).await.unwrap();
        assert_eq!(response.decision, Decision::Escalate);
    }

    #[tokio::test]
    async fn upstream_5xx_is_an_error() {
        let server = pdp_server(ResponseTemplate::new(503)).await;
        let err = client_for(&server).evaluate(&action()).await.unwrap_err();
        assert!(matches!(err, PolicyError::UpstreamStatus(503)));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let server =
            pdp_server(ResponseTemplate::new(200).set_body_string("not json at all")).await;
        let err = client_for(&server).evaluate(&action()).await.unwrap_err();
        assert!(matches!(err, PolicyError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = pdp_server(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(serde_json::json!({
                    "decision": "Allow",
                    "reason": "too late",
                    "policy_id": "p",
                })),
        )
        .await;

        let err = client_for(&server).evaluate(&action()).await.unwrap_err();
        assert!(matches!(err, PolicyError::Timeout(_)));
    }
}
