use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// The fully-resolved node prompts sent with one turn, overriding the
/// agent's stored defaults for the duration of that call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideConfig {
    /// node id → resolved system prompt.
    pub system_message_prompt: HashMap<String, String>,
}

impl OverrideConfig {
    pub fn is_empty(&self) -> bool {
        self.system_message_prompt.is_empty()
    }
}

/// One conversational turn submitted to the target agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub question: String,
    /// Absent on the first turn; afterwards the id returned by the first
    /// reply, so the agent sees one logical session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_config: Option<OverrideConfig>,
}

/// The target agent's reply for one turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    pub text: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub chat_message_id: Option<String>,
    /// Structured per-node reasoning steps, passed through opaquely.
    #[serde(default)]
    pub agent_reasoning: Option<serde_json::Value>,
}

/// Sends one conversational turn to the target agent.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn send(&self, request: AgentRequest) -> Result<AgentReply, AppError>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Gateway POSTing to the agent's prediction endpoint.
#[derive(Debug)]
pub struct HttpAgentGateway {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpAgentGateway {
    /// Validates the endpoint up front; a malformed agent URL is a
    /// configuration error surfaced before any simulation starts.
    pub fn new(endpoint: &str) -> Result<Self, AppError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            AppError::Configuration(format!("invalid agent URL '{endpoint}': {e}"))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AppError::Configuration(format!(
                "agent URL must be http(s), got '{}'",
                endpoint.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl AgentGateway for HttpAgentGateway {
    async fn send(&self, request: AgentRequest) -> Result<AgentReply, AppError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read body".into());
            return Err(AppError::Simulation(format!(
                "agent returned {status}: {body}"
            )));
        }

        Ok(response.json().await?)
    }
}
