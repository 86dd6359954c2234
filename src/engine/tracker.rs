use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::engine::types::SimulationResult;
use crate::error::AppError;

/// External experiment tracking. Observability only, never load-bearing:
/// the orchestrator logs and swallows every error from this interface.
#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Open a tracking session for one experiment; returns the session URL
    /// recorded on the experiment for operators to follow.
    async fn start_session(&self, experiment_name: &str) -> Result<String, AppError>;

    /// Record one completed simulation in the current session.
    async fn log_result(&self, session_url: &str, result: &SimulationResult)
        -> Result<(), AppError>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

#[derive(Debug, Deserialize)]
struct SessionResponse {
    url: String,
}

/// Tracker client POSTing sessions and results to a REST endpoint.
pub struct HttpExperimentTracker {
    base_url: String,
    client: reqwest::Client,
}

impl HttpExperimentTracker {
    pub fn new(base_url: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Tracking(e.to_string()))?;
        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl ExperimentTracker for HttpExperimentTracker {
    async fn start_session(&self, experiment_name: &str) -> Result<String, AppError> {
        let url = format!("{}/sessions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": experiment_name }))
            .send()
            .await
            .map_err(|e| AppError::Tracking(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Tracking(format!(
                "tracker returned {} opening session",
                response.status()
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Tracking(e.to_string()))?;
        Ok(session.url)
    }

    async fn log_result(
        &self,
        session_url: &str,
        result: &SimulationResult,
    ) -> Result<(), AppError> {
        let url = format!("{}/results", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "session": session_url, "result": result }))
            .send()
            .await
            .map_err(|e| AppError::Tracking(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Tracking(format!(
                "tracker returned {} logging result {}",
                response.status(),
                result.id
            )));
        }
        Ok(())
    }
}
