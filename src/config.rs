use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::error::AppError;

/// Hard cap on cohort size, mirroring the operator UI's limit.
pub const MAX_SIMULATIONS: usize = 50;

/// Runtime configuration, collected from `PROMPTLAB_*` environment
/// variables (a `.env` file is honored when present).
///
/// Policy knobs carry the engine defaults: 5 conversation rounds, 300 ms
/// between rounds, 0.7 pass threshold, 4 concurrent simulations.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Logical id of the target agent; scopes experiment records.
    pub agent_id: String,
    /// Prediction endpoint of the target agent.
    pub agent_url: String,
    /// Base URL of the OpenAI-compatible generative service.
    pub llm_api_url: String,
    /// Bearer token for the generative service; empty for local models.
    pub llm_api_key: String,
    pub llm_model: String,
    /// Base URL of the optional experiment tracker. None disables tracking.
    pub tracker_url: Option<String>,
    /// Directory holding the experiments database.
    pub data_dir: PathBuf,
    /// Personas per experiment.
    pub simulation_count: usize,
    /// Round-trips per simulated conversation.
    pub rounds: usize,
    /// Delay between round-trips, in milliseconds.
    pub turn_delay_ms: u64,
    /// Minimum score for a simulation to count as passed.
    pub pass_threshold: f64,
    /// Worker-pool bound on concurrent simulations.
    pub max_concurrent: usize,
    /// Optional JSON file with the agent's overridable nodes.
    pub nodes_file: Option<PathBuf>,
    /// Optional JSON file with the state values map.
    pub state_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let agent_url = require_env("PROMPTLAB_AGENT_URL")?;
        validate_http_url("PROMPTLAB_AGENT_URL", &agent_url)?;

        let llm_api_url = env_or("PROMPTLAB_LLM_API_URL", "https://api.openai.com/v1");
        validate_http_url("PROMPTLAB_LLM_API_URL", &llm_api_url)?;

        let tracker_url = optional_env("PROMPTLAB_TRACKER_URL");
        if let Some(url) = &tracker_url {
            validate_http_url("PROMPTLAB_TRACKER_URL", url)?;
        }

        let mut simulation_count: usize = parse_env("PROMPTLAB_SIMULATION_COUNT", 5)?;
        if simulation_count == 0 {
            return Err(AppError::Configuration(
                "PROMPTLAB_SIMULATION_COUNT must be at least 1".into(),
            ));
        }
        if simulation_count > MAX_SIMULATIONS {
            tracing::warn!(
                requested = simulation_count,
                cap = MAX_SIMULATIONS,
                "simulation count capped"
            );
            simulation_count = MAX_SIMULATIONS;
        }

        let pass_threshold: f64 = parse_env("PROMPTLAB_PASS_THRESHOLD", 0.7)?;
        if !(0.0..=1.0).contains(&pass_threshold) {
            return Err(AppError::Configuration(format!(
                "PROMPTLAB_PASS_THRESHOLD must be within [0, 1], got {pass_threshold}"
            )));
        }

        Ok(Self {
            agent_id: env_or("PROMPTLAB_AGENT_ID", "default"),
            agent_url,
            llm_api_url,
            llm_api_key: env_or("PROMPTLAB_LLM_API_KEY", ""),
            llm_model: env_or("PROMPTLAB_LLM_MODEL", "gpt-4o-mini"),
            tracker_url,
            data_dir: PathBuf::from(env_or("PROMPTLAB_DATA_DIR", ".promptlab")),
            simulation_count,
            rounds: parse_env("PROMPTLAB_ROUNDS", 5)?,
            turn_delay_ms: parse_env("PROMPTLAB_TURN_DELAY_MS", 300)?,
            pass_threshold,
            max_concurrent: parse_env("PROMPTLAB_MAX_CONCURRENT", 4)?,
            nodes_file: optional_env("PROMPTLAB_NODES_FILE").map(PathBuf::from),
            state_file: optional_env("PROMPTLAB_STATE_FILE").map(PathBuf::from),
        })
    }
}

fn require_env(key: &str) -> Result<String, AppError> {
    optional_env(key).ok_or_else(|| AppError::Configuration(format!("{key} is not set")))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| AppError::Configuration(format!("{key}: invalid value '{raw}': {e}"))),
        None => Ok(default),
    }
}

/// Malformed URLs are configuration errors, surfaced before any work starts.
fn validate_http_url(key: &str, value: &str) -> Result<(), AppError> {
    let parsed = Url::parse(value)
        .map_err(|e| AppError::Configuration(format!("{key}: invalid URL '{value}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::Configuration(format!(
            "{key}: URL must be http(s), got '{}'",
            parsed.scheme()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("X", "http://localhost:3000/api/v1/prediction/abc").is_ok());
        assert!(validate_http_url("X", "https://agent.example.com").is_ok());
        assert!(validate_http_url("X", "not a url").is_err());
        assert!(validate_http_url("X", "ftp://agent.example.com").is_err());
    }

    #[test]
    fn test_from_env_defaults_and_cap() {
        // Only this test touches PROMPTLAB_* variables.
        std::env::set_var("PROMPTLAB_AGENT_URL", "http://localhost:3000/prediction/x");
        std::env::set_var("PROMPTLAB_SIMULATION_COUNT", "120");
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.agent_id, "default");
        assert_eq!(config.simulation_count, MAX_SIMULATIONS);
        assert_eq!(config.rounds, 5);
        assert_eq!(config.turn_delay_ms, 300);
        assert!((config.pass_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.max_concurrent, 4);
        std::env::remove_var("PROMPTLAB_AGENT_URL");
        std::env::remove_var("PROMPTLAB_SIMULATION_COUNT");
    }

    #[test]
    fn test_missing_agent_url_is_configuration_error() {
        // Runs against an unset var name to stay independent of the test above.
        let err = require_env("PROMPTLAB_TEST_UNSET_VAR").unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }
}
