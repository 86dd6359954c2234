use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use promptlab::config::AppConfig;
use promptlab::db;
use promptlab::db::experiments::SqliteExperimentStore;
use promptlab::engine::gateway::HttpAgentGateway;
use promptlab::engine::llm::OpenAiChatModel;
use promptlab::engine::synthesizer::PersonaSynthesizer;
use promptlab::engine::tracker::{ExperimentTracker, HttpExperimentTracker};
use promptlab::engine::types::{BehaviorTest, OverridableNode, StateValues};
use promptlab::engine::{ExperimentOrchestrator, ExperimentPolicy, SimulationPolicy};
use promptlab::error::AppError;
use promptlab::logging;

#[tokio::main]
async fn main() {
    // A .env file is honored when present; real env vars win.
    dotenvy::dotenv().ok();
    logging::init();

    tracing::info!("Starting promptlab v{}", env!("CARGO_PKG_VERSION"));

    let problem_description = match std::env::args().nth(1) {
        Some(arg) if !arg.trim().is_empty() => arg,
        _ => {
            eprintln!("Usage: promptlab \"<desired agent behavior>\"");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&problem_description).await {
        tracing::error!(kind = e.kind(), error = %e, "experiment failed");
        std::process::exit(1);
    }
}

async fn run(problem_description: &str) -> Result<(), AppError> {
    let config = AppConfig::from_env()?;

    let pool = db::init_db(&config.data_dir)?;
    let store = Arc::new(SqliteExperimentStore::new(pool));

    let llm = Arc::new(OpenAiChatModel::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    )?);
    let gateway = Arc::new(HttpAgentGateway::new(&config.agent_url)?);
    let tracker: Option<Arc<dyn ExperimentTracker>> = match &config.tracker_url {
        Some(url) => Some(Arc::new(HttpExperimentTracker::new(url.clone())?)),
        None => None,
    };

    let nodes = load_nodes(config.nodes_file.as_deref())?;
    let state_values = load_state_values(config.state_file.as_deref())?;

    let synthesizer = PersonaSynthesizer::new(llm.clone());
    let rubric = synthesizer.synthesize_rubric(problem_description).await?;
    tracing::info!(test = %rubric.test_name, "rubric generated");

    let test = BehaviorTest {
        id: uuid::Uuid::new_v4().to_string(),
        name: rubric.test_name,
        problem_description: problem_description.to_string(),
        scorer_prompt: rubric.scorer_prompt,
        persona_hint: rubric.persona_hint,
        simulation_count: config.simulation_count,
        created_at: Utc::now(),
    };

    let orchestrator = ExperimentOrchestrator::new(
        llm,
        gateway,
        store,
        tracker,
        SimulationPolicy {
            rounds: config.rounds,
            turn_delay: Duration::from_millis(config.turn_delay_ms),
        },
        ExperimentPolicy {
            pass_threshold: config.pass_threshold,
            max_concurrent: config.max_concurrent,
        },
    );

    let experiment = orchestrator
        .run(&config.agent_id, test, nodes, state_values)
        .await?;

    println!("{}", serde_json::to_string_pretty(&experiment)?);
    Ok(())
}

fn load_nodes(path: Option<&Path>) -> Result<Vec<OverridableNode>, AppError> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw).map_err(|e| {
                AppError::Configuration(format!("invalid nodes file {}: {e}", path.display()))
            })
        }
        None => Ok(Vec::new()),
    }
}

fn load_state_values(path: Option<&Path>) -> Result<StateValues, AppError> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw).map_err(|e| {
                AppError::Configuration(format!("invalid state file {}: {e}", path.display()))
            })
        }
        None => Ok(StateValues::new()),
    }
}
