use crate::engine::types::Experiment;
use crate::error::AppError;

/// Durable record of experiments, keyed by id and scoped to an agent.
///
/// The orchestrator writes through this twice per run: once at creation
/// (`running`, empty results) and once at completion. Everything else on the
/// surface exists for observers and operator cleanup.
pub trait ExperimentStore: Send + Sync {
    fn save(&self, agent_id: &str, experiment: &Experiment) -> Result<(), AppError>;

    fn load(&self, agent_id: &str, id: &str) -> Result<Option<Experiment>, AppError>;

    /// All experiments for one agent, most recent first.
    fn list_all(&self, agent_id: &str) -> Result<Vec<Experiment>, AppError>;

    /// Returns whether a record was actually removed.
    fn delete(&self, agent_id: &str, id: &str) -> Result<bool, AppError>;

    fn clear_all(&self, agent_id: &str) -> Result<(), AppError>;
}
