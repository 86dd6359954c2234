use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key → value settings injected into prompt templates (brand rules, FAQs,
/// business hours). Keys are discovered from the agent's configuration,
/// never hardcoded here.
pub type StateValues = HashMap<String, String>;

// ============================================================================
// Personas
// ============================================================================

/// A synthetic user profile driving one simulated conversation.
/// Immutable once generated; owned by the experiment that generated it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub role: String,
    pub goal: String,
    pub context: String,
    pub tone: String,
}

// ============================================================================
// Behavior tests (scoring rubric + cohort sizing)
// ============================================================================

/// One behavior test: the rubric the judge applies plus how many personas
/// to run it against. `scorer_prompt` is free-text evaluation criteria,
/// editable by the operator before a run is approved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorTest {
    pub id: String,
    pub name: String,
    pub problem_description: String,
    pub scorer_prompt: String,
    pub persona_hint: String,
    pub simulation_count: usize,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Conversations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of a simulated conversation. Ordered, append-only within a
/// simulation. `trace_data` carries the agent's per-node reasoning steps,
/// passed through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_data: Option<serde_json::Value>,
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one persona's simulate-then-score pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub id: String,
    pub persona_id: String,
    pub persona: Persona,
    pub conversation: Vec<ConversationTurn>,
    /// Judge score in [0, 1].
    pub score: f64,
    /// Derived outside the judge from the configured pass threshold.
    pub passed: bool,
    pub rationale: String,
    pub scored_at: DateTime<Utc>,
}

/// Aggregate statistics over an experiment's surviving results.
/// Derived, recomputed whenever results change, never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage of passing simulations, 0–100, rounded.
    pub pass_rate: u32,
    /// Mean score across results, rounded to 2 decimals.
    pub avg_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

impl ExperimentSummary {
    pub fn from_results(results: &[SimulationResult], duration_ms: Option<u64>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let failed = total - passed;
        let pass_rate = if total == 0 {
            0
        } else {
            ((passed as f64 / total as f64) * 100.0).round() as u32
        };
        let avg_score = if total == 0 {
            0.0
        } else {
            let mean = results.iter().map(|r| r.score).sum::<f64>() / total as f64;
            (mean * 100.0).round() / 100.0
        };

        Self {
            total,
            passed,
            failed,
            pass_rate,
            avg_score,
            duration_ms,
            ai_summary: None,
            recommendations: Vec::new(),
        }
    }
}

// ============================================================================
// Experiments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Running,
    Completed,
    Failed,
}

impl ExperimentStatus {
    /// Stable string stored in the database status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Failed => "failed",
        }
    }
}

/// One run of a behavior test against a cohort of personas.
///
/// Created in `running` state with empty results immediately after persona
/// generation, so observers polling the store see the job in flight.
/// Transitions to `completed` exactly once, after summary and narrative
/// insights are computed. Never deleted implicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub test_id: String,
    /// Snapshot of the test at run time; later edits don't rewrite history.
    pub test: BehaviorTest,
    pub results: Vec<SimulationResult>,
    pub summary: ExperimentSummary,
    pub status: ExperimentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub braintrust_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Overridable nodes
// ============================================================================

/// One editable prompt slot in the target agent's configuration graph.
/// Identity is `id`, stable across agent versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverridableNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_message_prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(n: usize) -> Persona {
        Persona {
            id: format!("persona-{n}"),
            name: format!("P{n}"),
            role: "customer".into(),
            goal: "get help".into(),
            context: "returning user".into(),
            tone: "neutral".into(),
        }
    }

    fn result(n: usize, score: f64, passed: bool) -> SimulationResult {
        SimulationResult {
            id: format!("result-{n}"),
            persona_id: format!("persona-{n}"),
            persona: persona(n),
            conversation: Vec::new(),
            score,
            passed,
            rationale: String::new(),
            scored_at: Utc::now(),
        }
    }

    #[test]
    fn test_summary_arithmetic() {
        let results: Vec<_> = [(0.9, true), (0.3, false), (0.8, true)]
            .iter()
            .enumerate()
            .map(|(n, (s, p))| result(n, *s, *p))
            .collect();
        let summary = ExperimentSummary::from_results(&results, Some(1234));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed + summary.failed, summary.total);
        assert_eq!(summary.pass_rate, 67);
        assert_eq!(summary.duration_ms, Some(1234));
    }

    #[test]
    fn test_summary_empty_results() {
        let summary = ExperimentSummary::from_results(&[], None);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.pass_rate, 0);
        assert_eq!(summary.avg_score, 0.0);
    }

    #[test]
    fn test_summary_reference_scenario() {
        // Cohort of 5 with scores [0.9, 0.3, 0.8, 0.71, 0.5] at the 0.7
        // threshold: 3 pass, 2 fail, 60% pass rate, mean 0.642 → 0.64.
        let scores = [0.9, 0.3, 0.8, 0.71, 0.5];
        let results: Vec<_> = scores
            .iter()
            .enumerate()
            .map(|(n, s)| result(n, *s, *s >= 0.7))
            .collect();
        let summary = ExperimentSummary::from_results(&results, None);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.pass_rate, 60);
        assert_eq!(summary.avg_score, 0.64);
    }

    #[test]
    fn test_experiment_serializes_camel_case() {
        let experiment = Experiment {
            id: "exp-1".into(),
            test_id: "test-1".into(),
            test: BehaviorTest {
                id: "test-1".into(),
                name: "Refund policy".into(),
                problem_description: "Agent should honor the refund window".into(),
                scorer_prompt: "Did the agent cite the 30-day window?".into(),
                persona_hint: "Frustrated customers".into(),
                simulation_count: 5,
                created_at: Utc::now(),
            },
            results: Vec::new(),
            summary: ExperimentSummary::from_results(&[], None),
            status: ExperimentStatus::Running,
            braintrust_url: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let json = serde_json::to_value(&experiment).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json.get("testId").is_some());
        assert!(json["test"].get("scorerPrompt").is_some());
        assert!(json.get("braintrustUrl").is_none());
        assert_eq!(json["summary"]["passRate"], 0);
    }
}
