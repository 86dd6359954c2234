use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::engine::gateway::AgentGateway;
use crate::engine::judge::Judge;
use crate::engine::llm::{parse_json_response, ChatMessage, ChatModel};
use crate::engine::simulator::{ConversationSimulator, SimulationPolicy};
use crate::engine::store::ExperimentStore;
use crate::engine::synthesizer::PersonaSynthesizer;
use crate::engine::tracker::ExperimentTracker;
use crate::engine::types::{
    BehaviorTest, Experiment, ExperimentStatus, ExperimentSummary, OverridableNode, Persona,
    SimulationResult, StateValues,
};
use crate::error::AppError;

const INSIGHTS_SYSTEM_PROMPT: &str = "You are a conversation-quality analyst reviewing \
the results of a behavior experiment. Given the evaluation criteria and the scored \
conversations, summarize how the agent performed and recommend concrete prompt \
improvements. Respond with JSON: {\"summary\": string, \"recommendations\": [string]}";

/// Experiment-level policy knobs. The pass threshold and pool size are
/// operational constants with the engine's historical defaults.
#[derive(Debug, Clone)]
pub struct ExperimentPolicy {
    /// Minimum judge score for a simulation to count as passed.
    pub pass_threshold: f64,
    /// Worker-pool bound on concurrent simulation pipelines.
    pub max_concurrent: usize,
}

impl Default for ExperimentPolicy {
    fn default() -> Self {
        Self {
            pass_threshold: 0.7,
            max_concurrent: 4,
        }
    }
}

/// Where one persona's pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationStage {
    Conversation,
    Scoring,
}

impl SimulationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStage::Conversation => "conversation",
            SimulationStage::Scoring => "scoring",
        }
    }
}

/// Failure of one persona's simulate-then-score pipeline. Carries enough
/// identity for the exclusion log line to say which pipeline died and where.
#[derive(Debug)]
pub struct SimulationError {
    pub persona_id: String,
    pub persona_name: String,
    pub stage: SimulationStage,
    pub source: AppError,
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "simulation for {} ({}) failed during {}: {}",
            self.persona_name,
            self.persona_id,
            self.stage.as_str(),
            self.source
        )
    }
}

#[derive(Debug, Deserialize)]
struct NarrativeInsights {
    summary: String,
    #[serde(default)]
    recommendations: Vec<String>,
}

/// Runs one behavior test end to end: persona cohort, concurrent
/// simulations, judging, aggregation, persistence.
pub struct ExperimentOrchestrator {
    synthesizer: PersonaSynthesizer,
    simulator: Arc<ConversationSimulator>,
    judge: Arc<Judge>,
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn ExperimentStore>,
    tracker: Option<Arc<dyn ExperimentTracker>>,
    policy: ExperimentPolicy,
}

impl ExperimentOrchestrator {
    /// Builds the whole pipeline from the injected service handles; no
    /// component constructs its own client.
    pub fn new(
        llm: Arc<dyn ChatModel>,
        gateway: Arc<dyn AgentGateway>,
        store: Arc<dyn ExperimentStore>,
        tracker: Option<Arc<dyn ExperimentTracker>>,
        simulation_policy: SimulationPolicy,
        policy: ExperimentPolicy,
    ) -> Self {
        Self {
            synthesizer: PersonaSynthesizer::new(llm.clone()),
            simulator: Arc::new(ConversationSimulator::with_policy(
                llm.clone(),
                gateway,
                simulation_policy,
            )),
            judge: Arc::new(Judge::new(llm.clone())),
            llm,
            store,
            tracker,
            policy,
        }
    }

    /// Run the experiment to completion.
    ///
    /// Persona synthesis failure is fatal and leaves no record. Once the
    /// `running` checkpoint is persisted, per-persona failures are excluded
    /// and tracker/insight failures are swallowed; the experiment always
    /// reaches `completed`. Results land in the stored record only in the
    /// final write, so pollers never observe a partially-filled result set.
    pub async fn run(
        &self,
        agent_id: &str,
        test: BehaviorTest,
        nodes: Vec<OverridableNode>,
        state_values: StateValues,
    ) -> Result<Experiment, AppError> {
        let started = Instant::now();

        let braintrust_url = match &self.tracker {
            Some(tracker) => match tracker.start_session(&test.name).await {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(error = %e, "tracking session unavailable, running without it");
                    None
                }
            },
            None => None,
        };

        let personas = self
            .synthesizer
            .synthesize_personas(
                test.simulation_count,
                &test.problem_description,
                &test.persona_hint,
                None,
            )
            .await?;

        let mut experiment = Experiment {
            id: uuid::Uuid::new_v4().to_string(),
            test_id: test.id.clone(),
            test,
            results: Vec::new(),
            summary: ExperimentSummary::from_results(&[], None),
            status: ExperimentStatus::Running,
            braintrust_url,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.store.save(agent_id, &experiment)?;
        tracing::info!(
            experiment_id = %experiment.id,
            test = %experiment.test.name,
            personas = personas.len(),
            "experiment running"
        );

        let outcomes = self
            .fan_out(
                personas,
                experiment.test.scorer_prompt.clone(),
                experiment.braintrust_url.clone(),
                nodes,
                state_values,
            )
            .await;

        let mut survivors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => survivors.push(result),
                Err(e) => tracing::warn!(
                    experiment_id = %experiment.id,
                    persona_id = %e.persona_id,
                    persona = %e.persona_name,
                    stage = e.stage.as_str(),
                    error = %e.source,
                    "simulation excluded from results"
                ),
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut summary = ExperimentSummary::from_results(&survivors, Some(duration_ms));

        if survivors.is_empty() {
            tracing::warn!(
                experiment_id = %experiment.id,
                "every simulation failed; skipping narrative insights"
            );
        } else {
            match self.narrative_insights(&experiment.test, &survivors).await {
                Ok(insights) => {
                    summary.ai_summary = Some(insights.summary);
                    summary.recommendations = insights.recommendations;
                }
                Err(e) => {
                    tracing::warn!(experiment_id = %experiment.id, error = %e, "narrative insights unavailable")
                }
            }
        }

        experiment.results = survivors;
        experiment.summary = summary;
        experiment.status = ExperimentStatus::Completed;
        experiment.completed_at = Some(Utc::now());
        self.store.save(agent_id, &experiment)?;

        tracing::info!(
            experiment_id = %experiment.id,
            total = experiment.summary.total,
            passed = experiment.summary.passed,
            failed = experiment.summary.failed,
            pass_rate = experiment.summary.pass_rate,
            duration_ms,
            "experiment completed"
        );
        Ok(experiment)
    }

    /// One task per persona through a bounded worker pool. Returns one typed
    /// outcome per persona, in persona order.
    async fn fan_out(
        &self,
        personas: Vec<Persona>,
        scorer_prompt: String,
        session_url: Option<String>,
        nodes: Vec<OverridableNode>,
        state_values: StateValues,
    ) -> Vec<Result<SimulationResult, SimulationError>> {
        let semaphore = Arc::new(Semaphore::new(self.policy.max_concurrent.max(1)));
        let nodes = Arc::new(nodes);
        let state_values = Arc::new(state_values);
        let scorer_prompt = Arc::new(scorer_prompt);

        let mut tasks: JoinSet<(usize, Result<SimulationResult, SimulationError>)> =
            JoinSet::new();
        for (index, persona) in personas.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let simulator = self.simulator.clone();
            let judge = self.judge.clone();
            let tracker = self.tracker.clone();
            let session_url = session_url.clone();
            let nodes = nodes.clone();
            let state_values = state_values.clone();
            let scorer_prompt = scorer_prompt.clone();
            let pass_threshold = self.policy.pass_threshold;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            Err(SimulationError {
                                persona_id: persona.id.clone(),
                                persona_name: persona.name.clone(),
                                stage: SimulationStage::Conversation,
                                source: AppError::Simulation("worker pool closed".into()),
                            }),
                        )
                    }
                };

                let outcome = run_pipeline(
                    &simulator,
                    &judge,
                    persona,
                    &scorer_prompt,
                    pass_threshold,
                    &nodes,
                    &state_values,
                )
                .await;

                if let Ok(result) = &outcome {
                    if let (Some(tracker), Some(url)) = (&tracker, &session_url) {
                        if let Err(e) = tracker.log_result(url, result).await {
                            tracing::warn!(result_id = %result.id, error = %e, "tracker logging failed");
                        }
                    }
                }
                (index, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                // A panicked task only loses its own slot.
                Err(e) => tracing::warn!(error = %e, "simulation task aborted"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn narrative_insights(
        &self,
        test: &BehaviorTest,
        results: &[SimulationResult],
    ) -> Result<NarrativeInsights, AppError> {
        let mut prompt = format!("Evaluation criteria:\n{}\n\nResults:\n", test.scorer_prompt);
        for result in results {
            prompt.push_str(&format!(
                "- {} ({}): score {:.2}, {} — {}\n",
                result.persona.name,
                result.persona.role,
                result.score,
                if result.passed { "passed" } else { "failed" },
                result.rationale
            ));
        }

        let messages = [ChatMessage::system(INSIGHTS_SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let response = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| AppError::Tracking(e.to_string()))?;
        parse_json_response(&response).map_err(|e| AppError::Tracking(e.to_string()))
    }
}

async fn run_pipeline(
    simulator: &ConversationSimulator,
    judge: &Judge,
    persona: Persona,
    scorer_prompt: &str,
    pass_threshold: f64,
    nodes: &[OverridableNode],
    state_values: &StateValues,
) -> Result<SimulationResult, SimulationError> {
    let conversation = simulator
        .simulate(&persona, nodes, state_values)
        .await
        .map_err(|source| SimulationError {
            persona_id: persona.id.clone(),
            persona_name: persona.name.clone(),
            stage: SimulationStage::Conversation,
            source,
        })?;

    let verdict = judge
        .score(scorer_prompt, &conversation, &persona)
        .await
        .map_err(|source| SimulationError {
            persona_id: persona.id.clone(),
            persona_name: persona.name.clone(),
            stage: SimulationStage::Scoring,
            source,
        })?;

    Ok(SimulationResult {
        id: uuid::Uuid::new_v4().to_string(),
        persona_id: persona.id.clone(),
        persona,
        conversation,
        score: verdict.score,
        passed: verdict.score >= pass_threshold,
        rationale: verdict.rationale,
        scored_at: Utc::now(),
    })
}
