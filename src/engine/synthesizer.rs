use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::engine::llm::{parse_json_response, ChatMessage, ChatModel};
use crate::engine::types::Persona;
use crate::error::AppError;

/// Personas requested per generative call. Models are unreliable at
/// honoring exact counts for larger batches, so generation proceeds in
/// bounded batches until the full cohort is collected.
pub const PERSONA_BATCH_SIZE: usize = 5;

const RUBRIC_SYSTEM_PROMPT: &str = "You are a QA engineer designing behavior tests \
for conversational AI agents. Given a description of a desired behavior, produce \
evaluation criteria a reviewer can score a conversation transcript against, a short \
test name, and a hint describing what kinds of users would exercise this behavior. \
Respond with JSON: {\"testName\": string, \"scorerPrompt\": string, \"personaHint\": string}";

const PERSONA_SYSTEM_PROMPT: &str = "You are a test-design assistant creating synthetic \
user personas for conversational agent testing. Personas must be realistic, distinct \
from each other, and relevant to the behavior under test. Respond with a JSON array \
of objects: [{\"name\": string, \"role\": string, \"goal\": string, \"context\": string, \
\"tone\": string}]";

/// A generated rubric, before the operator approves or edits it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricDraft {
    pub test_name: String,
    pub scorer_prompt: String,
    pub persona_hint: String,
}

#[derive(Debug, Deserialize)]
struct PersonaDraft {
    name: String,
    role: String,
    goal: String,
    context: String,
    tone: String,
}

/// Generates scoring rubrics and persona cohorts from a natural-language
/// problem statement.
pub struct PersonaSynthesizer {
    llm: Arc<dyn ChatModel>,
    batch_size: usize,
}

impl PersonaSynthesizer {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self {
            llm,
            batch_size: PERSONA_BATCH_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_batch_size(llm: Arc<dyn ChatModel>, batch_size: usize) -> Self {
        Self { llm, batch_size }
    }

    /// Turn a problem description into scoring criteria plus a persona hint.
    pub async fn synthesize_rubric(
        &self,
        problem_description: &str,
    ) -> Result<RubricDraft, AppError> {
        let messages = [
            ChatMessage::system(RUBRIC_SYSTEM_PROMPT),
            ChatMessage::user(format!("Desired agent behavior:\n{problem_description}")),
        ];
        let response = self.llm.complete(&messages).await?;
        parse_json_response(&response)
    }

    /// Generate exactly `count` personas.
    ///
    /// Each batch requests only the remaining deficit and feeds the names
    /// and roles already generated back into the prompt to bias the model
    /// away from duplicates. Ids derive from a per-call timestamp plus the
    /// persona's position, unique within an experiment.
    pub async fn synthesize_personas(
        &self,
        count: usize,
        problem_description: &str,
        persona_hint: &str,
        agent_context: Option<&str>,
    ) -> Result<Vec<Persona>, AppError> {
        let mut personas: Vec<Persona> = Vec::with_capacity(count);
        let run_stamp = Utc::now().timestamp_millis();

        while personas.len() < count {
            let deficit = (count - personas.len()).min(self.batch_size);
            let existing: Vec<String> = personas
                .iter()
                .map(|p| format!("{} ({})", p.name, p.role))
                .collect();

            let drafts = self
                .request_batch(deficit, problem_description, persona_hint, agent_context, &existing)
                .await?;
            if drafts.is_empty() {
                return Err(AppError::Generation("persona batch came back empty".into()));
            }

            for draft in drafts {
                if personas.len() == count {
                    break;
                }
                let position = personas.len();
                personas.push(Persona {
                    id: format!("persona-{run_stamp}-{position}"),
                    name: draft.name,
                    role: draft.role,
                    goal: draft.goal,
                    context: draft.context,
                    tone: draft.tone,
                });
            }

            tracing::debug!(
                generated = personas.len(),
                target = count,
                "persona batch collected"
            );
        }

        Ok(personas)
    }

    async fn request_batch(
        &self,
        batch_count: usize,
        problem_description: &str,
        persona_hint: &str,
        agent_context: Option<&str>,
        existing: &[String],
    ) -> Result<Vec<PersonaDraft>, AppError> {
        let mut prompt = format!(
            "Create {batch_count} test personas for this behavior test.\n\n\
             Behavior under test:\n{problem_description}\n\n\
             Persona guidance: {persona_hint}\n"
        );
        if let Some(context) = agent_context {
            prompt.push_str(&format!("\nAbout the agent under test:\n{context}\n"));
        }
        if !existing.is_empty() {
            prompt.push_str(&format!(
                "\nAlready generated (create personas clearly different from these):\n- {}\n",
                existing.join("\n- ")
            ));
        }

        let messages = [ChatMessage::system(PERSONA_SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let response = self.llm.complete(&messages).await?;
        parse_json_response(&response)
    }
}
