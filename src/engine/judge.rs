use std::sync::Arc;

use serde::Deserialize;

use crate::engine::llm::{parse_json_response, ChatMessage, ChatModel};
use crate::engine::types::{ConversationTurn, Persona, TurnRole};
use crate::error::AppError;

const JUDGE_SYSTEM_PROMPT: &str = "You are a strict QA reviewer scoring a conversation \
between a user and an AI assistant against evaluation criteria. Read the full \
transcript, then score how well the assistant satisfied the criteria. Respond with \
JSON: {\"score\": number between 0 and 1, \"rationale\": string explaining the score}";

/// The judge's verdict on one transcript. Score only; whether it counts as
/// a pass is decided by the orchestrator's threshold, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    pub rationale: String,
}

/// Scores completed transcripts against a rubric's scorer prompt.
pub struct Judge {
    llm: Arc<dyn ChatModel>,
}

impl Judge {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    /// One structured-output call over the rendered transcript. Scores
    /// outside [0, 1] are clamped rather than rejected.
    pub async fn score(
        &self,
        scorer_prompt: &str,
        conversation: &[ConversationTurn],
        persona: &Persona,
    ) -> Result<JudgeVerdict, AppError> {
        let prompt = format!(
            "Evaluation criteria:\n{scorer_prompt}\n\n\
             The user in this conversation was a test persona:\n\
             {} ({}) — goal: {}\n\n\
             Transcript:\n{}",
            persona.name,
            persona.role,
            persona.goal,
            render_transcript(conversation)
        );

        let messages = [ChatMessage::system(JUDGE_SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let response = self.llm.complete(&messages).await?;
        let mut verdict: JudgeVerdict = parse_json_response(&response)?;
        verdict.score = verdict.score.clamp(0.0, 1.0);
        Ok(verdict)
    }
}

fn render_transcript(conversation: &[ConversationTurn]) -> String {
    conversation
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                TurnRole::User => "User",
                TurnRole::Assistant => "Assistant",
            };
            format!("{speaker}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
