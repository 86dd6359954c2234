use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One message in a chat-completion exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Abstraction over the generative service used for persona synthesis,
/// persona-voice turns, judging, and narrative insights.
///
/// A single handle is injected into every consumer, so tests substitute a
/// scripted fake and no call site constructs its own client.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError>;
}

/// Parse a model response that is supposed to contain JSON.
///
/// Models wrap structured output in markdown fences or surrounding prose
/// often enough that strict parsing alone loses usable payloads. The
/// fallbacks strip a trailing reasoning block, then a ```json fence, then
/// fall back to the outermost brace/bracket span. A payload that still
/// fails to parse is a Generation error, never a silent default.
pub fn parse_json_response<T: DeserializeOwned>(response: &str) -> Result<T, AppError> {
    if let Ok(parsed) = serde_json::from_str::<T>(response) {
        return Ok(parsed);
    }

    let cleaned = match response.rfind("</think>") {
        Some(end) => response[end + 8..].trim(),
        None => response.trim(),
    };

    let candidate = if let Some(start) = cleaned.find("```json") {
        let after = &cleaned[start + 7..];
        match after.find("```") {
            Some(end) => after[..end].trim(),
            None => cleaned,
        }
    } else if let Some(start) = cleaned.find(|c| c == '{' || c == '[') {
        let close = if cleaned[start..].starts_with('{') { '}' } else { ']' };
        match cleaned.rfind(close) {
            Some(end) if end > start => cleaned[start..=end].trim(),
            _ => cleaned,
        }
    } else {
        cleaned
    };

    serde_json::from_str::<T>(candidate).map_err(|_| {
        AppError::Generation(format!(
            "model returned no parseable JSON payload: {}",
            response.chars().take(300).collect::<String>()
        ))
    })
}

// ============================================================================
// OpenAI-compatible HTTP implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiChatModel {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(api_url: String, api_key: String, model: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            api_url,
            api_key,
            model,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.7,
        };

        let mut req = self.client.post(&url).json(&request);
        // Local models run without an API key.
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read body".into());
            return Err(AppError::Generation(format!(
                "chat completion returned {status}: {body}"
            )));
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::Generation("chat completion returned no choices".into()))
    }
}
