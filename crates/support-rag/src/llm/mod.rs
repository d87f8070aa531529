//! Language model providers.
//!
//! The small model runs locally behind Ollama; the large fallback model is any
//! OpenAI-compatible chat completions endpoint.

pub mod external;
pub mod ollama;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use external::ExternalProvider;
pub use ollama::OllamaProvider;

/// Core trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion for a raw prompt
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    /// Chat completion over a message history.
    /// Default implementation renders a transcript prompt and calls generate().
    async fn chat(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
        let prompt = transcript_prompt(messages);
        self.generate(&prompt, config).await
    }

    /// Get provider info
    fn info(&self) -> ProviderInfo;

    /// Check if provider is ready
    async fn is_ready(&self) -> bool {
        true
    }
}

/// Generation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// 1 means greedy decoding.
    pub top_k: usize,
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            stop_sequences: vec![],
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Deterministic decoding for the primary answer.
    pub fn greedy(max_tokens: usize, stop_sequences: Vec<String>) -> Self {
        Self {
            max_tokens,
            temperature: 0.0,
            top_p: 1.0,
            top_k: 1,
            stop_sequences,
            seed: None,
        }
    }

    /// Temperature sampling for self-consistency resamples.
    pub fn sampled(max_tokens: usize, temperature: f32, stop_sequences: Vec<String>) -> Self {
        Self {
            max_tokens,
            temperature,
            stop_sequences,
            ..Self::default()
        }
    }

    pub fn is_greedy(&self) -> bool {
        self.top_k == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Render a conversation as `You:` / `AI:` lines ending with an open `AI: `
/// turn. System messages are emitted verbatim first.
pub fn transcript_prompt(messages: &[ChatMessage]) -> String {
    let mut lines = Vec::with_capacity(messages.len() + 1);
    for message in messages {
        match message.role {
            ChatRole::System => lines.push(message.content.clone()),
            ChatRole::User => lines.push(format!("You: {}", message.content)),
            ChatRole::Assistant => lines.push(format!("AI: {}", message.content)),
        }
    }
    lines.push("AI: ".to_string());
    lines.join("\n")
}

/// Parse a response body as JSON, returning a clear error if the server returned HTML
/// (e.g. a gateway error page) instead of valid JSON.
pub(crate) async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "Endpoint {} returned HTML instead of JSON (HTTP {}): {}",
            endpoint,
            status,
            preview
        ));
    }

    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!(
            "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
            endpoint,
            status,
            e,
            preview
        )
    })
}

pub(crate) fn send_error(endpoint: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        tracing::error!(endpoint = %endpoint, "Request timed out");
        anyhow!("Request to {} timed out", endpoint)
    } else if e.is_connect() {
        tracing::error!(endpoint = %endpoint, error = %e, "Connection failed");
        anyhow!("Failed to connect to {}: {}", endpoint, e)
    } else {
        tracing::error!(endpoint = %endpoint, error = %e, "Request failed");
        anyhow!("Request to {} failed: {}", endpoint, e)
    }
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub is_local: bool,
}
