//! Large fallback model behind an OpenAI-compatible chat completions API.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    parse_json_response, send_error, ChatMessage, GenerationConfig, LLMProvider, ProviderInfo,
};

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct ExternalProvider {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl ExternalProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        let endpoint = endpoint.into();
        let model = model.into();
        if api_key.is_none() {
            tracing::warn!(endpoint = %endpoint, "No API key configured for external provider");
        }
        tracing::info!(endpoint = %endpoint, model = %model, "Creating ExternalProvider");

        Ok(Self {
            endpoint,
            api_key,
            model,
            client,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": false,
        });
        if !config.stop_sequences.is_empty() {
            body["stop"] = json!(config.stop_sequences);
        }
        body
    }

    async fn complete(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            messages = messages.len(),
            "Sending chat completion request"
        );

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(messages, config));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| send_error(&self.endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            tracing::error!(endpoint = %self.endpoint, status = %status, error = %error, "API returned error");
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let result: ChatCompletionResponse = parse_json_response(response, &self.endpoint).await?;
        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No choices returned from API"))?;

        tracing::debug!(chars = content.len(), "API response received");
        Ok(content)
    }
}

#[async_trait]
impl LLMProvider for ExternalProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        self.complete(&[ChatMessage::user(prompt)], config).await
    }

    async fn chat(&self, messages: &[ChatMessage], config: &GenerationConfig) -> Result<String> {
        self.complete(messages, config).await
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "External".to_string(),
            model: self.model.clone(),
            is_local: false,
        }
    }

    async fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(api_key: Option<String>) -> ExternalProvider {
        ExternalProvider::new(
            "https://api.openai.com/v1/chat/completions",
            "gpt-4o-mini",
            api_key,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_request_body_carries_roles() {
        let p = provider(Some("sk-test".to_string()));
        let messages = vec![
            ChatMessage::user("Where is [REDACTED PERSON]'s order?"),
            ChatMessage::assistant("Let me check."),
        ];
        let body = p.request_body(&messages, &GenerationConfig::default());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["messages"][1]["content"], "Let me check.");
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Your order shipped."}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("Your order shipped.")
        );
    }

    #[tokio::test]
    async fn test_readiness_requires_key() {
        assert!(!provider(None).is_ready().await);
        assert!(provider(Some("sk-test".to_string())).is_ready().await);
        assert!(!provider(None).info().is_local);
    }
}
