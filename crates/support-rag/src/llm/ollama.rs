//! Small local model served by Ollama's `/api/generate`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{parse_json_response, send_error, GenerationConfig, LLMProvider, ProviderInfo};

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .tcp_nodelay(true)
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let model = model.into();
        tracing::info!(url = %base_url, model = %model, "Creating OllamaProvider");

        Ok(Self {
            base_url,
            model,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn request_body(&self, prompt: &str, config: &GenerationConfig) -> Value {
        let mut options = json!({
            "num_predict": config.max_tokens,
            "stop": config.stop_sequences,
            "top_k": config.top_k,
        });
        // Greedy requests leave temperature at the server default.
        if !config.is_greedy() {
            options["temperature"] = json!(config.temperature);
            options["top_p"] = json!(config.top_p);
        }
        if let Some(seed) = config.seed {
            options["seed"] = json!(seed);
        }

        json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": options,
        })
    }

    /// One-token request that makes the server load the model into memory.
    pub async fn warmup(&self) -> Result<()> {
        let config = GenerationConfig {
            max_tokens: 1,
            ..GenerationConfig::default()
        };
        let started = std::time::Instant::now();
        self.generate("Hi", &config).await?;
        tracing::info!(
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Small model warmed up"
        );
        Ok(())
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let endpoint = self.endpoint();
        tracing::debug!(
            endpoint = %endpoint,
            model = %self.model,
            max_tokens = config.max_tokens,
            prompt_len = prompt.len(),
            "Sending Ollama generate request"
        );

        let response = self
            .client
            .post(&endpoint)
            .json(&self.request_body(prompt, config))
            .send()
            .await
            .map_err(|e| send_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            tracing::error!(endpoint = %endpoint, status = %status, error = %error, "Ollama returned error");
            return Err(anyhow!("Ollama error ({}): {}", status, error));
        }

        let result: GenerateResponse = parse_json_response(response, &endpoint).await?;
        Ok(result.response.trim().to_string())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Ollama".to_string(),
            model: self.model.clone(),
            is_local: true,
        }
    }

    async fn is_ready(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Ollama not reachable");
                false
            }
        }
    }
}
