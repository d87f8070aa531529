use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retrieval::faq::FaqStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub confidence: ConfidenceConfig,
    pub models: ModelsConfig,
    pub conversation: ConversationConfig,
    pub privacy: PrivacyConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_dir: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub purchase_top_k: usize,
    pub purchase_candidates: usize,
    pub product_top_k: usize,
    pub product_candidates: usize,
    pub faq_strategy: FaqStrategy,
    pub faq_top_k: usize,
    /// Candidates taken from the full-text match before re-ranking.
    pub faq_keyword_limit: usize,
    /// Candidates taken after category filtering before re-ranking.
    pub faq_category_limit: usize,
    /// Tracking numbers listed per item before collapsing to a count.
    pub tracking_display_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Additional small-model samples drawn for the self-consistency check.
    pub num_samples: usize,
    pub threshold: f32,
    pub sample_temperature: f32,
    pub max_tokens: usize,
    pub stop_sequences: Vec<String>,
    pub answerability_precheck: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub small_model_url: String,
    pub small_model: String,
    pub large_model_endpoint: String,
    pub large_model: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub large_model_api_key: Option<String>,
    /// Reply length cap for escalated turns.
    pub escalation_max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Completed user/assistant turns kept between requests. Zero means every
    /// turn starts from an empty conversation.
    pub retained_turns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub entity_redaction: bool,
    pub ner_model_dir: Option<PathBuf>,
    pub known_people: Vec<String>,
    pub known_places: Vec<String>,
    pub known_organizations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub store_secs: u64,
    pub generation_secs: u64,
    pub sample_secs: u64,
    pub escalation_secs: u64,
}

impl TimeoutConfig {
    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn sample(&self) -> Duration {
        Duration::from_secs(self.sample_secs)
    }

    pub fn escalation(&self) -> Duration {
        Duration::from_secs(self.escalation_secs)
    }
}

impl ModelsConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.large_model_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

impl SupportConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.retrieval.purchase_top_k == 0 {
            return Err("retrieval.purchase_top_k must be > 0".into());
        }
        if self.retrieval.purchase_candidates < self.retrieval.purchase_top_k {
            return Err("retrieval.purchase_candidates must be >= purchase_top_k".into());
        }
        if self.retrieval.product_top_k == 0 {
            return Err("retrieval.product_top_k must be > 0".into());
        }
        if self.retrieval.faq_top_k == 0 {
            return Err("retrieval.faq_top_k must be > 0".into());
        }
        if self.retrieval.tracking_display_limit == 0 {
            return Err("retrieval.tracking_display_limit must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.confidence.threshold) {
            return Err("confidence.threshold must be in [0.0, 1.0]".into());
        }
        if self.confidence.sample_temperature <= 0.0 {
            return Err("confidence.sample_temperature must be > 0 for resampling".into());
        }
        if self.models.escalation_max_tokens == 0 {
            return Err("models.escalation_max_tokens must be > 0".into());
        }
        if self.timeouts.store_secs == 0
            || self.timeouts.generation_secs == 0
            || self.timeouts.sample_secs == 0
            || self.timeouts.escalation_secs == 0
        {
            return Err("timeouts must all be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SupportConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("support-rag");

        Self {
            embedding: EmbeddingConfig {
                model_dir: data_dir.join("models").join("all-MiniLM-L6-v2"),
                ..EmbeddingConfig::default()
            },
            data_dir,
            retrieval: RetrievalConfig::default(),
            confidence: ConfidenceConfig::default(),
            models: ModelsConfig::default(),
            conversation: ConversationConfig::default(),
            privacy: PrivacyConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let model_dir = if let Ok(env_path) = std::env::var("MODEL_PATH") {
            PathBuf::from(env_path)
        } else {
            PathBuf::from("models").join("all-MiniLM-L6-v2")
        };
        Self {
            model_dir,
            dimension: 384,
            max_length: 256,
            cache_size: 1000,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            purchase_top_k: 10,
            purchase_candidates: 50,
            product_top_k: 4,
            product_candidates: 20,
            faq_strategy: FaqStrategy::KeywordFirst,
            faq_top_k: 1,
            faq_keyword_limit: 15,
            faq_category_limit: 20,
            tracking_display_limit: 10,
        }
    }
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            num_samples: 2,
            threshold: 0.25,
            sample_temperature: 0.7,
            max_tokens: 100,
            stop_sequences: vec!["\n\n".to_string(), "You:".to_string()],
            answerability_precheck: false,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            small_model_url: "http://localhost:11434".to_string(),
            small_model: "phi3:3.8b".to_string(),
            large_model_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            large_model: "gpt-4o-mini".to_string(),
            large_model_api_key: None,
            escalation_max_tokens: 512,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { retained_turns: 0 }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            entity_redaction: true,
            ner_model_dir: None,
            known_people: Vec::new(),
            known_places: Vec::new(),
            known_organizations: Vec::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store_secs: 10,
            generation_secs: 120,
            sample_secs: 60,
            escalation_secs: 120,
        }
    }
}
