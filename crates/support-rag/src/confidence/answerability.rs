use regex::Regex;
use std::sync::LazyLock;

use crate::llm::{GenerationConfig, LLMProvider};

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex is valid"));

/// Ratings at or below this mean the question should go to the large model.
pub const ANSWERABILITY_CUTOFF: f32 = 0.5;

pub fn answerability_prompt(question: &str) -> String {
    format!(
        "You: You are a classifier.\n\
         Your job is to estimate whether a customer-service AI that DOES have access to \
         customer data, account records, and company policies would be able to answer the \
         question below.\n\
         Do NOT comment on whether YOU personally have access.\n\
         Output a single number between 0 and 1:\n\
         1 = fully answerable by such a system\n\
         0 = not answerable even with full access\n\n\
         Question:\n{}\n\n\
         Answer with only the number.\n\
         AI: ",
        question
    )
}

/// First number in the model's reply, clamped to [0, 1].
pub fn parse_rating(reply: &str) -> Option<f32> {
    let value: f32 = NUMBER.find(reply)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 1.0))
}

/// Ask the small model whether a fully-informed support agent could answer
/// `question`. Returns true when the question should be escalated straight
/// away. Transport or parse failures never escalate.
pub async fn should_escalate(small: &dyn LLMProvider, question: &str, stop: &[String]) -> bool {
    let config = GenerationConfig {
        max_tokens: 20,
        temperature: 0.3,
        stop_sequences: stop.to_vec(),
        ..GenerationConfig::default()
    };
    let reply = match small.generate(&answerability_prompt(question), &config).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "Answerability check failed");
            return false;
        }
    };
    match parse_rating(&reply) {
        Some(rating) => {
            tracing::debug!(rating, "Answerability rating");
            rating <= ANSWERABILITY_CUTOFF
        }
        None => {
            tracing::debug!(reply = %reply, "No rating in answerability reply");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderInfo;
    use async_trait::async_trait;

    struct Fixed(Result<&'static str, &'static str>);

    #[async_trait]
    impl LLMProvider for Fixed {
        async fn generate(&self, prompt: &str, config: &GenerationConfig) -> anyhow::Result<String> {
            assert!(prompt.contains("Question:\nwhere is my parcel"));
            assert_eq!(config.max_tokens, 20);
            self.0
                .map(str::to_string)
                .map_err(|e| anyhow::anyhow!(e))
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "fixed".to_string(),
                model: "fixed".to_string(),
                is_local: true,
            }
        }
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("0.8"), Some(0.8));
        assert_eq!(parse_rating("Score: 1.7 overall"), Some(1.0));
        assert_eq!(parse_rating("-2"), Some(0.0));
        assert_eq!(parse_rating("no idea"), None);
    }

    #[tokio::test]
    async fn test_should_escalate() {
        let stop = vec!["You:".to_string()];
        assert!(should_escalate(&Fixed(Ok("0.2")), "where is my parcel", &stop).await);
        assert!(should_escalate(&Fixed(Ok("0.5")), "where is my parcel", &stop).await);
        assert!(!should_escalate(&Fixed(Ok("0.9")), "where is my parcel", &stop).await);
        assert!(!should_escalate(&Fixed(Ok("maybe")), "where is my parcel", &stop).await);
        assert!(!should_escalate(&Fixed(Err("connection refused")), "where is my parcel", &stop).await);
    }
}
