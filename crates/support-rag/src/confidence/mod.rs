//! Confidence Gate
//!
//! Decides whether the small model's answer can be returned as-is. Gate A is
//! a lexical check on the answer itself; Gate B, run only when Gate A passes,
//! resamples the same prompt and measures how much the answers agree.

pub mod answerability;
pub mod rouge;
pub mod verbalized;

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ConfidenceConfig;
use crate::llm::{GenerationConfig, LLMProvider};

pub use answerability::{parse_rating, should_escalate};
pub use rouge::RougeScorer;
pub use verbalized::{check_verbalized, is_verbally_confident, VerbalizedRejection};

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Verbalized(VerbalizedRejection),
    /// Every resample failed or timed out.
    NoSamples,
    BelowThreshold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceReport {
    pub confident: bool,
    pub rejected_by: Option<Rejection>,
    /// Self-consistency score, present when Gate B ran with at least one
    /// successful resample.
    pub score: Option<f32>,
    /// Successful resamples.
    pub samples: usize,
}

impl ConfidenceReport {
    fn rejected(reason: Rejection, score: Option<f32>, samples: usize) -> Self {
        Self {
            confident: false,
            rejected_by: Some(reason),
            score,
            samples,
        }
    }
}

pub struct ConfidenceGate {
    small: Arc<dyn LLMProvider>,
    config: ConfidenceConfig,
    sample_timeout: Duration,
}

impl ConfidenceGate {
    pub fn new(small: Arc<dyn LLMProvider>, config: ConfidenceConfig, sample_timeout: Duration) -> Self {
        Self {
            small,
            config,
            sample_timeout,
        }
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    pub async fn check(&self, prompt: &str, answer: &str) -> bool {
        self.evaluate(prompt, answer).await.confident
    }

    pub async fn evaluate(&self, prompt: &str, answer: &str) -> ConfidenceReport {
        if let Err(reason) = check_verbalized(answer) {
            tracing::debug!(reason = ?reason, "Answer failed verbalized check");
            return ConfidenceReport::rejected(Rejection::Verbalized(reason), None, 0);
        }

        let started = Instant::now();
        let resamples = self.resample(prompt).await;
        let samples = resamples.len();
        if samples == 0 {
            tracing::warn!(requested = self.config.num_samples, "No resamples succeeded");
            return ConfidenceReport::rejected(Rejection::NoSamples, None, 0);
        }

        let mut responses = Vec::with_capacity(samples + 1);
        responses.push(answer.trim().to_string());
        responses.extend(resamples);

        let Some(score) = RougeScorer::new().self_consistency(&responses) else {
            return ConfidenceReport::rejected(Rejection::NoSamples, None, samples);
        };
        let confident = score >= self.config.threshold;

        tracing::debug!(
            score,
            threshold = self.config.threshold,
            samples,
            confident,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Self-consistency check"
        );

        if confident {
            ConfidenceReport {
                confident: true,
                rejected_by: None,
                score: Some(score),
                samples,
            }
        } else {
            ConfidenceReport::rejected(Rejection::BelowThreshold, Some(score), samples)
        }
    }

    /// Draw the configured number of temperature samples concurrently. Failed
    /// or timed-out samples are dropped.
    async fn resample(&self, prompt: &str) -> Vec<String> {
        let config = GenerationConfig::sampled(
            self.config.max_tokens,
            self.config.sample_temperature,
            self.config.stop_sequences.clone(),
        );

        let calls = (0..self.config.num_samples).map(|_| {
            tokio::time::timeout(self.sample_timeout, self.small.generate(prompt, &config))
        });

        join_all(calls)
            .await
            .into_iter()
            .enumerate()
            .filter_map(|(i, result)| match result {
                Ok(Ok(text)) => Some(text.trim().to_string()),
                Ok(Err(e)) => {
                    tracing::warn!(sample = i + 1, error = %e, "Resample failed");
                    None
                }
                Err(_) => {
                    tracing::warn!(sample = i + 1, "Resample timed out");
                    None
                }
            })
            .collect()
    }
}
