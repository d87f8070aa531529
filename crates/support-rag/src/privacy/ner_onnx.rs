use anyhow::{anyhow, Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::entities::{EntityKind, EntityRecognizer, EntitySpan};

const MAX_TOKENS: usize = 512;

/// Models whose exports take no `token_type_ids` input.
const NO_TOKEN_TYPE_MODELS: &[&str] = &["distilbert", "roberta", "xlm-roberta", "camembert"];

#[derive(Debug, Deserialize)]
struct ModelConfig {
    id2label: HashMap<String, String>,
    #[serde(default)]
    model_type: Option<String>,
}

/// Token-classification NER model (BERT-style BIO tags) on ONNX Runtime.
///
/// The model directory must hold `model.onnx`, `tokenizer.json` and the
/// Hugging Face `config.json` carrying `id2label`.
pub struct OnnxNerRecognizer {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    labels: Vec<String>,
    token_type_ids: bool,
}

impl OnnxNerRecognizer {
    pub fn from_dir(model_dir: &Path) -> Result<Self> {
        ort::init().with_name("support_ner").commit();

        let model_path = [model_dir.join("model.onnx"), model_dir.join("onnx").join("model.onnx")]
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| anyhow!("No model.onnx in {}", model_dir.display()))?;

        let tokenizer = tokenizers::Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|e| anyhow!("Failed to load NER tokenizer: {:?}", e))?;

        let config_text = std::fs::read_to_string(model_dir.join("config.json"))
            .with_context(|| format!("Failed to read config.json in {}", model_dir.display()))?;
        let config: ModelConfig =
            serde_json::from_str(&config_text).context("Failed to parse NER config.json")?;
        let labels = label_table(&config.id2label)?;
        let token_type_ids = !config
            .model_type
            .as_deref()
            .is_some_and(|t| NO_TOKEN_TYPE_MODELS.contains(&t));

        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Optimization level: {:?}", e))?
            .commit_from_file(&model_path)
            .map_err(|e| anyhow!("Failed to load NER model: {:?}", e))?;

        tracing::info!(
            model = %model_path.display(),
            labels = labels.len(),
            "Loaded NER model"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            labels,
            token_type_ids,
        })
    }
}

impl EntityRecognizer for OnnxNerRecognizer {
    fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {:?}", e))?;
        let len = encoding.get_ids().len().min(MAX_TOKENS);
        let ids: Vec<i64> = encoding.get_ids()[..len].iter().map(|&i| i as i64).collect();
        let mask: Vec<i64> = encoding.get_attention_mask()[..len]
            .iter()
            .map(|&m| m as i64)
            .collect();

        let shape = vec![1, len];
        let input_ids = Value::from_array((shape.clone(), ids))
            .map_err(|e| anyhow!("input_ids tensor: {:?}", e))?;
        let attention_mask = Value::from_array((shape.clone(), mask))
            .map_err(|e| anyhow!("attention_mask tensor: {:?}", e))?;

        let mut session = self.session.lock();
        let outputs = if self.token_type_ids {
            let type_ids = Value::from_array((shape, vec![0i64; len]))
                .map_err(|e| anyhow!("token_type_ids tensor: {:?}", e))?;
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => type_ids,
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])
        }
        .map_err(|e| anyhow!("NER inference failed: {:?}", e))?;

        let (out_shape, logits) = outputs["logits"]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract logits: {:?}", e))?;
        let num_labels = out_shape[2] as usize;
        if num_labels != self.labels.len() {
            return Err(anyhow!(
                "Model emits {} labels but config.json lists {}",
                num_labels,
                self.labels.len()
            ));
        }

        let offsets = encoding.get_offsets();
        let word_ids = encoding.get_word_ids();
        let tokens: Vec<TaggedToken> = (0..len)
            .filter(|&i| offsets[i].1 > offsets[i].0)
            .map(|i| {
                let row = &logits[i * num_labels..(i + 1) * num_labels];
                let best = argmax(row);
                TaggedToken {
                    label: self.labels[best].as_str(),
                    start: offsets[i].0,
                    end: offsets[i].1,
                    word: word_ids[i],
                }
            })
            .collect();

        Ok(decode_bio(&tokens))
    }

    fn name(&self) -> &str {
        "onnx-ner"
    }
}

fn label_table(id2label: &HashMap<String, String>) -> Result<Vec<String>> {
    let mut labels = vec![String::new(); id2label.len()];
    for (id, label) in id2label {
        let index: usize = id
            .parse()
            .with_context(|| format!("Non-numeric label id '{}'", id))?;
        let slot = labels
            .get_mut(index)
            .ok_or_else(|| anyhow!("Label id {} out of range", index))?;
        *slot = label.clone();
    }
    Ok(labels)
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

struct TaggedToken<'a> {
    label: &'a str,
    start: usize,
    end: usize,
    word: Option<u32>,
}

fn entity_kind(tag: &str) -> Option<EntityKind> {
    match tag {
        "PER" | "PERSON" => Some(EntityKind::Person),
        "LOC" | "LOCATION" | "GPE" => Some(EntityKind::Place),
        "ORG" | "ORGANIZATION" => Some(EntityKind::Organization),
        _ => None,
    }
}

/// Merge BIO (or plain IO) token tags into character spans. Sub-word
/// pieces of a word already inside an entity extend it whatever their tag.
fn decode_bio(tokens: &[TaggedToken<'_>]) -> Vec<EntitySpan> {
    let mut spans: Vec<EntitySpan> = Vec::new();
    let mut open: Option<(EntitySpan, Option<u32>)> = None;

    for token in tokens {
        if let Some((span, word)) = open.as_mut() {
            if token.word.is_some() && token.word == *word {
                span.end = token.end;
                continue;
            }
        }

        let (prefix, tag) = match token.label.split_once('-') {
            Some((p, t)) => (p, t),
            None => ("I", token.label),
        };
        let kind = entity_kind(tag);

        let extends = match (kind, &open) {
            (Some(kind), Some((span, _))) => prefix == "I" && span.kind == kind,
            _ => false,
        };
        if extends {
            if let Some((span, word)) = open.as_mut() {
                span.end = token.end;
                *word = token.word;
            }
            continue;
        }

        if let Some((span, _)) = open.take() {
            spans.push(span);
        }
        if let Some(kind) = kind {
            open = Some((
                EntitySpan {
                    start: token.start,
                    end: token.end,
                    kind,
                },
                token.word,
            ));
        }
    }
    if let Some((span, _)) = open {
        spans.push(span);
    }
    spans
}
