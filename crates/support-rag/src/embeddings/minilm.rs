use anyhow::{anyhow, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{l2_normalize, Embedder};

#[derive(Clone, Debug)]
pub struct MiniLmConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
}

impl MiniLmConfig {
    /// Locate `model.onnx` (or an optimised variant) and `tokenizer.json`
    /// inside a sentence-transformers export directory.
    pub fn from_model_dir(model_dir: &Path, dimension: usize, max_length: usize) -> Option<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return None;
        }
        let model_path = [
            model_dir.join("model_O4.onnx"),
            model_dir.join("model.onnx"),
            model_dir.join("onnx").join("model.onnx"),
        ]
        .into_iter()
        .find(|p| p.exists())?;

        Some(Self {
            model_path,
            tokenizer_path,
            dimension,
            max_length,
        })
    }
}

/// Sentence-transformer embedder (all-MiniLM-L6-v2 family) running on ONNX
/// Runtime: mean pooling over the attention mask, then L2 normalisation.
pub struct MiniLmEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    config: MiniLmConfig,
}

impl MiniLmEmbedder {
    pub fn new(config: MiniLmConfig) -> Result<Self> {
        ort::init().with_name("support_embeddings").commit();

        if !config.model_path.exists() {
            return Err(anyhow!(
                "Model file not found at: {}",
                config.model_path.display()
            ));
        }

        let tokenizer = tokenizers::Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {:?}", e))?;

        let model_bytes = std::fs::read(&config.model_path)
            .map_err(|e| anyhow!("Failed to read model: {:?}", e))?;

        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Optimization level: {:?}", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| anyhow!("Intra threads: {:?}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load model: {:?}", e))?;

        tracing::info!(
            model = %config.model_path.display(),
            dimension = config.dimension,
            "Loaded sentence embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            config,
        })
    }

    fn encode(&self, text: &str) -> Result<(Vec<i64>, Vec<i64>, Vec<i64>)> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {:?}", e))?;

        let len = encoding.get_ids().len().min(self.config.max_length);
        let ids = encoding.get_ids()[..len].iter().map(|&id| id as i64).collect();
        let mask = encoding.get_attention_mask()[..len]
            .iter()
            .map(|&m| m as i64)
            .collect();
        let type_ids = encoding.get_type_ids()[..len]
            .iter()
            .map(|&t| t as i64)
            .collect();
        Ok((ids, mask, type_ids))
    }
}

impl Embedder for MiniLmEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let (ids, mask, type_ids) = self.encode(text)?;
        let seq_len = ids.len();
        if seq_len == 0 {
            return Ok(vec![0.0; self.config.dimension]);
        }

        let shape = vec![1, seq_len];
        let input_ids = Value::from_array((shape.clone(), ids))
            .map_err(|e| anyhow!("input_ids tensor: {:?}", e))?;
        let attention_mask = Value::from_array((shape.clone(), mask.clone()))
            .map_err(|e| anyhow!("attention_mask tensor: {:?}", e))?;
        let token_type_ids = Value::from_array((shape, type_ids))
            .map_err(|e| anyhow!("token_type_ids tensor: {:?}", e))?;

        let inputs = ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
            "token_type_ids" => token_type_ids,
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| anyhow!("Inference failed: {:?}", e))?;

        let output_name = outputs
            .iter()
            .find(|(name, _)| *name == "last_hidden_state" || *name == "token_embeddings")
            .map(|(name, _)| name.to_string())
            .unwrap_or_else(|| "last_hidden_state".to_string());

        let (shape, data) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract output '{}': {:?}", output_name, e))?;

        let out_len = shape[1] as usize;
        let hidden_dim = shape[2] as usize;

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut mask_sum = 0.0f32;
        for pos in 0..out_len.min(mask.len()) {
            let mask_val = mask[pos] as f32;
            if mask_val > 0.0 {
                mask_sum += mask_val;
                let offset = pos * hidden_dim;
                for dim in 0..hidden_dim {
                    pooled[dim] += data[offset + dim] * mask_val;
                }
            }
        }
        if mask_sum > 0.0 {
            for value in &mut pooled {
                *value /= mask_sum;
            }
        }

        Ok(l2_normalize(pooled))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
