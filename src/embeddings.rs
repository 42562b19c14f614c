//! # Embeddings
//!
//! Sentence embeddings using Candle (pure Rust ML framework).
//!
//! [`SentenceEmbeddingsModel`] loads a BERT-family sentence-transformer from the
//! Hugging Face Hub (the multilingual MiniLM model by default, 384 dimensions), runs
//! it on the CPU, mean-pools token states under the attention mask and L2-normalises
//! the result.
//!
//! The rest of the crate only sees the [`Embedder`] trait. Embedding is CPU-bound and
//! synchronous; async callers run it through `tokio::task::spawn_blocking`.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;
use tracing::*;

use crate::error::EmbeddingError;

/// Turns texts into fixed-dimension vectors.
///
/// Implementations must return exactly one vector of [`Embedder::dimension`] floats per
/// input text, in input order, and must be deterministic.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()])?;
        match vectors.pop() {
            Some(v) if vectors.is_empty() => Ok(v),
            _ => Err(EmbeddingError::Count {
                expected: 1,
                got: vectors.len() + 1,
            }),
        }
    }
}

/// Check an embedder's output against the contract.
pub fn check_vectors(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::Count {
            expected: expected_count,
            got: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::Dimension {
            expected: dimension,
            got: bad.len(),
        });
    }
    Ok(())
}

fn model_err(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::Model(e.to_string())
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbeddingsModel {
    /// Load `model_id` from the Hugging Face Hub (cached after the first download).
    pub fn load(model_id: &str) -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;
        info!("Loading embedding model {}", model_id);

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(model_err)?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json").map_err(model_err)?;
        let tokenizer_filename = api_repo.get("tokenizer.json").map_err(model_err)?;
        let weights_filename = api_repo.get("model.safetensors").map_err(model_err)?;

        let config = std::fs::read_to_string(config_filename).map_err(model_err)?;
        let raw: serde_json::Value = serde_json::from_str(&config).map_err(model_err)?;
        let dimension = raw
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| EmbeddingError::Model("config.json has no hidden_size".into()))?
            as usize;
        let config: Config = serde_json::from_value(raw).map_err(model_err)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| EmbeddingError::Model(format!("Failed to load tokenizer: {e}")))?;

        // SAFETY: the safetensors file is owned by the hub cache and not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(model_err)?
        };
        let model = BertModel::load(vb, &config).map_err(model_err)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    /// Encode one text into a normalised embedding.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Model(format!("Tokenization error: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(model_err)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(model_err)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(model_err)?;

        let embedding = self
            .mean_pooling(&output, tokens.get_attention_mask())
            .and_then(|t| Self::normalize(&t))
            .map_err(model_err)?;

        embedding.to_vec1::<f32>().map_err(model_err)
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(
        &self,
        embeddings: &Tensor,
        attention_mask: &[u32],
    ) -> candle_core::Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask: [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        sum.broadcast_div(&count)?.squeeze(0)
    }

    /// L2 normalize the embedding vector
    fn normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        tensor.broadcast_div(&norm)
    }
}

impl Embedder for SentenceEmbeddingsModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}
