//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `MediRagConfig` struct, which holds the configuration parameters,
//! and a `load_config` function to load the configuration from a YAML file.
//!
//! # Examples
//!
//! ```no_run
//! use medirag::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config.model);
//! ```

use serde::{Deserialize, Serialize};
use std::{env, fs, time::Duration};

use tracing::*;

use crate::error::ConfigError;

/// Environment variable that overrides [`MediRagConfig::api_key`].
pub const API_KEY_ENV: &str = "MEDIRAG_API_KEY";

/// Which nearest-neighbour backend the rebuild should produce.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact brute-force squared-L2 scan.
    #[default]
    Flat,
    /// Approximate HNSW graph (hora), re-ranked exactly.
    Hnsw,
}

/// Represents the application's configuration.
///
/// Only `api_key` is mandatory in the YAML file; every other field has a default.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct MediRagConfig {
    /// The API key used to authenticate requests to the completion backend.
    #[serde(default)]
    pub api_key: String,

    /// The base URL of the OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// The name of the model used for generating answers.
    #[serde(default = "default_model")]
    pub model: String,

    /// Path of the SQLite record store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Hugging Face hub id of the sentence-embedding model.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    // Free-text segmentation window, in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    // Characters shared between consecutive segments.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    // Neighbours retrieved per question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub index_kind: IndexKind,

    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,

    #[serde(default = "default_answer_max_tokens")]
    pub answer_max_tokens: u32,

    #[serde(default = "default_field_temperature")]
    pub field_temperature: f32,

    #[serde(default = "default_field_max_tokens")]
    pub field_max_tokens: u32,

    // Token budget of the retrieved context block (cl100k).
    #[serde(default = "default_context_max_tokens")]
    pub context_max_tokens: usize,

    // Best-effort timeout for embedding and completion calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Background freshness polling for `serve`; disabled when absent.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,

    // Also rebuild when records were edited without the count changing.
    #[serde(default)]
    pub rebuild_on_edit: bool,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_api_base() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_database_url() -> String {
    "medidiagnose.db".to_string()
}

fn default_embedding_model() -> String {
    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string()
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_top_k() -> usize {
    5
}

fn default_answer_temperature() -> f32 {
    0.3
}

fn default_answer_max_tokens() -> u32 {
    1500
}

fn default_field_temperature() -> f32 {
    0.2
}

fn default_field_max_tokens() -> u32 {
    300
}

fn default_context_max_tokens() -> usize {
    6000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_listen_addr() -> String {
    "127.0.0.1:5000".to_string()
}

impl Default for MediRagConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            model: default_model(),
            database_url: default_database_url(),
            embedding_model: default_embedding_model(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            index_kind: IndexKind::default(),
            answer_temperature: default_answer_temperature(),
            answer_max_tokens: default_answer_max_tokens(),
            field_temperature: default_field_temperature(),
            field_max_tokens: default_field_max_tokens(),
            context_max_tokens: default_context_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_secs: None,
            rebuild_on_edit: false,
            listen_addr: default_listen_addr(),
        }
    }
}

impl MediRagConfig {
    /// Replace the API key with `MEDIRAG_API_KEY` when that variable is set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                debug!("Using API key from {}", API_KEY_ENV);
                self.api_key = key;
            }
        }
    }

    /// Check the settings the pipeline cannot run without.
    ///
    /// # Errors
    /// - [`ConfigError::MissingApiKey`] when `api_key` is blank.
    /// - [`ConfigError::Invalid`] when `chunk_overlap >= chunk_size` or `top_k == 0`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Loads the application's configuration from a YAML file.
///
/// Reads the file, parses it as YAML and applies the environment override for the
/// API key. Validation is left to the caller so `init` can write a template that
/// does not have a key yet.
///
/// # Errors
/// Returns an error if the file cannot be read or the YAML cannot be parsed.
pub fn load_config(file: &str) -> Result<MediRagConfig, ConfigError> {
    info!("Loading config: {}", file);
    let content = fs::read_to_string(file).map_err(|source| ConfigError::Io {
        path: file.to_string(),
        source,
    })?;
    let mut config: MediRagConfig = serde_yaml::from_str(&content)?;
    config.apply_env_overrides();
    Ok(config)
}
