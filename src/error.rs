//! # Error types
//!
//! One error enum per component boundary. Recoverable errors are absorbed
//! where the boundary says so (see [`crate::service`]); only
//! [`ConfigError`] is allowed to stop the process.

use thiserror::Error;

/// Configuration could not be loaded or is unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The completion backend cannot be reached without credentials.
    #[error("api_key is missing (set it in the config file or MEDIRAG_API_KEY)")]
    MissingApiKey,

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unable to determine config directory")]
    NoConfigDir,
}

/// The external record store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to connect to {url}: {message}")]
    Connection { url: String, message: String },

    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

/// The embedding capability failed.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model error: {0}")]
    Model(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("embedder returned {got} vectors for {expected} texts")]
    Count { expected: usize, got: usize },

    #[error("embedding timed out after {0}s")]
    Timeout(u64),

    #[error("embedding task failed: {0}")]
    Task(String),
}

/// The vector index could not be built or queried.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index backend error: {0}")]
    Backend(&'static str),

    #[error("index holds {vectors} vectors for {chunks} chunks")]
    Misaligned { vectors: usize, chunks: usize },
}

/// The generative capability failed.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("completion request failed: {0}")]
    Api(#[from] async_openai::error::OpenAIError),

    #[error("completion backend returned no content")]
    EmptyResponse,

    #[error("completion timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

/// A rebuild was aborted; the previously published snapshot stays live.
#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("loading records failed: {0}")]
    Store(#[from] StoreError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index build failed: {0}")]
    Index(#[from] IndexError),

    #[error("rebuild task failed: {0}")]
    Task(String),
}

/// A question could not be matched against the index.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index search failed: {0}")]
    Index(#[from] IndexError),
}

/// A request was rejected at a boundary.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("case {0} not found")]
    CaseNotFound(String),

    #[error("no case identifier given and no patient named in the message")]
    MissingCase,
}
