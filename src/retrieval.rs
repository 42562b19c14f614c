//! # Retrieval pipeline
//!
//! Owns the published index and the rebuild that replaces it.
//!
//! ## Snapshots
//! Chunks and their index are published together as one immutable
//! [`IndexSnapshot`] behind a `tokio::sync::RwLock`. Readers clone the `Arc` once per
//! request and never observe a half-built state. [`Pipeline::rebuild`] assembles a
//! complete new snapshot off to the side and swaps it in only when every step
//! succeeded; on failure the previous snapshot stays live.
//!
//! ## Concurrency
//! Rebuilds are serialised by a `tokio::sync::Mutex`. Record loading and chunking run
//! in `spawn_blocking` (chunking in parallel with `rayon`), embedding runs in
//! `spawn_blocking` under the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::*;

use crate::chunker::{Chunk, Chunker};
use crate::config::{IndexKind, MediRagConfig};
use crate::embeddings::{Embedder, check_vectors};
use crate::error::{EmbeddingError, IndexError, RebuildError, RetrievalError, StoreError};
use crate::models::Prediction;
use crate::records::RecordStore;
use crate::vector_store::{VectorIndex, build_index};

const EMBED_BATCH_SIZE: usize = 32;

/// Chunks and their index, published as one unit.
pub struct IndexSnapshot {
    pub version: u64,
    pub chunks: Vec<Chunk>,
    pub index: Box<dyn VectorIndex>,
    pub record_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    /// Map ranked positions to chunks, dropping positions outside the chunk array.
    fn resolve(&self, hits: Vec<crate::vector_store::Neighbor>) -> Vec<RetrievedChunk> {
        hits.into_iter()
            .filter_map(|n| {
                self.chunks.get(n.position).map(|chunk| RetrievedChunk {
                    chunk: chunk.clone(),
                    distance: n.distance,
                })
            })
            .collect()
    }
}

/// Outcome of a successful rebuild.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub version: u64,
    pub records: usize,
    pub chunks: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// Chunks ranked by ascending distance to the question.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Keep only the hits of `patient_id`, preserving rank order.
    pub fn for_patient(mut self, patient_id: &str) -> Self {
        self.hits.retain(|h| h.chunk.patient_id == patient_id);
        self
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.hits.iter().map(|h| h.chunk.clone()).collect()
    }
}

/// Loader → chunker → embedder → index, plus the published snapshot.
pub struct Pipeline {
    store: Arc<dyn RecordStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    index_kind: IndexKind,
    timeout: Duration,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
    writer: Mutex<u64>,
    progress: Option<ProgressBar>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        embedder: Arc<dyn Embedder>,
        config: &MediRagConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap),
            index_kind: config.index_kind,
            timeout: config.request_timeout(),
            snapshot: RwLock::new(None),
            writer: Mutex::new(0),
            progress: None,
        }
    }

    /// Report embedding progress on `bar` during rebuilds.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    pub fn chunker(&self) -> Chunker {
        self.chunker
    }

    /// The currently published snapshot, if any rebuild succeeded yet.
    pub async fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Rebuild chunks and index from the full record set and publish them.
    ///
    /// # Errors
    /// Any loading, embedding or index failure aborts the rebuild; the previously
    /// published snapshot is left untouched.
    pub async fn rebuild(&self) -> Result<RebuildReport, RebuildError> {
        let mut version = self.writer.lock().await;
        info!("Rebuilding index");

        let store = Arc::clone(&self.store);
        let chunker = self.chunker;
        let (record_count, chunks) = tokio::task::spawn_blocking(move || {
            load_and_chunk(store.as_ref(), chunker)
        })
        .await
        .map_err(|e| RebuildError::Task(e.to_string()))??;
        info!("{} chunks created for {} patients", chunks.len(), record_count);

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embed_all(texts).await?;
        let dimension = self.embedder.dimension();
        check_vectors(&vectors, chunks.len(), dimension)?;

        let kind = self.index_kind;
        let index = tokio::task::spawn_blocking(move || build_index(kind, dimension, vectors))
            .await
            .map_err(|e| RebuildError::Task(e.to_string()))??;
        if index.len() != chunks.len() {
            return Err(IndexError::Misaligned {
                vectors: index.len(),
                chunks: chunks.len(),
            }
            .into());
        }

        *version += 1;
        let report = RebuildReport {
            version: *version,
            records: record_count,
            chunks: chunks.len(),
        };
        let snapshot = IndexSnapshot {
            version: *version,
            chunks,
            index,
            record_count,
            built_at: Utc::now(),
        };
        *self.snapshot.write().await = Some(Arc::new(snapshot));
        info!(
            "Index v{} ready with {} chunks",
            report.version, report.chunks
        );
        Ok(report)
    }

    async fn embed_all(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let embedder = Arc::clone(&self.embedder);
        let progress = self.progress.clone();
        let task = tokio::task::spawn_blocking(move || {
            if let Some(bar) = progress.as_ref() {
                bar.set_length(texts.len() as u64);
                bar.set_position(0);
            }
            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(EMBED_BATCH_SIZE) {
                vectors.extend(embedder.embed(batch)?);
                if let Some(bar) = progress.as_ref() {
                    bar.inc(batch.len() as u64);
                }
            }
            if let Some(bar) = progress.as_ref() {
                bar.finish_and_clear();
            }
            Ok::<_, EmbeddingError>(vectors)
        });
        self.bounded(task).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let task = tokio::task::spawn_blocking(move || embedder.embed_one(&text));
        self.bounded(task).await
    }

    async fn bounded<T>(
        &self,
        task: tokio::task::JoinHandle<Result<T, EmbeddingError>>,
    ) -> Result<T, EmbeddingError> {
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(EmbeddingError::Task(join.to_string())),
            Err(_) => {
                error!("Embedding timed out after {:?}", self.timeout);
                Err(EmbeddingError::Timeout(self.timeout.as_secs()))
            }
        }
    }

    /// The `top_k` chunks nearest to `query`, nearest first.
    ///
    /// Returns an empty result when no index has been published yet.
    pub async fn search_relevant_chunks(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievalResult, RetrievalError> {
        let Some(snapshot) = self.snapshot().await else {
            warn!("Search requested before any index was built");
            return Ok(RetrievalResult::default());
        };
        if snapshot.chunks.is_empty() || top_k == 0 {
            return Ok(RetrievalResult::default());
        }

        let query_vector = self.embed_query(query).await?;
        let k = top_k.min(snapshot.chunks.len());
        let hits = snapshot.index.search(&query_vector, k)?;
        debug!("Retrieved {} chunks from index v{}", hits.len(), snapshot.version);
        Ok(RetrievalResult {
            hits: snapshot.resolve(hits),
        })
    }
}

/// Load every record and chunk it, in store order.
fn load_and_chunk(
    store: &dyn RecordStore,
    chunker: Chunker,
) -> Result<(usize, Vec<Chunk>), StoreError> {
    let records = store.load_all()?;
    let predictions: Vec<Prediction> = records
        .iter()
        .map(|r| {
            store.latest_prediction(r).unwrap_or_else(|e| {
                warn!("Prediction lookup for {} failed: {}", r.id, e);
                Prediction::Unavailable
            })
        })
        .collect();

    let per_record: Vec<Vec<Chunk>> = records
        .par_iter()
        .zip(predictions.par_iter())
        .map(|(record, prediction)| chunker.patient_chunks(record, prediction))
        .collect();

    Ok((records.len(), per_record.into_iter().flatten().collect()))
}
