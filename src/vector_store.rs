//! # Vector index
//!
//! Nearest-neighbour search over chunk embeddings by squared Euclidean distance.
//!
//! Two backends implement [`VectorIndex`]:
//!
//! - [`FlatIndex`]: exact brute-force scan. The default.
//! - [`HnswIndex`]: a [HNSW](https://arxiv.org/abs/1603.09320) graph from the `hora`
//!   crate. Candidates it returns are re-scored exactly so results keep the same
//!   ordering contract as the flat index.
//!
//! Results are ascending by distance with ties broken by insertion position. `k` is
//! clamped to the index size. An index is never updated in place: a rebuild creates a
//! new one with [`build_index`].
//!
//! ## Quick Example
//! ```
//! use medirag::config::IndexKind;
//! use medirag::vector_store::build_index;
//!
//! let vectors = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![5.0, 5.0]];
//! let index = build_index(IndexKind::Flat, 2, vectors).unwrap();
//! let hits = index.search(&[0.9, 0.0], 2).unwrap();
//! assert_eq!(hits[0].position, 1);
//! assert_eq!(hits.len(), 2);
//! ```

use std::cmp::Ordering;

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::Serialize;

use crate::config::IndexKind;
use crate::error::IndexError;

/// One search hit: squared L2 distance and the position of the vector at build time.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32,
    pub position: usize,
}

/// Read-only k-NN index.
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> usize;

    /// Up to `min(k, len)` neighbours of `query`, nearest first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError>;
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn by_distance_then_position(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .partial_cmp(&b.distance)
        .unwrap_or(Ordering::Equal)
        .then(a.position.cmp(&b.position))
}

fn check_dimension(expected: usize, got: usize) -> Result<(), IndexError> {
    if expected != got {
        return Err(IndexError::DimensionMismatch { expected, got });
    }
    Ok(())
}

/// Rank `candidates` exactly against `query` and keep the best `k`.
fn rank_exact(
    vectors: &[Vec<f32>],
    query: &[f32],
    candidates: impl Iterator<Item = usize>,
    k: usize,
) -> Vec<Neighbor> {
    let mut hits: Vec<Neighbor> = candidates
        .filter(|&p| p < vectors.len())
        .map(|position| Neighbor {
            distance: squared_l2(&vectors[position], query),
            position,
        })
        .collect();
    hits.sort_by(by_distance_then_position);
    hits.dedup_by_key(|n| n.position);
    hits.truncate(k);
    hits
}

/// Exact index: every query scans all vectors.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn build(dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        for v in &vectors {
            check_dimension(dimension, v.len())?;
        }
        Ok(Self { dimension, vectors })
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        check_dimension(self.dimension, query.len())?;
        let k = k.min(self.vectors.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        Ok(rank_exact(&self.vectors, query, 0..self.vectors.len(), k))
    }
}

/// Approximate index over a `hora` HNSW graph.
///
/// The vectors are kept alongside the graph for exact re-scoring of candidates.
pub struct HnswIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    graph: Option<HNSWIndex<f32, usize>>,
}

impl HnswIndex {
    /// Insert every vector with its position as id, then build the graph.
    pub fn build(dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        for v in &vectors {
            check_dimension(dimension, v.len())?;
        }
        if vectors.is_empty() {
            return Ok(Self {
                dimension,
                vectors,
                graph: None,
            });
        }

        let mut graph = HNSWIndex::<f32, usize>::new(dimension, &HNSWParams::<f32>::default());
        for (position, v) in vectors.iter().enumerate() {
            graph.add(v, position).map_err(IndexError::Backend)?;
        }
        graph.build(Metric::Euclidean).map_err(IndexError::Backend)?;

        Ok(Self {
            dimension,
            vectors,
            graph: Some(graph),
        })
    }

    // Over-fetch so exact re-ranking can correct the graph's approximate order.
    fn candidate_count(&self, k: usize) -> usize {
        (k * 4).max(k + 16).min(self.vectors.len())
    }
}

impl VectorIndex for HnswIndex {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        check_dimension(self.dimension, query.len())?;
        let k = k.min(self.vectors.len());
        let Some(graph) = self.graph.as_ref() else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = graph.search(query, self.candidate_count(k));
        Ok(rank_exact(&self.vectors, query, candidates.into_iter(), k))
    }
}

/// Build the index backend selected by `kind`.
pub fn build_index(
    kind: IndexKind,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Box<dyn VectorIndex>, IndexError> {
    Ok(match kind {
        IndexKind::Flat => Box::new(FlatIndex::build(dimension, vectors)?),
        IndexKind::Hnsw => Box::new(HnswIndex::build(dimension, vectors)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Vec<f32>> {
        (0..20).map(|i| vec![i as f32, (i % 3) as f32]).collect()
    }

    #[test]
    fn flat_search_is_exact_and_ordered() {
        let index = FlatIndex::build(2, grid()).unwrap();
        let hits = index.search(&[4.2, 1.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].position, 4);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn ties_follow_insertion_order() {
        let index = FlatIndex::build(1, vec![vec![1.0], vec![-1.0], vec![1.0]]).unwrap();
        let hits = index.search(&[0.0], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|n| n.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn k_is_clamped_to_size() {
        let index = FlatIndex::build(2, grid()).unwrap();
        assert_eq!(index.search(&[0.0, 0.0], 100).unwrap().len(), 20);
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = FlatIndex::build(2, grid()).unwrap();
        assert!(matches!(
            index.search(&[0.0], 1),
            Err(IndexError::DimensionMismatch { expected: 2, got: 1 })
        ));
        assert!(FlatIndex::build(3, grid()).is_err());
    }

    #[test]
    fn hnsw_matches_flat_on_small_sets() {
        let flat = build_index(IndexKind::Flat, 2, grid()).unwrap();
        let hnsw = build_index(IndexKind::Hnsw, 2, grid()).unwrap();
        let q = [7.4, 0.5];
        let a: Vec<usize> = flat.search(&q, 3).unwrap().iter().map(|n| n.position).collect();
        let b: Vec<usize> = hnsw.search(&q, 3).unwrap().iter().map(|n| n.position).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_indexes_return_nothing() {
        for kind in [IndexKind::Flat, IndexKind::Hnsw] {
            let index = build_index(kind, 4, Vec::new()).unwrap();
            assert!(index.is_empty());
            assert!(index.search(&[0.0; 4], 5).unwrap().is_empty());
        }
    }
}
