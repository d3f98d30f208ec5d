//! HNSW approximate nearest-neighbor index (C1).
//!
//! `instant-distance` builds a static point set per `Hnsw` instance — it has
//! no incremental insert/delete. We wrap it with a rebuild-on-mutation
//! strategy: live vectors are kept in an ordinary map, and a fresh `Hnsw` is
//! (re)built lazily, the first time `search` is called after a mutation. This
//! keeps `add`/`update`/`delete` O(1) and pays the O(n log n) graph-build cost
//! only on the next query, amortizing it across bursts of writes (e.g. a PDF
//! ingest that chunks a document into fifty inserts before anyone searches).
//! Concurrent searches are safe (shared read lock); a write takes the
//! exclusive lock, matching the "tolerates concurrent searches, serializes
//! writes" resource-model requirement.

use instant_distance::{Builder, HnswMap, Search};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::harness::error::HarnessError;

/// Distance metric an index is created with. Fixed for the lifetime of the
/// index; mixing metrics within one index is a programming error the caller
/// must not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    L2,
    Cosine,
    InnerProduct,
}

/// Immutable configuration an index is created with.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub dimension: u32,
    pub max_elements: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub seed: u64,
    pub metric: Metric,
}

impl IndexConfig {
    pub fn new(dimension: u32) -> Self {
        Self {
            dimension,
            max_elements: 100_000,
            m: 16,
            ef_construction: 200,
            seed: 0xC10D11,
            metric: Metric::Cosine,
        }
    }
}

#[derive(Debug, Clone)]
struct Point {
    dims: Vec<f32>,
    metric: Metric,
}

impl instant_distance::Point for Point {
    fn distance(&self, other: &Self) -> f32 {
        match self.metric {
            Metric::L2 => self
                .dims
                .iter()
                .zip(other.dims.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt(),
            Metric::Cosine => {
                let dot: f32 = self
                    .dims
                    .iter()
                    .zip(other.dims.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                let na: f32 = self.dims.iter().map(|a| a * a).sum::<f32>().sqrt();
                let nb: f32 = other.dims.iter().map(|b| b * b).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
            Metric::InnerProduct => {
                let dot: f32 = self
                    .dims
                    .iter()
                    .zip(other.dims.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                -dot
            }
        }
    }
}

struct BuiltGraph {
    hnsw: HnswMap<Point, u64>,
}

/// A single named HNSW index. Vectors are tagged with caller-assigned `u64`
/// labels (the document store uses its document id as the label).
pub struct VectorIndex {
    config: IndexConfig,
    live: RwLock<HashMap<u64, Vec<f32>>>,
    graph: RwLock<Option<BuiltGraph>>,
}

impl VectorIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            live: RwLock::new(HashMap::new()),
            graph: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn check_dimension(&self, vec: &[f32]) -> Result<(), HarnessError> {
        if vec.len() != self.config.dimension as usize {
            return Err(HarnessError::invalid_argument(format!(
                "expected {}-dimensional vector, got {}",
                self.config.dimension,
                vec.len()
            )));
        }
        Ok(())
    }

    /// Insert a new vector under `label`. Fails if `label` already present.
    pub fn add(&self, label: u64, vec: Vec<f32>) -> Result<(), HarnessError> {
        self.check_dimension(&vec)?;
        let mut live = self.live.write().unwrap();
        if live.contains_key(&label) {
            return Err(HarnessError::invalid_argument(format!(
                "label {} already present",
                label
            )));
        }
        live.insert(label, vec);
        *self.graph.write().unwrap() = None;
        Ok(())
    }

    /// Replace the vector stored under `label`. Fails if `label` absent.
    pub fn update(&self, label: u64, vec: Vec<f32>) -> Result<(), HarnessError> {
        self.check_dimension(&vec)?;
        let mut live = self.live.write().unwrap();
        if !live.contains_key(&label) {
            return Err(HarnessError::not_found(format!(
                "label {} not present",
                label
            )));
        }
        live.insert(label, vec);
        *self.graph.write().unwrap() = None;
        Ok(())
    }

    pub fn delete(&self, label: u64) -> Result<(), HarnessError> {
        let mut live = self.live.write().unwrap();
        if live.remove(&label).is_none() {
            return Err(HarnessError::not_found(format!(
                "label {} not present",
                label
            )));
        }
        *self.graph.write().unwrap() = None;
        Ok(())
    }

    pub fn get(&self, label: u64) -> Option<Vec<f32>> {
        self.live.read().unwrap().get(&label).cloned()
    }

    pub fn size(&self) -> usize {
        self.live.read().unwrap().len()
    }

    /// Rebuild the HNSW graph from the current live set if it's stale
    /// (i.e. a mutation happened since the last build).
    fn ensure_built(&self) {
        {
            if self.graph.read().unwrap().is_some() {
                return;
            }
        }
        let mut graph = self.graph.write().unwrap();
        if graph.is_some() {
            return; // another thread rebuilt while we waited for the lock
        }
        let live = self.live.read().unwrap();
        if live.is_empty() {
            return;
        }
        let (labels, points): (Vec<u64>, Vec<Point>) = live
            .iter()
            .map(|(label, dims)| {
                (
                    *label,
                    Point {
                        dims: dims.clone(),
                        metric: self.config.metric,
                    },
                )
            })
            .unzip();
        let hnsw = Builder::default()
            .seed(self.config.seed)
            .ef_construction(self.config.ef_construction as u32)
            .build(points, labels);
        *graph = Some(BuiltGraph { hnsw });
    }

    /// Search for the `k` nearest neighbors of `query`, ascending by distance.
    /// Returns fewer than `k` results if the index has fewer live elements.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>, HarnessError> {
        self.check_dimension(query)?;
        if k == 0 || self.size() == 0 {
            return Ok(Vec::new());
        }
        self.ensure_built();
        let graph = self.graph.read().unwrap();
        let Some(built) = graph.as_ref() else {
            return Ok(Vec::new());
        };
        let query_point = Point {
            dims: query.to_vec(),
            metric: self.config.metric,
        };
        let mut search = Search::default();
        let results: Vec<(u64, f32)> = built
            .hnsw
            .search(&query_point, &mut search)
            .take(k)
            .map(|item| (*item.value, item.distance))
            .collect();
        Ok(results)
    }
}

/// A named collection of [`VectorIndex`] instances. Operations mirror the C1
/// contract: `create_index`, `drop_index`, `has_index`, `list_indices`, plus
/// per-index `add`/`update`/`delete`/`get`/`search`/`size` delegated through.
pub struct VectorIndexRegistry {
    indices: RwLock<HashMap<String, VectorIndex>>,
}

impl VectorIndexRegistry {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_index(&self, name: &str, config: IndexConfig) {
        self.indices
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| VectorIndex::new(config));
    }

    pub fn drop_index(&self, name: &str) {
        self.indices.write().unwrap().remove(name);
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indices.read().unwrap().contains_key(name)
    }

    pub fn list_indices(&self) -> Vec<String> {
        self.indices.read().unwrap().keys().cloned().collect()
    }

    pub fn with_index<R>(
        &self,
        name: &str,
        f: impl FnOnce(&VectorIndex) -> R,
    ) -> Result<R, HarnessError> {
        let indices = self.indices.read().unwrap();
        let index = indices
            .get(name)
            .ok_or_else(|| HarnessError::not_found(format!("no such index: {}", name)))?;
        Ok(f(index))
    }
}

impl Default for VectorIndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_search_returns_self_at_zero_distance() {
        let index = VectorIndex::new(IndexConfig::new(3));
        index.add(1, vec![1.0, 0.0, 0.0]).unwrap();
        index.add(2, vec![0.0, 1.0, 0.0]).unwrap();
        let results = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, 1);
        assert!(results[0].1 < 1e-4);
    }

    #[test]
    fn add_twice_fails() {
        let index = VectorIndex::new(IndexConfig::new(2));
        index.add(1, vec![1.0, 1.0]).unwrap();
        assert!(index.add(1, vec![2.0, 2.0]).is_err());
    }

    #[test]
    fn update_absent_fails() {
        let index = VectorIndex::new(IndexConfig::new(2));
        assert!(index.update(1, vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn delete_then_search_excludes_label() {
        let index = VectorIndex::new(IndexConfig::new(2));
        index.add(1, vec![1.0, 0.0]).unwrap();
        index.add(2, vec![0.0, 1.0]).unwrap();
        index.delete(1).unwrap();
        let results = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn search_returns_fewer_than_k_when_sparse() {
        let index = VectorIndex::new(IndexConfig::new(2));
        index.add(1, vec![1.0, 0.0]).unwrap();
        let results = index.search(&[1.0, 0.0], 5).unwrap();
        assert_eq!(results.len(), 1);
    }
}
