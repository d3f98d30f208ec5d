//! Document store (C2): an HNSW index plus a metadata table keyed by
//! `(index, id)`. Mirrors the donor's `Memory`/`ThoughtChain` pattern of a
//! mutex-guarded in-memory table, generalized to carry embeddings.
//!
//! The store takes an [`EmbeddingClient`](crate::harness::embedding_client::EmbeddingClient)
//! by reference into the one method that needs it (`add_text`-style helpers
//! live on the conversation store and tools, not here) rather than holding an
//! owned or `Arc`'d reference to it — this breaks the cyclic-ownership shape
//! the design notes flag (the store must not reach back into a service
//! container to find its embedder).

use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::harness::error::HarnessError;
use crate::harness::vector_index::{IndexConfig, VectorIndexRegistry};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Document {
    pub id: u64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub timestamp: i64,
    pub doc_type: String,
    pub source: String,
    pub metadata: Json,
}

#[derive(Debug, Clone)]
pub struct DocumentSearchResult {
    pub document: Document,
    pub distance: f32,
}

struct IndexMeta {
    next_id: u64,
    by_id: HashMap<u64, Document>,
}

impl IndexMeta {
    fn new() -> Self {
        Self {
            next_id: 0,
            by_id: HashMap::new(),
        }
    }
}

/// The join of an HNSW index and a metadata table. Callers treat `name` as an
/// opaque namespace; the conversation store reserves `"conversations"`, the
/// memory tool reserves `"long_term_memory"`, the PDF ingest path reserves
/// `"documents"`.
pub struct DocumentStore {
    vectors: VectorIndexRegistry,
    meta: RwLock<HashMap<String, IndexMeta>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            vectors: VectorIndexRegistry::new(),
            meta: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent: creates the index and its metadata table if absent, no-op
    /// otherwise (even if `dim`/`max_elements` differ from the existing index —
    /// a configuration change requires an explicit `drop_index` first).
    pub fn ensure_index(&self, name: &str, dim: u32, max_elements: usize) {
        if !self.vectors.has_index(name) {
            let mut config = IndexConfig::new(dim);
            config.max_elements = max_elements;
            self.vectors.create_index(name, config);
        }
        self.meta
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(IndexMeta::new);
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.vectors.has_index(name)
    }

    pub fn list_indices(&self) -> Vec<String> {
        self.vectors.list_indices()
    }

    pub fn drop_index(&self, name: &str) {
        self.vectors.drop_index(name);
        self.meta.write().unwrap().remove(name);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        index: &str,
        content: String,
        embedding: Vec<f32>,
        doc_type: String,
        source: String,
        metadata: Json,
        timestamp: i64,
    ) -> Result<u64, HarnessError> {
        let mut meta_guard = self.meta.write().unwrap();
        let entry = meta_guard
            .get_mut(index)
            .ok_or_else(|| HarnessError::not_found(format!("no such index: {}", index)))?;
        let id = entry.next_id;
        self.vectors
            .with_index(index, |vi| vi.add(id, embedding.clone()))??;
        entry.next_id += 1;
        entry.by_id.insert(
            id,
            Document {
                id,
                content,
                embedding,
                timestamp,
                doc_type,
                source,
                metadata,
            },
        );
        Ok(id)
    }

    pub fn get(&self, index: &str, id: u64) -> Option<Document> {
        self.meta.read().unwrap().get(index)?.by_id.get(&id).cloned()
    }

    pub fn update(
        &self,
        index: &str,
        id: u64,
        content: String,
        embedding: Vec<f32>,
    ) -> Result<(), HarnessError> {
        self.vectors
            .with_index(index, |vi| vi.update(id, embedding.clone()))??;
        let mut meta_guard = self.meta.write().unwrap();
        let entry = meta_guard
            .get_mut(index)
            .ok_or_else(|| HarnessError::not_found(format!("no such index: {}", index)))?;
        let doc = entry
            .by_id
            .get_mut(&id)
            .ok_or_else(|| HarnessError::not_found(format!("no such document: {}", id)))?;
        doc.content = content;
        doc.embedding = embedding;
        Ok(())
    }

    pub fn delete(&self, index: &str, id: u64) -> Result<(), HarnessError> {
        self.vectors.with_index(index, |vi| vi.delete(id))??;
        self.meta
            .write()
            .unwrap()
            .get_mut(index)
            .ok_or_else(|| HarnessError::not_found(format!("no such index: {}", index)))?
            .by_id
            .remove(&id);
        Ok(())
    }

    /// ANN search joined back to documents. Tolerant to missing metadata —
    /// a label with no metadata record (shouldn't happen, but §4.2's
    /// invariant is a promise, not an enforced constraint on every code path)
    /// is silently skipped rather than surfaced as an error.
    pub fn search(
        &self,
        index: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<DocumentSearchResult>, HarnessError> {
        let hits = self
            .vectors
            .with_index(index, |vi| vi.search(query_embedding, k))??;
        let meta_guard = self.meta.read().unwrap();
        let Some(entry) = meta_guard.get(index) else {
            return Ok(Vec::new());
        };
        Ok(hits
            .into_iter()
            .filter_map(|(label, distance)| {
                entry.by_id.get(&label).map(|doc| DocumentSearchResult {
                    document: doc.clone(),
                    distance,
                })
            })
            .collect())
    }

    /// Chronological scan within `[start, end]`, ascending by timestamp, up to
    /// `limit` results.
    pub fn search_by_time(
        &self,
        index: &str,
        start: i64,
        end: i64,
        limit: usize,
    ) -> Vec<Document> {
        let meta_guard = self.meta.read().unwrap();
        let Some(entry) = meta_guard.get(index) else {
            return Vec::new();
        };
        let mut docs: Vec<Document> = entry
            .by_id
            .values()
            .filter(|d| d.timestamp >= start && d.timestamp <= end)
            .cloned()
            .collect();
        docs.sort_by_key(|d| (d.timestamp, d.id));
        docs.truncate(limit);
        docs
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_then_get_round_trips_content_and_embedding() {
        let store = DocumentStore::new();
        store.ensure_index("docs", 3, 1000);
        let id = store
            .add(
                "docs",
                "hello".to_string(),
                vec![1.0, 0.0, 0.0],
                "note".to_string(),
                "test".to_string(),
                json!({}),
                100,
            )
            .unwrap();
        let doc = store.get("docs", id).unwrap();
        assert_eq!(doc.content, "hello");
        assert_eq!(doc.embedding, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn search_by_time_is_chronological_and_bounded() {
        let store = DocumentStore::new();
        store.ensure_index("docs", 2, 1000);
        for (t, c) in [(10, "a"), (30, "c"), (20, "b")] {
            store
                .add(
                    "docs",
                    c.to_string(),
                    vec![0.0, 0.0],
                    "note".to_string(),
                    "test".to_string(),
                    json!({}),
                    t,
                )
                .unwrap();
        }
        let results = store.search_by_time("docs", 0, 100, 10);
        let contents: Vec<&str> = results.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn delete_removes_from_both_vector_index_and_metadata() {
        let store = DocumentStore::new();
        store.ensure_index("docs", 2, 1000);
        let id = store
            .add(
                "docs",
                "x".to_string(),
                vec![1.0, 1.0],
                "note".to_string(),
                "test".to_string(),
                json!({}),
                0,
            )
            .unwrap();
        store.delete("docs", id).unwrap();
        assert!(store.get("docs", id).is_none());
    }
}
