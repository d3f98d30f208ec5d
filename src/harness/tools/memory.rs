//! `remember`/`recall_memories`/`forget_memory` tools (C7), backed by the
//! reserved `"long_term_memory"` index on [`DocumentStore`]. Grounded in the
//! donor's `Memory` tool (`src/cloudllm/tools/memory.rs`) — a simple
//! key/value store with TTL — generalized from key/value recall to semantic
//! recall, since the spec's long-term memory is retrieved by meaning rather
//! than by an exact key.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::harness::document_store::DocumentStore;
use crate::harness::embedding_client::EmbeddingClient;
use crate::harness::tool_registry::{ToolExecutor, ToolOutcome};

pub const LONG_TERM_MEMORY_INDEX: &str = "long_term_memory";

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Deserialize)]
struct RememberArgs {
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// `remember`: stores a fact. Degrades gracefully when no embedder is
/// configured by inserting a zero vector — the fact is still retrievable by
/// [`crate::harness::document_store::DocumentStore::search_by_time`], just
/// not by semantic similarity, per §4.3's degrade-gracefully contract.
pub struct RememberTool {
    store: std::sync::Arc<DocumentStore>,
    embedder: std::sync::Arc<EmbeddingClient>,
}

impl RememberTool {
    pub fn new(store: std::sync::Arc<DocumentStore>, embedder: std::sync::Arc<EmbeddingClient>) -> Self {
        store.ensure_index(LONG_TERM_MEMORY_INDEX, embedder.dimension(), 1_000_000);
        Self { store, embedder }
    }
}

#[async_trait]
impl ToolExecutor for RememberTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: RememberArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let embedding = if self.embedder.is_configured() {
            match self.embedder.embed(&args.content).await {
                Ok(v) => v,
                Err(e) => return ToolOutcome::err(format!("failed to embed memory: {}", e)),
            }
        } else {
            self.embedder.zero_vector()
        };
        let metadata = json!({ "tags": args.tags });
        match self.store.add(
            LONG_TERM_MEMORY_INDEX,
            args.content,
            embedding,
            "long_term_memory".to_string(),
            "remember_tool".to_string(),
            metadata.clone(),
            now(),
        ) {
            Ok(id) => ToolOutcome::ok(json!({ "memory_id": id, "metadata": metadata })),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct RecallArgs {
    query: String,
    #[serde(default = "default_k")]
    k: usize,
}

fn default_k() -> usize {
    5
}

/// `recall_memories`: semantic search over stored facts. Refuses outright
/// (rather than silently falling back to chronological scan) when the
/// embedder isn't configured — unlike `remember`, a recall result set built
/// from zero-vector "similarity" would be meaningless noise, not a degraded
/// but honest answer.
pub struct RecallMemoriesTool {
    store: std::sync::Arc<DocumentStore>,
    embedder: std::sync::Arc<EmbeddingClient>,
}

impl RecallMemoriesTool {
    pub fn new(store: std::sync::Arc<DocumentStore>, embedder: std::sync::Arc<EmbeddingClient>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl ToolExecutor for RecallMemoriesTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: RecallArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        if !self.embedder.is_configured() {
            return ToolOutcome::err(
                "recall_memories requires an embedding client, none is configured",
            );
        }
        let query_embedding = match self.embedder.embed(&args.query).await {
            Ok(v) => v,
            Err(e) => return ToolOutcome::err(format!("failed to embed query: {}", e)),
        };
        match self.store.search(LONG_TERM_MEMORY_INDEX, &query_embedding, args.k) {
            Ok(hits) => {
                let memories: Vec<_> = hits.into_iter().map(memory_hit_to_json).collect();
                ToolOutcome::ok(json!({ "memories": memories }))
            }
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

/// Projects a document search hit onto the §4.7 `recall_memories` wire shape.
/// Similarity score is `1 - distance`, so closer matches score higher.
fn memory_hit_to_json(h: crate::harness::document_store::DocumentSearchResult) -> serde_json::Value {
    json!({
        "memory_id": h.document.id,
        "score": 1.0 - h.distance,
        "content": h.document.content,
        "type": h.document.doc_type,
        "metadata": h.document.metadata,
    })
}

#[derive(Deserialize)]
struct ForgetArgs {
    memory_id: u64,
}

/// `forget_memory`: a pure delete, no semantic step involved.
pub struct ForgetMemoryTool {
    store: std::sync::Arc<DocumentStore>,
}

impl ForgetMemoryTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for ForgetMemoryTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: ForgetArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let preview = self
            .store
            .get(LONG_TERM_MEMORY_INDEX, args.memory_id)
            .map(|doc| content_preview(&doc.content))
            .unwrap_or_default();
        match self.store.delete(LONG_TERM_MEMORY_INDEX, args.memory_id) {
            Ok(()) => ToolOutcome::ok(json!({
                "memory_id": args.memory_id,
                "deleted": { "preview": preview },
            })),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

/// A short, human-readable preview of a deleted memory's content (§4.7's
/// `deleted.preview`), truncated so a long fact doesn't bloat the tool
/// result the model sees back.
fn content_preview(content: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 120;
    if content.chars().count() <= MAX_PREVIEW_CHARS {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{}…", truncated)
    }
}

pub fn remember_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "content": {"type": "string", "description": "The fact to remember"},
            "tags": {"type": "array", "items": {"type": "string"}, "description": "Optional tags"},
        },
        "required": ["content"],
    })
}

pub fn recall_memories_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "What to recall"},
            "k": {"type": "number", "description": "Number of results", "default": 5},
        },
        "required": ["query"],
    })
}

pub fn forget_memory_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "memory_id": {"type": "number", "description": "Id returned by remember"},
        },
        "required": ["memory_id"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconfigured_embedder() -> std::sync::Arc<EmbeddingClient> {
        std::sync::Arc::new(EmbeddingClient::new(
            None,
            "http://localhost".to_string(),
            "test".to_string(),
            4,
        ))
    }

    #[tokio::test]
    async fn remember_degrades_gracefully_without_embedder() {
        let store = std::sync::Arc::new(DocumentStore::new());
        let embedder = unconfigured_embedder();
        let tool = RememberTool::new(store, embedder);
        let outcome = tool
            .execute(r#"{"content": "the sky is blue", "tags": ["weather"]}"#)
            .await;
        match outcome {
            ToolOutcome::Ok(payload) => {
                assert!(payload["memory_id"].is_u64());
                assert_eq!(payload["metadata"]["tags"], json!(["weather"]));
            }
            ToolOutcome::Err(e) => panic!("expected success, got {}", e),
        }
    }

    #[tokio::test]
    async fn recall_refuses_without_embedder() {
        let store = std::sync::Arc::new(DocumentStore::new());
        let embedder = unconfigured_embedder();
        store.ensure_index(LONG_TERM_MEMORY_INDEX, embedder.dimension(), 1000);
        let tool = RecallMemoriesTool::new(store, embedder);
        let outcome = tool.execute(r#"{"query": "sky"}"#).await;
        assert!(matches!(outcome, ToolOutcome::Err(_)));
    }

    #[test]
    fn recall_hit_projects_score_type_and_metadata() {
        use crate::harness::document_store::{Document, DocumentSearchResult};

        let hit = DocumentSearchResult {
            document: Document {
                id: 7,
                content: "the sky is blue".to_string(),
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                timestamp: now(),
                doc_type: "long_term_memory".to_string(),
                source: "remember_tool".to_string(),
                metadata: json!({ "tags": ["weather"] }),
            },
            distance: 0.25,
        };
        let memory = memory_hit_to_json(hit);
        assert_eq!(memory["memory_id"], json!(7));
        assert_eq!(memory["score"], json!(0.75));
        assert_eq!(memory["type"], json!("long_term_memory"));
        assert_eq!(memory["metadata"]["tags"], json!(["weather"]));
    }

    #[tokio::test]
    async fn forget_removes_a_memory() {
        let store = std::sync::Arc::new(DocumentStore::new());
        let embedder = unconfigured_embedder();
        let remember = RememberTool::new(store.clone(), embedder);
        let outcome = remember.execute(r#"{"content": "the quick fact"}"#).await;
        let id = match outcome {
            ToolOutcome::Ok(payload) => payload["memory_id"].as_u64().unwrap(),
            ToolOutcome::Err(e) => panic!("expected success, got {}", e),
        };
        let forget = ForgetMemoryTool::new(store.clone());
        let outcome = forget.execute(&format!(r#"{{"memory_id": {}}}"#, id)).await;
        match outcome {
            ToolOutcome::Ok(payload) => {
                assert_eq!(payload["memory_id"], json!(id));
                assert_eq!(payload["deleted"]["preview"], json!("the quick fact"));
            }
            ToolOutcome::Err(e) => panic!("expected success, got {}", e),
        }
        assert!(store.get(LONG_TERM_MEMORY_INDEX, id).is_none());
    }
}
