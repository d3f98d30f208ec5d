//! The `vector_db_*` tool family (C7): thirteen operations over
//! [`DocumentStore`]/[`VectorIndexRegistry`], each its own [`ToolExecutor`] so
//! the registry's per-tool dispatch, rate limiting, and schema rendering all
//! apply uniformly — mirroring how the donor splits `BashTool`/`CalculatorTool`
//! into one executor per capability rather than one mega-tool with an
//! internal `op` field.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::harness::document_store::DocumentStore;
use crate::harness::embedding_client::EmbeddingClient;
use crate::harness::tool_registry::{ToolExecutor, ToolOutcome};
use crate::harness::tools::pdf::{PdfExtractTextTool, PdfExtractor};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn doc_json(doc: &crate::harness::document_store::Document) -> serde_json::Value {
    json!({
        "id": doc.id,
        "content": doc.content,
        "doc_type": doc.doc_type,
        "source": doc.source,
        "metadata": doc.metadata,
        "timestamp": doc.timestamp,
    })
}

#[derive(Deserialize)]
struct CreateIndexArgs {
    name: String,
    dimension: u32,
    #[serde(default = "default_max_elements")]
    max_elements: usize,
}

fn default_max_elements() -> usize {
    100_000
}

pub struct CreateIndexTool {
    store: std::sync::Arc<DocumentStore>,
}

impl CreateIndexTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for CreateIndexTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: CreateIndexArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        if self.store.has_index(&args.name) {
            return ToolOutcome::err(format!("index {} already exists", args.name));
        }
        self.store.ensure_index(&args.name, args.dimension, args.max_elements);
        ToolOutcome::ok(json!({ "created": args.name }))
    }
}

#[derive(Deserialize)]
struct IndexNameArgs {
    name: String,
}

pub struct DeleteIndexTool {
    store: std::sync::Arc<DocumentStore>,
}

impl DeleteIndexTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for DeleteIndexTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: IndexNameArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        if !self.store.has_index(&args.name) {
            return ToolOutcome::err(format!("no such index: {}", args.name));
        }
        self.store.drop_index(&args.name);
        ToolOutcome::ok(json!({ "deleted": args.name }))
    }
}

pub struct ListIndicesTool {
    store: std::sync::Arc<DocumentStore>,
}

impl ListIndicesTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for ListIndicesTool {
    async fn execute(&self, _arguments: &str) -> ToolOutcome {
        ToolOutcome::ok(json!({ "indices": self.store.list_indices() }))
    }
}

#[derive(Deserialize)]
struct AddVectorArgs {
    index: String,
    vector: Vec<f32>,
    content: String,
    #[serde(default)]
    doc_type: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub struct AddVectorTool {
    store: std::sync::Arc<DocumentStore>,
}

impl AddVectorTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for AddVectorTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: AddVectorArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        match self.store.add(
            &args.index,
            args.content,
            args.vector,
            if args.doc_type.is_empty() { "vector".to_string() } else { args.doc_type },
            if args.source.is_empty() { "vector_db_add_vector".to_string() } else { args.source },
            if args.metadata.is_null() { json!({}) } else { args.metadata },
            now(),
        ) {
            Ok(id) => ToolOutcome::ok(json!({ "id": id })),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct UpdateVectorArgs {
    index: String,
    id: u64,
    vector: Vec<f32>,
    content: String,
}

pub struct UpdateVectorTool {
    store: std::sync::Arc<DocumentStore>,
}

impl UpdateVectorTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for UpdateVectorTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: UpdateVectorArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        match self.store.update(&args.index, args.id, args.content, args.vector) {
            Ok(()) => ToolOutcome::ok(json!({ "updated": args.id })),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct VectorIdArgs {
    index: String,
    id: u64,
}

pub struct DeleteVectorTool {
    store: std::sync::Arc<DocumentStore>,
}

impl DeleteVectorTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for DeleteVectorTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: VectorIdArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        match self.store.delete(&args.index, args.id) {
            Ok(()) => ToolOutcome::ok(json!({ "deleted": args.id })),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

pub struct GetVectorTool {
    store: std::sync::Arc<DocumentStore>,
}

impl GetVectorTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for GetVectorTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: VectorIdArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        match self.store.get(&args.index, args.id) {
            Some(doc) => ToolOutcome::ok(doc_json(&doc)),
            None => ToolOutcome::err(format!("no such vector: {}", args.id)),
        }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    index: String,
    vector: Vec<f32>,
    #[serde(default = "default_k")]
    k: usize,
}

fn default_k() -> usize {
    5
}

pub struct SearchTool {
    store: std::sync::Arc<DocumentStore>,
}

impl SearchTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for SearchTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: SearchArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        match self.store.search(&args.index, &args.vector, args.k) {
            Ok(hits) => {
                let results: Vec<_> = hits
                    .into_iter()
                    .map(|h| {
                        let mut j = doc_json(&h.document);
                        j["distance"] = json!(h.distance);
                        j
                    })
                    .collect();
                ToolOutcome::ok(json!({ "results": results }))
            }
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct AddTextArgs {
    index: String,
    content: String,
    #[serde(default)]
    doc_type: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// `vector_db_add_text`: embeds `content` before storing, unlike
/// `add_vector` which takes a caller-supplied vector directly.
pub struct AddTextTool {
    store: std::sync::Arc<DocumentStore>,
    embedder: std::sync::Arc<EmbeddingClient>,
}

impl AddTextTool {
    pub fn new(store: std::sync::Arc<DocumentStore>, embedder: std::sync::Arc<EmbeddingClient>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl ToolExecutor for AddTextTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: AddTextArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let embedding = if self.embedder.is_configured() {
            match self.embedder.embed(&args.content).await {
                Ok(v) => v,
                Err(e) => return ToolOutcome::err(format!("failed to embed text: {}", e)),
            }
        } else {
            self.embedder.zero_vector()
        };
        match self.store.add(
            &args.index,
            args.content,
            embedding,
            if args.doc_type.is_empty() { "text".to_string() } else { args.doc_type },
            if args.source.is_empty() { "vector_db_add_text".to_string() } else { args.source },
            if args.metadata.is_null() { json!({}) } else { args.metadata },
            now(),
        ) {
            Ok(id) => ToolOutcome::ok(json!({ "id": id })),
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct AddChunkedTextArgs {
    index: String,
    content: String,
    #[serde(default = "default_chunk_chars")]
    chunk_chars: usize,
    #[serde(default = "default_chunk_overlap")]
    chunk_overlap: usize,
    #[serde(default)]
    source: String,
}

fn default_chunk_chars() -> usize {
    1500
}

fn default_chunk_overlap() -> usize {
    300
}

/// `vector_db_add_chunked_text`: the same chunker `pdf_extract_text` uses
/// (module-private there), re-implemented against caller-supplied chunk
/// sizing since this entry point lets a caller override the defaults.
pub struct AddChunkedTextTool {
    store: std::sync::Arc<DocumentStore>,
    embedder: std::sync::Arc<EmbeddingClient>,
}

impl AddChunkedTextTool {
    pub fn new(store: std::sync::Arc<DocumentStore>, embedder: std::sync::Arc<EmbeddingClient>) -> Self {
        Self { store, embedder }
    }
}

fn chunk(text: &str, chunk_chars: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let stride = chunk_chars.saturating_sub(chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[async_trait]
impl ToolExecutor for AddChunkedTextTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: AddChunkedTextArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let chunks = chunk(&args.content, args.chunk_chars, args.chunk_overlap);
        let mut ids = Vec::with_capacity(chunks.len());
        for (i, c) in chunks.iter().enumerate() {
            let embedding = if self.embedder.is_configured() {
                match self.embedder.embed(c).await {
                    Ok(v) => v,
                    Err(e) => return ToolOutcome::err(format!("failed to embed chunk {}: {}", i, e)),
                }
            } else {
                self.embedder.zero_vector()
            };
            match self.store.add(
                &args.index,
                c.clone(),
                embedding,
                "text_chunk".to_string(),
                if args.source.is_empty() { "vector_db_add_chunked_text".to_string() } else { args.source.clone() },
                json!({ "chunk_index": i }),
                now(),
            ) {
                Ok(id) => ids.push(id),
                Err(e) => return ToolOutcome::err(e.to_string()),
            }
        }
        ToolOutcome::ok(json!({ "chunk_ids": ids, "chunk_count": ids.len() }))
    }
}

#[derive(Deserialize)]
struct AddPdfDocumentArgs {
    path: String,
}

/// `vector_db_add_pdf_document`: delegates to the same [`PdfExtractor`] seam
/// `pdf_extract_text` uses, against the caller-chosen `documents` index by
/// convention (this tool fixes `index="documents"` so it's interchangeable
/// with the dedicated `pdf_extract_text` tool).
pub struct AddPdfDocumentTool {
    inner: PdfExtractTextTool,
}

impl AddPdfDocumentTool {
    pub fn new(
        extractor: std::sync::Arc<dyn PdfExtractor>,
        store: std::sync::Arc<DocumentStore>,
        embedder: std::sync::Arc<EmbeddingClient>,
    ) -> Self {
        Self {
            inner: PdfExtractTextTool::new(extractor, store, embedder),
        }
    }
}

#[async_trait]
impl ToolExecutor for AddPdfDocumentTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let _: AddPdfDocumentArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        self.inner.execute(arguments).await
    }
}

#[derive(Deserialize)]
struct SearchTextArgs {
    index: String,
    query: String,
    #[serde(default = "default_k")]
    k: usize,
}

/// `vector_db_search_text`: embeds `query` before delegating to the same
/// search path `search` (vector-in) uses.
pub struct SearchTextTool {
    store: std::sync::Arc<DocumentStore>,
    embedder: std::sync::Arc<EmbeddingClient>,
}

impl SearchTextTool {
    pub fn new(store: std::sync::Arc<DocumentStore>, embedder: std::sync::Arc<EmbeddingClient>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl ToolExecutor for SearchTextTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: SearchTextArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        if !self.embedder.is_configured() {
            return ToolOutcome::err("vector_db_search_text requires an embedding client, none is configured");
        }
        let query_embedding = match self.embedder.embed(&args.query).await {
            Ok(v) => v,
            Err(e) => return ToolOutcome::err(format!("failed to embed query: {}", e)),
        };
        match self.store.search(&args.index, &query_embedding, args.k) {
            Ok(hits) => {
                let results: Vec<_> = hits
                    .into_iter()
                    .map(|h| {
                        let mut j = doc_json(&h.document);
                        j["distance"] = json!(h.distance);
                        j
                    })
                    .collect();
                ToolOutcome::ok(json!({ "results": results }))
            }
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct SearchByTimeArgs {
    index: String,
    start: i64,
    end: i64,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

pub struct SearchByTimeTool {
    store: std::sync::Arc<DocumentStore>,
}

impl SearchByTimeTool {
    pub fn new(store: std::sync::Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolExecutor for SearchByTimeTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: SearchByTimeArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let docs = self.store.search_by_time(&args.index, args.start, args.end, args.limit);
        ToolOutcome::ok(json!({ "results": docs.iter().map(doc_json).collect::<Vec<_>>() }))
    }
}

pub fn create_index_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"name":{"type":"string"},"dimension":{"type":"number"},"max_elements":{"type":"number","default":100000}},"required":["name","dimension"]})
}
pub fn delete_index_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"name":{"type":"string"}},"required":["name"]})
}
pub fn list_indices_schema() -> serde_json::Value {
    json!({"type":"object","properties":{},"required":[]})
}
pub fn add_vector_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"vector":{"type":"array","items":{"type":"number"}},"content":{"type":"string"},"doc_type":{"type":"string"},"source":{"type":"string"},"metadata":{"type":"object"}},"required":["index","vector","content"]})
}
pub fn update_vector_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"id":{"type":"number"},"vector":{"type":"array","items":{"type":"number"}},"content":{"type":"string"}},"required":["index","id","vector","content"]})
}
pub fn delete_vector_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"id":{"type":"number"}},"required":["index","id"]})
}
pub fn get_vector_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"id":{"type":"number"}},"required":["index","id"]})
}
pub fn search_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"vector":{"type":"array","items":{"type":"number"}},"k":{"type":"number","default":5}},"required":["index","vector"]})
}
pub fn add_text_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"content":{"type":"string"},"doc_type":{"type":"string"},"source":{"type":"string"},"metadata":{"type":"object"}},"required":["index","content"]})
}
pub fn add_chunked_text_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"content":{"type":"string"},"chunk_chars":{"type":"number","default":1500},"chunk_overlap":{"type":"number","default":300},"source":{"type":"string"}},"required":["index","content"]})
}
pub fn add_pdf_document_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"path":{"type":"string"}},"required":["path"]})
}
pub fn search_text_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"query":{"type":"string"},"k":{"type":"number","default":5}},"required":["index","query"]})
}
pub fn search_by_time_schema() -> serde_json::Value {
    json!({"type":"object","properties":{"index":{"type":"string"},"start":{"type":"number"},"end":{"type":"number"},"limit":{"type":"number","default":50}},"required":["index","start","end"]})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> std::sync::Arc<EmbeddingClient> {
        std::sync::Arc::new(EmbeddingClient::new(None, "http://localhost".to_string(), "test".to_string(), 2))
    }

    #[tokio::test]
    async fn create_then_list_then_delete_index() {
        let store = std::sync::Arc::new(DocumentStore::new());
        let create = CreateIndexTool::new(store.clone());
        create.execute(r#"{"name":"docs","dimension":2}"#).await;
        let list = ListIndicesTool::new(store.clone());
        match list.execute("{}").await {
            ToolOutcome::Ok(p) => assert_eq!(p["indices"], json!(["docs"])),
            ToolOutcome::Err(e) => panic!("{}", e),
        }
        let delete = DeleteIndexTool::new(store.clone());
        delete.execute(r#"{"name":"docs"}"#).await;
        assert!(!store.has_index("docs"));
    }

    #[tokio::test]
    async fn add_vector_then_get_then_search() {
        let store = std::sync::Arc::new(DocumentStore::new());
        store.ensure_index("docs", 2, 100);
        let add = AddVectorTool::new(store.clone());
        let outcome = add.execute(r#"{"index":"docs","vector":[1.0,0.0],"content":"a"}"#).await;
        let id = match outcome {
            ToolOutcome::Ok(p) => p["id"].as_u64().unwrap(),
            ToolOutcome::Err(e) => panic!("{}", e),
        };
        let get = GetVectorTool::new(store.clone());
        match get.execute(&format!(r#"{{"index":"docs","id":{}}}"#, id)).await {
            ToolOutcome::Ok(p) => assert_eq!(p["content"], "a"),
            ToolOutcome::Err(e) => panic!("{}", e),
        }
        let search = SearchTool::new(store.clone());
        match search.execute(r#"{"index":"docs","vector":[1.0,0.0],"k":1}"#).await {
            ToolOutcome::Ok(p) => assert_eq!(p["results"][0]["id"], id),
            ToolOutcome::Err(e) => panic!("{}", e),
        }
    }

    #[tokio::test]
    async fn add_text_embeds_before_storing() {
        let store = std::sync::Arc::new(DocumentStore::new());
        store.ensure_index("docs", 2, 100);
        let tool = AddTextTool::new(store.clone(), embedder());
        let outcome = tool.execute(r#"{"index":"docs","content":"hello"}"#).await;
        assert!(matches!(outcome, ToolOutcome::Ok(_)));
    }

    #[tokio::test]
    async fn add_chunked_text_splits_into_multiple_chunks() {
        let store = std::sync::Arc::new(DocumentStore::new());
        store.ensure_index("docs", 2, 1000);
        let tool = AddChunkedTextTool::new(store.clone(), embedder());
        let content = "x".repeat(4000);
        let outcome = tool
            .execute(&format!(r#"{{"index":"docs","content":"{}"}}"#, content))
            .await;
        match outcome {
            ToolOutcome::Ok(p) => assert!(p["chunk_count"].as_u64().unwrap() >= 3),
            ToolOutcome::Err(e) => panic!("{}", e),
        }
    }

    #[tokio::test]
    async fn search_by_time_filters_window() {
        let store = std::sync::Arc::new(DocumentStore::new());
        store.ensure_index("docs", 2, 100);
        store.add("docs", "a".to_string(), vec![0.0, 0.0], "t".to_string(), "s".to_string(), json!({}), 10).unwrap();
        store.add("docs", "b".to_string(), vec![0.0, 0.0], "t".to_string(), "s".to_string(), json!({}), 1000).unwrap();
        let tool = SearchByTimeTool::new(store.clone());
        let outcome = tool.execute(r#"{"index":"docs","start":0,"end":100,"limit":10}"#).await;
        match outcome {
            ToolOutcome::Ok(p) => assert_eq!(p["results"].as_array().unwrap().len(), 1),
            ToolOutcome::Err(e) => panic!("{}", e),
        }
    }
}
