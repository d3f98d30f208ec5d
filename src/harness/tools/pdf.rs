//! `pdf_extract_text` tool (C7): extracts text from a PDF, chunks it, and
//! auto-ingests the chunks into the reserved `"documents"` index so later
//! `vector_db_search_text` calls can find them.
//!
//! PDF parsing internals are out of scope (§12 Non-goals) — [`PdfExtractor`]
//! is the contracted seam a real backend plugs into, mirroring the donor's
//! `HttpClientTool` pattern of wrapping an external capability behind a
//! narrow trait (`src/cloudllm/tools/http_client.rs`) rather than embedding a
//! parsing library directly in the tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::harness::document_store::DocumentStore;
use crate::harness::embedding_client::EmbeddingClient;
use crate::harness::error::HarnessError;
use crate::harness::tool_registry::{ToolExecutor, ToolOutcome};

pub const DOCUMENTS_INDEX: &str = "documents";

const CHUNK_CHARS: usize = 1500;
const CHUNK_OVERLAP: usize = 300;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The contracted seam a real PDF backend implements: `path` in, full text
/// plus a page count out. No implementation is provided here — see §12.
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    async fn extract(&self, path: &str) -> Result<(String, u32), HarnessError>;
}

/// Always fails with a clear message — stands in until a real extractor is
/// wired up, the same role the donor's `HttpClientTool` gives an unconfigured
/// client.
pub struct UnimplementedPdfExtractor;

#[async_trait]
impl PdfExtractor for UnimplementedPdfExtractor {
    async fn extract(&self, _path: &str) -> Result<(String, u32), HarnessError> {
        Err(HarnessError::internal(
            "no PdfExtractor backend is configured",
        ))
    }
}

/// Splits `text` into overlapping chunks of roughly [`CHUNK_CHARS`]
/// characters, each starting [`CHUNK_CHARS`] - [`CHUNK_OVERLAP`] characters
/// after the previous one, so a chunk boundary never drops context a query
/// might need on either side of it.
fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let stride = CHUNK_CHARS.saturating_sub(CHUNK_OVERLAP).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + CHUNK_CHARS).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[derive(Deserialize)]
struct PdfArgs {
    path: String,
}

pub struct PdfExtractTextTool {
    extractor: std::sync::Arc<dyn PdfExtractor>,
    store: std::sync::Arc<DocumentStore>,
    embedder: std::sync::Arc<EmbeddingClient>,
}

impl PdfExtractTextTool {
    pub fn new(
        extractor: std::sync::Arc<dyn PdfExtractor>,
        store: std::sync::Arc<DocumentStore>,
        embedder: std::sync::Arc<EmbeddingClient>,
    ) -> Self {
        store.ensure_index(DOCUMENTS_INDEX, embedder.dimension(), 1_000_000);
        Self {
            extractor,
            store,
            embedder,
        }
    }
}

#[async_trait]
impl ToolExecutor for PdfExtractTextTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: PdfArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let (text, pages) = match self.extractor.extract(&args.path).await {
            Ok(v) => v,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };
        let chunks = chunk_text(&text);
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let embedding = if self.embedder.is_configured() {
                match self.embedder.embed(chunk).await {
                    Ok(v) => v,
                    Err(e) => return ToolOutcome::err(format!("failed to embed chunk {}: {}", i, e)),
                }
            } else {
                self.embedder.zero_vector()
            };
            match self.store.add(
                DOCUMENTS_INDEX,
                chunk.clone(),
                embedding,
                "pdf_chunk".to_string(),
                args.path.clone(),
                json!({ "chunk_index": i, "source_path": args.path }),
                now(),
            ) {
                Ok(id) => chunk_ids.push(id),
                Err(e) => return ToolOutcome::err(e.to_string()),
            }
        }
        ToolOutcome::ok(json!({
            "pages": pages,
            "chunk_count": chunk_ids.len(),
            "chunk_ids": chunk_ids,
            "total_chars": text.chars().count(),
        }))
    }
}

pub fn pdf_extract_text_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "description": "Path to the PDF file"},
        },
        "required": ["path"],
    })
}
