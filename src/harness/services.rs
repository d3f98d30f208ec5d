//! The explicit service handle (design note: no singletons). One
//! [`Services`] is built once at startup and threaded through everything
//! that needs shared state — the [`crate::harness::turn_loop::TurnLoop`],
//! subagent children, and any host binary — the same "build the graph once,
//! pass `&Services` down" shape the donor's `LLMClient`/tool-vtable wiring
//! uses at its own construction site, generalized here into one struct
//! because this crate's graph has many more parts (store, embedder, tool
//! registry, policy gate, oauth, subagents) than the donor's single client.

use std::sync::Arc;

use crate::harness::config::Config;
use crate::harness::conversation_store::ConversationStore;
use crate::harness::document_store::DocumentStore;
use crate::harness::embedding_client::EmbeddingClient;
use crate::harness::oauth::{OAuthStore, OpenAiOAuthOps};
use crate::harness::policy_gate::PolicyGate;
use crate::harness::subagent::SubagentManager;
use crate::harness::token_budget::{TokenBudgeter, TokenConfig};
use crate::harness::tool_registry::ToolRegistry;
use crate::harness::tools::file::{FileReadTool, FileWriteTool};
use crate::harness::tools::memory::{ForgetMemoryTool, RecallMemoriesTool, RememberTool};
use crate::harness::tools::pdf::{PdfExtractTextTool, UnimplementedPdfExtractor};
use crate::harness::tools::python::{PythonTool, UnimplementedPythonInterpreter};
use crate::harness::tools::shell::ShellTool;
use crate::harness::tools::subagent::{SubagentCollectTool, SubagentSpawnTool};
use crate::harness::tools::vector_db::{
    AddChunkedTextTool, AddPdfDocumentTool, AddTextTool, AddVectorTool, CreateIndexTool,
    DeleteIndexTool, DeleteVectorTool, GetVectorTool, ListIndicesTool, SearchByTimeTool,
    SearchTextTool, SearchTool, UpdateVectorTool,
};
use crate::harness::tools::{file, memory, pdf, python, shell, subagent, vector_db};

/// A fully wired harness: the document/vector store, embedding client,
/// conversation history, token budgeter, tool registry (every built-in tool
/// already registered), policy gate, OAuth2 store, and subagent manager.
pub struct Services {
    pub config: Config,
    pub document_store: Arc<DocumentStore>,
    pub embedding_client: Arc<EmbeddingClient>,
    pub conversation_store: Arc<ConversationStore>,
    pub token_budgeter: Arc<TokenBudgeter>,
    pub tool_registry: Arc<ToolRegistry>,
    pub policy_gate: Arc<PolicyGate>,
    pub oauth_store: Arc<OAuthStore>,
    pub subagent_manager: Arc<SubagentManager>,
}

/// Default embedding dimension for `text-embedding-3-small`-shaped models;
/// used whenever `config.embedding_model` doesn't resolve to a different
/// known dimension.
const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

impl Services {
    /// Wires every component together from a [`Config`]. Fallible only
    /// insofar as [`TokenConfig::new`] validates its inputs — the defaults
    /// here are chosen to always pass that validation.
    pub fn new(config: Config) -> Self {
        let embedding_client = Arc::new(EmbeddingClient::new(
            config.openai_api_key.clone(),
            config.openai_base_url().to_string(),
            config
                .embedding_model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            DEFAULT_EMBEDDING_DIMENSION,
        ));
        let document_store = Arc::new(DocumentStore::new());
        let conversation_store = Arc::new(ConversationStore::new(
            DocumentStore::new(),
            DEFAULT_EMBEDDING_DIMENSION,
        ));

        let token_budgeter = Arc::new(TokenBudgeter::new(TokenConfig::default_for_window(128_000)));

        let policy_gate = Arc::new(PolicyGate::new().with_file_root(config.state_dir.join("tools")));

        let oauth_store = Arc::new(OAuthStore::new(
            config.state_dir.join("oauth.db"),
            b"agentharness-oauth-salt-v1",
        ));
        oauth_store.register_provider(Arc::new(OpenAiOAuthOps::new()));

        let harness_binary = std::env::current_exe().unwrap_or_else(|_| "agentharness".into());
        let subagent_manager = Arc::new(SubagentManager::new(
            harness_binary,
            conversation_store.clone(),
            embedding_client.clone(),
        ));

        let tool_registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(
            &tool_registry,
            &document_store,
            &embedding_client,
            &policy_gate,
            &subagent_manager,
        );

        Self {
            config,
            document_store,
            embedding_client,
            conversation_store,
            token_budgeter,
            tool_registry,
            policy_gate,
            oauth_store,
            subagent_manager,
        }
    }
}

/// Registers every built-in tool (C7) into `registry`. Split out of
/// [`Services::new`] so tests can build a registry with a subset of tools
/// without constructing a full [`Services`].
fn register_builtin_tools(
    registry: &ToolRegistry,
    document_store: &Arc<DocumentStore>,
    embedding_client: &Arc<EmbeddingClient>,
    policy_gate: &Arc<PolicyGate>,
    subagent_manager: &Arc<SubagentManager>,
) {
    registry.register(
        "shell",
        "Execute a shell command and return its output",
        shell::shell_schema(),
        Arc::new(ShellTool::new(policy_gate.clone())),
    );
    registry.register(
        "file_read",
        "Read a file's contents, optionally a character range",
        file::file_read_schema(),
        Arc::new(FileReadTool::new(Some(policy_gate_file_root(policy_gate)))),
    );
    registry.register(
        "file_write",
        "Write or append content to a file",
        file::file_write_schema(),
        Arc::new(FileWriteTool::new(Some(policy_gate_file_root(policy_gate)))),
    );
    registry.register(
        "remember",
        "Store a fact in long-term memory",
        memory::remember_schema(),
        Arc::new(RememberTool::new(document_store.clone(), embedding_client.clone())),
    );
    registry.register(
        "recall_memories",
        "Semantically search long-term memory",
        memory::recall_memories_schema(),
        Arc::new(RecallMemoriesTool::new(document_store.clone(), embedding_client.clone())),
    );
    registry.register(
        "forget_memory",
        "Delete a stored memory by id",
        memory::forget_memory_schema(),
        Arc::new(ForgetMemoryTool::new(document_store.clone())),
    );
    registry.register(
        "pdf_extract_text",
        "Extract and chunk-ingest text from a PDF file",
        pdf::pdf_extract_text_schema(),
        Arc::new(PdfExtractTextTool::new(
            Arc::new(UnimplementedPdfExtractor),
            document_store.clone(),
            embedding_client.clone(),
        )),
    );
    registry.register(
        "python",
        "Execute a snippet of Python and return stdout/stderr/exception",
        python::python_schema(),
        Arc::new(PythonTool::new(Arc::new(UnimplementedPythonInterpreter))),
    );
    registry.register(
        "subagent_spawn",
        "Spawn a background subagent to work on a task",
        subagent::subagent_spawn_schema(),
        Arc::new(SubagentSpawnTool::new(subagent_manager.clone())),
    );
    registry.register(
        "subagent_collect",
        "Read a subagent's progress without blocking",
        subagent::subagent_collect_schema(),
        Arc::new(SubagentCollectTool::new(subagent_manager.clone())),
    );

    registry.register(
        "vector_db_create_index",
        "Create a named vector index",
        vector_db::create_index_schema(),
        Arc::new(CreateIndexTool::new(document_store.clone())),
    );
    registry.register(
        "vector_db_delete_index",
        "Delete a named vector index",
        vector_db::delete_index_schema(),
        Arc::new(DeleteIndexTool::new(document_store.clone())),
    );
    registry.register(
        "vector_db_list_indices",
        "List all vector index names",
        vector_db::list_indices_schema(),
        Arc::new(ListIndicesTool::new(document_store.clone())),
    );
    registry.register(
        "vector_db_add_vector",
        "Add a caller-supplied vector and content to an index",
        vector_db::add_vector_schema(),
        Arc::new(AddVectorTool::new(document_store.clone())),
    );
    registry.register(
        "vector_db_update_vector",
        "Replace a stored vector/content pair",
        vector_db::update_vector_schema(),
        Arc::new(UpdateVectorTool::new(document_store.clone())),
    );
    registry.register(
        "vector_db_delete_vector",
        "Delete a vector by id",
        vector_db::delete_vector_schema(),
        Arc::new(DeleteVectorTool::new(document_store.clone())),
    );
    registry.register(
        "vector_db_get_vector",
        "Fetch a vector's stored document by id",
        vector_db::get_vector_schema(),
        Arc::new(GetVectorTool::new(document_store.clone())),
    );
    registry.register(
        "vector_db_search",
        "ANN search an index with a caller-supplied query vector",
        vector_db::search_schema(),
        Arc::new(SearchTool::new(document_store.clone())),
    );
    registry.register(
        "vector_db_add_text",
        "Embed and store a text document",
        vector_db::add_text_schema(),
        Arc::new(AddTextTool::new(document_store.clone(), embedding_client.clone())),
    );
    registry.register(
        "vector_db_add_chunked_text",
        "Chunk, embed, and store a long text document",
        vector_db::add_chunked_text_schema(),
        Arc::new(AddChunkedTextTool::new(document_store.clone(), embedding_client.clone())),
    );
    registry.register(
        "vector_db_add_pdf_document",
        "Extract, chunk, and store a PDF document",
        vector_db::add_pdf_document_schema(),
        Arc::new(AddPdfDocumentTool::new(
            Arc::new(UnimplementedPdfExtractor),
            document_store.clone(),
            embedding_client.clone(),
        )),
    );
    registry.register(
        "vector_db_search_text",
        "Embed a query and ANN search an index",
        vector_db::search_text_schema(),
        Arc::new(SearchTextTool::new(document_store.clone(), embedding_client.clone())),
    );
    registry.register(
        "vector_db_search_by_time",
        "Chronologically scan an index within a time window",
        vector_db::search_by_time_schema(),
        Arc::new(SearchByTimeTool::new(document_store.clone())),
    );
}

/// The file root every file-touching tool is restricted to: the tools
/// subdirectory of the configured state directory. A tool executor enforces
/// this independently of the policy gate's own check (defense in depth, per
/// `shell.rs`'s module docs).
fn policy_gate_file_root(policy_gate: &PolicyGate) -> std::path::PathBuf {
    policy_gate
        .file_root()
        .cloned()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
}
