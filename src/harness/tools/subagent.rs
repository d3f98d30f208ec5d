//! `subagent_spawn`/`subagent_collect` tools (C7/C13): the model-facing
//! surface over [`SubagentManager`]. Spawning returns immediately with an id;
//! collecting reads whatever progress has accumulated so far without
//! blocking the turn loop on the child's completion (the completion itself
//! arrives later as its own `tool` message, appended directly to the
//! conversation store by the manager — see its module docs).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::harness::subagent::SubagentManager;
use crate::harness::tool_registry::{ToolExecutor, ToolOutcome};

#[derive(Deserialize)]
struct SpawnArgs {
    prompt: String,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default = "default_timeout_s")]
    timeout_s: u64,
}

fn default_timeout_s() -> u64 {
    300
}

/// `subagent_spawn` needs the id of the tool call that invoked it so the
/// eventual completion notice can be attached to it — the turn loop passes
/// that id in via [`SubagentSpawnTool::with_tool_call_id`] before dispatch,
/// since a [`ToolExecutor`] only otherwise sees the call's arguments.
pub struct SubagentSpawnTool {
    manager: std::sync::Arc<SubagentManager>,
}

impl SubagentSpawnTool {
    pub fn new(manager: std::sync::Arc<SubagentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolExecutor for SubagentSpawnTool {
    async fn execute(&self, _arguments: &str) -> ToolOutcome {
        // The turn loop is the only caller that can supply the spawning
        // tool_call_id a completion notice needs to pair against, so it
        // calls `spawn_subagent` directly rather than going through
        // `ToolRegistry::dispatch`. This `ToolExecutor` impl only exists so
        // `subagent_spawn` can still be registered (and its schema
        // rendered) like any other tool; reaching this path would be a
        // turn-loop bug, not a model or user error.
        let _ = &self.manager;
        ToolOutcome::err(
            "subagent_spawn must be dispatched via TurnLoop, which supplies the spawning tool_call_id",
        )
    }
}

/// The real entry point, called directly by the turn loop (not through
/// [`ToolExecutor::execute`]) once it knows the spawning tool_call_id.
pub async fn spawn_subagent(
    manager: &SubagentManager,
    arguments: &str,
    spawning_tool_call_id: String,
) -> ToolOutcome {
    let args: SpawnArgs = match serde_json::from_str(arguments) {
        Ok(a) => a,
        Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
    };
    match manager.spawn(
        args.prompt,
        args.tools,
        std::time::Duration::from_secs(args.timeout_s.min(3600)),
        spawning_tool_call_id,
    ) {
        Ok(id) => ToolOutcome::ok(json!({ "subagent_id": id, "status": "running" })),
        Err(e) => ToolOutcome::err(e.to_string()),
    }
}

#[derive(Deserialize)]
struct CollectArgs {
    subagent_id: String,
}

pub struct SubagentCollectTool {
    manager: std::sync::Arc<SubagentManager>,
}

impl SubagentCollectTool {
    pub fn new(manager: std::sync::Arc<SubagentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolExecutor for SubagentCollectTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: CollectArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        match self.manager.poll(&args.subagent_id) {
            Some(snapshot) => ToolOutcome::ok(json!({
                "status": snapshot.status,
                "stdout": snapshot.stdout,
                "exit_code": snapshot.exit_code,
            })),
            None => ToolOutcome::err(format!("unknown subagent_id: {}", args.subagent_id)),
        }
    }
}

pub fn subagent_spawn_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "prompt": {"type": "string", "description": "Task for the subagent"},
            "tools": {"type": "array", "items": {"type": "string"}, "description": "Tool names the subagent may use"},
            "timeout_s": {"type": "number", "description": "Timeout in seconds", "default": 300},
        },
        "required": ["prompt"],
    })
}

pub fn subagent_collect_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "subagent_id": {"type": "string", "description": "Id returned by subagent_spawn"},
        },
        "required": ["subagent_id"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::conversation_store::ConversationStore;
    use crate::harness::document_store::DocumentStore;
    use crate::harness::embedding_client::EmbeddingClient;

    fn manager() -> SubagentManager {
        SubagentManager::new(
            std::path::PathBuf::from("/nonexistent/harness-binary-does-not-exist"),
            std::sync::Arc::new(ConversationStore::new(DocumentStore::new(), 4)),
            std::sync::Arc::new(EmbeddingClient::new(None, "http://localhost".to_string(), "test".to_string(), 4)),
        )
    }

    #[tokio::test]
    async fn collecting_an_unknown_id_reports_error() {
        let manager = manager();
        let tool = SubagentCollectTool::new(std::sync::Arc::new(manager));
        let outcome = tool.execute(r#"{"subagent_id": "deadbeef00000000"}"#).await;
        assert!(matches!(outcome, ToolOutcome::Err(_)));
    }

    #[tokio::test]
    async fn spawn_subagent_reports_error_for_missing_binary() {
        let manager = manager();
        let outcome = spawn_subagent(&manager, r#"{"prompt": "hi"}"#, "call-1".to_string()).await;
        assert!(matches!(outcome, ToolOutcome::Err(_)));
    }
}
