//! Tool registry (C6): an ordered, read-mostly set of tool descriptors.
//! Mirrors the donor's `ToolProtocol`/`ToolRegistry` split
//! (`src/cloudllm/tool_protocol.rs`) — a trait object per tool plus a
//! registry that discovers/dispatches by name — generalized so one registry
//! renders the *same* registered tools into three different wire dialects
//! rather than routing to different backing protocols.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value as Json};

use crate::harness::provider::types::{ToolCall, ToolDefinition};

/// The tagged-variant shape the design notes call for: a tool either
/// succeeds with a JSON payload or fails with a message. Serialized to the
/// `{success, ...}` / `{success:false, error}` envelope only at the
/// model-facing boundary ([`ToolOutcome::into_result_json`]).
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Ok(Json),
    Err(String),
}

impl ToolOutcome {
    pub fn ok(payload: Json) -> Self {
        ToolOutcome::Ok(payload)
    }

    pub fn err(message: impl Into<String>) -> Self {
        ToolOutcome::Err(message.into())
    }

    /// Shape this outcome into the wire envelope every executor contract in
    /// §4.7 promises: `{success:true, ...payload}` or
    /// `{success:false, error:"..."}`.
    pub fn into_result_json(self) -> Json {
        match self {
            ToolOutcome::Ok(payload) => {
                let mut obj = match payload {
                    Json::Object(map) => map,
                    other => {
                        let mut map = serde_json::Map::new();
                        if !other.is_null() {
                            map.insert("value".to_string(), other);
                        }
                        map
                    }
                };
                obj.insert("success".to_string(), Json::Bool(true));
                Json::Object(obj)
            }
            ToolOutcome::Err(message) => json!({ "success": false, "error": message }),
        }
    }
}

/// The reply to a dispatched [`ToolCall`] — §3's tool result record.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    /// Always a JSON object, serialized to a string for storage/wire use.
    pub result: String,
}

/// A registered tool's runtime behavior. Executors never propagate an error
/// type to the dispatcher — every failure path (bad arguments, a denied
/// command, a timed-out subprocess) is represented as `ToolOutcome::Err`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: &str) -> ToolOutcome;
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// A full JSON Schema object (`{type:"object", properties, required}`),
    /// shaped into the wire-specific envelope only at render time.
    pub parameters: Json,
    pub executor: Arc<dyn ToolExecutor>,
}

/// Which provider dialect to render a tool schema array for (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Codex,
}

/// Holds tools in registration order (iteration/schema-array order matters
/// to some providers' prompt caching, so we never silently reorder).
pub struct ToolRegistry {
    tools: RwLock<Vec<ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Vec::new()),
        }
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Json,
        executor: Arc<dyn ToolExecutor>,
    ) {
        let descriptor = ToolDescriptor {
            name: name.into(),
            description: description.into(),
            parameters,
            executor,
        };
        let mut tools = self.tools.write().unwrap();
        if let Some(existing) = tools.iter_mut().find(|t| t.name == descriptor.name) {
            *existing = descriptor;
        } else {
            tools.push(descriptor);
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().unwrap().iter().map(|t| t.name.clone()).collect()
    }

    /// The provider-agnostic schema array, for callers that build their own
    /// requests (e.g. tests) rather than going through a [`Provider`](crate::harness::provider::types::Provider).
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap()
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect()
    }

    /// Render the schema array in the wire shape a given dialect expects.
    pub fn render_schema(&self, dialect: Dialect) -> Vec<Json> {
        self.tools
            .read()
            .unwrap()
            .iter()
            .map(|t| match dialect {
                Dialect::OpenAi => json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                }),
                Dialect::Anthropic => json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                }),
                Dialect::Codex => json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }),
            })
            .collect()
    }

    /// Look up `tool_call.name` and run it. Unknown tools produce
    /// `success:false, error:"Unknown tool: <name>"` rather than an `Err` —
    /// dispatch never fails the turn loop, per §4.6.
    pub async fn dispatch(&self, tool_call: &ToolCall) -> ToolResult {
        let executor = {
            let tools = self.tools.read().unwrap();
            tools
                .iter()
                .find(|t| t.name == tool_call.name)
                .map(|t| t.executor.clone())
        };
        let outcome = match executor {
            Some(executor) => executor.execute(&tool_call.arguments).await,
            None => ToolOutcome::err(format!("Unknown tool: {}", tool_call.name)),
        };
        let success = matches!(outcome, ToolOutcome::Ok(_));
        let result_json = outcome.into_result_json();
        ToolResult {
            tool_call_id: tool_call.id.clone(),
            tool_name: tool_call.name.clone(),
            success,
            result: serde_json::to_string(&result_json).unwrap_or_else(|_| {
                "{\"success\":false,\"error\":\"failed to serialize tool result\"}".to_string()
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A mock of the `HashMap<String, Arc<dyn ToolExecutor>>` shape, kept only to
/// document the structure `register`'s name-collision handling relies on.
#[allow(dead_code)]
type _NameIndexDoc = HashMap<String, usize>;

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolExecutor for EchoTool {
        async fn execute(&self, arguments: &str) -> ToolOutcome {
            ToolOutcome::ok(json!({ "echo": arguments }))
        }
    }

    fn registry_with_echo() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(
            "echo",
            "Echoes its arguments back",
            json!({"type": "object", "properties": {}, "required": []}),
            Arc::new(EchoTool),
        );
        registry
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_reports_error_without_failing() {
        let registry = registry_with_echo();
        let result = registry
            .dispatch(&ToolCall {
                id: "1".to_string(),
                name: "does_not_exist".to_string(),
                arguments: "{}".to_string(),
            })
            .await;
        assert!(!result.success);
        assert!(result.result.contains("Unknown tool: does_not_exist"));
    }

    #[tokio::test]
    async fn dispatch_known_tool_succeeds() {
        let registry = registry_with_echo();
        let result = registry
            .dispatch(&ToolCall {
                id: "1".to_string(),
                name: "echo".to_string(),
                arguments: "{\"a\":1}".to_string(),
            })
            .await;
        assert!(result.success);
        assert!(result.result.contains("\"a\":1"));
    }

    #[test]
    fn render_schema_shapes_per_dialect() {
        let registry = registry_with_echo();
        let openai = registry.render_schema(Dialect::OpenAi);
        assert!(openai[0].get("function").is_some());
        let anthropic = registry.render_schema(Dialect::Anthropic);
        assert!(anthropic[0].get("input_schema").is_some());
        let codex = registry.render_schema(Dialect::Codex);
        assert!(codex[0].get("parameters").is_some());
        assert!(codex[0].get("function").is_none());
    }
}
