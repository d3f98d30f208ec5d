//! Shared request/response vocabulary for the provider adapter layer (C8),
//! grounded in the `LlmProvider`/`ChatRequest`/`ChatResponse` shape but
//! reworked around the data model of §3: messages carry a verbatim
//! `tool_calls` envelope rather than a single string, and a response is a
//! [`ParsedResponse`] with whichever fields the source provider populated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::harness::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// A tool call as emitted by a model — `arguments` is the raw JSON-string the
/// model produced, not yet decoded (decoding happens at the tool-dispatch
/// boundary, where a malformed-arguments error becomes a tool result rather
/// than a parse failure that aborts the turn).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A single turn in the conversation. For `role=assistant` messages that
/// issued tool calls, `tool_calls` is non-empty and `content` may be `None`;
/// for `role=tool` messages, `tool_call_id`/`tool_name` identify which call
/// this is the result of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Unix seconds; insertion order is timestamp order, ties broken by a
    /// per-store monotonic counter carried alongside (not part of this type).
    pub timestamp: i64,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            timestamp,
        }
    }

    pub fn assistant_text(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            timestamp,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>, timestamp: i64) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls,
            tool_call_id: None,
            tool_name: None,
            timestamp,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            timestamp,
        }
    }
}

/// A tool schema as rendered to a provider, before dialect-specific shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Json,
}

/// The decoded shape of a unary provider response. Each provider populates
/// whichever fields apply to it.
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub thinking: Option<String>,
    pub response: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub tool_calls: Vec<ToolCall>,
}

/// A tool call still being assembled from streaming deltas.
#[derive(Debug, Clone, Default)]
pub struct PartialToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// The mutable accumulator a streaming parser (C9) folds SSE events into.
#[derive(Debug, Clone, Default)]
pub struct StreamingContext {
    pub text_content: String,
    pub thinking_content: String,
    /// Keyed by the provider's own correlation key (vendor `call_id` for
    /// Codex, stream `index` for OpenAI) so deltas land on the right partial
    /// regardless of which provider is emitting them; values are offered up
    /// as completed [`ToolCall`]s once `done` is set.
    pub tool_calls: Vec<PartialToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub error_message: Option<String>,
    pub done: bool,
}

impl StreamingContext {
    pub fn completed_tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .filter(|p| !p.id.is_empty() && !p.name.is_empty())
            .map(|p| ToolCall {
                id: p.id.clone(),
                name: p.name.clone(),
                arguments: p.arguments.clone(),
            })
            .collect()
    }
}

/// A request to a provider, already decided on model/history/tools; the
/// adapter's job is purely to shape this into that provider's wire format.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
}

/// The uniform capability set every provider exposes (§4.8, design note on
/// "tool vtables" made into a trait object rather than a struct of function
/// pointers).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Headers beyond the bearer/api-key auth header every provider needs;
    /// `access_token` is whatever [`crate::harness::config::Config::resolve_credential`]
    /// returned for this provider.
    fn build_headers(&self, access_token: &str) -> Vec<(String, String)>;

    fn build_request_json(&self, req: &ChatRequest) -> Json;

    fn build_streaming_request_json(&self, req: &ChatRequest) -> Json {
        let mut body = self.build_request_json(req);
        if let Json::Object(map) = &mut body {
            map.insert("stream".to_string(), Json::Bool(true));
        }
        body
    }

    fn parse_response(&self, body: &Json) -> Result<ParsedResponse, HarnessError>;

    /// Fold one decoded SSE event into the streaming context. Never returns
    /// an error that aborts the stream — malformed individual events are
    /// logged and ignored per the C9 contract; this only returns `Err` for
    /// genuinely unrecoverable programmer errors (none in the provided
    /// implementations).
    fn parse_stream_event(&self, ctx: &mut StreamingContext, event: &Json);
}
