//! Anthropic-messages adapter. Grounded in a sibling pack's `anthropic.rs`
//! (OAuth-vs-api-key header branching, `anthropic-version` header, content
//! blocks, flat tool schema, `tool_use`/`tool_result` pairing) rather than the
//! donor's own `ClaudeClient`, which merely points an OpenAI-wire client at
//! Anthropic's base URL and so cannot represent `tool_use`/`tool_result`
//! blocks, top-level `system`, or `thinking` blocks.

use async_trait::async_trait;
use serde_json::{json, Value as Json};

use crate::harness::error::HarnessError;
use crate::harness::provider::types::{
    ChatRequest, Message, ParsedResponse, Provider, Role, StreamingContext, ToolCall,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// OAuth access tokens minted for Claude carry this prefix; a plain API key
/// never does, so the prefix alone disambiguates which header to emit.
const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat01-";

pub struct AnthropicProvider;

impl AnthropicProvider {
    pub fn new() -> Self {
        Self
    }

    fn message_to_content_block(message: &Message) -> Option<Json> {
        match message.role {
            Role::System => None, // folded into the top-level `system` field
            Role::User => Some(json!({
                "role": "user",
                "content": message.content.clone().unwrap_or_default(),
            })),
            Role::Assistant => {
                if message.tool_calls.is_empty() {
                    Some(json!({
                        "role": "assistant",
                        "content": message.content.clone().unwrap_or_default(),
                    }))
                } else {
                    let mut blocks: Vec<Json> = Vec::new();
                    if let Some(text) = &message.content {
                        if !text.is_empty() {
                            blocks.push(json!({ "type": "text", "text": text }));
                        }
                    }
                    for tc in &message.tool_calls {
                        let input: Json =
                            serde_json::from_str(&tc.arguments).unwrap_or(Json::Null);
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": input,
                        }));
                    }
                    Some(json!({ "role": "assistant", "content": blocks }))
                }
            }
            Role::Tool => Some(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content.clone().unwrap_or_default(),
                }],
            })),
        }
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn build_headers(&self, access_token: &str) -> Vec<(String, String)> {
        let mut headers = vec![(
            "anthropic-version".to_string(),
            ANTHROPIC_VERSION.to_string(),
        )];
        if access_token.starts_with(OAUTH_TOKEN_PREFIX) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", access_token)));
        } else {
            headers.push(("x-api-key".to_string(), access_token.to_string()));
        }
        headers
    }

    fn build_request_json(&self, req: &ChatRequest) -> Json {
        let messages: Vec<Json> = req
            .history
            .iter()
            .filter_map(Self::message_to_content_block)
            .collect();

        let mut body = json!({
            "model": req.model,
            "system": req.system_prompt,
            "messages": messages,
            "max_tokens": req.max_tokens,
        });
        if !req.tools.is_empty() {
            if let Json::Object(map) = &mut body {
                let tools: Vec<Json> = req
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect();
                map.insert("tools".to_string(), json!(tools));
            }
        }
        body
    }

    fn parse_response(&self, body: &Json) -> Result<ParsedResponse, HarnessError> {
        if let Some(err) = body.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown provider error");
            return Err(HarnessError::new(
                crate::harness::error::ErrorKind::ProviderError,
                message.to_string(),
            ));
        }

        let blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| HarnessError::parse_error("missing content array"))?;

        let mut response_text = String::new();
        let mut thinking_text = String::new();
        let mut tool_calls = Vec::new();

        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        response_text.push_str(t);
                    }
                }
                Some("thinking") => {
                    if let Some(t) = block.get("thinking").and_then(|t| t.as_str()) {
                        thinking_text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    if let (Some(id), Some(name)) = (
                        block.get("id").and_then(|v| v.as_str()),
                        block.get("name").and_then(|v| v.as_str()),
                    ) {
                        let input = block.get("input").cloned().unwrap_or(Json::Null);
                        tool_calls.push(ToolCall {
                            id: id.to_string(),
                            name: name.to_string(),
                            arguments: serde_json::to_string(&input).unwrap_or_default(),
                        });
                    }
                }
                _ => {}
            }
        }

        let usage = body.get("usage");
        let input_tokens = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let output_tokens = usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        Ok(ParsedResponse {
            thinking: if thinking_text.is_empty() {
                None
            } else {
                Some(thinking_text)
            },
            response: if response_text.is_empty() {
                None
            } else {
                Some(response_text)
            },
            prompt_tokens: input_tokens,
            completion_tokens: output_tokens,
            total_tokens: input_tokens + output_tokens,
            tool_calls,
        })
    }

    fn parse_stream_event(&self, ctx: &mut StreamingContext, event: &Json) {
        match event.get("type").and_then(|t| t.as_str()) {
            Some("content_block_start") => {
                if let Some(block) = event.get("content_block") {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                        let id = block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        let name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        ctx.tool_calls.push(crate::harness::provider::types::PartialToolCall {
                            id,
                            name,
                            arguments: String::new(),
                        });
                    }
                }
            }
            Some("content_block_delta") => {
                if let Some(delta) = event.get("delta") {
                    match delta.get("type").and_then(|t| t.as_str()) {
                        Some("text_delta") => {
                            if let Some(t) = delta.get("text").and_then(|v| v.as_str()) {
                                ctx.text_content.push_str(t);
                            }
                        }
                        Some("thinking_delta") => {
                            if let Some(t) = delta.get("thinking").and_then(|v| v.as_str()) {
                                ctx.thinking_content.push_str(t);
                            }
                        }
                        Some("input_json_delta") => {
                            if let (Some(partial), Some(json_frag)) = (
                                ctx.tool_calls.last_mut(),
                                delta.get("partial_json").and_then(|v| v.as_str()),
                            ) {
                                partial.arguments.push_str(json_frag);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Some("message_delta") => {
                if let Some(usage) = event.get("usage") {
                    ctx.output_tokens = usage
                        .get("output_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0) as u32;
                }
            }
            Some("message_stop") => ctx.done = true,
            Some("error") => {
                ctx.error_message = Some(
                    event
                        .pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("stream error")
                        .to_string(),
                );
                ctx.done = true;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_token_prefix_selects_bearer_header() {
        let provider = AnthropicProvider::new();
        let headers = provider.build_headers("sk-ant-oat01-abc");
        assert!(headers
            .iter()
            .any(|(k, v)| k == "Authorization" && v == "Bearer sk-ant-oat01-abc"));
    }

    #[test]
    fn api_key_selects_x_api_key_header() {
        let provider = AnthropicProvider::new();
        let headers = provider.build_headers("sk-ant-api03-abc");
        assert!(headers.iter().any(|(k, _)| k == "x-api-key"));
        assert!(!headers.iter().any(|(k, _)| k == "Authorization"));
    }

    #[test]
    fn parses_tool_use_block_into_tool_call() {
        let provider = AnthropicProvider::new();
        let body = json!({
            "content": [{ "type": "tool_use", "id": "t1", "name": "shell", "input": {"command": "ls"} }],
            "usage": { "input_tokens": 3, "output_tokens": 2 }
        });
        let parsed = provider.parse_response(&body).unwrap();
        assert_eq!(parsed.tool_calls[0].id, "t1");
        assert_eq!(parsed.tool_calls[0].arguments, "{\"command\":\"ls\"}");
    }
}
