//! OpenAI-chat adapter. Grounded in `clients/common.rs::send_with_native_tools`'s
//! message-role serialization table and in the OpenAI stream-event handling of
//! a sibling pack's `openai.rs` (line-buffered SSE, `choices[].delta...`).

use async_trait::async_trait;
use serde_json::{json, Value as Json};

use crate::harness::error::HarnessError;
use crate::harness::provider::types::{
    ChatRequest, Message, ParsedResponse, PartialToolCall, Provider, Role, StreamingContext,
    ToolCall,
};

/// `api.openai.com` and any OpenAI-compatible endpoint (local servers,
/// proxies). `is_public_openai` toggles `max_completion_tokens` (the newer
/// reasoning-model parameter name) vs. the legacy `max_tokens` used by
/// OpenAI-compatible third parties per §4.8.
pub struct OpenAiProvider {
    pub is_public_openai: bool,
}

impl OpenAiProvider {
    pub fn new(is_public_openai: bool) -> Self {
        Self { is_public_openai }
    }

    fn message_to_json(message: &Message) -> Json {
        match message.role {
            Role::System => json!({ "role": "system", "content": message.content.clone().unwrap_or_default() }),
            Role::User => json!({ "role": "user", "content": message.content.clone().unwrap_or_default() }),
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.content.clone().unwrap_or_default(),
            }),
            Role::Assistant => {
                if message.tool_calls.is_empty() {
                    json!({ "role": "assistant", "content": message.content.clone().unwrap_or_default() })
                } else {
                    let tool_calls: Vec<Json> = message
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": { "name": tc.name, "arguments": tc.arguments },
                            })
                        })
                        .collect();
                    json!({
                        "role": "assistant",
                        "content": message.content,
                        "tool_calls": tool_calls,
                    })
                }
            }
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn build_headers(&self, access_token: &str) -> Vec<(String, String)> {
        vec![("Authorization".to_string(), format!("Bearer {}", access_token))]
    }

    fn build_request_json(&self, req: &ChatRequest) -> Json {
        let mut messages = vec![json!({ "role": "system", "content": req.system_prompt })];
        messages.extend(req.history.iter().map(Self::message_to_json));

        let mut body = json!({
            "model": req.model,
            "messages": messages,
        });
        if let Json::Object(map) = &mut body {
            if self.is_public_openai {
                map.insert("max_completion_tokens".to_string(), json!(req.max_tokens));
            } else {
                map.insert("max_tokens".to_string(), json!(req.max_tokens));
            }
            if !req.tools.is_empty() {
                let tools: Vec<Json> = req
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
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

        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| HarnessError::parse_error("missing choices[0].message"))?;

        let response = message
            .get("content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string());

        let tool_calls = message
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        Some(ToolCall {
                            id: tc.get("id")?.as_str()?.to_string(),
                            name: tc.pointer("/function/name")?.as_str()?.to_string(),
                            arguments: tc
                                .pointer("/function/arguments")?
                                .as_str()?
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = body.get("usage");
        Ok(ParsedResponse {
            thinking: None,
            response,
            prompt_tokens: usage
                .and_then(|u| u.get("prompt_tokens"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            completion_tokens: usage
                .and_then(|u| u.get("completion_tokens"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            total_tokens: usage
                .and_then(|u| u.get("total_tokens"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            tool_calls,
        })
    }

    fn parse_stream_event(&self, ctx: &mut StreamingContext, event: &Json) {
        if let Some(err) = event.get("error") {
            ctx.error_message = Some(
                err.get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("stream error")
                    .to_string(),
            );
            ctx.done = true;
            return;
        }

        if let Some(usage) = event.get("usage") {
            ctx.input_tokens = usage
                .get("prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32;
            ctx.output_tokens = usage
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32;
        }

        let Some(delta) = event.pointer("/choices/0/delta") else {
            if event
                .pointer("/choices/0/finish_reason")
                .and_then(|v| v.as_str())
                .is_some()
            {
                ctx.done = true;
            }
            return;
        };

        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            ctx.text_content.push_str(text);
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
            for tc in tool_calls {
                let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                while ctx.tool_calls.len() <= index {
                    ctx.tool_calls.push(PartialToolCall::default());
                }
                let partial = &mut ctx.tool_calls[index];
                if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                    partial.id = id.to_string();
                }
                if let Some(name) = tc.pointer("/function/name").and_then(|n| n.as_str()) {
                    partial.name = name.to_string();
                }
                if let Some(args) = tc.pointer("/function/arguments").and_then(|a| a.as_str()) {
                    partial.arguments.push_str(args);
                }
            }
        }

        if event
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
            .is_some()
        {
            ctx.done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_calls_from_response_body() {
        let provider = OpenAiProvider::new(true);
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": { "name": "shell", "arguments": "{\"command\":\"echo A\"}" }
                    }]
                }
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        });
        let parsed = provider.parse_response(&body).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].id, "c1");
        assert_eq!(parsed.total_tokens, 15);
    }

    #[test]
    fn echo_response_has_no_tool_calls() {
        let provider = OpenAiProvider::new(true);
        let body = json!({ "choices": [{ "message": { "content": "hello" } }] });
        let parsed = provider.parse_response(&body).unwrap();
        assert_eq!(parsed.response.as_deref(), Some("hello"));
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn streams_codex_style_tool_call_arguments_incrementally() {
        let provider = OpenAiProvider::new(true);
        let mut ctx = StreamingContext::default();
        provider.parse_stream_event(
            &mut ctx,
            &json!({"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read_file","arguments":"{\"path\":\""}}]}}]}),
        );
        provider.parse_stream_event(
            &mut ctx,
            &json!({"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"x.c\"}"}}]}}]}),
        );
        let calls = ctx.completed_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, "{\"path\":\"x.c\"}");
    }
}
