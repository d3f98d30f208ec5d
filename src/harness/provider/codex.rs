//! Codex-responses adapter (the ChatGPT-backend variant). No sibling example
//! in the corpus speaks this wire format directly; built by extension of the
//! OpenAI/Anthropic adapters' shape plus the literal wire contract in §4.8/§6
//! (`instructions`/`input` items, flat tool schema, `chatgpt-account-id`
//! header sourced from a JWT claim).

use async_trait::async_trait;
use serde_json::{json, Value as Json};

use crate::harness::error::HarnessError;
use crate::harness::provider::types::{
    ChatRequest, Message, ParsedResponse, PartialToolCall, Provider, Role, StreamingContext,
    ToolCall,
};

pub struct CodexProvider {
    account_id: Option<String>,
}

impl CodexProvider {
    pub fn new(access_token: &str) -> Self {
        Self {
            account_id: extract_account_id(access_token),
        }
    }

    fn message_to_input_items(message: &Message) -> Vec<Json> {
        match message.role {
            Role::System => Vec::new(), // folded into top-level `instructions`
            Role::User => vec![json!({
                "role": "user",
                "content": [{ "type": "input_text", "text": message.content.clone().unwrap_or_default() }],
            })],
            Role::Assistant => {
                let mut items = Vec::new();
                if let Some(text) = &message.content {
                    if !text.is_empty() {
                        items.push(json!({
                            "role": "assistant",
                            "content": [{ "type": "output_text", "text": text }],
                        }));
                    }
                }
                for tc in &message.tool_calls {
                    items.push(json!({
                        "type": "function_call",
                        "call_id": tc.id,
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }));
                }
                items
            }
            Role::Tool => vec![json!({
                "type": "function_call_output",
                "call_id": message.tool_call_id.clone().unwrap_or_default(),
                "output": message.content.clone().unwrap_or_default(),
            })],
        }
    }
}

/// Extract the ChatGPT account id from the nested claim
/// `https://api.openai.com/auth.chatgpt_account_id` of an unverified JWT
/// access token. We only need the claim for header construction, not for
/// trust decisions, so signature verification is the issuing provider's job,
/// not ours — this purely decodes the base64url payload segment.
fn extract_account_id(jwt: &str) -> Option<String> {
    let payload_segment = jwt.split('.').nth(1)?;
    use base64::Engine;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_segment)
        .ok()?;
    let claims: Json = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("https://api.openai.com/auth")?
        .get("chatgpt_account_id")?
        .as_str()
        .map(|s| s.to_string())
}

#[async_trait]
impl Provider for CodexProvider {
    fn name(&self) -> &str {
        "codex"
    }

    fn build_headers(&self, access_token: &str) -> Vec<(String, String)> {
        let mut headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", access_token),
        )];
        if let Some(account_id) = &self.account_id {
            headers.push(("chatgpt-account-id".to_string(), account_id.clone()));
        }
        headers
    }

    fn build_request_json(&self, req: &ChatRequest) -> Json {
        let input: Vec<Json> = req
            .history
            .iter()
            .flat_map(Self::message_to_input_items)
            .collect();

        let mut body = json!({
            "model": req.model,
            "instructions": req.system_prompt,
            "input": input,
            "max_output_tokens": req.max_tokens,
            "store": false,
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
                            "parameters": t.parameters,
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

        let outputs = body
            .get("output")
            .and_then(|o| o.as_array())
            .ok_or_else(|| HarnessError::parse_error("missing output array"))?;

        let mut response_text: Option<String> = None;
        let mut tool_calls = Vec::new();

        for item in outputs {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("message") => {
                    if let Some(contents) = item.get("content").and_then(|c| c.as_array()) {
                        for c in contents {
                            if c.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                                if let Some(text) = c.get("text").and_then(|t| t.as_str()) {
                                    // "the last output_text wins"
                                    response_text = Some(text.to_string());
                                }
                            }
                        }
                    }
                }
                Some("function_call") => {
                    if let (Some(id), Some(name), Some(arguments)) = (
                        item.get("call_id").and_then(|v| v.as_str()),
                        item.get("name").and_then(|v| v.as_str()),
                        item.get("arguments").and_then(|v| v.as_str()),
                    ) {
                        tool_calls.push(ToolCall {
                            id: id.to_string(),
                            name: name.to_string(),
                            arguments: arguments.to_string(),
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
            thinking: None,
            response: response_text,
            prompt_tokens: input_tokens,
            completion_tokens: output_tokens,
            total_tokens: input_tokens + output_tokens,
            tool_calls,
        })
    }

    fn parse_stream_event(&self, ctx: &mut StreamingContext, event: &Json) {
        match event.get("type").and_then(|t| t.as_str()) {
            Some("response.output_text.delta") => {
                if let Some(text) = event.get("delta").and_then(|d| d.as_str()) {
                    ctx.text_content.push_str(text);
                }
            }
            Some("response.function_call_arguments.delta") => {
                let call_id = event
                    .get("call_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let delta = event.get("delta").and_then(|d| d.as_str()).unwrap_or_default();
                if let Some(partial) = ctx.tool_calls.iter_mut().find(|p| p.id == call_id) {
                    partial.arguments.push_str(delta);
                } else {
                    let name = event
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string();
                    ctx.tool_calls.push(PartialToolCall {
                        id: call_id.to_string(),
                        name,
                        arguments: delta.to_string(),
                    });
                }
            }
            Some("response.completed") => {
                if let Some(usage) = event.pointer("/response/usage") {
                    ctx.input_tokens = usage
                        .get("input_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0) as u32;
                    ctx.output_tokens = usage
                        .get("output_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0) as u32;
                }
                ctx.done = true;
            }
            Some("response.failed") | Some("response.incomplete") => {
                ctx.error_message = Some(
                    event
                        .pointer("/response/error/message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("response did not complete")
                        .to_string(),
                );
                ctx.done = true;
            }
            Some("error") => {
                ctx.error_message = Some(
                    event
                        .get("message")
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
    fn streams_function_call_arguments_across_deltas_by_call_id() {
        let provider = CodexProvider { account_id: None };
        let mut ctx = StreamingContext::default();
        provider.parse_stream_event(
            &mut ctx,
            &json!({"type":"response.function_call_arguments.delta","call_id":"c9","name":"read_file","delta":"{\"path\":\""}),
        );
        provider.parse_stream_event(
            &mut ctx,
            &json!({"type":"response.function_call_arguments.delta","call_id":"c9","delta":"x.c\"}"}),
        );
        provider.parse_stream_event(
            &mut ctx,
            &json!({"type":"response.completed","response":{"usage":{"input_tokens":20,"output_tokens":10}}}),
        );
        let calls = ctx.completed_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c9");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, "{\"path\":\"x.c\"}");
        assert!(ctx.done);
        assert_eq!(ctx.output_tokens, 10);
    }

    #[test]
    fn last_output_text_wins() {
        let provider = CodexProvider { account_id: None };
        let body = json!({
            "output": [
                {"type":"message","content":[{"type":"output_text","text":"first"}]},
                {"type":"message","content":[{"type":"output_text","text":"second"}]},
            ]
        });
        let parsed = provider.parse_response(&body).unwrap();
        assert_eq!(parsed.response.as_deref(), Some("second"));
    }

    fn fake_jwt(claims: &Json) -> String {
        use base64::Engine;
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let payload =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn extracts_account_id_from_nested_auth_claim() {
        let jwt = fake_jwt(&json!({
            "https://api.openai.com/auth": { "chatgpt_account_id": "acct-123" }
        }));
        assert_eq!(extract_account_id(&jwt).as_deref(), Some("acct-123"));
    }

    #[test]
    fn new_sets_the_chatgpt_account_id_header_from_a_real_jwt() {
        let jwt = fake_jwt(&json!({
            "https://api.openai.com/auth": { "chatgpt_account_id": "acct-456" }
        }));
        let provider = CodexProvider::new(&jwt);
        let headers = provider.build_headers(&jwt);
        assert!(headers
            .iter()
            .any(|(k, v)| k == "chatgpt-account-id" && v == "acct-456"));
    }

    #[test]
    fn missing_claim_yields_no_account_id() {
        let jwt = fake_jwt(&json!({ "sub": "user-1" }));
        assert_eq!(extract_account_id(&jwt), None);
    }
}
