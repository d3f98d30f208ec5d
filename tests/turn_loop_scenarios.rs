//! End-to-end turn-loop scenarios driven through the public crate API, using
//! a scripted [`Transport`] instead of a live network call. These mirror the
//! literal I/O scenarios enumerated in the design's §8 ("Testable
//! Properties"): echo-only, a single dispatched tool call, a denied tool
//! call, and exhausting the iteration cap.

use std::sync::Mutex;

use agentharness::harness::provider::OpenAiProvider;
use agentharness::harness::turn_loop::{Transport, TurnLoop};
use agentharness::{Config, HarnessError, Services};
use async_trait::async_trait;
use serde_json::{json, Value as Json};
use std::sync::Arc;

struct ScriptedTransport {
    responses: Mutex<Vec<Json>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<Json>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _url: &str, _headers: &[(String, String)], _body: &Json) -> Result<Json, HarnessError> {
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| HarnessError::internal("scripted transport ran out of scripted responses"))
    }
}

fn services_with_openai_key() -> Arc<Services> {
    let mut config = Config::default();
    config.openai_api_key = Some("test-key".to_string());
    Arc::new(Services::new(config))
}

fn turn_loop(services: Arc<Services>, responses: Vec<Json>) -> TurnLoop {
    TurnLoop::new(
        services,
        Box::new(OpenAiProvider::new(true)),
        Box::new(ScriptedTransport::new(responses)),
        "https://api.openai.com/v1/chat/completions".to_string(),
        "openai".to_string(),
        "gpt-test".to_string(),
        "you are a test assistant".to_string(),
    )
}

/// Scenario 1: echo-only turn. Empty history, user says "hi", the provider
/// answers with plain text and no tool calls — the loop terminates after a
/// single round-trip and the conversation store now holds exactly the user
/// and assistant messages.
#[tokio::test]
async fn echo_only_turn_terminates_in_one_round() {
    let services = services_with_openai_key();
    let loop_ = turn_loop(
        services.clone(),
        vec![json!({ "choices": [{"message": {"content": "hello"}}] })],
    );

    let reply = loop_.run_turn("hi").await.unwrap();
    assert_eq!(reply, "hello");

    let history = services.conversation_store.load_window(10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content.as_deref(), Some("hi"));
    assert_eq!(history[1].content.as_deref(), Some("hello"));
}

/// Scenario 2: a single shell tool call round-trips through dispatch and the
/// conversation ends up with the full user / assistant-with-tool-calls /
/// tool / assistant sequence, with the tool_call_id preserved end to end.
#[tokio::test]
async fn single_tool_call_dispatches_and_feeds_result_back() {
    let services = services_with_openai_key();
    let loop_ = turn_loop(
        services.clone(),
        vec![
            json!({
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "shell", "arguments": "{\"command\":\"echo A\"}"}}]
                }}]
            }),
            json!({ "choices": [{"message": {"content": "A"}}] }),
        ],
    );

    let reply = loop_.run_turn("list tmp").await.unwrap();
    assert_eq!(reply, "A");

    let history = services.conversation_store.load_window(10);
    assert_eq!(history.len(), 4);
    assert!(!history[1].tool_calls.is_empty());
    assert_eq!(history[1].tool_calls[0].id, "c1");
    assert_eq!(history[2].role, agentharness::Role::Tool);
    assert_eq!(history[2].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(history[3].content.as_deref(), Some("A"));
}

/// Scenario 3: a denied tool call (policy gate rejects a destructive shell
/// command) never reaches the shell executor, but the tool_call_id is still
/// echoed back so the pairing invariant holds, and the turn still concludes
/// with the model's follow-up text.
#[tokio::test]
async fn denied_tool_call_still_completes_the_turn() {
    let services = services_with_openai_key();
    let loop_ = turn_loop(
        services.clone(),
        vec![
            json!({
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "shell", "arguments": "{\"command\":\"rm -rf /\"}"}}]
                }}]
            }),
            json!({ "choices": [{"message": {"content": "I can't run that command"}}] }),
        ],
    );

    let reply = loop_.run_turn("delete everything").await.unwrap();
    assert_eq!(reply, "I can't run that command");

    let history = services.conversation_store.load_window(10);
    let tool_message = history.iter().find(|m| m.role == agentharness::Role::Tool).unwrap();
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    let payload: Json = serde_json::from_str(tool_message.content.as_deref().unwrap()).unwrap();
    assert_eq!(payload["success"], false);
}

/// Scenario 4: reaching the iteration cap is a terminal condition, not an
/// infinite loop — the turn appends a synthetic assistant message and
/// surfaces it as the turn's (successful) result rather than hanging or
/// erroring once the model keeps requesting tool calls past the configured
/// max.
#[tokio::test]
async fn exceeding_max_iterations_surfaces_a_synthetic_message_instead_of_looping_forever() {
    let services = services_with_openai_key();
    let looping_response = json!({
        "choices": [{"message": {
            "content": null,
            "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "shell", "arguments": "{\"command\":\"echo hi\"}"}}]
        }}]
    });
    let loop_ = turn_loop(services, vec![looping_response; 2]).with_max_iterations(2);

    let result = loop_.run_turn("loop forever").await.unwrap();
    assert_eq!(result, "max tool iterations reached");
}
