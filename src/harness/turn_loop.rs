//! Turn loop (C11): the state machine that drives one user message through
//! request-building, provider dispatch, and tool execution until the model
//! produces a final response with no further tool calls.
//!
//! Grounded in the donor's `clients/common.rs::send_with_native_tools`
//! request/response cycle, generalized from "one request, one response" into
//! the full `Ready -> BuildingRequest -> AwaitingResponse -> ExecutingTools
//! -> (BuildingRequest | Finished)` cycle §4.11 describes. [`Transport`] is
//! the seam that isolates HTTP from the state machine — the same
//! narrow-trait-over-an-external-capability shape used for
//! [`crate::harness::tools::pdf::PdfExtractor`] and
//! [`crate::harness::tools::python::PythonInterpreter`] — so the loop's
//! control flow can be exercised in tests without a live network call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::harness::error::{ErrorKind, HarnessError};
use crate::harness::policy_gate::Decision;
use crate::harness::provider::types::{ChatRequest, Message, Provider, Role, ToolCall};
use crate::harness::services::Services;
use crate::harness::tool_registry::Dialect;
use crate::harness::tools::subagent::spawn_subagent;

/// Default cap on tool-call round-trips within a single [`TurnLoop::run_turn`]
/// call, per §4.11.
pub const MAX_ITERATIONS: usize = 25;

/// How many recent messages (plus, if an embedder is configured, semantically
/// relevant older ones) are loaded into each request's history.
const RECENT_WINDOW: usize = 40;
const SEMANTIC_RECALL: usize = 5;

/// Bounded HTTP retry budget for transient provider failures, per §5 ("HTTP
/// retries on transient errors are bounded (default 3 attempts with
/// exponential backoff) and do not reset the turn").
const MAX_HTTP_ATTEMPTS: usize = 3;
const RETRY_BASE_DELAY_MS: u64 = 200;

/// The state machine's current phase, readable via [`TurnLoop::state`] for
/// callers that want to surface progress (e.g. a CLI spinner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Ready,
    BuildingRequest,
    AwaitingResponse,
    ExecutingTools,
    Finished,
}

/// Abstracts the wire transport a provider request goes over, so the state
/// machine can be driven in tests without opening a socket. The real
/// implementation ([`HttpTransport`]) is a thin `reqwest` POST, the same
/// shape [`crate::harness::embedding_client::EmbeddingClient::embed`] uses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, headers: &[(String, String)], body: &Json) -> Result<Json, HarnessError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, headers: &[(String, String)], body: &Json) -> Result<Json, HarnessError> {
        let mut request = self.client.post(url).json(body);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            log::warn!("provider endpoint returned {}: {}", status, text);
            return Err(HarnessError::new(
                ErrorKind::ProviderError,
                format!("provider endpoint returned {}", status),
            )
            .with_details(text));
        }
        response.json().await.map_err(HarnessError::from)
    }
}

/// One configured turn loop: a provider adapter, a transport, a model name,
/// and a system prompt, all wired against a shared [`Services`] handle.
pub struct TurnLoop {
    services: Arc<Services>,
    provider: Box<dyn Provider>,
    transport: Box<dyn Transport>,
    base_url: String,
    provider_key: String,
    model: String,
    system_prompt: String,
    max_iterations: usize,
    state: std::sync::Mutex<TurnState>,
    cancelled: AtomicBool,
}

impl TurnLoop {
    pub fn new(
        services: Arc<Services>,
        provider: Box<dyn Provider>,
        transport: Box<dyn Transport>,
        base_url: String,
        provider_key: String,
        model: String,
        system_prompt: String,
    ) -> Self {
        Self {
            services,
            provider,
            transport,
            base_url,
            provider_key,
            model,
            system_prompt,
            max_iterations: MAX_ITERATIONS,
            state: std::sync::Mutex::new(TurnState::Ready),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn state(&self) -> TurnState {
        *self.state.lock().unwrap()
    }

    /// Request cancellation of an in-flight [`Self::run_turn`]. Checked once
    /// per loop iteration (between tool-call rounds, not mid-tool-call) —
    /// there is no preemption within an already-dispatched tool or an
    /// already-sent provider request.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn set_state(&self, state: TurnState) {
        *self.state.lock().unwrap() = state;
    }

    /// Drive one user message to completion: append it, loop
    /// build-request/send/execute-tools until the model returns a response
    /// with no tool calls (or [`Self::max_iterations`] is hit), append the
    /// final assistant response, and return its text.
    pub async fn run_turn(&self, user_message: &str) -> Result<String, HarnessError> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.set_state(TurnState::Ready);

        self.services
            .conversation_store
            .append(&self.services.embedding_client, Role::User, user_message, None, None, &[])
            .await?;

        let access_token = self
            .services
            .config
            .resolve_credential(&self.provider_key, Some(&self.services.oauth_store))
            .await
            .ok_or_else(|| HarnessError::unauthenticated(format!("no credential configured for {}", self.provider_key)))?;

        for _ in 0..self.max_iterations {
            if self.cancelled.load(Ordering::SeqCst) {
                self.set_state(TurnState::Ready);
                return Err(HarnessError::new(ErrorKind::InternalError, "turn cancelled"));
            }

            self.set_state(TurnState::BuildingRequest);
            let request = self.build_request(user_message).await?;

            self.set_state(TurnState::AwaitingResponse);
            let headers = self.provider.build_headers(&access_token);
            let body = self.provider.build_request_json(&request);
            let response_json = match self.send_with_retry(&headers, &body).await {
                Ok(json) => json,
                Err(err) => {
                    let message = format!("request failed after retries: {}", err);
                    self.services
                        .conversation_store
                        .append(&self.services.embedding_client, Role::Assistant, &message, None, None, &[])
                        .await?;
                    self.set_state(TurnState::Finished);
                    return Ok(message);
                }
            };
            let parsed = self.provider.parse_response(&response_json)?;

            if parsed.tool_calls.is_empty() {
                let final_text = parsed.response.unwrap_or_default();
                self.services
                    .conversation_store
                    .append(&self.services.embedding_client, Role::Assistant, &final_text, None, None, &[])
                    .await?;
                self.set_state(TurnState::Finished);
                return Ok(final_text);
            }

            self.set_state(TurnState::ExecutingTools);
            self.services
                .conversation_store
                .append(
                    &self.services.embedding_client,
                    Role::Assistant,
                    parsed.response.as_deref().unwrap_or(""),
                    None,
                    None,
                    &parsed.tool_calls,
                )
                .await?;

            for tool_call in &parsed.tool_calls {
                let result = self.dispatch(tool_call).await;
                self.services
                    .conversation_store
                    .append(
                        &self.services.embedding_client,
                        Role::Tool,
                        &result.content,
                        Some(&tool_call.id),
                        Some(&tool_call.name),
                        &[],
                    )
                    .await?;
            }
        }

        let message = "max tool iterations reached".to_string();
        self.services
            .conversation_store
            .append(&self.services.embedding_client, Role::Assistant, &message, None, None, &[])
            .await?;
        self.set_state(TurnState::Finished);
        Ok(message)
    }

    /// Send one provider request, retrying up to [`MAX_HTTP_ATTEMPTS`] times
    /// with exponential backoff when the transport reports a transient
    /// `NetworkError`/`TimedOut` failure (§5/§7). Any other error kind (a
    /// well-formed provider error, a parse failure) is not retried.
    async fn send_with_retry(
        &self,
        headers: &[(String, String)],
        body: &Json,
    ) -> Result<Json, HarnessError> {
        let mut attempt = 0;
        loop {
            match self.transport.send(&self.base_url, headers, body).await {
                Ok(json) => return Ok(json),
                Err(err)
                    if matches!(err.kind, ErrorKind::NetworkError | ErrorKind::TimedOut)
                        && attempt + 1 < MAX_HTTP_ATTEMPTS =>
                {
                    attempt += 1;
                    let backoff = Duration::from_millis(RETRY_BASE_DELAY_MS * (1 << (attempt - 1)));
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Builds the [`ChatRequest`] for the next provider call: recent (plus
    /// semantically relevant, if configured) history, the tool schema array
    /// rendered for this provider's dialect, and a `max_tokens` derived from
    /// [`crate::harness::token_budget::TokenBudgeter::allocate`], trimming
    /// history first if it wouldn't leave room for a minimally useful
    /// response.
    async fn build_request(&self, user_message: &str) -> Result<ChatRequest, HarnessError> {
        let mut history = self
            .services
            .conversation_store
            .load_extended(
                &self.services.embedding_client,
                RECENT_WINDOW,
                SEMANTIC_RECALL,
                user_message,
            )
            .await?;

        let dialect = match self.provider.name() {
            "anthropic" => Dialect::Anthropic,
            "codex" => Dialect::Codex,
            _ => Dialect::OpenAi,
        };
        let _ = self.services.tool_registry.render_schema(dialect);
        let tools = self.services.tool_registry.tool_definitions();

        let budgeter = &self.services.token_budgeter;
        let usage = budgeter.allocate(&self.system_prompt, &history, "", &tools);
        if !usage.fits(budgeter.config().min_response_tokens) {
            let target = budgeter.config().max_context_window
                - budgeter.config().min_response_tokens
                - usage.safety_buffer;
            budgeter.trim(&mut history, target.max(0));
        }

        let usage = budgeter.allocate(&self.system_prompt, &history, "", &tools);
        let max_tokens = usage.available_response_tokens.max(budgeter.config().min_response_tokens) as u32;

        Ok(ChatRequest {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            history,
            max_tokens,
            tools,
            stream: false,
        })
    }

    /// The outcome of dispatching one tool call: always succeeds in
    /// producing *a* result string (§4.6 — dispatch never aborts the turn),
    /// whether that's the tool's own output or a policy-gate denial.
    async fn dispatch(&self, tool_call: &ToolCall) -> DispatchedResult {
        if tool_call.name == "subagent_spawn" {
            let outcome = spawn_subagent(&self.services.subagent_manager, &tool_call.arguments, tool_call.id.clone()).await;
            let result_json = outcome.into_result_json();
            return DispatchedResult {
                content: serde_json::to_string(&result_json).unwrap_or_default(),
            };
        }

        let parsed_args: Json = serde_json::from_str(&tool_call.arguments).unwrap_or(Json::Null);
        match self.services.policy_gate.evaluate(&tool_call.name, &parsed_args) {
            Decision::Deny(reason) => {
                self.services.policy_gate.record_outcome(&tool_call.name, false);
                DispatchedResult {
                    content: serde_json::json!({ "success": false, "error": reason }).to_string(),
                }
            }
            Decision::Allow => {
                let result = self.services.tool_registry.dispatch(tool_call).await;
                self.services.policy_gate.record_outcome(&tool_call.name, result.success);
                DispatchedResult { content: result.result }
            }
        }
    }
}

struct DispatchedResult {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::config::Config;
    use crate::harness::provider::OpenAiProvider;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct ScriptedTransport {
        responses: StdMutex<Vec<Json>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Json>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().rev().collect()),
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
                .ok_or_else(|| HarnessError::internal("scripted transport ran out of responses"))
        }
    }

    fn test_services() -> Arc<Services> {
        let mut config = Config::default();
        config.openai_api_key = Some("test-key".to_string());
        Arc::new(Services::new(config))
    }

    #[tokio::test]
    async fn final_response_with_no_tool_calls_ends_the_turn() {
        let services = test_services();
        let transport = ScriptedTransport::new(vec![json!({
            "choices": [{"message": {"content": "hello there"}}]
        })]);
        let turn_loop = TurnLoop::new(
            services,
            Box::new(OpenAiProvider::new(true)),
            Box::new(transport),
            "https://api.openai.com/v1/chat/completions".to_string(),
            "openai".to_string(),
            "gpt-test".to_string(),
            "you are a test assistant".to_string(),
        );
        let result = turn_loop.run_turn("hi").await.unwrap();
        assert_eq!(result, "hello there");
        assert_eq!(turn_loop.state(), TurnState::Finished);
    }

    #[tokio::test]
    async fn a_tool_call_round_trip_dispatches_then_continues() {
        let services = test_services();
        let transport = ScriptedTransport::new(vec![
            json!({
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "shell", "arguments": "{\"command\":\"echo hi\"}"}}]
                }}]
            }),
            json!({ "choices": [{"message": {"content": "done"}}] }),
        ]);
        let turn_loop = TurnLoop::new(
            services,
            Box::new(OpenAiProvider::new(true)),
            Box::new(transport),
            "https://api.openai.com/v1/chat/completions".to_string(),
            "openai".to_string(),
            "gpt-test".to_string(),
            "you are a test assistant".to_string(),
        );
        let result = turn_loop.run_turn("run echo hi").await.unwrap();
        assert_eq!(result, "done");
    }

    #[tokio::test]
    async fn denied_shell_command_never_reaches_the_executor_but_the_turn_continues() {
        let services = test_services();
        let transport = ScriptedTransport::new(vec![
            json!({
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "shell", "arguments": "{\"command\":\"rm -rf /\"}"}}]
                }}]
            }),
            json!({ "choices": [{"message": {"content": "acknowledged the denial"}}] }),
        ]);
        let turn_loop = TurnLoop::new(
            services,
            Box::new(OpenAiProvider::new(true)),
            Box::new(transport),
            "https://api.openai.com/v1/chat/completions".to_string(),
            "openai".to_string(),
            "gpt-test".to_string(),
            "you are a test assistant".to_string(),
        );
        let result = turn_loop.run_turn("delete everything").await.unwrap();
        assert_eq!(result, "acknowledged the denial");
    }

    #[tokio::test]
    async fn exceeding_max_iterations_reports_an_error_instead_of_looping_forever() {
        let services = test_services();
        let looping_response = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{"id": "c1", "type": "function", "function": {"name": "shell", "arguments": "{\"command\":\"echo hi\"}"}}]
            }}]
        });
        let transport = ScriptedTransport::new(vec![looping_response; 3]);
        let turn_loop = TurnLoop::new(
            services,
            Box::new(OpenAiProvider::new(true)),
            Box::new(transport),
            "https://api.openai.com/v1/chat/completions".to_string(),
            "openai".to_string(),
            "gpt-test".to_string(),
            "you are a test assistant".to_string(),
        )
        .with_max_iterations(3);
        let result = turn_loop.run_turn("loop forever").await.unwrap();
        assert_eq!(result, "max tool iterations reached");
        assert_eq!(turn_loop.state(), TurnState::Finished);
    }

    struct FlakyTransport {
        failures_then_success: StdMutex<(usize, Option<Json>)>,
    }

    impl FlakyTransport {
        fn new(failures: usize, success: Json) -> Self {
            Self {
                failures_then_success: StdMutex::new((failures, Some(success))),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, _url: &str, _headers: &[(String, String)], _body: &Json) -> Result<Json, HarnessError> {
            let mut guard = self.failures_then_success.lock().unwrap();
            if guard.0 > 0 {
                guard.0 -= 1;
                return Err(HarnessError::new(ErrorKind::NetworkError, "connection reset"));
            }
            Ok(guard.1.take().expect("success response already consumed"))
        }
    }

    #[tokio::test]
    async fn transient_network_errors_are_retried_within_the_attempt_budget() {
        let services = test_services();
        let transport = FlakyTransport::new(2, json!({ "choices": [{"message": {"content": "recovered"}}] }));
        let turn_loop = TurnLoop::new(
            services,
            Box::new(OpenAiProvider::new(true)),
            Box::new(transport),
            "https://api.openai.com/v1/chat/completions".to_string(),
            "openai".to_string(),
            "gpt-test".to_string(),
            "you are a test assistant".to_string(),
        );
        let result = turn_loop.run_turn("hi").await.unwrap();
        assert_eq!(result, "recovered");
    }

    struct AlwaysFailsTransport;

    #[async_trait]
    impl Transport for AlwaysFailsTransport {
        async fn send(&self, _url: &str, _headers: &[(String, String)], _body: &Json) -> Result<Json, HarnessError> {
            Err(HarnessError::new(ErrorKind::TimedOut, "connection timed out"))
        }
    }

    #[tokio::test]
    async fn exhausting_the_retry_budget_surfaces_a_synthetic_failure_message() {
        let services = test_services();
        let turn_loop = TurnLoop::new(
            services,
            Box::new(OpenAiProvider::new(true)),
            Box::new(AlwaysFailsTransport),
            "https://api.openai.com/v1/chat/completions".to_string(),
            "openai".to_string(),
            "gpt-test".to_string(),
            "you are a test assistant".to_string(),
        );
        let result = turn_loop.run_turn("hi").await.unwrap();
        assert!(result.contains("request failed after retries"));
        assert_eq!(turn_loop.state(), TurnState::Finished);
    }

    #[tokio::test]
    async fn cancel_before_run_turn_short_circuits_immediately() {
        let services = test_services();
        let transport = ScriptedTransport::new(vec![json!({"choices": [{"message": {"content": "unused"}}]})]);
        let turn_loop = TurnLoop::new(
            services,
            Box::new(OpenAiProvider::new(true)),
            Box::new(transport),
            "https://api.openai.com/v1/chat/completions".to_string(),
            "openai".to_string(),
            "gpt-test".to_string(),
            "you are a test assistant".to_string(),
        );
        turn_loop.cancel();
        let result = turn_loop.run_turn("hi").await;
        assert!(result.is_err());
    }
}
