//! Token budgeter (C5): estimates how many tokens a candidate request would
//! cost, and trims the oldest part of the conversation until it fits.
//!
//! Grounded in the donor's `context_strategy.rs` `ContextStrategy` trait shape
//! (a pluggable policy over "what survives in the window") — this module is
//! the spec-mandated default strategy the donor's trait would dispatch to;
//! [`crate::harness::services::Services`] wires it in directly rather than
//! through that trait object, since the spec names one fixed formula, not a
//! swappable family.

use crate::harness::error::HarnessError;
use crate::harness::provider::types::{Message, ToolDefinition};

/// Per-message and per-tool-schema overheads (§4.5's "tables"), in tokens.
const TOOL_SCHEMA_OVERHEAD: i64 = 50;
const MESSAGE_FRAME_OVERHEAD: i64 = 10;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub context_window: i64,
    pub max_context_window: i64,
    pub min_response_tokens: i64,
    pub safety_buffer_base: i64,
    pub safety_buffer_ratio: f64,
    pub chars_per_token: f64,
}

impl TokenConfig {
    /// Construct and validate per §4.5: `context_window <= 0`,
    /// `min_response_tokens >= context_window`, or `chars_per_token <= 0`
    /// are rejected; `max_context_window < context_window` is coerced equal
    /// rather than rejected.
    pub fn new(
        context_window: i64,
        max_context_window: i64,
        min_response_tokens: i64,
        safety_buffer_base: i64,
        safety_buffer_ratio: f64,
        chars_per_token: f64,
    ) -> Result<Self, HarnessError> {
        if context_window <= 0 {
            return Err(HarnessError::invalid_argument(
                "context_window must be positive",
            ));
        }
        if chars_per_token <= 0.0 {
            return Err(HarnessError::invalid_argument(
                "chars_per_token must be positive",
            ));
        }
        let min_response_tokens = min_response_tokens.max(150);
        if min_response_tokens >= context_window {
            return Err(HarnessError::invalid_argument(
                "min_response_tokens must be less than context_window",
            ));
        }
        let max_context_window = if max_context_window < context_window {
            context_window
        } else {
            max_context_window
        };
        Ok(Self {
            context_window,
            max_context_window,
            min_response_tokens,
            safety_buffer_base,
            safety_buffer_ratio: safety_buffer_ratio.clamp(0.0, 1.0),
            chars_per_token,
        })
    }

    /// A reasonable default tuned to a mid-size context window; callers
    /// building against a specific model should call [`TokenConfig::new`]
    /// with that model's real window instead.
    pub fn default_for_window(context_window: i64) -> Self {
        Self::new(context_window, context_window, 150, 50, 0.1, 4.0).expect("valid defaults")
    }
}

/// The outcome of [`TokenBudgeter::allocate`]: how many tokens the candidate
/// request would cost, and how much room is left for the response.
#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub estimated_prompt_tokens: i64,
    pub safety_buffer: i64,
    pub available_response_tokens: i64,
}

impl TokenUsage {
    pub fn fits(&self, min_response_tokens: i64) -> bool {
        self.available_response_tokens >= min_response_tokens
    }
}

pub struct TokenBudgeter {
    config: TokenConfig,
}

impl TokenBudgeter {
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// `ceil(len(text) / chars_per_token)`, no overheads — callers add
    /// per-message/per-schema overheads themselves via [`Self::allocate`].
    pub fn estimate_text(&self, text: &str) -> i64 {
        (text.chars().count() as f64 / self.config.chars_per_token).ceil() as i64
    }

    fn estimate_message(&self, message: &Message) -> i64 {
        let mut tokens = MESSAGE_FRAME_OVERHEAD;
        if let Some(content) = &message.content {
            tokens += self.estimate_text(content);
        }
        for tc in &message.tool_calls {
            tokens += self.estimate_text(&tc.name) + self.estimate_text(&tc.arguments);
        }
        tokens
    }

    fn estimate_history(&self, history: &[Message]) -> i64 {
        history.iter().map(|m| self.estimate_message(m)).sum()
    }

    fn estimate_tools(&self, tools: &[ToolDefinition]) -> i64 {
        tools
            .iter()
            .map(|t| TOOL_SCHEMA_OVERHEAD + self.estimate_text(&t.description))
            .sum()
    }

    fn dynamic_safety_buffer(&self, estimated_prompt: i64) -> i64 {
        let base = self.config.safety_buffer_base
            + (self.config.max_context_window as f64 * self.config.safety_buffer_ratio) as i64;
        if estimated_prompt as f64 > 0.7 * self.config.max_context_window as f64 {
            base + 50
        } else {
            base
        }
    }

    /// §4.5's `allocate`: sum `(system_prompt + history + next_user_message +
    /// tool_schemas)` into an estimated prompt token count, then derive
    /// `available_response = max_context_window - estimated_prompt -
    /// dynamic_safety_buffer`.
    pub fn allocate(
        &self,
        system_prompt: &str,
        history: &[Message],
        next_user_message: &str,
        tools: &[ToolDefinition],
    ) -> TokenUsage {
        let estimated_prompt = self.estimate_text(system_prompt)
            + self.estimate_history(history)
            + self.estimate_text(next_user_message)
            + self.estimate_tools(tools);
        let safety_buffer = self.dynamic_safety_buffer(estimated_prompt);
        let available_response =
            self.config.max_context_window - estimated_prompt - safety_buffer;
        TokenUsage {
            estimated_prompt_tokens: estimated_prompt,
            safety_buffer,
            available_response_tokens: available_response,
        }
    }

    /// Drop the oldest messages from `history` until the prompt built from
    /// it would fit within `target_tokens`, never orphaning a `tool` message
    /// (when a drop would, the owning assistant-with-tool-calls message and
    /// every tool result it introduced are dropped together). Returns the
    /// number of messages removed.
    pub fn trim(&self, history: &mut Vec<Message>, target_tokens: i64) -> usize {
        let mut removed = 0;
        while self.estimate_history(history) > target_tokens && !history.is_empty() {
            // Drop one conversational "turn" at a time: the oldest message,
            // widened forward to also drop any tool messages it introduced
            // (an assistant-with-tool-calls at index 0 with its tool results
            // immediately following) so pairing survives the trim.
            let mut drop_count = 1;
            if history[0].role == crate::harness::provider::types::Role::Assistant
                && !history[0].tool_calls.is_empty()
            {
                let ids: std::collections::HashSet<&str> =
                    history[0].tool_calls.iter().map(|tc| tc.id.as_str()).collect();
                while drop_count < history.len() {
                    let next = &history[drop_count];
                    let introduced = next
                        .tool_call_id
                        .as_deref()
                        .map(|id| ids.contains(id))
                        .unwrap_or(false);
                    if introduced {
                        drop_count += 1;
                    } else {
                        break;
                    }
                }
            }
            history.drain(0..drop_count);
            removed += drop_count;
        }
        removed
    }
}
