// src/lib.rs

//! `agentharness` mediates a conversation between a user, a remote chat-completion
//! provider (OpenAI, Anthropic, or a Codex-style ChatGPT backend), and a population
//! of local tools. See [`harness::turn_loop`] for the orchestrating state machine.

pub mod harness;

pub use harness::config::Config;
pub use harness::error::HarnessError;
pub use harness::provider::types::{Message, ParsedResponse, Role, ToolCall, ToolDefinition};
pub use harness::services::Services;
pub use harness::turn_loop::TurnLoop;
