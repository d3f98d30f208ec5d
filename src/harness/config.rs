//! Configuration for the agent harness.
//!
//! Reads the four environment variables the core is contractually allowed to
//! consume (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `OPENAI_API_URL`,
//! `EMBEDDING_MODEL`) plus the on-disk state directory. No file-format parsing
//! dependency is introduced — callers that want TOML/YAML config files layer
//! that on top and hand us the resulting values.
//!
//! # Example
//!
//! ```rust
//! use agentharness::Config;
//!
//! let config = Config::from_env();
//! // unset in test environments, so neither provider is configured:
//! let _ = config.openai_api_key.is_some();
//! ```

use std::path::PathBuf;

/// Global configuration for the harness, built from environment variables.
///
/// This struct is intentionally minimal: construct it however you like, or
/// call [`Config::from_env`] to read the four env vars named in the external
/// interfaces contract.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    /// Overrides the default `https://api.openai.com` base URL; lets an
    /// OpenAI-compatible local server (e.g. Ollama's OpenAI shim) stand in.
    pub openai_api_url: Option<String>,
    pub embedding_model: Option<String>,
    /// Root of the on-disk state directory (`store.db`, `oauth.db`, `tools/`).
    pub state_dir: PathBuf,
}

impl Config {
    /// Read configuration from the process environment. Never panics —
    /// missing variables simply leave the corresponding provider unconfigured,
    /// mirroring [`crate::harness::embedding_client::EmbeddingClient::is_configured`].
    pub fn from_env() -> Self {
        Self {
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY"),
            openai_api_url: non_empty_env("OPENAI_API_URL"),
            embedding_model: non_empty_env("EMBEDDING_MODEL"),
            state_dir: state_dir_from_env(),
        }
    }

    /// The OpenAI base URL to use: the `OPENAI_API_URL` override if set, else
    /// the default public endpoint.
    pub fn openai_base_url(&self) -> &str {
        self.openai_api_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
    }

    /// Resolve the credential to use for `provider`, preferring an OAuth2
    /// token over the static API key when one is cached and valid. `oauth`
    /// is `None` when no OAuth store has been wired up (most non-Codex
    /// deployments).
    pub async fn resolve_credential(
        &self,
        provider: &str,
        oauth: Option<&crate::harness::oauth::OAuthStore>,
    ) -> Option<String> {
        if let Some(store) = oauth {
            if let Ok(token) = store.get_access_token(provider, "default").await {
                return Some(token);
            }
        }
        match provider {
            "openai" | "codex" => self.openai_api_key.clone(),
            "anthropic" => self.anthropic_api_key.clone(),
            _ => None,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn state_dir_from_env() -> PathBuf {
    if let Some(xdg) = non_empty_env("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("agentharness");
    }
    if let Some(home) = non_empty_env("HOME") {
        return PathBuf::from(home).join(".local").join("agentharness");
    }
    PathBuf::from(".agentharness")
}
