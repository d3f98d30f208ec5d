//! Provider adapter layer (C8). `types` holds the shared vocabulary every
//! adapter speaks; `openai`/`anthropic`/`codex` hold the wire-format-specific
//! implementations; [`select_provider`] is the registry's URL-substring
//! dispatch rule from §4.8.

pub mod anthropic;
pub mod codex;
pub mod openai;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use codex::CodexProvider;
pub use openai::OpenAiProvider;
pub use types::{
    ChatRequest, Message, ParsedResponse, PartialToolCall, Provider, Role, StreamingContext,
    ToolCall, ToolDefinition,
};

/// Pick the adapter for a base URL, per §4.8: a ChatGPT-backend Codex
/// endpoint takes the `/backend-api/codex` substring, `api.anthropic.com`
/// selects Anthropic, everything else (the public OpenAI API, or an
/// OpenAI-compatible local server/proxy) selects the OpenAI-chat adapter.
pub fn select_provider(base_url: &str, access_token: &str) -> Box<dyn Provider> {
    if base_url.contains("chatgpt.com") && base_url.contains("/backend-api/codex") {
        Box::new(CodexProvider::new(access_token))
    } else if base_url.contains("api.anthropic.com") {
        Box::new(AnthropicProvider::new())
    } else {
        Box::new(OpenAiProvider::new(base_url.contains("api.openai.com")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_codex_for_chatgpt_backend_url() {
        let provider = select_provider("https://chatgpt.com/backend-api/codex", "tok");
        assert_eq!(provider.name(), "codex");
    }

    #[test]
    fn selects_anthropic_for_anthropic_url() {
        let provider = select_provider("https://api.anthropic.com/v1/messages", "tok");
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn selects_openai_for_public_and_compatible_urls() {
        assert_eq!(
            select_provider("https://api.openai.com/v1/chat/completions", "tok").name(),
            "openai"
        );
        assert_eq!(
            select_provider("http://localhost:11434/v1/chat/completions", "tok").name(),
            "openai"
        );
    }
}
