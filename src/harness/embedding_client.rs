//! Embedding client (C3): produces a `(dimension, vector)` pair for a text via
//! a remote embeddings endpoint. Mirrors the request/response handling style
//! of `clients/common.rs`'s `send_with_native_tools` — a thin `reqwest` POST,
//! `serde_json` in, `serde_json` out, no hand-rolled parsing of untrusted
//! bytes beyond `serde_json::Value` indexing.

use serde::Deserialize;
use serde_json::json;

use crate::harness::error::HarnessError;

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Talks to a `POST /v1/embeddings`-shaped endpoint. Constructed unconfigured
/// (`None` api key) when the harness is started without `OPENAI_API_KEY`; in
/// that state [`EmbeddingClient::embed`] is never called — callers must check
/// [`is_configured`](EmbeddingClient::is_configured) first and fall back to a
/// zero vector themselves (the degrade-gracefully contract of §4.3).
pub struct EmbeddingClient {
    api_key: Option<String>,
    base_url: String,
    model: String,
    dimension: u32,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(api_key: Option<String>, base_url: String, model: String, dimension: u32) -> Self {
        Self {
            api_key,
            base_url,
            model,
            dimension,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// Return a zero vector of the configured dimension — used by callers
    /// when `is_configured()` is false so chronological search keeps working
    /// while semantic search is effectively disabled (every zero vector is
    /// equidistant from every query).
    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimension as usize]
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, HarnessError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| HarnessError::unauthenticated("embedding client has no API key"))?;

        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::warn!("embeddings endpoint returned {}: {}", status, body);
            return Err(HarnessError::new(
                crate::harness::error::ErrorKind::ProviderError,
                format!("embeddings endpoint returned {}", status),
            )
            .with_details(body));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(HarnessError::from)?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| HarnessError::parse_error("embeddings response had no data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_without_an_api_key() {
        let client = EmbeddingClient::new(None, "https://api.openai.com".to_string(), "test".to_string(), 8);
        assert!(!client.is_configured());
        assert_eq!(client.zero_vector(), vec![0.0; 8]);
    }

    #[test]
    fn configured_with_an_api_key() {
        let client = EmbeddingClient::new(
            Some("sk-test".to_string()),
            "https://api.openai.com".to_string(),
            "text-embedding-3-small".to_string(),
            1536,
        );
        assert!(client.is_configured());
        assert_eq!(client.dimension(), 1536);
    }

    #[tokio::test]
    async fn embed_without_an_api_key_fails_fast_rather_than_making_a_request() {
        let client = EmbeddingClient::new(None, "https://api.openai.com".to_string(), "test".to_string(), 4);
        let err = client.embed("hello").await.unwrap_err();
        assert_eq!(err.kind, crate::harness::error::ErrorKind::Unauthenticated);
    }
}
