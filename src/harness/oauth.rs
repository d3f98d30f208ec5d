//! OAuth2 credential store (C10): PKCE authorization, code exchange, and
//! automatic refresh, backed by an at-rest-encrypted file cache.
//!
//! No sibling example in the corpus implements OAuth2 directly; this is
//! built from the literal contract in spec.md §4.10/§6 plus the donor's
//! general persistence idiom (a mutex-guarded table serialized to disk,
//! `thought_chain.rs`'s `save`/`load` pair) and its crypto-adjacent usage of
//! `sha2`/`subtle` already in `Cargo.toml` (those two crates were pulled in
//! for exactly this module — no sibling donor file uses them). The
//! encryption is a XOR stream cipher keyed by a SHA-256-derived keystream,
//! not an AEAD: the design notes are explicit that this layer is "not a
//! keychain replacement," only a deterrent against casual disk access by a
//! different OS user, and `Cargo.toml` carries no AEAD crate to reach for.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::harness::error::HarnessError;

/// Tokens a successful code exchange or refresh yields.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub scope: Option<String>,
}

/// A provider's OAuth2 vtable (§4.10's "ops"). `revoke_token` has a no-op
/// default since not every provider supports revocation.
#[async_trait]
pub trait OAuthProviderOps: Send + Sync {
    fn name(&self) -> &str;

    fn build_auth_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        state: &str,
        code_challenge: &str,
    ) -> String;

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        client_id: &str,
        client_secret: Option<&str>,
        redirect_uri: &str,
    ) -> Result<TokenResponse, HarnessError>;

    async fn refresh_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<TokenResponse, HarnessError>;

    async fn revoke_token(&self, _access_token: &str) -> Result<(), HarnessError> {
        Ok(())
    }
}

/// The localhost callback listens here; a pending PKCE flow older than this
/// is abandoned (§6's `CALLBACK_TIMEOUT`).
pub const CALLBACK_TIMEOUT_SECS: u64 = 300;
/// Tokens within this many seconds of expiry are treated as already expired
/// so a caller never races a provider's own clock skew.
const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthRecord {
    pub provider: String,
    pub account_id: String,
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub scope: Option<String>,
}

struct PendingAuth {
    provider: String,
    client_id: String,
    verifier: String,
    redirect_uri: String,
    started_at: Instant,
}

#[derive(Serialize, Deserialize, Default)]
struct RecordFile {
    records: Vec<OAuthRecord>,
}

fn key_of(provider: &str, account_id: &str) -> String {
    format!("{}:{}", provider, account_id)
}

/// Derives a keystream from `key` long enough to XOR against `len` bytes of
/// plaintext, by hashing `key || counter` block by block — a stream cipher
/// built from a hash rather than a dedicated AEAD primitive.
fn keystream(key: &[u8; 32], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 32);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(counter.to_le_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn xor_with_keystream(key: &[u8; 32], data: &[u8]) -> Vec<u8> {
    let ks = keystream(key, data.len());
    data.iter().zip(ks.iter()).map(|(a, b)| a ^ b).collect()
}

/// Per-user, per-host key derivation from SHA-256(uid || hostname || salt).
/// Weak by design (see module docs) — never presented as confidentiality
/// from a co-tenant root user.
fn derive_key(salt: &[u8]) -> [u8; 32] {
    let uid = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string());
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update(hostname.as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Generates a PKCE verifier/challenge pair (RFC 7636, S256 method).
fn generate_pkce() -> (String, String) {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let challenge_hash = Sha256::digest(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(challenge_hash);
    (verifier, challenge)
}

fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// The result of [`OAuthStore::begin_auth`].
pub struct BeginAuth {
    pub auth_url: String,
    pub state: String,
}

/// Holds records keyed by `(provider, account_id)` in a single
/// encrypted-at-rest file. All interior state is behind one `tokio::Mutex`
/// per the shared-resource policy (§5): a single lock held for the duration
/// of one operation, including the refresh round-trip, so two concurrent
/// [`OAuthStore::get_access_token`] calls for the same expired record cannot
/// both trigger a network refresh — the second sees the first's already-
/// refreshed record once it acquires the lock.
pub struct OAuthStore {
    path: PathBuf,
    key: [u8; 32],
    providers: std::sync::RwLock<HashMap<String, std::sync::Arc<dyn OAuthProviderOps>>>,
    pending: std::sync::Mutex<HashMap<String, PendingAuth>>,
    records: Mutex<HashMap<String, OAuthRecord>>,
}

impl OAuthStore {
    /// `path` is the on-disk file (`oauth.db` per §6); `salt` seeds key
    /// derivation (a fixed per-install constant is fine — the point is
    /// binding to uid+hostname, not secrecy of the salt itself).
    pub fn new(path: PathBuf, salt: &[u8]) -> Self {
        let key = derive_key(salt);
        let records = Self::load_from_disk(&path, &key).unwrap_or_default();
        Self {
            path,
            key,
            providers: std::sync::RwLock::new(HashMap::new()),
            pending: std::sync::Mutex::new(HashMap::new()),
            records: Mutex::new(records),
        }
    }

    fn load_from_disk(path: &PathBuf, key: &[u8; 32]) -> Option<HashMap<String, OAuthRecord>> {
        let ciphertext = std::fs::read(path).ok()?;
        let plaintext = xor_with_keystream(key, &ciphertext);
        let file: RecordFile = serde_json::from_slice(&plaintext).ok()?;
        Some(
            file.records
                .into_iter()
                .map(|r| (key_of(&r.provider, &r.account_id), r))
                .collect(),
        )
    }

    fn persist(&self, records: &HashMap<String, OAuthRecord>) -> Result<(), HarnessError> {
        let file = RecordFile {
            records: records.values().cloned().collect(),
        };
        let plaintext = serde_json::to_vec(&file)?;
        let ciphertext = xor_with_keystream(&self.key, &plaintext);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, ciphertext)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, permissions)?;
        }
        Ok(())
    }

    pub fn register_provider(&self, ops: std::sync::Arc<dyn OAuthProviderOps>) {
        self.providers
            .write()
            .unwrap()
            .insert(ops.name().to_string(), ops);
    }

    fn provider(&self, name: &str) -> Result<std::sync::Arc<dyn OAuthProviderOps>, HarnessError> {
        self.providers
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::not_found(format!("no oauth provider registered: {}", name)))
    }

    /// Generates a PKCE verifier/challenge and a random state, holds the
    /// verifier in memory keyed by state, and returns the auth URL to send
    /// the user to.
    pub fn begin_auth(
        &self,
        provider: &str,
        client_id: &str,
        scope: &str,
        redirect_uri: &str,
    ) -> Result<BeginAuth, HarnessError> {
        let ops = self.provider(provider)?;
        let (verifier, challenge) = generate_pkce();
        let state = generate_state();
        let auth_url = ops.build_auth_url(client_id, redirect_uri, scope, &state, &challenge);
        self.pending.lock().unwrap().insert(
            state.clone(),
            PendingAuth {
                provider: provider.to_string(),
                client_id: client_id.to_string(),
                verifier,
                redirect_uri: redirect_uri.to_string(),
                started_at: Instant::now(),
            },
        );
        Ok(BeginAuth { auth_url, state })
    }

    /// Exchanges `code` for tokens using the verifier stashed under `state`
    /// by [`Self::begin_auth`], and writes the resulting record.
    pub async fn complete_auth(
        &self,
        state: &str,
        code: &str,
        client_secret: Option<&str>,
        account_id: &str,
    ) -> Result<(), HarnessError> {
        let pending = {
            let mut pending_map = self.pending.lock().unwrap();
            pending_map.remove(state)
        };
        let pending = pending.ok_or_else(|| {
            HarnessError::invalid_argument("no pending authorization for this state")
        })?;
        if pending.started_at.elapsed() > Duration::from_secs(CALLBACK_TIMEOUT_SECS) {
            return Err(HarnessError::new(
                crate::harness::error::ErrorKind::TimedOut,
                "authorization flow timed out",
            ));
        }
        let ops = self.provider(&pending.provider)?;
        let tokens = ops
            .exchange_code(
                code,
                &pending.verifier,
                &pending.client_id,
                client_secret,
                &pending.redirect_uri,
            )
            .await?;
        let record = OAuthRecord {
            provider: pending.provider.clone(),
            account_id: account_id.to_string(),
            client_id: pending.client_id.clone(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: now() + tokens.expires_in,
            scope: tokens.scope,
        };
        let mut records = self.records.lock().await;
        records.insert(key_of(&pending.provider, account_id), record);
        self.persist(&records)
    }

    /// Returns a cached token if unexpired (within [`EXPIRY_SKEW_SECS`]),
    /// otherwise refreshes it. Holds the lock for the whole operation so a
    /// concurrent caller blocks until the refresh (if any) completes and
    /// then observes the refreshed record instead of triggering its own.
    pub async fn get_access_token(
        &self,
        provider: &str,
        account_id: &str,
    ) -> Result<String, HarnessError> {
        let mut records = self.records.lock().await;
        let record = records
            .get(&key_of(provider, account_id))
            .cloned()
            .ok_or_else(|| HarnessError::unauthenticated("no cached oauth record"))?;

        if record.expires_at - EXPIRY_SKEW_SECS > now() {
            return Ok(record.access_token);
        }

        let refresh_token = record.refresh_token.clone().ok_or_else(|| {
            HarnessError::unauthenticated("token expired and no refresh token available")
        })?;
        let ops = self.provider(provider)?;
        let tokens = ops
            .refresh_token(&refresh_token, &record.client_id, None)
            .await?;
        let updated = OAuthRecord {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.or(Some(refresh_token)),
            expires_at: now() + tokens.expires_in,
            scope: tokens.scope.or(record.scope.clone()),
            ..record
        };
        records.insert(key_of(provider, account_id), updated.clone());
        self.persist(&records)?;
        Ok(updated.access_token)
    }

    pub async fn has_token(&self, provider: &str, account_id: &str) -> bool {
        self.records
            .lock()
            .await
            .contains_key(&key_of(provider, account_id))
    }

    pub async fn revoke_token(&self, provider: &str, account_id: &str) -> Result<(), HarnessError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.remove(&key_of(provider, account_id)) {
            if let Ok(ops) = self.provider(provider) {
                ops.revoke_token(&record.access_token).await?;
            }
            self.persist(&records)?;
        }
        Ok(())
    }
}

/// Built-in provider ops for OpenAI's OAuth2 endpoints, used by the Codex
/// provider to mint bearer tokens. The account id is extracted from the
/// access token's JWT claim by `CodexProvider`, not by this module (§4.10).
pub struct OpenAiOAuthOps {
    client: reqwest::Client,
    auth_base: String,
    token_url: String,
}

impl OpenAiOAuthOps {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            auth_base: "https://auth.openai.com/oauth/authorize".to_string(),
            token_url: "https://auth.openai.com/oauth/token".to_string(),
        }
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, HarnessError> {
        let response = self.client.post(&self.token_url).form(form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::new(
                crate::harness::error::ErrorKind::ProviderError,
                format!("oauth token endpoint returned {}", status),
            )
            .with_details(body));
        }
        let body: serde_json::Value = response.json().await.map_err(HarnessError::from)?;
        Ok(TokenResponse {
            access_token: body
                .get("access_token")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HarnessError::parse_error("missing access_token"))?
                .to_string(),
            refresh_token: body
                .get("refresh_token")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            expires_in: body.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600),
            scope: body.get("scope").and_then(|v| v.as_str()).map(|s| s.to_string()),
        })
    }
}

impl Default for OpenAiOAuthOps {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthProviderOps for OpenAiOAuthOps {
    fn name(&self) -> &str {
        "openai"
    }

    fn build_auth_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        state: &str,
        code_challenge: &str,
    ) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            self.auth_base,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(scope),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        client_id: &str,
        _client_secret: Option<&str>,
        redirect_uri: &str,
    ) -> Result<TokenResponse, HarnessError> {
        self.post_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", verifier),
        ])
        .await
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        _client_secret: Option<&str>,
    ) -> Result<TokenResponse, HarnessError> {
        self.post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingOps {
        refresh_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OAuthProviderOps for CountingOps {
        fn name(&self) -> &str {
            "test"
        }

        fn build_auth_url(&self, _: &str, _: &str, _: &str, state: &str, _: &str) -> String {
            format!("https://example.test/authorize?state={}", state)
        }

        async fn exchange_code(
            &self,
            _code: &str,
            _verifier: &str,
            _client_id: &str,
            _client_secret: Option<&str>,
            _redirect_uri: &str,
        ) -> Result<TokenResponse, HarnessError> {
            Ok(TokenResponse {
                access_token: "first-token".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_in: -1,
                scope: None,
            })
        }

        async fn refresh_token(
            &self,
            _refresh_token: &str,
            _client_id: &str,
            _client_secret: Option<&str>,
        ) -> Result<TokenResponse, HarnessError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(TokenResponse {
                access_token: "refreshed-token".to_string(),
                refresh_token: Some("refresh-2".to_string()),
                expires_in: 3600,
                scope: None,
            })
        }
    }

    fn store_with_expired_record(refresh_calls: Arc<AtomicUsize>) -> (OAuthStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = OAuthStore::new(dir.path().join("oauth.db"), b"test-salt");
        store.register_provider(Arc::new(CountingOps { refresh_calls }));
        (store, dir)
    }

    #[tokio::test]
    async fn begin_then_complete_auth_caches_a_usable_token() {
        let (store, _dir) = store_with_expired_record(Arc::new(AtomicUsize::new(0)));
        let begin = store
            .begin_auth("test", "client-1", "scope", "http://localhost:1455/auth/callback")
            .unwrap();
        store
            .complete_auth(&begin.state, "code-1", None, "default")
            .await
            .unwrap();
        assert!(store.has_token("test", "default").await);
    }

    #[tokio::test]
    async fn concurrent_get_access_token_triggers_one_refresh() {
        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let (store, _dir) = store_with_expired_record(refresh_calls.clone());
        let begin = store
            .begin_auth("test", "client-1", "scope", "http://localhost:1455/auth/callback")
            .unwrap();
        store
            .complete_auth(&begin.state, "code-1", None, "default")
            .await
            .unwrap();

        let store = Arc::new(store);
        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.get_access_token("test", "default").await.unwrap() })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.get_access_token("test", "default").await.unwrap() })
        };
        let (token_a, token_b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(token_a, "refreshed-token");
        assert_eq!(token_b, "refreshed-token");
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    }
}
