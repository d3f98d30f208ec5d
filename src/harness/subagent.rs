//! Subagent manager (C13): forks child harness instances, reads their
//! stdout non-blockingly, and re-injects a completion notice into the
//! parent's conversation store when a child exits.
//!
//! Grounded in the donor's `BashTool::execute` async-process pattern
//! (`src/cloudllm/tools/bash.rs`: spawn with piped stdio, read with a size
//! cap, await exit) generalized from "run to completion and return" to
//! "run in the background, poll for partial output, notify on exit" — the
//! same `tokio::process::Command` primitive, a different consumption shape.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;

use crate::harness::conversation_store::ConversationStore;
use crate::harness::embedding_client::EmbeddingClient;
use crate::harness::error::HarnessError;
use crate::harness::provider::types::Role;

/// Output is capped the same way the shell tool caps it (§4.13 references no
/// separate limit, so we reuse the shell tool's 512 KiB convention).
const OUTPUT_CAP_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Serialize)]
struct TaskDescriptor<'a> {
    prompt: &'a str,
    tools: &'a [String],
    timeout_s: u64,
}

struct Inner {
    buffer: Mutex<String>,
    status: Mutex<SubagentStatus>,
    exit_code: Mutex<Option<i32>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(String::new()),
            status: Mutex::new(SubagentStatus::Running),
            exit_code: Mutex::new(None),
        }
    }
}

/// A point-in-time read of a subagent's progress, returned by
/// [`SubagentManager::poll`].
#[derive(Debug, Clone)]
pub struct SubagentSnapshot {
    pub status: SubagentStatus,
    pub stdout: String,
    pub exit_code: Option<i32>,
}

/// Generates a 16-hex-character id from a CSPRNG, falling back to a
/// time/pid-derived id if the RNG is somehow unavailable (§4.13).
fn generate_subagent_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    if bytes == [0u8; 8] {
        // thread_rng() never actually yields an all-zero block in practice;
        // this is the time/pid fallback §4.13 asks for if it somehow did.
        let pid = std::process::id() as u64;
        let time = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
        bytes.copy_from_slice(&(pid ^ time).to_le_bytes());
    }
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Manages a population of child harness processes. Holds the parent's
/// conversation store and embedder (passed explicitly, as an
/// [`crate::harness::services::Services`] field would) so a completion
/// notice can be appended without reaching into a global singleton.
pub struct SubagentManager {
    harness_binary: std::path::PathBuf,
    handles: Mutex<HashMap<String, Arc<Inner>>>,
    conversation_store: Arc<ConversationStore>,
    embedder: Arc<EmbeddingClient>,
}

impl SubagentManager {
    pub fn new(
        harness_binary: std::path::PathBuf,
        conversation_store: Arc<ConversationStore>,
        embedder: Arc<EmbeddingClient>,
    ) -> Self {
        Self {
            harness_binary,
            handles: Mutex::new(HashMap::new()),
            conversation_store,
            embedder,
        }
    }

    /// Forks a child harness process, writes a JSON task descriptor to its
    /// stdin, and begins draining its stdout in a background task. Returns
    /// immediately with the new subagent's id — never blocks on the child's
    /// completion.
    pub fn spawn(
        &self,
        prompt: String,
        tools: Vec<String>,
        timeout: Duration,
        spawning_tool_call_id: String,
    ) -> Result<String, HarnessError> {
        let id = generate_subagent_id();
        let descriptor = TaskDescriptor {
            prompt: &prompt,
            tools: &tools,
            timeout_s: timeout.as_secs(),
        };
        let payload = serde_json::to_vec(&descriptor)?;

        let mut child = TokioCommand::new(&self.harness_binary)
            .arg("--subagent")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HarnessError::internal(format!("failed to spawn subagent: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::internal("subagent child has no stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::internal("subagent child has no stdout"))?;

        let inner = Arc::new(Inner::new());
        self.handles.lock().unwrap().insert(id.clone(), inner.clone());

        let conversation_store = self.conversation_store.clone();
        let embedder = self.embedder.clone();
        let subagent_id = id.clone();
        let timeout_duration = timeout;

        tokio::spawn(async move {
            let _ = stdin.write_all(&payload).await;
            drop(stdin);

            let read_loop = async {
                let mut chunk = [0u8; 4096];
                loop {
                    match stdout.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => {
                            let mut buffer = inner.buffer.lock().unwrap();
                            if buffer.len() < OUTPUT_CAP_BYTES {
                                buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                                if buffer.len() > OUTPUT_CAP_BYTES {
                                    buffer.truncate(OUTPUT_CAP_BYTES);
                                    buffer.push_str("\n... [output truncated]");
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }
            };
            let _ = tokio::time::timeout(timeout_duration, read_loop).await;

            let exit_status = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            let (status, exit_code) = match exit_status {
                Ok(Ok(status)) if status.success() => (SubagentStatus::Completed, status.code()),
                Ok(Ok(status)) => (SubagentStatus::Failed, status.code()),
                _ => {
                    let _ = child.start_kill();
                    (SubagentStatus::Failed, None)
                }
            };
            *inner.status.lock().unwrap() = status;
            *inner.exit_code.lock().unwrap() = exit_code;

            let stdout_snapshot = inner.buffer.lock().unwrap().clone();
            let completion = serde_json::json!({
                "success": matches!(status, SubagentStatus::Completed),
                "subagent_id": subagent_id,
                "status": status,
                "output": stdout_snapshot,
                "exit_code": exit_code,
            });
            let _ = conversation_store
                .append(
                    &embedder,
                    Role::Tool,
                    &completion.to_string(),
                    Some(&spawning_tool_call_id),
                    Some("subagent_spawn"),
                    &[],
                )
                .await;
        });

        Ok(id)
    }

    /// Non-blocking read of a subagent's current progress.
    pub fn poll(&self, id: &str) -> Option<SubagentSnapshot> {
        let handles = self.handles.lock().unwrap();
        let inner = handles.get(id)?;
        Some(SubagentSnapshot {
            status: *inner.status.lock().unwrap(),
            stdout: inner.buffer.lock().unwrap().clone(),
            exit_code: *inner.exit_code.lock().unwrap(),
        })
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.handles.lock().unwrap().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_sixteen_hex_chars_and_unique() {
        let a = generate_subagent_id();
        let b = generate_subagent_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn spawning_an_unknown_binary_reports_an_error_not_a_panic() {
        let store = Arc::new(ConversationStore::new(
            crate::harness::document_store::DocumentStore::new(),
            4,
        ));
        let embedder = Arc::new(EmbeddingClient::new(
            None,
            "http://localhost".to_string(),
            "test".to_string(),
            4,
        ));
        let manager = SubagentManager::new(
            std::path::PathBuf::from("/nonexistent/harness-binary-does-not-exist"),
            store,
            embedder,
        );
        let result = manager.spawn(
            "do something".to_string(),
            vec![],
            Duration::from_secs(1),
            "call-1".to_string(),
        );
        assert!(result.is_err());
    }
}
