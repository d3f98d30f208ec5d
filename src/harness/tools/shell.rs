//! The `shell` tool (C7). Grounded directly in the donor's `BashTool`
//! (`src/cloudllm/tools/bash.rs`): piped stdio, a size-capped reader, a
//! `tokio::time::timeout` wrapping the whole child lifecycle rather than a
//! signal sent after the fact. Generalized to report through the
//! [`ToolOutcome`] envelope and to also run the call through
//! [`crate::harness::policy_gate::PolicyGate`]'s built-in denylist before
//! spawning, per §4.7's "rejects patterns... before spawn."
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;

use crate::harness::policy_gate::{Decision, PolicyGate};
use crate::harness::tool_registry::{ToolExecutor, ToolOutcome};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 300;
const OUTPUT_CAP_BYTES: usize = 512 * 1024;

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
    working_dir: Option<String>,
    #[serde(default)]
    timeout_s: Option<u64>,
    #[serde(default = "default_true")]
    capture_stderr: bool,
}

fn default_true() -> bool {
    true
}

/// Reads up to [`OUTPUT_CAP_BYTES`] from a child's pipe, appending a
/// truncation marker if more was available.
async fn read_capped<R: AsyncReadExt + Unpin>(mut reader: R) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buffer.len() + n > OUTPUT_CAP_BYTES {
                    let remaining = OUTPUT_CAP_BYTES.saturating_sub(buffer.len());
                    buffer.extend_from_slice(&chunk[..remaining.min(n)]);
                    buffer.extend_from_slice(b"\n... [output truncated]");
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub struct ShellTool {
    policy: std::sync::Arc<PolicyGate>,
    cwd_restriction: Option<PathBuf>,
}

impl ShellTool {
    pub fn new(policy: std::sync::Arc<PolicyGate>) -> Self {
        Self {
            policy,
            cwd_restriction: None,
        }
    }

    pub fn with_cwd_restriction(mut self, path: PathBuf) -> Self {
        self.cwd_restriction = Some(path);
        self
    }
}

#[async_trait]
impl ToolExecutor for ShellTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: ShellArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };

        if let Decision::Deny(reason) = self.policy.evaluate_shell_command(&args.command) {
            return ToolOutcome::err(reason);
        }

        let working_dir = match (&args.working_dir, &self.cwd_restriction) {
            (Some(dir), Some(root)) => {
                let candidate = root.join(dir);
                if !candidate.starts_with(root) {
                    return ToolOutcome::err("working_dir escapes restricted root");
                }
                Some(candidate)
            }
            (Some(dir), None) => Some(PathBuf::from(dir)),
            (None, root) => root.clone(),
        };

        let timeout_secs = args.timeout_s.unwrap_or(DEFAULT_TIMEOUT_SECS).min(MAX_TIMEOUT_SECS);
        let timeout = Duration::from_secs(timeout_secs);

        let mut command = TokioCommand::new("/bin/bash");
        command.arg("-c").arg(&args.command);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        command.stdin(std::process::Stdio::null());
        if let Some(dir) = &working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => return ToolOutcome::err(format!("failed to spawn shell: {}", e)),
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let start = Instant::now();
        let run = async {
            let stdout_text = match stdout {
                Some(r) => read_capped(r).await,
                None => String::new(),
            };
            let stderr_text = if args.capture_stderr {
                match stderr {
                    Some(r) => read_capped(r).await,
                    None => String::new(),
                }
            } else {
                String::new()
            };
            let status = child.wait().await;
            (stdout_text, stderr_text, status)
        };

        match tokio::time::timeout(timeout, run).await {
            Ok((stdout_text, stderr_text, status)) => {
                let exit_code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
                ToolOutcome::ok(json!({
                    "stdout": stdout_text,
                    "stderr": stderr_text,
                    "exit_code": exit_code,
                    "execution_time": start.elapsed().as_secs_f64(),
                    "timed_out": false,
                }))
            }
            Err(_) => {
                let _ = child.start_kill();
                ToolOutcome::ok(json!({
                    "stdout": "",
                    "stderr": "",
                    "exit_code": -1,
                    "execution_time": start.elapsed().as_secs_f64(),
                    "timed_out": true,
                }))
            }
        }
    }
}

pub fn shell_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "command": {"type": "string", "description": "Shell command to execute"},
            "working_dir": {"type": "string", "description": "Directory to run the command in"},
            "timeout_s": {"type": "number", "description": "Timeout in seconds, capped at 300"},
            "capture_stderr": {"type": "boolean", "description": "Whether to capture stderr", "default": true},
        },
        "required": ["command"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_command_output() {
        let tool = ShellTool::new(std::sync::Arc::new(PolicyGate::new()));
        let outcome = tool.execute(r#"{"command": "echo -n A"}"#).await;
        match outcome {
            ToolOutcome::Ok(payload) => assert_eq!(payload["stdout"], "A"),
            ToolOutcome::Err(e) => panic!("expected success, got {}", e),
        }
    }

    #[tokio::test]
    async fn denied_command_never_spawns() {
        let tool = ShellTool::new(std::sync::Arc::new(PolicyGate::new()));
        let outcome = tool.execute(r#"{"command": "rm -rf /"}"#).await;
        assert!(matches!(outcome, ToolOutcome::Err(_)));
    }

    #[tokio::test]
    async fn timeout_is_reported_without_hanging_the_test() {
        let tool = ShellTool::new(std::sync::Arc::new(PolicyGate::new()));
        let outcome = tool.execute(r#"{"command": "sleep 5", "timeout_s": 1}"#).await;
        match outcome {
            ToolOutcome::Ok(payload) => assert_eq!(payload["timed_out"], true),
            ToolOutcome::Err(e) => panic!("expected a timed-out success envelope, got {}", e),
        }
    }
}
