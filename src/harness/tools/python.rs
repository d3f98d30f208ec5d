//! `python` tool (C7): executes a snippet of Python and returns
//! stdout/stderr/exception. Interpreter internals are out of scope (§12
//! Non-goals) — [`PythonInterpreter`] is the contracted seam, grounded the
//! same way as [`crate::harness::tools::pdf::PdfExtractor`]: a narrow async
//! trait standing in for an external capability, in the donor's
//! `HttpClientTool` style. Persistent interpreter state across calls is out
//! of scope; each call gets a fresh interpreter.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::harness::error::HarnessError;
use crate::harness::tool_registry::{ToolExecutor, ToolOutcome};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 300;
const OUTPUT_CAP_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Default)]
pub struct PythonExecution {
    pub stdout: String,
    pub stderr: String,
    pub exception: Option<String>,
}

/// The contracted seam a real interpreter backend implements. `timeout` is
/// already clamped by the caller to `[0, MAX_TIMEOUT_SECS]` before reaching
/// here, so a backend does not need to re-validate it.
#[async_trait]
pub trait PythonInterpreter: Send + Sync {
    async fn exec(&self, code: &str, timeout: std::time::Duration) -> Result<PythonExecution, HarnessError>;
}

/// Always fails — stands in until a real interpreter backend is wired up.
pub struct UnimplementedPythonInterpreter;

#[async_trait]
impl PythonInterpreter for UnimplementedPythonInterpreter {
    async fn exec(&self, _code: &str, _timeout: std::time::Duration) -> Result<PythonExecution, HarnessError> {
        Err(HarnessError::internal(
            "no PythonInterpreter backend is configured",
        ))
    }
}

fn cap(s: String) -> String {
    if s.len() <= OUTPUT_CAP_BYTES {
        return s;
    }
    let mut truncated: String = s.chars().take(OUTPUT_CAP_BYTES).collect();
    truncated.push_str("\n... [output truncated]");
    truncated
}

#[derive(Deserialize)]
struct PythonArgs {
    code: String,
    #[serde(default)]
    timeout_s: Option<u64>,
}

pub struct PythonTool {
    interpreter: std::sync::Arc<dyn PythonInterpreter>,
}

impl PythonTool {
    pub fn new(interpreter: std::sync::Arc<dyn PythonInterpreter>) -> Self {
        Self { interpreter }
    }
}

#[async_trait]
impl ToolExecutor for PythonTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: PythonArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let timeout_secs = args.timeout_s.unwrap_or(DEFAULT_TIMEOUT_SECS).min(MAX_TIMEOUT_SECS);
        let timeout = std::time::Duration::from_secs(timeout_secs);
        let start = Instant::now();
        match tokio::time::timeout(timeout, self.interpreter.exec(&args.code, timeout)).await {
            Ok(Ok(result)) => ToolOutcome::ok(json!({
                "stdout": cap(result.stdout),
                "stderr": cap(result.stderr),
                "exception": result.exception,
                "success": result.exception.is_none(),
                "execution_time": start.elapsed().as_secs_f64(),
                "timed_out": false,
            })),
            Ok(Err(e)) => ToolOutcome::err(e.to_string()),
            Err(_) => ToolOutcome::ok(json!({
                "stdout": "",
                "stderr": "",
                "exception": serde_json::Value::Null,
                "success": false,
                "execution_time": start.elapsed().as_secs_f64(),
                "timed_out": true,
            })),
        }
    }
}

pub fn python_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "code": {"type": "string", "description": "Python source to execute"},
            "timeout_s": {"type": "number", "description": "Timeout in seconds, capped at 300", "default": 30},
        },
        "required": ["code"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoInterpreter;

    #[async_trait]
    impl PythonInterpreter for EchoInterpreter {
        async fn exec(&self, code: &str, _timeout: std::time::Duration) -> Result<PythonExecution, HarnessError> {
            Ok(PythonExecution {
                stdout: format!("ran: {}", code),
                stderr: String::new(),
                exception: None,
            })
        }
    }

    #[tokio::test]
    async fn runs_through_configured_interpreter() {
        let tool = PythonTool::new(std::sync::Arc::new(EchoInterpreter));
        let outcome = tool.execute(r#"{"code": "print(1)"}"#).await;
        match outcome {
            ToolOutcome::Ok(p) => {
                assert_eq!(p["stdout"], "ran: print(1)");
                assert_eq!(p["success"], true);
                assert_eq!(p["timed_out"], false);
                assert!(p["execution_time"].is_number());
            }
            ToolOutcome::Err(e) => panic!("{}", e),
        }
    }

    struct RaisingInterpreter;

    #[async_trait]
    impl PythonInterpreter for RaisingInterpreter {
        async fn exec(&self, _code: &str, _timeout: std::time::Duration) -> Result<PythonExecution, HarnessError> {
            Ok(PythonExecution {
                stdout: String::new(),
                stderr: String::new(),
                exception: Some("ZeroDivisionError: division by zero".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn an_exception_in_the_script_is_reported_as_unsuccessful() {
        let tool = PythonTool::new(std::sync::Arc::new(RaisingInterpreter));
        let outcome = tool.execute(r#"{"code": "1/0"}"#).await;
        match outcome {
            ToolOutcome::Ok(p) => assert_eq!(p["success"], false),
            ToolOutcome::Err(e) => panic!("{}", e),
        }
    }

    struct HangingInterpreter;

    #[async_trait]
    impl PythonInterpreter for HangingInterpreter {
        async fn exec(&self, _code: &str, _timeout: std::time::Duration) -> Result<PythonExecution, HarnessError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(PythonExecution::default())
        }
    }

    #[tokio::test]
    async fn exceeding_the_timeout_surfaces_a_successful_timed_out_envelope() {
        let tool = PythonTool::new(std::sync::Arc::new(HangingInterpreter));
        let outcome = tool.execute(r#"{"code": "while True: pass", "timeout_s": 1}"#).await;
        match outcome {
            ToolOutcome::Ok(p) => {
                assert_eq!(p["timed_out"], true);
                assert_eq!(p["success"], false);
            }
            ToolOutcome::Err(e) => panic!("{}", e),
        }
    }

    #[tokio::test]
    async fn unimplemented_interpreter_reports_error() {
        let tool = PythonTool::new(std::sync::Arc::new(UnimplementedPythonInterpreter));
        let outcome = tool.execute(r#"{"code": "print(1)"}"#).await;
        assert!(matches!(outcome, ToolOutcome::Err(_)));
    }

    #[tokio::test]
    async fn timeout_is_clamped_to_max() {
        struct CapturingInterpreter(std::sync::Mutex<Option<std::time::Duration>>);
        #[async_trait]
        impl PythonInterpreter for CapturingInterpreter {
            async fn exec(&self, _code: &str, timeout: std::time::Duration) -> Result<PythonExecution, HarnessError> {
                *self.0.lock().unwrap() = Some(timeout);
                Ok(PythonExecution::default())
            }
        }
        let interp = std::sync::Arc::new(CapturingInterpreter(std::sync::Mutex::new(None)));
        let tool = PythonTool::new(interp.clone());
        tool.execute(r#"{"code": "x", "timeout_s": 99999}"#).await;
        assert_eq!(*interp.0.lock().unwrap(), Some(std::time::Duration::from_secs(MAX_TIMEOUT_SECS)));
    }
}
