//! `file_read`/`file_write` tools (C7). Grounded in the donor's
//! `FileSystemTool` (`src/cloudllm/tools/filesystem.rs`): canonicalize-based
//! root escape checking (walking up to the nearest existing ancestor for
//! paths that don't exist yet, so a `file_write` creating a new file is
//! still checked), generalized to the two-tool split the spec names instead
//! of the donor's larger read/write/list/delete surface.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::harness::tool_registry::{ToolExecutor, ToolOutcome};

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
    /// Character range `[start, end)` into the file's content; absent reads
    /// the whole file.
    range: Option<[usize; 2]>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

/// Shared path-escape policy for both tools. Walks up to the nearest
/// existing ancestor to canonicalize a path that doesn't exist yet (a
/// `file_write` target), mirroring the donor's approach.
fn validate_path(root: &Path, requested: &str) -> Result<PathBuf, String> {
    let candidate = root.join(requested);
    let root_canonical = root
        .canonicalize()
        .map_err(|e| format!("cannot canonicalize root: {}", e))?;

    let mut ancestor = candidate.clone();
    let effective = loop {
        if ancestor.exists() {
            break ancestor
                .canonicalize()
                .map_err(|e| format!("cannot canonicalize path: {}", e))?;
        }
        match ancestor.parent() {
            Some(parent) if parent != ancestor => ancestor = parent.to_path_buf(),
            _ => return Err(format!("path escapes root directory: {}", requested)),
        }
    };

    if effective.starts_with(&root_canonical) {
        Ok(candidate)
    } else {
        Err(format!("path escapes root directory: {}", requested))
    }
}

pub struct FileReadTool {
    root: Option<PathBuf>,
}

impl FileReadTool {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ToolExecutor for FileReadTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: ReadArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let path = if let Some(root) = &self.root {
            match validate_path(root, &args.path) {
                Ok(p) => p,
                Err(e) => return ToolOutcome::err(e),
            }
        } else {
            PathBuf::from(&args.path)
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let sliced = match args.range {
                    Some([start, end]) => {
                        let chars: Vec<char> = content.chars().collect();
                        let start = start.min(chars.len());
                        let end = end.min(chars.len()).max(start);
                        chars[start..end].iter().collect()
                    }
                    None => content,
                };
                ToolOutcome::ok(json!({ "content": sliced }))
            }
            Err(e) => ToolOutcome::err(format!("failed to read {}: {}", args.path, e)),
        }
    }
}

pub struct FileWriteTool {
    root: Option<PathBuf>,
}

impl FileWriteTool {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ToolExecutor for FileWriteTool {
    async fn execute(&self, arguments: &str) -> ToolOutcome {
        let args: WriteArgs = match serde_json::from_str(arguments) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {}", e)),
        };
        let path = if let Some(root) = &self.root {
            match validate_path(root, &args.path) {
                Ok(p) => p,
                Err(e) => return ToolOutcome::err(e),
            }
        } else {
            PathBuf::from(&args.path)
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutcome::err(format!("failed to create parent directories: {}", e));
            }
        }
        let result = if args.append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await {
                Ok(mut f) => f.write_all(args.content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(&path, args.content.as_bytes()).await
        };
        match result {
            Ok(()) => ToolOutcome::ok(json!({ "bytes_written": args.content.len() })),
            Err(e) => ToolOutcome::err(format!("failed to write {}: {}", args.path, e)),
        }
    }
}

pub fn file_read_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "description": "File path to read"},
            "range": {"type": "array", "description": "Optional [start,end) character range"},
        },
        "required": ["path"],
    })
}

pub fn file_write_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "description": "File path to write"},
            "content": {"type": "string", "description": "Content to write"},
            "append": {"type": "boolean", "description": "Append instead of overwrite", "default": false},
        },
        "required": ["path", "content"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriteTool::new(Some(dir.path().to_path_buf()));
        let reader = FileReadTool::new(Some(dir.path().to_path_buf()));
        writer
            .execute(r#"{"path": "note.txt", "content": "hello"}"#)
            .await;
        let outcome = reader.execute(r#"{"path": "note.txt"}"#).await;
        match outcome {
            ToolOutcome::Ok(payload) => assert_eq!(payload["content"], "hello"),
            ToolOutcome::Err(e) => panic!("expected success, got {}", e),
        }
    }

    #[tokio::test]
    async fn escaping_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileReadTool::new(Some(dir.path().to_path_buf()));
        let outcome = reader.execute(r#"{"path": "../../etc/passwd"}"#).await;
        assert!(matches!(outcome, ToolOutcome::Err(_)));
    }

    #[tokio::test]
    async fn range_slices_content() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileWriteTool::new(Some(dir.path().to_path_buf()));
        let reader = FileReadTool::new(Some(dir.path().to_path_buf()));
        writer
            .execute(r#"{"path": "note.txt", "content": "abcdef"}"#)
            .await;
        let outcome = reader.execute(r#"{"path": "note.txt", "range": [1, 3]}"#).await;
        match outcome {
            ToolOutcome::Ok(payload) => assert_eq!(payload["content"], "bc"),
            ToolOutcome::Err(e) => panic!("expected success, got {}", e),
        }
    }
}
