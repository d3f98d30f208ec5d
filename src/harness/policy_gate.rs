//! Rate limiter & policy gate (C12). Grounded in the donor's `BashTool`
//! allow/deny-list checking (`src/cloudllm/tools/bash.rs::is_command_allowed`,
//! "denylist beats allowlist") generalized into a standalone gate the turn
//! loop consults *before* dispatch, independent of whatever a given tool
//! executor additionally checks on its own (defense in depth, not a
//! replacement for it).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Backoff starts at the third consecutive denial, per §4.12.
const BACKOFF_START_AT: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct DenialState {
    consecutive_denials: u32,
    backoff_until: Option<Instant>,
}

/// Per-tool-name consecutive-denial counter with exponential backoff,
/// independent across tool names.
pub struct RateLimiter {
    state: Mutex<HashMap<String, DenialState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    /// `true` if `tool_name` is not currently in backoff.
    pub fn is_permitted(&self, tool_name: &str) -> bool {
        let state = self.state.lock().unwrap();
        match state.get(tool_name).and_then(|s| s.backoff_until) {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    pub fn record_denial(&self, tool_name: &str) {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(tool_name.to_string()).or_default();
        entry.consecutive_denials += 1;
        if entry.consecutive_denials >= BACKOFF_START_AT {
            let exponent = entry.consecutive_denials - BACKOFF_START_AT;
            let backoff = BACKOFF_BASE
                .saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX))
                .min(BACKOFF_CAP);
            entry.backoff_until = Some(Instant::now() + backoff);
        }
    }

    pub fn record_success(&self, tool_name: &str) {
        self.reset(tool_name);
    }

    pub fn reset(&self, tool_name: &str) {
        self.state.lock().unwrap().remove(tool_name);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shell dialect a command string is parsed under, for prefix matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellDialect {
    Posix,
    Cmd,
}

/// Whether a shell command string is safe to tokenize for allowlist
/// matching, per §4.12: unbalanced quotes, pipes, redirects, or subshells
/// make a command opaque to prefix matching, and it must fall through to
/// the (out-of-scope-here) interactive approval path. Since this core has no
/// interactive path, such commands are treated as denied — a conservative
/// default recorded as an open-question decision in `DESIGN.md`.
pub fn is_safe_to_match(command: &str, dialect: ShellDialect) -> bool {
    if !balanced_quotes(command) {
        return false;
    }
    if command.contains('|') || command.contains('>') || command.contains('<') {
        return false;
    }
    if command.contains("$(") || command.contains('`') {
        return false;
    }
    // Bare, unquoted parens are a POSIX subshell.
    if dialect == ShellDialect::Posix
        && command.chars().zip(command.chars().skip(1)).any(|(a, b)| a == '(' || b == ')')
        && !command.contains('"')
        && !command.contains('\'')
        && (command.contains('(') || command.contains(')'))
    {
        return false;
    }
    match dialect {
        ShellDialect::Posix => true,
        ShellDialect::Cmd => {
            // `^` escapes and `%VAR%` expansion are both flagged unsafe —
            // cmd.exe's quoting rules are too context-sensitive to match
            // reliably against a plain allowlist prefix.
            !command.contains('^') && !contains_percent_var(command)
        }
    }
}

fn balanced_quotes(command: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut prev_escape = false;
    for ch in command.chars() {
        if prev_escape {
            prev_escape = false;
            continue;
        }
        match ch {
            '\\' if !in_single => prev_escape = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ => {}
        }
    }
    !in_single && !in_double
}

fn contains_percent_var(command: &str) -> bool {
    let mut chars = command.chars().peekable();
    let mut count = 0;
    while let Some(ch) = chars.next() {
        if ch == '%' {
            count += 1;
        }
    }
    count >= 2
}

/// The leading whitespace-delimited token of a command string, used as the
/// prefix to match against an allow/deny list.
pub fn command_prefix(command: &str) -> Option<&str> {
    command.trim().split_whitespace().next()
}

/// Built-in dangerous-command fragments, checked as substrings against the
/// raw command regardless of allow/deny-list configuration — mirrors the
/// donor `BashTool`'s own denylist defaults, duplicated here deliberately
/// (the policy gate must hold even for tool executors that forgot their own
/// check, per the defense-in-depth note above).
const BUILTIN_DENYLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    ":(){ :|:& };:",
    "> /dev/sda",
    "chmod -R 777 /",
    "wipefs",
];

/// Allow/deny policy over shell commands and file paths. A denylist entry
/// always wins over an allowlist entry (never accidentally permit something
/// explicitly named dangerous because it also matches a broad allow rule).
pub struct PolicyGate {
    rate_limiter: RateLimiter,
    shell_allowlist: Vec<String>,
    shell_denylist: Vec<String>,
    file_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl PolicyGate {
    pub fn new() -> Self {
        Self {
            rate_limiter: RateLimiter::new(),
            shell_allowlist: Vec::new(),
            shell_denylist: Vec::new(),
            file_root: None,
        }
    }

    pub fn with_shell_allowlist(mut self, prefixes: Vec<String>) -> Self {
        self.shell_allowlist = prefixes;
        self
    }

    pub fn with_shell_denylist(mut self, prefixes: Vec<String>) -> Self {
        self.shell_denylist = prefixes;
        self
    }

    pub fn with_file_root(mut self, root: PathBuf) -> Self {
        self.file_root = Some(root);
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn file_root(&self) -> Option<&PathBuf> {
        self.file_root.as_ref()
    }

    /// Gate a tool call generically: consults the rate limiter first (a
    /// backed-off tool is denied regardless of its arguments), then any
    /// tool-specific policy. `tool_name`/`arguments_json` let the gate apply
    /// shell- or file-specific checks without the caller branching first.
    pub fn evaluate(&self, tool_name: &str, arguments: &serde_json::Value) -> Decision {
        if !self.rate_limiter.is_permitted(tool_name) {
            return Decision::Deny(format!("{} is rate-limited, try again later", tool_name));
        }
        match tool_name {
            "shell" => {
                let Some(command) = arguments.get("command").and_then(|v| v.as_str()) else {
                    return Decision::Deny("missing command argument".to_string());
                };
                self.evaluate_shell_command(command)
            }
            "file_read" | "file_write" => {
                let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
                    return Decision::Deny("missing path argument".to_string());
                };
                self.evaluate_path(path)
            }
            _ => Decision::Allow,
        }
    }

    pub fn evaluate_shell_command(&self, command: &str) -> Decision {
        for fragment in BUILTIN_DENYLIST {
            if command.contains(fragment) {
                return Decision::Deny("security validation".to_string());
            }
        }
        if !is_safe_to_match(command, ShellDialect::Posix) {
            return Decision::Deny("command requires interactive approval".to_string());
        }
        let Some(prefix) = command_prefix(command) else {
            return Decision::Deny("empty command".to_string());
        };
        if self.shell_denylist.iter().any(|d| prefix == d || command.contains(d.as_str())) {
            return Decision::Deny("security validation".to_string());
        }
        if !self.shell_allowlist.is_empty() && !self.shell_allowlist.iter().any(|a| prefix == a) {
            return Decision::Deny(format!("{} is not on the shell allowlist", prefix));
        }
        Decision::Allow
    }

    pub fn evaluate_path(&self, path: &str) -> Decision {
        let Some(root) = &self.file_root else {
            return Decision::Allow;
        };
        let candidate = root.join(path);
        let normalized = normalize(&candidate);
        let root_normalized = normalize(root);
        if normalized.starts_with(&root_normalized) {
            Decision::Allow
        } else {
            Decision::Deny(format!("path escapes root directory: {}", path))
        }
    }

    /// Record the outcome of a dispatched call so the rate limiter's
    /// consecutive-denial counter reflects reality.
    pub fn record_outcome(&self, tool_name: &str, permitted: bool) {
        if permitted {
            self.rate_limiter.record_success(tool_name);
        } else {
            self.rate_limiter.record_denial(tool_name);
        }
    }
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Lexical normalization without touching the filesystem (unlike the
/// donor's `canonicalize`-based check) — the policy gate must be able to
/// evaluate paths that don't exist yet (a `file_write` creating a new file).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn denies_builtin_dangerous_command() {
        let gate = PolicyGate::new();
        assert_eq!(
            gate.evaluate("shell", &json!({"command": "rm -rf /"})),
            Decision::Deny("security validation".to_string())
        );
    }

    #[test]
    fn allows_plain_command_with_no_lists_configured() {
        let gate = PolicyGate::new();
        assert_eq!(gate.evaluate("shell", &json!({"command": "echo hi"})), Decision::Allow);
    }

    #[test]
    fn denylist_beats_allowlist() {
        let gate = PolicyGate::new()
            .with_shell_allowlist(vec!["rm".to_string()])
            .with_shell_denylist(vec!["rm".to_string()]);
        assert!(matches!(gate.evaluate("shell", &json!({"command": "rm file.txt"})), Decision::Deny(_)));
    }

    #[test]
    fn unbalanced_quotes_require_approval() {
        let gate = PolicyGate::new();
        assert!(matches!(
            gate.evaluate("shell", &json!({"command": "echo \"unterminated"})),
            Decision::Deny(_)
        ));
    }

    #[test]
    fn piped_command_requires_approval() {
        let gate = PolicyGate::new();
        assert!(matches!(
            gate.evaluate("shell", &json!({"command": "echo hi | rm -rf /"})),
            Decision::Deny(_)
        ));
    }

    #[test]
    fn path_within_root_is_allowed() {
        let gate = PolicyGate::new().with_file_root(PathBuf::from("/tmp/root"));
        assert_eq!(gate.evaluate_path("notes.txt"), Decision::Allow);
    }

    #[test]
    fn path_escaping_root_is_denied() {
        let gate = PolicyGate::new().with_file_root(PathBuf::from("/tmp/root"));
        assert!(matches!(gate.evaluate_path("../../etc/passwd"), Decision::Deny(_)));
    }

    #[test]
    fn rate_limiter_backs_off_after_third_denial() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.record_denial("shell");
        }
        assert!(!limiter.is_permitted("shell"));
        limiter.record_success("shell");
        assert!(limiter.is_permitted("shell"));
    }
}
