//! Streaming parser (C9): line-by-line SSE framing, provider-agnostic.
//!
//! Operates purely on bytes and strings — the provider-specific event
//! semantics live in each [`Provider::parse_stream_event`](crate::harness::provider::types::Provider::parse_stream_event).
//! This module only knows about the SSE framing rules: `data: ` prefix
//! stripping, `[DONE]` sentinel, blank-line event boundaries.

use serde_json::Value as Json;

use crate::harness::provider::types::{Provider, StreamingContext};

/// One decoded SSE line, already stripped of its `data: ` prefix.
pub enum SseLine {
    /// A `data: {json...}` line, successfully parsed.
    Event(Json),
    /// The `data: [DONE]` sentinel.
    Done,
    /// A `data: ...` line that failed to parse as JSON, or any other
    /// non-event line (blank lines, comments). The caller logs and moves on.
    Skip,
}

/// Parse a single line of an SSE stream. Lines not beginning with `data: `
/// (blank lines that terminate an event, `: comment` lines, `event:` framing
/// lines we don't need) are [`SseLine::Skip`].
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches('\r');
    let Some(payload) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
        return SseLine::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Json>(payload) {
        Ok(value) => SseLine::Event(value),
        Err(e) => {
            log::warn!("malformed SSE event, skipping: {}", e);
            SseLine::Skip
        }
    }
}

/// Fold an entire line-buffered SSE body through `provider`, returning the
/// final [`StreamingContext`]. Never fails on a single malformed event — only
/// a truncated stream (no terminal `[DONE]`/completion event) is surfaced, as
/// `error_message = "stream truncated"` with `done` left `false` by the
/// caller's own bookkeeping (this function sets it when `[DONE]` or a
/// provider-reported completion event is observed).
pub fn fold_stream<'a>(lines: impl Iterator<Item = &'a str>, provider: &dyn Provider) -> StreamingContext {
    let mut ctx = StreamingContext::default();
    for line in lines {
        match parse_sse_line(line) {
            SseLine::Event(event) => provider.parse_stream_event(&mut ctx, &event),
            SseLine::Done => {
                ctx.done = true;
                break;
            }
            SseLine::Skip => continue,
        }
    }
    if !ctx.done {
        ctx.error_message = Some("stream truncated".to_string());
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_data_prefix_and_parses_json() {
        match parse_sse_line(r#"data: {"a":1}"#) {
            SseLine::Event(v) => assert_eq!(v["a"], 1),
            _ => panic!("expected event"),
        }
    }

    #[test]
    fn recognizes_done_sentinel() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseLine::Done));
    }

    #[test]
    fn blank_line_is_skipped() {
        assert!(matches!(parse_sse_line(""), SseLine::Skip));
    }

    #[test]
    fn malformed_json_is_skipped_not_fatal() {
        assert!(matches!(parse_sse_line("data: {not json"), SseLine::Skip));
    }
}
