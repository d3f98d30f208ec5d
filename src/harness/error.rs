//! Crate-wide error taxonomy (§7 of the design).
//!
//! Module-local error types (`ToolError`, `ProviderError`, `OAuthError`, ...) stay
//! close to their own concern, the way `BashError`/`FileSystemError` do in the
//! tools module. `HarnessError` is the taxonomy those collapse into at any
//! boundary that must report one of the seven error kinds rather than a
//! tool-local detail — the turn loop and the provider registry are the two
//! callers that need it.

use std::fmt;

/// Error kind taxonomy from the design notes. Not every kind is reachable from
/// every module; `OK` is deliberately absent — success is `Result::Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Unauthenticated,
    Unauthorized,
    RateLimited,
    TimedOut,
    NetworkError,
    ProviderError,
    ParseError,
    ConflictingState,
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unauthenticated => "Unauthenticated",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::ProviderError => "ProviderError",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::ConflictingState => "ConflictingState",
            ErrorKind::InternalError => "InternalError",
        };
        write!(f, "{}", s)
    }
}

/// A taxonomy-tagged error with a human-readable message and optional detail.
#[derive(Debug, Clone)]
pub struct HarnessError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl HarnessError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    pub fn conflicting_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConflictingState, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(d) => write!(f, "{}: {} ({})", self.kind, self.message, d),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for HarnessError {}

impl From<reqwest::Error> for HarnessError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HarnessError::new(ErrorKind::TimedOut, e.to_string())
        } else {
            HarnessError::new(ErrorKind::NetworkError, e.to_string())
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        HarnessError::parse_error(e.to_string())
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        HarnessError::new(ErrorKind::InternalError, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = HarnessError::not_found("index missing");
        assert_eq!(err.to_string(), "NotFound: index missing");
    }

    #[test]
    fn display_appends_details_when_present() {
        let err = HarnessError::new(ErrorKind::ProviderError, "bad status").with_details("500 body");
        assert_eq!(err.to_string(), "ProviderError: bad status (500 body)");
    }

    #[test]
    fn serde_json_errors_become_parse_errors() {
        let parse_err = serde_json::from_str::<Json>("not json").unwrap_err();
        let harness_err: HarnessError = parse_err.into();
        assert_eq!(harness_err.kind, ErrorKind::ParseError);
    }

    #[test]
    fn io_errors_become_internal_errors() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let harness_err: HarnessError = io_err.into();
        assert_eq!(harness_err.kind, ErrorKind::InternalError);
    }

    type Json = serde_json::Value;
}
