//! Typed errors for the request path.
//!
//! Plumbing (config, IO, git, index builds) uses `anyhow`; the admission
//! controller and chat orchestrator return these so the HTTP layer can map
//! each failure to a distinct status code.

use std::time::Duration;
use thiserror::Error;

/// Why an admitted (or rejected) unit of work did not produce a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Every slot is busy and the wait queue is full.
    #[error("server busy: all slots in use and queue is full")]
    Busy,
    /// The work did not finish within the configured timeout.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// The work itself failed.
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("server busy, try again later")]
    Busy,
    #[error("chat backend timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("chat backend failed: {0}")]
    Backend(String),
}

impl ChatError {
    /// Machine-readable reason, used as the `error.code` in HTTP responses.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::EmptyMessage => "bad_request",
            ChatError::Busy => "busy",
            ChatError::Timeout(_) => "timeout",
            ChatError::Backend(_) => "backend_error",
        }
    }
}

impl From<AdmissionError> for ChatError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Busy => ChatError::Busy,
            AdmissionError::Timeout(d) => ChatError::Timeout(d),
            AdmissionError::Backend(msg) => ChatError::Backend(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_errors_map_to_distinct_chat_codes() {
        let codes: Vec<&str> = [
            AdmissionError::Busy,
            AdmissionError::Timeout(Duration::from_millis(10)),
            AdmissionError::Backend("boom".into()),
        ]
        .into_iter()
        .map(|e| ChatError::from(e).code())
        .collect();
        assert_eq!(codes, vec!["busy", "timeout", "backend_error"]);
        assert_eq!(ChatError::EmptyMessage.code(), "bad_request");
    }

    #[test]
    fn test_timeout_message_includes_duration() {
        let err = AdmissionError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "request timed out after 1500ms");
    }
}
