//! Error types for the backend client

use thiserror::Error;

/// Errors that can occur when talking to the hosted backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupabaseError {
    /// HTTP request failed before a response arrived
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Response body did not have the expected shape
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// Missing or expired credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The addressed row does not exist (or is not visible to this user)
    #[error("Not found")]
    NotFound,

    /// Backend returned an error
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the backend
        message: String,
    },

    /// Session storage could not be read or written
    #[error("Session storage unavailable: {0}")]
    Storage(String),

    /// Realtime socket failed
    #[error("Realtime connection failed: {0}")]
    Realtime(String),

    /// The realtime server refused to join the channel
    #[error("Realtime join rejected: {0}")]
    JoinRejected(String),

    /// No reply within the configured timeout
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

impl SupabaseError {
    /// Whether retrying the same call later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Realtime(_) | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Pull a human-readable message out of a backend error body.
///
/// The REST and auth services spell the field differently; fall back to
/// the raw body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(error_message(r#"{"code":"PGRST116","message":"0 rows"}"#), "0 rows");
        assert_eq!(
            error_message(r#"{"msg":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message("upstream timeout"), "upstream timeout");
    }

    #[test]
    fn transient_errors() {
        assert!(SupabaseError::Timeout("join reply").is_transient());
        assert!(SupabaseError::ApiError { status: 503, message: String::new() }.is_transient());
        assert!(!SupabaseError::ApiError { status: 400, message: String::new() }.is_transient());
        assert!(!SupabaseError::Unauthorized("jwt expired".into()).is_transient());
    }
}
