//! Error types for the helpdesk client.
//!
//! - [`ValidationErrors`]: user-correctable input problems, returned as data
//! - [`StoreError`]: the backend failed a table or change-feed call
//! - [`AuthError`]: sign-in, sign-up or sign-out failed
//! - [`ConfigError`]: the environment is incomplete

use helpdesk_supabase::SupabaseError;
use thiserror::Error;

/// Messages explaining why form input was rejected, in rule order.
///
/// Never sent to the backend; an empty set means the input is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", .0.join("; "))]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    /// An empty set
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a failed rule
    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    /// Whether no rule failed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `message` is among the failures
    #[must_use]
    pub fn contains(&self, message: &str) -> bool {
        self.0.iter().any(|m| m == message)
    }

    /// The messages in rule order
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.0
    }
}

/// A table or change-feed operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Network failure before the backend answered
    #[error("Request failed: {0}")]
    Request(String),

    /// Not signed in, or the session expired
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// The addressed record does not exist
    #[error("Record not found")]
    NotFound,

    /// The backend refused the operation
    #[error("{message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Message from the backend
        message: String,
    },

    /// The backend answered with something that is not a record
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// The change feed could not be established
    #[error("Live updates unavailable: {0}")]
    Subscription(String),
}

impl From<SupabaseError> for StoreError {
    fn from(error: SupabaseError) -> Self {
        match error {
            SupabaseError::RequestFailed(msg) | SupabaseError::Storage(msg) => Self::Request(msg),
            SupabaseError::ResponseParseFailed(msg) => Self::Decode(msg),
            SupabaseError::Unauthorized(msg) => Self::Unauthorized(msg),
            SupabaseError::NotFound => Self::NotFound,
            SupabaseError::ApiError { status, message } => Self::Rejected { status, message },
            error @ (SupabaseError::Realtime(_)
            | SupabaseError::JoinRejected(_)
            | SupabaseError::Timeout(_)) => Self::Subscription(error.to_string()),
        }
    }
}

/// An auth operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The session could not be stored, so a sign-in would not survive
    #[error(
        "Unable to store the session ({0}). Make sure HELPDESK_SESSION_FILE points to a writable \
         location, or set HELPDESK_PERSIST_SESSION=false."
    )]
    StorageUnavailable(String),

    /// The backend refused the credentials or the request
    #[error("{0}")]
    Rejected(String),

    /// Network failure before the backend answered
    #[error("Request failed: {0}")]
    Request(String),
}

impl From<SupabaseError> for AuthError {
    fn from(error: SupabaseError) -> Self {
        match error {
            SupabaseError::Storage(msg) => Self::StorageUnavailable(msg),
            SupabaseError::RequestFailed(msg) => Self::Request(msg),
            SupabaseError::ApiError { message, .. } | SupabaseError::Unauthorized(message) => {
                Self::Rejected(message)
            },
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// Configuration is incomplete or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required key is not set
    #[error("{0} is not set")]
    Missing(&'static str),

    /// A key is set to something that does not parse
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        /// Environment key
        key: &'static str,
        /// Raw value
        value: String,
        /// Parser message
        reason: String,
    },
}
