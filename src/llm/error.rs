//! Completion error types

use thiserror::Error;

use super::auth::AuthError;

/// Failure of a single completion call, with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub message: String,
}

impl CompletionError {
    pub fn new(kind: CompletionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::InvalidRequest, message)
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::MalformedResponse, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::Unknown, message)
    }
}

impl From<AuthError> for CompletionError {
    fn from(err: AuthError) -> Self {
        Self::auth(format!("Token acquisition failed: {err}"))
    }
}

/// Error classification, used for logging only; nothing is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionErrorKind {
    /// Timeouts, refused connections
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Token acquisition failed, or the service rejected it (401, 403)
    Auth,
    /// Bad request (400)
    InvalidRequest,
    /// Body could not be decoded, or held no usable choice
    MalformedResponse,
    /// Unknown error
    Unknown,
}

impl CompletionErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::Auth => "auth",
            Self::InvalidRequest => "invalid_request",
            Self::MalformedResponse => "malformed_response",
            Self::Unknown => "unknown",
        }
    }
}
