//! Real-time error types.
//!
//! Every failure on the dispatch path is mapped to a [`RealtimeError`] which
//! carries the wire `code` and `statusCode` of the error frame sent back to
//! the client:
//! - Malformed envelopes
//! - Unknown events
//! - Authentication and authorization failures
//! - Middleware aborts and handler failures
//! - Transport faults (never rendered, they tear the connection down)

use axum::http::StatusCode;
use thiserror::Error;

/// Why an authentication middleware rejected a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No token was supplied
    Required,
    /// A token was supplied but failed verification
    InvalidToken,
}

impl AuthFailure {
    /// Returns the wire code for this failure.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Required => "auth_required",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Real-time service error type.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// Inbound frame is not a valid envelope
    #[error("Invalid message: {0}")]
    Parse(String),

    /// No route is registered for the event
    #[error("No handler registered for event '{0}'")]
    RouteNotFound(String),

    /// Authentication failed
    #[error("{message}")]
    Auth {
        /// Failure kind
        kind: AuthFailure,
        /// Human readable message
        message: String,
    },

    /// Authenticated but not allowed
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// A middleware aborted the chain
    #[error("{message}")]
    Middleware {
        /// Error code sent to the client
        code: String,
        /// Human readable message
        message: String,
        /// Status code sent to the client
        status: StatusCode,
    },

    /// A handler failed
    #[error("Handler failed: {0}")]
    Handler(String),

    /// Underlying socket fault
    #[error("Transport error: {0}")]
    Transport(String),

    /// Outbound frame could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Server-side fault unrelated to the message
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Authentication error for a message carrying no token.
    #[must_use]
    pub fn auth_required() -> Self {
        Self::Auth {
            kind: AuthFailure::Required,
            message: "Authentication required".to_string(),
        }
    }

    /// Authentication error for a token that failed verification.
    #[must_use]
    pub fn invalid_token(reason: impl std::fmt::Display) -> Self {
        Self::Auth {
            kind: AuthFailure::InvalidToken,
            message: format!("Invalid token: {reason}"),
        }
    }

    /// Middleware abort with a custom code and a 400 status.
    #[must_use]
    pub fn middleware(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Middleware {
            code: code.into(),
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// Overrides the status of a middleware error. Other variants are returned unchanged.
    #[must_use]
    pub fn with_status(self, status: StatusCode) -> Self {
        match self {
            Self::Middleware { code, message, .. } => Self::Middleware {
                code,
                message,
                status,
            },
            other => other,
        }
    }

    /// Returns the status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::Auth { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Middleware { status, .. } => *status,
            Self::Handler(_) | Self::Transport(_) | Self::Serialization(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error code string.
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Parse(_) => "parse_error",
            Self::RouteNotFound(_) => "route_not_found",
            Self::Auth { kind, .. } => kind.code(),
            Self::Forbidden(_) => "forbidden",
            Self::Middleware { code, .. } => code.as_str(),
            Self::Handler(_) => "handler_error",
            Self::Transport(_) => "transport_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns true if the connection stays usable after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for real-time operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;
