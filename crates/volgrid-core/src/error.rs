//! Error types for volgrid with HTTP-mappable error codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A specialized `Result` type for volgrid operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes for control-plane operations.
///
/// Every code has a stable string form (used on the wire between peers)
/// and an HTTP status used by the REST adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The request body could not be parsed.
    MalformedRequest,
    /// A semantic violation in the request (empty brick list, bad replica
    /// count, invalid option key).
    InvalidArgument,
    /// The named entity does not exist.
    NotFound,
    /// Name collision or revision conflict.
    Conflict,
    /// The requested state change is not allowed from the current state.
    InvalidStateTransition,
    /// The cluster lock stayed contended beyond the deadline.
    LockTimeout,
    /// A transaction step handler reported an error on at least one node.
    StepFailed,
    /// A transaction step exceeded its own deadline.
    StepTimeout,
    /// The transaction deadline expired between steps.
    Cancelled,
    /// The replicated store lost quorum.
    Unavailable,
    /// The operation is disallowed (e.g. deleting a peer that owns bricks).
    Forbidden,
    /// Programmer error: unknown step, marshalling failure.
    Internal,
}

impl ErrorCode {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::MalformedRequest => 422,
            Self::InvalidArgument | Self::InvalidStateTransition => 400,
            Self::NotFound => 404,
            Self::Conflict | Self::LockTimeout => 409,
            Self::Forbidden => 403,
            Self::Unavailable => 503,
            Self::StepTimeout | Self::Cancelled => 504,
            Self::StepFailed | Self::Internal => 500,
        }
    }

    /// Returns the stable string form of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedRequest => "MalformedRequest",
            Self::InvalidArgument => "InvalidArgument",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::InvalidStateTransition => "InvalidStateTransition",
            Self::LockTimeout => "LockTimeout",
            Self::StepFailed => "StepFailed",
            Self::StepTimeout => "StepTimeout",
            Self::Cancelled => "Cancelled",
            Self::Unavailable => "Unavailable",
            Self::Forbidden => "Forbidden",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during volgrid operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A control-plane error with a specific error code.
    #[error("{code}: {message}")]
    Op {
        /// The error code.
        code: ErrorCode,
        /// A human-readable error message.
        message: String,
        /// The entity that caused the error (volume name, peer id, etc.).
        resource: Option<String>,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new operation error.
    #[must_use]
    pub fn op(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Op { code, message: message.into(), resource: None }
    }

    /// Creates a new operation error naming the affected entity.
    #[must_use]
    pub fn op_with_resource(
        code: ErrorCode,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self::Op { code, message: message.into(), resource: Some(resource.into()) }
    }

    /// Shorthand for a `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::op(ErrorCode::NotFound, message)
    }

    /// Shorthand for an `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::op(ErrorCode::InvalidArgument, message)
    }

    /// Shorthand for a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::op(ErrorCode::Conflict, message)
    }

    /// Shorthand for an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::op(ErrorCode::Internal, message)
    }

    /// Shorthand for an `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::op(ErrorCode::Unavailable, message)
    }

    /// Returns the error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Op { code, .. } => *code,
            Self::Config(_) | Self::Io(_) | Self::Serde(_) => ErrorCode::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.code().http_status()
    }
}
