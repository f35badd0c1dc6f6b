//! Unified error handling for the curator crate
//!
//! Every failure a client can observe is classified into one [`ErrorKind`].
//! The kind travels on the wire (see [`crate::server::api`]) so that a replica
//! can translate a master's failure into the same local condition.
//!
//! # Usage
//!
//! ```rust,ignore
//! use curator::error::{Error, ErrorKind};
//!
//! fn handle_error(err: Error) {
//!     match err.kind() {
//!         ErrorKind::ServiceUnavailable => eprintln!("backend down: {err}"),
//!         _ => eprintln!("request failed: {err}"),
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

pub use crate::annotator::BackendError;
pub use crate::archive::ArchiveError;

/// Classification of errors, mirrored on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Blank or empty input text
    InputRejected,
    /// Backend reachable but could not produce the annotation
    AnnotationFailed,
    /// No pool registered, or a backend/master call failed at the transport level
    ServiceUnavailable,
    /// Write attempted against an instance that does not accept writes
    Security,
    /// Anything else
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputRejected => "input_rejected",
            Self::AnnotationFailed => "annotation_failed",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Security => "security",
            Self::Unexpected => "unexpected",
        }
    }
}

/// Unified error type for the curator crate
#[derive(Error, Debug)]
pub enum Error {
    /// Input text was blank
    #[error("Input rejected: {0}")]
    InputRejected(String),

    /// The annotation could not be produced
    #[error("Annotation failed: {0}")]
    AnnotationFailed(String),

    /// The service for `view` could not be reached
    #[error("{view} unavailable: {reason}")]
    ServiceUnavailable { view: String, reason: String },

    /// Permission denied
    #[error("Security error: {0}")]
    Security(String),

    /// Unexpected condition (malformed response, internal failure)
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// Archive failure surfaced to the caller
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn input_rejected(msg: impl Into<String>) -> Self {
        Self::InputRejected(msg.into())
    }

    pub fn annotation_failed(msg: impl Into<String>) -> Self {
        Self::AnnotationFailed(msg.into())
    }

    pub fn unavailable(view: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            view: view.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Translate a backend failure for `view` into the client-facing taxonomy
    pub fn from_backend(view: &str, err: BackendError) -> Self {
        match err {
            BackendError::AnnotationFailed(reason) => Self::AnnotationFailed(reason),
            BackendError::Decode(reason) => {
                Self::Unexpected(format!("malformed response for {view}: {reason}"))
            }
            other => Self::unavailable(view, other.to_string()),
        }
    }

    /// Rebuild an error reported by a remote curator
    pub fn from_remote(kind: ErrorKind, view: &str, message: String) -> Self {
        match kind {
            ErrorKind::InputRejected => Self::InputRejected(message),
            ErrorKind::AnnotationFailed => Self::AnnotationFailed(message),
            ErrorKind::ServiceUnavailable => Self::unavailable(view, message),
            ErrorKind::Security => Self::Security(message),
            ErrorKind::Unexpected => Self::Unexpected(message),
        }
    }

    /// Classification for handling and wire mapping
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputRejected(_) => ErrorKind::InputRejected,
            Self::AnnotationFailed(_) => ErrorKind::AnnotationFailed,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::Security(_) => ErrorKind::Security,
            Self::Unexpected(_)
            | Self::Archive(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_) => ErrorKind::Unexpected,
        }
    }

    /// Whether retrying the same request might succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ServiceUnavailable { .. } => true,
            Self::Archive(e) => e.is_recoverable(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
