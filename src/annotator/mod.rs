//! Backend annotators
//!
//! A backend computes one or more views for a record. Backends are reached
//! either over the network ([`HttpAnnotator`]) or in-process (see
//! [`builtin`]). What a backend can do is described by its [`BackendRole`];
//! the orchestrator dispatches on the role tag, never on the backend type.
//!
//! ```text
//!             ┌────────────┬──────────────┬────────────────┐
//!             │   label    │   cluster    │     parse      │
//! ┌───────────┼────────────┼──────────────┼────────────────┤
//! │ single    │ Labeler    │ Cluster-     │ Parser         │
//! │ multi     │ MultiLabel │  Generator   │ MultiParser    │
//! └───────────┴────────────┴──────────────┴────────────────┘
//! ```

pub mod client;
pub mod whitespace;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Clustering, Forest, Labeling, Record};

pub use client::HttpAnnotator;
pub use whitespace::{WhitespaceTokenizer, Whitespacer, WHITESPACE_SOURCE};

// ============================================================================
// Roles
// ============================================================================

/// Protocol role of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    /// One labeling per call
    Labeler,
    /// Several labelings per call, mapped positionally onto configured fields
    MultiLabeler,
    /// One clustering per call
    ClusterGenerator,
    /// One forest per call
    Parser,
    /// Several forests per call, mapped positionally onto configured fields
    MultiParser,
}

impl BackendRole {
    /// Parse the role name used in configuration files
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "labeler" => Some(Self::Labeler),
            "multilabeler" => Some(Self::MultiLabeler),
            "clustergenerator" => Some(Self::ClusterGenerator),
            "parser" => Some(Self::Parser),
            "multiparser" => Some(Self::MultiParser),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Labeler => "labeler",
            Self::MultiLabeler => "multilabeler",
            Self::ClusterGenerator => "clustergenerator",
            Self::Parser => "parser",
            Self::MultiParser => "multiparser",
        }
    }

    /// Whether one call populates several views
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::MultiLabeler | Self::MultiParser)
    }

    /// Call the operation this role supports
    pub async fn invoke(
        &self,
        backend: &dyn AnnotatorBackend,
        record: &Record,
    ) -> Result<Annotation, BackendError> {
        match self {
            Self::Labeler => backend.label_record(record).await.map(Annotation::Labeling),
            Self::MultiLabeler => backend
                .label_record_multi(record)
                .await
                .map(Annotation::Labelings),
            Self::ClusterGenerator => backend
                .cluster_record(record)
                .await
                .map(Annotation::Clustering),
            Self::Parser => backend.parse_record(record).await.map(Annotation::Forest),
            Self::MultiParser => backend
                .parse_record_multi(record)
                .await
                .map(Annotation::Forests),
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload returned by one backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Labeling(Labeling),
    Labelings(Vec<Labeling>),
    Clustering(Clustering),
    Forest(Forest),
    Forests(Vec<Forest>),
}

// ============================================================================
// Backend identity
// ============================================================================

/// What a backend reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendIdentity {
    /// Human-readable display name
    pub name: String,
    /// `<annotator-name>-<version>` tag stamped on produced views
    pub source_identifier: String,
}

impl BackendIdentity {
    pub fn new(name: impl Into<String>, source_identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_identifier: source_identifier.into(),
        }
    }

    /// `"<name> identifies as <source>"`
    pub fn describe(&self) -> String {
        format!("{} identifies as {}", self.name, self.source_identifier)
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// A backend annotator service.
///
/// Every role operation defaults to [`BackendError::Unsupported`]; a backend
/// implements the operations of the role(s) it serves.
#[async_trait]
pub trait AnnotatorBackend: Send + Sync {
    /// Display name and source tag of the running backend
    async fn identity(&self) -> Result<BackendIdentity, BackendError>;

    async fn label_record(&self, _record: &Record) -> Result<Labeling, BackendError> {
        Err(BackendError::Unsupported("label_record"))
    }

    async fn label_record_multi(&self, _record: &Record) -> Result<Vec<Labeling>, BackendError> {
        Err(BackendError::Unsupported("label_record_multi"))
    }

    async fn cluster_record(&self, _record: &Record) -> Result<Clustering, BackendError> {
        Err(BackendError::Unsupported("cluster_record"))
    }

    async fn parse_record(&self, _record: &Record) -> Result<Forest, BackendError> {
        Err(BackendError::Unsupported("parse_record"))
    }

    async fn parse_record_multi(&self, _record: &Record) -> Result<Vec<Forest>, BackendError> {
        Err(BackendError::Unsupported("parse_record_multi"))
    }
}

/// Resolve an in-process backend by the name used in the `local` config key
pub fn builtin(name: &str) -> Option<Arc<dyn AnnotatorBackend>> {
    match name {
        "whitespace" | "whitespace-tokenizer" => Some(Arc::new(WhitespaceTokenizer)),
        _ => None,
    }
}

/// Names accepted by [`builtin`]
pub const BUILTIN_BACKENDS: &[&str] = &["whitespace", "whitespace-tokenizer"];

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by a backend call
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Connection, timeout or other transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status without an explicit annotation failure
    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    /// Backend explicitly reported it could not annotate
    #[error("{0}")]
    AnnotationFailed(String),

    /// Backend does not implement the operation
    #[error("operation {0} not supported by backend")]
    Unsupported(&'static str),

    /// Response could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
