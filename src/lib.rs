//! curator - annotation orchestration service
//!
//! Sits between clients asking for text annotations (tokens, part-of-speech,
//! parses, named entities, coreference) and the backend annotators that
//! compute them. Records are cached by content; cached views are reused
//! until the backend that produced them is upgraded.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`] - Records and annotation views
//! - [`annotator`] - Backend roles, the backend trait, HTTP and in-process backends
//! - [`pool`] - Worker pools of backend handles
//! - [`orchestrator`] - Dependency resolution, freshness, invalidation, replica forwarding
//! - [`archive`] - Record persistence (memory, SQLite)
//! - [`server`] - HTTP API
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`error`] - Error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use curator::annotator::{BackendRole, WhitespaceTokenizer};
//! use curator::archive::MemoryArchive;
//! use curator::orchestrator::Orchestrator;
//! use curator::pool::WorkerPool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tokenizer = WorkerPool::in_process(
//!         "tokenizer",
//!         BackendRole::MultiLabeler,
//!         Arc::new(WhitespaceTokenizer),
//!         4,
//!         Duration::from_secs(45),
//!     );
//!     let orchestrator = Orchestrator::builder(Arc::new(MemoryArchive::new()))
//!         .pool(tokenizer, ["sentence", "token"], Vec::<String>::new())
//!         .build()?;
//!
//!     let record = orchestrator.provide("token", "The cat sat.", false).await?;
//!     println!("{}", record.identifier);
//!     Ok(())
//! }
//! ```

pub mod annotator;
pub mod archive;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod server;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::annotator::{AnnotatorBackend, BackendIdentity, BackendRole};
    pub use crate::archive::{Archive, MemoryArchive, SqliteArchive};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::models::{Labeling, Record, Span};
    pub use crate::orchestrator::{Orchestrator, OrchestratorBuilder};
    pub use crate::pool::WorkerPool;
}

pub use models::{Record, SENTENCE_VIEW, TOKEN_VIEW};
