//! Persistent record store
//!
//! Records are content addressed: [`Archive::get`] derives the identifier
//! from the text and whitespace flag and looks it up by id.
//!
//! ```text
//! ┌──────────────┐        ┌─────────────────┐
//! │ Orchestrator │ ─────▶ │  Archive trait  │
//! └──────────────┘        └─────────────────┘
//!                           │             │
//!                           ▼             ▼
//!                  ┌───────────────┐ ┌───────────────┐
//!                  │ MemoryArchive │ │ SqliteArchive │
//!                  └───────────────┘ └───────────────┘
//! ```

pub mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::{ArchiveBackend, ArchiveConfig};
use crate::models::{record_identifier, Record};

pub use sqlite::SqliteArchive;

/// Storage backend for records
#[async_trait]
pub trait Archive: Send + Sync {
    /// Look up a record by id
    async fn get_by_id(&self, identifier: &str) -> Result<Option<Record>, ArchiveError>;

    /// Insert or replace a record
    async fn store(&self, record: &Record) -> Result<(), ArchiveError>;

    /// Look up the record for `text` tokenized with or without the whitespace flag
    async fn get(&self, text: &str, whitespaced: bool) -> Result<Option<Record>, ArchiveError> {
        self.get_by_id(&record_identifier(text, whitespaced)).await
    }
}

/// Open the archive selected by configuration
pub fn open_archive(config: &ArchiveConfig) -> Result<Arc<dyn Archive>, ArchiveError> {
    match config.backend {
        ArchiveBackend::Memory => Ok(Arc::new(MemoryArchive::new())),
        ArchiveBackend::Sqlite => Ok(Arc::new(SqliteArchive::open(&config.sqlite_path)?)),
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// Process-local archive, lost on restart
#[derive(Default)]
pub struct MemoryArchive {
    records: RwLock<HashMap<String, Record>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl Archive for MemoryArchive {
    async fn get_by_id(&self, identifier: &str) -> Result<Option<Record>, ArchiveError> {
        Ok(self.records.read().await.get(identifier).cloned())
    }

    async fn store(&self, record: &Record) -> Result<(), ArchiveError> {
        self.records
            .write()
            .await
            .insert(record.identifier.clone(), record.clone());
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Archive errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking worker running a query panicked or was cancelled
    #[error("Archive task failed: {0}")]
    Task(String),
}

impl ArchiveError {
    /// Whether the same operation might succeed if retried
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(_) | Self::Task(_) => true,
            _ => false,
        }
    }
}
