//! SQLite-backed archive
//!
//! Each record is stored as one JSON document keyed by its identifier.
//! Queries run on the blocking pool so request handlers never hold a runtime
//! worker while SQLite works.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::Record;

use super::{Archive, ArchiveError};

/// Archive persisted in a SQLite database file
#[derive(Clone)]
pub struct SqliteArchive {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteArchive {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let archive = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite archive initialized");
        Ok(archive)
    }

    /// Create in-memory archive (for testing)
    pub fn in_memory() -> Result<Self, ArchiveError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, ArchiveError> {
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS records (
                    identifier TEXT PRIMARY KEY,
                    whitespaced INTEGER NOT NULL,
                    body TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<usize, ArchiveError> {
        self.blocking(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ArchiveError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, ArchiveError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn);
            f(&*guard)
        })
        .await
        .map_err(|e| ArchiveError::Task(e.to_string()))?
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Archive for SqliteArchive {
    async fn get_by_id(&self, identifier: &str) -> Result<Option<Record>, ArchiveError> {
        let identifier = identifier.to_string();
        self.blocking(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM records WHERE identifier = ?1",
                    params![identifier],
                    |row| row.get(0),
                )
                .optional()?;

            body.map(|b| serde_json::from_str(&b).map_err(ArchiveError::from))
                .transpose()
        })
        .await
    }

    async fn store(&self, record: &Record) -> Result<(), ArchiveError> {
        let body = serde_json::to_string(record)?;
        let identifier = record.identifier.clone();
        let whitespaced = record.whitespaced;

        self.blocking(move |conn| {
            conn.execute(
                r#"
                    INSERT INTO records (identifier, whitespaced, body, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(identifier) DO UPDATE SET
                        body = excluded.body,
                        updated_at = excluded.updated_at
                    "#,
                params![identifier, whitespaced, body, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }
}
