//! Worker pools of backend handles
//!
//! A [`WorkerPool`] hands out [`PoolHandle`]s to one backend service. The
//! pool is either backed by one or more network endpoints (each contributing
//! `clients_per_host` handles) or wraps a single in-process backend.
//!
//! Handles return to the pool when dropped, so a handle is released exactly
//! once on every path, including early returns through `?`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::annotator::{
    Annotation, AnnotatorBackend, BackendError, BackendIdentity, BackendRole, HttpAnnotator,
};
use crate::models::Record;

// ============================================================================
// Pool kinds
// ============================================================================

/// Where the pool's backends live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// One or more network endpoints
    Remote,
    /// A single backend instance running inside this process
    InProcess,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::InProcess => "in-process",
        }
    }
}

struct Slot {
    endpoint: String,
    backend: Arc<dyn AnnotatorBackend>,
}

struct PoolInner {
    name: String,
    role: BackendRole,
    kind: PoolKind,
    capacity: usize,
    acquire_timeout: Duration,
    idle: Mutex<VecDeque<Slot>>,
    permits: Arc<Semaphore>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Slot>> {
        // The queue holds no invariant a panicking holder could break
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn in_use(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }
}

// ============================================================================
// Worker pool
// ============================================================================

/// Pool of handles to one backend service
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Pool over network endpoints, `clients_per_host` handles per endpoint
    pub fn remote(
        name: impl Into<String>,
        role: BackendRole,
        hosts: &[String],
        clients_per_host: usize,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut backends = Vec::with_capacity(hosts.len() * clients_per_host);
        for host in hosts {
            for _ in 0..clients_per_host {
                let client = HttpAnnotator::new(host.clone(), timeout)?;
                backends.push((
                    client.base_url().to_string(),
                    Arc::new(client) as Arc<dyn AnnotatorBackend>,
                ));
            }
        }
        Ok(Self::from_backends(name, role, PoolKind::Remote, backends, timeout))
    }

    /// Pool wrapping one in-process backend, shared by `concurrency` handles
    pub fn in_process(
        name: impl Into<String>,
        role: BackendRole,
        backend: Arc<dyn AnnotatorBackend>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        let backends = (0..concurrency.max(1))
            .map(|_| ("local".to_string(), backend.clone()))
            .collect();
        Self::from_backends(name, role, PoolKind::InProcess, backends, timeout)
    }

    /// Pool over arbitrary `(endpoint, backend)` pairs
    pub fn from_backends(
        name: impl Into<String>,
        role: BackendRole,
        kind: PoolKind,
        backends: Vec<(String, Arc<dyn AnnotatorBackend>)>,
        acquire_timeout: Duration,
    ) -> Self {
        let capacity = backends.len();
        let idle = backends
            .into_iter()
            .map(|(endpoint, backend)| Slot { endpoint, backend })
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                role,
                kind,
                capacity,
                acquire_timeout,
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(capacity)),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn role(&self) -> BackendRole {
        self.inner.role
    }

    pub fn kind(&self) -> PoolKind {
        self.inner.kind
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Borrow a handle, waiting up to the pool's timeout for one to free up
    pub async fn acquire(&self) -> Result<PoolHandle, PoolError> {
        if self.inner.capacity == 0 {
            return Err(PoolError::Empty {
                pool: self.inner.name.clone(),
            });
        }

        let permit = tokio::time::timeout(
            self.inner.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::Timeout {
            pool: self.inner.name.clone(),
            waited: self.inner.acquire_timeout,
        })?
        .map_err(|_| PoolError::Closed {
            pool: self.inner.name.clone(),
        })?;

        let slot = self.inner.idle().pop_front().ok_or_else(|| PoolError::Closed {
            pool: self.inner.name.clone(),
        })?;

        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        crate::metrics::set_pool_in_use(&self.inner.name, self.inner.in_use());
        tracing::trace!(pool = %self.inner.name, endpoint = %slot.endpoint, "Handle acquired");

        Ok(PoolHandle {
            slot: Some(slot),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Return a handle to the pool
    pub fn release(&self, handle: PoolHandle) {
        drop(handle);
    }

    /// Current usage snapshot
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            name: self.inner.name.clone(),
            kind: self.inner.kind,
            role: self.inner.role,
            capacity: self.inner.capacity,
            in_use: self.inner.in_use(),
            acquired_total: self.inner.acquired.load(Ordering::SeqCst),
            released_total: self.inner.released.load(Ordering::SeqCst),
        }
    }

    /// One-line diagnostic summary
    pub fn status_report(&self) -> String {
        self.status().to_string()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("role", &self.inner.role)
            .field("kind", &self.inner.kind)
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

// ============================================================================
// Handle
// ============================================================================

/// A borrowed backend handle; returns to its pool on drop
pub struct PoolHandle {
    slot: Option<Slot>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("role", &self.pool.role)
            .field("endpoint", &self.endpoint())
            .finish_non_exhaustive()
    }
}

impl PoolHandle {
    /// Capability exposed by this handle
    pub fn role(&self) -> BackendRole {
        self.pool.role
    }

    pub fn endpoint(&self) -> &str {
        self.slot.as_ref().map_or("", |s| s.endpoint.as_str())
    }

    fn backend(&self) -> Option<&dyn AnnotatorBackend> {
        self.slot.as_ref().map(|s| s.backend.as_ref())
    }

    /// Invoke the operation matching the handle's role
    pub async fn annotate(&self, record: &Record) -> Result<Annotation, BackendError> {
        let backend = self
            .backend()
            .ok_or_else(|| BackendError::Transport("handle already released".to_string()))?;
        self.pool.role.invoke(backend, record).await
    }

    /// Ask the backend for its display name and source tag
    pub async fn identity(&self) -> Result<BackendIdentity, BackendError> {
        let backend = self
            .backend()
            .ok_or_else(|| BackendError::Transport("handle already released".to_string()))?;
        backend.identity().await
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.idle().push_back(slot);
            self.pool.released.fetch_add(1, Ordering::SeqCst);
            // The permit is released after this body runs
            crate::metrics::set_pool_in_use(&self.pool.name, self.pool.in_use().saturating_sub(1));
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Pool usage snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub kind: PoolKind,
    pub role: BackendRole,
    pub capacity: usize,
    pub in_use: usize,
    pub acquired_total: u64,
    pub released_total: u64,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}/{}]", self.name, self.in_use, self.capacity)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Pool errors
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// The pool has no backends configured
    #[error("pool {pool} has no backends")]
    Empty { pool: String },

    /// No handle became available in time
    #[error("no backend available for {pool} after {waited:?}")]
    Timeout { pool: String, waited: Duration },

    /// The pool was shut down
    #[error("pool {pool} is closed")]
    Closed { pool: String },
}
