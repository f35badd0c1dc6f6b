//! Request-handling core
//!
//! The [`Orchestrator`] answers `provide(view, text)`: it loads the record for
//! the text, drops stale views, resolves the view's requirements depth first,
//! and computes whatever is missing or stale on the backend pool that serves
//! it. A replica forwards the computation to its master instead.
//!
//! ```text
//!  provide(view, text)
//!        │
//!        ▼
//!  load record ──▶ invalidate stale ──▶ resolve requirements (stack)
//!                                              │
//!                         ┌────────────────────┴───────────────┐
//!                         ▼                                    ▼
//!                  local worker pool                     master curator
//!                         │                                    │
//!                         └──────────▶ merge + persist ◀───────┘
//! ```

pub mod background;
pub mod dependency;
pub mod freshness;
pub mod inflight;
pub mod invalidation;
pub mod replica;
pub mod stats;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::annotator::{self, Annotation, BackendError, Whitespacer, WHITESPACE_SOURCE};
use crate::archive::{self, Archive};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{record_identifier, Record, SENTENCE_VIEW, TOKEN_VIEW};
use crate::pool::WorkerPool;

pub use dependency::DependencyGraph;
pub use freshness::{FreshnessOracle, IdentityCache, SourceTag};
pub use invalidation::CascadeMode;
pub use replica::{HttpMaster, MasterLink};
pub use stats::{UsageReport, UsageStats};

use inflight::InflightLocks;
use invalidation::invalidate_stale;

/// Display name reported by `name()`
pub const CURATOR_NAME: &str = "Curator";

/// Version reported by `version()`
pub const CURATOR_VERSION: &str = "0.6";

/// Source tag reported by `source_identifier()`
pub const CURATOR_SOURCE: &str = "curator-0.6";

/// A pool and the views one call to it produces, in output order
#[derive(Debug)]
pub struct PoolRegistration {
    pub pool: WorkerPool,
    pub fields: Vec<String>,
}

enum Backends {
    Local {
        by_view: HashMap<String, Arc<PoolRegistration>>,
        registrations: Vec<Arc<PoolRegistration>>,
    },
    Replica(Arc<dyn MasterLink>),
}

/// Text as the caller supplied it
#[derive(Clone, Copy)]
enum Input<'a> {
    Raw(&'a str),
    Whitespaced {
        text: &'a str,
        sentences: &'a [String],
    },
}

impl<'a> Input<'a> {
    fn text(&self) -> &'a str {
        match self {
            Self::Raw(text) | Self::Whitespaced { text, .. } => text,
        }
    }

    fn whitespaced(&self) -> bool {
        matches!(self, Self::Whitespaced { .. })
    }
}

/// One view on the resolution stack
///
/// `force` is set by the caller's `force_update` or by a recomputed
/// requirement. Only `requested` frames skip the archive re-check.
struct Frame {
    view: String,
    force: bool,
    requested: bool,
    next_requirement: usize,
}

impl Frame {
    fn new(view: impl Into<String>, force: bool, requested: bool) -> Self {
        Self {
            view: view.into(),
            force,
            requested,
            next_requirement: 0,
        }
    }
}

/// Shared orchestration state, one per process
pub struct Orchestrator {
    backends: Backends,
    graph: DependencyGraph,
    cascade: CascadeMode,
    archive: Arc<dyn Archive>,
    identities: IdentityCache,
    stats: UsageStats,
    inflight: InflightLocks,
    persisting: InflightLocks,
    write_access: bool,
}

impl Orchestrator {
    pub fn builder(archive: Arc<dyn Archive>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(archive)
    }

    /// Build pools, master link and archive from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let archive = archive::open_archive(&config.archive)?;
        let timeout = config.client_timeout();
        let mut builder = Self::builder(archive)
            .cascade(config.cascade_mode())
            .write_access(config.curator.write_access);

        if let Some(master_url) = &config.curator.master_url {
            return builder
                .master(Arc::new(HttpMaster::new(master_url.clone(), timeout)?))
                .build();
        }

        for settings in &config.annotators {
            let name = settings.fields.join("+");
            let pool = match &settings.local {
                Some(local) => {
                    let backend = annotator::builtin(local).ok_or_else(|| {
                        Error::config(format!("unknown local backend '{local}'"))
                    })?;
                    WorkerPool::in_process(
                        name,
                        settings.role,
                        backend,
                        config.server.threads,
                        timeout,
                    )
                }
                None => WorkerPool::remote(
                    name,
                    settings.role,
                    &settings.hosts,
                    settings.clients_per_host,
                    timeout,
                )
                .map_err(|e| Error::config(format!("cannot create pool for {}: {e}", settings.fields.join(", "))))?,
            };
            builder = builder.pool(pool, settings.fields.clone(), settings.requirements.clone());
        }

        builder.build()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Make sure `view` is present and fresh on the record for `text`
    pub async fn provide(&self, view: &str, text: &str, force_update: bool) -> Result<Record> {
        tracing::debug!(view = %view, force_update, "provide");
        self.resolve(view, force_update, Input::Raw(text)).await
    }

    /// Like [`provide`](Self::provide), with sentence and token segmentation
    /// taken from `sentences` (one pre-tokenized sentence per element)
    pub async fn ws_provide(
        &self,
        view: &str,
        sentences: &[String],
        force_update: bool,
    ) -> Result<Record> {
        tracing::debug!(view = %view, force_update, sentences = sentences.len(), "ws_provide");
        let text = Whitespacer::raw_text(sentences);
        self.resolve(
            view,
            force_update,
            Input::Whitespaced {
                text: &text,
                sentences,
            },
        )
        .await
    }

    /// Cached record for `text`, without computing anything
    pub async fn get_record(&self, text: &str) -> Result<Record> {
        let oracle = self.identities.oracle().await;
        self.load(Input::Raw(text), &oracle).await
    }

    pub async fn get_record_by_id(&self, identifier: &str) -> Result<Record> {
        let mut found = match self.archive.get_by_id(identifier).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(identifier = %identifier, error = %e, "Archive lookup failed");
                None
            }
        };

        if found.is_none() {
            if let Backends::Replica(master) = &self.backends {
                match master.get_record_by_id(identifier).await {
                    Ok(record) => {
                        self.persist(&record, &record.view_names()).await;
                        found = Some(record);
                    }
                    Err(e) => {
                        tracing::debug!(identifier = %identifier, error = %e, "Master has no such record")
                    }
                }
            }
        }

        let mut record = found.ok_or_else(|| {
            Error::annotation_failed(format!(
                "Unable to locate record with identifier: {identifier}"
            ))
        })?;
        let oracle = self.identities.oracle().await;
        invalidate_stale(&mut record, &oracle, &self.graph, self.cascade);
        Ok(record)
    }

    /// Accept a record computed elsewhere
    pub async fn store_record(&self, record: &Record) -> Result<()> {
        if !(self.is_replica() || self.write_access) {
            return Err(Error::Security("Curator does not support storeRecord".to_string()));
        }
        if record.identifier != record_identifier(&record.raw_text, record.whitespaced) {
            return Err(Error::input_rejected(format!(
                "record identifier {} does not match its text",
                record.identifier
            )));
        }
        self.archive.store(record).await?;
        tracing::debug!(identifier = %record.identifier, "Stored external record");
        Ok(())
    }

    /// `"<backend> identifies as <source>"` for every view this instance serves
    pub async fn describe_annotations(&self) -> BTreeMap<String, String> {
        let known = self.identities.all().await;
        match &self.backends {
            Backends::Local { registrations, .. } => registrations
                .iter()
                .flat_map(|registration| {
                    registration.fields.iter().map(|field| {
                        let description = match known.get(field) {
                            Some(identity) => identity.describe(),
                            None => format!("{} identifies as unknown", registration.pool.name()),
                        };
                        (field.clone(), description)
                    })
                })
                .collect(),
            Backends::Replica(_) => known
                .into_iter()
                .map(|(view, identity)| (view, identity.describe()))
                .collect(),
        }
    }

    pub fn ping(&self) -> bool {
        true
    }

    pub fn name(&self) -> &'static str {
        CURATOR_NAME
    }

    pub fn version(&self) -> &'static str {
        CURATOR_VERSION
    }

    pub fn source_identifier(&self) -> &'static str {
        CURATOR_SOURCE
    }

    // ========================================================================
    // Background support
    // ========================================================================

    /// Poll every pool (or the master) for current backend identities.
    ///
    /// Failures are logged and skipped. Returns how many views changed identity.
    pub async fn refresh_identities(&self) -> usize {
        match &self.backends {
            Backends::Local { registrations, .. } => {
                let polls = registrations.iter().map(|registration| async move {
                    let pool = &registration.pool;
                    let handle = pool.acquire().await.map_err(|e| e.to_string())?;
                    let identity = handle.identity().await;
                    pool.release(handle);
                    identity.map_err(|e| e.to_string())
                });
                let results = futures::future::join_all(polls).await;

                let mut changed = 0;
                for (registration, result) in registrations.iter().zip(results) {
                    let identity = match result {
                        Ok(identity) => identity,
                        Err(e) => {
                            tracing::warn!(pool = %registration.pool.name(), error = %e, "Identity poll failed");
                            continue;
                        }
                    };
                    for field in &registration.fields {
                        if self.identities.update(field, identity.clone()).await {
                            tracing::info!(view = %field, source = %identity.source_identifier, "Backend identity changed");
                            changed += 1;
                        }
                    }
                }
                changed
            }
            Backends::Replica(master) => match master.identities().await {
                Ok(identities) => {
                    let before = self.identities.all().await;
                    let changed = identities
                        .iter()
                        .filter(|(view, identity)| before.get(*view) != Some(*identity))
                        .count();
                    self.identities.replace(identities).await;
                    changed
                }
                Err(e) => {
                    tracing::warn!(master = %master.endpoint(), error = %e, "Identity poll of master failed");
                    0
                }
            },
        }
    }

    /// `"pool status: sentence+token[0/8] pos[1/4]"`
    pub fn pool_report(&self) -> String {
        match &self.backends {
            Backends::Local { registrations, .. } => {
                let pools: Vec<String> = registrations
                    .iter()
                    .map(|r| r.pool.status_report())
                    .collect();
                format!("pool status: {}", pools.join(" "))
            }
            Backends::Replica(master) => format!("pool status: replica of {}", master.endpoint()),
        }
    }

    pub async fn usage_report(&self) -> Vec<UsageReport> {
        self.stats.take_report().await
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn is_replica(&self) -> bool {
        matches!(self.backends, Backends::Replica(_))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn identities(&self) -> &IdentityCache {
        &self.identities
    }

    pub fn archive(&self) -> &Arc<dyn Archive> {
        &self.archive
    }

    /// Pools in registration order; empty on a replica
    pub fn pools(&self) -> Vec<&WorkerPool> {
        match &self.backends {
            Backends::Local { registrations, .. } => {
                registrations.iter().map(|r| &r.pool).collect()
            }
            Backends::Replica(_) => Vec::new(),
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    async fn resolve(&self, view: &str, force: bool, input: Input<'_>) -> Result<Record> {
        let oracle = self.identities.oracle().await;
        let mut record = self.load(input, &oracle).await?;
        if let Input::Whitespaced { sentences, .. } = input {
            self.ensure_whitespace_views(&mut record, sentences).await;
        }

        let mut stack = vec![Frame::new(view, force, force)];
        let mut resolving = HashSet::from([view.to_string()]);
        let mut completed = HashSet::new();

        loop {
            let Some(top) = stack.last_mut() else { break };

            if let Some(requirement) = self.graph.requirements_of(&top.view).get(top.next_requirement) {
                top.next_requirement += 1;
                // Already recomputed for this request
                if completed.contains(requirement) {
                    continue;
                }
                if !top.force && record.contains_view(requirement) {
                    continue;
                }
                if !resolving.insert(requirement.clone()) {
                    return Err(Error::annotation_failed(format!(
                        "cyclic requirement: {} requires {requirement}",
                        top.view
                    )));
                }
                // A recomputed requirement forces its dependent
                top.force = true;
                let requested = top.requested;
                stack.push(Frame::new(requirement.clone(), true, requested));
                continue;
            }

            let Some(frame) = stack.pop() else { break };
            resolving.remove(&frame.view);

            if frame.force || oracle.is_stale(&frame.view, &record) {
                let written = self.perform(&mut record, &frame, input).await?;
                completed.extend(written);
            } else {
                metrics::record_view_request(&frame.view, "cached");
            }
        }

        Ok(record)
    }

    /// Load or create the record for `input` and drop its stale views
    async fn load(&self, input: Input<'_>, oracle: &FreshnessOracle) -> Result<Record> {
        let text = input.text();
        if text.trim().is_empty() {
            return Err(Error::input_rejected("Cannot annotate the empty string"));
        }
        let whitespaced = input.whitespaced();

        let mut record = match self.archive.get(text, whitespaced).await {
            Ok(Some(record)) => record,
            Ok(None) => self.record_miss(text, whitespaced).await,
            Err(e) => {
                tracing::warn!(error = %e, "Archive lookup failed, starting from an empty record");
                self.record_miss(text, whitespaced).await
            }
        };

        let removed = invalidate_stale(&mut record, oracle, &self.graph, self.cascade);
        if !removed.is_empty() {
            tracing::debug!(identifier = %record.identifier, removed = ?removed, "Invalidated stale views");
        }
        Ok(record)
    }

    /// Record to start from when the archive has nothing for `text`
    async fn record_miss(&self, text: &str, whitespaced: bool) -> Record {
        if let Backends::Replica(master) = &self.backends {
            if !whitespaced {
                match master.get_record(text).await {
                    Ok(record) => {
                        self.persist(&record, &record.view_names()).await;
                        return record;
                    }
                    Err(e) => {
                        tracing::warn!(master = %master.endpoint(), error = %e, "Could not fetch record from master")
                    }
                }
            }
        }
        Record::new(text, whitespaced)
    }

    async fn ensure_whitespace_views(&self, record: &mut Record, sentences: &[String]) {
        let mut written = Vec::new();
        if record.source_of(SENTENCE_VIEW) != Some(WHITESPACE_SOURCE) {
            record.insert_labeling(SENTENCE_VIEW, Whitespacer::sentences(sentences));
            written.push(SENTENCE_VIEW.to_string());
        }
        if !record.contains_view(TOKEN_VIEW) {
            record.insert_labeling(TOKEN_VIEW, Whitespacer::tokenize(sentences));
            written.push(TOKEN_VIEW.to_string());
        }
        if !written.is_empty() {
            self.persist(record, &written).await;
        }
    }

    /// Compute the frame's view into `record` and persist it. Returns every view written.
    async fn perform(
        &self,
        record: &mut Record,
        frame: &Frame,
        input: Input<'_>,
    ) -> Result<Vec<String>> {
        let view = frame.view.as_str();
        if let Input::Whitespaced { sentences, .. } = input {
            if view == SENTENCE_VIEW || view == TOKEN_VIEW {
                let started = Instant::now();
                record.insert_labeling(SENTENCE_VIEW, Whitespacer::sentences(sentences));
                record.insert_labeling(TOKEN_VIEW, Whitespacer::tokenize(sentences));
                let written = vec![SENTENCE_VIEW.to_string(), TOKEN_VIEW.to_string()];
                self.stats.record(view, started.elapsed()).await;
                self.persist(record, &written).await;
                metrics::record_view_request(view, "computed");
                return Ok(written);
            }
        }

        let _inflight = self.inflight.acquire(&record.identifier, view).await;

        // Another request may have computed it while we waited
        if !frame.requested {
            if let Some(adopted) = self.adopt_stored(record, view).await {
                metrics::record_view_request(view, "cached");
                return Ok(adopted);
            }
        }

        let started = Instant::now();
        let outcome = match &self.backends {
            Backends::Local { by_view, .. } => self
                .annotate_locally(by_view, record, view)
                .await
                .map(|written| (written, "computed")),
            Backends::Replica(master) => self
                .forward(master.as_ref(), record, view, frame.force, input)
                .await
                .map(|()| (vec![view.to_string()], "forwarded")),
        };

        match outcome {
            Ok((written, label)) => {
                let elapsed = started.elapsed();
                self.stats.record(view, elapsed).await;
                self.persist(record, &written).await;
                metrics::record_view_request(view, label);
                tracing::debug!(
                    view = %view,
                    identifier = %record.identifier,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "View {label}"
                );
                Ok(written)
            }
            Err(e) => {
                metrics::record_view_request(view, "failed");
                Err(e)
            }
        }
    }

    /// Copy a fresh `view` from the archived record, with any sibling the
    /// same backend call produced. A stored view only counts when it was
    /// computed from the same requirements this record holds now.
    async fn adopt_stored(&self, record: &mut Record, view: &str) -> Option<Vec<String>> {
        let stored = match self.archive.get_by_id(&record.identifier).await {
            Ok(found) => found?,
            Err(e) => {
                tracing::debug!(view = %view, error = %e, "Archive re-check failed");
                return None;
            }
        };
        let oracle = self.identities.oracle().await;
        let reusable = |name: &str| {
            stored.contains_view(name)
                && !oracle.is_stale(name, &stored)
                && self
                    .graph
                    .requirements_of(name)
                    .iter()
                    .all(|requirement| record.same_view(requirement, &stored))
        };
        if !reusable(view) {
            return None;
        }

        let siblings = match &self.backends {
            Backends::Local { by_view, .. } => by_view
                .get(view)
                .map(|registration| registration.fields.clone())
                .unwrap_or_default(),
            Backends::Replica(_) => Vec::new(),
        };
        let mut adopted: Vec<String> = std::iter::once(view.to_string())
            .chain(siblings.into_iter().filter(|field| field != view))
            .filter(|name| reusable(name.as_str()))
            .collect();
        adopted.retain(|name| record.adopt_view(name, &stored));
        tracing::debug!(
            view = %view,
            identifier = %record.identifier,
            adopted = ?adopted,
            "Adopted views computed by a concurrent request"
        );
        Some(adopted)
    }

    async fn annotate_locally(
        &self,
        by_view: &HashMap<String, Arc<PoolRegistration>>,
        record: &mut Record,
        view: &str,
    ) -> Result<Vec<String>> {
        let registration = by_view.get(view).ok_or_else(|| {
            Error::unavailable(
                view,
                format!(
                    "no annotator is registered for {view}; check the annotator configuration or call describe_annotations"
                ),
            )
        })?;
        let pool = &registration.pool;

        let handle = pool
            .acquire()
            .await
            .map_err(|e| Error::unavailable(view, e.to_string()))?;

        let result = {
            let _timer = metrics::start_backend_timer(view);
            handle.annotate(record).await
        };

        // Learn the backend's identity before giving the handle back if the
        // result is unstamped and the view was never polled
        if result.as_ref().is_ok_and(has_unstamped_output)
            && self.identities.get(view).await.is_none()
        {
            match handle.identity().await {
                Ok(identity) => {
                    for field in &registration.fields {
                        self.identities.update(field, identity.clone()).await;
                    }
                }
                Err(e) => tracing::debug!(view = %view, error = %e, "Identity lookup failed"),
            }
        }

        let endpoint = handle.endpoint().to_string();
        pool.release(handle);

        let annotation = result.map_err(|e| {
            metrics::record_backend_error(view, backend_error_label(&e));
            tracing::warn!(view = %view, endpoint = %endpoint, error = %e, "Backend call failed");
            Error::from_backend(view, e)
        })?;

        self.merge_annotation(record, view, &registration.fields, annotation)
            .await
    }

    /// Write backend output into `record`; multi-output results map onto `fields` by position
    async fn merge_annotation(
        &self,
        record: &mut Record,
        view: &str,
        fields: &[String],
        annotation: Annotation,
    ) -> Result<Vec<String>> {
        let known = self.identities.all().await;
        let stamp = |source: &mut String, field: &str| {
            if source.is_empty() {
                if let Some(identity) = known.get(field) {
                    source.clone_from(&identity.source_identifier);
                }
            }
        };

        let mut written = Vec::new();
        match annotation {
            Annotation::Labeling(mut labeling) => {
                stamp(&mut labeling.source, view);
                record.insert_labeling(view, labeling);
                written.push(view.to_string());
            }
            Annotation::Clustering(mut clustering) => {
                stamp(&mut clustering.source, view);
                record.insert_clustering(view, clustering);
                written.push(view.to_string());
            }
            Annotation::Forest(mut forest) => {
                stamp(&mut forest.source, view);
                record.insert_forest(view, forest);
                written.push(view.to_string());
            }
            Annotation::Labelings(labelings) => {
                warn_on_count_mismatch(view, fields, labelings.len());
                for (field, mut labeling) in fields.iter().zip(labelings) {
                    stamp(&mut labeling.source, field);
                    record.insert_labeling(field, labeling);
                    written.push(field.clone());
                }
            }
            Annotation::Forests(forests) => {
                warn_on_count_mismatch(view, fields, forests.len());
                for (field, mut forest) in fields.iter().zip(forests) {
                    stamp(&mut forest.source, field);
                    record.insert_forest(field, forest);
                    written.push(field.clone());
                }
            }
        }

        if !record.contains_view(view) {
            return Err(Error::annotation_failed(format!(
                "backend for {view} did not produce a {view} view"
            )));
        }
        Ok(written)
    }

    async fn forward(
        &self,
        master: &dyn MasterLink,
        record: &mut Record,
        view: &str,
        forced: bool,
        input: Input<'_>,
    ) -> Result<()> {
        let remote = match input {
            Input::Raw(text) => master.provide(view, text, forced).await,
            Input::Whitespaced { sentences, .. } => {
                master.ws_provide(view, sentences, forced).await
            }
        }
        .inspect_err(|e| {
            tracing::warn!(master = %master.endpoint(), view = %view, error = %e, "Forwarded call failed")
        })?;

        if !record.adopt_view(view, &remote) {
            return Err(Error::annotation_failed(format!(
                "master returned a record without {view}"
            )));
        }
        Ok(())
    }

    /// Merge `written` into the archived record under a per-record lock.
    ///
    /// Views other requests stored in the meantime are kept unless they have
    /// gone stale since.
    async fn persist(&self, record: &Record, written: &[String]) {
        let _persisting = self.persisting.acquire(&record.identifier, "").await;

        let merged = match self.archive.get_by_id(&record.identifier).await {
            Ok(Some(mut stored)) => {
                let oracle = self.identities.oracle().await;
                invalidate_stale(&mut stored, &oracle, &self.graph, self.cascade);
                for view in written {
                    if !stored.adopt_view(view, record) {
                        stored.remove_view(view);
                    }
                }
                stored
            }
            Ok(None) => record.clone(),
            Err(e) => {
                tracing::warn!(
                    identifier = %record.identifier,
                    error = %e,
                    "Archive read before store failed, storing record as is"
                );
                record.clone()
            }
        };

        if let Err(e) = self.archive.store(&merged).await {
            tracing::error!(identifier = %record.identifier, error = %e, "Failed to persist record");
        }
    }
}

fn has_unstamped_output(annotation: &Annotation) -> bool {
    match annotation {
        Annotation::Labeling(l) => l.source.is_empty(),
        Annotation::Labelings(ls) => ls.iter().any(|l| l.source.is_empty()),
        Annotation::Clustering(c) => c.source.is_empty(),
        Annotation::Forest(f) => f.source.is_empty(),
        Annotation::Forests(fs) => fs.iter().any(|f| f.source.is_empty()),
    }
}

fn warn_on_count_mismatch(view: &str, fields: &[String], produced: usize) {
    if produced != fields.len() {
        tracing::warn!(
            view = %view,
            expected = fields.len(),
            produced,
            "Multi-output backend returned a different number of results than configured fields; extras dropped"
        );
    }
}

fn backend_error_label(err: &BackendError) -> &'static str {
    match err {
        BackendError::Transport(_) => "transport",
        BackendError::Http { .. } => "http",
        BackendError::AnnotationFailed(_) => "annotation_failed",
        BackendError::Unsupported(_) => "unsupported",
        BackendError::Decode(_) => "decode",
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles an [`Orchestrator`] and checks the registrations for consistency
pub struct OrchestratorBuilder {
    archive: Arc<dyn Archive>,
    pools: Vec<(WorkerPool, Vec<String>, Vec<String>)>,
    master: Option<Arc<dyn MasterLink>>,
    cascade: CascadeMode,
    write_access: bool,
}

impl OrchestratorBuilder {
    pub fn new(archive: Arc<dyn Archive>) -> Self {
        Self {
            archive,
            pools: Vec::new(),
            master: None,
            cascade: CascadeMode::default(),
            write_access: false,
        }
    }

    /// Register `pool` as producing `fields`, each requiring `requirements`
    pub fn pool<F, R>(mut self, pool: WorkerPool, fields: F, requirements: R) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        self.pools.push((
            pool,
            fields.into_iter().map(Into::into).collect(),
            requirements.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Run as a replica of `master`
    pub fn master(mut self, master: Arc<dyn MasterLink>) -> Self {
        self.master = Some(master);
        self
    }

    pub fn cascade(mut self, cascade: CascadeMode) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn write_access(mut self, write_access: bool) -> Self {
        self.write_access = write_access;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let (backends, graph, views) = match self.master {
            Some(master) => {
                if !self.pools.is_empty() {
                    tracing::warn!(
                        pools = self.pools.len(),
                        "Annotators are ignored on a replica; all work goes to the master"
                    );
                }
                tracing::info!(master = %master.endpoint(), "Running as replica");
                (Backends::Replica(master), DependencyGraph::new(), Vec::new())
            }
            None => {
                let mut graph = DependencyGraph::new();
                let mut by_view = HashMap::new();
                let mut registrations = Vec::new();

                for (pool, fields, requirements) in self.pools {
                    if fields.is_empty() {
                        return Err(Error::config(format!("pool {} produces no views", pool.name())));
                    }
                    for field in &fields {
                        graph.add_requirements(field, requirements.iter().cloned());
                    }
                    let registration = Arc::new(PoolRegistration { pool, fields });
                    for field in &registration.fields {
                        if by_view.insert(field.clone(), registration.clone()).is_some() {
                            return Err(Error::config(format!(
                                "view {field} is registered by more than one pool"
                            )));
                        }
                    }
                    registrations.push(registration);
                }

                for (view, requirements) in graph.edges() {
                    if let Some(missing) = requirements.iter().find(|r| !by_view.contains_key(*r)) {
                        return Err(Error::config(format!(
                            "{view} requires {missing}, which no pool provides"
                        )));
                    }
                }
                if let Some(cycle) = graph.find_cycle() {
                    return Err(Error::config(format!(
                        "cyclic requirements: {}",
                        cycle.join(" -> ")
                    )));
                }

                let mut views: Vec<String> = by_view.keys().cloned().collect();
                views.sort();
                for registration in &registrations {
                    tracing::info!(
                        pool = %registration.pool.name(),
                        role = %registration.pool.role(),
                        capacity = registration.pool.capacity(),
                        "Registered pool"
                    );
                }
                (
                    Backends::Local {
                        by_view,
                        registrations,
                    },
                    graph,
                    views,
                )
            }
        };

        Ok(Orchestrator {
            backends,
            graph,
            cascade: self.cascade,
            archive: self.archive,
            identities: IdentityCache::new(),
            stats: UsageStats::with_views(views),
            inflight: InflightLocks::new(),
            persisting: InflightLocks::new(),
            write_access: self.write_access,
        })
    }
}
