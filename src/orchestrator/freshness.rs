//! Freshness of cached views against the current backend versions
//!
//! Views carry a `<name>-<version>` source tag. A view is stale when the
//! backend currently serving it reports a different implementation name or
//! a numerically newer version.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::annotator::{BackendIdentity, WHITESPACE_SOURCE};
use crate::models::{Record, SENTENCE_VIEW, TOKEN_VIEW};

// ============================================================================
// Source tags
// ============================================================================

/// `<name>-<version>` split on the last dash
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceTag {
    pub name: String,
    /// `None` when the part after the dash is not a number, or there is no dash
    pub version: Option<f64>,
}

impl SourceTag {
    pub fn parse(tag: &str) -> Self {
        match tag.rsplit_once('-') {
            Some((name, version)) => Self {
                name: name.to_string(),
                version: version.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            },
            None => Self {
                name: tag.to_string(),
                version: None,
            },
        }
    }

    /// Whether a view tagged `self` is out of date with respect to `current`
    pub fn is_outdated_by(&self, current: &SourceTag) -> bool {
        if self.name != current.name {
            return true;
        }
        match (self.version, current.version) {
            (Some(recorded), Some(current)) => current > recorded,
            _ => true,
        }
    }
}

// ============================================================================
// Identity cache
// ============================================================================

/// Most recently observed backend identity per view, refreshed by polling
#[derive(Debug, Default)]
pub struct IdentityCache {
    identities: RwLock<HashMap<String, BackendIdentity>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what the backend serving `view` reported. Returns `true` if it changed.
    pub async fn update(&self, view: &str, identity: BackendIdentity) -> bool {
        let mut identities = self.identities.write().await;
        if identities.get(view) == Some(&identity) {
            return false;
        }
        identities.insert(view.to_string(), identity);
        true
    }

    /// Replace the whole cache (replicas adopt the master's view of its backends)
    pub async fn replace(&self, identities: HashMap<String, BackendIdentity>) {
        *self.identities.write().await = identities;
    }

    pub async fn get(&self, view: &str) -> Option<BackendIdentity> {
        self.identities.read().await.get(view).cloned()
    }

    pub async fn all(&self) -> HashMap<String, BackendIdentity> {
        self.identities.read().await.clone()
    }

    /// Point-in-time oracle for one request
    pub async fn oracle(&self) -> FreshnessOracle {
        let sources = self
            .identities
            .read()
            .await
            .iter()
            .map(|(view, id)| (view.clone(), id.source_identifier.clone()))
            .collect();
        FreshnessOracle { sources }
    }
}

// ============================================================================
// Oracle
// ============================================================================

/// Decides staleness from a snapshot of known backend source tags
#[derive(Debug, Clone, Default)]
pub struct FreshnessOracle {
    sources: HashMap<String, String>,
}

impl FreshnessOracle {
    pub fn from_sources(sources: HashMap<String, String>) -> Self {
        Self { sources }
    }

    /// Source tag of the backend currently serving `view`, if ever observed
    pub fn current_source(&self, view: &str) -> Option<&str> {
        self.sources.get(view).map(String::as_str)
    }

    pub fn is_stale(&self, view: &str, record: &Record) -> bool {
        is_stale(view, record, self.current_source(view))
    }
}

/// Whether `view` must be (re)computed for `record`, given the source tag of
/// the backend currently serving it
pub fn is_stale(view: &str, record: &Record, current_source: Option<&str>) -> bool {
    let recorded = record.source_of(view);

    // Caller-supplied segmentation is only valid if it came from the whitespacer
    if record.whitespaced && (view == SENTENCE_VIEW || view == TOKEN_VIEW) {
        return recorded != Some(WHITESPACE_SOURCE);
    }

    let Some(recorded) = recorded else {
        return true;
    };
    // Never successfully polled: nothing to compare against
    let Some(current) = current_source else {
        return false;
    };
    if recorded == current {
        return false;
    }

    SourceTag::parse(recorded).is_outdated_by(&SourceTag::parse(current))
}
