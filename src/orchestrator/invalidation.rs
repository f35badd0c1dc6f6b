//! Load-time invalidation of stale views
//!
//! Every view found stale is removed, then views that depend on a removed
//! view are removed as well. By default only direct dependents are dropped;
//! [`CascadeMode::Transitive`] follows the inverse graph to its closure.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::Record;

use super::dependency::DependencyGraph;
use super::freshness::FreshnessOracle;

/// How far removal of a stale view propagates to its dependents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    /// Drop views that directly require a stale view
    #[default]
    SingleLevel,
    /// Drop every view that requires a stale view through any chain
    Transitive,
}

/// Remove stale views and their dependents from `record`.
///
/// Staleness is decided for all present views before anything is removed.
/// Returns the names of removed views, sorted.
pub fn invalidate_stale(
    record: &mut Record,
    oracle: &FreshnessOracle,
    graph: &DependencyGraph,
    mode: CascadeMode,
) -> Vec<String> {
    let snapshot: &Record = record;
    let stale: Vec<String> = snapshot
        .view_names()
        .into_iter()
        .filter(|view| oracle.is_stale(view, snapshot))
        .collect();

    let mut removed = BTreeSet::new();
    for view in &stale {
        if record.remove_view(view).is_some() {
            tracing::debug!(view = %view, identifier = %record.identifier, "Removing stale view");
            removed.insert(view.clone());
        }
    }

    for view in &stale {
        let dependents = match mode {
            CascadeMode::SingleLevel => graph.dependents_of(view).to_vec(),
            CascadeMode::Transitive => graph.transitive_dependents(view),
        };
        for dependent in dependents {
            if record.remove_view(&dependent).is_some() {
                tracing::debug!(
                    view = %dependent,
                    requirement = %view,
                    "Removing view because it depends on a stale view"
                );
                removed.insert(dependent);
            }
        }
    }

    for view in &removed {
        crate::metrics::record_invalidation(view);
    }
    removed.into_iter().collect()
}
