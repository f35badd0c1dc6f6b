//! Per-view usage counters
//!
//! Counters accumulate between reports; taking a report resets them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct UsageCounter {
    calls: AtomicU64,
    millis: AtomicU64,
}

/// Call counts and cumulative time per view since the last report
#[derive(Debug, Default)]
pub struct UsageStats {
    counters: RwLock<HashMap<String, Arc<UsageCounter>>>,
}

/// One view's usage since the previous report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub view: String,
    pub calls: u64,
    pub total_ms: u64,
}

impl UsageReport {
    pub fn mean_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.calls as f64
        }
    }
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats with `views` pre-registered
    pub fn with_views<I, S>(views: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let counters = views
            .into_iter()
            .map(|view| (view.into(), Arc::default()))
            .collect();
        Self {
            counters: RwLock::new(counters),
        }
    }

    /// Pre-register `view` so it shows up in reports even before its first call
    pub async fn register(&self, view: &str) {
        self.counters
            .write()
            .await
            .entry(view.to_string())
            .or_default();
    }

    pub async fn record(&self, view: &str, elapsed: Duration) {
        let counter = {
            let counters = self.counters.read().await;
            counters.get(view).cloned()
        };
        let counter = match counter {
            Some(c) => c,
            None => self
                .counters
                .write()
                .await
                .entry(view.to_string())
                .or_default()
                .clone(),
        };

        counter.calls.fetch_add(1, Ordering::Relaxed);
        counter
            .millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Snapshot every counter and reset it to zero, sorted by view
    pub async fn take_report(&self) -> Vec<UsageReport> {
        let counters = self.counters.read().await;
        let mut report: Vec<UsageReport> = counters
            .iter()
            .map(|(view, c)| UsageReport {
                view: view.clone(),
                calls: c.calls.swap(0, Ordering::Relaxed),
                total_ms: c.millis.swap(0, Ordering::Relaxed),
            })
            .collect();
        report.sort_by(|a, b| a.view.cmp(&b.view));
        report
    }
}

/// `"pos: 3 calls, 12.0ms mean; ner: 0 calls"`
pub fn format_report(report: &[UsageReport]) -> String {
    report
        .iter()
        .map(|r| {
            if r.calls == 0 {
                format!("{}: 0 calls", r.view)
            } else {
                format!("{}: {} calls, {:.1}ms mean", r.view, r.calls, r.mean_ms())
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
