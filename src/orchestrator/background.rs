//! Periodic background tasks
//!
//! Two loops run for the lifetime of the process: one re-polls backend
//! identities, the other logs usage since the previous report.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::stats::format_report;
use super::Orchestrator;

/// Handles of the running background loops
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Stop every loop
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Start the identity refresher and the usage reporter
pub fn start_background_tasks(
    orchestrator: Arc<Orchestrator>,
    version_interval: Duration,
    report_interval: Duration,
) -> BackgroundTasks {
    let handles = vec![
        spawn_identity_refresher(orchestrator.clone(), version_interval),
        spawn_usage_reporter(orchestrator, report_interval),
    ];
    tracing::info!(
        version_interval_secs = version_interval.as_secs(),
        report_interval_secs = report_interval.as_secs(),
        "Background tasks started"
    );
    BackgroundTasks { handles }
}

/// Poll backend identities now and then every `every`
pub fn spawn_identity_refresher(orchestrator: Arc<Orchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let changed = orchestrator.refresh_identities().await;
            tracing::debug!(changed, "Backend identities refreshed");
        }
    })
}

/// Log and reset the usage counters every `every`
pub fn spawn_usage_reporter(orchestrator: Arc<Orchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let report = orchestrator.usage_report().await;
            tracing::info!("usage since last report: {}", format_report(&report));
            tracing::info!("{}", orchestrator.pool_report());
        }
    })
}
