//! Background Maintenance
//!
//! Interval tasks that keep the cache and monitor honest without request
//! traffic: expired-entry sweeps, the staleness health sweep and periodic
//! snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::ResponseCache;
use crate::config::ServingConfig;
use crate::monitor::ModelMonitor;

/// Running maintenance tasks
///
/// Dropping the handle leaves the tasks running; call [`Self::shutdown`] to
/// stop them.
#[derive(Debug)]
pub struct MaintenanceHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl MaintenanceHandle {
    /// Names of tasks still running
    #[must_use]
    pub fn running(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Abort every task
    pub fn shutdown(self) {
        for (name, task) in self.tasks {
            task.abort();
            debug!(task = name, "Maintenance task stopped");
        }
        info!("Maintenance stopped");
    }
}

fn every<F>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tick();
        }
    })
}

/// Start cache cleanup, health sweep and snapshot tasks
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn spawn_maintenance(
    cache: Arc<ResponseCache>,
    monitor: Arc<ModelMonitor>,
    config: &ServingConfig,
) -> MaintenanceHandle {
    let cleanup = every(config.cache.cleanup_interval(), move || {
        let removed = cache.cleanup_expired();
        debug!(removed, "Cache cleanup tick");
    });

    let sweep_monitor = Arc::clone(&monitor);
    let health = every(config.monitor.health_check_interval(), move || {
        let stale = sweep_monitor.sweep_stale();
        debug!(stale = stale.len(), "Health sweep tick");
    });

    let snapshots = every(config.monitor.snapshot_interval(), move || {
        let taken = monitor.take_snapshots();
        debug!(taken, "Snapshot tick");
    });

    info!(
        cleanup_secs = config.cache.cleanup_interval().as_secs(),
        health_secs = config.monitor.health_check_interval().as_secs(),
        snapshot_secs = config.monitor.snapshot_interval().as_secs(),
        "Maintenance started"
    );

    MaintenanceHandle {
        tasks: vec![
            ("cache_cleanup", cleanup),
            ("health_sweep", health),
            ("snapshots", snapshots),
        ],
    }
}
