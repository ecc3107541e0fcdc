//! Resource watchers that pause the crawl under pressure
//!
//! Each watcher is an independent polling loop tied to one metric. It pauses
//! the [`PauseController`](crate::pause::PauseController) under its own cause
//! id and lifts only that cause when the metric recovers, so two watchers
//! never resume over each other.

mod disk;
mod queue_depth;

pub use disk::{
    required_free_space, spawn_disk_watcher, DiskSpace, DiskUsageProvider, DiskWatcherSettings,
    SystemDiskUsage, DISK_CAUSE, GIB,
};
pub use queue_depth::{spawn_queue_depth_watcher, QueueDepthProvider, QUEUE_DEPTH_CAUSE};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle on a running watcher task
pub struct WatcherHandle {
    name: &'static str,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub(crate) fn new(name: &'static str, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { name, cancel, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancels the watcher and waits for its loop to exit
    ///
    /// A watcher still holding a pause lifts it before exiting.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Watcher '{}' ended abnormally: {}", self.name, e);
        } else {
            tracing::debug!("Watcher '{}' stopped", self.name);
        }
    }
}

/// Sleeps for `interval`, returning false if cancelled first
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, interval: std::time::Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
