use super::{sleep_or_cancel, WatcherHandle};
use crate::pause::PauseController;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause cause used by the queue-depth watcher
pub const QUEUE_DEPTH_CAUSE: &str = "queue-depth";

/// Reports how many items wait in a queue the crawl must not outrun
pub trait QueueDepthProvider: Send + Sync {
    fn queue_depth(&self) -> usize;
}

/// Spawns the queue-depth watcher loop
///
/// Pauses once the depth exceeds `workers` and resumes once it drops below.
pub fn spawn_queue_depth_watcher(
    controller: Arc<PauseController>,
    provider: Arc<dyn QueueDepthProvider>,
    workers: usize,
    check_interval: Duration,
) -> WatcherHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(
        controller,
        provider,
        workers,
        check_interval,
        cancel.clone(),
    ));
    WatcherHandle::new("queue-depth", cancel, task)
}

async fn run(
    controller: Arc<PauseController>,
    provider: Arc<dyn QueueDepthProvider>,
    workers: usize,
    check_interval: Duration,
    cancel: CancellationToken,
) {
    let mut holding_pause = false;

    loop {
        let depth = provider.queue_depth();

        if depth > workers && !holding_pause {
            controller.pause(
                QUEUE_DEPTH_CAUSE,
                format!("Archive write queue too deep: {} pending, limit {}", depth, workers),
            );
            holding_pause = true;
        } else if depth < workers && holding_pause {
            tracing::info!("Archive write queue drained to {}", depth);
            controller.resume(QUEUE_DEPTH_CAUSE).await;
            holding_pause = false;
        }

        if !sleep_or_cancel(&cancel, check_interval).await {
            break;
        }
    }

    if holding_pause {
        controller.resume(QUEUE_DEPTH_CAUSE).await;
    }
}
