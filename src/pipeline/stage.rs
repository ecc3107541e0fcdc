use crate::item::Item;
use crate::pause::{PauseController, Subscription};
use crate::HarvestError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Domain work performed by one pipeline stage
#[async_trait]
pub trait StageWorker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Processes one item and returns it for the next stage
    ///
    /// Errors are recorded on the item (see [`Item::fail`]); the item always
    /// moves on.
    async fn process(&self, item: Item) -> Item;
}

/// Running worker tasks of one stage
pub struct StageHandle {
    name: &'static str,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl StageHandle {
    pub(crate) fn new(name: &'static str, cancel: CancellationToken, tasks: JoinSet<()>) -> Self {
        Self {
            name,
            cancel,
            tasks,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancels every worker of the stage and waits for them to exit
    ///
    /// Fails if a worker panicked.
    pub async fn stop(mut self) -> Result<(), HarvestError> {
        self.cancel.cancel();

        let mut panicked = false;
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!("Worker in stage '{}' panicked: {}", self.name, e);
                    panicked = true;
                }
            }
        }

        tracing::debug!("Stage '{}' stopped", self.name);
        if panicked {
            return Err(HarvestError::WorkerPanicked {
                stage: self.name.to_string(),
            });
        }
        Ok(())
    }
}

/// Spawns `workers` tasks running `worker` between `input` and `output`
///
/// The tasks share the input receiver. Each registers its own pause
/// subscription and parks between items while the crawl is paused. Failed
/// items are forwarded without being processed.
pub fn spawn_stage(
    worker: Arc<dyn StageWorker>,
    workers: usize,
    input: mpsc::Receiver<Item>,
    output: mpsc::Sender<Item>,
    pause: &Arc<PauseController>,
) -> StageHandle {
    let name = worker.name();
    let cancel = CancellationToken::new();
    let input = Arc::new(Mutex::new(input));
    let mut tasks = JoinSet::new();

    for index in 0..workers.max(1) {
        tasks.spawn(run_worker(
            Arc::clone(&worker),
            index,
            Arc::clone(&input),
            output.clone(),
            pause.subscribe(),
            cancel.clone(),
        ));
    }

    tracing::debug!("Stage '{}' started with {} workers", name, workers.max(1));
    StageHandle::new(name, cancel, tasks)
}

async fn run_worker(
    worker: Arc<dyn StageWorker>,
    index: usize,
    input: Arc<Mutex<mpsc::Receiver<Item>>>,
    output: mpsc::Sender<Item>,
    mut sub: Subscription,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sub.paused() => {
                if !sub.park_until(&cancel).await {
                    break;
                }
                continue;
            }
            item = recv_shared(&input) => match item {
                Some(item) => item,
                None => break,
            },
        };

        let item = if item.is_failed() {
            item
        } else {
            worker.process(item).await
        };

        if let Err(item) = forward(&output, item, &mut sub, &cancel).await {
            tracing::debug!(
                "Stage '{}' dropped item {} during shutdown",
                worker.name(),
                item.id
            );
            break;
        }
    }

    tracing::trace!("Stage '{}' worker {} exited", worker.name(), index);
}

async fn recv_shared<T>(input: &Mutex<mpsc::Receiver<T>>) -> Option<T> {
    input.lock().await.recv().await
}

/// Sends `item` downstream while staying responsive to pauses
///
/// A worker blocked on a full channel still parks when a pause comes in, so
/// it never holds up a resume. Gives the item back if cancelled or if the
/// channel is closed.
pub async fn forward<T>(
    output: &mpsc::Sender<T>,
    item: T,
    sub: &mut Subscription,
    cancel: &CancellationToken,
) -> Result<(), T> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(item),
            _ = sub.paused() => {
                if !sub.park_until(cancel).await {
                    return Err(item);
                }
            }
            permit = output.reserve() => match permit {
                Ok(permit) => {
                    permit.send(item);
                    return Ok(());
                }
                Err(_) => return Err(item),
            },
        }
    }
}
