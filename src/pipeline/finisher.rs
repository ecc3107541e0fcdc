use super::stage::{forward, StageHandle};
use crate::item::Item;
use crate::pause::{PauseController, Subscription};
use crate::reactor::{Reactor, ReactorError};
use crate::stats::CrawlCounters;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Outputs of the finisher stage
#[derive(Clone)]
pub(crate) struct FinisherOutputs {
    pub finish: mpsc::Sender<Item>,
    pub produce: mpsc::Sender<Item>,
    pub outlinks: Option<mpsc::Sender<Url>>,
}

/// Spawns the finisher, the last stage before the source
///
/// Redirected items loop back through the reactor. Everything else releases
/// its token; discovered children go to `produce`, out-of-scope links to
/// `outlinks` and the item itself to `finish`.
///
/// # Panics
///
/// A worker panics when the reactor reports broken bookkeeping (finishing
/// an unknown item or feeding back one that was never admitted). The panic
/// surfaces as [`HarvestError::WorkerPanicked`](crate::HarvestError) when the
/// stage is stopped.
pub(crate) fn spawn_finisher(
    reactor: Reactor,
    workers: usize,
    input: mpsc::Receiver<Item>,
    outputs: FinisherOutputs,
    counters: Arc<CrawlCounters>,
    pause: &Arc<PauseController>,
) -> StageHandle {
    let cancel = CancellationToken::new();
    let input = Arc::new(Mutex::new(input));
    let mut tasks = JoinSet::new();

    for _ in 0..workers.max(1) {
        let finisher = Finisher {
            reactor: reactor.clone(),
            outputs: outputs.clone(),
            counters: Arc::clone(&counters),
            sub: pause.subscribe(),
            cancel: cancel.clone(),
        };
        tasks.spawn(finisher.run(Arc::clone(&input)));
    }

    StageHandle::new("finisher", cancel, tasks)
}

struct Finisher {
    reactor: Reactor,
    outputs: FinisherOutputs,
    counters: Arc<CrawlCounters>,
    sub: Subscription,
    cancel: CancellationToken,
}

impl Finisher {
    async fn run(mut self, input: Arc<Mutex<mpsc::Receiver<Item>>>) {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.sub.paused() => {
                    if !self.sub.park_until(&self.cancel).await {
                        break;
                    }
                    continue;
                }
                item = async { input.lock().await.recv().await } => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            if !self.finish(item).await {
                break;
            }
        }
    }

    /// Returns false once the stage is being stopped
    async fn finish(&mut self, mut item: Item) -> bool {
        if item.status.needs_feedback() {
            match self.feedback(item.clone()).await {
                Ok(()) => {
                    self.counters.record_feedback();
                    return true;
                }
                Err(e) if e.is_stop_signal() => {
                    tracing::debug!("Item {} interrupted before feedback: {}", item.id, e);
                    item.fail("interrupted by shutdown");
                }
                Err(e) => panic!("reactor bookkeeping violated for {}: {}", item.url, e),
            }
        }

        self.counters.record_finished(item.is_failed());
        if item.is_failed() {
            tracing::debug!(
                "Failed {}: {}",
                item.url,
                item.error.as_deref().unwrap_or("unknown error")
            );
        } else {
            tracing::debug!("Finished {}", item.url);
        }

        // The token is released only after delivery, so a drain that sees an
        // empty state table never cuts a finished item off from the source.
        let children = std::mem::take(&mut item.children);
        let outlinks = std::mem::take(&mut item.outlinks);
        let admitted = item.clone();
        let delivered = self.deliver(item, children, outlinks).await;

        if let Err(e) = self.reactor.mark_as_finished(&admitted) {
            panic!("reactor bookkeeping violated for {}: {}", admitted.url, e);
        }
        delivered
    }

    /// Hands children, outlinks and the item itself downstream
    async fn deliver(&mut self, item: Item, children: Vec<Item>, outlinks: Vec<Url>) -> bool {
        self.counters.record_children(children.len());
        for child in children {
            if forward(&self.outputs.produce, child, &mut self.sub, &self.cancel)
                .await
                .is_err()
            {
                return false;
            }
        }

        if let Some(sink) = &self.outputs.outlinks {
            self.counters.record_outlinks(outlinks.len());
            for link in outlinks {
                if forward(sink, link, &mut self.sub, &self.cancel).await.is_err() {
                    return false;
                }
            }
        }

        forward(&self.outputs.finish, item, &mut self.sub, &self.cancel)
            .await
            .is_ok()
    }

    /// Feeds an item back, parking whenever a pause comes in
    ///
    /// The reactor input may be full while the crawl is paused, so waiting
    /// on it without watching the subscription would hold up resume.
    async fn feedback(&mut self, item: Item) -> Result<(), ReactorError> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ReactorError::ShuttingDown),
                _ = self.sub.paused() => {
                    if !self.sub.park_until(&self.cancel).await {
                        return Err(ReactorError::ShuttingDown);
                    }
                }
                result = self.reactor.receive_feedback(item.clone()) => return result,
            }
        }
    }
}
