//! Local in-memory queue source
//!
//! Seeds from the configuration and every child the finisher produces are
//! queued here, deduplicated by URL, and fed to the reactor one at a time.
//! The source counts items that are queued or in flight. When that count
//! reaches zero the crawl has nothing left to do and the `exhausted` token
//! fires.

use crate::item::{Item, ItemSource};
use crate::pipeline::{Source, SourceError};
use crate::reactor::Reactor;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

const NAME: &str = "seeds";

struct QueueState {
    queue: Mutex<VecDeque<Item>>,
    seen: Mutex<HashSet<String>>,
    /// Items queued plus items handed to the reactor and not yet finished
    pending: AtomicUsize,
    wake: Notify,
    exhausted: CancellationToken,
}

impl QueueState {
    /// Queues an item unless its URL was already seen
    fn enqueue(&self, item: Item) -> bool {
        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.url.as_str().to_string());
        if !fresh {
            tracing::trace!("Skipping already queued {}", item.url);
            return false;
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
        self.wake.notify_one();
        true
    }

    fn pop(&self) -> Option<Item> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn queued(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Counts one item as done, firing `exhausted` when nothing is left
    fn settle(&self) {
        let before = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if before <= 1 {
            self.check_exhausted();
        }
    }

    fn check_exhausted(&self) {
        if self.pending.load(Ordering::SeqCst) == 0 && !self.exhausted.is_cancelled() {
            tracing::info!("Seed queue exhausted");
            self.exhausted.cancel();
        }
    }
}

/// Source backed by an in-memory FIFO queue
pub struct SeedSource {
    reactor: Reactor,
    seeds: Vec<Url>,
    state: Arc<QueueState>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl SeedSource {
    pub fn new(reactor: Reactor, seeds: Vec<Url>) -> Self {
        Self {
            reactor,
            seeds,
            state: Arc::new(QueueState {
                queue: Mutex::new(VecDeque::new()),
                seen: Mutex::new(HashSet::new()),
                pending: AtomicUsize::new(0),
                wake: Notify::new(),
                exhausted: CancellationToken::new(),
            }),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            started: false,
        }
    }

    /// Fires once every queued item has been finished
    pub fn exhausted(&self) -> CancellationToken {
        self.state.exhausted.clone()
    }

    /// Items queued or in flight
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Items waiting to be handed to the reactor
    pub fn queued(&self) -> usize {
        self.state.queued()
    }
}

#[async_trait]
impl Source for SeedSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(
        &mut self,
        finished: mpsc::Receiver<Item>,
        produced: mpsc::Receiver<Item>,
    ) -> Result<(), SourceError> {
        if self.started {
            return Err(SourceError::AlreadyStarted(NAME.to_string()));
        }
        self.started = true;

        let mut accepted = 0;
        for url in self.seeds.drain(..) {
            if self
                .state
                .enqueue(Item::new(url).with_source(ItemSource::Queue))
            {
                accepted += 1;
            }
        }
        tracing::info!("Queued {} seeds", accepted);
        self.state.check_exhausted();

        self.tasks.push(tokio::spawn(feed(
            self.reactor.clone(),
            Arc::clone(&self.state),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(intake(
            Arc::clone(&self.state),
            finished,
            produced,
            self.cancel.clone(),
        )));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SourceError> {
        if !self.started {
            return Err(SourceError::NotStarted(NAME.to_string()));
        }

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                return Err(SourceError::Failed {
                    name: NAME.to_string(),
                    message: e.to_string(),
                });
            }
        }

        let left = self.state.queued();
        if left > 0 {
            tracing::info!("Seed source stopped with {} items still queued", left);
        }
        Ok(())
    }
}

/// Hands queued items to the reactor until it refuses new work
async fn feed(reactor: Reactor, state: Arc<QueueState>, cancel: CancellationToken) {
    loop {
        let Some(item) = state.pop() else {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = state.wake.notified() => continue,
            }
        };

        let url = item.url.clone();
        // Not raced against `cancel`: a frozen reactor already ends this wait.
        match reactor.receive_insert(item).await {
            Ok(()) => tracing::trace!("Inserted {}", url),
            Err(e) if e.is_stop_signal() => {
                tracing::debug!("Reactor stopped accepting work: {}", e);
                state.settle();
                return;
            }
            Err(e) => {
                tracing::warn!("Could not insert {}: {}", url, e);
                state.settle();
            }
        }
    }
}

/// Receives finished items and newly produced children
async fn intake(
    state: Arc<QueueState>,
    mut finished: mpsc::Receiver<Item>,
    mut produced: mpsc::Receiver<Item>,
    cancel: CancellationToken,
) {
    let mut finished_open = true;
    let mut produced_open = true;

    while finished_open || produced_open {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // Children are counted before their parent settles.
            child = produced.recv(), if produced_open => match child {
                Some(child) => {
                    state.enqueue(child.with_source(ItemSource::Queue));
                }
                None => produced_open = false,
            },
            done = finished.recv(), if finished_open => match done {
                Some(done) => {
                    if done.is_failed() {
                        tracing::debug!(
                            "Finished {} as failed: {}",
                            done.url,
                            done.error.as_deref().unwrap_or("unknown error")
                        );
                    } else {
                        tracing::debug!("Finished {}", done.url);
                    }
                    state.settle();
                }
                None => finished_open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_seeds_are_deduplicated_and_inserted() {
        let reactor = Reactor::new();
        let (out_tx, mut out_rx) = mpsc::channel(4);
        reactor.start(4, out_tx).unwrap();

        let mut source = SeedSource::new(
            reactor.clone(),
            vec![
                url("https://example.com/"),
                url("https://example.com/"),
                url("https://example.org/"),
            ],
        );
        let (_finish_tx, finish_rx) = mpsc::channel(4);
        let (_produce_tx, produce_rx) = mpsc::channel(4);
        source.start(finish_rx, produce_rx).await.unwrap();

        let first = timeout(Duration::from_secs(1), out_rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), out_rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.url.as_str(), "https://example.com/");
        assert_eq!(second.url.as_str(), "https://example.org/");
        assert_eq!(first.source, ItemSource::Queue);
        assert_eq!(source.pending(), 2);

        source.stop().await.unwrap();
        reactor.stop().await;
    }

    #[tokio::test]
    async fn test_exhausted_after_children_finish() {
        let reactor = Reactor::new();
        let (out_tx, mut out_rx) = mpsc::channel(4);
        reactor.start(4, out_tx).unwrap();

        let mut source = SeedSource::new(reactor.clone(), vec![url("https://example.com/")]);
        let exhausted = source.exhausted();
        let (finish_tx, finish_rx) = mpsc::channel(4);
        let (produce_tx, produce_rx) = mpsc::channel(4);
        source.start(finish_rx, produce_rx).await.unwrap();

        let seed = out_rx.recv().await.unwrap();
        let child = seed.child(url("https://example.com/a"));
        let duplicate = seed.child(url("https://example.com/"));

        produce_tx.send(child).await.unwrap();
        produce_tx.send(duplicate).await.unwrap();
        reactor.mark_as_finished(&seed).unwrap();
        finish_tx.send(seed).await.unwrap();

        let child = timeout(Duration::from_secs(1), out_rx.recv()).await.unwrap().unwrap();
        assert_eq!(child.url.as_str(), "https://example.com/a");
        assert!(!exhausted.is_cancelled());

        reactor.mark_as_finished(&child).unwrap();
        finish_tx.send(child).await.unwrap();
        timeout(Duration::from_secs(1), exhausted.cancelled())
            .await
            .unwrap();
        assert_eq!(source.pending(), 0);

        source.stop().await.unwrap();
        reactor.stop().await;
    }

    #[tokio::test]
    async fn test_no_seeds_is_exhausted_immediately() {
        let reactor = Reactor::new();
        let (out_tx, _out_rx) = mpsc::channel(1);
        reactor.start(1, out_tx).unwrap();

        let mut source = SeedSource::new(reactor.clone(), Vec::new());
        let (_finish_tx, finish_rx) = mpsc::channel(1);
        let (_produce_tx, produce_rx) = mpsc::channel(1);
        source.start(finish_rx, produce_rx).await.unwrap();

        assert!(source.exhausted().is_cancelled());
        source.stop().await.unwrap();
        reactor.stop().await;
    }

    #[tokio::test]
    async fn test_feeder_stops_when_reactor_freezes() {
        let reactor = Reactor::new();
        let (out_tx, _out_rx) = mpsc::channel(1);
        reactor.start(1, out_tx).unwrap();

        let mut source = SeedSource::new(
            reactor.clone(),
            vec![url("https://a.example/"), url("https://b.example/")],
        );
        let (_finish_tx, finish_rx) = mpsc::channel(1);
        let (_produce_tx, produce_rx) = mpsc::channel(1);
        source.start(finish_rx, produce_rx).await.unwrap();

        // The second seed waits for a token that never frees up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        reactor.freeze();

        timeout(Duration::from_secs(1), source.stop())
            .await
            .unwrap()
            .unwrap();
        reactor.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let reactor = Reactor::new();
        let (out_tx, _out_rx) = mpsc::channel(1);
        reactor.start(1, out_tx).unwrap();

        let mut source = SeedSource::new(reactor.clone(), Vec::new());
        let (_f1, finish_rx) = mpsc::channel(1);
        let (_p1, produce_rx) = mpsc::channel(1);
        source.start(finish_rx, produce_rx).await.unwrap();

        let (_f2, finish_rx) = mpsc::channel(1);
        let (_p2, produce_rx) = mpsc::channel(1);
        assert!(matches!(
            source.start(finish_rx, produce_rx).await,
            Err(SourceError::AlreadyStarted(_))
        ));

        source.stop().await.unwrap();
        reactor.stop().await;
    }
}
