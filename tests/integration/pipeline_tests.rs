//! Integration tests for the pipeline core
//!
//! The stages here are stand-ins that only tag items, so these tests
//! exercise admission control, pausing and shutdown ordering without any
//! network access.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::pipeline::{
    PipelineSettings, PipelineStages, Source, SourceError, StageWorker,
};
use sumi_harvest::{HarvestError, Item, ItemStatus, PauseController, Pipeline, Reactor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::Url;

/// Counts items currently inside any stage
#[derive(Default)]
struct Occupancy {
    active: AtomicUsize,
    peak: AtomicUsize,
    processed: AtomicUsize,
}

struct TagStage {
    name: &'static str,
    status: ItemStatus,
    delay: Duration,
    occupancy: Arc<Occupancy>,
}

#[async_trait]
impl StageWorker for TagStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn process(&self, mut item: Item) -> Item {
        let now = self.occupancy.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.occupancy.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.occupancy.active.fetch_sub(1, Ordering::SeqCst);
        self.occupancy.processed.fetch_add(1, Ordering::SeqCst);
        item.status = self.status;
        item
    }
}

fn stages(occupancy: &Arc<Occupancy>, archive_delay: Duration) -> PipelineStages {
    let stage = |name, status, delay| -> Arc<dyn StageWorker> {
        Arc::new(TagStage {
            name,
            status,
            delay,
            occupancy: Arc::clone(occupancy),
        })
    };

    PipelineStages {
        preprocessor: stage("preprocessor", ItemStatus::Preprocessed, Duration::ZERO),
        archiver: stage("archiver", ItemStatus::Archived, archive_delay),
        postprocessor: stage("postprocessor", ItemStatus::Completed, Duration::ZERO),
    }
}

/// Inserts a fixed list of URLs and reports every finished item
struct ListSource {
    reactor: Reactor,
    urls: Vec<Url>,
    report: mpsc::UnboundedSender<Item>,
    fail_start: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl ListSource {
    fn new(reactor: &Reactor, count: usize) -> (Self, mpsc::UnboundedReceiver<Item>) {
        let (report, finished) = mpsc::unbounded_channel();
        let urls = (0..count)
            .map(|i| Url::parse(&format!("https://example.com/{}", i)).unwrap())
            .collect();
        let source = Self {
            reactor: reactor.clone(),
            urls,
            report,
            fail_start: false,
            tasks: Vec::new(),
        };
        (source, finished)
    }
}

#[async_trait]
impl Source for ListSource {
    fn name(&self) -> &str {
        "list"
    }

    async fn start(
        &mut self,
        mut finished: mpsc::Receiver<Item>,
        mut produced: mpsc::Receiver<Item>,
    ) -> Result<(), SourceError> {
        if self.fail_start {
            return Err(SourceError::Failed {
                name: "list".to_string(),
                message: "refusing to start".to_string(),
            });
        }

        let reactor = self.reactor.clone();
        let urls = std::mem::take(&mut self.urls);
        self.tasks.push(tokio::spawn(async move {
            for url in urls {
                if reactor.receive_insert(Item::new(url)).await.is_err() {
                    break;
                }
            }
        }));

        let report = self.report.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(item) = finished.recv().await {
                let _ = report.send(item);
            }
        }));
        self.tasks.push(tokio::spawn(async move {
            while produced.recv().await.is_some() {}
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SourceError> {
        for task in self.tasks.drain(..) {
            task.await.map_err(|e| SourceError::Failed {
                name: "list".to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn settings(workers: usize) -> PipelineSettings {
    PipelineSettings {
        workers,
        drain_timeout: Duration::from_secs(5),
        status_interval: None,
    }
}

async fn collect(finished: &mut mpsc::UnboundedReceiver<Item>, count: usize) -> Vec<Item> {
    let mut items = Vec::with_capacity(count);
    while items.len() < count {
        let item = timeout(Duration::from_secs(5), finished.recv())
            .await
            .expect("Timed out waiting for finished items")
            .expect("Source report channel closed");
        items.push(item);
    }
    items
}

#[tokio::test]
async fn test_items_flow_through_every_stage() {
    let reactor = Reactor::new();
    let pause = Arc::new(PauseController::new());
    let occupancy = Arc::new(Occupancy::default());
    let (source, mut finished) = ListSource::new(&reactor, 10);

    let pipeline = Pipeline::start(
        settings(3),
        reactor.clone(),
        pause,
        stages(&occupancy, Duration::ZERO),
        Box::new(source),
        None,
    )
    .await
    .unwrap();

    let items = collect(&mut finished, 10).await;
    assert!(items.iter().all(|item| item.status == ItemStatus::Completed));
    assert_eq!(occupancy.processed.load(Ordering::SeqCst), 30);

    let stats = pipeline.statistics();
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.capacity, 3);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.tokens_in_use, 0);
    assert!(stats.queue_depths.contains_key("archiver"));

    pipeline.stop().await.unwrap();
    assert!(reactor.is_frozen());
}

#[tokio::test]
async fn test_single_token_serializes_items() {
    let reactor = Reactor::new();
    let pause = Arc::new(PauseController::new());
    let occupancy = Arc::new(Occupancy::default());
    let (source, mut finished) = ListSource::new(&reactor, 5);

    let pipeline = Pipeline::start(
        settings(1),
        reactor.clone(),
        pause,
        stages(&occupancy, Duration::from_millis(10)),
        Box::new(source),
        None,
    )
    .await
    .unwrap();

    let items = collect(&mut finished, 5).await;
    let paths: Vec<&str> = items.iter().map(|item| item.url.path()).collect();
    assert_eq!(paths, vec!["/0", "/1", "/2", "/3", "/4"]);
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_pause_halts_progress_until_resumed() {
    let reactor = Reactor::new();
    let pause = Arc::new(PauseController::new());
    let occupancy = Arc::new(Occupancy::default());
    let (source, mut finished) = ListSource::new(&reactor, 4);

    assert!(pause.pause("operator", "manual hold"));

    let pipeline = Pipeline::start(
        settings(2),
        reactor.clone(),
        Arc::clone(&pause),
        stages(&occupancy, Duration::ZERO),
        Box::new(source),
        None,
    )
    .await
    .unwrap();

    assert!(timeout(Duration::from_millis(200), finished.recv())
        .await
        .is_err());
    assert_eq!(occupancy.processed.load(Ordering::SeqCst), 0);

    let stats = pipeline.statistics();
    assert!(stats.paused);
    assert!(stats.pause_reason.contains("manual hold"));

    assert!(timeout(Duration::from_secs(5), pause.resume("operator"))
        .await
        .unwrap());

    let items = collect(&mut finished, 4).await;
    assert_eq!(items.len(), 4);
    assert!(!pipeline.statistics().paused);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_drains_in_flight_items() {
    let reactor = Reactor::new();
    let pause = Arc::new(PauseController::new());
    let occupancy = Arc::new(Occupancy::default());
    let (source, mut finished) = ListSource::new(&reactor, 2);

    let pipeline = Pipeline::start(
        settings(2),
        reactor.clone(),
        pause,
        stages(&occupancy, Duration::from_millis(300)),
        Box::new(source),
        None,
    )
    .await
    .unwrap();

    timeout(Duration::from_secs(1), async {
        while reactor.in_flight() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let stats = pipeline.stop().await.unwrap();

    assert_eq!(stats.completed, 2);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.tokens_in_use, 0);
    assert_eq!(reactor.in_flight(), 0);
    let mut drained = Vec::new();
    while let Ok(item) = finished.try_recv() {
        drained.push(item);
    }
    assert_eq!(drained.len(), 2);
    assert!(drained.iter().all(|item| item.status == ItemStatus::Completed));
}

#[tokio::test]
async fn test_source_start_failure_unwinds() {
    let reactor = Reactor::new();
    let pause = Arc::new(PauseController::new());
    let occupancy = Arc::new(Occupancy::default());
    let (mut source, _finished) = ListSource::new(&reactor, 1);
    source.fail_start = true;

    let result = Pipeline::start(
        settings(2),
        reactor.clone(),
        pause,
        stages(&occupancy, Duration::ZERO),
        Box::new(source),
        None,
    )
    .await;

    assert!(matches!(result, Err(HarvestError::Source(_))));
    let err = reactor
        .receive_insert(Item::new(Url::parse("https://example.com/").unwrap()))
        .await
        .unwrap_err();
    assert!(err.is_stop_signal());
}
