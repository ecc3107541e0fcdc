//! Stage topology, startup and shutdown ordering
//!
//! The pipeline wires named bounded channels between the reactor and the
//! stage workers:
//!
//! ```text
//! Source -> Reactor -> Preprocessor -> Archiver -> Postprocessor -> Finisher
//!              ^                                                     |  |  |
//!              +------------------ feedback -------------------------+  |  |
//!   Source <------------------- finish / produce -----------------------+  |
//!   OutlinkSink <-------------- outlinks -----------------------------------+
//! ```
//!
//! Every channel holds as many items as there are workers per stage. Stages
//! start downstream of the reactor in order, and stop in the same order once
//! the reactor is frozen and drained, so no stage ever sends into a stage that
//! has already stopped.

mod channels;
mod finisher;
mod source;
mod stage;

pub use channels::ChannelRegistry;
pub use source::{OutlinkSink, Source, SourceError};
pub use stage::{forward, spawn_stage, StageHandle, StageWorker};

use crate::item::Item;
use crate::pause::PauseController;
use crate::reactor::Reactor;
use crate::stats::{CrawlCounters, CrawlStatistics};
use crate::watchers::{sleep_or_cancel, WatcherHandle};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use finisher::{spawn_finisher, FinisherOutputs};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Interval at which the drain checks the reactor's state table
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Workers per stage, also the token pool and channel capacity
    pub workers: usize,

    /// How long shutdown waits for in-flight items to finish
    pub drain_timeout: Duration,

    /// Period of the status log line, `None` disables it
    pub status_interval: Option<Duration>,
}

/// The domain stages between the reactor and the finisher
pub struct PipelineStages {
    pub preprocessor: Arc<dyn StageWorker>,
    pub archiver: Arc<dyn StageWorker>,
    pub postprocessor: Arc<dyn StageWorker>,
}

/// A running pipeline
pub struct Pipeline {
    settings: PipelineSettings,
    reactor: Reactor,
    pause: Arc<PauseController>,
    channels: Arc<ChannelRegistry>,
    counters: Arc<CrawlCounters>,
    started_at: DateTime<Utc>,
    stages: Vec<StageHandle>,
    source: Box<dyn Source>,
    outlink_sink: Option<Box<dyn OutlinkSink>>,
    watchers: Vec<WatcherHandle>,
    reporter: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Pipeline {
    /// Builds every channel and starts all components in dependency order
    ///
    /// The order is: reactor, preprocessor, archiver, postprocessor,
    /// finisher, source, then the outlink sink. If the source or the sink
    /// fails to start, whatever already runs is stopped again.
    pub async fn start(
        settings: PipelineSettings,
        reactor: Reactor,
        pause: Arc<PauseController>,
        stages: PipelineStages,
        mut source: Box<dyn Source>,
        mut outlink_sink: Option<Box<dyn OutlinkSink>>,
    ) -> Result<Self, HarvestError> {
        let workers = settings.workers.max(1);
        let channels = Arc::new(ChannelRegistry::new());
        let counters = Arc::new(CrawlCounters::new());

        let (reactor_tx, reactor_rx) = channels.channel::<Item>("reactor", workers);
        let (pre_tx, pre_rx) = channels.channel::<Item>("preprocessor", workers);
        let (archiver_tx, archiver_rx) = channels.channel::<Item>("archiver", workers);
        let (post_tx, post_rx) = channels.channel::<Item>("postprocessor", workers);
        let (finish_tx, finish_rx) = channels.channel::<Item>("finish", workers);
        let (produce_tx, produce_rx) = channels.channel::<Item>("produce", workers);
        let outlinks = outlink_sink
            .as_ref()
            .map(|_| channels.channel::<Url>("outlinks", workers));
        let (outlinks_tx, outlinks_rx) = match outlinks {
            Some((tx, rx)) => (Some(tx), Some(rx)),
            None => (None, None),
        };

        reactor.start(workers, reactor_tx)?;

        let mut handles = vec![
            spawn_stage(stages.preprocessor, workers, reactor_rx, pre_tx, &pause),
            spawn_stage(stages.archiver, workers, pre_rx, archiver_tx, &pause),
            spawn_stage(stages.postprocessor, workers, archiver_rx, post_tx, &pause),
        ];
        handles.push(spawn_finisher(
            reactor.clone(),
            workers,
            post_rx,
            FinisherOutputs {
                finish: finish_tx,
                produce: produce_tx,
                outlinks: outlinks_tx,
            },
            Arc::clone(&counters),
            &pause,
        ));

        if let Err(e) = source.start(finish_rx, produce_rx).await {
            tracing::error!("Source '{}' failed to start: {}", source.name(), e);
            abort_startup(handles, &reactor, &channels).await;
            return Err(e.into());
        }

        if let (Some(sink), Some(rx)) = (outlink_sink.as_mut(), outlinks_rx) {
            if let Err(e) = sink.start(rx).await {
                tracing::error!("Outlink sink '{}' failed to start: {}", sink.name(), e);
                abort_startup(handles, &reactor, &channels).await;
                if let Err(stop_err) = source.stop().await {
                    tracing::warn!("Source '{}' failed to stop: {}", source.name(), stop_err);
                }
                return Err(e.into());
            }
        }

        let mut pipeline = Self {
            settings,
            reactor,
            pause,
            channels,
            counters,
            started_at: Utc::now(),
            stages: handles,
            source,
            outlink_sink,
            watchers: Vec::new(),
            reporter: None,
        };

        if let Some(interval) = pipeline.settings.status_interval {
            pipeline.reporter = Some(pipeline.spawn_status_reporter(interval));
        }

        tracing::info!(
            "Pipeline started: {} workers per stage, source '{}'",
            workers,
            pipeline.source.name()
        );
        Ok(pipeline)
    }

    /// Hands a running watcher to the pipeline, which stops it first on shutdown
    pub fn add_watcher(&mut self, watcher: WatcherHandle) {
        tracing::debug!("Watcher '{}' attached", watcher.name());
        self.watchers.push(watcher);
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn pause_controller(&self) -> &Arc<PauseController> {
        &self.pause
    }

    /// Buffered items per named channel
    pub fn queue_depths(&self) -> BTreeMap<String, usize> {
        self.channels.depths()
    }

    pub fn statistics(&self) -> CrawlStatistics {
        collect_statistics(
            self.started_at,
            &self.reactor,
            &self.pause,
            &self.channels,
            &self.counters,
        )
    }

    fn spawn_status_reporter(&self, interval: Duration) -> (CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let started_at = self.started_at;
        let reactor = self.reactor.clone();
        let pause = Arc::clone(&self.pause);
        let channels = Arc::clone(&self.channels);
        let counters = Arc::clone(&self.counters);

        let task = tokio::spawn(async move {
            while sleep_or_cancel(&token, interval).await {
                let stats = collect_statistics(started_at, &reactor, &pause, &channels, &counters);
                if stats.paused {
                    tracing::warn!("{}", stats.summary_line());
                } else {
                    tracing::info!("{}", stats.summary_line());
                }
            }
        });

        (cancel, task)
    }

    /// Shuts the pipeline down in order
    ///
    /// 1. Stop the status reporter and every watcher.
    /// 2. Freeze the reactor and wait (bounded by the drain timeout) for
    ///    in-flight items to finish.
    /// 3. Stop preprocessor, archiver, postprocessor and finisher in order.
    /// 4. Stop the reactor and close the stage channels.
    /// 5. Stop the source, then the outlink sink.
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned. On success the statistics include every item finished
    /// during the drain.
    pub async fn stop(mut self) -> Result<CrawlStatistics, HarvestError> {
        tracing::info!("Stopping pipeline");
        let mut first_error: Option<HarvestError> = None;

        if let Some((cancel, task)) = self.reporter.take() {
            cancel.cancel();
            if let Err(e) = task.await {
                tracing::warn!("Status reporter ended abnormally: {}", e);
            }
        }
        for watcher in self.watchers.drain(..) {
            watcher.stop().await;
        }

        self.reactor.freeze();
        self.drain().await;

        for stage in self.stages.drain(..) {
            if let Err(e) = stage.stop().await {
                first_error.get_or_insert(e);
            }
        }

        self.reactor.stop().await;

        let statistics = self.statistics();
        self.channels.close();

        if let Err(e) = self.source.stop().await {
            tracing::error!("Source '{}' failed to stop: {}", self.source.name(), e);
            first_error.get_or_insert(e.into());
        }

        if let Some(sink) = self.outlink_sink.as_mut() {
            if let Err(e) = sink.stop().await {
                tracing::error!("Outlink sink '{}' failed to stop: {}", sink.name(), e);
                first_error.get_or_insert(e.into());
            }
        }

        tracing::info!("Pipeline stopped: {}", statistics.summary_line());
        match first_error {
            Some(e) => Err(e),
            None => Ok(statistics),
        }
    }

    /// Waits for the state table to empty, up to the drain timeout
    async fn drain(&self) {
        let wait = async {
            while self.reactor.in_flight() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        };

        if tokio::time::timeout(self.settings.drain_timeout, wait)
            .await
            .is_err()
        {
            tracing::warn!(
                "Drain timed out after {:?} with {} items in flight",
                self.settings.drain_timeout,
                self.reactor.in_flight()
            );
        } else {
            tracing::debug!("Pipeline drained");
        }
    }
}

async fn abort_startup(stages: Vec<StageHandle>, reactor: &Reactor, channels: &ChannelRegistry) {
    reactor.freeze();
    for stage in stages {
        if let Err(e) = stage.stop().await {
            tracing::warn!("Stage failed while aborting startup: {}", e);
        }
    }
    reactor.stop().await;
    channels.close();
}

fn collect_statistics(
    started_at: DateTime<Utc>,
    reactor: &Reactor,
    pause: &PauseController,
    channels: &ChannelRegistry,
    counters: &CrawlCounters,
) -> CrawlStatistics {
    CrawlStatistics {
        started_at,
        uptime_seconds: (Utc::now() - started_at).num_seconds(),
        paused: pause.is_paused(),
        pause_reason: pause.reason(),
        paused_since: pause.paused_since(),
        in_flight: reactor.in_flight(),
        tokens_in_use: reactor.tokens_in_use(),
        capacity: reactor.capacity(),
        queue_depths: channels.depths(),
        completed: counters.completed(),
        failed: counters.failed(),
        fed_back: counters.fed_back(),
        children: counters.children(),
        outlinks: counters.outlinks(),
    }
}
