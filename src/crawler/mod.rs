//! Crawler collaborators plugged into the pipeline
//!
//! This module contains the concrete pieces that make the pipeline crawl:
//! - HTTP fetching and HTML link extraction
//! - The three stage workers (preprocessor, archiver, postprocessor)
//! - The archive writer and the outlink recorder
//! - The in-memory seed queue source

mod archiver;
mod fetcher;
mod outlinks;
mod parser;
mod postprocessor;
mod preprocessor;
mod seeds;
mod writer;

pub use archiver::Archiver;
pub use fetcher::{build_http_client, fetch_url, user_agent, FetchResult};
pub use outlinks::{OutlinkRecorder, OUTLINKS_FILE};
pub use parser::{parse_html, ParsedPage};
pub use postprocessor::{Postprocessor, PostprocessorSettings};
pub use preprocessor::Preprocessor;
pub use seeds::SeedSource;
pub use writer::{ArchiveRecord, ArchiveWriter, INDEX_FILE};

use crate::config::Config;
use crate::pause::PauseController;
use crate::pipeline::PipelineStages;
use crate::url::HostFilter;
use crate::watchers::{
    spawn_disk_watcher, spawn_queue_depth_watcher, DiskWatcherSettings, QueueDepthProvider,
    SystemDiskUsage, WatcherHandle, GIB,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Builds the three stage workers from the configuration
pub fn build_stages(config: &Config, client: Client, writer: Arc<ArchiveWriter>) -> PipelineStages {
    let exclude = HostFilter::new(&config.crawler.exclude_hosts);

    PipelineStages {
        preprocessor: Arc::new(Preprocessor::new(exclude)),
        archiver: Arc::new(Archiver::new(client, writer)),
        postprocessor: Arc::new(Postprocessor::new(PostprocessorSettings {
            max_hops: config.crawler.max_hops,
            max_redirects: config.crawler.max_redirects,
            capture_outlinks: config.crawler.capture_outlinks,
        })),
    }
}

/// Starts the watchers enabled in the configuration
///
/// The disk watcher checks the filesystem holding the archive; the
/// queue-depth watcher follows the writer's backlog.
pub fn spawn_watchers(
    config: &Config,
    pause: &Arc<PauseController>,
    writer: &Arc<ArchiveWriter>,
) -> Vec<WatcherHandle> {
    let mut watchers = Vec::new();

    if config.disk_watcher.enabled {
        watchers.push(spawn_disk_watcher(
            Arc::clone(pause),
            Arc::new(SystemDiskUsage::new(writer.directory())),
            DiskWatcherSettings {
                check_interval: Duration::from_millis(config.disk_watcher.check_interval),
                max_check_interval: Duration::from_millis(config.disk_watcher.max_check_interval),
                min_free_space: config
                    .disk_watcher
                    .min_free_space_gb
                    .map(|gb| gb.saturating_mul(GIB)),
            },
        ));
    }

    if config.queue_watcher.enabled {
        let write_queue: Arc<dyn QueueDepthProvider> = writer.clone();
        watchers.push(spawn_queue_depth_watcher(
            Arc::clone(pause),
            write_queue,
            config.crawler.workers,
            Duration::from_millis(config.queue_watcher.check_interval),
        ));
    }

    watchers
}
