use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(rename = "disk-watcher", default)]
    pub disk_watcher: DiskWatcherConfig,
    #[serde(rename = "queue-watcher", default)]
    pub queue_watcher: QueueWatcherConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Workers per pipeline stage, also the maximum number of in-flight items
    pub workers: usize,

    /// Maximum number of link hops from a seed
    #[serde(rename = "max-hops", default = "default_max_hops")]
    pub max_hops: u32,

    /// Maximum number of redirects followed per item
    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: u32,

    /// How long shutdown waits for in-flight items (milliseconds)
    #[serde(rename = "drain-timeout", default = "default_drain_timeout")]
    pub drain_timeout: u64,

    /// Period of the status log line (milliseconds, 0 disables it)
    #[serde(rename = "status-interval", default = "default_status_interval")]
    pub status_interval: u64,

    /// Record links that leave the crawl scope
    #[serde(rename = "capture-outlinks", default = "default_true")]
    pub capture_outlinks: bool,

    /// Host patterns never fetched (e.g., "ads.example.com" or "*.tracker.net")
    #[serde(rename = "exclude-hosts", default)]
    pub exclude_hosts: Vec<String>,

    /// URLs the crawl starts from
    pub seeds: Vec<String>,
}

impl CrawlerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout)
    }

    /// Status log period, `None` when disabled
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval > 0).then(|| Duration::from_millis(self.status_interval))
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving archived bodies, the index and the outlink list
    pub directory: String,
}

/// Disk watcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DiskWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Polling interval (milliseconds)
    #[serde(rename = "check-interval", default = "default_disk_check_interval")]
    pub check_interval: u64,

    /// Ceiling of the backed-off polling interval while the disk is full (milliseconds)
    #[serde(rename = "max-check-interval", default = "default_disk_max_check_interval")]
    pub max_check_interval: u64,

    /// Free space to keep, overriding the computed threshold (GiB)
    #[serde(rename = "min-free-space-gb", default)]
    pub min_free_space_gb: Option<u64>,
}

impl Default for DiskWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: default_disk_check_interval(),
            max_check_interval: default_disk_max_check_interval(),
            min_free_space_gb: None,
        }
    }
}

/// Queue-depth watcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Polling interval (milliseconds)
    #[serde(rename = "check-interval", default = "default_queue_check_interval")]
    pub check_interval: u64,
}

impl Default for QueueWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: default_queue_check_interval(),
        }
    }
}

fn default_max_hops() -> u32 {
    2
}

fn default_max_redirects() -> u32 {
    5
}

fn default_drain_timeout() -> u64 {
    30_000
}

fn default_status_interval() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_disk_check_interval() -> u64 {
    1_000
}

fn default_disk_max_check_interval() -> u64 {
    60_000
}

fn default_queue_check_interval() -> u64 {
    500
}
