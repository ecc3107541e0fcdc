//! Crawl statistics
//!
//! Counters are bumped by the finisher as items leave the pipeline; a
//! [`CrawlStatistics`] snapshot combines them with the live state of the
//! reactor, the pause controller and the stage channels.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals updated by the finisher
#[derive(Debug, Default)]
pub struct CrawlCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    fed_back: AtomicU64,
    children: AtomicU64,
    outlinks: AtomicU64,
}

impl CrawlCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_finished(&self, failed: bool) {
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_feedback(&self) {
        self.fed_back.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_children(&self, count: usize) {
        self.children.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_outlinks(&self, count: usize) {
        self.outlinks.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn fed_back(&self) -> u64 {
        self.fed_back.load(Ordering::Relaxed)
    }

    pub fn children(&self) -> u64 {
        self.children.load(Ordering::Relaxed)
    }

    pub fn outlinks(&self) -> u64 {
        self.outlinks.load(Ordering::Relaxed)
    }
}

/// Crawl statistics snapshot
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// When the pipeline started
    pub started_at: DateTime<Utc>,

    /// Seconds since start
    pub uptime_seconds: i64,

    /// Whether the crawl is currently paused
    pub paused: bool,

    /// Active pause reasons, empty while running
    pub pause_reason: String,

    /// When the current pause began
    pub paused_since: Option<DateTime<Utc>>,

    /// Items admitted and not yet finished
    pub in_flight: usize,

    /// Tokens currently held
    pub tokens_in_use: usize,

    /// Size of the token pool
    pub capacity: usize,

    /// Buffered items per stage channel
    pub queue_depths: BTreeMap<String, usize>,

    /// Items finished successfully
    pub completed: u64,

    /// Items finished with an error
    pub failed: u64,

    /// Items re-injected after a redirect
    pub fed_back: u64,

    /// Child items handed back to the source
    pub children: u64,

    /// Out-of-scope links handed to the outlink sink
    pub outlinks: u64,
}

impl CrawlStatistics {
    /// Single-line form used by the periodic status log
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "in-flight {}/{} | completed {} | failed {} | redirects {} | discovered {} | outlinks {}",
            self.in_flight,
            self.capacity,
            self.completed,
            self.failed,
            self.fed_back,
            self.children,
            self.outlinks
        );

        if self.paused {
            line.push_str(&format!(" | PAUSED: {}", self.pause_reason));
        }
        line
    }

    /// Share of finished items that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished > 0 {
            (self.completed as f64 / finished as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Started: {}", stats.started_at.to_rfc3339());
    println!("  Uptime: {}s", stats.uptime_seconds);
    println!("  Items completed: {}", stats.completed);
    println!("  Items failed: {}", stats.failed);
    println!("  Redirects followed: {}", stats.fed_back);
    println!("  URLs discovered: {}", stats.children);
    println!("  Outlinks recorded: {}", stats.outlinks);
    println!();

    println!("Reactor:");
    println!("  In flight: {}", stats.in_flight);
    println!("  Tokens in use: {} / {}", stats.tokens_in_use, stats.capacity);
    println!();

    if !stats.queue_depths.is_empty() {
        println!("Queue Depths:");
        for (name, depth) in &stats.queue_depths {
            println!("  {}: {}", name, depth);
        }
        println!();
    }

    if stats.paused {
        println!("Paused: {}", stats.pause_reason);
        if let Some(since) = stats.paused_since {
            println!("  since {}", since.to_rfc3339());
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} items)",
        stats.success_rate(),
        stats.completed,
        stats.completed + stats.failed
    );
}
