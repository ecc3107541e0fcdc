//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest archiving crawler.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use sumi_harvest::config::{load_config_with_hash, Config};
use sumi_harvest::crawler::{
    build_http_client, build_stages, spawn_watchers, user_agent, ArchiveWriter, OutlinkRecorder,
    SeedSource,
};
use sumi_harvest::pipeline::{OutlinkSink, PipelineSettings};
use sumi_harvest::stats::print_statistics;
use sumi_harvest::url::normalize_str;
use sumi_harvest::{PauseController, Pipeline, Reactor};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a continuously-running web-archiving crawler
///
/// Sumi-Harvest fetches and archives pages starting from the configured
/// seeds, follows same-host links up to a hop limit, and pauses itself when
/// the disk fills up or the archive writer falls behind.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A continuously-running web-archiving crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,

    /// Seconds between status lines, overriding the config (0 disables them)
    #[arg(long, value_name = "SECONDS")]
    stats_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(seconds) = cli.stats_interval {
        config.crawler.status_interval = seconds.saturating_mul(1000);
    }

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers per stage: {}", config.crawler.workers);
    println!("  Max hops: {}", config.crawler.max_hops);
    println!("  Max redirects: {}", config.crawler.max_redirects);
    println!("  Drain timeout: {:?}", config.crawler.drain_timeout());
    match config.crawler.status_interval() {
        Some(interval) => println!("  Status interval: {:?}", interval),
        None => println!("  Status interval: disabled"),
    }
    println!("  Capture outlinks: {}", config.crawler.capture_outlinks);

    println!("\nUser Agent: {}", user_agent(&config.user_agent));

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory);

    println!("\nWatchers:");
    if config.disk_watcher.enabled {
        let threshold = match config.disk_watcher.min_free_space_gb {
            Some(gb) => format!("{} GiB", gb),
            None => "20% of the disk, between 1 and 50 GiB".to_string(),
        };
        println!(
            "  Disk: every {}ms, keeps {} free",
            config.disk_watcher.check_interval, threshold
        );
    } else {
        println!("  Disk: disabled");
    }
    if config.queue_watcher.enabled {
        println!("  Queue depth: every {}ms", config.queue_watcher.check_interval);
    } else {
        println!("  Queue depth: disabled");
    }

    println!("\nExcluded Hosts ({}):", config.crawler.exclude_hosts.len());
    for pattern in &config.crawler.exclude_hosts {
        println!("  - {}", pattern);
    }

    println!("\nSeeds ({}):", config.crawler.seeds.len());
    for seed in &config.crawler.seeds {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start crawling with {} seed URLs",
        config.crawler.seeds.len()
    );

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let seeds = config
        .crawler
        .seeds
        .iter()
        .map(|seed| normalize_str(seed))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!("Total seed URLs: {}", seeds.len());

    let client = build_http_client(&config.user_agent)?;
    let writer = Arc::new(ArchiveWriter::create(&config.output.directory).await?);
    let pause = Arc::new(PauseController::new());
    let reactor = Reactor::new();

    let stages = build_stages(&config, client, Arc::clone(&writer));
    let source = SeedSource::new(reactor.clone(), seeds);
    let exhausted = source.exhausted();
    let outlink_sink = config.crawler.capture_outlinks.then(|| {
        Box::new(OutlinkRecorder::new(writer.directory())) as Box<dyn OutlinkSink>
    });

    let settings = PipelineSettings {
        workers: config.crawler.workers,
        drain_timeout: config.crawler.drain_timeout(),
        status_interval: config.crawler.status_interval(),
    };
    let mut pipeline = Pipeline::start(
        settings,
        reactor,
        Arc::clone(&pause),
        stages,
        Box::new(source),
        outlink_sink,
    )
    .await?;

    for watcher in spawn_watchers(&config, &pause, &writer) {
        pipeline.add_watcher(watcher);
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Interrupted, shutting down"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        },
        _ = exhausted.cancelled() => tracing::info!("Nothing left to crawl, shutting down"),
    }

    let stopped = pipeline.stop().await;
    let written = writer.shutdown().await?;

    match stopped {
        Ok(stats) => {
            print_statistics(&stats);
            println!("Archived records written: {}", written);
            tracing::info!("Crawl completed successfully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
