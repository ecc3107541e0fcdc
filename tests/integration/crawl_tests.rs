//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! pipeline end-to-end: seeds in, archive files and outlinks out.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::config::{
    Config, CrawlerConfig, DiskWatcherConfig, OutputConfig, QueueWatcherConfig, UserAgentConfig,
};
use sumi_harvest::crawler::{
    build_http_client, build_stages, ArchiveWriter, OutlinkRecorder, SeedSource, INDEX_FILE,
    OUTLINKS_FILE,
};
use sumi_harvest::pipeline::{OutlinkSink, PipelineSettings};
use sumi_harvest::stats::CrawlStatistics;
use sumi_harvest::url::normalize_str;
use sumi_harvest::{PauseController, Pipeline, Reactor};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration writing into `output_dir`
fn create_test_config(seeds: Vec<String>, output_dir: &Path) -> Config {
    Config {
        crawler: CrawlerConfig {
            workers: 2,
            max_hops: 2,
            max_redirects: 3,
            drain_timeout: 2000,
            status_interval: 0,
            capture_outlinks: true,
            exclude_hosts: vec!["*.blocked.test".to_string()],
            seeds,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        output: OutputConfig {
            directory: output_dir.display().to_string(),
        },
        disk_watcher: DiskWatcherConfig {
            enabled: false,
            ..Default::default()
        },
        queue_watcher: QueueWatcherConfig::default(),
    }
}

/// Runs a crawl until the seed queue is exhausted and returns its statistics
async fn run_crawl(config: &Config) -> CrawlStatistics {
    let seeds = config
        .crawler
        .seeds
        .iter()
        .map(|s| normalize_str(s).expect("Invalid seed"))
        .collect();

    let client = build_http_client(&config.user_agent).expect("Failed to build client");
    let writer = Arc::new(
        ArchiveWriter::create(&config.output.directory)
            .await
            .expect("Failed to create writer"),
    );
    let reactor = Reactor::new();
    let pause = Arc::new(PauseController::new());

    let source = SeedSource::new(reactor.clone(), seeds);
    let exhausted = source.exhausted();
    let sink: Option<Box<dyn OutlinkSink>> = config
        .crawler
        .capture_outlinks
        .then(|| Box::new(OutlinkRecorder::new(writer.directory())) as Box<dyn OutlinkSink>);

    let pipeline = Pipeline::start(
        PipelineSettings {
            workers: config.crawler.workers,
            drain_timeout: config.crawler.drain_timeout(),
            status_interval: None,
        },
        reactor,
        pause,
        build_stages(config, client, Arc::clone(&writer)),
        Box::new(source),
        sink,
    )
    .await
    .expect("Pipeline failed to start");

    tokio::time::timeout(Duration::from_secs(10), exhausted.cancelled())
        .await
        .expect("Crawl did not finish in time");

    let stats = pipeline.stop().await.expect("Pipeline failed to stop");
    writer.shutdown().await.expect("Writer failed to flush");
    stats
}

/// Reads `index.tsv` and returns the archived URLs
fn archived_urls(dir: &Path) -> Vec<String> {
    let index = std::fs::read_to_string(dir.join(INDEX_FILE)).expect("Missing index");
    let mut urls: Vec<String> = index
        .lines()
        .map(|line| line.split('\t').nth(5).expect("Short index line").to_string())
        .collect();
    urls.sort();
    urls
}

/// HTML response; `set_body_string` would override the content type with `text/plain`
fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

#[tokio::test]
async fn test_full_crawl_single_host() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<html><body>
            <a href="{base}/page1">Page 1</a>
            <a href="/page2">Page 2</a>
            <a href="https://elsewhere.example/about">Elsewhere</a>
            </body></html>"#,
            base = base_url
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html(r#"<a href="/">home</a>"#.to_string()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html("<p>Leaf</p>".to_string()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = create_test_config(vec![format!("{}/", base_url)], dir.path());

    let stats = run_crawl(&config).await;

    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.children, 3);
    assert_eq!(stats.outlinks, 1);
    assert_eq!(stats.in_flight, 0);

    assert_eq!(
        archived_urls(dir.path()),
        vec![
            format!("{}/", base_url),
            format!("{}/page1", base_url),
            format!("{}/page2", base_url),
        ]
    );

    let outlinks = std::fs::read_to_string(dir.path().join(OUTLINKS_FILE)).unwrap();
    assert_eq!(outlinks, "https://elsewhere.example/about\n");
}

#[tokio::test]
async fn test_crawl_with_hop_limit() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/one">one</a>"#.to_string()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/one"))
        .respond_with(html(r#"<a href="/two">two</a>"#.to_string()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/two"))
        .respond_with(html(r#"<a href="/three">three</a>"#.to_string()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/three"))
        .respond_with(html("<p>too deep</p>".to_string()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(vec![format!("{}/", base_url)], dir.path());

    let stats = run_crawl(&config).await;

    // Seed at hop 0, /one at hop 1, /two at hop 2 where link following stops.
    assert_eq!(stats.completed, 3);
    assert_eq!(archived_urls(dir.path()).len(), 3);
}

#[tokio::test]
async fn test_redirect_is_fed_back_and_archived() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html("<p>moved here</p>".to_string()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(vec![format!("{}/old", base_url)], dir.path());

    let stats = run_crawl(&config).await;

    assert_eq!(stats.fed_back, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(archived_urls(dir.path()), vec![format!("{}/new", base_url)]);
}

#[tokio::test]
async fn test_redirect_loop_fails_item() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(vec![format!("{}/loop", base_url)], dir.path());

    let stats = run_crawl(&config).await;

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.fed_back, 3);
    assert!(archived_urls(dir.path()).is_empty());
}

#[tokio::test]
async fn test_excluded_and_broken_seeds_fail() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"href": "/not-a-link"}"#, "application/json"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(
        vec![
            "https://ads.blocked.test/".to_string(),
            format!("{}/missing", base_url),
            format!("{}/data.json", base_url),
        ],
        dir.path(),
    );

    let stats = run_crawl(&config).await;

    assert_eq!(stats.failed, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.children, 0);
    assert_eq!(archived_urls(dir.path()), vec![format!("{}/data.json", base_url)]);
}
