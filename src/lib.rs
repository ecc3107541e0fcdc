//! Sumi-Harvest: a continuously-running web-archiving crawler
//!
//! This crate pulls URLs from a queue, fetches and archives their content,
//! discovers new URLs and feeds them back until the source is exhausted or the
//! operator stops it. The interesting part is the flow-control core:
//!
//! - [`reactor`]: global admission control and tracking of every in-flight item
//! - [`pause`]: broadcast pause/resume coordination for all pipeline workers
//! - [`watchers`]: resource watchers that pause the crawl under pressure
//! - [`pipeline`]: the stage topology with its startup and shutdown ordering
//!
//! The [`crawler`] module provides the concrete stage workers and sources used
//! by the `sumi-harvest` binary.

pub mod config;
pub mod crawler;
pub mod item;
pub mod pause;
pub mod pipeline;
pub mod reactor;
pub mod stats;
pub mod url;
pub mod watchers;

use thiserror::Error;

/// Main error type for Sumi-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Reactor error: {0}")]
    Reactor(#[from] reactor::ReactorError),

    #[error("Source error: {0}")]
    Source(#[from] pipeline::SourceError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker in stage '{stage}' panicked")]
    WorkerPanicked { stage: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use item::{Item, ItemId, ItemSource, ItemStatus};
pub use pause::{PauseController, Subscription};
pub use pipeline::Pipeline;
pub use reactor::{Reactor, ReactorError};
