use crate::item::Item;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

/// Errors reported by sources and outlink sinks
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source '{0}' already started")]
    AlreadyStarted(String),

    #[error("source '{0}' not started")]
    NotStarted(String),

    #[error("source '{name}' failed: {message}")]
    Failed { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supplier of fresh items and consumer of finished ones
///
/// A source pushes new work through
/// [`Reactor::receive_insert`](crate::Reactor::receive_insert) and stops
/// offering work as soon as that returns a stop signal.
#[async_trait]
pub trait Source: Send {
    fn name(&self) -> &str;

    /// Starts consuming `finished` items and `produced` children
    async fn start(
        &mut self,
        finished: mpsc::Receiver<Item>,
        produced: mpsc::Receiver<Item>,
    ) -> Result<(), SourceError>;

    async fn stop(&mut self) -> Result<(), SourceError>;
}

/// Consumer of links that leave the crawl scope
#[async_trait]
pub trait OutlinkSink: Send {
    fn name(&self) -> &str;

    async fn start(&mut self, outlinks: mpsc::Receiver<Url>) -> Result<(), SourceError>;

    async fn stop(&mut self) -> Result<(), SourceError>;
}
