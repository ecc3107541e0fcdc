use crate::pipeline::{OutlinkSink, SourceError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// Name of the outlink list in the output directory
pub const OUTLINKS_FILE: &str = "outlinks.txt";

const NAME: &str = "outlinks";

/// Appends every distinct outlink to `outlinks.txt`, one URL per line
///
/// The recorder runs until the outlinks channel closes, which happens when
/// the finisher stops.
pub struct OutlinkRecorder {
    path: PathBuf,
    recorded: Arc<AtomicU64>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl OutlinkRecorder {
    pub fn new(directory: &Path) -> Self {
        Self {
            path: directory.join(OUTLINKS_FILE),
            recorded: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Distinct outlinks written so far
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl OutlinkSink for OutlinkRecorder {
    fn name(&self) -> &str {
        NAME
    }

    async fn start(&mut self, mut outlinks: mpsc::Receiver<Url>) -> Result<(), SourceError> {
        if self.task.is_some() {
            return Err(SourceError::AlreadyStarted(NAME.to_string()));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let recorded = Arc::clone(&self.recorded);

        self.task = Some(tokio::spawn(async move {
            let mut out = BufWriter::new(file);
            let mut seen = HashSet::new();

            while let Some(url) = outlinks.recv().await {
                if !seen.insert(url.as_str().to_string()) {
                    continue;
                }
                out.write_all(url.as_str().as_bytes()).await?;
                out.write_all(b"\n").await?;
                recorded.fetch_add(1, Ordering::Relaxed);
            }

            out.flush().await
        }));

        tracing::debug!("Recording outlinks to {}", self.path.display());
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SourceError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| SourceError::NotStarted(NAME.to_string()))?;

        match task.await {
            Ok(result) => result?,
            Err(e) => {
                return Err(SourceError::Failed {
                    name: NAME.to_string(),
                    message: e.to_string(),
                })
            }
        }

        tracing::info!("Recorded {} outlinks", self.recorded());
        Ok(())
    }
}
