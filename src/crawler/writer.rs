//! Archive writer
//!
//! Fetched bodies are written by a single background task so the archiver
//! never waits on the disk. The number of records still waiting to be
//! written is the queue depth the queue-depth watcher watches.

use crate::item::ItemId;
use crate::watchers::QueueDepthProvider;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// Name of the index file in the output directory
pub const INDEX_FILE: &str = "index.tsv";

/// One fetched response waiting to be written
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub id: ItemId,
    pub url: Url,
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// Background writer for archive records
///
/// Each record becomes `<id>.body` in the output directory plus one line in
/// `index.tsv`: fetch time, id, status, content type, SHA-256 of the body
/// and URL, tab-separated.
pub struct ArchiveWriter {
    directory: PathBuf,
    sender: Mutex<Option<mpsc::UnboundedSender<ArchiveRecord>>>,
    pending: Arc<AtomicUsize>,
    task: tokio::sync::Mutex<Option<JoinHandle<io::Result<u64>>>>,
}

impl ArchiveWriter {
    /// Creates the output directory and starts the writer task
    pub async fn create(directory: impl Into<PathBuf>) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;

        let index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(directory.join(INDEX_FILE))
            .await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(run(
            directory.clone(),
            receiver,
            Arc::clone(&pending),
            index,
        ));

        tracing::debug!("Archive writer started in {}", directory.display());
        Ok(Self {
            directory,
            sender: Mutex::new(Some(sender)),
            pending,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Queues a record for writing
    ///
    /// Fails once the writer has been shut down.
    pub fn submit(&self, record: ArchiveRecord) -> io::Result<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = sender
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "archive writer is shut down"))?;

        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(record).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            io::Error::new(io::ErrorKind::BrokenPipe, "archive writer task has exited")
        })
    }

    /// Records queued but not yet written
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Writes every queued record and stops the writer task
    ///
    /// Returns how many records were written. Later calls return 0.
    pub async fn shutdown(&self) -> io::Result<u64> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let task = self.task.lock().await.take();
        match task {
            Some(task) => {
                let written = task.await.map_err(io::Error::other)??;
                tracing::info!("Archive writer flushed {} records", written);
                Ok(written)
            }
            None => Ok(0),
        }
    }
}

impl QueueDepthProvider for ArchiveWriter {
    fn queue_depth(&self) -> usize {
        self.pending()
    }
}

async fn run(
    directory: PathBuf,
    mut receiver: mpsc::UnboundedReceiver<ArchiveRecord>,
    pending: Arc<AtomicUsize>,
    index: File,
) -> io::Result<u64> {
    let mut index = BufWriter::new(index);
    let mut written = 0;

    while let Some(record) = receiver.recv().await {
        let result = write_record(&directory, &mut index, &record).await;
        pending.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => written += 1,
            Err(e) => tracing::error!("Failed to archive {}: {}", record.url, e),
        }
    }

    index.flush().await?;
    Ok(written)
}

async fn write_record(
    directory: &Path,
    index: &mut BufWriter<File>,
    record: &ArchiveRecord,
) -> io::Result<()> {
    let body_path = directory.join(format!("{}.body", record.id));
    fs::write(&body_path, record.body.as_bytes()).await?;

    let digest = hex::encode(Sha256::digest(record.body.as_bytes()));
    let line = format!(
        "{}\t{}\t{}\t{}\t{}\t{}\n",
        record.fetched_at.to_rfc3339(),
        record.id,
        record.status_code,
        sanitize(&record.content_type),
        digest,
        record.url
    );
    index.write_all(line.as_bytes()).await?;
    index.flush().await
}

/// Keeps a header value on one TSV field
fn sanitize(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
