use super::fetcher::{fetch_url, FetchResult};
use super::writer::{ArchiveRecord, ArchiveWriter};
use crate::item::{Item, ItemStatus};
use crate::pipeline::StageWorker;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;

/// Second stage: fetches the URL and queues the response for writing
///
/// A redirect is not followed here. The item leaves as `Redirected` with its
/// target so the postprocessor and finisher can loop it back.
pub struct Archiver {
    client: Client,
    writer: Arc<ArchiveWriter>,
}

impl Archiver {
    pub fn new(client: Client, writer: Arc<ArchiveWriter>) -> Self {
        Self { client, writer }
    }
}

#[async_trait]
impl StageWorker for Archiver {
    fn name(&self) -> &'static str {
        "archiver"
    }

    async fn process(&self, mut item: Item) -> Item {
        tracing::debug!("Fetching {}", item.url);

        match fetch_url(&self.client, &item.url).await {
            FetchResult::Success {
                status_code,
                content_type,
                body,
            } => {
                item.status_code = Some(status_code);

                let record = ArchiveRecord {
                    id: item.id,
                    url: item.url.clone(),
                    status_code,
                    content_type: content_type.clone(),
                    body: body.clone(),
                    fetched_at: Utc::now(),
                };
                if let Err(e) = self.writer.submit(record) {
                    item.fail(format!("Archive write failed: {}", e));
                    return item;
                }

                if is_html(&content_type) {
                    item.body = Some(body);
                }
                item.content_type = Some(content_type);
                item.status = ItemStatus::Archived;
            }
            FetchResult::Redirect {
                status_code,
                location,
            } => {
                tracing::debug!("{} redirects to {}", item.url, location);
                item.status_code = Some(status_code);
                item.redirect_target = Some(location);
                item.status = ItemStatus::Redirected;
            }
            FetchResult::HttpError { status_code } => {
                item.status_code = Some(status_code);
                item.fail(format!("HTTP {}", status_code));
            }
            FetchResult::NetworkError { error } => item.fail(error),
        }

        item
    }
}

/// Returns true for HTML content types
pub(crate) fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}
