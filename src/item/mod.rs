//! Crawl items flowing through the pipeline
//!
//! An [`Item`] is a node in a seed's discovery tree. The reactor only looks at
//! its [`ItemId`] and [`ItemSource`]; the remaining fields belong to the stage
//! workers.

mod status;

pub use status::ItemStatus;

use std::fmt;
use url::Url;
use uuid::Uuid;

/// Unique identifier of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generates a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an item entered the reactor from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemSource {
    /// Local queue
    Queue,
    /// Remote queue service
    Hq,
    /// Direct insertion
    Insert,
    /// Re-injected by the finisher
    Feedback,
}

impl ItemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Hq => "hq",
            Self::Insert => "insert",
            Self::Feedback => "feedback",
        }
    }
}

impl fmt::Display for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of crawl work
#[derive(Debug, Clone)]
pub struct Item {
    /// Unique identifier
    pub id: ItemId,

    /// URL to archive
    pub url: Url,

    /// Current status
    pub status: ItemStatus,

    /// Where the item entered the reactor from
    pub source: ItemSource,

    /// Parent item in the discovery tree
    pub parent: Option<ItemId>,

    /// Number of link hops from the seed
    pub hops: u32,

    /// Number of redirects followed so far
    pub redirects: u32,

    /// Items discovered on this page that stay in scope
    pub children: Vec<Item>,

    /// Links discovered on this page that leave the crawl scope
    pub outlinks: Vec<Url>,

    /// Redirect target, set when status is `Redirected`
    pub redirect_target: Option<Url>,

    /// HTTP status code of the last fetch
    pub status_code: Option<u16>,

    /// Content-Type header of the last fetch
    pub content_type: Option<String>,

    /// Fetched body, kept only between archiver and postprocessor
    pub body: Option<String>,

    /// Error description when status is `Failed`
    pub error: Option<String>,
}

impl Item {
    /// Creates a fresh seed item
    pub fn new(url: Url) -> Self {
        Self {
            id: ItemId::new(),
            url,
            status: ItemStatus::Fresh,
            source: ItemSource::Insert,
            parent: None,
            hops: 0,
            redirects: 0,
            children: Vec::new(),
            outlinks: Vec::new(),
            redirect_target: None,
            status_code: None,
            content_type: None,
            body: None,
            error: None,
        }
    }

    /// Creates a child item discovered on this page, one hop further
    pub fn child(&self, url: Url) -> Self {
        let mut child = Self::new(url);
        child.parent = Some(self.id);
        child.hops = self.hops + 1;
        child.source = self.source;
        child
    }

    /// Sets the source tag
    pub fn with_source(mut self, source: ItemSource) -> Self {
        self.source = source;
        self
    }

    /// Marks the item as failed with the given message
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ItemStatus::Failed;
        self.error = Some(error.into());
        self.body = None;
    }

    /// Returns true if the item failed
    pub fn is_failed(&self) -> bool {
        self.status.is_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_new_item_defaults() {
        let item = Item::new(url("https://example.com/"));
        assert_eq!(item.status, ItemStatus::Fresh);
        assert_eq!(item.source, ItemSource::Insert);
        assert_eq!(item.hops, 0);
        assert!(item.parent.is_none());
    }

    #[test]
    fn test_child_links_to_parent() {
        let parent = Item::new(url("https://example.com/")).with_source(ItemSource::Queue);
        let child = parent.child(url("https://example.com/a"));

        assert_eq!(child.parent, Some(parent.id));
        assert_eq!(child.hops, 1);
        assert_eq!(child.source, ItemSource::Queue);
        assert_ne!(child.id, parent.id);
    }

    #[test]
    fn test_fail_drops_body() {
        let mut item = Item::new(url("https://example.com/"));
        item.body = Some("<html></html>".to_string());
        item.fail("boom");

        assert!(item.is_failed());
        assert_eq!(item.error.as_deref(), Some("boom"));
        assert!(item.body.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ItemId::new(), ItemId::new());
    }
}
