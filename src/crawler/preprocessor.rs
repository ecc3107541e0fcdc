use crate::item::{Item, ItemStatus};
use crate::pipeline::StageWorker;
use crate::url::{normalize_url, HostFilter};
use async_trait::async_trait;

/// First stage: normalizes the URL and rejects what the crawl must not fetch
pub struct Preprocessor {
    exclude: HostFilter,
}

impl Preprocessor {
    pub fn new(exclude: HostFilter) -> Self {
        Self { exclude }
    }
}

#[async_trait]
impl StageWorker for Preprocessor {
    fn name(&self) -> &'static str {
        "preprocessor"
    }

    async fn process(&self, mut item: Item) -> Item {
        let url = match normalize_url(&item.url) {
            Ok(url) => url,
            Err(e) => {
                item.fail(format!("Rejected URL: {}", e));
                return item;
            }
        };

        if let Some(pattern) = self.exclude.excluded_by(&url) {
            item.fail(format!("Host excluded by '{}'", pattern));
            return item;
        }

        item.url = url;
        item.status = ItemStatus::Preprocessed;
        item
    }
}
