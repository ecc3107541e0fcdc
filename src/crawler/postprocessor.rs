use super::parser::parse_html;
use crate::item::{Item, ItemStatus};
use crate::pipeline::StageWorker;
use crate::url::{is_http, normalize_url, same_host};
use async_trait::async_trait;
use std::collections::HashSet;

/// Postprocessor limits
#[derive(Debug, Clone)]
pub struct PostprocessorSettings {
    /// Links are only followed while an item is fewer hops than this from its seed
    pub max_hops: u32,
    pub max_redirects: u32,
    /// Keep links to other hosts as outlinks instead of dropping them
    pub capture_outlinks: bool,
}

/// Third stage: turns an archived page into discovered work
///
/// - A redirect becomes the item's new URL, up to `max_redirects`.
/// - Same-host links on an HTML page become child items.
/// - Links to other hosts become outlinks.
pub struct Postprocessor {
    settings: PostprocessorSettings,
}

impl Postprocessor {
    pub fn new(settings: PostprocessorSettings) -> Self {
        Self { settings }
    }

    fn follow_redirect(&self, item: &mut Item) {
        let Some(target) = item.redirect_target.take() else {
            item.fail("Redirect without a target");
            return;
        };

        if item.redirects >= self.settings.max_redirects {
            item.fail(format!(
                "Too many redirects (max {}), last target {}",
                self.settings.max_redirects, target
            ));
            return;
        }

        item.redirects += 1;
        item.url = target;
        item.status_code = None;
    }

    fn extract_work(&self, item: &mut Item) {
        let Some(body) = item.body.take() else {
            return;
        };

        let page = parse_html(&body, &item.url);
        let mut seen = HashSet::new();
        seen.insert(item.url.as_str().to_string());

        for link in page.links {
            let Ok(link) = normalize_url(&link) else {
                continue;
            };
            if !is_http(&link) || !seen.insert(link.as_str().to_string()) {
                continue;
            }

            if same_host(&item.url, &link) {
                if item.hops < self.settings.max_hops {
                    let child = item.child(link);
                    item.children.push(child);
                }
            } else if self.settings.capture_outlinks {
                item.outlinks.push(link);
            }
        }

        tracing::debug!(
            "{}: {} children, {} outlinks",
            item.url,
            item.children.len(),
            item.outlinks.len()
        );
    }
}

#[async_trait]
impl StageWorker for Postprocessor {
    fn name(&self) -> &'static str {
        "postprocessor"
    }

    async fn process(&self, mut item: Item) -> Item {
        match item.status {
            ItemStatus::Redirected => self.follow_redirect(&mut item),
            ItemStatus::Archived => {
                self.extract_work(&mut item);
                item.status = ItemStatus::Completed;
            }
            _ => {}
        }
        item
    }
}
