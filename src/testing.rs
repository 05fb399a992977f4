//! Test doubles shared by the extractor, orchestrator and server tests.

use crate::error::{FetchError, FetchErrorKind};
use crate::fetcher::Fetch;
use crate::models::{ContentKind, ExtractorKind, SelectorSet, SourceConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Serves canned documents by exact URL; anything else is a 404.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, (String, Duration)>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), (body.to_string(), Duration::ZERO));
        self
    }

    /// Serve `body` after sleeping `latency`.
    pub fn slow_page(mut self, url: &str, body: &str, latency: Duration) -> Self {
        self.pages.insert(url.to_string(), (body.to_string(), latency));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetch for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.pages.get(url) {
            Some((body, latency)) => {
                if !latency.is_zero() {
                    tokio::time::sleep(*latency).await;
                }
                Ok(body.clone())
            }
            None => Err(FetchError::new(url, FetchErrorKind::Status(404))),
        }
    }
}

pub fn feed_source(name: &str, feed_url: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        url: "https://news.test".to_string(),
        source_type: ContentKind::News,
        extractor: ExtractorKind::Feed,
        enabled: true,
        feed_url: Some(feed_url.to_string()),
        selectors: None,
        hashtag: None,
        fetch_full_content: false,
    }
}

pub fn page_source(name: &str, url: &str, selectors: Option<SelectorSet>) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        url: url.to_string(),
        source_type: ContentKind::News,
        extractor: ExtractorKind::StaticHtml,
        enabled: true,
        feed_url: None,
        selectors,
        hashtag: None,
        fetch_full_content: false,
    }
}

/// An RSS document with one `<item>` per `(title, link)` pair.
pub fn rss(items: &[(&str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(title, link)| {
            format!("<item><title>{title}</title><link>{link}</link><description>{title}</description></item>")
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>{body}</channel></rss>"#)
}
