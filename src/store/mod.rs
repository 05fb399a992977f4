//! Persistence boundary for sources, articles, tags and the run audit log.
//!
//! The scrape core only talks to [`Store`]. Writes are upserts keyed by natural
//! keys (article URL, tag name, source name), so repeated or overlapping runs
//! converge on the same rows without locking across operations.

pub mod sqlite;

use crate::error::StoreError;
use crate::models::{
    ArticleFilter, ArticleView, NewArticle, RunLogEntry, ScrapeRun, Source, SourceConfig,
    SourceTimestamp, StoredArticle, Tag,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_article_by_url(&self, url: &str) -> Result<Option<StoredArticle>, StoreError>;

    /// Insert, or on an existing URL refresh title, excerpt, content and the
    /// updated timestamp while keeping the creation timestamp.
    async fn upsert_article(&self, article: &NewArticle) -> Result<StoredArticle, StoreError>;

    /// Associate tags with an article, creating tags on first use. Usage counters
    /// only move for associations that did not exist yet.
    async fn add_tags(&self, article_id: i64, tags: &[Tag]) -> Result<(), StoreError>;

    /// Insert a source by name, or refresh its configuration columns.
    async fn register_source(&self, config: &SourceConfig) -> Result<Source, StoreError>;

    /// All sources in registration order.
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError>;

    async fn list_enabled_sources(&self) -> Result<Vec<Source>, StoreError>;

    async fn get_source(&self, id: i64) -> Result<Option<Source>, StoreError>;

    async fn update_source_timestamp(
        &self,
        id: i64,
        field: SourceTimestamp,
    ) -> Result<(), StoreError>;

    async fn increment_source_error(&self, id: i64, message: &str) -> Result<(), StoreError>;

    async fn append_run_log(&self, entry: &RunLogEntry) -> Result<(), StoreError>;

    /// Insert or update the summary row of a run.
    async fn save_run(&self, run: &ScrapeRun) -> Result<(), StoreError>;

    async fn query_articles(&self, filter: &ArticleFilter) -> Result<Vec<ArticleView>, StoreError>;

    /// Retention sweep: delete articles published before `cutoff`.
    async fn purge_articles_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Reconcile the configured registry into the store by name.
///
/// Sources missing from `configs` are left untouched; the store never deletes a
/// source, it only records `enabled = false` when the file says so.
#[instrument(level = "info", skip_all, fields(configured = configs.len()))]
pub async fn sync_registry(
    store: &dyn Store,
    configs: &[SourceConfig],
) -> Result<Vec<Source>, StoreError> {
    let mut registered = Vec::with_capacity(configs.len());
    for config in configs {
        let source = store.register_source(config).await?;
        debug!(id = source.id, name = %source.name, extractor = %source.extractor, "Registered source");
        registered.push(source);
    }
    info!(count = registered.len(), "Source registry synced");
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::feed_source;

    #[tokio::test]
    async fn test_sync_registry_is_idempotent_and_keeps_unlisted_sources() {
        let store = SqliteStore::in_memory().unwrap();
        let first = sync_registry(
            &store,
            &[
                feed_source("Civil Beat", "https://civilbeat.test/feed"),
                feed_source("Hawaii News Now", "https://hnn.test/rss"),
            ],
        )
        .await
        .unwrap();
        let again = sync_registry(&store, &[feed_source("Civil Beat", "https://civilbeat.test/feed")])
            .await
            .unwrap();

        assert_eq!(again[0].id, first[0].id);
        let names: Vec<_> = store
            .list_sources()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["Civil Beat", "Hawaii News Now"]);
    }
}
