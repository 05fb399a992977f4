//! Data models for sources, articles, tags and scrape runs.
//!
//! This module defines the core data structures used throughout the application:
//! - [`SourceConfig`] / [`Source`]: a registry entry as configured and as stored
//! - [`RawItem`]: what an extractor pulls out of a fetched document
//! - [`NewArticle`] / [`StoredArticle`] / [`ArticleView`]: the canonical article
//!   before persistence, as persisted, and as exposed to read consumers
//! - [`ScrapeRun`], [`RunResult`], [`SourceRunDetail`]: run ledger and run result
//!
//! JSON field names follow the read API (`content_type`, `image_url`, `published_at`)
//! and the run result shape (`duration_ms`, `timedOut`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What kind of content a source publishes. Copied onto every article it yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    News,
    Social,
    Media,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::News => "news",
            ContentKind::Social => "social",
            ContentKind::Media => "media",
        }
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "news" => Ok(ContentKind::News),
            "social" => Ok(ContentKind::Social),
            "media" => Ok(ContentKind::Media),
            other => Err(format!("unknown content kind {other:?}")),
        }
    }
}

/// Which extractor a source is scraped with.
///
/// `Browser` is headless-browser scraping, which is not implemented; it and any
/// unrecognized string resolve to an unsupported extractor rather than a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorKind {
    #[serde(alias = "rss")]
    Feed,
    StaticHtml,
    #[serde(alias = "nitter")]
    MirrorSearch,
    Browser,
    #[serde(other)]
    Unknown,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorKind::Feed => "feed",
            ExtractorKind::StaticHtml => "static-html",
            ExtractorKind::MirrorSearch => "mirror-search",
            ExtractorKind::Browser => "browser",
            ExtractorKind::Unknown => "unknown",
        }
    }
}

impl FromStr for ExtractorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "feed" | "rss" => ExtractorKind::Feed,
            "static-html" => ExtractorKind::StaticHtml,
            "mirror-search" | "nitter" => ExtractorKind::MirrorSearch,
            "browser" => ExtractorKind::Browser,
            _ => ExtractorKind::Unknown,
        })
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CSS selectors for the structured-page extractor. Unset fields use the defaults
/// in [`crate::scrapers::page`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SelectorSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// A registry entry as written in `config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    /// Origin URL; also the base for resolving relative links and images.
    pub url: String,
    #[serde(default)]
    pub source_type: ContentKind,
    pub extractor: ExtractorKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub selectors: Option<SelectorSet>,
    #[serde(default)]
    pub hashtag: Option<String>,
    #[serde(default)]
    pub fetch_full_content: bool,
}

/// A registered source with its run bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub source_type: ContentKind,
    pub extractor: ExtractorKind,
    pub enabled: bool,
    pub feed_url: Option<String>,
    pub selectors: Option<SelectorSet>,
    pub hashtag: Option<String>,
    pub fetch_full_content: bool,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub last_succeeded_at: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub error_count: i64,
    pub last_error: Option<String>,
}

/// Which source timestamp to stamp after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTimestamp {
    Attempted,
    /// Also bumps the success count and clears the last error.
    Succeeded,
}

/// One item as an extractor found it, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: String,
    /// Canonical link; the dedup key.
    pub url: String,
    pub excerpt: String,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    /// Tags the extractor already knows (e.g. the searched hashtag).
    pub tags: Vec<String>,
    pub platform: Option<String>,
}

/// Fixed category set. First matching keyword rule wins; `Local` is the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Weather,
    Politics,
    Sports,
    Education,
    Tourism,
    Development,
    #[default]
    Local,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Weather => "weather",
            Category::Politics => "politics",
            Category::Sports => "sports",
            Category::Education => "education",
            Category::Tourism => "tourism",
            Category::Development => "development",
            Category::Local => "local",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weather" => Ok(Category::Weather),
            "politics" => Ok(Category::Politics),
            "sports" => Ok(Category::Sports),
            "education" => Ok(Category::Education),
            "tourism" => Ok(Category::Tourism),
            "development" => Ok(Category::Development),
            "local" => Ok(Category::Local),
            other => Err(format!("unknown category {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Hashtag,
    Category,
    General,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Hashtag => "hashtag",
            TagKind::Category => "category",
            TagKind::General => "general",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub name: String,
    pub kind: TagKind,
}

impl Tag {
    pub fn hashtag(name: &str) -> Self {
        Self {
            name: name.trim_start_matches('#').to_lowercase(),
            kind: TagKind::Hashtag,
        }
    }

    pub fn general(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TagKind::General,
        }
    }
}

/// A normalized article ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub source_id: i64,
    pub title: String,
    pub excerpt: String,
    pub content: Option<String>,
    pub url: String,
    pub author: Option<String>,
    pub category: Category,
    pub content_type: ContentKind,
    pub platform: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub tags: Vec<Tag>,
}

/// An article row as persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredArticle {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub excerpt: String,
    pub content: Option<String>,
    pub url: String,
    pub author: Option<String>,
    pub category: Category,
    pub content_type: ContentKind,
    pub platform: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The article shape exposed to read consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleView {
    pub id: i64,
    pub title: String,
    pub excerpt: String,
    pub content: Option<String>,
    pub url: String,
    pub author: Option<String>,
    pub category: Category,
    pub content_type: ContentKind,
    pub platform: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// Filters for the read API. All set fields must match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleFilter {
    pub category: Option<Category>,
    pub tag: Option<String>,
    pub source: Option<String>,
    pub content_type: Option<ContentKind>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRunStatus {
    Success,
    Failed,
}

impl SourceRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceRunStatus::Success => "success",
            SourceRunStatus::Failed => "failed",
        }
    }
}

/// Outcome of one source attempt inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRunDetail {
    pub source: String,
    pub status: SourceRunStatus,
    /// Net-new articles stored from this source.
    pub articles: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a run returns to its caller (CLI, HTTP layer, scheduler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub articles: usize,
    pub duration_ms: u64,
    pub details: Vec<SourceRunDetail>,
    #[serde(rename = "timedOut", default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

/// Run ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeRun {
    pub id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub articles: usize,
    pub timed_out: bool,
    pub details: Vec<SourceRunDetail>,
}

impl ScrapeRun {
    pub fn start(id: String, total: usize) -> Self {
        Self {
            id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            total,
            successful: 0,
            failed: 0,
            articles: 0,
            timed_out: false,
            details: Vec::new(),
        }
    }

    /// Fold one finished source into the counters.
    pub fn record(&mut self, detail: SourceRunDetail) {
        match detail.status {
            SourceRunStatus::Success => self.successful += 1,
            SourceRunStatus::Failed => self.failed += 1,
        }
        self.articles += detail.articles;
        self.details.push(detail);
    }

    pub fn finish(&mut self, status: RunStatus, timed_out: bool) {
        self.status = status;
        self.timed_out = timed_out;
        self.completed_at = Some(Utc::now());
    }

    pub fn to_result(&self, duration_ms: u64) -> RunResult {
        RunResult {
            run_id: self.id.clone(),
            total: self.total,
            successful: self.successful,
            failed: self.failed,
            articles: self.articles,
            duration_ms,
            details: self.details.clone(),
            timed_out: self.timed_out,
        }
    }
}

/// Persisted audit row, one per source attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLogEntry {
    pub run_id: String,
    pub source_id: i64,
    pub detail: SourceRunDetail,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(status: SourceRunStatus, articles: usize) -> SourceRunDetail {
        SourceRunDetail {
            source: "Star-Advertiser".to_string(),
            status,
            articles,
            duration_ms: 12,
            error: None,
        }
    }

    #[test]
    fn test_source_config_from_yaml_uses_defaults() {
        let yaml = r#"
name: Civil Beat
url: https://www.civilbeat.org
extractor: rss
feed_url: https://www.civilbeat.org/feed/
"#;
        let cfg: SourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.extractor, ExtractorKind::Feed);
        assert_eq!(cfg.source_type, ContentKind::News);
        assert!(cfg.enabled);
        assert!(!cfg.fetch_full_content);
        assert!(cfg.selectors.is_none());
    }

    #[test]
    fn test_unknown_extractor_kind_is_preserved_as_unknown() {
        let yaml = "name: x\nurl: https://x.test\nextractor: carrier-pigeon\n";
        let cfg: SourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.extractor, ExtractorKind::Unknown);
        assert_eq!("nitter".parse::<ExtractorKind>().unwrap(), ExtractorKind::MirrorSearch);
    }

    #[test]
    fn test_hashtag_tag_is_normalized() {
        let tag = Tag::hashtag("#MauiStrong");
        assert_eq!(tag.name, "mauistrong");
        assert_eq!(tag.kind, TagKind::Hashtag);
    }

    #[test]
    fn test_run_result_serialization_shape() {
        let mut run = ScrapeRun::start("run-1".to_string(), 2);
        run.record(detail(SourceRunStatus::Success, 3));
        run.record(SourceRunDetail {
            error: Some("HTTP status 500".to_string()),
            ..detail(SourceRunStatus::Failed, 0)
        });
        run.finish(RunStatus::Completed, false);

        let json = serde_json::to_value(run.to_result(40)).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["successful"], 1);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["articles"], 3);
        assert_eq!(json["duration_ms"], 40);
        assert_eq!(json["details"][0]["status"], "success");
        assert!(json["details"][0].get("error").is_none());
        assert_eq!(json["details"][1]["error"], "HTTP status 500");
        assert!(json.get("timedOut").is_none());
    }

    #[test]
    fn test_timed_out_flag_is_serialized_when_set() {
        let mut run = ScrapeRun::start("run-2".to_string(), 3);
        run.finish(RunStatus::Completed, true);
        let json = serde_json::to_value(run.to_result(5)).unwrap();
        assert_eq!(json["timedOut"], true);
    }

    #[test]
    fn test_category_round_trips_through_str() {
        for cat in [Category::Weather, Category::Development, Category::Local] {
            assert_eq!(cat.as_str().parse::<Category>().unwrap(), cat);
        }
    }
}
