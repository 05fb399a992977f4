//! SQLite-backed [`Store`].
//!
//! One connection behind a mutex. Every operation runs on the blocking pool,
//! takes the lock there and releases it before returning, so runtime workers
//! never wait on SQLite and no lock is held across an `.await`. Tag
//! association for one article runs in a single transaction.

use super::Store;
use crate::error::StoreError;
use crate::models::{
    ArticleFilter, ArticleView, Category, ContentKind, ExtractorKind, NewArticle, RunLogEntry,
    ScrapeRun, Source, SourceConfig, SourceTimestamp, StoredArticle, Tag,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    source_type TEXT NOT NULL DEFAULT 'news',
    extractor TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    feed_url TEXT,
    selectors TEXT,
    hashtag TEXT,
    fetch_full_content INTEGER NOT NULL DEFAULT 0,
    last_attempted_at TEXT,
    last_succeeded_at TEXT,
    success_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    title TEXT NOT NULL,
    excerpt TEXT NOT NULL DEFAULT '',
    content TEXT,
    url TEXT NOT NULL UNIQUE,
    author TEXT,
    category TEXT NOT NULL DEFAULT 'local',
    content_type TEXT NOT NULL DEFAULT 'news',
    platform TEXT,
    image_url TEXT,
    published_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at DESC);
CREATE INDEX IF NOT EXISTS idx_articles_category ON articles(category);
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    tag_type TEXT NOT NULL DEFAULT 'general',
    usage_count INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS article_tags (
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY (article_id, tag_id)
);
CREATE TABLE IF NOT EXISTS scrape_runs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    total INTEGER NOT NULL DEFAULT 0,
    successful INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    articles INTEGER NOT NULL DEFAULT 0,
    timed_out INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS scrape_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    source_name TEXT NOT NULL,
    status TEXT NOT NULL,
    articles INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scrape_logs_run ON scrape_logs(run_id);
";

const SOURCE_COLUMNS: &str = "id, name, url, source_type, extractor, enabled, feed_url, selectors, \
     hashtag, fetch_full_content, last_attempted_at, last_succeeded_at, success_count, \
     error_count, last_error";

const ARTICLE_COLUMNS: &str = "id, source_id, title, excerpt, content, url, author, category, \
     content_type, platform, image_url, published_at, created_at, updated_at";

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        info!(path = %path.display(), "Opened article database");
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn call<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            op(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn source_by(conn: &Connection, clause: &str, key: Value) -> Result<Option<Source>, StoreError> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE {clause}");
        Ok(conn.query_row(&sql, [key], source_from_row).optional()?)
    }

    fn sources_where(conn: &Connection, clause: &str) -> Result<Vec<Source>, StoreError> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE {clause} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let sources = stmt
            .query_map([], source_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sources)
    }

    fn article_by_url(conn: &Connection, url: &str) -> Result<Option<StoredArticle>, StoreError> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1");
        Ok(conn.query_row(&sql, [url], article_from_row).optional()?)
    }
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    let selectors: Option<String> = row.get("selectors")?;
    Ok(Source {
        id: row.get("id")?,
        name: row.get("name")?,
        url: row.get("url")?,
        source_type: row
            .get::<_, String>("source_type")?
            .parse()
            .unwrap_or_default(),
        extractor: row
            .get::<_, String>("extractor")?
            .parse()
            .unwrap_or(ExtractorKind::Unknown),
        enabled: row.get("enabled")?,
        feed_url: row.get("feed_url")?,
        selectors: selectors.and_then(|s| serde_json::from_str(&s).ok()),
        hashtag: row.get("hashtag")?,
        fetch_full_content: row.get("fetch_full_content")?,
        last_attempted_at: row.get("last_attempted_at")?,
        last_succeeded_at: row.get("last_succeeded_at")?,
        success_count: row.get("success_count")?,
        error_count: row.get("error_count")?,
        last_error: row.get("last_error")?,
    })
}

fn article_from_row(row: &Row<'_>) -> rusqlite::Result<StoredArticle> {
    Ok(StoredArticle {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        title: row.get("title")?,
        excerpt: row.get("excerpt")?,
        content: row.get("content")?,
        url: row.get("url")?,
        author: row.get("author")?,
        category: row
            .get::<_, String>("category")?
            .parse::<Category>()
            .unwrap_or_default(),
        content_type: row
            .get::<_, String>("content_type")?
            .parse::<ContentKind>()
            .unwrap_or_default(),
        platform: row.get("platform")?,
        image_url: row.get("image_url")?,
        published_at: row.get("published_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn expect_row(changed: usize, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if changed == 0 {
        Err(StoreError::NotFound(what()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_article_by_url(&self, url: &str) -> Result<Option<StoredArticle>, StoreError> {
        let url = url.to_string();
        self.call(move |conn| Self::article_by_url(conn, &url)).await
    }

    #[instrument(level = "debug", skip_all, fields(url = %article.url))]
    async fn upsert_article(&self, article: &NewArticle) -> Result<StoredArticle, StoreError> {
        let article = article.clone();
        self.call(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO articles (source_id, title, excerpt, content, url, author, category, \
                     content_type, platform, image_url, published_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12) \
                 ON CONFLICT(url) DO UPDATE SET \
                     title = excluded.title, \
                     excerpt = excluded.excerpt, \
                     content = excluded.content, \
                     updated_at = excluded.updated_at",
                params![
                    article.source_id,
                    article.title,
                    article.excerpt,
                    article.content,
                    article.url,
                    article.author,
                    article.category.as_str(),
                    article.content_type.as_str(),
                    article.platform,
                    article.image_url,
                    article.published_at,
                    now,
                ],
            )?;
            Self::article_by_url(conn, &article.url)?
                .ok_or_else(|| StoreError::NotFound(format!("article {}", article.url)))
        })
        .await
    }

    async fn add_tags(&self, article_id: i64, tags: &[Tag]) -> Result<(), StoreError> {
        if tags.is_empty() {
            return Ok(());
        }
        let tags = tags.to_vec();
        let count = tags.len();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            for tag in &tags {
                tx.execute(
                    "INSERT INTO tags (name, tag_type) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
                    params![tag.name, tag.kind.as_str()],
                )?;
                let tag_id: i64 =
                    tx.query_row("SELECT id FROM tags WHERE name = ?1", [&tag.name], |r| r.get(0))?;
                let linked = tx.execute(
                    "INSERT OR IGNORE INTO article_tags (article_id, tag_id) VALUES (?1, ?2)",
                    params![article_id, tag_id],
                )?;
                if linked > 0 {
                    tx.execute(
                        "UPDATE tags SET usage_count = usage_count + 1 WHERE id = ?1",
                        [tag_id],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        debug!(article_id, count, "Tagged article");
        Ok(())
    }

    async fn register_source(&self, config: &SourceConfig) -> Result<Source, StoreError> {
        let selectors = config
            .selectors
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let config = config.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO sources (name, url, source_type, extractor, enabled, feed_url, selectors, \
                     hashtag, fetch_full_content, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(name) DO UPDATE SET \
                     url = excluded.url, \
                     source_type = excluded.source_type, \
                     extractor = excluded.extractor, \
                     enabled = excluded.enabled, \
                     feed_url = excluded.feed_url, \
                     selectors = excluded.selectors, \
                     hashtag = excluded.hashtag, \
                     fetch_full_content = excluded.fetch_full_content",
                params![
                    config.name,
                    config.url,
                    config.source_type.as_str(),
                    config.extractor.as_str(),
                    config.enabled,
                    config.feed_url,
                    selectors,
                    config.hashtag,
                    config.fetch_full_content,
                    Utc::now(),
                ],
            )?;
            Self::source_by(conn, "name = ?1", Value::Text(config.name.clone()))?
                .ok_or_else(|| StoreError::NotFound(format!("source {}", config.name)))
        })
        .await
    }

    async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.call(|conn| Self::sources_where(conn, "1 = 1")).await
    }

    async fn list_enabled_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.call(|conn| Self::sources_where(conn, "enabled = 1")).await
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>, StoreError> {
        self.call(move |conn| Self::source_by(conn, "id = ?1", Value::Integer(id)))
            .await
    }

    async fn update_source_timestamp(
        &self,
        id: i64,
        field: SourceTimestamp,
    ) -> Result<(), StoreError> {
        let sql = match field {
            SourceTimestamp::Attempted => "UPDATE sources SET last_attempted_at = ?1 WHERE id = ?2",
            SourceTimestamp::Succeeded => {
                "UPDATE sources SET last_succeeded_at = ?1, success_count = success_count + 1, \
                 last_error = NULL WHERE id = ?2"
            }
        };
        self.call(move |conn| {
            let changed = conn.execute(sql, params![Utc::now(), id])?;
            expect_row(changed, || format!("source {id}"))
        })
        .await
    }

    async fn increment_source_error(&self, id: i64, message: &str) -> Result<(), StoreError> {
        let message = message.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE sources SET error_count = error_count + 1, last_error = ?1 WHERE id = ?2",
                params![message, id],
            )?;
            expect_row(changed, || format!("source {id}"))
        })
        .await
    }

    async fn append_run_log(&self, entry: &RunLogEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO scrape_logs (run_id, source_id, source_name, status, articles, \
                     duration_ms, error, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.run_id,
                    entry.source_id,
                    entry.detail.source,
                    entry.detail.status.as_str(),
                    entry.detail.articles as i64,
                    entry.detail.duration_ms as i64,
                    entry.detail.error,
                    entry.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_run(&self, run: &ScrapeRun) -> Result<(), StoreError> {
        let run = run.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO scrape_runs (id, status, started_at, completed_at, total, successful, \
                     failed, articles, timed_out) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(id) DO UPDATE SET \
                     status = excluded.status, \
                     completed_at = excluded.completed_at, \
                     total = excluded.total, \
                     successful = excluded.successful, \
                     failed = excluded.failed, \
                     articles = excluded.articles, \
                     timed_out = excluded.timed_out",
                params![
                    run.id,
                    run.status.as_str(),
                    run.started_at,
                    run.completed_at,
                    run.total as i64,
                    run.successful as i64,
                    run.failed as i64,
                    run.articles as i64,
                    run.timed_out,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn query_articles(&self, filter: &ArticleFilter) -> Result<Vec<ArticleView>, StoreError> {
        let mut sql = format!(
            "SELECT {} FROM articles a JOIN sources s ON s.id = a.source_id WHERE 1 = 1",
            ARTICLE_COLUMNS
                .split(", ")
                .map(|c| format!("a.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(category) = filter.category {
            values.push(Value::Text(category.as_str().to_string()));
            sql.push_str(&format!(" AND a.category = ?{}", values.len()));
        }
        if let Some(kind) = filter.content_type {
            values.push(Value::Text(kind.as_str().to_string()));
            sql.push_str(&format!(" AND a.content_type = ?{}", values.len()));
        }
        if let Some(source) = filter.source.as_deref().filter(|s| !s.is_empty()) {
            values.push(Value::Text(source.to_string()));
            sql.push_str(&format!(" AND s.name = ?{}", values.len()));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            values.push(Value::Text(format!("%{}%", search.trim())));
            let n = values.len();
            sql.push_str(&format!(" AND (a.title LIKE ?{n} OR a.excerpt LIKE ?{n})"));
        }
        if let Some(tag) = filter.tag.as_deref().filter(|t| !t.is_empty()) {
            values.push(Value::Text(tag.trim_start_matches('#').to_string()));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM article_tags at JOIN tags t ON t.id = at.tag_id \
                  WHERE at.article_id = a.id AND t.name = ?{} COLLATE NOCASE)",
                values.len()
            ));
        }

        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        values.push(Value::Integer(i64::from(limit)));
        values.push(Value::Integer(i64::from(filter.offset.unwrap_or(0))));
        sql.push_str(&format!(
            " ORDER BY a.published_at DESC, a.id DESC LIMIT ?{} OFFSET ?{}",
            values.len() - 1,
            values.len()
        ));

        self.call(move |conn| {
            let articles = {
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params_from_iter(values.iter()), article_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut tag_stmt = conn.prepare(
                "SELECT t.name FROM tags t JOIN article_tags at ON at.tag_id = t.id \
                 WHERE at.article_id = ?1 ORDER BY t.name",
            )?;
            let mut views = Vec::with_capacity(articles.len());
            for article in articles {
                let tags = tag_stmt
                    .query_map([article.id], |r| r.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                views.push(ArticleView {
                    id: article.id,
                    title: article.title,
                    excerpt: article.excerpt,
                    content: article.content,
                    url: article.url,
                    author: article.author,
                    category: article.category,
                    content_type: article.content_type,
                    platform: article.platform,
                    image_url: article.image_url,
                    published_at: article.published_at,
                    tags,
                });
            }
            Ok(views)
        })
        .await
    }

    #[instrument(level = "info", skip(self))]
    async fn purge_articles_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM article_tags WHERE article_id IN \
                         (SELECT id FROM articles WHERE published_at < ?1)",
                    [cutoff],
                )?;
                let removed = tx.execute("DELETE FROM articles WHERE published_at < ?1", [cutoff])?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        info!(removed, "Purged old articles");
        Ok(removed)
    }
}
