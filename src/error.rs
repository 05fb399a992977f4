//! Error taxonomy for the scrape core.
//!
//! Errors are scoped to the narrowest unit that can absorb them:
//!
//! | Error | Scope | Handling |
//! |-------|-------|----------|
//! | [`FetchError`] | source (or single companion fetch) | logged, counted against the source |
//! | [`ExtractError::Parse`] | feed/page | the source fails; per-item parse problems are skipped before they get here |
//! | [`StoreError`] | item or run | item writes are skipped, listing failures end the run |
//! | [`RunError::Busy`] | caller | returned synchronously, caller retries later |

use thiserror::Error;

/// Why a single HTTP GET did not yield a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// The server answered with a non-2xx status.
    Status(u16),
    /// Connection, TLS or body-read failure.
    Network(String),
    /// The HTTP client itself could not be built.
    Client(String),
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchErrorKind::Timeout => write!(f, "request timed out"),
            FetchErrorKind::Status(code) => write!(f, "HTTP status {code}"),
            FetchErrorKind::Network(msg) => write!(f, "network error: {msg}"),
            FetchErrorKind::Client(msg) => write!(f, "client error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("failed to fetch {url}: {kind}")]
pub struct FetchError {
    pub url: String,
    pub kind: FetchErrorKind,
}

impl FetchError {
    pub fn new(url: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FetchErrorKind::Timeout
        } else if let Some(status) = err.status() {
            FetchErrorKind::Status(status.as_u16())
        } else {
            FetchErrorKind::Network(err.to_string())
        };
        Self::new(url, kind)
    }
}

/// Failure of a whole extraction pass for one source.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid selector {0}")]
    Selector(String),

    #[error("unsupported source: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store task failed: {0}")]
    Task(String),
}

/// Errors that escape a run instead of being recorded inside it.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("scrape already in progress")]
    Busy,

    #[error("source {0} is not registered")]
    UnknownSource(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("scrape task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Problems building the calendar scheduler.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("utc offset of {0} hours is out of range")]
    InvalidOffset(i32),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_message_names_url_and_cause() {
        let err = FetchError::new("https://example.com/feed", FetchErrorKind::Status(503));
        assert_eq!(
            err.to_string(),
            "failed to fetch https://example.com/feed: HTTP status 503"
        );
    }

    #[test]
    fn test_extract_error_is_transparent_over_fetch() {
        let err: ExtractError = FetchError::new("https://x.test", FetchErrorKind::Timeout).into();
        assert_eq!(err.to_string(), "failed to fetch https://x.test: request timed out");
    }

    #[test]
    fn test_busy_message() {
        assert_eq!(RunError::Busy.to_string(), "scrape already in progress");
    }
}
