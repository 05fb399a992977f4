//! Runtime configuration loaded from `config.yaml`.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//! The source registry lives in the same file under `sources:`.
//!
//! ```yaml
//! database_path: data/news.db
//! fetch:
//!   delay_ms: 2000
//! sources:
//!   - name: Honolulu Civil Beat
//!     url: https://www.civilbeat.org
//!     extractor: feed
//!     feed_url: https://www.civilbeat.org/feed/
//! ```

use crate::error::ConfigError;
use crate::models::SourceConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub fetch: FetchSettings,
    /// Ordered mirror instances; the first reachable one is used.
    pub mirror_instances: Vec<String>,
    /// How many recent runs the in-memory ledger keeps.
    pub ledger_capacity: usize,
    /// Articles older than this many days are removed by `purge`.
    pub retention_days: i64,
    pub server: ServerSettings,
    pub schedule: ScheduleSettings,
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/news.db"),
            fetch: FetchSettings::default(),
            mirror_instances: vec![
                "https://nitter.net".to_string(),
                "https://nitter.privacydev.net".to_string(),
                "https://nitter.poast.org".to_string(),
            ],
            ledger_capacity: 50,
            retention_days: 90,
            server: ServerSettings::default(),
            schedule: ScheduleSettings::default(),
            sources: Vec::new(),
        }
    }
}

/// Polite-scraping parameters applied to every fetch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub user_agent: String,
    pub accept_language: String,
    pub timeout_secs: u64,
    /// Sleep after every successful fetch.
    pub delay_ms: u64,
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: "LocalNewsAggregator/1.0 (+https://github.com/local-news-aggregator; news bot)"
                .to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            timeout_secs: 30,
            delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Calendar cadence for scheduled runs. Cron expressions include seconds and
/// are evaluated at a fixed UTC offset (no daylight saving).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub utc_offset_hours: i32,
    pub business_hours: String,
    pub overnight: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            utc_offset_hours: -10,
            business_hours: "0 */30 6-21 * * *".to_string(),
            overnight: "0 0 22,0,2,4 * * *".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file not found; using defaults with an empty source registry");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&text).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })?;
        info!(sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractorKind;

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.fetch.delay(), Duration::from_millis(2000));
        assert_eq!(config.ledger_capacity, 50);
        assert_eq!(config.mirror_instances.len(), 3);
        assert_eq!(config.schedule.utc_offset_hours, -10);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_partial_yaml_overrides_only_named_fields() {
        let yaml = r#"
database_path: /var/lib/news/news.db
fetch:
  delay_ms: 500
sources:
  - name: Maui Now
    url: https://mauinow.com
    extractor: static-html
    selectors:
      article: ".post"
      title: "h2.entry-title"
  - name: Maui hashtag
    url: https://twitter.com
    source_type: social
    extractor: mirror-search
    hashtag: maui
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/news/news.db"));
        assert_eq!(config.fetch.delay_ms, 500);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].extractor, ExtractorKind::StaticHtml);
        assert_eq!(
            config.sources[0].selectors.as_ref().unwrap().title.as_deref(),
            Some("h2.entry-title")
        );
        assert_eq!(config.sources[1].hashtag.as_deref(), Some("maui"));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = Config::load(Path::new("/nonexistent/config.yaml")).unwrap();
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "fetch: [not, a, map]").unwrap();
        let err = Config::load(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
