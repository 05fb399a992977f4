//! Utility functions for text trimming, date parsing, and file system checks.
//!
//! This module provides helpers shared by the extractors and the normalizer:
//! - Character-safe truncation (titles and excerpts are bounded in characters, not bytes)
//! - Whitespace collapsing for text pulled out of HTML
//! - Tolerant timestamp parsing for the many date formats feeds and pages use
//! - Retention cutoffs
//! - Directory validation for the database location

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Hard-truncate `s` to at most `max` characters.
///
/// No ellipsis is appended; callers that want one add it themselves.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_chars("Hawaiʻi news", 6), "Hawaiʻ");
/// ```
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Truncate to `max` characters, appending `...` when anything was cut.
pub fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", truncate_chars(s, max))
    } else {
        s.to_string()
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and a count of
/// the characters dropped.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let total = s.chars().count();
    if total <= max {
        s.to_string()
    } else {
        format!("{}…(+{} chars)", truncate_chars(s, max), total - max)
    }
}

/// Collapse runs of whitespace (including newlines from HTML layout) to single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a timestamp in any of the formats seen in feeds, pages and mirror results.
///
/// Tried in order: RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`
/// without offset, the mirror's `Mon D, YYYY · H:MM AM UTC` form, long-form dates
/// such as `January 5, 2024`, and a bare `YYYY-MM-DD`. Naive values are taken as UTC.
///
/// # Returns
///
/// `None` when nothing matches; callers fall back to the ingestion time.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 3] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%b %d, %Y · %I:%M %p UTC",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    None
}

/// The instant `days` before `now`, or `None` when it is not representable.
pub fn retention_cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(days).and_then(|window| now.checked_sub_signed(window))
}

/// Ensure the directory that will hold `path` exists and is writable.
///
/// Creates missing parents, then performs a write test by creating and
/// immediately deleting a probe file next to the target.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or is not writable.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_parent_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).await?;

    let probe_path = dir.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!(dir = %dir.display(), "Database directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_truncate_chars_respects_multibyte() {
        assert_eq!(truncate_chars("Hawaiʻi news", 6), "Hawaiʻ");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc...");
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.ends_with("…(+400 chars)"));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  Surf\n\n  warning \t issued "), "Surf warning issued");
    }

    #[test]
    fn test_parse_rfc2822_feed_date() {
        let dt = parse_datetime("Tue, 05 Mar 2024 14:30:00 GMT").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day(), dt.hour()), (2024, 3, 5, 14));
    }

    #[test]
    fn test_parse_rfc3339_with_offset_converts_to_utc() {
        let dt = parse_datetime("2024-03-05T04:30:00-10:00").unwrap();
        assert_eq!((dt.day(), dt.hour()), (5, 14));
    }

    #[test]
    fn test_parse_mirror_title_format() {
        let dt = parse_datetime("Jan 5, 2024 · 3:45 PM UTC").unwrap();
        assert_eq!((dt.month(), dt.day(), dt.hour(), dt.minute()), (1, 5, 15, 45));
    }

    #[test]
    fn test_parse_bare_and_long_dates() {
        assert_eq!(parse_datetime("2024-07-04").unwrap().day(), 4);
        assert_eq!(parse_datetime("January 15, 2024").unwrap().month(), 1);
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_datetime("yesterday-ish").is_none());
        assert!(parse_datetime("   ").is_none());
    }

    #[test]
    fn test_retention_cutoff() {
        let now = parse_datetime("2024-07-04").unwrap();
        assert_eq!(retention_cutoff(now, 3), parse_datetime("2024-07-01"));
        assert!(retention_cutoff(now, i64::MAX).is_none());
        assert!(retention_cutoff(now, i64::MAX / 86_400).is_none());
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_creates_missing_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("nested/dir/news.db");
        ensure_parent_dir(&db).await.unwrap();
        assert!(tmp.path().join("nested/dir").is_dir());
    }
}
