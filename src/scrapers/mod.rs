//! Source extractors: turn a fetched document into [`RawItem`]s.
//!
//! Each configured source is scraped by exactly one extractor, chosen from its
//! declared kind when the source is loaded:
//!
//! | Kind | Module | Input | Notes |
//! |------|--------|-------|-------|
//! | `feed` | [`feed`] | RSS 2.0 / Atom document | one item per `<item>`/`<entry>` |
//! | `static-html` | [`page`] | HTML listing page | configurable block selectors |
//! | `mirror-search` | [`mirror`] | mirror search results | hashtag search with instance failover |
//! | `browser`, unknown | none | none | [`Extractor::Unsupported`] |
//!
//! # Common Patterns
//!
//! - All network access goes through [`Fetch`], so every extractor inherits the
//!   politeness delay and the bot identity.
//! - Parsing happens in synchronous functions (`parse_*`) that never hold a
//!   document across an `.await`.
//! - Per-item problems are logged and skipped; only a document-level fetch or
//!   parse failure is returned as an error.

pub mod feed;
pub mod mirror;
pub mod page;

use crate::error::ExtractError;
use crate::fetcher::Fetch;
use crate::models::{ExtractorKind, RawItem, SelectorSet, Source};
use crate::utils::collapse_whitespace;
use scraper::Html;

/// The extractor selected for one source.
#[derive(Debug, Clone, PartialEq)]
pub enum Extractor {
    Feed { feed_url: String },
    StructuredPage { page_url: String, selectors: SelectorSet },
    MirrorSearch { hashtag: String },
    Unsupported(String),
}

impl Extractor {
    pub fn for_source(source: &Source) -> Self {
        match source.extractor {
            ExtractorKind::Feed => Extractor::Feed {
                feed_url: source.feed_url.clone().unwrap_or_else(|| source.url.clone()),
            },
            ExtractorKind::StaticHtml => Extractor::StructuredPage {
                page_url: source.url.clone(),
                selectors: source.selectors.clone().unwrap_or_default(),
            },
            ExtractorKind::MirrorSearch => match source.hashtag.as_deref().map(str::trim) {
                Some(tag) if !tag.trim_start_matches('#').is_empty() => Extractor::MirrorSearch {
                    hashtag: tag.trim_start_matches('#').to_string(),
                },
                _ => Extractor::Unsupported("mirror-search source has no hashtag".to_string()),
            },
            ExtractorKind::Browser => {
                Extractor::Unsupported("headless browser scraping is not implemented".to_string())
            }
            ExtractorKind::Unknown => {
                Extractor::Unsupported("unrecognized extractor kind".to_string())
            }
        }
    }

    /// Run the extractor once.
    ///
    /// # Errors
    ///
    /// [`ExtractError::Unsupported`] for unsupported sources, otherwise whatever
    /// document-level failure the variant hit.
    pub async fn extract(
        &self,
        fetcher: &dyn Fetch,
        mirror_instances: &[String],
    ) -> Result<Vec<RawItem>, ExtractError> {
        match self {
            Extractor::Feed { feed_url } => feed::extract(fetcher, feed_url).await,
            Extractor::StructuredPage {
                page_url,
                selectors,
            } => page::extract(fetcher, page_url, selectors).await,
            Extractor::MirrorSearch { hashtag } => {
                mirror::extract(fetcher, mirror_instances, hashtag).await
            }
            Extractor::Unsupported(reason) => Err(ExtractError::Unsupported(reason.clone())),
        }
    }
}

/// Visible text of an HTML fragment, entities decoded and whitespace collapsed.
pub(crate) fn html_to_text(fragment: &str) -> String {
    if !fragment.contains(['<', '&']) {
        return collapse_whitespace(fragment);
    }
    let parsed = Html::parse_fragment(fragment);
    let text = parsed.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentKind;

    fn source(extractor: ExtractorKind) -> Source {
        Source {
            id: 1,
            name: "s".to_string(),
            url: "https://site.test".to_string(),
            source_type: ContentKind::News,
            extractor,
            enabled: true,
            feed_url: None,
            selectors: None,
            hashtag: None,
            fetch_full_content: false,
            last_attempted_at: None,
            last_succeeded_at: None,
            success_count: 0,
            error_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_feed_falls_back_to_source_url() {
        assert_eq!(
            Extractor::for_source(&source(ExtractorKind::Feed)),
            Extractor::Feed {
                feed_url: "https://site.test".to_string()
            }
        );
    }

    #[test]
    fn test_mirror_requires_hashtag() {
        let mut src = source(ExtractorKind::MirrorSearch);
        assert!(matches!(Extractor::for_source(&src), Extractor::Unsupported(_)));
        src.hashtag = Some("#Maui".to_string());
        assert_eq!(
            Extractor::for_source(&src),
            Extractor::MirrorSearch {
                hashtag: "Maui".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unsupported_kinds_fail_explicitly() {
        let fetcher = crate::testing::StaticFetcher::new();
        for kind in [ExtractorKind::Browser, ExtractorKind::Unknown] {
            let err = Extractor::for_source(&source(kind))
                .extract(&fetcher, &[])
                .await
                .unwrap_err();
            assert!(matches!(err, ExtractError::Unsupported(_)));
        }
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(html_to_text("<p>High <b>surf</b>\n advisory</p>"), "High surf advisory");
        assert_eq!(html_to_text("plain   text"), "plain text");
        assert_eq!(html_to_text("Fish &amp; poi"), "Fish & poi");
    }
}
