//! Hashtag search on a text mirror of the social network.
//!
//! Mirror instances are tried in configured order. A fetch failure moves on to
//! the next instance; the first instance that returns a page is parsed and no
//! further instances are contacted.
//!
//! # Result blocks
//!
//! Each `.timeline-item` yields a post:
//! - body from `.tweet-content` (posts under 5 characters are skipped)
//! - canonical URL from the `.tweet-link`/date link, rewritten to the public site
//! - timestamp from the `title` attribute of `.tweet-date a`
//! - first attached image, resolved against the mirror instance

use crate::error::{ExtractError, FetchError};
use crate::fetcher::Fetch;
use crate::models::RawItem;
use crate::normalize::{extract_hashtags, resolve_url};
use crate::utils::{collapse_whitespace, parse_datetime, truncate_with_ellipsis};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};

pub const PUBLIC_SITE: &str = "https://twitter.com";
pub const PLATFORM: &str = "twitter";

const MIN_BODY_CHARS: usize = 5;
const TITLE_MAX_CHARS: usize = 100;

struct ResultSelectors {
    item: Selector,
    body: Selector,
    author: Selector,
    link: Selector,
    date: Selector,
    image: Selector,
}

static SELECTORS: Lazy<ResultSelectors> = Lazy::new(|| {
    let parse = |css: &str| Selector::parse(css).expect("static mirror selector");
    ResultSelectors {
        item: parse(".timeline-item"),
        body: parse(".tweet-content"),
        author: parse(".username"),
        link: parse("a.tweet-link, .tweet-date a"),
        date: parse(".tweet-date a"),
        image: parse(".attachment.image img, .still-image img, .attachments img"),
    }
});

/// Search URL for `hashtag` (without `#`) on one mirror instance.
pub fn search_url(instance: &str, hashtag: &str) -> String {
    format!(
        "{}/search?f=tweets&q={}",
        instance.trim_end_matches('/'),
        urlencoding::encode(&format!("#{hashtag}"))
    )
}

/// Search each instance in order until one answers, then parse its results.
#[instrument(level = "info", skip(fetcher, instances))]
pub async fn extract(
    fetcher: &dyn Fetch,
    instances: &[String],
    hashtag: &str,
) -> Result<Vec<RawItem>, ExtractError> {
    let mut last_error: Option<FetchError> = None;

    for instance in instances {
        let url = search_url(instance, hashtag);
        match fetcher.fetch(&url).await {
            Ok(html) => {
                let items = parse_results(&html, instance, hashtag);
                info!(%instance, count = items.len(), "Parsed mirror search results");
                return Ok(items);
            }
            Err(e) => {
                warn!(%instance, error = %e, "Mirror instance failed; trying next");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => e.into(),
        None => ExtractError::Unsupported("no mirror instances configured".to_string()),
    })
}

/// Public-site URL for a mirror post link, or `None` if it is not a post link.
///
/// `/user/status/123#m` becomes `https://twitter.com/user/status/123`; the
/// mirror's web-intent form `/i/web/status/123` becomes `/i/status/123`.
pub fn canonical_post_url(href: &str) -> Option<String> {
    let path = match url::Url::parse(href) {
        Ok(absolute) => absolute.path().to_string(),
        Err(_) => href.split(['#', '?']).next().unwrap_or_default().to_string(),
    };
    if !path.contains("/status/") {
        return None;
    }
    let path = path.replacen("/i/web/status/", "/i/status/", 1);
    Some(format!("{PUBLIC_SITE}{path}"))
}

fn parse_results(html: &str, instance: &str, hashtag: &str) -> Vec<RawItem> {
    let document = Html::parse_document(html);
    document
        .select(&SELECTORS.item)
        .filter_map(|block| parse_post(block, instance, hashtag))
        .collect()
}

fn parse_post(block: ElementRef<'_>, instance: &str, hashtag: &str) -> Option<RawItem> {
    let body = block
        .select(&SELECTORS.body)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default();
    if body.chars().count() < MIN_BODY_CHARS {
        debug!(%body, "Skipping post: body too short");
        return None;
    }

    let Some(url) = block
        .select(&SELECTORS.link)
        .filter_map(|a| a.value().attr("href"))
        .find_map(canonical_post_url)
    else {
        debug!("Skipping post: no resolvable status link");
        return None;
    };

    let author = block
        .select(&SELECTORS.author)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|a| !a.is_empty());

    let published_at = block
        .select(&SELECTORS.date)
        .next()
        .and_then(|a| a.value().attr("title"))
        .and_then(parse_datetime);

    let image_url = block
        .select(&SELECTORS.image)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(|src| resolve_url(instance, src));

    let tags = extract_hashtags(&body)
        .into_iter()
        .chain(std::iter::once(hashtag.to_lowercase()))
        .unique()
        .collect();

    Some(RawItem {
        title: truncate_with_ellipsis(&body, TITLE_MAX_CHARS),
        url,
        excerpt: body.clone(),
        content: Some(body),
        author,
        published_at,
        image_url,
        tags,
        platform: Some(PLATFORM.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticFetcher;
    use chrono::Timelike;

    const RESULTS: &str = r##"<html><body><div class="timeline">
      <div class="timeline-item">
        <a class="tweet-link" href="/mauicounty/status/1744#m"></a>
        <div class="tweet-header">
          <a class="username" href="/mauicounty" title="@mauicounty">@mauicounty</a>
          <span class="tweet-date"><a href="/mauicounty/status/1744#m" title="Jan 5, 2024 · 3:45 PM UTC">5h</a></span>
        </div>
        <div class="tweet-content media-body">Water restrictions lifted in Kula #Maui #drought</div>
        <div class="attachments"><div class="attachment image">
          <a class="still-image" href="/pic/orig/a.jpg"><img src="/pic/media%2Fa.jpg?name=small"></a>
        </div></div>
      </div>
      <div class="timeline-item">
        <a class="tweet-link" href="/someone/status/99#m"></a>
        <div class="tweet-content">ok</div>
      </div>
      <div class="timeline-item">
        <div class="tweet-content">A post whose link cannot be resolved</div>
        <a class="tweet-link" href="/someone"></a>
      </div>
      <div class="timeline-item">
        <a class="tweet-link" href="/i/web/status/555"></a>
        <div class="tweet-content">Long post text that keeps going and going well past the one hundred character title limit for the mirror</div>
      </div>
    </div></body></html>"##;

    fn instances() -> Vec<String> {
        vec!["https://m1.test".to_string(), "https://m2.test/".to_string()]
    }

    #[test]
    fn test_search_url_encodes_hashtag() {
        assert_eq!(
            search_url("https://m1.test/", "maui"),
            "https://m1.test/search?f=tweets&q=%23maui"
        );
    }

    #[test]
    fn test_canonical_post_url() {
        assert_eq!(
            canonical_post_url("/user/status/123#m").as_deref(),
            Some("https://twitter.com/user/status/123")
        );
        assert_eq!(
            canonical_post_url("/i/web/status/555").as_deref(),
            Some("https://twitter.com/i/status/555")
        );
        assert_eq!(
            canonical_post_url("https://m1.test/user/status/7?s=20").as_deref(),
            Some("https://twitter.com/user/status/7")
        );
        assert_eq!(canonical_post_url("/user"), None);
    }

    #[test]
    fn test_parse_results() {
        let items = parse_results(RESULTS, "https://m1.test", "maui");
        assert_eq!(items.len(), 2);

        let post = &items[0];
        assert_eq!(post.url, "https://twitter.com/mauicounty/status/1744");
        assert_eq!(post.author.as_deref(), Some("@mauicounty"));
        assert_eq!(post.title, "Water restrictions lifted in Kula #Maui #drought");
        assert_eq!(post.published_at.unwrap().hour(), 15);
        assert_eq!(post.image_url.as_deref(), Some("https://m1.test/pic/media%2Fa.jpg?name=small"));
        assert_eq!(post.platform.as_deref(), Some("twitter"));
        assert_eq!(post.tags, vec!["maui".to_string(), "drought".to_string()]);

        let long = &items[1];
        assert_eq!(long.url, "https://twitter.com/i/status/555");
        assert!(long.title.ends_with("..."));
        assert_eq!(long.title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(long.published_at.is_none());
        assert_eq!(long.tags, vec!["maui".to_string()]);
    }

    #[tokio::test]
    async fn test_fails_over_to_next_instance() {
        let fetcher = StaticFetcher::new().page(&search_url("https://m2.test/", "maui"), RESULTS);
        let items = extract(&fetcher, &instances(), "maui").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            fetcher.requests(),
            vec![
                "https://m1.test/search?f=tweets&q=%23maui".to_string(),
                "https://m2.test/search?f=tweets&q=%23maui".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_at_first_answering_instance() {
        let fetcher = StaticFetcher::new()
            .page(&search_url("https://m1.test", "maui"), "<html></html>")
            .page(&search_url("https://m2.test", "maui"), RESULTS);
        let items = extract(&fetcher, &instances(), "maui").await.unwrap();
        assert!(items.is_empty());
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_all_instances_failing_is_a_fetch_error() {
        let err = extract(&StaticFetcher::new(), &instances(), "maui").await.unwrap_err();
        assert!(matches!(err, ExtractError::Fetch(_)));
    }
}
