//! Structured-page extractor for static HTML listing pages.
//!
//! Article blocks are located with the source's [`SelectorSet`], falling back to
//! the defaults below for any selector the source leaves unset. Each block is
//! resolved independently; a block without a usable title (at least
//! [`MIN_TITLE_CHARS`] characters) or without a link is skipped.
//!
//! [`fetch_article_content`] is the companion operation that fetches one
//! article's own page and pulls its body text out of the first matching
//! content container.

use super::html_to_text;
use crate::error::{ExtractError, FetchError};
use crate::fetcher::Fetch;
use crate::models::{RawItem, SelectorSet};
use crate::normalize::resolve_url;
use crate::utils::{collapse_whitespace, parse_datetime};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};

pub const DEFAULT_ARTICLE_SELECTOR: &str =
    "article, .post, .news-item, .article, .entry, .story, .views-row";
pub const DEFAULT_TITLE_SELECTOR: &str = "h1, h2, h3, .title, .headline, .entry-title";
pub const DEFAULT_LINK_SELECTOR: &str = "a[href]";
pub const DEFAULT_EXCERPT_SELECTOR: &str = ".excerpt, .summary, .entry-summary, .teaser, p";
pub const DEFAULT_DATE_SELECTOR: &str = "time, .date, .published, .entry-date, .post-date";
pub const DEFAULT_AUTHOR_SELECTOR: &str = ".author, .byline, [rel=author]";
pub const DEFAULT_IMAGE_SELECTOR: &str = "img";

/// Blocks whose title is shorter than this are navigation or teaser noise.
pub const MIN_TITLE_CHARS: usize = 10;

/// Candidate body containers on an article page, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    ".article-content",
    ".entry-content",
    ".post-content",
    ".article-body",
    ".story-body",
    "[itemprop=articleBody]",
    "article",
    "main",
];

static CONTENT_CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    CONTENT_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("static content selector"))
        .collect()
});

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static anchor selector"));

/// Compiled selectors for one source.
struct BlockSelectors {
    article: Selector,
    title: Selector,
    link: Selector,
    custom_link: bool,
    excerpt: Selector,
    date: Selector,
    author: Selector,
    image: Selector,
}

impl BlockSelectors {
    fn compile(set: &SelectorSet) -> Result<Self, ExtractError> {
        fn pick(configured: &Option<String>, default: &str) -> Result<Selector, ExtractError> {
            let css = configured.as_deref().unwrap_or(default);
            Selector::parse(css).map_err(|e| ExtractError::Selector(format!("{css:?}: {e:?}")))
        }

        Ok(Self {
            article: pick(&set.article, DEFAULT_ARTICLE_SELECTOR)?,
            title: pick(&set.title, DEFAULT_TITLE_SELECTOR)?,
            link: pick(&set.link, DEFAULT_LINK_SELECTOR)?,
            custom_link: set.link.is_some(),
            excerpt: pick(&set.excerpt, DEFAULT_EXCERPT_SELECTOR)?,
            date: pick(&set.date, DEFAULT_DATE_SELECTOR)?,
            author: pick(&set.author, DEFAULT_AUTHOR_SELECTOR)?,
            image: pick(&set.image, DEFAULT_IMAGE_SELECTOR)?,
        })
    }
}

/// Fetch the listing page and return one raw item per usable article block.
#[instrument(level = "info", skip(fetcher, selectors))]
pub async fn extract(
    fetcher: &dyn Fetch,
    page_url: &str,
    selectors: &SelectorSet,
) -> Result<Vec<RawItem>, ExtractError> {
    let compiled = BlockSelectors::compile(selectors)?;
    let html = fetcher.fetch(page_url).await?;
    let items = parse_page(&html, page_url, &compiled);
    info!(count = items.len(), "Parsed article blocks");
    Ok(items)
}

fn parse_page(html: &str, base_url: &str, selectors: &BlockSelectors) -> Vec<RawItem> {
    let document = Html::parse_document(html);
    let mut blocks = 0usize;
    let items: Vec<RawItem> = document
        .select(&selectors.article)
        .inspect(|_| blocks += 1)
        .filter_map(|block| parse_block(block, base_url, selectors))
        .collect();
    debug!(blocks, kept = items.len(), "Resolved article blocks");
    items
}

fn parse_block(block: ElementRef<'_>, base_url: &str, selectors: &BlockSelectors) -> Option<RawItem> {
    let title_el = block.select(&selectors.title).next();
    let title = title_el.map(element_text).unwrap_or_default();
    if title.chars().count() < MIN_TITLE_CHARS {
        debug!(%title, "Skipping block: title missing or too short");
        return None;
    }

    let title_anchor = title_el.and_then(|el| {
        if el.value().name() == "a" {
            el.value().attr("href")
        } else {
            el.select(&ANCHOR).next().and_then(|a| a.value().attr("href"))
        }
    });
    let block_link = block
        .select(&selectors.link)
        .next()
        .and_then(|a| a.value().attr("href"));
    let href = if selectors.custom_link {
        block_link.or(title_anchor)
    } else {
        title_anchor.or(block_link)
    }
    .or_else(|| (block.value().name() == "a").then(|| block.value().attr("href")).flatten());

    let Some(href) = href.map(str::trim).filter(|h| !h.is_empty() && !h.starts_with('#')) else {
        debug!(%title, "Skipping block: no link");
        return None;
    };

    let excerpt = block
        .select(&selectors.excerpt)
        .map(element_text)
        .find(|text| !text.is_empty() && *text != title)
        .unwrap_or_default();

    let published_at = block.select(&selectors.date).next().and_then(|el| {
        el.value()
            .attr("datetime")
            .and_then(parse_datetime)
            .or_else(|| parse_datetime(&element_text(el)))
    });

    let author = block
        .select(&selectors.author)
        .next()
        .map(element_text)
        .map(|a| a.trim_start_matches("By ").trim_start_matches("by ").to_string())
        .filter(|a| !a.is_empty());

    let image_url = block
        .select(&selectors.image)
        .next()
        .and_then(image_source)
        .map(|src| resolve_url(base_url, src));

    Some(RawItem {
        title,
        url: resolve_url(base_url, href),
        excerpt,
        content: None,
        author,
        published_at,
        image_url,
        tags: Vec::new(),
        platform: None,
    })
}

/// `src`, unless it is an inline placeholder, else the usual lazy-load attributes.
fn image_source(img: ElementRef<'_>) -> Option<&str> {
    let el = img.value();
    el.attr("src")
        .filter(|src| !src.is_empty() && !src.starts_with("data:"))
        .or_else(|| el.attr("data-src"))
        .or_else(|| el.attr("data-lazy-src"))
        .or_else(|| el.attr("data-original"))
        .filter(|src| !src.is_empty())
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Fetch an article's own page and return its body text, or an empty string
/// when no candidate container has text.
#[instrument(level = "debug", skip(fetcher))]
pub async fn fetch_article_content(fetcher: &dyn Fetch, url: &str) -> Result<String, FetchError> {
    let html = fetcher.fetch(url).await?;
    Ok(extract_article_body(&html))
}

/// First non-empty candidate container's text.
pub fn extract_article_body(html: &str) -> String {
    let document = Html::parse_document(html);
    CONTENT_CONTAINERS
        .iter()
        .filter_map(|selector| document.select(selector).next())
        .map(|el| html_to_text(&el.inner_html()))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}
