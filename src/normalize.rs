//! Turns an extractor's [`RawItem`] into the canonical [`NewArticle`].
//!
//! - **Category**: ordered keyword rules over title + excerpt, first match wins
//! - **Tags**: known place names plus inline `#hashtags`, de-duplicated
//! - **Truncation**: title 500 characters, excerpt and content 1000, no ellipsis
//! - **URLs**: relative image and link URLs resolved against the source's base URL

use crate::models::{Category, NewArticle, RawItem, Source, Tag};
use crate::utils::{collapse_whitespace, truncate_chars};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub const TITLE_MAX_CHARS: usize = 500;
pub const EXCERPT_MAX_CHARS: usize = 1000;
pub const CONTENT_MAX_CHARS: usize = 1000;

/// Keyword rules in precedence order.
static CATEGORY_RULES: Lazy<Vec<(Category, Regex)>> = Lazy::new(|| {
    [
        (
            Category::Weather,
            r"\b(weather|storms?|hurricanes?|tropical|rain(fall|s|y)?|flood(s|ing)?|winds?|forecasts?|tsunamis?|droughts?|high surf|heat advisory|vog)\b",
        ),
        (
            Category::Politics,
            r"\b(government|governor|mayor|council|legislat|senat|election|elect(ed|s)?\b|vot(e|es|ers|ing)\b|ballot|politic|candidate|congress|ordinance)",
        ),
        (
            Category::Sports,
            r"\b(sports?\b|football|basketball|baseball|soccer|volleyball|softball|tournament|championship|athlet|coach|playoffs?|stadium|rainbow warriors)",
        ),
        (
            Category::Education,
            r"\b(schools?\b|education|students?\b|teachers?\b|universit|college|campus|graduat|classroom|keiki)",
        ),
        (
            Category::Tourism,
            r"\b(touris|visitors?\b|hotels?\b|resorts?\b|travel|airlines?\b|cruise|vacation)",
        ),
        (
            Category::Development,
            r"\b(develop|construction|housing|infrastructure|zoning|permits?\b|rezon|road work|highway|rail project|groundbreaking)",
        ),
    ]
    .into_iter()
    .map(|(category, pattern)| {
        let re = Regex::new(&format!("(?i){pattern}")).expect("static category pattern");
        (category, re)
    })
    .collect()
});

/// Place names recognized as tags, matched case-insensitively as substrings.
const PLACE_NAMES: &[&str] = &[
    "Honolulu",
    "Oahu",
    "Maui",
    "Kauai",
    "Molokai",
    "Lanai",
    "Big Island",
    "Hilo",
    "Kona",
    "Kailua",
    "Kaneohe",
    "Waikiki",
    "Lahaina",
    "Kahului",
    "Wailuku",
    "Kihei",
    "Lihue",
    "Pearl City",
    "Waipahu",
    "Kapolei",
    "Mililani",
    "Waianae",
];

static HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^&\w])#([A-Za-z][A-Za-z0-9_]*)").expect("static hashtag pattern"));

/// Classify `text` (title and excerpt) into one category.
pub fn classify_category(text: &str) -> Category {
    CATEGORY_RULES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(category, _)| *category)
        .unwrap_or_default()
}

/// Inline `#word` tokens, without the `#`, lowercased, in order of appearance.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    HASHTAG
        .captures_iter(text)
        .map(|cap| cap[1].to_lowercase())
        .unique()
        .collect()
}

/// Known place names and inline hashtags found in `text`.
pub fn extract_tags(text: &str) -> Vec<Tag> {
    let lowered = text.to_lowercase();
    let places = PLACE_NAMES
        .iter()
        .filter(|place| lowered.contains(&place.to_lowercase()))
        .map(|place| Tag::general(place));
    let hashtags = extract_hashtags(text).into_iter().map(|h| Tag::hashtag(&h));
    places.chain(hashtags).unique().collect()
}

/// Resolve `candidate` against `base`. Absolute URLs pass through; failures
/// return the original string unchanged.
pub fn resolve_url(base: &str, candidate: &str) -> String {
    let candidate = candidate.trim();
    if let Ok(absolute) = Url::parse(candidate) {
        return absolute.to_string();
    }
    Url::parse(base)
        .and_then(|b| b.join(candidate))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| candidate.to_string())
}

/// Map a raw item from `source` into an article ready for the store.
///
/// `now` is the ingestion time, used when the item carries no publication date.
pub fn normalize(raw: RawItem, source: &Source, now: DateTime<Utc>) -> NewArticle {
    let title = truncate_chars(&collapse_whitespace(&raw.title), TITLE_MAX_CHARS);
    let excerpt = truncate_chars(raw.excerpt.trim(), EXCERPT_MAX_CHARS);
    let content = raw
        .content
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(excerpt.as_str());
    let content = truncate_chars(content, CONTENT_MAX_CHARS);

    let classified = format!("{title} {excerpt}");
    let category = classify_category(&classified);
    let tags = extract_tags(&classified)
        .into_iter()
        .chain(raw.tags.iter().map(|t| Tag::hashtag(t)))
        .unique()
        .collect();

    NewArticle {
        source_id: source.id,
        title,
        excerpt,
        content: (!content.is_empty()).then_some(content),
        url: resolve_url(&source.url, &raw.url),
        author: raw
            .author
            .map(|a| collapse_whitespace(&a))
            .filter(|a| !a.is_empty()),
        category,
        content_type: source.source_type,
        platform: raw.platform,
        image_url: raw.image_url.map(|img| resolve_url(&source.url, &img)),
        published_at: raw.published_at.unwrap_or(now),
        tags,
    }
}
