//! Syndication feed extractor (RSS 2.0 and Atom).
//!
//! The document is walked with `quick-xml` events. Every `<item>` or `<entry>`
//! becomes one [`RawItem`]:
//!
//! - **link**: `<link>` text, Atom `<link href>` (alternate or unqualified), or a URL-shaped `<guid>`/`<id>`
//! - **excerpt**: `<summary>` or `<description>`, markup stripped
//! - **content**: `<content:encoded>` or `<content>`, markup stripped
//! - **image**: `<enclosure url>`, `<media:thumbnail url>`, `<media:content url>`
//!
//! An item missing a title or link is skipped with a warning; a document that
//! is not well-formed XML fails the whole source.

use super::html_to_text;
use crate::error::ExtractError;
use crate::fetcher::Fetch;
use crate::models::RawItem;
use crate::normalize::resolve_url;
use crate::utils::{collapse_whitespace, parse_datetime};
use quick_xml::Reader;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use tracing::{info, instrument, warn};

/// Fetch `feed_url` and return one raw item per well-formed feed entry.
#[instrument(level = "info", skip(fetcher))]
pub async fn extract(fetcher: &dyn Fetch, feed_url: &str) -> Result<Vec<RawItem>, ExtractError> {
    let xml = fetcher.fetch(feed_url).await?;
    let entries = parse_feed(&xml)?;
    let total = entries.len();

    let items: Vec<RawItem> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry.into_raw_item(feed_url) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed feed item");
                None
            }
        })
        .collect();

    info!(found = total, kept = items.len(), "Parsed feed");
    Ok(items)
}

/// Fields collected for one `<item>`/`<entry>` before validation.
#[derive(Debug, Default)]
struct FeedEntry {
    title: String,
    link: String,
    guid: String,
    description: String,
    summary: String,
    content_encoded: String,
    content: String,
    author: String,
    date: String,
    updated: String,
    image: Option<String>,
}

impl FeedEntry {
    /// Attributes on an element directly or indirectly inside the entry.
    fn apply_attributes(&mut self, name: &str, element: &BytesStart<'_>) {
        match name {
            "link" => {
                let rel = attr(element, "rel");
                if let Some(href) = attr(element, "href") {
                    if self.link.is_empty() && matches!(rel.as_deref(), None | Some("alternate")) {
                        self.link = href;
                    }
                }
            }
            "enclosure" => {
                let is_image = attr(element, "type").is_none_or(|t| t.starts_with("image"));
                if is_image && self.image.is_none() {
                    self.image = attr(element, "url");
                }
            }
            "media:thumbnail" | "media:content" => {
                let is_video = attr(element, "medium").is_some_and(|m| m == "video")
                    || attr(element, "type").is_some_and(|t| t.starts_with("video"));
                if !is_video && self.image.is_none() {
                    self.image = attr(element, "url");
                }
            }
            _ => {}
        }
    }

    /// Text content of a direct child element.
    fn apply_text(&mut self, name: &str, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let slot = match name {
            "title" => &mut self.title,
            "link" => &mut self.link,
            "guid" | "id" => &mut self.guid,
            "description" => &mut self.description,
            "summary" => &mut self.summary,
            "content:encoded" => &mut self.content_encoded,
            "content" => &mut self.content,
            "author" | "dc:creator" => &mut self.author,
            "pubDate" | "published" | "dc:date" => &mut self.date,
            "updated" => &mut self.updated,
            _ => return,
        };
        if slot.is_empty() {
            *slot = text;
        }
    }

    fn into_raw_item(self, feed_url: &str) -> Result<RawItem, ExtractError> {
        let title = html_to_text(&self.title);
        if title.is_empty() {
            return Err(ExtractError::Parse("feed item has no title".to_string()));
        }

        let guid = self.guid.trim();
        let link = match self.link.trim() {
            "" if guid.starts_with("http") => guid,
            link => link,
        };
        if link.is_empty() {
            return Err(ExtractError::Parse(format!("feed item {title:?} has no link")));
        }

        let excerpt = [&self.summary, &self.description]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .map(|s| html_to_text(s))
            .unwrap_or_default();
        let content = [&self.content_encoded, &self.content]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .map(|s| html_to_text(s));
        let published_at = [&self.date, &self.updated]
            .into_iter()
            .find_map(|s| parse_datetime(s));

        Ok(RawItem {
            title,
            url: resolve_url(feed_url, link),
            excerpt,
            content,
            author: Some(collapse_whitespace(&self.author)).filter(|a| !a.is_empty()),
            published_at,
            image_url: self.image.map(|img| resolve_url(feed_url, &img)),
            tags: Vec::new(),
            platform: None,
        })
    }
}

fn qname(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attr(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| decode_text(&a.value))
}

fn decode_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match unescape(&text) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => text.into_owned(),
    }
}

/// Resolve an entity reference such as `amp` or `#x2019`.
fn resolve_entity(name: &str) -> String {
    let resolved = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32).map(String::from)
    } else if let Some(dec) = name.strip_prefix('#') {
        dec.parse::<u32>().ok().and_then(char::from_u32).map(String::from)
    } else {
        resolve_predefined_entity(name).map(str::to_string)
    };
    resolved.unwrap_or_else(|| format!("&{name};"))
}

/// Walk the document and collect the raw fields of every entry.
fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut entry_depth = 0usize;
    let mut text = String::new();
    let mut saw_feed_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = qname(e.name().as_ref());
                if matches!(name.as_str(), "rss" | "feed" | "rdf:RDF" | "channel") {
                    saw_feed_root = true;
                }
                if current.is_none() && (name == "item" || name == "entry") {
                    current = Some(FeedEntry::default());
                    entry_depth = path.len() + 1;
                } else if let Some(entry) = current.as_mut() {
                    entry.apply_attributes(&name, &e);
                }
                // Markup nested inside an entry child keeps adding to its text.
                if current.is_none() || path.len() <= entry_depth {
                    text.clear();
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    entry.apply_attributes(&qname(e.name().as_ref()), &e);
                }
            }
            Ok(Event::Text(t)) => text.push_str(&decode_text(&t)),
            Ok(Event::CData(c)) => text.push_str(&String::from_utf8_lossy(&c)),
            Ok(Event::GeneralRef(r)) => text.push_str(&resolve_entity(&String::from_utf8_lossy(&r))),
            Ok(Event::End(_)) => {
                let name = path.pop().unwrap_or_default();
                if current.is_none() {
                    text.clear();
                    continue;
                }
                let author_name = name == "name" && path.last().is_some_and(|p| p == "author");
                if path.len() > entry_depth && !author_name {
                    continue;
                }
                let value = std::mem::take(&mut text);
                if path.len() + 1 == entry_depth {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                } else if let Some(entry) = current.as_mut() {
                    if path.len() == entry_depth {
                        entry.apply_text(&name, value);
                    } else if author_name {
                        entry.apply_text("author", value);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Parse(format!(
                    "malformed feed at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_feed_root {
        return Err(ExtractError::Parse(
            "document is not an RSS or Atom feed".to_string(),
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticFetcher;
    use chrono::{Datelike, Timelike};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Island News</title>
    <item>
      <title>Storm warning issued for coast</title>
      <link>https://x.com/a</link>
    </item>
    <item>
      <title><![CDATA[Council &amp; mayor agree on rail budget]]></title>
      <link>/politics/rail-budget</link>
      <description>&lt;p&gt;The council voted 7&amp;#8211;2.&lt;/p&gt;</description>
      <content:encoded><![CDATA[<p>Full <em>story</em> text.</p>]]></content:encoded>
      <dc:creator>Jane Kealoha</dc:creator>
      <pubDate>Tue, 05 Mar 2024 14:30:00 GMT</pubDate>
      <media:thumbnail url="https://cdn.test/rail.jpg"/>
    </item>
    <item>
      <description>An item with no title</description>
      <link>https://x.com/untitled</link>
    </item>
    <item>
      <title>Surf contest draws crowds</title>
      <enclosure url="/img/surf.jpg" type="image/jpeg" length="100"/>
      <guid isPermaLink="true">https://x.com/surf</guid>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom News</title>
  <entry>
    <title>Kauai road reopens</title>
    <link rel="alternate" href="https://atom.test/kauai-road"/>
    <link rel="enclosure" href="https://atom.test/audio.mp3"/>
    <id>tag:atom.test,2024:1</id>
    <updated>2024-06-01T10:00:00Z</updated>
    <summary type="html">&lt;b&gt;Crews&lt;/b&gt; finished early.</summary>
    <author><name>Pat Nakamura</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(entries.len(), 4);

        let items: Vec<RawItem> = entries
            .into_iter()
            .filter_map(|e| e.into_raw_item("https://feeds.test/rss").ok())
            .collect();
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].title, "Storm warning issued for coast");
        assert_eq!(items[0].url, "https://x.com/a");
        assert_eq!(items[0].excerpt, "");
        assert!(items[0].published_at.is_none());

        let rail = &items[1];
        assert_eq!(rail.title, "Council & mayor agree on rail budget");
        assert_eq!(rail.url, "https://feeds.test/politics/rail-budget");
        assert_eq!(rail.excerpt, "The council voted 7–2.");
        assert_eq!(rail.content.as_deref(), Some("Full story text."));
        assert_eq!(rail.author.as_deref(), Some("Jane Kealoha"));
        assert_eq!(rail.published_at.unwrap().hour(), 14);
        assert_eq!(rail.image_url.as_deref(), Some("https://cdn.test/rail.jpg"));

        let surf = &items[2];
        assert_eq!(surf.url, "https://x.com/surf");
        assert_eq!(surf.image_url.as_deref(), Some("https://feeds.test/img/surf.jpg"));
    }

    #[test]
    fn test_parse_atom_entry() {
        let items: Vec<RawItem> = parse_feed(ATOM)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.into_raw_item("https://atom.test/feed").ok())
            .collect();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.url, "https://atom.test/kauai-road");
        assert_eq!(item.excerpt, "Crews finished early.");
        assert_eq!(item.author.as_deref(), Some("Pat Nakamura"));
        assert_eq!(item.published_at.unwrap().month(), 6);
    }

    #[test]
    fn test_atom_xhtml_content_keeps_nested_text() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Kuhio Highway work wraps up</title>
    <link href="https://atom.test/kuhio"/>
    <summary>Short version.</summary>
    <content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><p>Crews finished the <b>Kuhio</b> stretch early.</p></div></content>
  </entry>
</feed>"#;
        let item = parse_feed(xml)
            .unwrap()
            .remove(0)
            .into_raw_item("https://atom.test/feed")
            .unwrap();
        assert_eq!(item.content.as_deref(), Some("Crews finished the Kuhio stretch early."));
        assert_eq!(item.excerpt, "Short version.");
    }

    #[test]
    fn test_html_document_is_not_a_feed() {
        let err = parse_feed("<html><body><p>hello</p></body></html>").unwrap_err();
        assert!(matches!(err, ExtractError::Parse(_)));
    }

    #[test]
    fn test_malformed_xml_fails_the_feed() {
        let err = parse_feed("<rss><channel><item><title>x</item></channel></rss>").unwrap_err();
        assert!(matches!(err, ExtractError::Parse(_)));
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("amp"), "&");
        assert_eq!(resolve_entity("#x2019"), "\u{2019}");
        assert_eq!(resolve_entity("#8211"), "–");
        assert_eq!(resolve_entity("nbsp"), "&nbsp;");
    }

    #[tokio::test]
    async fn test_extract_skips_bad_items_and_keeps_the_rest() {
        let fetcher = StaticFetcher::new().page("https://feeds.test/rss", RSS);
        let items = extract(&fetcher, "https://feeds.test/rss").await.unwrap();
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn test_extract_fetch_failure_fails_source() {
        let fetcher = StaticFetcher::new();
        let err = extract(&fetcher, "https://feeds.test/missing").await.unwrap_err();
        assert!(matches!(err, ExtractError::Fetch(_)));
    }
}
