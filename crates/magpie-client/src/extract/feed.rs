//! RSS 2.0 / Atom item extraction for feed providers.
//!
//! Job-board feeds are machine-generated and regular, so items are pulled
//! with regular expressions rather than a full XML parser.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(item|entry)[\s>](.*?)</(item|entry)>").expect("valid literal regex")
});

static CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<category(?:[^>]*?\sterm="([^"]*)")?[^>]*>(?:([^<]*)</category>)?"#)
        .expect("valid literal regex")
});

/// One feed item, RSS `<item>` or Atom `<entry>`.
#[derive(Debug, Clone, Default)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub guid: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
}

/// Parse every item out of a feed document. Malformed items are skipped.
pub fn parse_feed(xml: &str) -> Vec<FeedItem> {
    ITEM_RE
        .captures_iter(xml)
        .filter_map(|caps| parse_item(caps.get(2)?.as_str()))
        .collect()
}

fn parse_item(body: &str) -> Option<FeedItem> {
    let title = tag_text(body, "title")?;

    let link = tag_text(body, "link")
        .filter(|s| !s.is_empty())
        .or_else(|| attr_value(body, "link", "href"))
        .unwrap_or_default();

    let guid = tag_text(body, "guid")
        .or_else(|| tag_text(body, "id"))
        .unwrap_or_else(|| link.clone());

    let description = tag_text(body, "description")
        .or_else(|| tag_text(body, "summary"))
        .or_else(|| tag_text(body, "content"))
        .unwrap_or_default();

    let published = tag_text(body, "pubDate")
        .or_else(|| tag_text(body, "published"))
        .or_else(|| tag_text(body, "updated"))
        .and_then(|s| parse_feed_date(&s));

    let mut categories: Vec<String> = Vec::new();
    for caps in CATEGORY_RE.captures_iter(body) {
        let value = caps
            .get(1)
            .or(caps.get(2))
            .map(|m| unescape(m.as_str().trim()))
            .unwrap_or_default();
        if !value.is_empty() && !categories.contains(&value) {
            categories.push(value);
        }
    }

    Some(FeedItem {
        title,
        link,
        guid,
        description,
        published,
        categories,
    })
}

fn tag_text(body: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?s)<{tag}[^>]*>(.*?)</{tag}>")).ok()?;
    let inner = re.captures(body)?.get(1)?.as_str();
    Some(unescape(strip_cdata(inner).trim()))
}

fn attr_value(body: &str, tag: &str, attr: &str) -> Option<String> {
    let re = Regex::new(&format!(r#"<{tag}[^>]*\b{attr}="([^"]+)""#)).ok()?;
    Some(unescape(re.captures(body)?.get(1)?.as_str()))
}

fn strip_cdata(s: &str) -> &str {
    s.trim()
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .unwrap_or(s)
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn parse_feed_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
