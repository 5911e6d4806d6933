//! Feed body parsing into pipeline entries.
//!
//! Accepts RSS, Atom and JSON Feed bodies (via `feed-rs`) and maps each feed
//! entry into an [`Entry`]. Failures are isolated per entry: one malformed
//! item never poisons the rest of its feed.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use super::catalogue::FeedSource;
use super::types::Entry;
use crate::error::FeedError;
use crate::utils::text;

/// Result of parsing one feed body.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Entries accepted into the pipeline, in feed delivery order.
    pub entries: Vec<Entry>,
    /// Entries skipped for missing title/link/timestamp.
    pub skipped_invalid: usize,
    /// Entries skipped for being older than the cutoff.
    pub skipped_stale: usize,
}

/// Parses a feed body into entries, dropping items older than `cutoff`.
///
/// The body may be RSS, Atom or JSON Feed; `feed-rs` sniffs the format.
pub fn parse_feed(
    body: &[u8],
    source: &FeedSource,
    cutoff: DateTime<Utc>,
) -> Result<ParseOutcome, FeedError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| FeedError::Parse(e.to_string()))?;

    let mut outcome = ParseOutcome::default();
    for raw in feed.entries {
        match map_entry(raw, source) {
            Some(entry) if entry.published < cutoff => {
                outcome.skipped_stale += 1;
            }
            Some(entry) => outcome.entries.push(entry),
            None => outcome.skipped_invalid += 1,
        }
    }

    debug!(
        target: "feeds",
        source = %source.tag,
        accepted = outcome.entries.len(),
        skipped_invalid = outcome.skipped_invalid,
        skipped_stale = outcome.skipped_stale,
        "Parsed feed body"
    );

    Ok(outcome)
}

/// Maps one feed-rs entry to a pipeline entry.
///
/// Returns `None` for non-compliant items: no title, no link, or no usable
/// timestamp.
fn map_entry(raw: feed_rs::model::Entry, source: &FeedSource) -> Option<Entry> {
    let title = raw.title.as_ref().map(|t| t.content.trim().to_string())?;
    if title.is_empty() {
        return None;
    }

    let link = raw.links.first().map(|l| l.href.clone())?;
    let published = raw.published.or(raw.updated)?;

    let summary = raw
        .summary
        .as_ref()
        .map(|t| t.content.clone())
        .or_else(|| raw.content.as_ref().and_then(|c| c.body.clone()))
        .map(|s| strip_html(&s))
        .unwrap_or_default();

    let mut entry = Entry::new(
        title,
        link,
        summary,
        published,
        &source.url,
        &source.tag,
        &source.language,
    );
    entry.feed_tags = raw.categories.into_iter().map(|c| c.term).collect();
    Some(entry)
}

/// Removes markup from summaries that arrive as HTML fragments.
fn strip_html(input: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    let re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
    let stripped = re.replace_all(input, " ");
    // Collapse the whitespace the removed tags left behind.
    text::normalize_preserving_case(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn source() -> FeedSource {
        FeedSource::new("https://example.com/rss", "example")
    }

    fn rss_body(pub_date: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example Security Feed</title>
  <item>
    <title>Bombing in downtown kills 12</title>
    <link>https://x/y</link>
    <description>&lt;p&gt;Explosion reported&lt;/p&gt; near the market.</description>
    <pubDate>{pub_date}</pubDate>
    <category>country:Serbia</category>
  </item>
  <item>
    <title></title>
    <link>https://x/missing-title</link>
    <pubDate>{pub_date}</pubDate>
  </item>
</channel></rss>"#
        )
    }

    #[test]
    fn test_parse_rss_maps_fields() {
        let body = rss_body("Mon, 27 Jul 2026 10:00:00 GMT");
        let cutoff = Utc::now() - Duration::days(36500);
        let outcome = parse_feed(body.as_bytes(), &source(), cutoff).expect("should parse");

        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.skipped_invalid, 1);

        let entry = &outcome.entries[0];
        assert_eq!(entry.title, "Bombing in downtown kills 12");
        assert_eq!(entry.link, "https://x/y");
        assert!(entry.summary.contains("Explosion reported"));
        assert!(!entry.summary.contains("<p>"));
        assert_eq!(entry.source_tag, "example");
        assert_eq!(entry.feed_tags, vec!["country:Serbia".to_string()]);
    }

    #[test]
    fn test_stale_entries_dropped() {
        let body = rss_body("Mon, 01 Jan 2001 10:00:00 GMT");
        let cutoff = Utc::now() - Duration::days(30);
        let outcome = parse_feed(body.as_bytes(), &source(), cutoff).expect("should parse");

        assert!(outcome.entries.is_empty());
        assert_eq!(outcome.skipped_stale, 1);
    }

    #[test]
    fn test_garbage_body_is_parse_error() {
        let result = parse_feed(b"not a feed at all", &source(), Utc::now());
        assert!(matches!(result, Err(FeedError::Parse(_))));
    }

    #[test]
    fn test_atom_body() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <id>urn:feed:1</id>
  <updated>2026-07-27T10:00:00Z</updated>
  <entry>
    <title>Kidnapping near border town</title>
    <id>urn:entry:1</id>
    <link href="https://atom.example/1"/>
    <updated>2026-07-27T10:00:00Z</updated>
    <summary>Armed group abducted three workers.</summary>
  </entry>
</feed>"#;
        let cutoff = Utc::now() - Duration::days(36500);
        let outcome = parse_feed(body.as_bytes(), &source(), cutoff).expect("should parse");
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].link, "https://atom.example/1");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("plain text"), "plain text");
    }
}
