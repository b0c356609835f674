//! Feed entry extraction
//!
//! Feeds deliver body text in several shapes: a bare string, a typed block,
//! or a list of typed blocks. `ContentField` models those shapes once so no
//! call site repeats the type-guarding, and a single `candidates` pass feeds
//! the longest-wins selection rule.

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ImportanceLevel, NewArticle, NewsSource, Topic};
use crate::utils::{
    clean_html_content, clean_title, content_fingerprint, extract_summary, parse_feed_date,
    word_count,
};

/// Candidates shorter than this are treated as metadata, not content
const MIN_MEANINGFUL_CONTENT: usize = 50;
/// Below this the entry falls back to its title as content
const MIN_USABLE_CONTENT: usize = 20;
/// Bodies longer than this get a generated summary
const SUMMARY_THRESHOLD: usize = 300;
const SUMMARY_MAX_LENGTH: usize = 300;
const MAX_TITLE_LENGTH: usize = 500;

/// A typed content block as feeds deliver it
#[derive(Debug, Clone)]
pub struct ContentBlock {
    pub content_type: Option<String>,
    pub value: String,
}

/// The shapes a content field can take
#[derive(Debug, Clone)]
pub enum ContentField {
    Text(String),
    Block(ContentBlock),
    Blocks(Vec<ContentBlock>),
}

impl ContentField {
    /// Flatten to candidate strings, whatever the shape
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            ContentField::Text(text) => vec![text.as_str()],
            ContentField::Block(block) => vec![block.value.as_str()],
            ContentField::Blocks(blocks) => blocks.iter().map(|b| b.value.as_str()).collect(),
        }
    }
}

/// Collect every content field an entry carries, in priority order:
/// typed content body, then summary/description, then media descriptions.
pub fn gather_content_fields(entry: &Entry) -> Vec<ContentField> {
    let mut fields = Vec::new();

    if let Some(content) = &entry.content {
        if let Some(body) = &content.body {
            fields.push(ContentField::Block(ContentBlock {
                content_type: Some(content.content_type.to_string()),
                value: body.clone(),
            }));
        }
    }

    if let Some(summary) = &entry.summary {
        fields.push(ContentField::Block(ContentBlock {
            content_type: Some(summary.content_type.to_string()),
            value: summary.content.clone(),
        }));
    }

    let media_blocks: Vec<ContentBlock> = entry
        .media
        .iter()
        .filter_map(|media| media.description.as_ref())
        .map(|text| ContentBlock {
            content_type: Some(text.content_type.to_string()),
            value: text.content.clone(),
        })
        .collect();
    if !media_blocks.is_empty() {
        fields.push(ContentField::Blocks(media_blocks));
    }

    fields
}

/// Pick the best content candidate: the longest one that clears the
/// meaningful threshold, otherwise the longest of anything present.
pub fn select_content(fields: &[ContentField]) -> Option<String> {
    let candidates: Vec<&str> = fields.iter().flat_map(|f| f.candidates()).collect();
    if candidates.is_empty() {
        return None;
    }

    let meaningful = candidates
        .iter()
        .filter(|c| c.trim().len() > MIN_MEANINGFUL_CONTENT)
        .max_by_key(|c| c.len());

    match meaningful {
        Some(best) => Some(best.to_string()),
        None => candidates.iter().max_by_key(|c| c.len()).map(|c| c.to_string()),
    }
}

static ITEM_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(item|entry)[\s>].*?</(item|entry)>").unwrap());
static DATE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(pubDate|published|updated|created|dc:date)[^>]*>(.*?)</(pubDate|published|updated|created|dc:date)>")
        .unwrap()
});

/// Raw per-entry date strings, document order. The feed parser already
/// handles standard formats; this recovers the nonstandard ones it drops,
/// which then go through the lenient date parser.
pub fn raw_entry_dates(feed_xml: &str) -> Vec<Option<DateTime<Utc>>> {
    ITEM_BLOCK_RE
        .find_iter(feed_xml)
        .map(|block| {
            DATE_TAG_RE
                .captures(block.as_str())
                .and_then(|caps| parse_feed_date(caps[2].trim()))
        })
        .collect()
}

/// Publication date: parser-provided fields in order, then the raw string.
pub fn extract_date(entry: &Entry, raw_fallback: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    entry.published.or(entry.updated).or(raw_fallback)
}

/// Provisional topic at ingest: the source's first topic tag wins; without
/// one, a keyword rule picks among technology/business/politics/general.
/// The full keyword-table classification happens in the processor.
pub fn provisional_topic(source: &NewsSource, title: &str, content: &str) -> Topic {
    if let Some(topic) = source.topics.first().and_then(|t| t.parse::<Topic>().ok()) {
        return topic;
    }

    let combined: String = format!("{} {}", title.to_lowercase(), content.to_lowercase())
        .chars()
        .take(500)
        .collect();

    const TECH: [&str; 7] = ["technology", "tech", "ai", "software", "startup", "app", "digital"];
    const BUSINESS: [&str; 6] = ["business", "economy", "finance", "market", "company", "stock"];
    const POLITICS: [&str; 6] = [
        "politics",
        "government",
        "election",
        "policy",
        "minister",
        "parliament",
    ];

    if TECH.iter().any(|kw| combined.contains(kw)) {
        Topic::Technology
    } else if BUSINESS.iter().any(|kw| combined.contains(kw)) {
        Topic::Business
    } else if POLITICS.iter().any(|kw| combined.contains(kw)) {
        Topic::Politics
    } else {
        Topic::General
    }
}

/// Extract up to `cap` persistable articles from a parsed feed, using the
/// raw XML to recover dates the parser dropped.
pub fn extract_candidates(
    feed: &feed_rs::model::Feed,
    feed_xml: &str,
    source: &NewsSource,
    cap: usize,
    now: DateTime<Utc>,
) -> Vec<NewArticle> {
    let raw_dates = raw_entry_dates(feed_xml);
    feed.entries
        .iter()
        .enumerate()
        .take(cap)
        .filter_map(|(i, entry)| {
            build_article(entry, raw_dates.get(i).copied().flatten(), source, now)
        })
        .collect()
}

/// Build a persistable article from a feed entry. Title and link are
/// mandatory; entries missing either are skipped.
pub fn build_article(
    entry: &Entry,
    raw_date: Option<DateTime<Utc>>,
    source: &NewsSource,
    now: DateTime<Utc>,
) -> Option<NewArticle> {
    let raw_title = entry.title.as_ref().map(|t| t.content.trim()).unwrap_or("");
    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

    if raw_title.is_empty() || link.is_empty() {
        return None;
    }

    let mut content = select_content(&gather_content_fields(entry)).unwrap_or_default();
    if content.trim().len() < MIN_USABLE_CONTENT {
        // Thin entry: the title is still worth keeping as content
        content = raw_title.to_string();
    }

    let title: String = clean_title(raw_title)
        .unwrap_or_else(|| raw_title.to_string())
        .chars()
        .take(MAX_TITLE_LENGTH)
        .collect();

    let cleaned_content = clean_html_content(&content);
    let words = cleaned_content.as_deref().map(word_count).unwrap_or(0) as i32;

    let summary = cleaned_content
        .as_deref()
        .filter(|c| c.len() > SUMMARY_THRESHOLD)
        .map(|c| extract_summary(c, SUMMARY_MAX_LENGTH));

    let primary_topic = provisional_topic(source, &title, cleaned_content.as_deref().unwrap_or(""));
    let secondary_topics: Vec<Topic> = source
        .topics
        .iter()
        .filter_map(|t| t.parse::<Topic>().ok())
        .filter(|t| *t != primary_topic)
        .collect();

    Some(NewArticle {
        content_hash: content_fingerprint(&title, &link),
        title,
        content: cleaned_content,
        summary,
        url: link,
        source_name: source.name.clone(),
        source_url: Some(source.url.clone()),
        source_reliability: source.reliability_score,
        primary_topic: Some(primary_topic),
        secondary_topics,
        importance_level: ImportanceLevel::Regular,
        primary_region: source.primary_region.clone(),
        language: source.language.clone(),
        word_count: words,
        reading_time_minutes: crate::models::article::reading_time_minutes(words),
        // Future-dated feeds exist; publication never postdates discovery
        published_at: extract_date(entry, raw_date).map(|d| d.min(now)),
        discovered_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_source(topics: Vec<&str>) -> NewsSource {
        NewsSource {
            id: 1,
            name: "Example Feed".to_string(),
            url: "https://example.com/rss".to_string(),
            primary_region: Some("Global".to_string()),
            country_code: Some("US".to_string()),
            language: "en".to_string(),
            enabled: true,
            reliability_score: 80,
            poll_interval_minutes: 15,
            max_articles_per_poll: 20,
            topics: topics.into_iter().map(String::from).collect(),
            last_poll_at: None,
            last_successful_poll_at: None,
            next_poll_at: None,
            last_etag: None,
            last_modified: None,
            total_polls: 0,
            successful_polls: 0,
            failed_polls: 0,
            total_articles_collected: 0,
            avg_response_time_ms: 0.0,
            last_response_time_ms: 0.0,
            consecutive_failures: 0,
            last_error_message: None,
            last_error_at: None,
            custom_headers: HashMap::new(),
        }
    }

    fn parse_feed(xml: &str) -> feed_rs::model::Feed {
        feed_rs::parser::parse(xml.as_bytes()).expect("feed should parse")
    }

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Feed</title>{items}</channel></rss>"#
        )
    }

    #[test]
    fn test_longest_meaningful_candidate_wins() {
        let long_body = "Body text goes on and on. ".repeat(10);
        let xml = format!(
            r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom">
            <title>Feed</title><id>feed-1</id><updated>2023-08-07T00:00:00Z</updated>
            <entry><id>e1</id><title>Story</title>
            <link href="https://example.com/a"/>
            <summary>short blurb</summary>
            <content type="text">{long_body}</content>
            </entry></feed>"#
        );
        let feed = parse_feed(&xml);
        let fields = gather_content_fields(&feed.entries[0]);
        let selected = select_content(&fields).unwrap();
        assert!(selected.len() > 100);
        assert!(selected.contains("Body text goes on"));
    }

    #[test]
    fn test_short_candidates_fall_back_to_longest() {
        let fields = vec![
            ContentField::Text("tiny".to_string()),
            ContentField::Text("slightly longer".to_string()),
        ];
        assert_eq!(select_content(&fields).unwrap(), "slightly longer");
    }

    #[test]
    fn test_entry_without_title_is_skipped() {
        let xml = rss("<item><link>https://example.com/a</link><description>text</description></item>");
        let feed = parse_feed(&xml);
        let source = sample_source(vec![]);
        assert!(build_article(&feed.entries[0], None, &source, Utc::now()).is_none());
    }

    #[test]
    fn test_thin_entry_uses_title_as_content() {
        let xml = rss(
            "<item><title>A headline about nothing much</title>\
             <link>https://example.com/a</link><description>hi</description></item>",
        );
        let feed = parse_feed(&xml);
        let source = sample_source(vec![]);
        let article = build_article(&feed.entries[0], None, &source, Utc::now()).unwrap();
        assert_eq!(article.content.as_deref(), Some("A headline about nothing much"));
    }

    #[test]
    fn test_provisional_topic_prefers_source_tag() {
        let source = sample_source(vec!["finance"]);
        assert_eq!(provisional_topic(&source, "anything", ""), Topic::Finance);

        let untagged = sample_source(vec![]);
        assert_eq!(
            provisional_topic(&untagged, "New software platform ships", ""),
            Topic::Technology
        );
        assert_eq!(
            provisional_topic(&untagged, "Quiet day everywhere", ""),
            Topic::General
        );
    }

    #[test]
    fn test_fingerprint_stability_across_tracking_params() {
        let xml_a = rss(
            "<item><title>Same story</title>\
             <link>https://example.com/a?utm_source=feed</link>\
             <description>Body of the story that is long enough to matter here.</description></item>",
        );
        let xml_b = rss(
            "<item><title>Same story</title>\
             <link>https://example.com/a</link>\
             <description>Body of the story that is long enough to matter here.</description></item>",
        );
        let source = sample_source(vec![]);
        let a = build_article(&parse_feed(&xml_a).entries[0], None, &source, Utc::now()).unwrap();
        let b = build_article(&parse_feed(&xml_b).entries[0], None, &source, Utc::now()).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_raw_date_recovery() {
        let xml = rss(
        "<item><title>Dated</title><link>https://example.com/a</link>\
             <pubDate>07 Aug 2023 15:30:00 IST</pubDate>\
             <description>Some body text that describes the story at length.</description></item>",
        );
        let dates = raw_entry_dates(&xml);
        assert_eq!(dates.len(), 1);
        let parsed = dates[0].expect("nonstandard date should be recovered");
        assert_eq!(parsed.to_rfc3339(), "2023-08-07T10:00:00+00:00");
    }

    #[test]
    fn test_summary_generated_for_long_bodies() {
        let body = "First sentence of the piece. ".repeat(30);
        let xml = rss(&format!(
            "<item><title>Long</title><link>https://example.com/a</link>\
             <description>{body}</description></item>"
        ));
        let feed = parse_feed(&xml);
        let source = sample_source(vec![]);
        let article = build_article(&feed.entries[0], None, &source, Utc::now()).unwrap();
        let summary = article.summary.expect("summary expected");
        assert!(summary.chars().count() <= 300);
        assert!(article.word_count > 0);
        assert_eq!(
            article.reading_time_minutes,
            crate::models::article::reading_time_minutes(article.word_count)
        );
    }
}
