//! Content processor
//!
//! Enriches unprocessed articles in batches: fingerprint recompute, topic
//! scoring, geographic extraction, importance classification, ticker/sector
//! extraction, quality scoring, and summary regeneration. Every enhancement
//! is a pure function of the current row; the flags flip only after all
//! steps complete, so a second concurrent pass observes `content_processed`
//! and exits.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::{
    BREAKING_KEYWORDS, COUNTRY_ALIASES, IMPORTANT_KEYWORDS, SECTOR_KEYWORDS,
    STOCK_SYMBOL_BLACKLIST, TOPIC_KEYWORDS,
};
use crate::error::{AppError, Result};
use crate::models::{Article, ImportanceLevel, Topic};
use crate::services::deduplicator::{ArticleDeduplicator, DedupStats};
use crate::store::ArticleStore;
use crate::utils::{content_fingerprint, extract_summary};

/// Window handed to the deduplicator after a processing cycle
const DEDUP_WINDOW_DAYS: i64 = 3;
/// Quality score deltas below this are not worth a write
const QUALITY_WRITE_THRESHOLD: f64 = 1.0;

static STOCK_SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{3,5}\b").unwrap());

/// Totals for one processing run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub articles_processed: usize,
    pub enhanced_articles: usize,
    pub processing_time_seconds: f64,
    pub hash_dedup: Option<DedupStats>,
    pub title_dedup: Option<DedupStats>,
}

fn head_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Score every topic against title + leading body text; primary needs at
/// least one keyword match, secondaries are the next three by score.
pub fn classify_topics(title: &str, content: &str) -> Option<(Topic, Vec<Topic>)> {
    if title.is_empty() && content.is_empty() {
        return None;
    }

    let text = head_chars(&format!("{title} {content}"), 1000).to_lowercase();

    let mut scores: Vec<(Topic, usize)> = TOPIC_KEYWORDS
        .iter()
        .map(|(topic, keywords)| {
            let score = keywords.iter().filter(|kw| text.contains(*kw)).count();
            (*topic, score)
        })
        .filter(|(_, score)| *score > 0)
        .collect();

    if scores.is_empty() {
        return None;
    }

    scores.sort_by(|a, b| b.1.cmp(&a.1));
    let primary = scores[0].0;
    let secondary: Vec<Topic> = scores.iter().skip(1).take(3).map(|(t, _)| *t).collect();
    Some((primary, secondary))
}

/// Countries whose aliases appear in title + leading body text
pub fn extract_countries(title: &str, content: &str) -> Vec<String> {
    if title.is_empty() && content.is_empty() {
        return Vec::new();
    }

    let text = head_chars(&format!("{title} {content}"), 2000).to_lowercase();

    COUNTRY_ALIASES
        .iter()
        .filter(|(_, aliases)| aliases.iter().any(|alias| text.contains(alias)))
        .map(|(country, _)| country.to_string())
        .collect()
}

/// Importance decision table over breaking/important keyword counts
pub fn classify_importance(title: &str, content: &str, reliability: i32) -> ImportanceLevel {
    let text = head_chars(&format!("{title} {content}"), 500).to_lowercase();

    let breaking = BREAKING_KEYWORDS
        .iter()
        .filter(|kw| text.contains(*kw))
        .count();
    let important = IMPORTANT_KEYWORDS
        .iter()
        .filter(|kw| text.contains(*kw))
        .count();

    if breaking >= 2 || (breaking >= 1 && reliability >= 90) {
        ImportanceLevel::Breaking
    } else if important >= 2 || (important >= 1 && breaking >= 1) {
        ImportanceLevel::Important
    } else {
        ImportanceLevel::Regular
    }
}

/// All-caps tokens that survive the blacklist, first-seen order, capped at
/// ten. Advisory metadata: prose mentions and genuine tickers are not
/// distinguished.
pub fn extract_stock_symbols(text: &str) -> Vec<String> {
    let mut symbols = Vec::new();
    for m in STOCK_SYMBOL_RE.find_iter(text) {
        let symbol = m.as_str();
        if STOCK_SYMBOL_BLACKLIST.contains(&symbol) {
            continue;
        }
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
            if symbols.len() >= 10 {
                break;
            }
        }
    }
    symbols
}

/// Sector with the highest keyword count, if any keyword matched at all
pub fn detect_sector(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    SECTOR_KEYWORDS
        .iter()
        .map(|(sector, keywords)| {
            let score = keywords.iter().filter(|kw| lowered.contains(*kw)).count();
            (*sector, score)
        })
        .filter(|(_, score)| *score > 0)
        .max_by_key(|(_, score)| *score)
        .map(|(sector, _)| sector.to_string())
}

/// Composite quality score, 0-100:
/// length (0-30) + reliability (0-25) + title (0-15) + recency (0-15)
/// + topic (0-10) + geography (0-5).
pub fn quality_score(article: &Article, now: DateTime<Utc>) -> f64 {
    let mut score = 0.0;

    if let Some(content) = &article.content {
        let length = content.chars().count();
        if length >= 1000 {
            score += 30.0;
        } else if length >= 500 {
            score += 20.0;
        } else if length >= 200 {
            score += 10.0;
        }
    }

    score += article.source_reliability as f64 * 0.25;

    let title_len = article.title.chars().count();
    if (30..=100).contains(&title_len) {
        score += 15.0;
    } else if (20..=120).contains(&title_len) {
        score += 10.0;
    } else if title_len >= 10 {
        score += 5.0;
    }

    if let Some(published) = article.published_at {
        let hours_ago = (now - published).num_seconds() as f64 / 3600.0;
        if hours_ago <= 1.0 {
            score += 15.0;
        } else if hours_ago <= 6.0 {
            score += 10.0;
        } else if hours_ago <= 24.0 {
            score += 5.0;
        }
    }

    match article.primary_topic {
        Some(Topic::General) => score += 5.0,
        Some(_) => score += 10.0,
        None => {}
    }

    if !article.countries_mentioned.is_empty() {
        score += 5.0;
    }

    score.min(100.0)
}

/// Batch content processor
pub struct ContentProcessor {
    articles: ArticleStore,
    deduplicator: Arc<ArticleDeduplicator>,
}

impl ContentProcessor {
    pub fn new(articles: ArticleStore, deduplicator: Arc<ArticleDeduplicator>) -> Self {
        Self {
            articles,
            deduplicator,
        }
    }

    /// Process unprocessed articles in batches until none remain, then run
    /// hash and title deduplication over the recent window.
    pub async fn process_unprocessed(&self, batch_size: usize) -> ProcessingStats {
        let started = std::time::Instant::now();
        let mut stats = ProcessingStats::default();

        loop {
            let batch = match self.articles.fetch_unprocessed(batch_size as i64).await {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(error = %err, "failed to fetch unprocessed articles");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let mut updates = Vec::with_capacity(batch.len());
            let now = Utc::now();

            for mut article in batch {
                let id = article.id;
                match Self::enhance(&mut article, now) {
                    Ok(enhanced) => {
                        if enhanced {
                            stats.enhanced_articles += 1;
                        }
                        article.content_processed = true;
                        article.classified = article.primary_topic.is_some();
                        article.processed_at = Some(now);
                        updates.push(article);
                    }
                    Err(err) => {
                        // Left unprocessed; the next cycle retries it
                        tracing::warn!(article_id = id, error = %err, "enhancement failed, skipping");
                    }
                }
            }

            let updated = updates.len();
            if let Err(err) = self.articles.update_batch(&updates).await {
                tracing::error!(error = %err, "failed to persist processed batch");
                break;
            }
            stats.articles_processed += updated;
            tracing::info!(batch = updated, "processed article batch");

            if updated == 0 {
                // Nothing in this batch could be processed; avoid spinning
                break;
            }
        }

        stats.hash_dedup = Some(
            self.deduplicator
                .deduplicate_by_content_hash(DEDUP_WINDOW_DAYS)
                .await,
        );
        stats.title_dedup = Some(
            self.deduplicator
                .deduplicate_by_title_similarity(DEDUP_WINDOW_DAYS)
                .await,
        );

        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            processed = stats.articles_processed,
            enhanced = stats.enhanced_articles,
            seconds = stats.processing_time_seconds,
            "content processing completed"
        );
        stats
    }

    /// Apply every enhancement step to one article. Returns whether any
    /// field changed. All steps run before the caller flips the flags.
    fn enhance(article: &mut Article, now: DateTime<Utc>) -> Result<bool> {
        let title = article.title.clone();
        if title.trim().is_empty() {
            return Err(AppError::Classification(
                "article has no title to classify against".to_string(),
            ));
        }

        let mut changed = false;
        let content = article.content.clone().unwrap_or_default();

        // 1. Fingerprint recompute against the current title/URL
        let fingerprint = content_fingerprint(&title, &article.url);
        if fingerprint != article.content_hash {
            article.content_hash = fingerprint;
            changed = true;
        }

        // 2. Topic classification over the keyword table
        if let Some((primary, secondary)) = classify_topics(&title, &content) {
            if article.primary_topic != Some(primary) {
                article.primary_topic = Some(primary);
                article.secondary_topics = secondary;
                changed = true;
            }
        }

        // 3. Geographic extraction, union semantics
        for country in extract_countries(&title, &content) {
            if !article.countries_mentioned.contains(&country) {
                article.countries_mentioned.push(country);
                changed = true;
            }
        }

        // 4. Importance level
        let importance = classify_importance(&title, &content, article.source_reliability);
        if article.importance_level != importance {
            article.importance_level = importance;
            changed = true;
        }

        // 5. Tickers and sector
        let combined = format!("{title} {content}");
        let symbols = extract_stock_symbols(&combined);
        if !symbols.is_empty() && article.stock_symbols != symbols {
            article.stock_symbols = symbols;
            changed = true;
        }
        if let Some(sector) = detect_sector(&combined) {
            if article.market_sector.as_deref() != Some(sector.as_str()) {
                article.market_sector = Some(sector);
                changed = true;
            }
        }

        // 6. Quality score, written only when it moved meaningfully
        let score = quality_score(article, now);
        if (score - article.quality_score).abs() > QUALITY_WRITE_THRESHOLD {
            article.quality_score = score;
            changed = true;
        }

        // 7. Summary regeneration for long bodies with poor summaries
        if content.chars().count() >= 300 {
            let current_len = article.summary.as_deref().map(|s| s.len()).unwrap_or(0);
            if !(50..=400).contains(&current_len) {
                let summary = extract_summary(&content, 300);
                if !summary.is_empty() && article.summary.as_deref() != Some(summary.as_str()) {
                    article.summary = Some(summary);
                    article.summary_generated = true;
                    changed = true;
                }
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_article() -> Article {
        Article {
            id: 1,
            content_hash: String::new(),
            title: "OpenAI releases GPT-6 with new capabilities".to_string(),
            content: Some("x".repeat(1200)),
            summary: None,
            url: "https://example.com/gpt6".to_string(),
            source_name: "Example".to_string(),
            source_url: None,
            source_reliability: 90,
            primary_topic: Some(Topic::Technology),
            secondary_topics: vec![],
            importance_level: ImportanceLevel::Regular,
            primary_region: None,
            countries_mentioned: vec!["United States".to_string()],
            language: "en".to_string(),
            word_count: 200,
            reading_time_minutes: 1,
            published_at: Some(Utc::now() - Duration::hours(2)),
            discovered_at: Utc::now(),
            processed_at: None,
            content_processed: false,
            summary_generated: false,
            classified: false,
            stock_symbols: vec![],
            market_sector: None,
            quality_score: 0.0,
        }
    }

    #[test]
    fn test_topic_classification_scores_keywords() {
        let (primary, secondary) = classify_topics(
            "New software platform for developers",
            "The technology company shipped an app with digital features.",
        )
        .unwrap();
        assert_eq!(primary, Topic::Technology);
        assert!(secondary.len() <= 3);
    }

    #[test]
    fn test_topic_classification_requires_a_match() {
        assert!(classify_topics("zzzz", "qqqq").is_none());
        assert!(classify_topics("", "").is_none());
    }

    #[test]
    fn test_country_extraction() {
        let countries = extract_countries(
            "Trade talks continue",
            "Officials in London and Delhi met with American counterparts.",
        );
        assert!(countries.contains(&"United Kingdom".to_string()));
        assert!(countries.contains(&"India".to_string()));
        assert!(countries.contains(&"United States".to_string()));
    }

    #[test]
    fn test_importance_scenarios() {
        // breaking >= 1 with reliability >= 90
        assert_eq!(
            classify_importance("Breaking: President announces emergency", "", 92),
            ImportanceLevel::Breaking
        );
        // important >= 2
        assert_eq!(
            classify_importance("Historic major announcement", "", 50),
            ImportanceLevel::Important
        );
        assert_eq!(
            classify_importance("Company files quarterly report", "", 50),
            ImportanceLevel::Regular
        );
    }

    #[test]
    fn test_importance_single_breaking_low_reliability() {
        assert_eq!(
            classify_importance("Breaking story of the day", "", 60),
            ImportanceLevel::Regular
        );
    }

    #[test]
    fn test_stock_symbol_extraction() {
        let symbols = extract_stock_symbols("AAPL and MSFT rose while THE CEO of IBM spoke.");
        assert_eq!(symbols, vec!["AAPL", "MSFT", "IBM"]);
    }

    #[test]
    fn test_stock_symbol_cap() {
        let text = (0..15)
            .map(|i| format!("SYM{}{}", (b'A' + i) as char, (b'A' + i) as char))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(extract_stock_symbols(&text).len(), 10);
    }

    #[test]
    fn test_sector_detection() {
        assert_eq!(
            detect_sector("The bank announced new investment and credit products"),
            Some("Finance".to_string())
        );
        assert_eq!(detect_sector("nothing relevant"), None);
    }

    #[test]
    fn test_quality_score_scenario() {
        // 30 (length) + 22.5 (reliability) + 15 (title) + 10 (recency)
        // + 10 (topic) + 5 (geo) = 92.5
        let article = sample_article();
        let score = quality_score(&article, Utc::now());
        assert!((score - 92.5).abs() < 0.01);
        assert!(score >= 85.0);
    }

    #[test]
    fn test_quality_score_clamped() {
        let mut article = sample_article();
        article.source_reliability = 100;
        article.published_at = Some(Utc::now());
        let score = quality_score(&article, Utc::now());
        assert!(score <= 100.0);
    }

    #[test]
    fn test_enhance_is_idempotent() {
        let mut article = sample_article();
        let now = Utc::now();

        let first = ContentProcessor::enhance(&mut article, now).unwrap();
        assert!(first);
        let after_first = article.clone();

        let second = ContentProcessor::enhance(&mut article, now).unwrap();
        assert!(!second);
        assert_eq!(article.content_hash, after_first.content_hash);
        assert_eq!(article.quality_score, after_first.quality_score);
        assert_eq!(article.importance_level, after_first.importance_level);
    }

    #[test]
    fn test_untitled_article_is_skipped_not_processed() {
        let mut article = sample_article();
        article.title = "  ".to_string();
        let err = ContentProcessor::enhance(&mut article, Utc::now()).unwrap_err();
        assert_eq!(err.error_code(), "CLASSIFICATION_FAILED");
        assert!(!article.content_processed);
    }

    #[test]
    fn test_enhance_recomputes_fingerprint() {
        let mut article = sample_article();
        article.content_hash = "stale".to_string();
        ContentProcessor::enhance(&mut article, Utc::now()).unwrap();
        assert_eq!(
            article.content_hash,
            content_fingerprint(&article.title, &article.url)
        );
    }

    #[test]
    fn test_summary_regenerated_for_long_content() {
        let mut article = sample_article();
        article.content = Some("A real first sentence for the summary. ".repeat(20));
        article.summary = Some("short".to_string());
        ContentProcessor::enhance(&mut article, Utc::now()).unwrap();
        let summary = article.summary.unwrap();
        assert!(summary.len() >= 50);
        assert!(article.summary_generated);
    }
}
