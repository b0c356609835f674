//! Article deduplication
//!
//! Multi-strategy duplicate elimination over a recent window: exact
//! fingerprint groups, normalized-title groups, per-domain title groups,
//! plus fingerprint regeneration for rows that never got one. Deletion is
//! hard; every strategy is idempotent on re-run.

use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::models::Article;
use crate::store::ArticleStore;
use crate::utils::content_fingerprint;

/// Minimum raw title length considered for similarity grouping
const MIN_TITLE_LENGTH: usize = 15;
/// Minimum normalized title length kept as a group key
const MIN_NORMALIZED_LENGTH: usize = 10;
/// Hash regeneration chunk size
const REGENERATION_CHUNK: i64 = 1000;

static TITLE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(breaking|exclusive|update|alert):\s*").unwrap());
static TITLE_SOURCE_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*-\s*[^-]+$").unwrap());
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One strategy pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupStats {
    pub duplicates_removed: usize,
    pub articles_processed: usize,
    pub processing_time_seconds: f64,
}

/// Normalize a title for similarity comparison. Short titles yield None;
/// grouping them would collapse unrelated stories.
pub fn normalize_title_for_comparison(title: &str) -> Option<String> {
    if title.chars().count() < MIN_TITLE_LENGTH {
        return None;
    }

    let lowered = title.to_lowercase();
    let no_prefix = TITLE_PREFIX_RE.replace(lowered.trim(), "");
    let no_suffix = TITLE_SOURCE_SUFFIX_RE.replace(&no_prefix, "");
    let words_only = NON_WORD_RE.replace_all(&no_suffix, " ");
    let normalized = WHITESPACE_RE.replace_all(words_only.trim(), " ").to_string();

    if normalized.chars().count() >= MIN_NORMALIZED_LENGTH {
        Some(normalized)
    } else {
        None
    }
}

/// Host portion of an article URL, lowercased
pub fn extract_domain(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Pick the survivor of a duplicate group: reliability, body length, and
/// quality score weigh in; ties go to the latest discovery.
pub fn select_best_article<'a>(articles: &'a [Article]) -> Option<&'a Article> {
    fn score(article: &Article) -> f64 {
        let mut score = article.source_reliability as f64 / 2.0;

        let content_len = article
            .content
            .as_ref()
            .map(|c| c.chars().count())
            .unwrap_or(0);
        if content_len > 1000 {
            score += 30.0;
        } else if content_len > 500 {
            score += 20.0;
        } else if content_len > 200 {
            score += 10.0;
        }

        score += article.quality_score / 100.0 * 20.0;
        score
    }

    articles.iter().max_by(|a, b| {
        score(a)
            .partial_cmp(&score(b))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.discovered_at.cmp(&b.discovered_at))
    })
}

/// Standalone deduplication service
pub struct ArticleDeduplicator {
    articles: ArticleStore,
}

impl ArticleDeduplicator {
    pub fn new(articles: ArticleStore) -> Self {
        Self { articles }
    }

    /// Remove exact duplicates by fingerprint group within the window
    pub async fn deduplicate_by_content_hash(&self, days_back: i64) -> DedupStats {
        let started = std::time::Instant::now();
        let cutoff = Utc::now() - Duration::days(days_back);
        let mut stats = DedupStats::default();

        let groups = match self.articles.duplicate_hash_groups(cutoff).await {
            Ok(groups) => groups,
            Err(err) => {
                tracing::error!(error = %err, "duplicate hash query failed");
                return stats;
            }
        };

        if groups.is_empty() {
            stats.processing_time_seconds = started.elapsed().as_secs_f64();
            return stats;
        }
        tracing::info!(groups = groups.len(), "found duplicate fingerprint groups");

        for content_hash in groups {
            let members = match self.articles.articles_by_hash(&content_hash).await {
                Ok(members) => members,
                Err(err) => {
                    tracing::error!(error = %err, hash = %content_hash, "hash group fetch failed");
                    continue;
                }
            };
            stats.articles_processed += members.len();
            stats.duplicates_removed += self.remove_all_but_best(&members).await;
        }

        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            removed = stats.duplicates_removed,
            "hash deduplication completed"
        );
        stats
    }

    /// Remove near-duplicates by normalized title within the window
    pub async fn deduplicate_by_title_similarity(&self, days_back: i64) -> DedupStats {
        let started = std::time::Instant::now();
        let cutoff = Utc::now() - Duration::days(days_back);
        let mut stats = DedupStats::default();

        let recent = match self.articles.recent_articles(cutoff).await {
            Ok(recent) => recent,
            Err(err) => {
                tracing::error!(error = %err, "recent article query failed");
                return stats;
            }
        };
        stats.articles_processed = recent.len();

        if recent.len() >= 2 {
            stats.duplicates_removed = self.remove_title_duplicates(&recent).await;
        }

        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            removed = stats.duplicates_removed,
            "title deduplication completed"
        );
        stats
    }

    /// Detect cross-posting: same domain, similar titles
    pub async fn deduplicate_by_url_domain(&self, days_back: i64) -> DedupStats {
        let started = std::time::Instant::now();
        let cutoff = Utc::now() - Duration::days(days_back);
        let mut stats = DedupStats::default();

        let recent = match self.articles.recent_articles(cutoff).await {
            Ok(recent) => recent,
            Err(err) => {
                tracing::error!(error = %err, "recent article query failed");
                return stats;
            }
        };
        stats.articles_processed = recent.len();

        let mut domain_groups: HashMap<String, Vec<Article>> = HashMap::new();
        for article in recent {
            if let Some(domain) = extract_domain(&article.url) {
                domain_groups.entry(domain).or_default().push(article);
            }
        }

        for (_, members) in domain_groups {
            if members.len() > 1 {
                stats.duplicates_removed += self.remove_title_duplicates(&members).await;
            }
        }

        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            removed = stats.duplicates_removed,
            "domain deduplication completed"
        );
        stats
    }

    /// Compute fingerprints for rows that never got one
    pub async fn regenerate_missing_hashes(&self) -> DedupStats {
        let started = std::time::Instant::now();
        let mut stats = DedupStats::default();

        let missing = match self.articles.articles_missing_hash(REGENERATION_CHUNK).await {
            Ok(missing) => missing,
            Err(err) => {
                tracing::error!(error = %err, "missing hash query failed");
                return stats;
            }
        };
        stats.articles_processed = missing.len();

        for article in &missing {
            let fingerprint = content_fingerprint(&article.title, &article.url);
            if let Err(err) = self.articles.set_content_hash(article.id, &fingerprint).await {
                tracing::warn!(article_id = article.id, error = %err, "hash regeneration failed");
            }
        }

        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            regenerated = stats.articles_processed,
            "hash regeneration completed"
        );
        stats
    }

    async fn remove_title_duplicates(&self, articles: &[Article]) -> usize {
        let mut groups: HashMap<String, Vec<&Article>> = HashMap::new();
        for article in articles {
            if let Some(key) = normalize_title_for_comparison(&article.title) {
                groups.entry(key).or_default().push(article);
            }
        }

        let mut removed = 0;
        for (_, members) in groups {
            if members.len() < 2 {
                continue;
            }
            let owned: Vec<Article> = members.into_iter().cloned().collect();
            removed += self.remove_all_but_best(&owned).await;
        }
        removed
    }

    async fn remove_all_but_best(&self, members: &[Article]) -> usize {
        if members.len() < 2 {
            return 0;
        }
        let Some(best) = select_best_article(members) else {
            return 0;
        };

        let mut removed = 0;
        for article in members {
            if article.id == best.id {
                continue;
            }
            match self.articles.delete_article(article.id).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(article_id = article.id, error = %err, "duplicate delete failed");
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImportanceLevel, Topic};
    use chrono::{DateTime, Utc};

    fn article(id: i64, reliability: i32, content_len: usize, quality: f64) -> Article {
        Article {
            id,
            content_hash: format!("hash{id}"),
            title: "A title long enough for comparison".to_string(),
            content: Some("x".repeat(content_len)),
            summary: None,
            url: format!("https://example.com/{id}"),
            source_name: "Example".to_string(),
            source_url: None,
            source_reliability: reliability,
            primary_topic: Some(Topic::General),
            secondary_topics: vec![],
            importance_level: ImportanceLevel::Regular,
            primary_region: None,
            countries_mentioned: vec![],
            language: "en".to_string(),
            word_count: 100,
            reading_time_minutes: 1,
            published_at: None,
            discovered_at: Utc::now(),
            processed_at: None,
            content_processed: true,
            summary_generated: false,
            classified: true,
            stock_symbols: vec![],
            market_sector: None,
            quality_score: quality,
        }
    }

    #[test]
    fn test_title_normalization() {
        assert_eq!(
            normalize_title_for_comparison("Breaking: Markets rally on rate cut - Example News"),
            Some("markets rally on rate cut".to_string())
        );
        assert_eq!(
            normalize_title_for_comparison("UPDATE: Markets Rally, on rate cut!"),
            normalize_title_for_comparison("Markets rally on rate cut???")
        );
    }

    #[test]
    fn test_short_titles_not_grouped() {
        assert_eq!(normalize_title_for_comparison("Tiny title"), None);
        assert_eq!(normalize_title_for_comparison(""), None);
    }

    #[test]
    fn test_domain_extraction() {
        assert_eq!(
            extract_domain("https://News.Example.com/story/1?x=1"),
            Some("news.example.com".to_string())
        );
        assert_eq!(extract_domain("not a url"), None);
    }

    #[test]
    fn test_best_article_prefers_reliability_and_length() {
        let weak = article(1, 50, 100, 10.0);
        let strong = article(2, 90, 1500, 80.0);
        let group = vec![weak, strong];
        assert_eq!(select_best_article(&group).unwrap().id, 2);
    }

    #[test]
    fn test_best_article_tie_breaks_on_discovery() {
        let earlier = DateTime::parse_from_rfc3339("2023-08-07T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2023-08-07T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut a = article(1, 80, 600, 50.0);
        a.discovered_at = earlier;
        let mut b = article(2, 80, 600, 50.0);
        b.discovered_at = later;

        assert_eq!(select_best_article(&[a, b]).unwrap().id, 2);
    }

    #[test]
    fn test_content_length_tiers() {
        let short = article(1, 80, 150, 0.0);
        let medium = article(2, 80, 300, 0.0);
        let long = article(3, 80, 700, 0.0);
        let longest = article(4, 80, 1200, 0.0);
        let group = vec![short, medium, long, longest];
        assert_eq!(select_best_article(&group).unwrap().id, 4);
    }
}
