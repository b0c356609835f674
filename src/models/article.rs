//! Article entity
//!
//! Articles are owned value types: the store loads and saves them, and all
//! derived fields (reading time, flags) are plain functions over the struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed topic taxonomy used for classification and cache keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    General,
    Technology,
    Business,
    Politics,
    Sports,
    Entertainment,
    Science,
    Health,
    Stocks,
    Startups,
    Ai,
    Finance,
    Energy,
    Automotive,
}

impl Topic {
    pub const ALL: [Topic; 14] = [
        Topic::General,
        Topic::Technology,
        Topic::Business,
        Topic::Politics,
        Topic::Sports,
        Topic::Entertainment,
        Topic::Science,
        Topic::Health,
        Topic::Stocks,
        Topic::Startups,
        Topic::Ai,
        Topic::Finance,
        Topic::Energy,
        Topic::Automotive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::General => "general",
            Topic::Technology => "technology",
            Topic::Business => "business",
            Topic::Politics => "politics",
            Topic::Sports => "sports",
            Topic::Entertainment => "entertainment",
            Topic::Science => "science",
            Topic::Health => "health",
            Topic::Stocks => "stocks",
            Topic::Startups => "startups",
            Topic::Ai => "ai",
            Topic::Finance => "finance",
            Topic::Energy => "energy",
            Topic::Automotive => "automotive",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or(())
    }
}

/// Editorial importance of an article
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceLevel {
    Breaking,
    Important,
    #[default]
    Regular,
}

impl ImportanceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceLevel::Breaking => "breaking",
            ImportanceLevel::Important => "important",
            ImportanceLevel::Regular => "regular",
        }
    }
}

impl FromStr for ImportanceLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "breaking" => Ok(ImportanceLevel::Breaking),
            "important" => Ok(ImportanceLevel::Important),
            "regular" => Ok(ImportanceLevel::Regular),
            _ => Err(()),
        }
    }
}

/// Estimated reading time at ~200 words per minute, floored at one minute.
pub fn reading_time_minutes(word_count: i32) -> i32 {
    if word_count <= 0 {
        return 1;
    }
    ((word_count + 199) / 200).max(1)
}

/// A persisted article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    /// 32-hex content fingerprint, unique across persisted articles
    pub content_hash: String,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub url: String,
    pub source_name: String,
    pub source_url: Option<String>,
    /// Reliability of the originating source at discovery time (0-100)
    pub source_reliability: i32,
    pub primary_topic: Option<Topic>,
    pub secondary_topics: Vec<Topic>,
    pub importance_level: ImportanceLevel,
    pub primary_region: Option<String>,
    pub countries_mentioned: Vec<String>,
    pub language: String,
    pub word_count: i32,
    pub reading_time_minutes: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub content_processed: bool,
    pub summary_generated: bool,
    pub classified: bool,
    pub stock_symbols: Vec<String>,
    pub market_sector: Option<String>,
    pub quality_score: f64,
}

impl Article {
    pub fn is_breaking(&self) -> bool {
        self.importance_level == ImportanceLevel::Breaking
    }

    pub fn is_recent(&self, hours: i64, now: DateTime<Utc>) -> bool {
        self.published_at
            .map(|p| (now - p).num_seconds() < hours * 3600)
            .unwrap_or(false)
    }
}

/// An extracted article that has not been persisted yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub content_hash: String,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub url: String,
    pub source_name: String,
    pub source_url: Option<String>,
    pub source_reliability: i32,
    pub primary_topic: Option<Topic>,
    pub secondary_topics: Vec<Topic>,
    pub importance_level: ImportanceLevel,
    pub primary_region: Option<String>,
    pub language: String,
    pub word_count: i32,
    pub reading_time_minutes: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_time_floor() {
        assert_eq!(reading_time_minutes(0), 1);
        assert_eq!(reading_time_minutes(37), 1);
        assert_eq!(reading_time_minutes(200), 1);
        assert_eq!(reading_time_minutes(201), 2);
        assert_eq!(reading_time_minutes(401), 3);
    }

    #[test]
    fn test_topic_round_trip() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>(), Ok(topic));
        }
        assert!("astrology".parse::<Topic>().is_err());
    }

    #[test]
    fn test_importance_parse() {
        assert_eq!(
            "breaking".parse::<ImportanceLevel>(),
            Ok(ImportanceLevel::Breaking)
        );
        assert_eq!(ImportanceLevel::default(), ImportanceLevel::Regular);
    }
}
