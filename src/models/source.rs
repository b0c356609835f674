//! News source entity
//!
//! A source row is the single writer for its own polling counters; the
//! lifecycle rules (reliability drift, backoff, auto-disable) live here as
//! plain mutations so the collector and health job share one implementation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reliability ceiling reached through consistent successes
const RELIABILITY_CAP: i32 = 95;
/// Reliability floor; failures never push a source below this
const RELIABILITY_FLOOR: i32 = 20;
/// Consecutive failures after which a source disables itself
const AUTO_DISABLE_THRESHOLD: i32 = 10;
/// Upper bound on failure backoff, in minutes
const MAX_BACKOFF_MINUTES: i64 = 60;

/// A syndication feed source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSource {
    pub id: i64,
    pub name: String,
    /// Feed URL, globally unique
    pub url: String,
    pub primary_region: Option<String>,
    pub country_code: Option<String>,
    pub language: String,
    pub enabled: bool,
    /// Dynamic reliability score, 0-100
    pub reliability_score: i32,
    pub poll_interval_minutes: i32,
    pub max_articles_per_poll: i32,
    pub topics: Vec<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_successful_poll_at: Option<DateTime<Utc>>,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub last_etag: Option<String>,
    pub last_modified: Option<String>,
    pub total_polls: i64,
    pub successful_polls: i64,
    pub failed_polls: i64,
    pub total_articles_collected: i64,
    pub avg_response_time_ms: f64,
    pub last_response_time_ms: f64,
    pub consecutive_failures: i32,
    pub last_error_message: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub custom_headers: HashMap<String, String>,
}

impl NewsSource {
    /// Percentage of polls that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total_polls == 0 {
            return 0.0;
        }
        (self.successful_polls as f64 / self.total_polls as f64) * 100.0
    }

    /// Fraction of polls that failed
    pub fn failure_rate(&self) -> f64 {
        if self.total_polls == 0 {
            return 0.0;
        }
        self.failed_polls as f64 / self.total_polls as f64
    }

    pub fn is_healthy(&self) -> bool {
        self.enabled && self.consecutive_failures < 5 && self.success_rate() > 70.0
    }

    pub fn is_due_for_poll(&self, now: DateTime<Utc>) -> bool {
        match (self.enabled, self.next_poll_at) {
            (true, Some(next)) => now >= next,
            (true, None) => true,
            _ => false,
        }
    }

    /// Record a clean poll. Counters reset, the response-time EWMA shifts
    /// toward the new sample (0.8 old / 0.2 new), and reliability creeps up
    /// one point toward the cap.
    pub fn record_successful_poll(
        &mut self,
        response_time_ms: f64,
        articles_count: i64,
        now: DateTime<Utc>,
    ) {
        self.last_poll_at = Some(now);
        self.last_successful_poll_at = Some(now);
        self.next_poll_at = Some(now + Duration::minutes(self.poll_interval_minutes as i64));

        self.total_polls += 1;
        self.successful_polls += 1;
        self.consecutive_failures = 0;
        self.total_articles_collected += articles_count;

        if self.avg_response_time_ms == 0.0 {
            self.avg_response_time_ms = response_time_ms;
        } else {
            self.avg_response_time_ms = self.avg_response_time_ms * 0.8 + response_time_ms * 0.2;
        }
        self.last_response_time_ms = response_time_ms;

        if self.reliability_score < RELIABILITY_CAP {
            self.reliability_score += 1;
        }
    }

    /// Record a failed poll. Reliability drops two points toward the floor
    /// and the next poll backs off by 5 minutes per consecutive failure,
    /// capped at an hour. Ten consecutive failures disable the source.
    pub fn record_failed_poll(&mut self, error_message: &str, now: DateTime<Utc>) {
        self.last_poll_at = Some(now);
        self.last_error_at = Some(now);
        self.last_error_message = Some(error_message.chars().take(500).collect());

        self.total_polls += 1;
        self.failed_polls += 1;
        self.consecutive_failures += 1;

        if self.reliability_score > RELIABILITY_FLOOR {
            self.reliability_score = (self.reliability_score - 2).max(RELIABILITY_FLOOR);
        }

        let backoff_minutes = MAX_BACKOFF_MINUTES
            .min(self.poll_interval_minutes as i64 + self.consecutive_failures as i64 * 5);
        self.next_poll_at = Some(now + Duration::minutes(backoff_minutes));

        if self.consecutive_failures >= AUTO_DISABLE_THRESHOLD {
            self.enabled = false;
        }
    }

    /// Keep conditional-request headers from the last 200 response
    pub fn update_caching_headers(&mut self, etag: Option<String>, last_modified: Option<String>) {
        if let Some(etag) = etag {
            self.last_etag = Some(etag);
        }
        if let Some(modified) = last_modified {
            self.last_modified = Some(modified);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_source() -> NewsSource {
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
            topics: vec!["technology".to_string()],
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

    #[test]
    fn test_successful_poll_updates_counters() {
        let mut source = sample_source();
        let now = Utc::now();

        source.record_successful_poll(120.0, 5, now);

        assert_eq!(source.total_polls, 1);
        assert_eq!(source.successful_polls, 1);
        assert_eq!(source.consecutive_failures, 0);
        assert_eq!(source.total_articles_collected, 5);
        assert_eq!(source.reliability_score, 81);
        assert_eq!(source.avg_response_time_ms, 120.0);
        assert_eq!(source.next_poll_at, Some(now + Duration::minutes(15)));
    }

    #[test]
    fn test_response_time_moving_average() {
        let mut source = sample_source();
        let now = Utc::now();

        source.record_successful_poll(100.0, 0, now);
        source.record_successful_poll(200.0, 0, now);

        // 0.8 * 100 + 0.2 * 200
        assert!((source.avg_response_time_ms - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reliability_caps_at_95() {
        let mut source = sample_source();
        source.reliability_score = 95;
        source.record_successful_poll(50.0, 1, Utc::now());
        assert_eq!(source.reliability_score, 95);
    }

    #[test]
    fn test_failed_poll_backoff_and_floor() {
        let mut source = sample_source();
        source.reliability_score = 21;
        let now = Utc::now();

        source.record_failed_poll("timeout", now);

        assert_eq!(source.total_polls, 1);
        assert_eq!(source.failed_polls, 1);
        assert_eq!(source.consecutive_failures, 1);
        assert_eq!(source.reliability_score, 20);
        // 15 + 1 * 5 minutes
        assert_eq!(source.next_poll_at, Some(now + Duration::minutes(20)));

        // Floor holds on further failures
        source.record_failed_poll("timeout", now);
        assert_eq!(source.reliability_score, 20);
    }

    #[test]
    fn test_backoff_caps_at_one_hour() {
        let mut source = sample_source();
        source.consecutive_failures = 19;
        let now = Utc::now();

        source.record_failed_poll("timeout", now);

        assert_eq!(source.next_poll_at, Some(now + Duration::minutes(60)));
    }

    #[test]
    fn test_auto_disable_at_ten_failures() {
        let mut source = sample_source();
        let now = Utc::now();

        for _ in 0..9 {
            source.record_failed_poll("refused", now);
        }
        assert!(source.enabled);

        source.record_failed_poll("refused", now);
        assert_eq!(source.consecutive_failures, 10);
        assert!(!source.enabled);
    }

    #[test]
    fn test_poll_count_identity() {
        let mut source = sample_source();
        let now = Utc::now();
        for i in 0..7 {
            if i % 2 == 0 {
                source.record_successful_poll(80.0, 1, now);
            } else {
                source.record_failed_poll("err", now);
            }
        }
        assert_eq!(
            source.total_polls,
            source.successful_polls + source.failed_polls
        );
    }

    #[test]
    fn test_due_for_poll() {
        let mut source = sample_source();
        let now = Utc::now();

        assert!(source.is_due_for_poll(now));

        source.next_poll_at = Some(now + Duration::minutes(5));
        assert!(!source.is_due_for_poll(now));

        source.next_poll_at = Some(now - Duration::minutes(1));
        assert!(source.is_due_for_poll(now));

        source.enabled = false;
        assert!(!source.is_due_for_poll(now));
    }

    #[test]
    fn test_success_rate() {
        let mut source = sample_source();
        assert_eq!(source.success_rate(), 0.0);

        let now = Utc::now();
        source.record_successful_poll(10.0, 0, now);
        source.record_successful_poll(10.0, 0, now);
        source.record_failed_poll("err", now);
        assert!((source.success_rate() - 66.666).abs() < 0.01);
        assert!((source.failure_rate() - 0.3333).abs() < 0.001);
    }
}
