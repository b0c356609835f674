//! Per-source circuit breaker
//!
//! Process-local protection against sources that fail repeatedly inside a
//! run. A tripped source is skipped for the cooldown window; one successful
//! collection resets its counter. This is independent of the persistent
//! reliability/backoff lifecycle on the source row.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct SourceCircuitBreakerConfig {
    /// Consecutive failures before the source is skipped
    pub failure_threshold: u32,
    /// How long a tripped source stays skipped
    pub cooldown: Duration,
}

impl Default for SourceCircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::hours(1),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    tripped_until: Option<DateTime<Utc>>,
}

/// Tracks failure streaks per source id
pub struct SourceCircuitBreaker {
    config: SourceCircuitBreakerConfig,
    states: RwLock<HashMap<i64, BreakerState>>,
}

impl SourceCircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(SourceCircuitBreakerConfig::default())
    }

    pub fn with_config(config: SourceCircuitBreakerConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Whether this source should be skipped right now. A cooldown that has
    /// elapsed re-enables the source and clears its streak.
    pub async fn should_skip(&self, source_id: i64, now: DateTime<Utc>) -> bool {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&source_id) {
            match state.tripped_until {
                Some(until) if now < until => return true,
                Some(_) => {
                    state.tripped_until = None;
                    state.failure_count = 0;
                }
                None => {}
            }
        }
        false
    }

    /// Record a failure; trips the breaker at the threshold.
    pub async fn record_failure(&self, source_id: i64, now: DateTime<Utc>) {
        let mut states = self.states.write().await;
        let state = states.entry(source_id).or_default();
        state.failure_count += 1;

        if state.failure_count >= self.config.failure_threshold {
            state.tripped_until = Some(now + self.config.cooldown);
            tracing::warn!(
                source_id,
                failures = state.failure_count,
                cooldown_minutes = self.config.cooldown.num_minutes(),
                "circuit breaker tripped for source"
            );
        }
    }

    /// Record a success, clearing the streak and any trip.
    pub async fn record_success(&self, source_id: i64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&source_id) {
            state.failure_count = 0;
            state.tripped_until = None;
        }
    }

    /// Number of currently tripped sources (for run stats)
    pub async fn tripped_count(&self, now: DateTime<Utc>) -> usize {
        let states = self.states.read().await;
        states
            .values()
            .filter(|s| s.tripped_until.map(|t| now < t).unwrap_or(false))
            .count()
    }
}

impl Default for SourceCircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = SourceCircuitBreaker::new();
        assert!(!breaker.should_skip(1, Utc::now()).await);
    }

    #[tokio::test]
    async fn test_trips_after_five_failures() {
        let breaker = SourceCircuitBreaker::new();
        let now = Utc::now();

        for _ in 0..4 {
            breaker.record_failure(1, now).await;
        }
        assert!(!breaker.should_skip(1, now).await);

        breaker.record_failure(1, now).await;
        assert!(breaker.should_skip(1, now).await);
        assert_eq!(breaker.tripped_count(now).await, 1);
    }

    #[tokio::test]
    async fn test_cooldown_elapses() {
        let breaker = SourceCircuitBreaker::new();
        let now = Utc::now();

        for _ in 0..5 {
            breaker.record_failure(1, now).await;
        }
        assert!(breaker.should_skip(1, now + Duration::minutes(59)).await);

        // One hour later the source gets another chance
        assert!(!breaker.should_skip(1, now + Duration::minutes(61)).await);
        // And the streak restarts from zero
        breaker.record_failure(1, now).await;
        assert!(!breaker.should_skip(1, now).await);
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let breaker = SourceCircuitBreaker::new();
        let now = Utc::now();

        for _ in 0..4 {
            breaker.record_failure(1, now).await;
        }
        breaker.record_success(1).await;

        for _ in 0..4 {
            breaker.record_failure(1, now).await;
        }
        assert!(!breaker.should_skip(1, now).await);
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let breaker = SourceCircuitBreaker::new();
        let now = Utc::now();

        for _ in 0..5 {
            breaker.record_failure(1, now).await;
        }
        assert!(breaker.should_skip(1, now).await);
        assert!(!breaker.should_skip(2, now).await);
    }
}
