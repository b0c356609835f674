//! Multi-layer cache coordination
//!
//! Five layers over the KV adapter, each with a TTL, a warming routine, and
//! an invalidation rule:
//!   L1 fingerprint projections, L2 topic id lists, L3 recency buckets,
//!   L4 source performance metrics, L5 hour-keyed digests.
//! The manager owns every derived projection; it is never the source of
//! truth.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use super::kv::{self, KvAnalytics, KvCache};
use super::TimeBucket;
use crate::config::CacheTtlSettings;
use crate::models::{Article, NewsSource, Topic};
use crate::store::{ArticleStore, SourceStore};

/// Topics warmed when no topic has recent activity
const FALLBACK_TOPICS: [Topic; 4] = [
    Topic::Technology,
    Topic::Business,
    Topic::Politics,
    Topic::General,
];

/// Digest types invalidated on ingest
const DIGEST_TYPES: [&str; 2] = ["morning", "evening"];

/// Top-N active topics considered during warming
const ACTIVE_TOPIC_LIMIT: i64 = 15;

/// Cache performance counters
#[derive(Default)]
pub struct CacheAnalytics {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    warmings: AtomicU64,
}

/// Snapshot of the manager-side counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub hit_ratio_percent: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_writes: u64,
    pub total_invalidations: u64,
    pub warming_operations: u64,
    pub uptime_seconds: f64,
    pub operations_per_second: f64,
}

impl CacheAnalytics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warming(&self) {
        self.warmings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        if hits + misses == 0 {
            return 0.0;
        }
        hits as f64 / (hits + misses) as f64 * 100.0
    }

    pub fn snapshot(&self, uptime_seconds: f64) -> AnalyticsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let writes = self.writes.load(Ordering::Relaxed);
        AnalyticsSnapshot {
            hit_ratio_percent: (self.hit_ratio() * 100.0).round() / 100.0,
            total_hits: hits,
            total_misses: misses,
            total_writes: writes,
            total_invalidations: self.invalidations.load(Ordering::Relaxed),
            warming_operations: self.warmings.load(Ordering::Relaxed),
            uptime_seconds,
            operations_per_second: (hits + misses + writes) as f64 / uptime_seconds.max(1.0),
        }
    }
}

/// L1 projection stored per fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleCacheEntry {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source_name: String,
    pub primary_topic: Option<Topic>,
    pub discovered_at: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
}

/// L4 projection stored per source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePerfEntry {
    pub source_id: i64,
    pub reliability_score: i32,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub total_articles_collected: i64,
    pub consecutive_failures: i32,
    pub last_successful_poll_at: Option<DateTime<Utc>>,
    pub is_healthy: bool,
    pub cached_at: DateTime<Utc>,
}

/// Keys dropped by smart invalidation
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvalidationStats {
    pub topics: usize,
    pub recency: usize,
    pub digests: usize,
}

/// One warm_all pass across layers
#[derive(Debug, Clone, Serialize)]
pub struct WarmingStats {
    pub status: String,
    pub topic_warming: HashMap<String, usize>,
    pub recency_warming: HashMap<String, usize>,
    pub sources_cached: usize,
    pub warming_time_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// Fused analytics payload for the API
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub manager_stats: AnalyticsSnapshot,
    pub kv_stats: KvAnalytics,
    pub cache_config: CacheConfigReport,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfigReport {
    pub content_hash_ttl: u64,
    pub topic_cache_ttl: u64,
    pub recency_cache_ttl: u64,
    pub source_perf_ttl: u64,
    pub digest_cache_ttl: u64,
    pub max_articles_per_cache: usize,
}

/// Coordinates the five cache layers
pub struct CacheManager {
    kv: KvCache,
    articles: ArticleStore,
    sources: SourceStore,
    config: CacheTtlSettings,
    analytics: CacheAnalytics,
    warming_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    started: Instant,
}

impl CacheManager {
    pub fn new(
        kv: KvCache,
        articles: ArticleStore,
        sources: SourceStore,
        config: CacheTtlSettings,
    ) -> Self {
        Self {
            kv,
            articles,
            sources,
            config,
            analytics: CacheAnalytics::default(),
            warming_locks: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    pub fn kv(&self) -> &KvCache {
        &self.kv
    }

    /// One mutex per warming layer so the same layer never warms twice at
    /// once while different layers proceed in parallel.
    async fn warming_lock(&self, layer: &str) -> Arc<Mutex<()>> {
        let mut locks = self.warming_locks.lock().await;
        locks
            .entry(layer.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // L1: fingerprint cache

    pub async fn cache_article(&self, article: &Article) -> bool {
        let entry = ArticleCacheEntry {
            id: article.id,
            title: article.title.clone(),
            url: article.url.clone(),
            source_name: article.source_name.clone(),
            primary_topic: article.primary_topic,
            discovered_at: article.discovered_at,
            cached_at: Utc::now(),
        };

        let ok = self
            .kv
            .set_json(
                &kv::article_key(&article.content_hash),
                &entry,
                self.config.content_hash_ttl,
            )
            .await;
        if ok {
            self.analytics.record_write();
        }
        ok
    }

    pub async fn article_by_hash(&self, content_hash: &str) -> Option<ArticleCacheEntry> {
        let entry = self
            .kv
            .get_json::<ArticleCacheEntry>(&kv::article_key(content_hash))
            .await;
        match &entry {
            Some(_) => self.analytics.record_hit(),
            None => self.analytics.record_miss(),
        }
        entry
    }

    // L2: topic cache

    pub async fn warm_topic_caches(
        &self,
        priority_topics: Option<Vec<Topic>>,
    ) -> HashMap<String, usize> {
        let lock = self.warming_lock("topic_warming").await;
        let _guard = lock.lock().await;
        self.analytics.record_warming();

        let topics = match priority_topics {
            Some(topics) if !topics.is_empty() => topics,
            _ => self.active_topics().await,
        };

        let cutoff = Utc::now() - Duration::hours(6);
        let mut results = HashMap::new();

        for topic in topics {
            let ids = match self
                .articles
                .ids_by_topic_since(topic, cutoff, self.config.max_articles_per_cache as i64)
                .await
            {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!(topic = %topic, error = %err, "topic warming query failed");
                    results.insert(topic.as_str().to_string(), 0);
                    continue;
                }
            };

            if !ids.is_empty() {
                self.kv
                    .replace_id_list(
                        &kv::topic_key(topic.as_str()),
                        &ids,
                        self.config.topic_cache_ttl,
                    )
                    .await;
                self.analytics.record_write();
            }
            results.insert(topic.as_str().to_string(), ids.len());
        }

        tracing::info!(layers = ?results, "warmed topic caches");
        results
    }

    async fn active_topics(&self) -> Vec<Topic> {
        let cutoff = Utc::now() - Duration::hours(24);
        match self.articles.active_topics(cutoff, ACTIVE_TOPIC_LIMIT).await {
            Ok(topics) if !topics.is_empty() => topics,
            Ok(_) => FALLBACK_TOPICS.to_vec(),
            Err(err) => {
                tracing::warn!(error = %err, "active topic query failed, using fallback");
                FALLBACK_TOPICS.to_vec()
            }
        }
    }

    /// Read-through topic lookup: cache first, then persistence with a
    /// write-back so the next reader hits.
    pub async fn articles_by_topic(&self, topic: Topic, limit: usize) -> Vec<i64> {
        let cached = self.kv.read_id_list(&kv::topic_key(topic.as_str())).await;
        if !cached.is_empty() {
            self.analytics.record_hit();
            return cached.into_iter().take(limit).collect();
        }
        self.analytics.record_miss();

        match self.articles.ids_by_topic(topic, limit as i64).await {
            Ok(ids) => {
                if !ids.is_empty() {
                    self.kv
                        .replace_id_list(
                            &kv::topic_key(topic.as_str()),
                            &ids,
                            self.config.topic_cache_ttl,
                        )
                        .await;
                    self.analytics.record_write();
                }
                ids
            }
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "topic fallback query failed");
                Vec::new()
            }
        }
    }

    // L3: recency cache

    pub async fn warm_recency_caches(&self) -> HashMap<String, usize> {
        let lock = self.warming_lock("recency_warming").await;
        let _guard = lock.lock().await;
        self.analytics.record_warming();

        let now = Utc::now();
        let mut results = HashMap::new();

        for bucket in TimeBucket::ALL {
            let cutoff = now - Duration::hours(bucket.hours());
            let ids = match self
                .articles
                .ids_since(cutoff, self.config.max_articles_per_cache as i64)
                .await
            {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!(bucket = %bucket, error = %err, "recency warming query failed");
                    results.insert(bucket.as_str().to_string(), 0);
                    continue;
                }
            };

            let ok = self
                .kv
                .replace_id_list(&kv::recency_key(bucket), &ids, self.config.recency_cache_ttl)
                .await;
            if ok {
                self.analytics.record_write();
            }
            results.insert(bucket.as_str().to_string(), ids.len());
        }

        tracing::info!(layers = ?results, "warmed recency caches");
        results
    }

    pub async fn articles_by_recency(&self, bucket: TimeBucket, limit: usize) -> Vec<i64> {
        let cached = self.kv.read_id_list(&kv::recency_key(bucket)).await;
        if cached.is_empty() {
            self.analytics.record_miss();
            return Vec::new();
        }
        self.analytics.record_hit();
        cached.into_iter().take(limit).collect()
    }

    // L4: source performance cache

    fn source_perf_entry(source: &NewsSource) -> SourcePerfEntry {
        SourcePerfEntry {
            source_id: source.id,
            reliability_score: source.reliability_score,
            success_rate: source.success_rate(),
            avg_response_time_ms: source.avg_response_time_ms,
            total_articles_collected: source.total_articles_collected,
            consecutive_failures: source.consecutive_failures,
            last_successful_poll_at: source.last_successful_poll_at,
            is_healthy: source.is_healthy(),
            cached_at: Utc::now(),
        }
    }

    /// Refresh L4 for every enabled source
    pub async fn refresh_source_performance(&self) -> usize {
        let lock = self.warming_lock("source_perf_warming").await;
        let _guard = lock.lock().await;
        self.analytics.record_warming();

        let sources = match self.sources.fetch_enabled().await {
            Ok(sources) => sources,
            Err(err) => {
                tracing::warn!(error = %err, "source performance refresh query failed");
                return 0;
            }
        };

        let mut cached = 0;
        for source in &sources {
            if self.cache_source_performance(source).await {
                cached += 1;
            }
        }

        tracing::info!(sources = cached, "cached source performance metrics");
        cached
    }

    /// Write one source's metrics (called after a successful collection)
    pub async fn cache_source_performance(&self, source: &NewsSource) -> bool {
        let ok = self
            .kv
            .set_json(
                &kv::source_perf_key(source.id),
                &Self::source_perf_entry(source),
                self.config.source_perf_ttl,
            )
            .await;
        if ok {
            self.analytics.record_write();
        }
        ok
    }

    pub async fn source_performance(&self, source_id: i64) -> Option<SourcePerfEntry> {
        let entry = self
            .kv
            .get_json::<SourcePerfEntry>(&kv::source_perf_key(source_id))
            .await;
        match &entry {
            Some(_) => self.analytics.record_hit(),
            None => self.analytics.record_miss(),
        }
        entry
    }

    /// Best-performing sources from L4, reliability descending
    pub async fn top_performing_sources(&self, limit: usize) -> Vec<SourcePerfEntry> {
        let sources = match self.sources.fetch_enabled().await {
            Ok(sources) => sources,
            Err(err) => {
                tracing::warn!(error = %err, "top source query failed");
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for source in sources.iter().take(limit * 2) {
            if let Some(entry) = self.source_performance(source.id).await {
                entries.push(entry);
                if entries.len() >= limit {
                    break;
                }
            }
        }

        entries.sort_by(|a, b| b.reliability_score.cmp(&a.reliability_score));
        entries.truncate(limit);
        entries
    }

    // L5: digest cache

    pub async fn cache_digest(&self, digest_type: &str, mut content: serde_json::Value) -> bool {
        if let Some(map) = content.as_object_mut() {
            map.insert(
                "generated_at".to_string(),
                serde_json::json!(Utc::now().to_rfc3339()),
            );
            map.insert("digest_type".to_string(), serde_json::json!(digest_type));
        }

        let ok = self
            .kv
            .set_json(
                &kv::digest_key(digest_type, Utc::now()),
                &content,
                self.config.digest_cache_ttl,
            )
            .await;
        if ok {
            self.analytics.record_write();
        }
        ok
    }

    pub async fn digest(&self, digest_type: &str) -> Option<serde_json::Value> {
        let digest = self.kv.digest_with_fallback(digest_type, Utc::now()).await;
        match &digest {
            Some(_) => self.analytics.record_hit(),
            None => self.analytics.record_miss(),
        }
        digest
    }

    // Invalidation and warming coordination

    /// Smart invalidation when new articles land: drop the touched topic
    /// lists, every recency bucket, and the current hour's digests.
    pub async fn invalidate_for_new_articles(&self, articles: &[Article]) -> InvalidationStats {
        let mut stats = InvalidationStats::default();

        let mut touched_topics: Vec<Topic> = Vec::new();
        for article in articles {
            if let Some(topic) = article.primary_topic {
                if !touched_topics.contains(&topic) {
                    touched_topics.push(topic);
                }
            }
        }

        for topic in touched_topics {
            if self.kv.delete(&kv::topic_key(topic.as_str())).await {
                stats.topics += 1;
                self.analytics.record_invalidation();
            }
        }

        for bucket in TimeBucket::ALL {
            if self.kv.delete(&kv::recency_key(bucket)).await {
                stats.recency += 1;
                self.analytics.record_invalidation();
            }
        }

        let now = Utc::now();
        for digest_type in DIGEST_TYPES {
            if self.kv.delete(&kv::digest_key(digest_type, now)).await {
                stats.digests += 1;
                self.analytics.record_invalidation();
            }
        }

        tracing::info!(
            topics = stats.topics,
            recency = stats.recency,
            digests = stats.digests,
            "smart invalidation completed"
        );
        stats
    }

    pub async fn invalidate_topic(&self, topic: &str) -> bool {
        let dropped = self.kv.delete(&kv::topic_key(topic)).await;
        if dropped {
            self.analytics.record_invalidation();
        }
        dropped
    }

    /// Warm every layer; different layers run in parallel.
    pub async fn warm_all(&self) -> WarmingStats {
        let start = Instant::now();

        let (topic_warming, recency_warming, sources_cached) = tokio::join!(
            self.warm_topic_caches(None),
            self.warm_recency_caches(),
            self.refresh_source_performance(),
        );

        let stats = WarmingStats {
            status: "completed".to_string(),
            topic_warming,
            recency_warming,
            sources_cached,
            warming_time_seconds: start.elapsed().as_secs_f64(),
            timestamp: Utc::now(),
        };

        tracing::info!(
            seconds = stats.warming_time_seconds,
            "cache warming completed"
        );
        stats
    }

    /// Warm an explicit subset of layers by name
    pub async fn warm_layers(&self, layers: &[String]) -> HashMap<String, serde_json::Value> {
        let mut results = HashMap::new();
        for layer in layers {
            match layer.as_str() {
                "topic" | "topics" => {
                    let warmed = self.warm_topic_caches(None).await;
                    results.insert("topic".to_string(), serde_json::json!(warmed));
                }
                "recency" => {
                    let warmed = self.warm_recency_caches().await;
                    results.insert("recency".to_string(), serde_json::json!(warmed));
                }
                "source_performance" | "sources" => {
                    let cached = self.refresh_source_performance().await;
                    results.insert("source_performance".to_string(), serde_json::json!(cached));
                }
                other => {
                    results.insert(other.to_string(), serde_json::json!("unknown layer"));
                }
            }
        }
        results
    }

    /// Multi-layer read: recency first when a bucket is given, then topic.
    /// Returns the ids and the layer that answered; empty on a full miss so
    /// callers decide whether to hit persistence.
    pub async fn get_articles_smart(
        &self,
        topic: Option<Topic>,
        bucket: Option<TimeBucket>,
        limit: usize,
    ) -> (Vec<i64>, Option<&'static str>) {
        if let Some(bucket) = bucket {
            let ids = self.articles_by_recency(bucket, limit).await;
            if !ids.is_empty() {
                return (ids, Some("recency"));
            }
        }

        if let Some(topic) = topic {
            let ids = self.articles_by_topic(topic, limit).await;
            if !ids.is_empty() {
                return (ids, Some("topic"));
            }
        }

        (Vec::new(), None)
    }

    pub fn analytics(&self) -> &CacheAnalytics {
        &self.analytics
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Manager counters fused with the engine's own view
    pub async fn report(&self) -> CacheReport {
        CacheReport {
            manager_stats: self.analytics.snapshot(self.uptime_seconds()),
            kv_stats: self.kv.analytics().await,
            cache_config: CacheConfigReport {
                content_hash_ttl: self.config.content_hash_ttl,
                topic_cache_ttl: self.config.topic_cache_ttl,
                recency_cache_ttl: self.config.recency_cache_ttl,
                source_perf_ttl: self.config.source_perf_ttl,
                digest_cache_ttl: self.config.digest_cache_ttl,
                max_articles_per_cache: self.config.max_articles_per_cache,
            },
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytics_hit_ratio() {
        let analytics = CacheAnalytics::default();
        assert_eq!(analytics.hit_ratio(), 0.0);

        analytics.record_hit();
        analytics.record_hit();
        analytics.record_hit();
        analytics.record_miss();
        assert!((analytics.hit_ratio() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_analytics_snapshot_counts() {
        let analytics = CacheAnalytics::default();
        analytics.record_hit();
        analytics.record_miss();
        analytics.record_write();
        analytics.record_invalidation();
        analytics.record_warming();

        let snapshot = analytics.snapshot(10.0);
        assert_eq!(snapshot.total_hits, 1);
        assert_eq!(snapshot.total_misses, 1);
        assert_eq!(snapshot.total_writes, 1);
        assert_eq!(snapshot.total_invalidations, 1);
        assert_eq!(snapshot.warming_operations, 1);
        assert!((snapshot.operations_per_second - 0.3).abs() < f64::EPSILON);
    }
}
