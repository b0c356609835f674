//! Failure-opaque key-value adapter
//!
//! Every operation swallows engine errors and returns the neutral value
//! (None, false, 0, empty) after logging. This boundary isolates the rest of
//! the pipeline from cache-engine outages; callers never branch on cache
//! failure.

use chrono::{DateTime, Duration, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::TimeBucket;

/// Key shapes, stable across versions
pub fn article_key(content_hash: &str) -> String {
    format!("article:{content_hash}")
}

pub fn topic_key(topic: &str) -> String {
    format!("topic:{topic}:articles")
}

pub fn recency_key(bucket: TimeBucket) -> String {
    format!("recency:{bucket}:articles")
}

pub fn source_perf_key(source_id: i64) -> String {
    format!("source_perf:{source_id}")
}

pub fn digest_key(digest_type: &str, at: DateTime<Utc>) -> String {
    format!("digest:{digest_type}:{}", hour_stamp(at))
}

pub fn run_stats_key(at: DateTime<Utc>) -> String {
    format!("rss:stats:{}", hour_stamp(at))
}

/// Hour-resolution stamp used by digest and run-stats keys
pub fn hour_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H").to_string()
}

/// Engine-level health snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct KvHealth {
    pub status: String,
    pub response_time_ms: f64,
    pub error: Option<String>,
}

/// Engine-level analytics snapshot
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct KvAnalytics {
    pub total_keys: usize,
    pub key_counts_by_type: HashMap<String, usize>,
    pub memory_usage: String,
    pub connected_clients: u64,
    pub total_commands_processed: u64,
    pub keyspace_hit_rate_percent: f64,
}

/// Typed operations over the external key-value engine
#[derive(Clone)]
pub struct KvCache {
    pool: Pool,
}

impl KvCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Option<deadpool_redis::Connection> {
        match self.pool.get().await {
            Ok(conn) => Some(conn),
            Err(err) => {
                tracing::warn!(error = %err, "cache connection unavailable");
                None
            }
        }
    }

    // Core operations

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache GET failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.set::<_, _, ()>(key, value).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache SET failed");
                false
            }
        }
    }

    pub async fn setex(&self, key: &str, ttl_seconds: u64, value: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache SETEX failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.del::<_, i64>(key).await {
            Ok(count) => count > 0,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache DELETE failed");
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.exists::<_, bool>(key).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache EXISTS failed");
                false
            }
        }
    }

    pub async fn expire(&self, key: &str, ttl_seconds: i64) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.expire::<_, bool>(key, ttl_seconds).await {
            Ok(set) => set,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache EXPIRE failed");
                false
            }
        }
    }

    pub async fn ttl(&self, key: &str) -> i64 {
        let Some(mut conn) = self.conn().await else {
            return -1;
        };
        match conn.ttl::<_, i64>(key).await {
            Ok(ttl) => ttl,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache TTL failed");
                -1
            }
        }
    }

    // JSON convenience

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.setex(key, ttl_seconds, &json).await,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache JSON encode failed");
                false
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "cache JSON decode failed");
                None
            }
        }
    }

    // List operations

    pub async fn lpush(&self, key: &str, values: &[String]) -> usize {
        if values.is_empty() {
            return 0;
        }
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.lpush::<_, _, i64>(key, values).await {
            Ok(len) => len as usize,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache LPUSH failed");
                0
            }
        }
    }

    pub async fn rpush(&self, key: &str, values: &[String]) -> usize {
        if values.is_empty() {
            return 0;
        }
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.rpush::<_, _, i64>(key, values).await {
            Ok(len) => len as usize,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache RPUSH failed");
                0
            }
        }
    }

    pub async fn lpop(&self, key: &str) -> Option<String> {
        let mut conn = self.conn().await?;
        match conn.lpop::<_, Option<String>>(key, None).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache LPOP failed");
                None
            }
        }
    }

    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> Vec<String> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        match conn.lrange::<_, Vec<String>>(key, start, stop).await {
            Ok(values) => values,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache LRANGE failed");
                Vec::new()
            }
        }
    }

    // Set operations

    pub async fn sadd(&self, key: &str, values: &[String]) -> usize {
        if values.is_empty() {
            return 0;
        }
        let Some(mut conn) = self.conn().await else {
            return 0;
        };
        match conn.sadd::<_, _, i64>(key, values).await {
            Ok(added) => added as usize,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache SADD failed");
                0
            }
        }
    }

    pub async fn smembers(&self, key: &str) -> HashSet<String> {
        let Some(mut conn) = self.conn().await else {
            return HashSet::new();
        };
        match conn.smembers::<_, HashSet<String>>(key).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache SMEMBERS failed");
                HashSet::new()
            }
        }
    }

    // Hash operations

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        match conn.hset::<_, _, _, i64>(key, field, value).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache HSET failed");
                false
            }
        }
    }

    pub async fn hget(&self, key: &str, field: &str) -> Option<String> {
        let mut conn = self.conn().await?;
        match conn.hget::<_, _, Option<String>>(key, field).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache HGET failed");
                None
            }
        }
    }

    pub async fn hgetall(&self, key: &str) -> HashMap<String, String> {
        let Some(mut conn) = self.conn().await else {
            return HashMap::new();
        };
        match conn.hgetall::<_, HashMap<String, String>>(key).await {
            Ok(map) => map,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache HGETALL failed");
                HashMap::new()
            }
        }
    }

    // Namespaced helpers

    /// Replace an id list under the key: delete, push in order, expire.
    pub async fn replace_id_list(&self, key: &str, ids: &[i64], ttl_seconds: u64) -> bool {
        self.delete(key).await;
        if ids.is_empty() {
            return true;
        }
        let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let pushed = self.rpush(key, &values).await;
        if pushed == 0 {
            return false;
        }
        self.expire(key, ttl_seconds as i64).await
    }

    /// Read an id list, ignoring anything that is not an integer
    pub async fn read_id_list(&self, key: &str) -> Vec<i64> {
        self.lrange(key, 0, -1)
            .await
            .iter()
            .filter_map(|raw| raw.parse().ok())
            .collect()
    }

    /// Fetch a digest for the current hour, probing the previous hour before
    /// giving up.
    pub async fn digest_with_fallback(
        &self,
        digest_type: &str,
        now: DateTime<Utc>,
    ) -> Option<serde_json::Value> {
        for hour_offset in [0i64, 1] {
            let key = digest_key(digest_type, now - Duration::hours(hour_offset));
            if let Some(digest) = self.get_json(&key).await {
                return Some(digest);
            }
        }
        None
    }

    // Engine introspection

    /// Count keys per namespace using SCAN (never KEYS on a live engine)
    async fn count_keys(&self, pattern: &str) -> usize {
        let Some(mut conn) = self.conn().await else {
            return 0;
        };

        let mut cursor: u64 = 0;
        let mut total = 0;
        loop {
            let result: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;

            match result {
                Ok((next, keys)) => {
                    total += keys.len();
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(pattern, error = %err, "cache SCAN failed");
                    return total;
                }
            }
        }
        total
    }

    async fn info_map(&self) -> HashMap<String, String> {
        let Some(mut conn) = self.conn().await else {
            return HashMap::new();
        };
        let raw: String = match redis::cmd("INFO").query_async(&mut conn).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "cache INFO failed");
                return HashMap::new();
            }
        };

        raw.lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                Some((key.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    /// Key counts by namespace plus engine stats
    pub async fn analytics(&self) -> KvAnalytics {
        let patterns = [
            ("articles", "article:*"),
            ("topics", "topic:*"),
            ("recency", "recency:*"),
            ("source_perf", "source_perf:*"),
            ("digests", "digest:*"),
            ("rss_stats", "rss:stats:*"),
        ];

        let mut key_counts = HashMap::new();
        let mut total_keys = 0;
        for (name, pattern) in patterns {
            let count = self.count_keys(pattern).await;
            total_keys += count;
            key_counts.insert(name.to_string(), count);
        }

        let info = self.info_map().await;
        let hits: u64 = info
            .get("keyspace_hits")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let misses: u64 = info
            .get("keyspace_misses")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let hit_rate = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64 * 100.0
        } else {
            0.0
        };

        KvAnalytics {
            total_keys,
            key_counts_by_type: key_counts,
            memory_usage: info
                .get("used_memory_human")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            connected_clients: info
                .get("connected_clients")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            total_commands_processed: info
                .get("total_commands_processed")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            keyspace_hit_rate_percent: hit_rate,
        }
    }

    /// Ping the engine and measure latency
    pub async fn health_check(&self) -> KvHealth {
        let start = std::time::Instant::now();
        let Some(mut conn) = self.conn().await else {
            return KvHealth {
                status: "unhealthy".to_string(),
                response_time_ms: 0.0,
                error: Some("connection unavailable".to_string()),
            };
        };

        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => KvHealth {
                status: "healthy".to_string(),
                response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                error: None,
            },
            Err(err) => KvHealth {
                status: "unhealthy".to_string(),
                response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                error: Some(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_shapes_are_stable() {
        assert_eq!(article_key("abc123"), "article:abc123");
        assert_eq!(topic_key("technology"), "topic:technology:articles");
        assert_eq!(recency_key(TimeBucket::OneHour), "recency:1h:articles");
        assert_eq!(source_perf_key(7), "source_perf:7");

        let at = Utc.with_ymd_and_hms(2023, 8, 7, 15, 30, 0).unwrap();
        assert_eq!(digest_key("morning", at), "digest:morning:20230807_15");
        assert_eq!(run_stats_key(at), "rss:stats:20230807_15");
    }

    #[test]
    fn test_hour_stamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 59, 59).unwrap();
        assert_eq!(hour_stamp(at), "20240102_03");
    }
}
