//! Task scheduler
//!
//! Drives the pipeline: periodic collection, processing, deduplication, and
//! source health checks, plus on-demand triggers from the API. Job records
//! live in the task-queue Redis under `task:<id>` so the status endpoint can
//! observe them; a retried job keeps its logical id. Jobs of the same kind
//! never overlap, and every run is bounded by a hard deadline.

use chrono::{Datelike, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::cache::kv::run_stats_key;
use crate::cache::{CacheManager, KvCache};
use crate::metrics::MetricsCollector;
use crate::services::collector::FeedCollector;
use crate::services::deduplicator::ArticleDeduplicator;
use crate::services::processor::ContentProcessor;
use crate::store::{ArticleStore, SourceStore};

/// Job record TTL in the queue backend
const JOB_RECORD_TTL: u64 = 86400;
/// Processing batch size for scheduled runs
const PROCESS_BATCH_SIZE: usize = 50;
/// Dedup window for the daily job
const DAILY_DEDUP_WINDOW_DAYS: i64 = 3;

/// Kinds of scheduled and on-demand work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CollectAll,
    ProcessContent,
    Deduplicate,
    HealthCheckSources,
    CollectSingle,
    TriggerSources,
    WarmCache,
    InvalidateTopic,
}

impl JobKind {
    pub const ALL: [JobKind; 8] = [
        JobKind::CollectAll,
        JobKind::ProcessContent,
        JobKind::Deduplicate,
        JobKind::HealthCheckSources,
        JobKind::CollectSingle,
        JobKind::TriggerSources,
        JobKind::WarmCache,
        JobKind::InvalidateTopic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::CollectAll => "collect_all",
            JobKind::ProcessContent => "process_content",
            JobKind::Deduplicate => "deduplicate",
            JobKind::HealthCheckSources => "health_check_sources",
            JobKind::CollectSingle => "collect_single",
            JobKind::TriggerSources => "trigger_sources",
            JobKind::WarmCache => "warm_cache",
            JobKind::InvalidateTopic => "invalidate_topic",
        }
    }
}

/// Lifecycle of a job record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
    Skipped,
}

/// A unit of scheduled work. The id stays stable across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub created_at: chrono::DateTime<Utc>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            payload,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            error_message: None,
            result: None,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minutes between collect-all runs
    pub collect_interval_minutes: u64,
    /// Minutes between process-content runs
    pub process_interval_minutes: u64,
    /// Delay before the post-collection processing pass
    pub post_collect_process_delay: Duration,
    /// UTC hour for the daily dedup job
    pub dedup_hour_utc: u32,
    /// Soft deadline: logged when exceeded
    pub soft_deadline: Duration,
    /// Hard deadline: the job is aborted and recorded as failed
    pub hard_deadline: Duration,
    pub max_retries: u32,
    /// Base for the exponential retry backoff
    pub retry_base_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            collect_interval_minutes: 15,
            process_interval_minutes: 30,
            post_collect_process_delay: Duration::from_secs(300),
            dedup_hour_utc: 2,
            soft_deadline: Duration::from_secs(300),
            hard_deadline: Duration::from_secs(600),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(60),
        }
    }
}

/// Handle for stopping the periodic loops
pub struct SchedulerHandle {
    stop_flag: Arc<RwLock<bool>>,
}

impl SchedulerHandle {
    pub async fn stop(&self) {
        let mut flag = self.stop_flag.write().await;
        *flag = true;
    }
}

/// Orchestrates pipeline jobs
pub struct TaskScheduler {
    config: SchedulerConfig,
    /// Task-queue backend holding job records
    queue: KvCache,
    collector: Arc<FeedCollector>,
    processor: Arc<ContentProcessor>,
    deduplicator: Arc<ArticleDeduplicator>,
    cache: Arc<CacheManager>,
    articles: ArticleStore,
    sources: SourceStore,
    kind_locks: HashMap<JobKind, Arc<Mutex<()>>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        queue: KvCache,
        collector: Arc<FeedCollector>,
        processor: Arc<ContentProcessor>,
        deduplicator: Arc<ArticleDeduplicator>,
        cache: Arc<CacheManager>,
        articles: ArticleStore,
        sources: SourceStore,
    ) -> Self {
        let kind_locks = JobKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(Mutex::new(()))))
            .collect();

        Self {
            config,
            queue,
            collector,
            processor,
            deduplicator,
            cache,
            articles,
            sources,
            kind_locks,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn save_job(&self, job: &Job) {
        let key = format!("task:{}", job.id);
        self.queue.set_json(&key, job, JOB_RECORD_TTL).await;
    }

    /// Look up a job record by id
    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.queue.get_json(&format!("task:{id}")).await
    }

    /// Run a job to completion with per-kind exclusion, deadlines, and
    /// retries. Returns the final record.
    pub async fn run(&self, mut job: Job) -> Job {
        let lock = self
            .kind_locks
            .get(&job.kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())));

        // Same-kind overlap is skipped rather than queued; the next periodic
        // tick will pick the work up again.
        let Ok(_guard) = lock.try_lock() else {
            tracing::info!(kind = job.kind.as_str(), "job of same kind already running, skipping");
            job.status = JobStatus::Skipped;
            job.completed_at = Some(Utc::now());
            self.save_job(&job).await;
            return job;
        };

        loop {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            self.save_job(&job).await;

            let started = std::time::Instant::now();
            let outcome =
                tokio::time::timeout(self.config.hard_deadline, self.execute(&job)).await;
            let elapsed = started.elapsed();

            if elapsed > self.config.soft_deadline {
                tracing::warn!(
                    kind = job.kind.as_str(),
                    job_id = %job.id,
                    seconds = elapsed.as_secs(),
                    "job exceeded soft deadline"
                );
            }

            let error: String = match outcome {
                Ok(Ok(result)) => {
                    job.status = JobStatus::Completed;
                    job.completed_at = Some(Utc::now());
                    job.result = Some(result);
                    job.error_message = None;
                    self.save_job(&job).await;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_job(job.kind.as_str(), "completed");
                    }
                    tracing::info!(
                        kind = job.kind.as_str(),
                        job_id = %job.id,
                        seconds = elapsed.as_secs_f64(),
                        "job completed"
                    );
                    return job;
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => crate::error::AppError::JobTimeout {
                    seconds: self.config.hard_deadline.as_secs(),
                }
                .to_string(),
            };

            if job.retry_count >= job.max_retries {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                job.error_message = Some(error.clone());
                self.save_job(&job).await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_job(job.kind.as_str(), "failed");
                }
                tracing::error!(
                    kind = job.kind.as_str(),
                    job_id = %job.id,
                    retries = job.retry_count,
                    error = %error,
                    "job failed after exhausting retries"
                );
                return job;
            }

            job.retry_count += 1;
            job.status = JobStatus::Retrying;
            job.error_message = Some(error.clone());
            self.save_job(&job).await;

            let backoff = self.config.retry_base_delay * 2u32.pow(job.retry_count.min(5));
            tracing::warn!(
                kind = job.kind.as_str(),
                job_id = %job.id,
                retry = job.retry_count,
                backoff_secs = backoff.as_secs(),
                error = %error,
                "job failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Create, persist, and run a job inline
    pub async fn run_now(&self, kind: JobKind, payload: serde_json::Value) -> Job {
        let job = Job::new(kind, payload, self.config.max_retries);
        self.run(job).await
    }

    /// Spawn a collect-all job in the background, returning its id for the
    /// status endpoint.
    pub fn trigger_collect_all(self: &Arc<Self>) -> Uuid {
        let job = Job::new(JobKind::CollectAll, json!({}), self.config.max_retries);
        let id = job.id;
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.save_job(&job).await;
            scheduler.run(job).await;
        });
        id
    }

    async fn execute(&self, job: &Job) -> anyhow::Result<serde_json::Value> {
        match job.kind {
            JobKind::CollectAll => self.execute_collect_all().await,
            JobKind::ProcessContent => self.execute_process_content().await,
            JobKind::Deduplicate => self.execute_deduplicate().await,
            JobKind::HealthCheckSources => self.execute_health_check().await,
            JobKind::CollectSingle => {
                let source_id = job
                    .payload
                    .get("source_id")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| {
                        crate::error::AppError::Job("collect_single requires source_id".to_string())
                    })?;
                self.execute_collect_single(source_id).await
            }
            JobKind::TriggerSources => {
                let names: Vec<String> = job
                    .payload
                    .get("names")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                self.execute_trigger_sources(&names).await
            }
            JobKind::WarmCache => {
                let layers: Vec<String> = job
                    .payload
                    .get("layers")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                self.execute_warm_cache(&layers).await
            }
            JobKind::InvalidateTopic => {
                let topic = job
                    .payload
                    .get("topic")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        crate::error::AppError::Job("invalidate_topic requires topic".to_string())
                    })?;
                let dropped = self.cache.invalidate_topic(topic).await;
                Ok(json!({ "topic": topic, "invalidated": dropped }))
            }
        }
    }

    /// Collect from all due sources, then run the cache epilogue: run stats
    /// into the KV engine, smart invalidation for the new articles, L1
    /// writes, full warming, and a delayed processing pass.
    async fn execute_collect_all(&self) -> anyhow::Result<serde_json::Value> {
        let run_started = Utc::now();
        let stats = self.collector.collect_all(None).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_articles_collected(stats.articles_collected);
            metrics.record_collection_failures(stats.sources_failed);
        }

        self.cache
            .kv()
            .set_json(&run_stats_key(Utc::now()), &stats, 3600)
            .await;

        if stats.articles_collected > 0 {
            let new_articles = self
                .articles
                .discovered_since(run_started, stats.articles_collected as i64)
                .await
                .unwrap_or_default();

            if !new_articles.is_empty() {
                let invalidation = self.cache.invalidate_for_new_articles(&new_articles).await;
                tracing::info!(
                    topics = invalidation.topics,
                    recency = invalidation.recency,
                    digests = invalidation.digests,
                    "invalidated caches for new articles"
                );

                for article in &new_articles {
                    self.cache.cache_article(article).await;
                }
            }

            self.cache.warm_all().await;
            self.schedule_post_collect_processing();
        }

        Ok(serde_json::to_value(&stats)?)
    }

    /// Processing is re-scheduled shortly after any productive collection so
    /// fresh articles do not wait for the half-hour tick.
    fn schedule_post_collect_processing(&self) {
        let processor = self.processor.clone();
        let cache = self.cache.clone();
        let delay = self.config.post_collect_process_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let stats = processor.process_unprocessed(PROCESS_BATCH_SIZE).await;
            if stats.articles_processed > 0 {
                cache.warm_topic_caches(None).await;
                cache.refresh_source_performance().await;
            }
        });
    }

    async fn execute_process_content(&self) -> anyhow::Result<serde_json::Value> {
        let stats = self.processor.process_unprocessed(PROCESS_BATCH_SIZE).await;

        if stats.articles_processed > 0 {
            self.cache.warm_topic_caches(None).await;
        }
        // Source performance refresh rides the processing cadence
        self.cache.refresh_source_performance().await;

        Ok(serde_json::to_value(&stats)?)
    }

    async fn execute_deduplicate(&self) -> anyhow::Result<serde_json::Value> {
        let hash_stats = self
            .deduplicator
            .deduplicate_by_content_hash(DAILY_DEDUP_WINDOW_DAYS)
            .await;
        let title_stats = self
            .deduplicator
            .deduplicate_by_title_similarity(DAILY_DEDUP_WINDOW_DAYS)
            .await;

        let total_removed = hash_stats.duplicates_removed + title_stats.duplicates_removed;
        if total_removed > 0 {
            // Rows vanished; every derived projection is suspect
            self.cache.warm_all().await;
        }

        Ok(json!({
            "total_duplicates_removed": total_removed,
            "hash_based": hash_stats,
            "title_similarity": title_stats,
        }))
    }

    /// Disable sources that fail hard, log the merely problematic ones, and
    /// refresh the performance cache afterwards.
    async fn execute_health_check(&self) -> anyhow::Result<serde_json::Value> {
        let sources = self.sources.fetch_enabled().await?;

        let mut healthy = 0usize;
        let mut problematic = 0usize;
        let mut disabled = 0usize;

        for source in &sources {
            let failure_rate = source.failure_rate();
            if failure_rate > 0.7 && source.consecutive_failures >= 5 {
                self.sources.set_enabled(source.id, false).await?;
                disabled += 1;
                tracing::warn!(
                    source = %source.name,
                    failure_rate,
                    consecutive_failures = source.consecutive_failures,
                    "disabled failing source"
                );
            } else if failure_rate > 0.5 {
                problematic += 1;
                tracing::info!(source = %source.name, failure_rate, "source is problematic");
            } else {
                healthy += 1;
            }
        }

        self.cache.refresh_source_performance().await;

        Ok(json!({
            "total_sources": sources.len(),
            "healthy_sources": healthy,
            "problematic_sources": problematic,
            "disabled_sources": disabled,
        }))
    }

    async fn execute_collect_single(&self, source_id: i64) -> anyhow::Result<serde_json::Value> {
        let source = self
            .sources
            .fetch_by_id(source_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("source {source_id} not found"))?;

        let outcome = self.collector.collect_from_source(source).await;

        if outcome.articles_collected > 0 {
            if let Ok(Some(updated)) = self.sources.fetch_by_id(source_id).await {
                self.cache.cache_source_performance(&updated).await;
            }
        }

        Ok(serde_json::to_value(&outcome)?)
    }

    async fn execute_trigger_sources(&self, names: &[String]) -> anyhow::Result<serde_json::Value> {
        let run_started = Utc::now();
        let mut outcomes = Vec::new();
        let mut total_collected = 0usize;

        for name in names {
            match self.sources.fetch_by_name(name).await? {
                Some(source) => {
                    let outcome = self.collector.collect_from_source(source).await;
                    total_collected += outcome.articles_collected;
                    outcomes.push(serde_json::to_value(&outcome)?);
                }
                None => {
                    outcomes.push(json!({
                        "source_name": name,
                        "articles_collected": 0,
                        "error": "source not found",
                    }));
                }
            }
        }

        if total_collected > 0 {
            let new_articles = self
                .articles
                .discovered_since(run_started, total_collected as i64)
                .await
                .unwrap_or_default();
            self.cache.invalidate_for_new_articles(&new_articles).await;
            for article in &new_articles {
                self.cache.cache_article(article).await;
            }
        }

        Ok(json!({
            "results": outcomes,
            "total_articles_collected": total_collected,
        }))
    }

    async fn execute_warm_cache(&self, layers: &[String]) -> anyhow::Result<serde_json::Value> {
        if layers.is_empty() {
            let stats = self.cache.warm_all().await;
            Ok(serde_json::to_value(&stats)?)
        } else {
            let results = self.cache.warm_layers(layers).await;
            Ok(json!(results))
        }
    }

    /// Start the periodic loops. Each loop checks the stop flag on every
    /// tick so shutdown never interrupts a running job.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let handle = SchedulerHandle {
            stop_flag: Arc::new(RwLock::new(false)),
        };

        // Collect-all loop
        {
            let scheduler = self.clone();
            let stop_flag = handle.stop_flag.clone();
            let minutes = self.config.collect_interval_minutes;
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(minutes.max(1) * 60));
                interval.tick().await; // immediate first tick consumed
                loop {
                    interval.tick().await;
                    if *stop_flag.read().await {
                        break;
                    }
                    scheduler.run_now(JobKind::CollectAll, json!({})).await;
                }
            });
        }

        // Process-content loop
        {
            let scheduler = self.clone();
            let stop_flag = handle.stop_flag.clone();
            let minutes = self.config.process_interval_minutes;
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(minutes.max(1) * 60));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if *stop_flag.read().await {
                        break;
                    }
                    scheduler.run_now(JobKind::ProcessContent, json!({})).await;
                }
            });
        }

        // Daily dedup at the configured UTC hour
        {
            let scheduler = self.clone();
            let stop_flag = handle.stop_flag.clone();
            let hour = self.config.dedup_hour_utc;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(until_next_utc_hour_of_day(hour)).await;
                    if *stop_flag.read().await {
                        break;
                    }
                    scheduler.run_now(JobKind::Deduplicate, json!({})).await;
                }
            });
        }

        // Hourly health check on the minute
        {
            let scheduler = self.clone();
            let stop_flag = handle.stop_flag.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(until_next_top_of_hour()).await;
                    if *stop_flag.read().await {
                        break;
                    }
                    scheduler
                        .run_now(JobKind::HealthCheckSources, json!({}))
                        .await;
                }
            });
        }

        handle
    }
}

/// Time until the next occurrence of HH:00:00 UTC for the given hour
fn until_next_utc_hour_of_day(hour: u32) -> Duration {
    let now = Utc::now();
    let today = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), hour, 0, 0)
        .single()
        .unwrap_or(now);

    let next = if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(3600))
}

/// Time until the next top of the hour
fn until_next_top_of_hour() -> Duration {
    let now = Utc::now();
    let seconds_into_hour = (now.timestamp() % 3600) as u64;
    Duration::from_secs(3600 - seconds_into_hour)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_record_defaults() {
        let job = Job::new(JobKind::CollectAll, json!({}), 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_job_kind_names() {
        assert_eq!(JobKind::CollectAll.as_str(), "collect_all");
        assert_eq!(JobKind::HealthCheckSources.as_str(), "health_check_sources");
    }

    #[test]
    fn test_job_serialization_round_trip() {
        let job = Job::new(JobKind::ProcessContent, json!({"batch": 50}), 3);
        let raw = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.kind, JobKind::ProcessContent);
        assert_eq!(parsed.payload["batch"], 50);
    }

    #[test]
    fn test_default_deadlines() {
        let config = SchedulerConfig::default();
        assert_eq!(config.soft_deadline, Duration::from_secs(300));
        assert_eq!(config.hard_deadline, Duration::from_secs(600));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.collect_interval_minutes, 15);
        assert_eq!(config.dedup_hour_utc, 2);
    }

    #[test]
    fn test_until_next_top_of_hour_bounds() {
        let wait = until_next_top_of_hour();
        assert!(wait <= Duration::from_secs(3600));
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn test_until_next_utc_hour_bounds() {
        let wait = until_next_utc_hour_of_day(2);
        assert!(wait <= Duration::from_secs(24 * 3600));
    }
}
