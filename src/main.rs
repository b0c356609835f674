//! Service entry point: configuration, pools, pipeline services, scheduler,
//! and the HTTP read API.

use std::sync::Arc;

use newswire::services::scheduler::SchedulerConfig;
use newswire::{
    config::AppConfig, create_router, database, AppState, ArticleDeduplicator, ArticleStore,
    CacheManager, CollectorConfig, ContentProcessor, FeedCollector, KvCache, MetricsCollector,
    SourceCircuitBreaker, SourceStore, TaskScheduler,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        environment = ?config.environment,
        "starting newswire aggregation pipeline"
    );

    // Backing stores
    let db_pool = database::create_pool(&config.database).await?;
    database::run_migrations(&db_pool).await?;
    let redis_pool = database::create_redis_pool(&config.redis.url, config.redis.max_size)?;
    let broker_pool = if config.redis.broker_url == config.redis.url {
        redis_pool.clone()
    } else {
        database::create_redis_pool(&config.redis.broker_url, config.redis.max_size)?
    };

    let db_semaphore = newswire::store::db_semaphore();
    let articles = ArticleStore::new(db_pool.clone(), db_semaphore.clone());
    let sources = SourceStore::new(db_pool.clone(), db_semaphore);

    // Cache layers
    let kv = KvCache::new(redis_pool.clone());
    let cache = Arc::new(CacheManager::new(
        kv,
        articles.clone(),
        sources.clone(),
        config.cache.clone(),
    ));

    // Pipeline services
    let breaker = Arc::new(SourceCircuitBreaker::new());
    let collector_config = CollectorConfig {
        max_concurrent: config.collector.concurrent_requests,
        max_articles_per_feed: config.collector.max_articles_per_feed,
        ..Default::default()
    };
    let collector = Arc::new(FeedCollector::new(
        collector_config,
        articles.clone(),
        sources.clone(),
        breaker,
    )?);
    let deduplicator = Arc::new(ArticleDeduplicator::new(articles.clone()));
    let processor = Arc::new(ContentProcessor::new(
        articles.clone(),
        deduplicator.clone(),
    ));

    let metrics = Arc::new(MetricsCollector::new()?);

    // Scheduler drives the pipeline
    let scheduler_config = SchedulerConfig {
        collect_interval_minutes: config.collector.poll_interval_minutes,
        ..Default::default()
    };
    let scheduler = Arc::new(
        TaskScheduler::new(
            scheduler_config,
            KvCache::new(broker_pool),
            collector,
            processor,
            deduplicator,
            cache.clone(),
            articles.clone(),
            sources.clone(),
        )
        .with_metrics(metrics.clone()),
    );
    let _scheduler_handle = scheduler.clone().start();
    tracing::info!("task scheduler started");

    // HTTP read API
    let state = AppState {
        db_pool,
        redis_pool,
        articles,
        sources,
        cache,
        scheduler,
        metrics,
    };
    let router = create_router(state);

    let bind_address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "read API listening");

    axum::serve(listener, router).await?;
    Ok(())
}
