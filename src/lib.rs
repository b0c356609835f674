//! Newswire: news-feed aggregation pipeline
//!
//! Periodically polls syndication feeds, normalizes and deduplicates the
//! extracted items, persists them to PostgreSQL, and serves low-latency
//! reads through a multi-layer Redis cache.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod data;
pub mod database;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use cache::{CacheManager, KvCache, TimeBucket};
pub use config::{AppConfig, CollectorSettings, ConfigError, Environment};
pub use error::{AppError, ErrorResponse, FetchError, Result};
pub use metrics::MetricsCollector;
pub use models::{Article, ImportanceLevel, NewArticle, NewsSource, Topic};
pub use services::{
    ArticleDeduplicator, CollectionStats, CollectorConfig, ContentProcessor, FeedCollector,
    ProcessingStats, SchedulerConfig, SourceCircuitBreaker, TaskScheduler,
};
pub use store::{ArticleStore, SourceStore};

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub redis_pool: deadpool_redis::Pool,
    pub articles: ArticleStore,
    pub sources: SourceStore,
    pub cache: Arc<CacheManager>,
    pub scheduler: Arc<TaskScheduler>,
    pub metrics: Arc<MetricsCollector>,
}

/// Build the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/articles", get(handlers::articles::list_articles))
        .route("/articles/cached", get(handlers::articles::cached_articles))
        .route("/stats", get(handlers::sources::dashboard_stats))
        .route("/sources", get(handlers::sources::list_sources))
        .route("/cache/stats", get(handlers::cache::cache_stats))
        .route("/cache/performance", get(handlers::cache::cache_performance))
        .route("/cache/health", get(handlers::cache::cache_health))
        .route("/cache/sources/top", get(handlers::cache::top_sources))
        .route(
            "/cache/warm",
            post(handlers::cache::warm_cache).get(handlers::cache::warm_cache_sync),
        )
        .route(
            "/cache/invalidate/:topic",
            delete(handlers::cache::invalidate_topic),
        )
        .route("/tasks/rss/trigger", get(handlers::tasks::trigger_collection))
        .route("/tasks/status/:id", get(handlers::tasks::task_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health endpoint probing both backing stores
async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let db_ok = database::db_health_check(&state.db_pool).await.is_ok();
    let redis_ok = database::redis_health_check(&state.redis_pool).await.is_ok();

    let status = if db_ok && redis_ok {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(serde_json::json!({
        "status": status,
        "database": db_ok,
        "cache_engine": redis_ok,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Prometheus scrape endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
