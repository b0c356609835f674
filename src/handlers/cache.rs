//! Cache management endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::kv::KvHealth;
use crate::cache::manager::CacheReport;
use crate::error::Result;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WarmQuery {
    /// Comma-separated subset of layers; all layers when absent
    pub layers: Option<String>,
}

/// `GET /cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> Result<Json<CacheReport>> {
    Ok(Json(state.cache.report().await))
}

#[derive(Debug, Serialize)]
pub struct CachePerformance {
    pub hit_ratio_percent: f64,
    pub operations_per_second: f64,
    pub uptime_seconds: f64,
    pub recommendations: Vec<String>,
}

/// `GET /cache/performance`
pub async fn cache_performance(State(state): State<AppState>) -> Result<Json<CachePerformance>> {
    let snapshot = state
        .cache
        .analytics()
        .snapshot(state.cache.uptime_seconds());

    let mut recommendations = Vec::new();
    if snapshot.total_hits + snapshot.total_misses == 0 {
        recommendations.push("no reads recorded yet".to_string());
    } else if snapshot.hit_ratio_percent < 50.0 {
        recommendations
            .push("hit ratio below 50%: warm more layers or raise TTLs".to_string());
    }
    if snapshot.total_writes == 0 {
        recommendations.push("no cache writes yet; has a collection run completed?".to_string());
    }

    Ok(Json(CachePerformance {
        hit_ratio_percent: snapshot.hit_ratio_percent,
        operations_per_second: snapshot.operations_per_second,
        uptime_seconds: snapshot.uptime_seconds,
        recommendations,
    }))
}

#[derive(Debug, Serialize)]
pub struct CacheHealthResponse {
    pub engine: KvHealth,
    pub hit_ratio_percent: f64,
    pub status: &'static str,
}

/// `GET /cache/health`
pub async fn cache_health(State(state): State<AppState>) -> Result<Json<CacheHealthResponse>> {
    let engine = state.cache.kv().health_check().await;
    let hit_ratio = state.cache.analytics().hit_ratio();
    let status = if engine.status == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(CacheHealthResponse {
        engine,
        hit_ratio_percent: hit_ratio,
        status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TopSourcesQuery {
    pub limit: Option<usize>,
}

/// `GET /cache/sources/top`: best-performing sources from the L4 cache
pub async fn top_sources(
    State(state): State<AppState>,
    Query(query): Query<TopSourcesQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(10).min(50);
    let sources = state.cache.top_performing_sources(limit).await;
    let count = sources.len();
    Ok(Json(json!({
        "sources": sources,
        "count": count,
    })))
}

/// `POST /cache/warm[?layers=topic,recency]`: start warming in the
/// background and return immediately.
pub async fn warm_cache(
    State(state): State<AppState>,
    Query(query): Query<WarmQuery>,
) -> Result<Json<serde_json::Value>> {
    let layers: Vec<String> = query
        .layers
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let cache = state.cache.clone();
    let spawned_layers = layers.clone();
    tokio::spawn(async move {
        if spawned_layers.is_empty() {
            cache.warm_all().await;
        } else {
            cache.warm_layers(&spawned_layers).await;
        }
    });

    Ok(Json(json!({
        "status": "warming_started",
        "layers": if layers.is_empty() { json!("all") } else { json!(layers) },
    })))
}

/// `GET /cache/warm`: synchronous warm of every layer
pub async fn warm_cache_sync(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let stats = state.cache.warm_all().await;
    Ok(Json(serde_json::to_value(stats).map_err(anyhow::Error::from)?))
}

/// `DELETE /cache/invalidate/{topic}`
pub async fn invalidate_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let invalidated = state.cache.invalidate_topic(&topic).await;
    Ok(Json(json!({
        "topic": topic,
        "invalidated": invalidated,
    })))
}
