//! Stats and source endpoints

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::NewsSource;
use crate::AppState;

const TOP_SOURCE_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_articles: i64,
    pub topics: HashMap<String, i64>,
    pub top_sources: HashMap<String, i64>,
    pub recent_articles_24h: i64,
}

#[derive(Debug, Serialize)]
pub struct SourceView {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub primary_region: Option<String>,
    pub country_code: Option<String>,
    pub language: String,
    pub enabled: bool,
    pub reliability_score: i32,
    pub success_rate: f64,
    pub is_healthy: bool,
    pub total_articles_collected: i64,
    pub avg_response_time_ms: f64,
    pub consecutive_failures: i32,
    pub last_successful_poll_at: Option<DateTime<Utc>>,
}

impl From<&NewsSource> for SourceView {
    fn from(source: &NewsSource) -> Self {
        Self {
            id: source.id,
            name: source.name.clone(),
            url: source.url.clone(),
            primary_region: source.primary_region.clone(),
            country_code: source.country_code.clone(),
            language: source.language.clone(),
            enabled: source.enabled,
            reliability_score: source.reliability_score,
            success_rate: source.success_rate(),
            is_healthy: source.is_healthy(),
            total_articles_collected: source.total_articles_collected,
            avg_response_time_ms: source.avg_response_time_ms,
            consecutive_failures: source.consecutive_failures,
            last_successful_poll_at: source.last_successful_poll_at,
        }
    }
}

/// `GET /stats`: aggregate dashboard numbers
pub async fn dashboard_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let total_articles = state.articles.count_total().await?;
    let topics = state
        .articles
        .counts_by_topic()
        .await?
        .into_iter()
        .map(|tc| (tc.topic, tc.count))
        .collect();
    let top_sources = state
        .articles
        .top_sources(TOP_SOURCE_LIMIT)
        .await?
        .into_iter()
        .map(|nc| (nc.name, nc.count))
        .collect();
    let recent_articles_24h = state
        .articles
        .count_since(Utc::now() - Duration::hours(24))
        .await?;

    Ok(Json(StatsResponse {
        total_articles,
        topics,
        top_sources,
        recent_articles_24h,
    }))
}

/// `GET /sources`: all sources, most reliable first
pub async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<SourceView>>> {
    let sources = state.sources.fetch_all().await?;
    Ok(Json(sources.iter().map(SourceView::from).collect()))
}
