//! Article read endpoints

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::TimeBucket;
use crate::error::{AppError, Result};
use crate::models::{Article, ImportanceLevel, Topic};
use crate::store::ArticleFilter;
use crate::AppState;

/// Hard cap on page size
const MAX_LIMIT: i64 = 200;
const DEFAULT_LIMIT: i64 = 50;
/// Body text is truncated in list responses
const CONTENT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ArticlesQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub source: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CachedArticlesQuery {
    pub topic: Option<String>,
    pub time_bucket: Option<String>,
    pub limit: Option<usize>,
}

/// Article projection served by list endpoints
#[derive(Debug, Serialize)]
pub struct ArticleView {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub url: String,
    pub source_name: String,
    pub primary_topic: Option<Topic>,
    pub secondary_topics: Vec<Topic>,
    pub importance_level: ImportanceLevel,
    pub primary_region: Option<String>,
    pub countries_mentioned: Vec<String>,
    pub quality_score: f64,
    pub word_count: i32,
    pub reading_time_minutes: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub source_reliability: i32,
}

impl From<&Article> for ArticleView {
    fn from(article: &Article) -> Self {
        let content = article.content.as_ref().map(|c| {
            if c.chars().count() > CONTENT_PREVIEW_CHARS {
                let head: String = c.chars().take(CONTENT_PREVIEW_CHARS).collect();
                format!("{head}...")
            } else {
                c.clone()
            }
        });

        Self {
            id: article.id,
            title: article.title.clone(),
            content,
            summary: article.summary.clone(),
            url: article.url.clone(),
            source_name: article.source_name.clone(),
            primary_topic: article.primary_topic,
            secondary_topics: article.secondary_topics.clone(),
            importance_level: article.importance_level,
            primary_region: article.primary_region.clone(),
            countries_mentioned: article.countries_mentioned.clone(),
            quality_score: article.quality_score,
            word_count: article.word_count,
            reading_time_minutes: article.reading_time_minutes,
            published_at: article.published_at,
            discovered_at: article.discovered_at,
            source_reliability: article.source_reliability,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArticlesResponse {
    pub articles: Vec<ArticleView>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct CachedArticlesResponse {
    pub articles: Vec<ArticleView>,
    pub source: &'static str,
    pub cache_layer: Option<&'static str>,
}

/// `GET /articles`: filtered listing straight from persistence
pub async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ArticlesQuery>,
) -> Result<Json<ArticlesResponse>> {
    let filter = ArticleFilter {
        category: query.category,
        search: query.search,
        source: query.source,
        limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset: query.offset.unwrap_or(0).max(0),
    };

    let articles = state.articles.list_articles(&filter).await?;
    let views: Vec<ArticleView> = articles.iter().map(ArticleView::from).collect();

    Ok(Json(ArticlesResponse {
        count: views.len(),
        articles: views,
    }))
}

/// `GET /articles/cached`: cache-first read; the response names the layer
/// that answered. A full miss falls back to persistence.
pub async fn cached_articles(
    State(state): State<AppState>,
    Query(query): Query<CachedArticlesQuery>,
) -> Result<Json<CachedArticlesResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT as usize).min(MAX_LIMIT as usize);

    let topic = match &query.topic {
        Some(raw) => Some(raw.parse::<Topic>().map_err(|_| AppError::BadRequest {
            message: format!("unknown topic: {raw}"),
        })?),
        None => None,
    };
    let bucket = match &query.time_bucket {
        Some(raw) => Some(raw.parse::<TimeBucket>().map_err(|_| AppError::BadRequest {
            message: format!("time_bucket must be one of 1h, 6h, 24h (got {raw})"),
        })?),
        None => None,
    };

    let (ids, layer) = state.cache.get_articles_smart(topic, bucket, limit).await;

    if !ids.is_empty() {
        let articles = state.articles.fetch_by_ids(&ids).await?;
        let views: Vec<ArticleView> = articles.iter().map(ArticleView::from).collect();
        return Ok(Json(CachedArticlesResponse {
            articles: views,
            source: "cache_hit",
            cache_layer: layer,
        }));
    }

    // Full miss: persistence answers and the next reader hits the cache
    let filter = ArticleFilter {
        category: topic.map(|t| t.as_str().to_string()),
        limit: limit as i64,
        ..Default::default()
    };
    let articles = state.articles.list_articles(&filter).await?;
    let views: Vec<ArticleView> = articles.iter().map(ArticleView::from).collect();

    Ok(Json(CachedArticlesResponse {
        articles: views,
        source: "cache_miss",
        cache_layer: None,
    }))
}
