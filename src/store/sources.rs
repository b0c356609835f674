//! News source persistence

use crate::error::{AppError, Result};
use crate::models::NewsSource;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

const SELECT_COLUMNS: &str = "id, name, url, primary_region, country_code, language, enabled, \
     reliability_score, poll_interval_minutes, max_articles_per_poll, topics, last_poll_at, \
     last_successful_poll_at, next_poll_at, last_etag, last_modified, total_polls, \
     successful_polls, failed_polls, total_articles_collected, avg_response_time_ms, \
     last_response_time_ms, consecutive_failures, last_error_message, last_error_at, \
     custom_headers";

fn source_from_row(row: &PgRow) -> std::result::Result<NewsSource, sqlx::Error> {
    let headers: serde_json::Value = row.try_get("custom_headers")?;
    let custom_headers: HashMap<String, String> =
        serde_json::from_value(headers).unwrap_or_default();

    Ok(NewsSource {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        primary_region: row.try_get("primary_region")?,
        country_code: row.try_get("country_code")?,
        language: row.try_get("language")?,
        enabled: row.try_get("enabled")?,
        reliability_score: row.try_get("reliability_score")?,
        poll_interval_minutes: row.try_get("poll_interval_minutes")?,
        max_articles_per_poll: row.try_get("max_articles_per_poll")?,
        topics: row.try_get("topics")?,
        last_poll_at: row.try_get("last_poll_at")?,
        last_successful_poll_at: row.try_get("last_successful_poll_at")?,
        next_poll_at: row.try_get("next_poll_at")?,
        last_etag: row.try_get("last_etag")?,
        last_modified: row.try_get("last_modified")?,
        total_polls: row.try_get("total_polls")?,
        successful_polls: row.try_get("successful_polls")?,
        failed_polls: row.try_get("failed_polls")?,
        total_articles_collected: row.try_get("total_articles_collected")?,
        avg_response_time_ms: row.try_get("avg_response_time_ms")?,
        last_response_time_ms: row.try_get("last_response_time_ms")?,
        consecutive_failures: row.try_get("consecutive_failures")?,
        last_error_message: row.try_get("last_error_message")?,
        last_error_at: row.try_get("last_error_at")?,
        custom_headers,
    })
}

/// Source store over PostgreSQL
#[derive(Clone)]
pub struct SourceStore {
    pool: PgPool,
    db_semaphore: Arc<Semaphore>,
}

impl SourceStore {
    pub fn new(pool: PgPool, db_semaphore: Arc<Semaphore>) -> Self {
        Self { pool, db_semaphore }
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.db_semaphore
            .acquire()
            .await
            .map_err(|_| AppError::ServiceUnavailable)
    }

    /// Sources due for polling, most reliable first. A source that was never
    /// scheduled (no next_poll_at yet) counts as due.
    pub async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<NewsSource>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM news_sources \
             WHERE enabled = TRUE AND (next_poll_at IS NULL OR next_poll_at <= $1) \
             ORDER BY reliability_score DESC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| source_from_row(r).map_err(AppError::from))
            .collect()
    }

    pub async fn fetch_by_id(&self, id: i64) -> Result<Option<NewsSource>> {
        let _permit = self.permit().await?;
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM news_sources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(|r| source_from_row(r).map_err(AppError::from))
            .transpose()
    }

    pub async fn fetch_by_name(&self, name: &str) -> Result<Option<NewsSource>> {
        let _permit = self.permit().await?;
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM news_sources WHERE name = $1 LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(|r| source_from_row(r).map_err(AppError::from))
            .transpose()
    }

    pub async fn fetch_enabled(&self) -> Result<Vec<NewsSource>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM news_sources WHERE enabled = TRUE \
             ORDER BY reliability_score DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| source_from_row(r).map_err(AppError::from))
            .collect()
    }

    /// All sources, most reliable first (the /sources endpoint)
    pub async fn fetch_all(&self) -> Result<Vec<NewsSource>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM news_sources ORDER BY reliability_score DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| source_from_row(r).map_err(AppError::from))
            .collect()
    }

    /// Write back the dynamic poll state of a source. The source row is the
    /// single writer for its own counters, so this is a plain last-write.
    pub async fn update_poll_state(&self, source: &NewsSource) -> Result<()> {
        let _permit = self.permit().await?;
        sqlx::query(
            "UPDATE news_sources SET enabled = $1, reliability_score = $2, last_poll_at = $3, \
             last_successful_poll_at = $4, next_poll_at = $5, last_etag = $6, last_modified = $7, \
             total_polls = $8, successful_polls = $9, failed_polls = $10, \
             total_articles_collected = $11, avg_response_time_ms = $12, \
             last_response_time_ms = $13, consecutive_failures = $14, last_error_message = $15, \
             last_error_at = $16 WHERE id = $17",
        )
        .bind(source.enabled)
        .bind(source.reliability_score)
        .bind(source.last_poll_at)
        .bind(source.last_successful_poll_at)
        .bind(source.next_poll_at)
        .bind(&source.last_etag)
        .bind(&source.last_modified)
        .bind(source.total_polls)
        .bind(source.successful_polls)
        .bind(source.failed_polls)
        .bind(source.total_articles_collected)
        .bind(source.avg_response_time_ms)
        .bind(source.last_response_time_ms)
        .bind(source.consecutive_failures)
        .bind(&source.last_error_message)
        .bind(source.last_error_at)
        .bind(source.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let _permit = self.permit().await?;
        sqlx::query("UPDATE news_sources SET enabled = $1 WHERE id = $2")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
