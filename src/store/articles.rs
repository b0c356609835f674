//! Article persistence

use crate::error::{AppError, Result};
use crate::models::{Article, NewArticle, Topic};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Insert batch size: small batches keep lock contention on the unique
/// index manageable under concurrent source polls.
const INSERT_BATCH_SIZE: usize = 5;

/// Filters for the read API
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub category: Option<String>,
    pub search: Option<String>,
    pub source: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Per-topic article count
#[derive(Debug, Clone, serde::Serialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: i64,
}

/// Per-source article count
#[derive(Debug, Clone, serde::Serialize)]
pub struct NameCount {
    pub name: String,
    pub count: i64,
}

/// Article store over PostgreSQL
#[derive(Clone)]
pub struct ArticleStore {
    pool: PgPool,
    db_semaphore: Arc<Semaphore>,
}

fn article_from_row(row: &PgRow) -> std::result::Result<Article, sqlx::Error> {
    let primary_topic: Option<String> = row.try_get("primary_topic")?;
    let secondary: Vec<String> = row.try_get("secondary_topics")?;
    let importance: String = row.try_get("importance_level")?;

    Ok(Article {
        id: row.try_get("id")?,
        content_hash: row.try_get("content_hash")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        url: row.try_get("url")?,
        source_name: row.try_get("source_name")?,
        source_url: row.try_get("source_url")?,
        source_reliability: row.try_get("source_reliability")?,
        primary_topic: primary_topic.and_then(|t| t.parse::<Topic>().ok()),
        secondary_topics: secondary
            .iter()
            .filter_map(|t| t.parse::<Topic>().ok())
            .collect(),
        importance_level: importance.parse().unwrap_or_default(),
        primary_region: row.try_get("primary_region")?,
        countries_mentioned: row.try_get("countries_mentioned")?,
        language: row.try_get("language")?,
        word_count: row.try_get("word_count")?,
        reading_time_minutes: row.try_get("reading_time_minutes")?,
        published_at: row.try_get("published_at")?,
        discovered_at: row.try_get("discovered_at")?,
        processed_at: row.try_get("processed_at")?,
        content_processed: row.try_get("content_processed")?,
        summary_generated: row.try_get("summary_generated")?,
        classified: row.try_get("classified")?,
        stock_symbols: row.try_get("stock_symbols")?,
        market_sector: row.try_get("market_sector")?,
        quality_score: row.try_get("quality_score")?,
    })
}

const SELECT_COLUMNS: &str = "id, content_hash, title, content, summary, url, source_name, \
     source_url, source_reliability, primary_topic, secondary_topics, importance_level, \
     primary_region, countries_mentioned, language, word_count, reading_time_minutes, \
     published_at, discovered_at, processed_at, content_processed, summary_generated, \
     classified, stock_symbols, market_sector, quality_score";

impl ArticleStore {
    pub fn new(pool: PgPool, db_semaphore: Arc<Semaphore>) -> Self {
        Self { pool, db_semaphore }
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.db_semaphore
            .acquire()
            .await
            .map_err(|_| AppError::ServiceUnavailable)
    }

    /// Insert extracted articles in small READ COMMITTED transactions.
    /// A unique violation rolls the batch back and retries row by row,
    /// skipping the violating rows. Returns the number actually inserted.
    pub async fn insert_batch(&self, articles: &[NewArticle]) -> Result<usize> {
        let mut inserted = 0;

        for chunk in articles.chunks(INSERT_BATCH_SIZE) {
            let _permit = self.permit().await?;

            let mut tx = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
                .execute(&mut *tx)
                .await?;

            let mut batch_failed = false;
            for article in chunk {
                if let Err(err) = Self::bind_insert(article).execute(&mut *tx).await {
                    if AppError::is_unique_violation(&err) {
                        batch_failed = true;
                        break;
                    }
                    tracing::warn!(error = %err, url = %article.url, "article insert failed");
                    batch_failed = true;
                    break;
                }
            }

            if batch_failed {
                tx.rollback().await?;
                inserted += self.insert_individually(chunk).await?;
            } else {
                tx.commit().await?;
                inserted += chunk.len();
            }
        }

        Ok(inserted)
    }

    async fn insert_individually(&self, articles: &[NewArticle]) -> Result<usize> {
        let mut inserted = 0;
        for article in articles {
            match Self::bind_insert(article).execute(&self.pool).await {
                Ok(_) => inserted += 1,
                Err(err) if AppError::is_unique_violation(&err) => {
                    tracing::debug!(hash = %article.content_hash, "skipping duplicate article");
                }
                Err(err) => {
                    tracing::warn!(error = %err, url = %article.url, "individual insert failed");
                }
            }
        }
        Ok(inserted)
    }

    fn bind_insert(
        article: &NewArticle,
    ) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
        sqlx::query(
            "INSERT INTO articles (content_hash, title, content, summary, url, source_name, \
             source_url, source_reliability, primary_topic, secondary_topics, importance_level, \
             primary_region, language, word_count, reading_time_minutes, published_at, \
             discovered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(&article.content_hash)
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.summary)
        .bind(&article.url)
        .bind(&article.source_name)
        .bind(&article.source_url)
        .bind(article.source_reliability)
        .bind(article.primary_topic.map(|t| t.as_str()))
        .bind(
            article
                .secondary_topics
                .iter()
                .map(|t| t.as_str().to_string())
                .collect::<Vec<_>>(),
        )
        .bind(article.importance_level.as_str())
        .bind(&article.primary_region)
        .bind(&article.language)
        .bind(article.word_count)
        .bind(article.reading_time_minutes)
        .bind(article.published_at)
        .bind(article.discovered_at)
    }

    /// Which of the given fingerprints are already persisted
    pub async fn fetch_fingerprints_in(&self, hashes: &[String]) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let _permit = self.permit().await?;
        let rows = sqlx::query("SELECT content_hash FROM articles WHERE content_hash = ANY($1)")
            .bind(hashes)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("content_hash").ok())
            .collect())
    }

    pub async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<Article>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE content_processed = FALSE \
             ORDER BY discovered_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| article_from_row(r).map_err(AppError::from))
            .collect()
    }

    /// Persist the mutable fields of an already-loaded article
    pub async fn update_article(&self, article: &Article) -> Result<()> {
        let _permit = self.permit().await?;
        Self::bind_update(article).execute(&self.pool).await?;
        Ok(())
    }

    /// Persist a processed batch inside one transaction
    pub async fn update_batch(&self, articles: &[Article]) -> Result<()> {
        if articles.is_empty() {
            return Ok(());
        }
        let _permit = self.permit().await?;
        let mut tx = self.pool.begin().await?;
        for article in articles {
            Self::bind_update(article).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    fn bind_update(
        article: &Article,
    ) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
        sqlx::query(
            "UPDATE articles SET content_hash = $1, summary = $2, primary_topic = $3, \
             secondary_topics = $4, importance_level = $5, countries_mentioned = $6, \
             stock_symbols = $7, market_sector = $8, quality_score = $9, \
             content_processed = $10, summary_generated = $11, classified = $12, \
             processed_at = $13 WHERE id = $14",
        )
        .bind(&article.content_hash)
        .bind(&article.summary)
        .bind(article.primary_topic.map(|t| t.as_str()))
        .bind(
            article
                .secondary_topics
                .iter()
                .map(|t| t.as_str().to_string())
                .collect::<Vec<_>>(),
        )
        .bind(article.importance_level.as_str())
        .bind(&article.countries_mentioned)
        .bind(&article.stock_symbols)
        .bind(&article.market_sector)
        .bind(article.quality_score)
        .bind(article.content_processed)
        .bind(article.summary_generated)
        .bind(article.classified)
        .bind(article.processed_at)
        .bind(article.id)
    }

    pub async fn delete_article(&self, id: i64) -> Result<()> {
        let _permit = self.permit().await?;
        sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Read-API listing with optional category/search/source filters
    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        let _permit = self.permit().await?;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM articles WHERE TRUE"));

        if let Some(category) = &filter.category {
            builder.push(" AND primary_topic = ").push_bind(category);
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{search}%");
            builder
                .push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR content ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(source) = &filter.source {
            builder.push(" AND source_name = ").push_bind(source);
        }

        builder
            .push(" ORDER BY discovered_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| article_from_row(r).map_err(AppError::from))
            .collect()
    }

    pub async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<Article>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut articles: Vec<Article> = rows
            .iter()
            .map(article_from_row)
            .collect::<std::result::Result<_, _>>()?;

        // Preserve the caller's (cache) ordering
        let position = |id: i64| ids.iter().position(|x| *x == id).unwrap_or(usize::MAX);
        articles.sort_by_key(|a| position(a.id));
        Ok(articles)
    }

    /// Ids discovered since the cutoff, newest first
    pub async fn ids_since(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<i64>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(
            "SELECT id FROM articles WHERE discovered_at >= $1 ORDER BY discovered_at DESC LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(|r| r.try_get("id").ok()).collect())
    }

    /// Topic ids discovered since the cutoff, newest first
    pub async fn ids_by_topic_since(
        &self,
        topic: Topic,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(
            "SELECT id FROM articles WHERE primary_topic = $1 AND discovered_at >= $2 \
             ORDER BY discovered_at DESC LIMIT $3",
        )
        .bind(topic.as_str())
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(|r| r.try_get("id").ok()).collect())
    }

    /// Latest topic ids regardless of window (read-through fallback)
    pub async fn ids_by_topic(&self, topic: Topic, limit: i64) -> Result<Vec<i64>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(
            "SELECT id FROM articles WHERE primary_topic = $1 ORDER BY discovered_at DESC LIMIT $2",
        )
        .bind(topic.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(|r| r.try_get("id").ok()).collect())
    }

    /// Most active topics by article count since the cutoff
    pub async fn active_topics(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Topic>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(
            "SELECT primary_topic, COUNT(id) AS count FROM articles \
             WHERE discovered_at >= $1 AND primary_topic IS NOT NULL \
             GROUP BY primary_topic ORDER BY COUNT(id) DESC LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<String, _>("primary_topic").ok())
            .filter_map(|t| t.parse::<Topic>().ok())
            .collect())
    }

    /// Articles discovered inside the dedup window, newest first
    pub async fn recent_articles(&self, cutoff: DateTime<Utc>) -> Result<Vec<Article>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE discovered_at >= $1 \
             ORDER BY discovered_at DESC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| article_from_row(r).map_err(AppError::from))
            .collect()
    }

    /// Fingerprints with more than one row inside the window
    pub async fn duplicate_hash_groups(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(
            "SELECT content_hash FROM articles WHERE discovered_at >= $1 \
             GROUP BY content_hash HAVING COUNT(id) > 1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.try_get("content_hash").ok())
            .collect())
    }

    pub async fn articles_by_hash(&self, content_hash: &str) -> Result<Vec<Article>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE content_hash = $1 \
             ORDER BY discovered_at DESC"
        ))
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| article_from_row(r).map_err(AppError::from))
            .collect()
    }

    /// Rows whose fingerprint was never computed (chunked)
    pub async fn articles_missing_hash(&self, limit: i64) -> Result<Vec<Article>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles \
             WHERE content_hash IS NULL OR content_hash = '' \
             ORDER BY discovered_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| article_from_row(r).map_err(AppError::from))
            .collect()
    }

    pub async fn set_content_hash(&self, id: i64, content_hash: &str) -> Result<()> {
        let _permit = self.permit().await?;
        sqlx::query("UPDATE articles SET content_hash = $1 WHERE id = $2")
            .bind(content_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Aggregates for the /stats endpoint

    pub async fn count_total(&self) -> Result<i64> {
        let _permit = self.permit().await?;
        let row = sqlx::query("SELECT COUNT(id) AS count FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn counts_by_topic(&self) -> Result<Vec<TopicCount>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(
            "SELECT primary_topic, COUNT(id) AS count FROM articles \
             WHERE primary_topic IS NOT NULL GROUP BY primary_topic ORDER BY COUNT(id) DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some(TopicCount {
                    topic: r.try_get("primary_topic").ok()?,
                    count: r.try_get("count").ok()?,
                })
            })
            .collect())
    }

    pub async fn top_sources(&self, limit: i64) -> Result<Vec<NameCount>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(
            "SELECT source_name, COUNT(id) AS count FROM articles \
             GROUP BY source_name ORDER BY COUNT(id) DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some(NameCount {
                    name: r.try_get("source_name").ok()?,
                    count: r.try_get("count").ok()?,
                })
            })
            .collect())
    }

    pub async fn count_since(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        let _permit = self.permit().await?;
        let row = sqlx::query("SELECT COUNT(id) AS count FROM articles WHERE discovered_at >= $1")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Articles discovered at or after the given instant (collect epilogue)
    pub async fn discovered_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Article>> {
        let _permit = self.permit().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE discovered_at >= $1 \
             ORDER BY discovered_at DESC LIMIT $2"
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| article_from_row(r).map_err(AppError::from))
            .collect()
    }
}
