//! Feed collector
//!
//! Polls every source due for collection, bounded by a worker semaphore.
//! Each source walks a fixed state machine: fetch (with conditional request
//! headers and retry), parse, extract, dedupe against persisted
//! fingerprints, insert in small transactions, then record counters. A
//! failure at any step is captured in the per-source outcome; one source
//! never takes down the run.

use chrono::Utc;
use feed_rs::parser;
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{AppError, FetchError, Result};
use crate::models::{NewArticle, NewsSource};
use crate::services::circuit_breaker::SourceCircuitBreaker;
use crate::services::extract;
use crate::store::{ArticleStore, SourceStore};

/// Collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Concurrent source fetches
    pub max_concurrent: usize,
    /// Fetch attempts per source per run
    pub max_attempts: u32,
    /// Total per-request budget
    pub request_timeout: Duration,
    /// Connect budget
    pub connect_timeout: Duration,
    /// Fallback cap on entries per feed when the source has none
    pub max_articles_per_feed: usize,
    pub user_agent: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_attempts: 3,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(20),
            max_articles_per_feed: 20,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Outcome of polling one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source_name: String,
    pub articles_collected: usize,
    pub total_entries: usize,
    pub response_time_ms: f64,
    pub error: Option<String>,
}

/// Totals for one collection run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub articles_collected: usize,
    pub processing_time_seconds: f64,
    pub circuit_breaker_skipped: usize,
    pub outcomes: Vec<SourceOutcome>,
}

/// What a fetch produced
pub enum FetchOutcome {
    /// 304: nothing changed since the cached validators
    NotModified,
    Body {
        text: String,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

/// HTTP side of collection: conditional requests, retry with exponential
/// backoff, decompression. Separated from persistence so the wire behavior
/// tests against a mock server.
pub struct FeedFetcher {
    config: CollectorConfig,
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "application/rss+xml, application/xml, text/xml, text/html, */*",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        // Accept-Encoding (gzip, deflate, br) is added by the client itself;
        // setting it manually would turn automatic decompression off.

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, client })
    }

    /// Fetch with retry. 304 short-circuits to NotModified; 403/404 are
    /// terminal for this run; everything else backs off 2^attempt seconds.
    pub async fn fetch(&self, source: &NewsSource) -> std::result::Result<FetchOutcome, FetchError> {
        let mut last_error = FetchError::Timeout;

        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                tracing::debug!(
                    source = %source.name,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    "retrying fetch"
                );
                tokio::time::sleep(backoff).await;
            }

            match self.fetch_once(source).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    async fn fetch_once(
        &self,
        source: &NewsSource,
    ) -> std::result::Result<FetchOutcome, FetchError> {
        let mut request = self.client.get(&source.url);

        if let Some(etag) = &source.last_etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        if let Some(modified) = &source.last_modified {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, modified);
        }
        for (name, value) in &source.custom_headers {
            if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
            {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(FetchError::from_reqwest)?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let etag = header_string(&response, reqwest::header::ETAG);
                let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);
                let text = response.text().await.map_err(FetchError::from_reqwest)?;
                Ok(FetchOutcome::Body {
                    text,
                    etag,
                    last_modified,
                })
            }
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            other => Err(FetchError::Http {
                status: other.as_u16(),
            }),
        }
    }
}

fn header_string(response: &reqwest::Response, name: HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Concurrent feed collector
pub struct FeedCollector {
    config: CollectorConfig,
    fetcher: FeedFetcher,
    articles: ArticleStore,
    sources: SourceStore,
    breaker: Arc<SourceCircuitBreaker>,
}

impl FeedCollector {
    pub fn new(
        config: CollectorConfig,
        articles: ArticleStore,
        sources: SourceStore,
        breaker: Arc<SourceCircuitBreaker>,
    ) -> Result<Self> {
        let fetcher = FeedFetcher::new(config.clone())?;
        Ok(Self {
            config,
            fetcher,
            articles,
            sources,
            breaker,
        })
    }

    /// Poll every source due for collection. Never fails; partial success is
    /// the normal case.
    pub async fn collect_all(&self, max_concurrent: Option<usize>) -> CollectionStats {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let max_concurrent = max_concurrent.unwrap_or(self.config.max_concurrent).max(1);

        let due = match self.sources.fetch_due(now).await {
            Ok(sources) => sources,
            Err(err) => {
                tracing::error!(error = %err, "failed to query sources due for polling");
                return CollectionStats::default();
            }
        };
        tracing::info!(count = due.len(), "sources due for polling");

        if due.is_empty() {
            return CollectionStats::default();
        }

        let mut active = Vec::new();
        let mut skipped = 0;
        for source in due {
            if self.breaker.should_skip(source.id, now).await {
                skipped += 1;
            } else {
                active.push(source);
            }
        }
        if skipped > 0 {
            tracing::info!(skipped, "circuit breaker skipped sources");
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let tasks = active.into_iter().map(|source| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await;
                self.collect_from_source(source).await
            }
        });
        let outcomes = join_all(tasks).await;

        let mut stats = CollectionStats {
            circuit_breaker_skipped: skipped,
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome.error.is_some() {
                stats.sources_failed += 1;
            } else {
                stats.sources_processed += 1;
            }
            stats.articles_collected += outcome.articles_collected;
            stats.outcomes.push(outcome);
        }
        stats.processing_time_seconds = started.elapsed().as_secs_f64();

        tracing::info!(
            sources_processed = stats.sources_processed,
            sources_failed = stats.sources_failed,
            articles = stats.articles_collected,
            seconds = stats.processing_time_seconds,
            "collection run completed"
        );
        stats
    }

    /// Poll a single source end to end, recording success or failure on the
    /// source row and in the circuit breaker. Counters are written only
    /// after a clean exit from the state machine.
    pub async fn collect_from_source(&self, mut source: NewsSource) -> SourceOutcome {
        let started = std::time::Instant::now();
        tracing::info!(source = %source.name, url = %source.url, "collecting from source");

        match self.collect_inner(&mut source).await {
            Ok((collected, total_entries)) => {
                let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
                source.record_successful_poll(response_time_ms, collected as i64, Utc::now());
                if let Err(err) = self.sources.update_poll_state(&source).await {
                    tracing::error!(source = %source.name, error = %err, "failed to record poll success");
                }
                self.breaker.record_success(source.id).await;

                tracing::info!(
                    source = %source.name,
                    articles = collected,
                    entries = total_entries,
                    "source collection succeeded"
                );
                SourceOutcome {
                    source_name: source.name,
                    articles_collected: collected,
                    total_entries,
                    response_time_ms,
                    error: None,
                }
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(source = %source.name, error = %message, "source collection failed");

                source.record_failed_poll(&message, Utc::now());
                if let Err(save_err) = self.sources.update_poll_state(&source).await {
                    tracing::error!(source = %source.name, error = %save_err, "failed to record poll failure");
                }
                self.breaker.record_failure(source.id, Utc::now()).await;

                SourceOutcome {
                    source_name: source.name,
                    articles_collected: 0,
                    total_entries: 0,
                    response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    error: Some(message),
                }
            }
        }
    }

    /// Fetch → Parse → Extract → DedupeCheck → Insert
    async fn collect_inner(&self, source: &mut NewsSource) -> Result<(usize, usize)> {
        let body = match self.fetcher.fetch(source).await? {
            FetchOutcome::NotModified => {
                tracing::debug!(source = %source.name, "feed unchanged (304)");
                return Ok((0, 0));
            }
            FetchOutcome::Body {
                text,
                etag,
                last_modified,
            } => {
                source.update_caching_headers(etag, last_modified);
                text
            }
        };

        let feed = parser::parse(body.as_bytes())
            .map_err(|e| AppError::Parse(format!("{}: {e}", source.name)))?;
        if feed.entries.is_empty() {
            return Err(AppError::Parse(format!("no entries in feed {}", source.name)));
        }

        let cap = if source.max_articles_per_poll > 0 {
            source.max_articles_per_poll as usize
        } else {
            self.config.max_articles_per_feed
        };
        let candidates = extract::extract_candidates(&feed, &body, source, cap, Utc::now());
        let total_entries = feed.entries.len();

        if candidates.is_empty() {
            tracing::debug!(source = %source.name, "no usable entries");
            return Ok((0, total_entries));
        }

        // One bulk round-trip to drop already-persisted fingerprints
        let hashes: Vec<String> = candidates.iter().map(|a| a.content_hash.clone()).collect();
        let existing = self.articles.fetch_fingerprints_in(&hashes).await?;
        let fresh: Vec<NewArticle> = candidates
            .into_iter()
            .filter(|a| !existing.contains(&a.content_hash))
            .collect();

        if fresh.is_empty() {
            return Ok((0, total_entries));
        }

        let inserted = self.articles.insert_batch(&fresh).await?;
        Ok((inserted, total_entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_source(url: String) -> NewsSource {
        NewsSource {
            id: 1,
            name: "Test Feed".to_string(),
            url,
            primary_region: None,
            country_code: None,
            language: "en".to_string(),
            enabled: true,
            reliability_score: 80,
            poll_interval_minutes: 15,
            max_articles_per_poll: 20,
            topics: vec![],
            last_poll_at: None,
            last_successful_poll_at: None,
            next_poll_at: None,
            last_etag: None,
            last_modified: None,
            total_polls: 0,
            successful_polls: 0,
            failed_polls: 0,
            total_articles_collected: 0,
            avg_response_time_ms: 0.0,
            last_response_time_ms: 0.0,
            consecutive_failures: 0,
            last_error_message: None,
            last_error_at: None,
            custom_headers: HashMap::new(),
        }
    }

    fn fast_fetcher() -> FeedFetcher {
        FeedFetcher::new(CollectorConfig {
            max_attempts: 1,
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            ..Default::default()
        })
        .unwrap()
    }

    const FEED_BODY: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel>
        <title>Feed</title>
        <item><title>Entry</title><link>https://example.com/a</link>
        <description>Body text that is long enough for extraction purposes.</description></item>
        </channel></rss>"#;

    #[tokio::test]
    async fn test_fetch_200_captures_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(FEED_BODY)
                    .insert_header("etag", "\"v1\"")
                    .insert_header("last-modified", "Mon, 07 Aug 2023 15:30:00 GMT"),
            )
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let source = test_source(format!("{}/rss", server.uri()));

        match fetcher.fetch(&source).await.unwrap() {
            FetchOutcome::Body {
                text,
                etag,
                last_modified,
            } => {
                assert!(text.contains("<rss"));
                assert_eq!(etag.as_deref(), Some("\"v1\""));
                assert!(last_modified.is_some());
            }
            FetchOutcome::NotModified => panic!("expected a body"),
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_conditional_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .and(header("if-none-match", "\"v1\""))
            .and(header("if-modified-since", "Mon, 07 Aug 2023 15:30:00 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let mut source = test_source(format!("{}/rss", server.uri()));
        source.last_etag = Some("\"v1\"".to_string());
        source.last_modified = Some("Mon, 07 Aug 2023 15:30:00 GMT".to_string());

        assert!(matches!(
            fetcher.fetch(&source).await.unwrap(),
            FetchOutcome::NotModified
        ));
    }

    #[tokio::test]
    async fn test_fetch_403_and_404_are_terminal() {
        for status in [403u16, 404] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/rss"))
                .respond_with(ResponseTemplate::new(status))
                .expect(1) // terminal: no retries
                .mount(&server)
                .await;

            let fetcher = FeedFetcher::new(CollectorConfig {
                max_attempts: 3,
                request_timeout: Duration::from_secs(2),
                connect_timeout: Duration::from_secs(1),
                ..Default::default()
            })
            .unwrap();
            let source = test_source(format!("{}/rss", server.uri()));

            match fetcher.fetch(&source).await {
                Err(FetchError::Http { status: got }) => assert_eq!(got, status),
                other => panic!("expected HTTP error, got {:?}", other.err()),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_5xx_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new(CollectorConfig {
            max_attempts: 2,
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            ..Default::default()
        })
        .unwrap();
        let source = test_source(format!("{}/rss", server.uri()));

        match fetcher.fetch(&source).await {
            Err(FetchError::Http { status }) => assert_eq!(status, 503),
            other => panic!("expected 503, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(FEED_BODY)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new(CollectorConfig {
            max_attempts: 1,
            request_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        let source = test_source(format!("{}/rss", server.uri()));

        assert!(matches!(
            fetcher.fetch(&source).await,
            Err(FetchError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_fetch_sends_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED_BODY))
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let mut source = test_source(format!("{}/rss", server.uri()));
        source
            .custom_headers
            .insert("x-api-key".to_string(), "secret".to_string());

        assert!(fetcher.fetch(&source).await.is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = CollectorConfig::default();
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
    }
}
