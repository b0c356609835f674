//! Error handling for the aggregation pipeline
//!
//! Each pipeline step reports a tagged error kind; recovery happens at the
//! boundary of the logical unit (entry, article, source, batch). The KV cache
//! adapter never surfaces errors at all.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error response body for API consumers
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub correlation_id: String,
    pub timestamp: String,
}

/// Feed fetch failures, tracked per source
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("connection failed: {0}")]
    Dns(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("response decode failed: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether another attempt within the same run is worthwhile.
    /// 403/404 are terminal for this run; other statuses and transport
    /// faults get the retry/backoff treatment.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http { status } => !matches!(status, 403 | 404),
            _ => true,
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        if err.is_connect() {
            let text = err.to_string();
            if text.contains("tls") || text.contains("certificate") {
                return FetchError::Tls(text);
            }
            return FetchError::Dns(text);
        }
        FetchError::Decode(err.to_string())
    }
}

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("feed parse failed: {0}")]
    Parse(String),

    #[error("database query failed")]
    Database(#[from] sqlx::Error),

    #[error("database integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("job failed: {0}")]
    Job(String),

    #[error("job deadline exceeded after {seconds}s")]
    JobTimeout { seconds: u64 },

    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("invalid request: {message}")]
    BadRequest { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Fetch(_) | AppError::Parse(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Fetch(_) => "FETCH_FAILED",
            AppError::Parse(_) => "PARSE_FAILED",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::IntegrityViolation(_) => "INTEGRITY_VIOLATION",
            AppError::Classification(_) => "CLASSIFICATION_FAILED",
            AppError::Job(_) => "JOB_FAILED",
            AppError::JobTimeout { .. } => "JOB_TIMEOUT",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::BadRequest { .. } => "BAD_REQUEST",
            AppError::Configuration { .. } => "CONFIGURATION_ERROR",
            AppError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the sqlx error is a unique-constraint violation. Drives the
    /// batch-rollback / per-row-retry insert policy.
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => db.code().map(|c| c == "23505").unwrap_or(false),
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4().to_string();
        let status = self.status_code();

        match &self {
            AppError::Database(_)
            | AppError::IntegrityViolation(_)
            | AppError::Configuration { .. }
            | AppError::ServiceUnavailable
            | AppError::Internal(_) => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    error_code = self.error_code(),
                    error = %self,
                    "server error"
                );
            }
            AppError::Fetch(_) | AppError::Parse(_) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error_code = self.error_code(),
                    error = %self,
                    "upstream error"
                );
            }
            _ => {
                tracing::info!(
                    correlation_id = %correlation_id,
                    error_code = self.error_code(),
                    error = %self,
                    "client error"
                );
            }
        }

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
            correlation_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_retryability() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Http { status: 500 }.is_retryable());
        assert!(!FetchError::Http { status: 403 }.is_retryable());
        assert!(!FetchError::Http { status: 404 }.is_retryable());
    }

    #[test]
    fn test_status_codes() {
        let err = AppError::NotFound {
            resource: "article 42".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = AppError::Fetch(FetchError::Timeout);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_code(), "FETCH_FAILED");
    }
}
