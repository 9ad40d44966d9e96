use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failures that abort an ingestion run before any chunk is written.
///
/// Per-chunk and ancillary-fetch failures never surface here; they are
/// reported on the `IngestReport` instead.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("clinic {0} not found")]
    NotFound(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("ingestion batch already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

const RETRY_LATER: &str = "temporarily unavailable, please retry later";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("too many requests")]
    RateLimited { retry_after_ms: u64 },
    #[error("upstream failure: {0:#}")]
    Upstream(anyhow::Error),
    #[error("internal failure: {0:#}")]
    Internal(anyhow::Error),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::NotFound(_) => ApiError::NotFound,
            IngestError::Timeout(what) => ApiError::Upstream(anyhow::anyhow!("{what} timed out")),
            IngestError::Upstream(e) => ApiError::Upstream(e),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::AlreadyRunning => {
                ApiError::Conflict("ingestion batch already in progress".to_string())
            }
            BatchError::Failed(e) => ApiError::Internal(e),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Whole seconds for the `Retry-After` header, rounded up and never zero.
pub fn retry_after_secs(retry_after_ms: u64) -> u64 {
    retry_after_ms.div_ceil(1000).max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::RateLimited { retry_after_ms } => {
                let body = Json(json!({
                    "error": "too many requests",
                    "retry_after_ms": retry_after_ms,
                }));
                let mut response = (status, body).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after_ms).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            ApiError::Upstream(ref e) | ApiError::Internal(ref e) => {
                // internal detail stays in the logs
                tracing::error!("request failed ({}): {:#}", status, e);
                (status, Json(json!({ "error": RETRY_LATER }))).into_response()
            }
            other => (status, Json(json!({ "error": other.to_string() }))).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(1), 1);
        assert_eq!(retry_after_secs(1000), 1);
        assert_eq!(retry_after_secs(1001), 2);
        assert_eq!(retry_after_secs(0), 1);
    }

    #[test]
    fn test_rate_limited_response_carries_header() {
        let response = ApiError::RateLimited { retry_after_ms: 2500 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");
    }

    #[test]
    fn test_not_found_maps_from_ingest_error() {
        let err: ApiError = IngestError::NotFound("ghost-id".into()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_running_batch_maps_to_conflict() {
        let err: ApiError = BatchError::AlreadyRunning.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let err: ApiError = BatchError::Failed(anyhow::anyhow!("db down")).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_upstream_does_not_leak_detail() {
        let err = ApiError::Upstream(anyhow::anyhow!("password=hunter2"));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
