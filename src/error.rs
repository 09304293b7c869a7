use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error;

use crate::{dao::backend::BackendError, realtime::RealtimeError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The backend failed or rejected the call.
    #[error("backend call failed")]
    Backend(#[source] BackendError),
    /// The backend is currently unreachable.
    #[error("backend unavailable (degraded mode)")]
    Degraded,
    /// The caller exceeded a rate limit and is blocked for a while.
    #[error("too many attempts; retry in {}s", retry_after.as_secs().max(1))]
    RateLimited {
        /// Time left in the block.
        retry_after: Duration,
    },
    /// The local request breaker is open for `key`.
    #[error("request budget exhausted for `{key}`")]
    CircuitOpen {
        /// Throttler key whose breaker is open.
        key: String,
    },
    /// A realtime channel could not be opened.
    #[error("realtime subscription failed")]
    Realtime(#[from] RealtimeError),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The action was already performed.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The owning view was torn down before the work completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<BackendError> for ServiceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Throttled { key } => ServiceError::CircuitOpen { key },
            other => ServiceError::Backend(other),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Local policy refused the request.
    #[error("too many requests: {message}")]
    TooManyRequests {
        /// Human readable reason.
        message: String,
        /// Seconds until the caller may retry, when known.
        retry_after: Option<u64>,
    },
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Backend(BackendError::Rejected { code, message }) => {
                AppError::Conflict(format!("{code}: {message}"))
            }
            ServiceError::Backend(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::RateLimited { retry_after } => AppError::TooManyRequests {
                message,
                retry_after: Some(retry_after.as_secs().max(1)),
            },
            ServiceError::CircuitOpen { .. } => AppError::TooManyRequests {
                message,
                retry_after: None,
            },
            ServiceError::Realtime(source) => AppError::Internal(source.to_string()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Conflict(message) => AppError::Conflict(message),
            ServiceError::Cancelled => AppError::ServiceUnavailable("operation cancelled".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let retry_after = match &self {
            AppError::TooManyRequests { retry_after, .. } => *retry_after,
            _ => None,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        let mut response = (status, payload).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_backend_calls_become_circuit_open() {
        let err: ServiceError = BackendError::Throttled {
            key: "table:group_votes".into(),
        }
        .into();
        assert!(matches!(err, ServiceError::CircuitOpen { ref key } if key == "table:group_votes"));
    }

    #[test]
    fn rate_limited_maps_to_429_with_retry_after() {
        let err: AppError = ServiceError::RateLimited {
            retry_after: Duration::from_millis(2_500),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "2");
    }

    #[test]
    fn backend_rejections_are_conflicts() {
        let err: AppError = ServiceError::from(BackendError::rejected("P0001", "closed")).into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
