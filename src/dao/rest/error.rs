//! Error types shared by the REST backend implementation.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::dao::backend::BackendError;

/// Convenient result alias returning [`RestDaoError`] failures.
pub type RestResult<T> = Result<T, RestDaoError>;

/// Failures that can occur while interacting with the REST gateway.
#[derive(Debug, Error)]
pub enum RestDaoError {
    /// Required environment variable is missing.
    #[error("missing backend environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build backend HTTP client")]
    ClientBuilder {
        /// Builder error.
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send backend request to `{path}`")]
    RequestSend {
        /// Path relative to `/rest/v1`.
        path: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The gateway answered with a structured error body.
    #[error("backend rejected `{path}` with {status}: {code} {message}")]
    Rejected {
        /// Path relative to `/rest/v1`.
        path: String,
        /// HTTP status of the answer.
        status: StatusCode,
        /// Gateway error code.
        code: String,
        /// Gateway error message.
        message: String,
    },
    /// The gateway answered with an error status and no usable body.
    #[error("unexpected backend response status {status} for `{path}`")]
    RequestStatus {
        /// Path relative to `/rest/v1`.
        path: String,
        /// HTTP status of the answer.
        status: StatusCode,
    },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode backend response for `{path}`")]
    DecodeResponse {
        /// Path relative to `/rest/v1`.
        path: String,
        /// Decoding error.
        #[source]
        source: reqwest::Error,
    },
}

/// Error body returned by the REST gateway.
#[derive(Debug, Deserialize)]
pub(super) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<RestDaoError> for BackendError {
    fn from(err: RestDaoError) -> Self {
        match err {
            RestDaoError::Rejected { code, message, .. } => BackendError::Rejected { code, message },
            other => BackendError::unavailable(other.to_string(), other),
        }
    }
}
