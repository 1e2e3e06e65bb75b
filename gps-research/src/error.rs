//! Error taxonomy for research calls, aggregation and persistence.

use gps_common::util::sanitize_api_error;
use thiserror::Error;

/// Result alias for research operations.
pub type Result<T> = std::result::Result<T, ResearchError>;

/// Errors raised while querying backends, parsing replies or touching the cache.
#[derive(Debug, Error)]
pub enum ResearchError {
    /// Backend throttled the request (429, 503, "resource exhausted")
    #[error("[{backend}] rate limited: {message}")]
    RateLimited { backend: String, message: String },

    /// Connection failure, timeout or 5xx
    #[error("[{backend}] transport error: {message}")]
    Transport { backend: String, message: String },

    /// Reply arrived but contained no usable JSON object
    #[error("[{backend}] malformed response: {message}")]
    MalformedResponse { backend: String, message: String },

    /// No credentials configured for the backend
    #[error("[{backend}] API key not configured")]
    AuthMissing { backend: String },

    /// Explicit refusal (4xx other than 429)
    #[error("[{backend}] request rejected ({status}): {message}")]
    Rejected {
        backend: String,
        status: u16,
        message: String,
    },

    /// Post-validation reply could not be turned back into a record
    #[error("validation reply could not be parsed: {0}")]
    ValidationParseFailure(String),

    /// Retry budget spent on a retriable failure
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ResearchError>,
    },

    /// Persisted snapshot could not be read or written
    #[error("cache error at {path}: {message}")]
    Cache { path: String, message: String },

    /// Input/config/report failure from the shared layer
    #[error(transparent)]
    Common(#[from] gps_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResearchError {
    /// Map a non-success HTTP status and body into the taxonomy.
    pub fn from_status(backend: &str, status: u16, body: &str) -> Self {
        let message = sanitize_api_error(body);
        let lowered = body.to_ascii_lowercase();
        match status {
            429 | 503 => Self::RateLimited {
                backend: backend.into(),
                message,
            },
            _ if lowered.contains("resource exhausted") || lowered.contains("resource_exhausted") => {
                Self::RateLimited {
                    backend: backend.into(),
                    message,
                }
            }
            500..=599 => Self::Transport {
                backend: backend.into(),
                message: format!("HTTP {status}: {message}"),
            },
            _ => Self::Rejected {
                backend: backend.into(),
                status,
                message,
            },
        }
    }

    /// Wrap a reqwest failure that happened before a status was available.
    pub fn transport(backend: &str, err: &reqwest::Error) -> Self {
        Self::Transport {
            backend: backend.into(),
            message: sanitize_api_error(&err.to_string()),
        }
    }

    pub fn malformed(backend: &str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport { .. })
    }

    pub fn is_auth_missing(&self) -> bool {
        match self {
            Self::AuthMissing { .. } => true,
            Self::Exhausted { last, .. } => last.is_auth_missing(),
            _ => false,
        }
    }
}
