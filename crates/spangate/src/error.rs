//! Error types for the spangate sidecar.

use std::fmt;

use thiserror::Error;

/// Sidecar-specific errors.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Forward or probe attempted while no ready connection handle exists.
    #[error("Client not initialized: {message}")]
    NotInitialized {
        /// Error message.
        message: String,
    },

    /// Connection-handle construction failed during initialize.
    #[error("Initialization error: {message}")]
    Init {
        /// Error message.
        message: String,
    },

    /// Readiness probe failed (timeout, transport error, or zero rows).
    #[error("Probe error: {message}")]
    Probe {
        /// Error message.
        message: String,
    },

    /// The remote Spanner call itself failed.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Error message.
        message: String,
        /// Optional HTTP status code from upstream.
        status: Option<u16>,
    },

    /// Server startup error.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request client error.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl SidecarError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a not-initialized error.
    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::NotInitialized {
            message: message.into(),
        }
    }

    /// Create an initialization error.
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    /// Create a probe error.
    pub fn probe(message: impl Into<String>) -> Self {
        Self::Probe {
            message: message.into(),
        }
    }

    /// Create an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            status: None,
        }
    }

    /// Create an upstream error with status code.
    pub fn upstream_with_status(message: impl Into<String>, status: u16) -> Self {
        Self::Upstream {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config { .. } => 500,
            Self::NotInitialized { .. } => 503,
            Self::Init { .. } => 503,
            Self::Probe { .. } => 503,
            Self::Upstream { status, .. } => status.unwrap_or(502),
            Self::Server { .. } => 500,
            Self::Io(_) => 500,
            Self::Http(_) => 400,
            Self::Json(_) => 400,
            Self::Request(_) => 502,
        }
    }

    /// Get the error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::NotInitialized { .. } => "not_initialized",
            Self::Init { .. } => "init",
            Self::Probe { .. } => "probe",
            Self::Upstream { .. } => "upstream",
            Self::Server { .. } => "server",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Json(_) => "json",
            Self::Request(_) => "request",
        }
    }
}

/// Result type for sidecar operations.
pub type SidecarResult<T> = Result<T, SidecarError>;

/// Error response body returned to HTTP callers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Error code/category.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            request_id: None,
        }
    }

    /// Set the request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl From<&SidecarError> for ErrorResponse {
    fn from(err: &SidecarError) -> Self {
        Self::new(err.category(), err.to_string())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SidecarError::config("missing field");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.category(), "config");

        let err = SidecarError::not_initialized("no current handle");
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.category(), "not_initialized");

        let err = SidecarError::upstream("connection refused");
        assert_eq!(err.status_code(), 502);

        let err = SidecarError::upstream_with_status("bad response", 429);
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn test_error_display() {
        let err = SidecarError::init("channel construction failed");
        assert!(err.to_string().contains("Initialization error"));

        let err = SidecarError::not_initialized("call /init first");
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn test_error_response() {
        let resp = ErrorResponse::new("upstream", "listInstances failed")
            .with_request_id("req-123");

        assert_eq!(resp.error, "upstream");
        assert_eq!(resp.request_id, Some("req-123".to_string()));

        let err = SidecarError::probe("timed out");
        let resp: ErrorResponse = (&err).into();
        assert_eq!(resp.error, "probe");
    }

    #[test]
    fn test_error_response_serialization() {
        let resp = ErrorResponse::new("not_initialized", "no handle");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("not_initialized"));
        assert!(!json.contains("request_id"));
    }
}
