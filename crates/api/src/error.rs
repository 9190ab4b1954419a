//! Error types for the cluster API client.

use dcluster_core::ExternalId;
use dcluster_reconciler::ClusterApiError;
use thiserror::Error;

/// Result type for API client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Databricks error code for a missing cluster.
pub const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";

/// Databricks error code for a create that matched an existing cluster.
pub const RESOURCE_ALREADY_EXISTS: &str = "RESOURCE_ALREADY_EXISTS";

/// Errors that can occur while talking to the Clusters API.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to connect to the API host.
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Request timed out.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The API answered with a non-success status.
    #[error("API returned {status}{}: {message}", code_suffix(.error_code))]
    Api {
        status: u16,
        error_code: Option<String>,
        message: String,
        /// Cluster id carried by some error bodies.
        cluster_id: Option<String>,
    },

    /// The response body did not have the expected shape.
    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// Configuration error.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a connection failed error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub const fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create an API status error.
    pub fn api(status: u16, error_code: Option<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            error_code,
            message: message.into(),
            cluster_id: None,
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Classify a transport error from reqwest.
    pub fn from_transport(error: reqwest::Error, timeout_ms: u64) -> Self {
        if error.is_timeout() {
            Self::timeout(timeout_ms)
        } else if error.is_connect() {
            Self::connection_failed(error.to_string())
        } else {
            Self::Http(error)
        }
    }

    /// The Databricks error code, if the API sent one.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Api { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    /// Whether the cluster does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api {
                status, error_code, ..
            } => *status == 404 || error_code.as_deref() == Some(RESOURCE_DOES_NOT_EXIST),
            _ => false,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Http(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse { .. }
            | Self::ConfigError { .. }
            | Self::UrlParse(_)
            | Self::Json(_)
            | Self::Io(_) => false,
        }
    }

    /// Translate into the reconciler's error taxonomy.
    ///
    /// `external_id` is the cluster the call was about; without it a missing
    /// resource cannot be reported as NotFound.
    pub fn into_cluster_api_error(self, external_id: Option<&ExternalId>) -> ClusterApiError {
        if self.is_not_found() {
            if let Some(id) = external_id {
                return ClusterApiError::not_found(id);
            }
        }
        if let Self::Api {
            error_code: Some(code),
            cluster_id: Some(cluster_id),
            ..
        } = &self
        {
            if code == RESOURCE_ALREADY_EXISTS {
                return ClusterApiError::Duplicate {
                    external_id: ExternalId::new(cluster_id.clone()),
                };
            }
        }
        if self.is_retryable() || matches!(self, Self::InvalidResponse { .. } | Self::Json(_)) {
            ClusterApiError::transient(self.to_string())
        } else {
            ClusterApiError::permanent(self.to_string())
        }
    }
}

fn code_suffix(error_code: &Option<String>) -> String {
    error_code
        .as_deref()
        .map(|code| format!(" {code}"))
        .unwrap_or_default()
}
