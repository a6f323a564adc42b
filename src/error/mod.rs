//! Error Types
//!
//! Error hierarchy for orchestrated REST requests.
//!
//! Transports report [`TransportError`]; the orchestrator classifies it into
//! [`ApiError`], the only error type callers ever see.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Root error type for orchestrated requests.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Client error (HTTP {status}): {body}")]
    Client { status: u16, body: String },

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Rate limited{}", describe_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ApiError> },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Concurrency gate is closed")]
    GateClosed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ApiError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "API_CONFIG",
            Self::Network(_) => "API_NETWORK",
            Self::Client { .. } => "API_CLIENT",
            Self::Auth(_) => "API_AUTH",
            Self::RateLimited { .. } => "API_RATE_LIMITED",
            Self::Server { .. } => "API_SERVER",
            Self::RetriesExhausted { .. } => "API_RETRIES_EXHAUSTED",
            Self::Cancelled => "API_CANCELLED",
            Self::GateClosed => "API_GATE_CLOSED",
            Self::Protocol(_) => "API_PROTOCOL",
        }
    }

    /// Check if error is transient and worth another attempt.
    ///
    /// 401 is deliberately absent: it is resolved by the credential refresh
    /// path, not by backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    /// Get the server-supplied wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::RetriesExhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }

    /// Check if error requires the user to sign in again.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Number of attempts made before giving up, for exhausted retries.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// HTTP status carried by the error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::Auth(AuthError::Unauthorized) => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::Protocol(ProtocolError::UnexpectedStatus { status }) => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Get user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(AuthError::RefreshFailed { .. }) | Self::Auth(AuthError::NotAuthenticated) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Auth(AuthError::Unauthorized) => {
                "You are not authorized to perform this action.".to_string()
            }
            Self::Network(NetworkError::Timeout { .. }) => {
                "The request timed out. Please check your connection and try again.".to_string()
            }
            Self::Network(NetworkError::ConnectionFailed { .. }) => {
                "Could not reach the server. Please check your connection.".to_string()
            }
            Self::RateLimited { .. } => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            Self::Client { status: 404, .. } => "The requested item was not found.".to_string(),
            Self::Client { .. } => "The request was rejected by the server.".to_string(),
            Self::Server { .. } => {
                "The service is temporarily unavailable. Please try again later.".to_string()
            }
            Self::RetriesExhausted { attempts, last } => {
                format!("{} ({} attempts made)", last.user_message(), attempts)
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
            _ => "An unexpected error occurred. Please try again.".to_string(),
        }
    }
}

/// Configuration error.
#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Authentication error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Request rejected as unauthorized")]
    Unauthorized,

    #[error("Token refresh failed: {message}")]
    RefreshFailed { message: String },

    #[error("No credentials available; sign in required")]
    NotAuthenticated,
}

/// Network-level failure: nothing usable came back from the server.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Protocol/response handling error.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Failure reported by an [`HttpTransport`](crate::core::HttpTransport).
///
/// Transports apply no policy: any received non-2xx response is reported as
/// [`TransportError::Status`] with the raw status, headers and body.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("HTTP {status}")]
    Status {
        status: u16,
        headers: HashMap<String, String>,
        body: String,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Non-2xx response with an empty header set.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// 429 response carrying a `retry-after` header in seconds.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::Status {
            status: 429,
            headers: HashMap::from([("retry-after".to_string(), retry_after_secs.to_string())]),
            body: String::new(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Network(e) => ApiError::Network(e),
            TransportError::Protocol(e) => ApiError::Protocol(e),
            TransportError::Status {
                status,
                headers,
                body,
            } => create_error_from_response(status, &headers, body),
        }
    }
}

fn describe_retry_after(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|delay| format!(", retry after {:?}", delay))
        .unwrap_or_default()
}

/// Result type for orchestrated operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Classify a non-2xx response.
pub fn create_error_from_response(
    status: u16,
    headers: &HashMap<String, String>,
    body: String,
) -> ApiError {
    match status {
        401 => ApiError::Auth(AuthError::Unauthorized),
        429 => ApiError::RateLimited {
            retry_after: headers
                .get("retry-after")
                .and_then(|value| parse_retry_after(value)),
        },
        400..=499 => ApiError::Client { status, body },
        500..=599 => ApiError::Server { status, body },
        _ => ApiError::Protocol(ProtocolError::UnexpectedStatus { status }),
    }
}

/// Parse a `Retry-After` value: delay in seconds or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(secs) = value.parse::<f64>() {
        // Negative, non-finite or oversized hints are ignored.
        return Duration::try_from_secs_f64(secs).ok();
    }
    let at: DateTime<Utc> = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}
