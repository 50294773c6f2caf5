//! Error types for requests made through the client.
//!
//! Every failure a caller can observe is an [`Error`]. Failures that come back
//! from the server or the network are classified once, where they are
//! detected, into one of the taxonomy variants (`Api`, `Network`, `Timeout`,
//! `Validation`, `Cancelled`); the retry engine and callers branch on that
//! classification. The remaining variants describe local mistakes such as an
//! unparsable URL or a body that fails to serialize.

use crate::rate_limit::RetryHint;
use crate::validation::{parse_field_errors, FieldError};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Header names whose values never leave [`Error::to_redacted`].
pub const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "cookie", "x-api-key", "x-csrf-token"];

/// Replacement for sensitive header values.
pub const REDACTED: &str = "[REDACTED]";

/// Status used for validation failures.
pub const VALIDATION_STATUS: StatusCode = StatusCode::UNPROCESSABLE_ENTITY;

/// Payload shared by all classified failures.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails {
    /// Human readable description.
    pub message: String,
    /// HTTP status, absent when no response was received.
    pub status: Option<StatusCode>,
    /// Response body, parsed as JSON when possible, otherwise a JSON string.
    pub body: Option<Value>,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ErrorDetails {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// The error type for requests made through the client.
///
/// `Error` is `Clone`: a single deduplicated failure is handed to every caller
/// that was waiting on it.
///
/// # Examples
///
/// ```no_run
/// use cushion::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// match client.get::<serde_json::Value>("/users/1").await {
///     Ok(response) => println!("{:?}", response.data),
///     Err(Error::Validation { errors, .. }) => {
///         for e in errors {
///             eprintln!("{}: {}", e.field, e.message);
///         }
///     }
///     Err(e) if e.is_network_error() => eprintln!("offline: {}", e),
///     Err(e) => eprintln!("request failed: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// A generic API failure, usually a non-2xx response.
    ///
    /// Also used to wrap unexpected failures, which carry no status and are
    /// not retryable.
    #[error("{}", .details.message)]
    Api {
        details: Box<ErrorDetails>,
        retryable: bool,
    },

    /// No response was received (connection refused, DNS failure, reset).
    ///
    /// Always retryable and never carries a status.
    #[error("Network error: {}", .details.message)]
    Network {
        details: Box<ErrorDetails>,
        #[source]
        cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// An attempt took longer than the configured timeout.
    ///
    /// Always retryable and never carries a status.
    #[error("Request timed out after {}ms", .timeout.as_millis())]
    Timeout {
        details: Box<ErrorDetails>,
        timeout: Duration,
    },

    /// The server rejected the request content (422).
    ///
    /// Never retryable. `errors` holds the per-field messages parsed from the
    /// response body.
    #[error("{}", .details.message)]
    Validation {
        details: Box<ErrorDetails>,
        errors: Vec<FieldError>,
    },

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid client or request configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request body could not be serialized.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    /// A successful response body did not match the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    Deserialization {
        raw_response: String,
        serde_error: String,
        status: StatusCode,
    },
}

impl Error {
    /// Builds a generic API failure.
    pub fn api(details: ErrorDetails, retryable: bool) -> Self {
        Error::Api {
            details: Box::new(details),
            retryable,
        }
    }

    /// Builds a network failure with an optional underlying cause.
    pub fn network(
        message: impl Into<String>,
        cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Network {
            details: Box::new(ErrorDetails::new(message)),
            cause,
        }
    }

    /// Builds a timeout failure for an attempt limited to `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Error::Timeout {
            details: Box::new(ErrorDetails::new(format!(
                "Request timed out after {}ms",
                timeout.as_millis()
            ))),
            timeout,
        }
    }

    /// Builds a validation failure, parsing field errors from the body.
    pub fn validation(message: impl Into<String>, body: Option<Value>, headers: HeaderMap) -> Self {
        let errors = body.as_ref().map(parse_field_errors).unwrap_or_default();
        Error::Validation {
            details: Box::new(ErrorDetails {
                message: message.into(),
                status: Some(VALIDATION_STATUS),
                body,
                headers,
            }),
            errors,
        }
    }

    /// Wraps an unexpected failure. The result has no status and is not retryable.
    pub fn wrap(err: impl std::fmt::Display) -> Self {
        Error::api(ErrorDetails::new(err.to_string()), false)
    }

    /// Classifies a non-2xx response.
    ///
    /// 422 becomes [`Error::Validation`]. Everything else becomes
    /// [`Error::Api`], retryable for 408, 429 and 5xx.
    ///
    /// # Examples
    ///
    /// ```
    /// use cushion::Error;
    /// use http::{HeaderMap, StatusCode};
    ///
    /// let err = Error::from_status(StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new(), "down");
    /// assert!(err.is_retryable());
    /// assert!(err.is_server_error());
    ///
    /// let err = Error::from_status(StatusCode::NOT_FOUND, HeaderMap::new(), "missing");
    /// assert!(!err.is_retryable());
    /// assert!(err.is_client_error());
    /// ```
    pub fn from_status(status: StatusCode, headers: HeaderMap, raw_body: &str) -> Self {
        let body = parse_body(raw_body);
        let message = format!("HTTP error {}", status);

        if status == VALIDATION_STATUS {
            return Error::validation(message, body, headers);
        }

        let retryable = status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS;

        Error::api(
            ErrorDetails {
                message,
                status: Some(status),
                body,
                headers,
            },
            retryable,
        )
    }

    /// The shared payload of a classified failure.
    pub fn details(&self) -> Option<&ErrorDetails> {
        match self {
            Error::Api { details, .. }
            | Error::Network { details, .. }
            | Error::Timeout { details, .. }
            | Error::Validation { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Returns `true` if repeating the request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api { retryable, .. } => *retryable,
            Error::Network { .. } | Error::Timeout { .. } => true,
            Error::Validation { .. }
            | Error::Cancelled
            | Error::Configuration(_)
            | Error::InvalidUrl(_)
            | Error::Serialization(_)
            | Error::Deserialization { .. } => false,
        }
    }

    /// The HTTP status, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Deserialization { status, .. } => Some(*status),
            _ => self.details()?.status,
        }
    }

    /// Returns `true` for 4xx failures.
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_client_error())
    }

    /// Returns `true` for 5xx failures.
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_server_error())
    }

    /// Returns `true` for classified failures where no response was received.
    pub fn is_network_error(&self) -> bool {
        self.details().is_some_and(|d| d.status.is_none())
    }

    /// Response headers, empty when none were received.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.details().map(|d| &d.headers)
    }

    /// Parsed field errors; empty unless this is a validation failure.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Error::Validation { errors, .. } => errors,
            _ => &[],
        }
    }

    /// Field errors for a single field.
    pub fn errors_for_field<'a>(
        &'a self,
        field: &'a str,
    ) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.field_errors().iter().filter(move |e| e.field == field)
    }

    /// Returns `true` if any field error mentions `field`.
    pub fn has_error_for_field(&self, field: &str) -> bool {
        self.errors_for_field(field).next().is_some()
    }

    /// Backoff hints sent along with the failed response.
    pub fn retry_hint(&self) -> Option<RetryHint> {
        let hint = RetryHint::from_headers(self.headers()?);
        hint.is_present().then_some(hint)
    }

    /// Server-requested wait before retrying, if any, capped at `max_wait`.
    pub fn retry_after(&self, max_wait: Duration) -> Option<Duration> {
        self.retry_hint()?.delay(max_wait)
    }

    /// A serializable snapshot that is safe to log.
    ///
    /// Values of [`SENSITIVE_HEADERS`] are replaced with [`REDACTED`],
    /// matching names case-insensitively. Other headers are kept as-is.
    ///
    /// # Examples
    ///
    /// ```
    /// use cushion::Error;
    /// use http::{HeaderMap, StatusCode};
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("authorization", "Bearer xyz".parse().unwrap());
    ///
    /// let err = Error::from_status(StatusCode::UNAUTHORIZED, headers, "");
    /// let json = serde_json::to_string(&err.to_redacted()).unwrap();
    /// assert!(!json.contains("xyz"));
    /// ```
    pub fn to_redacted(&self) -> RedactedError {
        let details = self.details();
        let (timeout_ms, errors) = match self {
            Error::Timeout { timeout, .. } => (u64::try_from(timeout.as_millis()).ok(), Vec::new()),
            Error::Validation { errors, .. } => (None, errors.clone()),
            _ => (None, Vec::new()),
        };

        RedactedError {
            kind: self.kind(),
            message: details.map_or_else(|| self.to_string(), |d| d.message.clone()),
            status: self.status().map(|s| s.as_u16()),
            body: details.and_then(|d| d.body.clone()),
            headers: details.map(|d| redact_headers(&d.headers)).unwrap_or_default(),
            retryable: self.is_retryable(),
            errors,
            timeout_ms,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::Api { .. } => "api",
            Error::Network { .. } => "network",
            Error::Timeout { .. } => "timeout",
            Error::Validation { .. } => "validation",
            Error::Cancelled => "cancelled",
            Error::Configuration(_) => "configuration",
            Error::InvalidUrl(_) => "invalid_url",
            Error::Serialization(_) => "serialization",
            Error::Deserialization { .. } => "deserialization",
        }
    }
}

/// Log-safe form of an [`Error`], produced by [`Error::to_redacted`].
#[derive(Debug, Clone, Serialize)]
pub struct RedactedError {
    pub kind: &'static str,
    pub message: String,
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(name))
}

fn redact_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in headers.keys() {
        let value = if is_sensitive(name.as_str()) {
            REDACTED.to_string()
        } else {
            headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.insert(name.as_str().to_string(), value);
    }
    out
}

fn parse_body(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

/// A specialized `Result` type for requests made through the client.
pub type Result<T> = std::result::Result<T, Error>;
