//! Response types.
//!
//! [`RawResponse`] is what flows through the resilience layer: it is cheap to
//! clone, so one result can be cached or handed to several deduplicated
//! callers. [`Response`] wraps the deserialized data together with the
//! metadata of the call, for callers that want a typed body.

use crate::{Error, Result};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// An untyped successful response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The HTTP status code.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The raw response body.
    pub body: String,

    /// `true` when served from the response cache.
    pub cached: bool,

    /// Attempts it took to obtain this response, including retries. Cache
    /// hits count as one.
    pub attempts: usize,
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            cached: false,
            attempts: 1,
        }
    }

    /// A 200 response with a JSON body.
    pub fn json(body: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Self::new(StatusCode::OK, headers, body.to_string())
    }

    /// Deserializes the body. An empty body is read as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Deserialization`] when the body does not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let text = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };

        serde_json::from_str(text).map_err(|e| {
            tracing::error!(
                error = %e,
                status = self.status.as_u16(),
                "Failed to deserialize response"
            );
            Error::Deserialization {
                raw_response: self.body.clone(),
                serde_error: e.to_string(),
                status: self.status,
            }
        })
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// A typed successful response.
///
/// # Examples
///
/// ```no_run
/// use cushion::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), cushion::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = client.get::<User>("/users/123").await?;
///
/// println!("User: {}", response.data.name);
/// println!("Request took {:?}", response.latency);
/// println!("Attempts: {}", response.attempts);
/// println!("From cache: {}", response.cached);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time spent in the call, including retries. Near zero for cache hits.
    pub latency: Duration,

    /// Number of attempts made to obtain the response; `1` for cache hits.
    pub attempts: usize,

    /// `true` when served from the response cache.
    pub cached: bool,
}

impl<T: DeserializeOwned> Response<T> {
    /// Deserializes a raw response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Deserialization`] when the body does not match `T`.
    pub fn from_raw(raw: RawResponse, latency: Duration) -> Result<Self> {
        let data = raw.parse()?;
        Ok(Self {
            data,
            raw_body: raw.body,
            status: raw.status,
            headers: raw.headers,
            latency,
            attempts: raw.attempts,
            cached: raw.cached,
        })
    }
}

impl<T> Response<T> {
    /// Maps the response data, keeping the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// use cushion::{RawResponse, Response};
    /// use std::time::Duration;
    ///
    /// let raw = RawResponse::json(&serde_json::json!(42));
    /// let response = Response::<u32>::from_raw(raw, Duration::ZERO).unwrap();
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            cached: self.cached,
        }
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_body_reads_as_null() {
        let raw = RawResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), "");
        let parsed: Option<u32> = raw.parse().unwrap();
        assert_eq!(parsed, None);
        raw.parse::<()>().unwrap();
    }

    #[test]
    fn test_deserialization_error_keeps_raw_body() {
        let raw = RawResponse::new(StatusCode::OK, HeaderMap::new(), "not json");
        match raw.parse::<Vec<u32>>() {
            Err(Error::Deserialization {
                raw_response,
                status,
                ..
            }) => {
                assert_eq!(raw_response, "not json");
                assert_eq!(status, StatusCode::OK);
            }
            other => panic!("Expected Deserialization, got {:?}", other),
        }
    }

    #[test]
    fn test_from_raw_carries_metadata() {
        let mut raw = RawResponse::json(&json!([{"id": 1}]));
        raw.attempts = 3;
        raw.cached = true;

        let response =
            Response::<serde_json::Value>::from_raw(raw, Duration::from_millis(5)).unwrap();
        assert_eq!(response.data, json!([{"id": 1}]));
        assert!(response.was_retried());
        assert!(response.cached);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.data[0]["id"], 1);
    }
}
