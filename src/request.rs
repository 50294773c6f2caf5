//! Request descriptors and per-request resilience overrides.

use crate::cache::CacheSetting;
use crate::key;
use crate::retry::RetrySetting;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-request overrides of the client defaults.
///
/// Every field is optional; `None` falls back to what the client was built with.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Timeout for each individual attempt.
    pub timeout: Option<Duration>,
    /// Whether concurrent identical requests share one underlying call.
    pub deduplicate: Option<bool>,
    /// Retry behaviour. Setting this explicitly is what allows POST and PATCH
    /// requests to be retried.
    pub retry: Option<RetrySetting>,
    /// Response caching behaviour.
    pub cache: Option<CacheSetting>,
    /// Cancels the request when triggered.
    pub cancellation: Option<CancellationToken>,
}

/// Everything needed to issue a single HTTP request.
///
/// # Examples
///
/// ```
/// use cushion::{CacheOptions, RequestDescriptor};
/// use std::time::Duration;
///
/// let request = RequestDescriptor::get("/users")
///     .with_query_param("page", 2)
///     .with_cache(CacheOptions::default().with_ttl(Duration::from_secs(30)).into());
///
/// assert_eq!(request.url, "/users");
/// ```
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// The HTTP method.
    pub method: Method,

    /// The request URL, relative to the client's base URL.
    pub url: String,

    /// Additional headers for this request.
    pub headers: HeaderMap,

    /// Query parameters. Order does not matter.
    pub query_params: HashMap<String, Value>,

    /// JSON body.
    pub body: Option<Value>,

    /// Resilience overrides.
    pub options: RequestOptions,
}

impl RequestDescriptor {
    /// Creates a descriptor with the given method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query_params: HashMap::new(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    /// Shorthand for a GET descriptor.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Adds multiple query parameters to the request.
    pub fn with_query_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.query_params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Serializes `body` as the JSON request body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if `body` cannot be represented as JSON.
    pub fn with_body<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, crate::Error> {
        let body =
            serde_json::to_value(body).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.body = Some(body);
        Ok(self)
    }

    /// Replaces all resilience overrides.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.options.deduplicate = Some(deduplicate);
        self
    }

    pub fn with_retry(mut self, retry: RetrySetting) -> Self {
        self.options.retry = Some(retry);
        self
    }

    pub fn with_cache(mut self, cache: CacheSetting) -> Self {
        self.options.cache = Some(cache);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.options.cancellation = Some(token);
        self
    }

    /// Returns `true` for methods that change server state (anything but
    /// GET, HEAD and OPTIONS).
    pub fn is_mutation(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// Key shared by concurrent requests that may be coalesced.
    pub fn dedup_key(&self) -> String {
        key::request_key(
            &self.method,
            &self.url,
            &self.query_params,
            self.body.as_ref(),
            &self.headers,
        )
    }

    /// Default key for cached responses.
    pub fn cache_key(&self) -> String {
        key::cache_key(&self.method, &self.url, &self.query_params)
    }
}

impl Default for RequestDescriptor {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

/// Returns `true` for methods that are safe to repeat.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}
