//! HTTP client with deduplication, caching and retries.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::{
    cache::{self, CachePolicy, CacheSetting, ResponseCache},
    clock::{Clock, SystemClock},
    dedup::{self, Deduplicator},
    interceptor::{Interceptor, InterceptorHandle, Interceptors},
    request::RequestDescriptor,
    retry::{with_retry, JitterSource, RetryPolicy, RetrySetting, ThreadRngJitter},
    transport::{ReqwestTransport, Transport},
    Error, RawResponse, Response, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// An HTTP client that coalesces, caches and retries requests.
///
/// The client is designed to be reused across multiple requests. Clones share
/// the same cache, in-flight registry and interceptors; separately built
/// clients share nothing.
///
/// # Examples
///
/// ```no_run
/// use cushion::{CacheOptions, CacheSetting, Client, RetryConfig, RetrySetting};
/// use std::time::Duration;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct CreateUser {
///     name: String,
/// }
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
///     .timeout(Duration::from_secs(10))
///     .retry(RetrySetting::Enabled(RetryConfig::default().with_max_attempts(5)))
///     .cache(CacheSetting::Enabled(CacheOptions::default().with_ttl(Duration::from_secs(60))))
///     .build()?;
///
/// // Served from the cache on the second call.
/// let users = client.get::<Vec<User>>("/users").await?;
/// let again = client.get::<Vec<User>>("/users").await?;
/// assert!(again.cached);
///
/// // Invalidates cached `/users*` entries.
/// let created = client
///     .post::<_, User>("/users", &CreateUser { name: "Alice".to_string() })
///     .await?;
/// println!("Created user {} ({} existed)", created.data.id, users.data.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    default_headers: HeaderMap,
    timeout: Duration,
    deduplicate: bool,
    retry: RetrySetting,
    cache_setting: CacheSetting,
    jitter: Arc<dyn JitterSource>,
    cache: Arc<ResponseCache>,
    in_flight: Deduplicator<RawResponse>,
    interceptors: Arc<Interceptors>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("timeout", &self.inner.timeout)
            .field("deduplicate", &self.inner.deduplicate)
            .field("retry", &self.inner.retry)
            .field("cache", &self.inner.cache_setting)
            .field("cache_len", &self.inner.cache.len())
            .field("in_flight_len", &self.inner.in_flight.len())
            .finish()
    }
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cushion::Client;
    ///
    /// # async fn example() -> Result<(), cushion::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Issues a request through interceptors, cache, deduplication and retries.
    ///
    /// GET requests are answered from the cache when a fresh entry exists.
    /// Otherwise concurrent identical requests share one retried call. A
    /// successful GET is stored in the cache; any other method invalidates
    /// affected cache entries once it completes, whether it succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the last attempt, unless an
    /// interceptor recovers from it.
    pub async fn request(&self, request: RequestDescriptor) -> Result<RawResponse> {
        let chain = self.inner.interceptors.snapshot();

        let outcome = match Interceptors::run_request(&chain, request).await {
            Ok(request) => self.execute(request).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => Interceptors::run_response(&chain, response).await,
            Err(e) => Interceptors::run_error(&chain, e).await,
        }
    }

    async fn execute(&self, mut request: RequestDescriptor) -> Result<RawResponse> {
        let inner = &self.inner;
        merge_default_headers(&mut request.headers, &inner.default_headers);

        let cache_policy =
            CachePolicy::resolve(request.options.cache.as_ref(), &inner.cache_setting);
        let retry_policy = RetryPolicy::resolve(request.options.retry.as_ref(), &inner.retry);

        if let Some(hit) = inner.cache.lookup(&request, &cache_policy) {
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                "Serving response from cache"
            );
            return Ok(hit);
        }

        let deduplicate = request.options.deduplicate.unwrap_or(inner.deduplicate);
        let key = if deduplicate {
            request.dedup_key()
        } else {
            String::new()
        };

        let cancellation = request.options.cancellation.clone();
        let operation = Operation {
            transport: Arc::clone(&inner.transport),
            jitter: Arc::clone(&inner.jitter),
            cache: Arc::clone(&inner.cache),
            timeout: request.options.timeout.unwrap_or(inner.timeout),
            cache_policy,
            retry_policy,
            request,
        };

        let shared = inner
            .in_flight
            .coalesce(key, deduplicate, move || operation.run());

        // Joined callers honor their own token. The shared result is polled
        // first so a cancelled owner still clears its registry entry.
        match cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    result = shared => result,
                    _ = token.cancelled() => {
                        tracing::info!("Caller cancelled while waiting on shared request");
                        Err(Error::Cancelled)
                    }
                }
            }
            None => shared.await,
        }
    }

    /// Makes a request and deserializes the response body.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cushion::{Client, RequestDescriptor};
    /// use http::Method;
    /// use serde::{Deserialize, Serialize};
    /// use std::time::Duration;
    ///
    /// #[derive(Serialize)]
    /// struct Search { query: String }
    ///
    /// #[derive(Deserialize)]
    /// struct Results { results: Vec<String> }
    ///
    /// # async fn example() -> Result<(), cushion::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    ///
    /// let request = RequestDescriptor::new(Method::POST, "/search")
    ///     .with_body(&Search { query: "rust".to_string() })?
    ///     .with_timeout(Duration::from_secs(5))
    ///     .with_retry(true.into());
    ///
    /// let response = client.call::<Results>(request).await?;
    /// println!("Found {} results", response.data.results.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Res>(&self, request: RequestDescriptor) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let start_time = Instant::now();
        let raw = self.request(request).await?;
        Response::from_raw(raw, start_time.elapsed())
    }

    /// Makes a GET request to the specified path.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.call(RequestDescriptor::new(Method::GET, path)).await
    }

    /// Makes a POST request with a JSON body.
    ///
    /// Not retried unless the request enables retries explicitly; see
    /// [`RequestDescriptor::with_retry`].
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.call(RequestDescriptor::new(Method::POST, path).with_body(body)?)
            .await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.call(RequestDescriptor::new(Method::PUT, path).with_body(body)?)
            .await
    }

    /// Makes a PATCH request with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.call(RequestDescriptor::new(Method::PATCH, path).with_body(body)?)
            .await
    }

    /// Makes a DELETE request to the specified path.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.call(RequestDescriptor::new(Method::DELETE, path)).await
    }

    /// Makes a HEAD request to the specified path.
    pub async fn head(&self, path: impl Into<String>) -> Result<Response<()>> {
        self.call(RequestDescriptor::new(Method::HEAD, path)).await
    }

    /// Registers an interceptor. Interceptors run in registration order.
    pub fn add_interceptor(&self, interceptor: impl Interceptor + 'static) -> InterceptorHandle {
        self.inner.interceptors.add(Arc::new(interceptor))
    }

    /// Removes every cached response.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Removes cached responses whose URL matches `pattern`.
    ///
    /// A trailing `*` makes the pattern a prefix match. Returns the number of
    /// removed entries.
    pub fn invalidate_cache(&self, pattern: &str) -> usize {
        self.inner.cache.invalidate(pattern)
    }

    /// Number of cached responses, including expired ones not yet evicted.
    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Number of deduplicated operations currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Forgets every in-flight operation.
    ///
    /// Pending callers still receive their results; later identical requests
    /// start a new operation instead of joining.
    pub fn clear_in_flight(&self) {
        self.inner.in_flight.clear();
    }
}

/// Adds default headers the request does not set itself.
fn merge_default_headers(headers: &mut HeaderMap, defaults: &HeaderMap) {
    for name in defaults.keys() {
        if headers.contains_key(name) {
            continue;
        }
        for value in defaults.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
}

/// One logical request as run inside the in-flight registry.
struct Operation {
    transport: Arc<dyn Transport>,
    jitter: Arc<dyn JitterSource>,
    cache: Arc<ResponseCache>,
    timeout: Duration,
    cache_policy: CachePolicy,
    retry_policy: RetryPolicy,
    request: RequestDescriptor,
}

impl Operation {
    async fn run(self) -> Result<RawResponse> {
        let request = &self.request;
        let transport = self.transport.as_ref();
        let timeout = self.timeout;

        let retried = with_retry(
            &request.method,
            &self.retry_policy,
            self.jitter.as_ref(),
            |attempt| perform_attempt(transport, request, timeout, attempt),
        );

        let result = match &request.options.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::info!(
                            method = %request.method,
                            url = %request.url,
                            "Request cancelled"
                        );
                        Err(Error::Cancelled)
                    }
                    result = retried => result,
                }
            }
            None => retried.await,
        };

        if request.is_mutation() {
            self.cache.invalidate_on_mutation(request, &self.cache_policy);
        } else if let Ok(response) = &result {
            self.cache.store(request, response, &self.cache_policy);
        }

        result
    }
}

async fn perform_attempt(
    transport: &dyn Transport,
    request: &RequestDescriptor,
    timeout: Duration,
    attempt: usize,
) -> Result<RawResponse> {
    tracing::debug!(
        method = %request.method,
        url = %request.url,
        attempt = attempt,
        "Executing request attempt"
    );

    match tokio::time::timeout(timeout, transport.perform(request)).await {
        Ok(Ok(mut response)) => {
            response.attempts = attempt;
            Ok(response)
        }
        Ok(Err(e)) => Err(classify(e)),
        Err(_) => Err(Error::timeout(timeout)),
    }
}

/// Keeps taxonomy failures; anything else becomes a non-retryable API error.
fn classify(error: Error) -> Error {
    match error {
        Error::Api { .. }
        | Error::Network { .. }
        | Error::Timeout { .. }
        | Error::Validation { .. }
        | Error::Cancelled => error,
        other => {
            tracing::warn!(error = %other, "Wrapping unexpected transport failure");
            Error::wrap(other)
        }
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use cushion::{CacheSetting, ClientBuilder, RetryConfig};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), cushion::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .retry(RetryConfig::default().with_initial_delay(Duration::from_millis(100)).into())
///     .cache(CacheSetting::Disabled)
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Duration,
    deduplicate: bool,
    retry: RetrySetting,
    cache: CacheSetting,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    max_in_flight_age: Duration,
    cache_housekeeping_threshold: usize,
    dedup_housekeeping_threshold: usize,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
            deduplicate: true,
            retry: RetrySetting::default(),
            cache: CacheSetting::default(),
            transport: None,
            clock: Arc::new(SystemClock::new()),
            jitter: Arc::new(ThreadRngJitter),
            max_in_flight_age: dedup::DEFAULT_MAX_IN_FLIGHT_AGE,
            cache_housekeeping_threshold: cache::DEFAULT_HOUSEKEEPING_THRESHOLD,
            dedup_housekeeping_threshold: dedup::DEFAULT_HOUSEKEEPING_THRESHOLD,
        }
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// Headers set on a request take precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables deduplication of concurrent identical requests.
    pub fn deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Sets the default retry behaviour.
    pub fn retry(mut self, retry: RetrySetting) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the default caching behaviour.
    pub fn cache(mut self, cache: CacheSetting) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the `reqwest` transport. No base URL is needed then.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the clock used for cache and in-flight expiry.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the random source for retry jitter.
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Age after which an unsettled in-flight request is no longer joined.
    pub fn max_in_flight_age(mut self, age: Duration) -> Self {
        self.max_in_flight_age = age;
        self
    }

    pub fn cache_housekeeping_threshold(mut self, threshold: usize) -> Self {
        self.cache_housekeeping_threshold = threshold;
        self
    }

    pub fn dedup_housekeeping_threshold(mut self, threshold: usize) -> Self {
        self.dedup_housekeeping_threshold = threshold;
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a base URL nor a transport was provided, or
    /// if the HTTP client cannot be built.
    pub fn build(self) -> Result<Client> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let base_url = self
                    .base_url
                    .ok_or_else(|| Error::Configuration("Base URL is required".to_string()))?;
                Arc::new(ReqwestTransport::new(base_url)?)
            }
        };

        let cache = ResponseCache::new(Arc::clone(&self.clock))
            .with_housekeeping_threshold(self.cache_housekeeping_threshold);
        let in_flight = Deduplicator::new(Arc::clone(&self.clock))
            .with_max_age(self.max_in_flight_age)
            .with_housekeeping_threshold(self.dedup_housekeeping_threshold);

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                default_headers: self.default_headers,
                timeout: self.timeout,
                deduplicate: self.deduplicate,
                retry: self.retry,
                cache_setting: self.cache,
                jitter: self.jitter,
                cache: Arc::new(cache),
                in_flight,
                interceptors: Arc::new(Interceptors::default()),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_base_url_or_transport() {
        let result = Client::builder().build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_invalid_base_url() {
        let result = Client::builder().base_url("not a url");
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_classify_wraps_non_taxonomy_failures() {
        let wrapped = classify(Error::Configuration("bad header".to_string()));
        assert!(matches!(wrapped, Error::Api { retryable: false, .. }));
        assert_eq!(wrapped.status(), None);
        assert!(wrapped.to_string().contains("bad header"));

        let kept = classify(Error::network("reset", None));
        assert!(matches!(kept, Error::Network { .. }));
    }

    #[test]
    fn test_default_headers_do_not_override_request_headers() {
        let mut defaults = HeaderMap::new();
        defaults.insert("user-agent", HeaderValue::from_static("cushion"));
        defaults.insert("accept", HeaderValue::from_static("application/json"));

        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("text/plain"));
        merge_default_headers(&mut headers, &defaults);

        assert_eq!(headers.get("accept").unwrap(), "text/plain");
        assert_eq!(headers.get("user-agent").unwrap(), "cushion");
    }
}
