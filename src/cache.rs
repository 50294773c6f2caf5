//! TTL cache for GET responses.
//!
//! Entries are keyed by method, URL and query parameters (or by a custom key
//! function) and are valid while `now - stored_at < ttl`. Expired entries are
//! dropped when looked up, and swept in bulk once the cache grows past its
//! housekeeping threshold. Mutating requests invalidate entries by URL
//! pattern.

use crate::clock::Clock;
use crate::request::RequestDescriptor;
use crate::response::RawResponse;
use http::Method;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

/// Entry count above which expired entries are swept.
pub const DEFAULT_HOUSEKEEPING_THRESHOLD: usize = 1000;

/// Computes a cache key from a request.
pub type KeyFn = Arc<dyn Fn(&RequestDescriptor) -> String + Send + Sync>;

/// Cache tuning.
#[derive(Clone)]
pub struct CacheOptions {
    /// How long a stored response stays fresh.
    pub ttl: Duration,
    /// Replaces the default method/URL/params key.
    pub key: Option<KeyFn>,
    /// When `false`, mutations leave the cache alone.
    pub invalidate_on_mutation: bool,
    /// Patterns invalidated after a mutation instead of the default
    /// `<url>*` heuristic.
    pub invalidates: Vec<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            key: None,
            invalidate_on_mutation: true,
            invalidates: Vec::new(),
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl", &self.ttl)
            .field("key", &self.key.is_some())
            .field("invalidate_on_mutation", &self.invalidate_on_mutation)
            .field("invalidates", &self.invalidates)
            .finish()
    }
}

impl CacheOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Uses a custom key, e.g. to ignore a volatile parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use cushion::{CacheOptions, RequestDescriptor};
    /// use std::sync::Arc;
    ///
    /// let options = CacheOptions::default().with_key(Arc::new(|request: &RequestDescriptor| {
    ///     let mut request = request.clone();
    ///     request.query_params.remove("cursor");
    ///     request.cache_key()
    /// }));
    /// ```
    pub fn with_key(mut self, key: KeyFn) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_invalidate_on_mutation(mut self, invalidate: bool) -> Self {
        self.invalidate_on_mutation = invalidate;
        self
    }

    pub fn with_invalidates<S: Into<String>>(
        mut self,
        patterns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.invalidates = patterns.into_iter().map(Into::into).collect();
        self
    }
}

/// Whether responses are cached, and how.
#[derive(Debug, Clone)]
pub enum CacheSetting {
    Disabled,
    Enabled(CacheOptions),
}

impl Default for CacheSetting {
    fn default() -> Self {
        CacheSetting::Enabled(CacheOptions::default())
    }
}

impl From<bool> for CacheSetting {
    fn from(enabled: bool) -> Self {
        if enabled {
            CacheSetting::default()
        } else {
            CacheSetting::Disabled
        }
    }
}

impl From<CacheOptions> for CacheSetting {
    fn from(options: CacheOptions) -> Self {
        CacheSetting::Enabled(options)
    }
}

/// Cache behaviour resolved for one request.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    pub options: CacheOptions,
}

impl CachePolicy {
    /// Resolves a per-request override against the client default.
    pub fn resolve(request: Option<&CacheSetting>, default: &CacheSetting) -> Self {
        match request.unwrap_or(default) {
            CacheSetting::Enabled(options) => Self {
                enabled: true,
                options: options.clone(),
            },
            CacheSetting::Disabled => Self {
                enabled: false,
                options: CacheOptions::default(),
            },
        }
    }

    fn key_for(&self, request: &RequestDescriptor) -> String {
        match &self.options.key {
            Some(key) => key(request),
            None => request.cache_key(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    url: String,
    response: RawResponse,
    stored_at: u64,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: u64) -> bool {
        u128::from(now.saturating_sub(self.stored_at)) < self.ttl.as_millis()
    }
}

/// Returns `true` if `url` matches an invalidation pattern.
///
/// A trailing `*` makes the pattern a prefix match; `"/users/*"` also matches
/// `"/users"` itself. Anything else must match exactly.
pub fn pattern_matches(pattern: &str, url: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => {
            url.starts_with(prefix)
                || prefix
                    .strip_suffix('/')
                    .is_some_and(|parent| !parent.is_empty() && url == parent)
        }
        None => url == pattern,
    }
}

/// In-memory response cache.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    housekeeping_threshold: usize,
}

impl ResponseCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            housekeeping_threshold: DEFAULT_HOUSEKEEPING_THRESHOLD,
        }
    }

    pub fn with_housekeeping_threshold(mut self, threshold: usize) -> Self {
        self.housekeeping_threshold = threshold;
        self
    }

    /// Returns a fresh cached response for a GET request.
    ///
    /// The returned copy has `cached` set and counts as a single attempt.
    /// Expired entries are removed.
    pub fn lookup(&self, request: &RequestDescriptor, policy: &CachePolicy) -> Option<RawResponse> {
        if !policy.enabled || request.method != Method::GET {
            return None;
        }

        let key = policy.key_for(request);
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        let entry = entries.get(&key)?;
        if !entry.is_fresh(now) {
            tracing::debug!(key = %key, "Cache entry expired");
            entries.remove(&key);
            return None;
        }

        tracing::debug!(key = %key, "Cache hit");
        let mut response = entry.response.clone();
        response.cached = true;
        response.attempts = 1;
        Some(response)
    }

    /// Stores a successful GET response.
    pub fn store(&self, request: &RequestDescriptor, response: &RawResponse, policy: &CachePolicy) {
        if !policy.enabled || request.method != Method::GET {
            return;
        }

        let key = policy.key_for(request);
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        entries.insert(
            key,
            CacheEntry {
                url: request.url.clone(),
                response: response.clone(),
                stored_at: now,
                ttl: policy.options.ttl,
            },
        );

        if entries.len() > self.housekeeping_threshold {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_fresh(now));
            tracing::debug!(
                removed = before - entries.len(),
                remaining = entries.len(),
                "Swept expired cache entries"
            );
        }
    }

    /// Removes entries whose URL matches `pattern`. Returns how many were removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !pattern_matches(pattern, &entry.url));
        let removed = before - entries.len();

        if removed > 0 {
            tracing::debug!(pattern = %pattern, removed = removed, "Invalidated cache entries");
        }
        removed
    }

    /// Invalidates entries affected by a completed mutation.
    ///
    /// Uses the explicit `invalidates` patterns when given, otherwise the
    /// mutated URL without its query string as a prefix.
    pub fn invalidate_on_mutation(
        &self,
        request: &RequestDescriptor,
        policy: &CachePolicy,
    ) -> usize {
        if !request.is_mutation() || !policy.options.invalidate_on_mutation {
            return 0;
        }

        if !policy.options.invalidates.is_empty() {
            return policy
                .options
                .invalidates
                .iter()
                .map(|pattern| self.invalidate(pattern))
                .sum();
        }

        let base = request
            .url
            .split_once('?')
            .map_or(request.url.as_str(), |(path, _)| path);
        self.invalidate(&format!("{}*", base))
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
