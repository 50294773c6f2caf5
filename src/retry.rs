//! Retry with exponential backoff and jitter.
//!
//! [`with_retry`] drives one logical request through up to
//! [`RetryConfig::max_attempts`] attempts. Whether a failure is retried depends
//! on the error classification, the configured status codes and whether the
//! HTTP method is safe to repeat.

use crate::request::is_idempotent;
use crate::Error;
use http::Method;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Statuses retried by default.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Decides whether a failed attempt should be retried.
///
/// A predicate installed on [`RetryConfig::should_retry`] replaces the built-in
/// status and method checks. Closures implement it directly.
///
/// # Examples
///
/// ```
/// use cushion::{Error, RetryConfig};
/// use std::sync::Arc;
///
/// let config = RetryConfig::default().with_predicate(Arc::new(|error: &Error, _attempt: usize| {
///     error.status().is_some_and(|s| s.as_u16() == 503)
/// }));
/// ```
pub trait RetryPredicate: Send + Sync {
    /// `attempt` is the 1-indexed number of the attempt that just failed.
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(&Error, usize) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self(error, attempt)
    }
}

/// Source of uniform samples in `[0, 1)` used for jitter.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..1.0)
    }
}

/// Always returns the same sample. `FixedJitter(0.5)` disables jitter.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Retry tuning.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the computed delay (before jitter).
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Statuses considered transient.
    pub retryable_status_codes: Vec<u16>,
    /// Overrides the built-in retry decision when set.
    pub should_retry: Option<Arc<dyn RetryPredicate>>,
    /// Relative jitter; `0.3` spreads delays over ±30%.
    pub jitter: f64,
    /// Honour `Retry-After` and rate limit reset headers.
    pub respect_retry_after: bool,
    /// Cap for server-requested delays.
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
            should_retry: None,
            jitter: 0.3,
            respect_retry_after: true,
            max_retry_after: Duration::from_secs(300),
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("should_retry", &self.should_retry.is_some())
            .field("jitter", &self.jitter)
            .field("respect_retry_after", &self.respect_retry_after)
            .field("max_retry_after", &self.max_retry_after)
            .finish()
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_predicate(mut self, predicate: Arc<dyn RetryPredicate>) -> Self {
        self.should_retry = Some(predicate);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_after(mut self, respect: bool, max_wait: Duration) -> Self {
        self.respect_retry_after = respect;
        self.max_retry_after = max_wait;
        self
    }

    /// Delay after the given failed attempt, before jitter.
    ///
    /// `initial_delay * backoff_multiplier^(attempt - 1)`, capped at `max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cushion::RetryConfig;
    /// use std::time::Duration;
    ///
    /// let config = RetryConfig::default();
    /// assert_eq!(config.base_delay(1), Duration::from_secs(1));
    /// assert_eq!(config.base_delay(3), Duration::from_secs(4));
    /// assert_eq!(config.base_delay(10), Duration::from_secs(30));
    /// ```
    pub fn base_delay(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let nanos = self.initial_delay.as_nanos() as f64 * factor;

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }

    /// Applies multiplicative jitter to `delay` using a sample in `[0, 1)`.
    pub fn jittered(&self, delay: Duration, sample: f64) -> Duration {
        let factor = 1.0 + self.jitter * (2.0 * sample - 1.0);
        delay.mul_f64(factor.max(0.0))
    }
}

/// Whether retries are on, and with which tuning.
#[derive(Debug, Clone)]
pub enum RetrySetting {
    Disabled,
    Enabled(RetryConfig),
}

impl Default for RetrySetting {
    fn default() -> Self {
        RetrySetting::Enabled(RetryConfig::default())
    }
}

impl From<bool> for RetrySetting {
    fn from(enabled: bool) -> Self {
        if enabled {
            RetrySetting::default()
        } else {
            RetrySetting::Disabled
        }
    }
}

impl From<RetryConfig> for RetrySetting {
    fn from(config: RetryConfig) -> Self {
        RetrySetting::Enabled(config)
    }
}

/// Retry behaviour resolved for one request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `None` when retries are disabled.
    pub config: Option<RetryConfig>,
    /// Set when the request itself enabled retries; required for POST and PATCH.
    pub explicit: bool,
}

impl RetryPolicy {
    /// Resolves a per-request override against the client default.
    pub fn resolve(request: Option<&RetrySetting>, default: &RetrySetting) -> Self {
        let (setting, explicit) = match request {
            Some(setting) => (setting, matches!(setting, RetrySetting::Enabled(_))),
            None => (default, false),
        };

        Self {
            config: match setting {
                RetrySetting::Enabled(config) => Some(config.clone()),
                RetrySetting::Disabled => None,
            },
            explicit,
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            config: None,
            explicit: false,
        }
    }

    /// Decides whether attempt number `attempt` should be followed by another.
    pub fn should_retry(&self, method: &Method, error: &Error, attempt: usize) -> bool {
        let Some(config) = &self.config else {
            return false;
        };
        if attempt >= config.max_attempts {
            return false;
        }
        // Cancellation and validation failures are never transient.
        if matches!(error, Error::Cancelled | Error::Validation { .. }) {
            return false;
        }
        if let Some(predicate) = &config.should_retry {
            return predicate.should_retry(error, attempt);
        }
        if !is_idempotent(method) && !self.explicit {
            return false;
        }

        match error.status() {
            Some(status) => config.retryable_status_codes.contains(&status.as_u16()),
            None => error.is_retryable(),
        }
    }

    /// Delay before the attempt following `attempt`.
    ///
    /// A server-provided hint replaces the computed, jittered backoff.
    pub fn delay_for(&self, error: &Error, attempt: usize, jitter: &dyn JitterSource) -> Duration {
        let Some(config) = &self.config else {
            return Duration::ZERO;
        };

        if config.respect_retry_after {
            if let Some(delay) = error
                .retry_hint()
                .and_then(|hint| hint.delay(config.max_retry_after))
            {
                return delay;
            }
        }

        config.jittered(config.base_delay(attempt), jitter.sample())
    }
}

/// Runs `executor` until it succeeds or the policy gives up.
///
/// The executor receives the 1-indexed attempt number. The last error is
/// returned unchanged once retries stop.
pub async fn with_retry<T, F, Fut>(
    method: &Method,
    policy: &RetryPolicy,
    jitter: &dyn JitterSource,
    mut executor: F,
) -> Result<T, Error>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;

    loop {
        match executor(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt = attempt, "Request succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    attempt = attempt,
                    method = %method,
                    "Request failed"
                );

                if !policy.should_retry(method, &error, attempt) {
                    return Err(error);
                }

                let delay = policy.delay_for(&error, attempt, jitter);
                tracing::info!(
                    delay_ms = delay.as_millis(),
                    attempt = attempt,
                    "Retrying request after delay"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
