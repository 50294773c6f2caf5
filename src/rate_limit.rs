//! Server-provided retry hints.
//!
//! A failed response may tell the client how long to back off, either with a
//! `Retry-After` header or with a rate limit reset timestamp. When present, the
//! hint takes precedence over the computed backoff delay.

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Backoff hints extracted from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryHint {
    /// From `Retry-After`, either delay-seconds or an HTTP date.
    pub retry_after: Option<Duration>,

    /// From `X-RateLimit-Reset` or `RateLimit-Reset` (Unix seconds).
    pub reset_at: Option<SystemTime>,

    /// From `X-RateLimit-Remaining`.
    pub remaining: Option<u64>,
}

impl RetryHint {
    /// Parses retry hints from response headers.
    ///
    /// # Examples
    ///
    /// ```
    /// use cushion::rate_limit::RetryHint;
    /// use http::HeaderMap;
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "2".parse().unwrap());
    ///
    /// let hint = RetryHint::from_headers(&headers);
    /// assert_eq!(hint.retry_after, Some(Duration::from_secs(2)));
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_headers_at(headers, SystemTime::now())
    }

    /// Like [`RetryHint::from_headers`], resolving HTTP dates against `now`.
    pub fn from_headers_at(headers: &HeaderMap, now: SystemTime) -> Self {
        Self {
            retry_after: parse_retry_after(headers, now),
            reset_at: parse_reset(headers),
            remaining: parse_remaining(headers),
        }
    }

    /// Returns the delay the server asked for, capped at `max_wait`.
    ///
    /// `Retry-After` wins over a reset timestamp. A reset time already in the
    /// past yields `None`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        self.delay_at(max_wait, SystemTime::now())
    }

    /// Like [`RetryHint::delay`], measuring the reset time from `now`.
    pub fn delay_at(&self, max_wait: Duration, now: SystemTime) -> Option<Duration> {
        if let Some(retry_after) = self.retry_after {
            return Some(retry_after.min(max_wait));
        }

        let until_reset = self.reset_at?.duration_since(now).ok()?;
        Some(until_reset.min(max_wait))
    }

    /// Returns `true` if the headers carried any usable hint.
    pub fn is_present(&self) -> bool {
        self.retry_after.is_some() || self.reset_at.is_some()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = header_str(headers, "retry-after")?;

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = httpdate::parse_http_date(value).ok()?;
    // A date in the past means "retry now".
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

fn parse_reset(headers: &HeaderMap) -> Option<SystemTime> {
    ["x-ratelimit-reset", "ratelimit-reset"]
        .into_iter()
        .filter_map(|name| header_str(headers, name)?.parse::<u64>().ok())
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .next()
}

fn parse_remaining(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, "x-ratelimit-remaining")?.parse().ok()
}
