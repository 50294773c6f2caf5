//! In-flight request deduplication.
//!
//! Concurrent requests with the same key share one pending operation: the
//! first caller registers a [`Shared`] future, later callers clone and await
//! it. The entry is removed as soon as the operation settles.

use crate::clock::Clock;
use crate::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default age after which an unsettled entry is no longer joined.
pub const DEFAULT_MAX_IN_FLIGHT_AGE: Duration = Duration::from_millis(60_000);

/// Entry count above which stale entries are swept.
pub const DEFAULT_HOUSEKEEPING_THRESHOLD: usize = 100;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T: Clone> {
    id: u64,
    created_at: u64,
    future: SharedResult<T>,
}

type Registry<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// Registry of pending operations keyed by request key.
pub struct Deduplicator<T: Clone> {
    entries: Registry<T>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    housekeeping_threshold: usize,
    next_id: AtomicU64,
}

impl<T: Clone> std::fmt::Debug for Deduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("in_flight", &self.entries.lock().len())
            .field("max_age", &self.max_age)
            .field("housekeeping_threshold", &self.housekeeping_threshold)
            .finish()
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            max_age: DEFAULT_MAX_IN_FLIGHT_AGE,
            housekeeping_threshold: DEFAULT_HOUSEKEEPING_THRESHOLD,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_housekeeping_threshold(mut self, threshold: usize) -> Self {
        self.housekeeping_threshold = threshold;
        self
    }

    /// Runs `executor`, or joins an identical operation already in flight.
    ///
    /// With `enabled == false` the registry is bypassed and `executor` runs
    /// directly. Otherwise every caller sharing `key` observes the same
    /// result, including the same error.
    ///
    /// # Examples
    ///
    /// ```
    /// use cushion::clock::SystemClock;
    /// use cushion::dedup::Deduplicator;
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), cushion::Error> {
    /// let dedup: Deduplicator<u32> = Deduplicator::new(Arc::new(SystemClock::new()));
    ///
    /// let (a, b) = tokio::join!(
    ///     dedup.coalesce("GET:/users".to_string(), true, || async { Ok(7) }),
    ///     dedup.coalesce("GET:/users".to_string(), true, || async { Ok(8) }),
    /// );
    /// assert_eq!(a?, 7);
    /// assert_eq!(b?, 7);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn coalesce<F, Fut>(&self, key: String, enabled: bool, executor: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !enabled {
            return executor().await;
        }

        if let Some(shared) = self.join(&key) {
            tracing::debug!(key = %key, "Joining in-flight request");
            return shared.await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.entries);
        let cleanup_key = key.clone();
        let operation = executor();

        let future: BoxFuture<'static, Result<T>> = async move {
            let result = operation.await;
            {
                let mut entries = registry.lock();
                if entries.get(&cleanup_key).is_some_and(|entry| entry.id == id) {
                    entries.remove(&cleanup_key);
                }
            }
            result
        }
        .boxed();
        let shared = future.shared();

        let now = self.clock.now_millis();
        let shared = {
            let mut entries = self.entries.lock();
            // Another caller may have registered while the executor was built.
            match entries.get(&key) {
                Some(existing) if !self.is_stale(existing, now) => existing.future.clone(),
                _ => {
                    entries.insert(
                        key.clone(),
                        InFlight {
                            id,
                            created_at: now,
                            future: shared.clone(),
                        },
                    );
                    if entries.len() > self.housekeeping_threshold {
                        self.sweep(&mut entries, now);
                    }
                    shared
                }
            }
        };

        shared.await
    }

    fn join(&self, key: &str) -> Option<SharedResult<T>> {
        let now = self.clock.now_millis();
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| !self.is_stale(entry, now))
            .map(|entry| entry.future.clone())
    }

    fn is_stale(&self, entry: &InFlight<T>, now: u64) -> bool {
        u128::from(now.saturating_sub(entry.created_at)) > self.max_age.as_millis()
    }

    fn sweep(&self, entries: &mut HashMap<String, InFlight<T>>, now: u64) {
        let before = entries.len();
        entries.retain(|_, entry| !self.is_stale(entry, now));
        tracing::debug!(
            removed = before - entries.len(),
            remaining = entries.len(),
            "Swept stale in-flight requests"
        );
    }

    /// Forgets every pending entry. Callers already awaiting keep waiting.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
