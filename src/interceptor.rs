//! Request, response and error hooks.
//!
//! Interceptors run in registration order for every phase. Each hook receives
//! the value produced by the previous interceptor, so they compose into a
//! chain.

use crate::request::RequestDescriptor;
use crate::response::RawResponse;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Hooks around every request issued through a [`crate::Client`].
///
/// All methods default to passing their input through unchanged.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use cushion::{Interceptor, RequestDescriptor, Result};
///
/// struct Auth(String);
///
/// #[async_trait]
/// impl Interceptor for Auth {
///     async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
///         request.with_header("authorization", format!("Bearer {}", self.0))
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Transforms the outgoing request before caching, deduplication and
    /// retries are applied.
    async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
        Ok(request)
    }

    /// Transforms a successful response, including cache hits.
    async fn on_response(&self, response: RawResponse) -> Result<RawResponse> {
        Ok(response)
    }

    /// Sees a failure after retries are exhausted.
    ///
    /// Returning `Ok` recovers with a synthetic response; the remaining
    /// interceptors' `on_error` hooks are skipped. Returning `Err` passes the
    /// (possibly replaced) error on.
    async fn on_error(&self, error: Error) -> Result<RawResponse> {
        Err(error)
    }
}

/// Ordered interceptor registry.
#[derive(Default)]
pub struct Interceptors {
    entries: Mutex<Vec<(u64, Arc<dyn Interceptor>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptors")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl Interceptors {
    /// Appends an interceptor and returns a handle that removes it.
    pub fn add(self: &Arc<Self>, interceptor: Arc<dyn Interceptor>) -> InterceptorHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, interceptor));
        InterceptorHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// The interceptors registered right now, in order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Interceptor>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, interceptor)| Arc::clone(interceptor))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) async fn run_request(
        chain: &[Arc<dyn Interceptor>],
        mut request: RequestDescriptor,
    ) -> Result<RequestDescriptor> {
        for interceptor in chain {
            request = interceptor.on_request(request).await?;
        }
        Ok(request)
    }

    pub(crate) async fn run_response(
        chain: &[Arc<dyn Interceptor>],
        mut response: RawResponse,
    ) -> Result<RawResponse> {
        for interceptor in chain {
            response = interceptor.on_response(response).await?;
        }
        Ok(response)
    }

    pub(crate) async fn run_error(
        chain: &[Arc<dyn Interceptor>],
        mut error: Error,
    ) -> Result<RawResponse> {
        for interceptor in chain {
            match interceptor.on_error(error).await {
                Ok(recovered) => {
                    tracing::debug!("Interceptor recovered from error");
                    return Ok(recovered);
                }
                Err(next) => error = next,
            }
        }
        Err(error)
    }
}

/// Removes an interceptor from its client.
///
/// Dropping the handle leaves the interceptor registered.
#[derive(Debug)]
pub struct InterceptorHandle {
    id: u64,
    registry: Weak<Interceptors>,
}

impl InterceptorHandle {
    /// Unregisters the interceptor. Returns `false` if it was already gone.
    pub fn remove(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    struct Tag(&'static str);

    #[async_trait]
    impl Interceptor for Tag {
        async fn on_request(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor> {
            request.url.push_str(self.0);
            Ok(request)
        }
    }

    struct Recover;

    #[async_trait]
    impl Interceptor for Recover {
        async fn on_error(&self, error: Error) -> Result<RawResponse> {
            if error.status() == Some(StatusCode::NOT_FOUND) {
                return Ok(RawResponse::json(&serde_json::json!(null)));
            }
            Err(error)
        }
    }

    #[tokio::test]
    async fn test_request_chain_runs_in_order() {
        let registry = Arc::new(Interceptors::default());
        registry.add(Arc::new(Tag("/a")));
        registry.add(Arc::new(Tag("/b")));

        let request = Interceptors::run_request(&registry.snapshot(), RequestDescriptor::get(""))
            .await
            .unwrap();
        assert_eq!(request.url, "/a/b");
    }

    #[tokio::test]
    async fn test_handle_removes_interceptor() {
        let registry = Arc::new(Interceptors::default());
        let first = registry.add(Arc::new(Tag("/a")));
        registry.add(Arc::new(Tag("/b")));

        assert!(first.remove());
        assert_eq!(registry.len(), 1);

        let request = Interceptors::run_request(&registry.snapshot(), RequestDescriptor::get(""))
            .await
            .unwrap();
        assert_eq!(request.url, "/b");
    }

    #[tokio::test]
    async fn test_error_recovery() {
        let registry = Arc::new(Interceptors::default());
        registry.add(Arc::new(Recover));
        let chain = registry.snapshot();

        let not_found = Error::from_status(StatusCode::NOT_FOUND, http::HeaderMap::new(), "");
        let recovered = Interceptors::run_error(&chain, not_found).await.unwrap();
        assert_eq!(recovered.body, "null");

        let server = Error::from_status(StatusCode::BAD_GATEWAY, http::HeaderMap::new(), "");
        let passed = Interceptors::run_error(&chain, server).await.unwrap_err();
        assert_eq!(passed.status(), Some(StatusCode::BAD_GATEWAY));
    }
}
