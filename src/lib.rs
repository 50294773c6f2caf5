//! # Cushion - a resilient HTTP request layer
//!
//! Cushion wraps HTTP calls with three policies: concurrent identical requests
//! share one underlying call, GET responses are cached with a TTL and
//! invalidated by mutations, and transient failures are retried with
//! exponential backoff. Every failure reaches the caller as a classified
//! [`Error`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use cushion::Client;
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateUser {
//!     name: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cushion::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .timeout(Duration::from_secs(10))
//!         .build()?;
//!
//!     // Retried on 408, 429 and 5xx, then cached for five minutes.
//!     let user = client.get::<User>("/users/123").await?;
//!     println!("User: {} ({} attempts)", user.data.name, user.attempts);
//!
//!     // Not retried by default; invalidates cached `/users*` responses.
//!     let created = client
//!         .post::<_, User>("/users", &CreateUser { name: "Alice".to_string() })
//!         .await?;
//!     println!("Created user with ID: {}", created.data.id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Deduplication** - Concurrent requests with the same method, URL, parameters,
//!   body and headers issue one network call
//! - **Response caching** - TTL cache for GET requests with prefix-pattern invalidation
//! - **Retries** - Exponential backoff with jitter, `Retry-After` support and safe
//!   defaults for non-idempotent methods
//! - **Error taxonomy** - API, network, timeout, validation and cancellation failures
//!   with redacted serialization
//! - **Interceptors** - Async hooks on requests, responses and errors
//! - **Pluggable transport** - `reqwest` by default, any [`Transport`] in tests
//!
//! ## Error Handling
//!
//! ```no_run
//! use cushion::{Client, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! match client.post::<_, serde_json::Value>("/users", &serde_json::json!({"email": ""})).await {
//!     Ok(response) => println!("Created: {:?}", response.data),
//!     Err(Error::Validation { errors, .. }) => {
//!         for error in errors {
//!             eprintln!("{}: {}", error.field, error.message);
//!         }
//!     }
//!     Err(e) if e.is_network_error() => eprintln!("Offline: {}", e),
//!     Err(e) => {
//!         let redacted = serde_json::to_string(&e.to_redacted()).unwrap_or_default();
//!         eprintln!("Request failed: {}", redacted);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod client;
pub mod clock;
pub mod dedup;
mod error;
pub mod interceptor;
pub mod key;
pub mod rate_limit;
pub mod request;
mod response;
pub mod retry;
pub mod transport;
pub mod validation;

pub use cache::{CacheOptions, CacheSetting};
pub use client::{Client, ClientBuilder};
pub use error::{Error, ErrorDetails, RedactedError, Result};
pub use interceptor::{Interceptor, InterceptorHandle};
pub use request::{RequestDescriptor, RequestOptions};
pub use response::{RawResponse, Response};
pub use retry::{RetryConfig, RetryPredicate, RetrySetting};
pub use transport::Transport;
pub use validation::FieldError;
