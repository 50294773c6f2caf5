//! Integration tests using wiremock to simulate HTTP servers.

use async_trait::async_trait;
use cushion::retry::FixedJitter;
use cushion::{
    CacheSetting, Client, Error, Interceptor, RequestDescriptor, Result, RetryConfig,
    RetryPredicate, RetrySetting,
};
use http::Method;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TestData {
    id: u32,
    name: String,
}

fn test_data() -> TestData {
    TestData {
        id: 1,
        name: "Test".to_string(),
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig::default()
        .with_initial_delay(Duration::from_millis(10))
        .with_jitter(0.0)
}

fn client(server: &MockServer) -> Client {
    Client::builder()
        .base_url(server.uri())
        .unwrap()
        .retry(fast_retry().into())
        .jitter(Arc::new(FixedJitter(0.5)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    let response = client.get::<TestData>("/test").await.unwrap();

    assert_eq!(response.data, test_data());
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
    assert!(!response.cached);

    // Second read is served from the cache.
    let cached = client.get::<TestData>("/test").await.unwrap();
    assert_eq!(cached.data, test_data());
    assert!(cached.cached);
    assert_eq!(client.cache_len(), 1);
}

#[tokio::test]
async fn test_successful_post_request() {
    let mock_server = MockServer::start().await;

    let request_data = TestData {
        id: 0,
        name: "New".to_string(),
    };

    Mock::given(method("POST"))
        .and(path("/test"))
        .and(body_json(&request_data))
        .respond_with(ResponseTemplate::new(201).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let response = client(&mock_server)
        .post::<TestData, TestData>("/test", &request_data)
        .await
        .unwrap();

    assert_eq!(response.data, test_data());
    assert_eq!(response.status.as_u16(), 201);
    assert!(!response.cached);
}

#[tokio::test]
async fn test_http_error_4xx() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "nope"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let error = client(&mock_server)
        .get::<TestData>("/missing")
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Api { retryable: false, .. }));
    assert!(error.is_client_error());
    assert_eq!(error.status().map(|s| s.as_u16()), Some(404));
    assert_eq!(
        error.details().and_then(|d| d.body.clone()),
        Some(serde_json::json!({"error": "nope"}))
    );
}

#[tokio::test]
async fn test_validation_error_is_parsed_and_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "errors": {
                "email": ["is invalid", "is taken"],
                "name": ["can't be blank"]
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = client(&mock_server)
        .put::<_, TestData>("/users/1", &serde_json::json!({"email": "x"}))
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, Error::Validation { .. }));
    assert!(!error.is_retryable());
    assert_eq!(error.errors_for_field("email").count(), 2);
    assert!(error.has_error_for_field("name"));
    assert!(!error.has_error_for_field("password"));
}

#[tokio::test]
async fn test_deserialization_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"unexpected\": true}"))
        .mount(&mock_server)
        .await;

    let result = client(&mock_server).get::<TestData>("/test").await;

    match result {
        Err(Error::Deserialization {
            raw_response,
            status,
            ..
        }) => {
            assert_eq!(raw_response, "{\"unexpected\": true}");
            assert_eq!(status.as_u16(), 200);
        }
        _ => panic!("Expected Deserialization, got {:?}", result),
    }
}

#[tokio::test]
async fn test_retry_on_5xx() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First two requests fail with 503, third succeeds
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(503).set_body_string("Unavailable")
            } else {
                ResponseTemplate::new(200).set_body_json(test_data())
            }
        })
        .mount(&mock_server)
        .await;

    let response = client(&mock_server).get::<TestData>("/test").await.unwrap();

    assert_eq!(response.data.id, 1);
    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_exhausted_returns_last_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad gateway"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let error = client(&mock_server).get::<TestData>("/test").await.unwrap_err();

    assert!(error.is_server_error());
    assert!(error.is_retryable());
    assert_eq!(error.status().map(|s| s.as_u16()), Some(502));
}

#[tokio::test]
async fn test_post_not_retried_by_default() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let error = client(&mock_server)
        .post::<_, serde_json::Value>("/orders", &serde_json::json!({"sku": "a"}))
        .await
        .unwrap_err();

    assert_eq!(error.status().map(|s| s.as_u16()), Some(500));
}

#[tokio::test]
async fn test_post_retried_when_enabled_per_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let request = RequestDescriptor::new(Method::POST, "/orders")
        .with_body(&serde_json::json!({"sku": "a"}))
        .unwrap()
        .with_retry(fast_retry().into());

    let result = client(&mock_server).call::<serde_json::Value>(request).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_custom_retry_predicate() {
    let mock_server = MockServer::start().await;

    // Only retries on 503
    struct RetryOn503;
    impl RetryPredicate for RetryOn503 {
        fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
            error.status().is_some_and(|s| s.as_u16() == 503)
        }
    }

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry(fast_retry().with_predicate(Arc::new(RetryOn503)).into())
        .build()
        .unwrap();

    // Fails immediately because 500 doesn't match the predicate
    let error = client.get::<TestData>("/test").await.unwrap_err();
    assert_eq!(error.status().map(|s| s.as_u16()), Some(500));
}

#[tokio::test]
async fn test_default_headers_and_query_parameters() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(header("x-client", "cushion"))
        .and(header("x-request", "override"))
        .and(query_param("q", "rust"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .default_header("x-client", "cushion")
        .unwrap()
        .default_header("x-request", "default")
        .unwrap()
        .build()
        .unwrap();

    let request = RequestDescriptor::get("/search")
        .with_query_param("q", "rust")
        .with_query_param("page", 2)
        .with_header("x-request", "override")
        .unwrap();

    let response = client.call::<Vec<TestData>>(request).await.unwrap();
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn test_all_http_methods() {
    let mock_server = MockServer::start().await;

    for verb in ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"] {
        Mock::given(method(verb))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
            .mount(&mock_server)
            .await;
    }

    let client = client(&mock_server);
    let body = test_data();

    assert_eq!(client.get::<TestData>("/resource").await.unwrap().data.id, 1);
    assert_eq!(client.post::<_, TestData>("/resource", &body).await.unwrap().data.id, 1);
    assert_eq!(client.put::<_, TestData>("/resource", &body).await.unwrap().data.id, 1);
    assert_eq!(client.patch::<_, TestData>("/resource", &body).await.unwrap().data.id, 1);
    assert_eq!(client.delete::<TestData>("/resource").await.unwrap().data.id, 1);
    assert_eq!(client.head("/resource").await.unwrap().status.as_u16(), 200);
}

#[tokio::test]
async fn test_mutation_invalidates_cached_reads() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(201).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);

    client.get::<Vec<TestData>>("/api/users").await.unwrap();
    assert!(client.get::<Vec<TestData>>("/api/users").await.unwrap().cached);

    client.post::<_, TestData>("/api/users", &test_data()).await.unwrap();
    assert_eq!(client.cache_len(), 0);

    let refetched = client.get::<Vec<TestData>>("/api/users").await.unwrap();
    assert!(!refetched.cached);
}

#[tokio::test]
async fn test_invalidate_cache_pattern() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    for url in ["/api/users", "/api/users/1", "/api/posts/1"] {
        client.get::<TestData>(url).await.unwrap();
    }
    assert_eq!(client.cache_len(), 3);

    assert_eq!(client.invalidate_cache("/api/users/*"), 2);
    assert!(client.get::<TestData>("/api/posts/1").await.unwrap().cached);

    client.clear_cache();
    assert_eq!(client.cache_len(), 0);
}

#[tokio::test]
async fn test_concurrent_identical_requests_are_deduplicated() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(test_data())
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .cache(CacheSetting::Disabled)
        .build()
        .unwrap();

    let (a, b, c) = tokio::join!(
        client.get::<TestData>("/slow"),
        client.get::<TestData>("/slow"),
        client.get::<TestData>("/slow"),
    );

    assert_eq!(a.unwrap().data, test_data());
    assert_eq!(b.unwrap().data, test_data());
    assert_eq!(c.unwrap().data, test_data());
    assert_eq!(client.in_flight_len(), 0);
}

#[tokio::test]
async fn test_attempt_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(test_data())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .timeout(Duration::from_millis(50))
        .retry(RetrySetting::Disabled)
        .build()
        .unwrap();

    let error = client.get::<TestData>("/slow").await.unwrap_err();
    match error {
        Error::Timeout { timeout, .. } => assert_eq!(timeout, Duration::from_millis(50)),
        other => panic!("Expected Timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancellation() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(test_data())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    let token = CancellationToken::new();
    let canceller = token.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let request = RequestDescriptor::get("/slow").with_cancellation(token);
    let error = client.call::<TestData>(request).await.unwrap_err();

    assert!(matches!(error, Error::Cancelled));
    assert!(!error.is_retryable());
    assert_eq!(client.cache_len(), 0);
}

#[tokio::test]
async fn test_network_error() {
    // Nothing listens on port 1.
    let client = Client::builder()
        .base_url("http://127.0.0.1:1")
        .unwrap()
        .retry(RetrySetting::Disabled)
        .build()
        .unwrap();

    let error = client.get::<TestData>("/test").await.unwrap_err();
    assert!(matches!(error, Error::Network { .. }));
    assert!(error.is_network_error());
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_interceptors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;

    struct Auth;

    #[async_trait]
    impl Interceptor for Auth {
        async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
            request.with_header("authorization", "Bearer secret")
        }

        async fn on_error(&self, error: Error) -> Result<cushion::RawResponse> {
            if error.status().is_some_and(|s| s.as_u16() == 410) {
                let body = serde_json::json!({"id": 0, "name": "gone"});
                return Ok(cushion::RawResponse::json(&body));
            }
            Err(error)
        }
    }

    let client = client(&mock_server);
    let handle = client.add_interceptor(Auth);

    assert_eq!(client.get::<TestData>("/private").await.unwrap().data.id, 1);
    assert_eq!(client.get::<TestData>("/gone").await.unwrap().data.name, "gone");

    assert!(handle.remove());
    client.clear_cache();
    let error = client.get::<TestData>("/private").await.unwrap_err();
    assert_eq!(error.status().map(|s| s.as_u16()), Some(404));
}

#[tokio::test]
async fn test_rate_limit_with_retry_after_seconds() {
    let mock_server = MockServer::start().await;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First request returns 429 with Retry-After, second succeeds
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "1")
                    .insert_header("x-ratelimit-remaining", "0")
                    .set_body_string("Rate limited")
            } else {
                ResponseTemplate::new(200).set_body_json(test_data())
            }
        })
        .mount(&mock_server)
        .await;

    let start = std::time::Instant::now();
    let response = client(&mock_server).get::<TestData>("/test").await.unwrap();

    assert_eq!(response.data.id, 1);
    assert_eq!(response.attempts, 2);
    // Waited for the server-requested second, not the 10ms backoff.
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_retry_after_ignored_when_disabled() {
    let mock_server = MockServer::start().await;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429).insert_header("retry-after", "60")
            } else {
                ResponseTemplate::new(200).set_body_json(test_data())
            }
        })
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry(
            fast_retry()
                .with_retry_after(false, Duration::from_secs(300))
                .into(),
        )
        .build()
        .unwrap();

    let start = std::time::Instant::now();
    let response = client.get::<TestData>("/test").await.unwrap();

    assert_eq!(response.attempts, 2);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_redacted_error_hides_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("x-api-key", "leaked-key")
                .insert_header("x-request-id", "req-1"),
        )
        .mount(&mock_server)
        .await;

    let error = client(&mock_server).get::<TestData>("/secure").await.unwrap_err();
    let json = serde_json::to_string(&error.to_redacted()).unwrap();

    assert!(!json.contains("leaked-key"));
    assert!(json.contains("[REDACTED]"));
    assert!(json.contains("req-1"));
}
