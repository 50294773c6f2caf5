//! Example demonstrating caching, deduplication and invalidation.
//!
//! Run with: `cargo run --example caching`

use cushion::{CacheOptions, CacheSetting, Client, Error, RequestDescriptor};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("cushion=debug,caching=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .cache(CacheOptions::default().with_ttl(Duration::from_secs(30)).into())
        .build()?;

    println!("=== Concurrent identical requests ===");
    let (a, b, c) = tokio::join!(
        client.get::<Value>("/users/1"),
        client.get::<Value>("/users/1"),
        client.get::<Value>("/users/1"),
    );
    println!("All succeeded: {}", a.is_ok() && b.is_ok() && c.is_ok());
    println!("In flight now: {}", client.in_flight_len());
    println!();

    println!("=== Custom cache key ===");
    let ignore_page = CacheSetting::Enabled(CacheOptions::default().with_key(Arc::new(
        |request: &RequestDescriptor| format!("comments:{}", request.url),
    )));
    for page in 1..=2 {
        let request = RequestDescriptor::get("/comments")
            .with_query_param("_page", page)
            .with_cache(ignore_page.clone());
        let response = client.call::<Value>(request).await?;
        println!("Page {}: cached = {}", page, response.cached);
    }
    println!();

    println!("=== Invalidation ===");
    client.get::<Value>("/users/2").await?;
    println!("Cached responses: {}", client.cache_len());
    println!("Removed: {}", client.invalidate_cache("/users/*"));
    println!("Cached responses: {}", client.cache_len());

    client.clear_cache();
    Ok(())
}
