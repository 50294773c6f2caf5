//! Example demonstrating error handling.
//!
//! This example shows how to:
//! - Branch on the error kind
//! - Inspect status, body and headers of failed responses
//! - Deal with deserialization failures
//! - Log errors without leaking credentials
//!
//! Run with: `cargo run --example error_handling`

use cushion::{Client, Error, RetrySetting};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    id: u32,
    title: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("cushion=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .default_header("authorization", "Bearer not-a-real-token")?
        .build()?;

    println!("=== Example 1: Handling HTTP Errors ===");
    match client.get::<Post>("/posts/999999").await {
        Ok(response) => println!("Success: {:?}", response.data),
        Err(e @ Error::Api { .. }) => {
            println!("API error: {}", e);
            println!("  Status: {:?}", e.status());
            println!("  Is client error (4xx): {}", e.is_client_error());
            println!("  Is server error (5xx): {}", e.is_server_error());
            println!("  Retryable: {}", e.is_retryable());
            if let Some(details) = e.details() {
                println!("  Body: {:?}", details.body);
            }
        }
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 2: Handling Deserialization Errors ===");
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct WrongSchema {
        nonexistent_field: String,
    }

    match client.get::<WrongSchema>("/posts/1").await {
        Ok(response) => println!("Unexpected success: {:?}", response.data),
        Err(Error::Deserialization {
            raw_response,
            serde_error,
            status,
        }) => {
            println!("Deserialization failed (status {})", status);
            println!("  Error: {}", serde_error);
            println!("  Raw response: {}", raw_response);
        }
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 3: Network Errors and Timeouts ===");
    let unreachable = Client::builder()
        .base_url("http://127.0.0.1:1")?
        .timeout(Duration::from_secs(2))
        .retry(RetrySetting::Disabled)
        .build()?;

    match unreachable.get::<Post>("/posts/1").await {
        Ok(_) => println!("Unexpected success"),
        Err(e) if e.is_network_error() => {
            println!("Offline: {} (retryable: {})", e, e.is_retryable());
        }
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 4: Redacted Error Logging ===");
    if let Err(e) = client.get::<Post>("/does-not-exist").await {
        println!("{}", serde_json::to_string_pretty(&e.to_redacted())?);
    }

    Ok(())
}
