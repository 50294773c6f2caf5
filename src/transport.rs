//! The network boundary.
//!
//! The resilience layer only needs one operation from the network: perform a
//! request and return `{status, headers, body}`, failing on non-2xx statuses
//! and connection errors. [`ReqwestTransport`] is the default implementation;
//! tests substitute their own.

use crate::request::RequestDescriptor;
use crate::response::RawResponse;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Performs a single HTTP exchange.
///
/// Implementations must return [`Error::from_status`] for non-2xx responses
/// and a network error when no response was received. Retries, timeouts and
/// caching are handled by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, request: &RequestDescriptor) -> Result<RawResponse>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestTransport {
    /// Creates a transport resolving request paths against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the HTTP client cannot be built.
    pub fn new(base_url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Uses a preconfigured `reqwest` client.
    pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the full URL for a request, including its query parameters.
    pub fn url_for(&self, request: &RequestDescriptor) -> Result<Url> {
        let mut url = match Url::parse(&request.url) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut url = self.base_url.clone();
                let (path, query) = match request.url.split_once('?') {
                    Some((path, query)) => (path, Some(query)),
                    None => (request.url.as_str(), None),
                };
                url.set_path(path);
                url.set_query(query);
                url
            }
            Err(e) => return Err(e.into()),
        };

        if !request.query_params.is_empty() {
            let mut params: Vec<_> = request.query_params.iter().collect();
            params.sort_by(|a, b| a.0.cmp(b.0));

            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                match value {
                    Value::Null => {}
                    Value::Array(items) => {
                        for item in items {
                            if let Some(item) = query_value(item) {
                                pairs.append_pair(key, &item);
                            }
                        }
                    }
                    other => {
                        if let Some(value) = query_value(other) {
                            pairs.append_pair(key, &value);
                        }
                    }
                }
            }
        }

        Ok(url)
    }
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(crate::key::stable_key(other)),
    }
}

fn classify(err: reqwest::Error) -> Error {
    if err.is_builder() {
        return Error::Configuration(err.to_string());
    }
    Error::network(err.to_string(), Some(Arc::new(err)))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn perform(&self, request: &RequestDescriptor) -> Result<RawResponse> {
        let url = self.url_for(request)?;

        tracing::debug!(
            method = %request.method,
            url = %url,
            "Executing HTTP request"
        );

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(classify)?;

        if !status.is_success() {
            if status.is_client_error() {
                tracing::error!(
                    status = status.as_u16(),
                    response = %body,
                    "Client error (4xx)"
                );
            } else if status.is_server_error() {
                tracing::warn!(
                    status = status.as_u16(),
                    response = %body,
                    "Server error (5xx)"
                );
            }
            return Err(Error::from_status(status, headers, &body));
        }

        tracing::info!(status = status.as_u16(), "Received HTTP response");
        Ok(RawResponse::new(status, headers, body))
    }
}
