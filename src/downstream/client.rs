//! HTTP transport to the device management API.
//!
//! # Responsibilities
//! - Send one resolved request with a per-attempt timeout
//! - Attach the tenant's key, falling back to the configured one
//! - Reduce every outcome to a JSON body or a raw [`Failure`]
//!
//! Retries, caching and circuit breaking live in the resilience layer; this type only
//! performs single attempts.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::DownstreamConfig;
use crate::downstream::operations::DownstreamRequest;
use crate::downstream::types::Failure;

/// A single-attempt sender. The executor is generic over this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one attempt. 2xx yields the decoded body; everything else a [`Failure`].
    async fn send(&self, request: &DownstreamRequest, timeout: Duration) -> Result<Value, Failure>;
}

/// Errors building the HTTP transport.
#[derive(Debug, Error)]
pub enum TransportBuildError {
    #[error("invalid downstream base URL '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// reqwest-backed transport with a pooled client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &DownstreamConfig) -> Result<Self, TransportBuildError> {
        url::Url::parse(&config.base_url).map_err(|source| TransportBuildError::Url {
            url: config.base_url.clone(),
            source,
        })?;

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(20)
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &DownstreamRequest, timeout: Duration) -> Result<Value, Failure> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url_for(&request.path))
            .timeout(timeout)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(key) = request.credential.as_deref().or(self.api_key.as_deref()) {
            let value = HeaderValue::from_str(key)
                .map_err(|_| Failure::Other("credential is not a valid header value".to_string()))?;
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Failure::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| Failure::Other(format!("invalid JSON from downstream: {}", e)))
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> Failure {
    if err.is_timeout() {
        Failure::Timeout(timeout.as_millis() as u64)
    } else if err.is_connect() || err.is_request() || err.is_body() {
        Failure::Connect(err.to_string())
    } else {
        Failure::Other(err.to_string())
    }
}
