use crate::config::GatewayConfig;
use crate::types::{GatewayError, Result};
use bytes::Bytes;
use http::HeaderMap;
use reqwest::{Client, ClientBuilder, Response};
use std::time::Duration;
use thiserror::Error;

/// Shared upstream HTTP client.
///
/// No whole-request timeout is set on the client so long streams are not cut
/// off; `timeout_seconds` bounds only the wait for response headers.
#[derive(Clone)]
pub struct ProxyClient {
    client: Client,
    header_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("no response headers after {0:?}")]
    Timeout(Duration),
}

impl ProxyClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            header_timeout: config.timeout_duration(),
        })
    }

    /// POST `body` to `url`. Resolves once the upstream status and headers
    /// are in; the body is left for the caller to consume.
    pub async fn post(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> std::result::Result<Response, SendError> {
        let request = self.client.post(url).headers(headers).body(body).send();
        match tokio::time::timeout(self.header_timeout, request).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SendError::Timeout(self.header_timeout)),
        }
    }
}
