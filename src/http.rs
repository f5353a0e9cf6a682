//! HTTP transport over `reqwest`, with server-sent-event streaming.

use crate::backend::{RawStream, Transport};
use crate::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;

/// Default request timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// POSTs JSON payloads, authenticating with a bearer token when one is set.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// The timeout applies to the entire request, including reading a streamed body.
    pub fn with_timeout(api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { client, api_key })
    }

    /// Wraps an existing client.
    pub fn from_client(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    async fn post(&self, endpoint: &str, payload: &Value) -> Result<reqwest::Response> {
        let mut request = self.client.post(endpoint).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout()
            } else {
                Error::Http(e)
            }
        })?;

        // Authentication failures, rate limits and unknown models surface here
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                log::warn!("failed to read error response body: {}", e);
                "Unknown error (failed to read response body)".to_string()
            });
            return Err(Error::api(format!("API error {}: {}", status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        let response = self.post(endpoint, payload).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn send_streaming(&self, endpoint: &str, payload: &Value) -> Result<RawStream> {
        let response = self.post(endpoint, payload).await?;

        let events = response.bytes_stream().eventsource().filter_map(|event| {
            let item = match event {
                Ok(event) if event.data.trim() == "[DONE]" => None,
                Ok(event) if event.data.trim().is_empty() => None,
                Ok(event) => Some(
                    serde_json::from_str::<Value>(&event.data)
                        .map_err(|e| Error::stream(format!("Failed to parse chunk: {}", e))),
                ),
                Err(e) => Some(Err(Error::stream(e.to_string()))),
            };
            futures::future::ready(item)
        });

        Ok(Box::pin(events))
    }
}
