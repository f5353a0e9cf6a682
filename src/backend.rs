//! Backend seams: what the pipeline calls once every middleware has let a request through.
//!
//! The pipeline only knows [`ChatBackend`]. Most backends are a [`Provider`] (turns a
//! [`ChatRequest`] into a JSON payload and parses the reply) joined with a
//! [`Transport`] (moves JSON over the wire); [`ProviderBackend`] glues the two. Tests
//! and custom integrations can implement `ChatBackend` directly.

use crate::tools::ToolSpec;
use crate::types::{Message, ModelResponse, StreamChunk};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

/// Stream of raw JSON chunks as delivered by a transport.
pub type RawStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Stream of text deltas handed to callers of `Pipeline::stream`.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Everything a backend needs to serve one call.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    /// Backend identifier, usually a model name.
    pub target: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    /// JSON Schema the reply must conform to, when structured output is requested.
    pub response_schema: Option<&'a Value>,
    /// Ask the provider to enforce `response_schema` strictly, where supported.
    pub strict: bool,
}

impl<'a> ChatRequest<'a> {
    pub fn new(target: &'a str, messages: &'a [Message]) -> Self {
        Self {
            target,
            messages,
            tools: &[],
            response_schema: None,
            strict: false,
        }
    }

    pub fn with_tools(mut self, tools: &'a [ToolSpec]) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_schema(mut self, schema: &'a Value, strict: bool) -> Self {
        self.response_schema = Some(schema);
        self.strict = strict;
        self
    }
}

/// The call the pipeline makes after the pre-hooks.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Executes one non-streaming call.
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ModelResponse>;

    /// Executes one streaming call, yielding text deltas.
    async fn stream(&self, request: &ChatRequest<'_>) -> Result<TextStream> {
        Err(Error::config(format!(
            "streaming is not supported for {}",
            request.target
        )))
    }
}

/// An endpoint plus the JSON body to post to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub endpoint: String,
    pub payload: Value,
}

/// Per-provider request/response translation.
pub trait Provider: Send + Sync {
    /// Builds the request for `request`, marking it as streaming when `stream` is set.
    fn prepare_request(&self, request: &ChatRequest<'_>, stream: bool) -> Result<PreparedRequest>;

    /// Parses a complete non-streaming reply.
    fn parse_response(&self, raw: Value) -> Result<ModelResponse>;

    /// Parses one streamed chunk; `None` for chunks that carry no text.
    fn parse_stream_chunk(&self, raw: &Value) -> Result<Option<StreamChunk>>;
}

/// Wire transport for prepared requests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &str, payload: &Value) -> Result<Value>;

    async fn send_streaming(&self, endpoint: &str, payload: &Value) -> Result<RawStream>;
}

/// A [`ChatBackend`] made of a provider and a transport.
pub struct ProviderBackend<P, T> {
    provider: Arc<P>,
    transport: Arc<T>,
}

impl<P, T> ProviderBackend<P, T>
where
    P: Provider + 'static,
    T: Transport + 'static,
{
    pub fn new(provider: P, transport: T) -> Self {
        Self {
            provider: Arc::new(provider),
            transport: Arc::new(transport),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<P, T> ChatBackend for ProviderBackend<P, T>
where
    P: Provider + 'static,
    T: Transport + 'static,
{
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ModelResponse> {
        let prepared = self.provider.prepare_request(request, false)?;
        log::debug!("sending {} request to {}", request.target, prepared.endpoint);
        let raw = self
            .transport
            .send(&prepared.endpoint, &prepared.payload)
            .await?;
        self.provider.parse_response(raw)
    }

    async fn stream(&self, request: &ChatRequest<'_>) -> Result<TextStream> {
        let prepared = self.provider.prepare_request(request, true)?;
        let raw = self
            .transport
            .send_streaming(&prepared.endpoint, &prepared.payload)
            .await?;

        let provider = self.provider.clone();
        let text = raw.filter_map(move |chunk| {
            let parsed = chunk.and_then(|value| provider.parse_stream_chunk(&value));
            let item = match parsed {
                Ok(Some(chunk)) => Some(Ok(chunk.text)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(item)
        });
        Ok(Box::pin(text))
    }
}
