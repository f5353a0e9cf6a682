//! The request pipeline: middleware chain, backend call, retry.
//!
//! A [`Pipeline`] owns one [`ChatBackend`], an ordered [`MiddlewareChain`] and a retry
//! policy. Every entry point goes through the same path:
//!
//! ```text
//! before_request (in order, may short-circuit)
//!     -> backend call, with on_error + backoff around transient failures
//!     -> after_response (in order)
//! ```
//!
//! Pipelines are cheap to share behind `Arc`; routing strategies and the agent hold
//! them that way.
//!
//! # Example
//!
//! ```rust,no_run
//! use llm_conduit::{CircuitBreaker, CostTracker, Pipeline, ProviderBackend};
//! use llm_conduit::{HttpTransport, OpenAiProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> llm_conduit::Result<()> {
//! let tracker = Arc::new(CostTracker::new());
//! let pipeline = Pipeline::builder()
//!     .backend(ProviderBackend::new(
//!         OpenAiProvider::new("https://api.openai.com/v1"),
//!         HttpTransport::new(std::env::var("OPENAI_API_KEY").ok())?,
//!     ))
//!     .middleware(Arc::new(CircuitBreaker::default()))
//!     .middleware(tracker.clone())
//!     .build()?;
//!
//! let response = pipeline.generate("gpt-4o", "Hello!").await?;
//! println!("{} (${:.4})", response.text, tracker.totals().cost_usd);
//! # Ok(())
//! # }
//! ```

use crate::backend::{ChatBackend, ChatRequest, TextStream};
use crate::middleware::{ChainOutcome, Middleware, MiddlewareChain};
use crate::retry::{RetryConfig, RetryPredicate, is_retryable_error, retry_with_backoff_if};
use crate::tools::ToolSpec;
use crate::types::{Message, ModelResponse, Prompt};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Backend plus middleware plus retry policy.
#[derive(Clone)]
pub struct Pipeline {
    backend: Arc<dyn ChatBackend>,
    middlewares: MiddlewareChain,
    retry: RetryConfig,
    should_retry: RetryPredicate,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Sends a prompt to `target`.
    pub async fn generate(&self, target: &str, prompt: impl Into<Prompt>) -> Result<ModelResponse> {
        self.execute(target, prompt.into(), &[], None).await
    }

    /// Sends a prompt to `target`, advertising `tools` the model may call.
    pub async fn generate_with_tools(
        &self,
        target: &str,
        prompt: impl Into<Prompt>,
        tools: &[ToolSpec],
    ) -> Result<ModelResponse> {
        self.execute(target, prompt.into(), tools, None).await
    }

    /// Asks for a JSON reply matching `schema` and decodes it into `T`.
    ///
    /// The schema is appended as an instruction to the last user message and also
    /// handed to the backend, which may enforce it natively. A reply wrapped in a
    /// Markdown code fence is unwrapped before decoding. Any decoding failure is an
    /// [`Error::StructuredOutput`] carrying the raw reply text.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        target: &str,
        prompt: impl Into<Prompt>,
        schema: &Value,
    ) -> Result<T> {
        let response = self
            .execute(target, prompt.into(), &[], Some(schema))
            .await?;
        decode_structured(&response.text)
    }

    /// Streams text deltas for a prompt.
    ///
    /// Pre-hooks run as usual; a short-circuit yields the cached text as a single item.
    /// Post-hooks and retries do not apply to streams.
    pub async fn stream(&self, target: &str, prompt: impl Into<Prompt>) -> Result<TextStream> {
        let prompt = match self.middlewares.run_before(target, prompt.into()).await? {
            ChainOutcome::ShortCircuit(response) => {
                let once = futures::stream::once(async move { Ok::<_, Error>(response.text) });
                return Ok(Box::pin(once));
            }
            ChainOutcome::Proceed { prompt, .. } => prompt,
        };

        let messages = prompt.into_messages();
        let request = ChatRequest::new(target, &messages);
        self.backend.stream(&request).await
    }

    /// A handle bound to one target.
    pub fn model(self: &Arc<Self>, target: impl Into<String>) -> ModelHandle {
        ModelHandle {
            pipeline: self.clone(),
            target: target.into(),
        }
    }

    pub fn middlewares(&self) -> &MiddlewareChain {
        &self.middlewares
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    async fn execute(
        &self,
        target: &str,
        prompt: Prompt,
        tools: &[ToolSpec],
        schema: Option<&Value>,
    ) -> Result<ModelResponse> {
        let (prompt, seen) = match self.middlewares.run_before(target, prompt).await? {
            ChainOutcome::ShortCircuit(response) => return Ok(response),
            ChainOutcome::Proceed { prompt, seen } => (prompt, seen),
        };

        let mut messages = prompt.into_messages();
        if let Some(schema) = schema {
            append_schema_instruction(&mut messages, schema);
        }
        let mut request = ChatRequest::new(target, &messages).with_tools(tools);
        if let Some(schema) = schema {
            request = request.with_response_schema(schema, false);
        }

        let backend = &self.backend;
        let chain = &self.middlewares;
        let request = &request;
        let response = retry_with_backoff_if(
            self.retry.clone(),
            |err: &Error| (self.should_retry)(err),
            move || async move {
                match backend.complete(request).await {
                    Ok(response) => Ok(response),
                    Err(err) => {
                        log::debug!("backend call to {} failed: {}", target, err);
                        chain.run_on_error(&err, target).await;
                        Err(err)
                    }
                }
            },
        )
        .await?;

        self.middlewares.run_after(target, &seen, response).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.middlewares)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    backend: Option<Arc<dyn ChatBackend>>,
    middlewares: MiddlewareChain,
    retry: Option<RetryConfig>,
    should_retry: Option<RetryPredicate>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("backend", &self.backend.is_some())
            .field("middlewares", &self.middlewares)
            .field("retry", &self.retry)
            .finish()
    }
}

impl PipelineBuilder {
    pub fn backend(mut self, backend: impl ChatBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn shared_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Appends a middleware; registration order is execution order.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Overrides which backend errors are retried.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let backend = self
            .backend
            .ok_or_else(|| Error::config("backend is required"))?;

        Ok(Pipeline {
            backend,
            middlewares: self.middlewares,
            retry: self.retry.unwrap_or_default(),
            should_retry: self
                .should_retry
                .unwrap_or_else(|| Arc::new(is_retryable_error)),
        })
    }
}

/// A pipeline bound to one target.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pipeline: Arc<Pipeline>,
    target: String,
}

impl ModelHandle {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub async fn generate(&self, prompt: impl Into<Prompt>) -> Result<ModelResponse> {
        self.pipeline.generate(&self.target, prompt).await
    }

    pub async fn generate_with_tools(
        &self,
        prompt: impl Into<Prompt>,
        tools: &[ToolSpec],
    ) -> Result<ModelResponse> {
        self.pipeline
            .generate_with_tools(&self.target, prompt, tools)
            .await
    }

    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        prompt: impl Into<Prompt>,
        schema: &Value,
    ) -> Result<T> {
        self.pipeline
            .generate_structured(&self.target, prompt, schema)
            .await
    }

    pub async fn stream(&self, prompt: impl Into<Prompt>) -> Result<TextStream> {
        self.pipeline.stream(&self.target, prompt).await
    }
}

fn append_schema_instruction(messages: &mut Vec<Message>, schema: &Value) {
    let pretty = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    let instruction = format!(
        "\n\nRestricted Output Mode: You must respond strictly with a valid JSON object \
         that matches the following JSON Schema.\n\
         Do not return the schema itself. Return the data instance.\n\
         Schema:\n{pretty}"
    );

    match messages.last_mut() {
        Some(Message::User { content }) => content.push_str(&instruction),
        _ => messages.push(Message::user(instruction)),
    }
}

/// Removes a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the opening fence line, including any language tag
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => return rest.trim(),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn decode_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| Error::structured_output(e.to_string(), text))
}
