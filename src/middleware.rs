//! Middleware contract and the ordered chain that drives it.
//!
//! A [`Middleware`] wraps every backend call with three hooks:
//!
//! 1. **`before_request`**: sees the target and the prompt before the backend does.
//!    It can pass the prompt on (possibly rewritten) or answer the request itself
//!    with a ready-made [`ModelResponse`] (a *short-circuit*).
//! 2. **`after_response`**: sees every successful backend response and may replace it.
//! 3. **`on_error`**: observes each failed backend attempt.
//!
//! # Execution Model
//!
//! The chain is **not** an onion. Both hook phases run in registration order:
//!
//! ```text
//! before_request:  m0 -> m1 -> m2 -> backend
//! after_response:  m0 -> m1 -> m2 -> caller
//! on_error:        m0 -> m1 -> m2 -> retry decision
//! ```
//!
//! A short-circuit stops everything at once. If `m1` answers from its cache, `m2`'s
//! `before_request` never runs, the backend is never called, and **no**
//! `after_response` runs at all, including `m0`'s. A cache hit therefore bypasses any
//! cost accounting registered around it. This asymmetry is part of the contract.
//!
//! # Per-request context
//!
//! `after_response` receives a [`CallContext`] holding the target and the prompt that
//! *this* middleware saw in `before_request`. Middlewares correlate responses with
//! requests through that argument, never through fields on `self`, which keeps them
//! correct when one instance serves many concurrent requests.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use llm_conduit::{BeforeRequest, Middleware, Prompt, Result};
//!
//! struct Suffix;
//!
//! #[async_trait]
//! impl Middleware for Suffix {
//!     async fn before_request(&self, _target: &str, prompt: Prompt) -> Result<BeforeRequest> {
//!         let text = match prompt {
//!             Prompt::Text(text) => format!("{text} [SUFFIX]"),
//!             other => return Ok(BeforeRequest::Continue(other)),
//!         };
//!         Ok(BeforeRequest::Continue(Prompt::Text(text)))
//!     }
//! }
//! ```

use crate::types::{ModelResponse, Prompt};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// What a `before_request` hook decided.
#[derive(Debug, Clone, PartialEq)]
pub enum BeforeRequest {
    /// Hand this prompt to the next middleware (or the backend).
    Continue(Prompt),
    /// Answer the request now; the rest of the pipeline is skipped.
    ShortCircuit(ModelResponse),
}

/// Per-request facts handed to `after_response`.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Backend identifier the request was sent to.
    pub target: &'a str,
    /// The prompt as this middleware received it in `before_request`.
    pub prompt: &'a Prompt,
}

/// A pluggable cross-cutting component around backend calls.
///
/// Every hook has a pass-through default, so implementors override only what they need.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Inspect or rewrite a prompt, or answer the request directly.
    ///
    /// Returning `Err` aborts the request immediately: the backend is not called and
    /// `on_error` does not run. The circuit breaker uses this to reject calls.
    async fn before_request(&self, _target: &str, prompt: Prompt) -> Result<BeforeRequest> {
        Ok(BeforeRequest::Continue(prompt))
    }

    /// Inspect or replace a successful backend response.
    async fn after_response(
        &self,
        _call: &CallContext<'_>,
        response: ModelResponse,
    ) -> Result<ModelResponse> {
        Ok(response)
    }

    /// Observe a failed backend attempt.
    async fn on_error(&self, _error: &Error, _target: &str) {}
}

/// Outcome of running every `before_request` hook.
#[derive(Debug)]
pub(crate) enum ChainOutcome {
    /// All hooks continued. `seen[i]` is the prompt middleware `i` received.
    Proceed { prompt: Prompt, seen: Vec<Prompt> },
    /// A hook answered the request.
    ShortCircuit(ModelResponse),
}

/// Ordered collection of middlewares.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware; it runs after everything already registered.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `before_request` in registration order, stopping at the first short-circuit.
    pub(crate) async fn run_before(&self, target: &str, prompt: Prompt) -> Result<ChainOutcome> {
        let mut seen = Vec::with_capacity(self.middlewares.len());
        let mut prompt = prompt;

        for (index, middleware) in self.middlewares.iter().enumerate() {
            seen.push(prompt.clone());
            match middleware.before_request(target, prompt).await? {
                BeforeRequest::Continue(next) => prompt = next,
                BeforeRequest::ShortCircuit(response) => {
                    log::debug!(
                        "middleware #{} short-circuited request for {}",
                        index,
                        target
                    );
                    return Ok(ChainOutcome::ShortCircuit(response));
                }
            }
        }

        Ok(ChainOutcome::Proceed { prompt, seen })
    }

    /// Runs `after_response` in registration order, threading the response forward.
    pub(crate) async fn run_after(
        &self,
        target: &str,
        seen: &[Prompt],
        response: ModelResponse,
    ) -> Result<ModelResponse> {
        let mut response = response;
        for (middleware, prompt) in self.middlewares.iter().zip(seen) {
            let call = CallContext { target, prompt };
            response = middleware.after_response(&call, response).await?;
        }
        Ok(response)
    }

    /// Runs `on_error` on every middleware in registration order.
    pub(crate) async fn run_on_error(&self, error: &Error, target: &str) {
        for middleware in &self.middlewares {
            middleware.on_error(error, target).await;
        }
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middlewares", &format!("{} middlewares", self.middlewares.len()))
            .finish()
    }
}
