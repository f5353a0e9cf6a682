//! # llm-conduit
//!
//! A middleware pipeline for calling hosted language models, with the resilience,
//! caching, accounting and tool-use layers that production callers end up needing.
//!
//! ## Overview
//!
//! Every request goes through a [`Pipeline`]: an ordered list of [`Middleware`] in
//! front of a [`ChatBackend`]. Middlewares see the prompt before the call and the
//! response after it, may answer on the backend's behalf (short-circuit), and are told
//! about every failed attempt.
//!
//! ## Key Features
//!
//! - **Middleware Pipeline**: before/after/error hooks with short-circuit
//! - **Circuit Breaker**: stop calling a target after repeated failures
//! - **Rate Limiting**: sliding-window admission that waits instead of failing
//! - **Semantic Cache**: answer near-duplicate prompts from an embedding index
//! - **Cost Tracking**: token and dollar totals from a pattern-matched pricing table
//! - **Routing**: fallback chains and round-robin load balancing across targets
//! - **Tool Servers**: connect external tool servers and route calls by tool name
//! - **Agent Loop**: multi-step tool-calling runs with a step limit
//! - **Structured Output**: JSON-schema constrained responses decoded into your types
//! - **Streaming**: token-by-token text over server-sent events
//! - **Retry Logic**: exponential backoff with jitter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_conduit::{CircuitBreaker, CostTracker, Pipeline, RateLimiter};
//! use llm_conduit::config::backend_for;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let costs = Arc::new(CostTracker::new());
//!
//!     let pipeline = Pipeline::builder()
//!         .backend(backend_for("gpt-4o")?)
//!         .middleware(Arc::new(RateLimiter::per_minute(60)))
//!         .middleware(Arc::new(CircuitBreaker::default()))
//!         .middleware(costs.clone())
//!         .build()?;
//!
//!     let response = pipeline.generate("gpt-4o", "What's the capital of France?").await?;
//!     println!("{}", response.text);
//!     println!("spent ${:.4}", costs.totals().cost_usd);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **pipeline**: request execution, retries, structured output and streaming
//! - **middleware**: the hook trait and its ordered chain
//! - **circuit_breaker**, **rate_limiter**, **semantic_cache**, **usage**: built-in middlewares
//! - **routing**: fallback chains and load balancing over a pipeline
//! - **backend**: the backend seam, split into a wire-format provider and a transport
//! - **openai**, **http**: the chat-completions provider and the `reqwest` transport
//! - **tool_server**, **process**: tool-server lifecycle and stdio subprocess plumbing
//! - **agent**: the multi-step tool-calling loop
//! - **tools**, **types**: local tool definitions and the core message types
//! - **config**: provider selection by target name and environment lookup
//! - **retry**: exponential backoff with jitter

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Multi-step tool-calling agent bound to one model.
mod agent;

/// Backend seam: `ChatBackend`, plus the `Provider`/`Transport` split behind it.
mod backend;

/// Circuit breaker middleware.
mod circuit_breaker;

/// Error types and the crate-wide `Result<T>` alias.
mod error;

/// `reqwest`-based transport with server-sent-event streaming.
mod http;

/// Middleware trait and chain.
mod middleware;

/// OpenAI-compatible chat-completions provider and wire types.
mod openai;

/// The request pipeline and per-target handles.
mod pipeline;

/// Sliding-window rate limiter middleware.
mod rate_limiter;

/// Fallback chains and load balancing.
mod routing;

/// Embedding-based response cache middleware.
mod semantic_cache;

/// Local tool definitions and registry.
mod tools;

/// Core message, prompt and response types.
mod types;

/// Pricing tables and the cost tracker middleware.
mod usage;

// ============================================================================
// PUBLIC MODULES
// ============================================================================

/// Provider selection and environment configuration.
pub mod config;

/// Subprocess channels and the stdio connector for tool servers.
pub mod process;

/// Retry utilities with exponential backoff and jitter.
/// Public so callers can reuse the retry policy for their own operations.
pub mod retry;

/// Tool-server sessions, connectors and the manager that routes calls between them.
pub mod tool_server;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

// --- Pipeline ---

pub use pipeline::{ModelHandle, Pipeline, PipelineBuilder};

// --- Middleware ---

pub use middleware::{BeforeRequest, CallContext, Middleware, MiddlewareChain};

pub use circuit_breaker::{CircuitBreaker, CircuitState};

pub use rate_limiter::RateLimiter;

pub use semantic_cache::{
    EmbeddingProvider, InMemoryVectorStore, SemanticCache, VectorStore, cosine_similarity,
};

pub use usage::{CostTracker, ModelPricing, PricingEntry, PricingTable, UsageTotals};

// --- Routing ---

pub use routing::{FallbackChain, LoadBalancer};

// --- Backends ---

pub use backend::{
    ChatBackend, ChatRequest, PreparedRequest, Provider, ProviderBackend, RawStream,
    TextStream, Transport,
};

pub use http::HttpTransport;

pub use openai::OpenAiProvider;

// --- Tools and Agents ---

pub use agent::{Agent, AgentBuilder, MAX_STEPS_REACHED, RunOutcome};

pub use tool_server::{Connector, ToolServerConfig, ToolServerManager, ToolServerSession};

pub use process::{ProcessChannel, StdioConnector};

pub use tools::{Tool, ToolBuilder, ToolRegistry, ToolSpec, tool};

// --- Configuration ---

pub use config::ProviderKind;

pub use retry::RetryConfig;

// --- Error Handling ---

pub use error::{Error, Result};

// --- Core Types ---

pub use types::{Message, MessageRole, ModelResponse, Prompt, StreamChunk, ToolCall, Usage};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use llm_conduit::prelude::*;`.
pub mod prelude {
    pub use crate::{
        Agent, BeforeRequest, CallContext, ChatBackend, CircuitBreaker, CostTracker, Error,
        Message, Middleware, ModelResponse, Pipeline, Prompt, RateLimiter, Result, RunOutcome,
        SemanticCache, Tool, ToolServerManager, tool,
    };
}
