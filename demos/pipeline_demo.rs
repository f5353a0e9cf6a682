//! Pipeline Demo
//!
//! Builds a production-style pipeline against a hosted model and shows each layer at
//! work: rate limiting, circuit breaking, semantic caching, cost tracking, fallback
//! and structured output.
//!
//! Usage:
//!   OPENAI_API_KEY=sk-... cargo run --example pipeline_demo
//!
//! Set LLM_CONDUIT_BASE_URL to point at any OpenAI-compatible server instead.

use async_trait::async_trait;
use futures::StreamExt;
use llm_conduit::config::backend_for;
use llm_conduit::{
    CircuitBreaker, CostTracker, EmbeddingProvider, FallbackChain, Pipeline, RateLimiter,
    RetryConfig, SemanticCache,
};
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Bag-of-letters embedding; good enough to show near-duplicate hits offline.
struct LetterEmbedder;

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    async fn embed(&self, text: &str) -> llm_conduit::Result<Vec<f32>> {
        let mut counts = vec![0.0f32; 26];
        for c in text.to_lowercase().chars().filter(char::is_ascii_lowercase) {
            counts[(c as u8 - b'a') as usize] += 1.0;
        }
        Ok(counts)
    }
}

#[derive(Debug, Deserialize)]
struct Capital {
    country: String,
    capital: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("{}", "=".repeat(70));
    println!("PIPELINE DEMO");
    println!("{}", "=".repeat(70));

    let costs = Arc::new(CostTracker::new());
    let breaker = Arc::new(CircuitBreaker::new(3, Duration::from_secs(30)));
    let cache = Arc::new(SemanticCache::new(Arc::new(LetterEmbedder)).with_threshold(0.97));

    // Costs first: cache hits short-circuit before they are billed
    let pipeline = Arc::new(
        Pipeline::builder()
            .backend(backend_for("gpt-4o-mini")?)
            .middleware(Arc::new(RateLimiter::per_minute(30)))
            .middleware(breaker.clone())
            .middleware(costs.clone())
            .middleware(cache.clone())
            .retry(RetryConfig::new().with_max_attempts(2))
            .build()?,
    );

    println!("\n[1] Plain request");
    let response = pipeline
        .generate("gpt-4o-mini", "What is the capital of France?")
        .await?;
    println!("  {}", response.text);

    println!("\n[2] Near-duplicate request (served from the semantic cache)");
    let cached = pipeline
        .generate("gpt-4o-mini", "what is the capital of france")
        .await?;
    println!("  {}", cached.text);
    println!("  cache entries: {}", cache.store().len());

    println!("\n[3] Structured output");
    let schema = json!({
        "type": "object",
        "properties": {
            "country": {"type": "string"},
            "capital": {"type": "string"}
        },
        "required": ["country", "capital"]
    });
    let capital: Capital = pipeline
        .generate_structured("gpt-4o-mini", "Give me the capital of Japan.", &schema)
        .await?;
    println!("  {} -> {}", capital.country, capital.capital);

    println!("\n[4] Fallback across targets");
    let chain = FallbackChain::new(pipeline.clone(), ["gpt-nonexistent", "gpt-4o-mini"]);
    let response = chain.generate("Name one prime number.").await?;
    println!("  {}", response.text);
    println!("  breaker state: {:?}", breaker.state());

    println!("\n[5] Streaming");
    print!("  ");
    let mut stream = pipeline
        .stream("gpt-4o-mini", "Count from one to five in words.")
        .await?;
    while let Some(delta) = stream.next().await {
        print!("{}", delta?);
        std::io::stdout().flush()?;
    }
    println!();

    let totals = costs.totals();
    println!("\n{}", "=".repeat(70));
    println!(
        "requests: {}  tokens in/out: {}/{}  cost: ${:.6}",
        totals.requests, totals.input_tokens, totals.output_tokens, totals.cost_usd
    );
    Ok(())
}
