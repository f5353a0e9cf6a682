//! Multi-target routing strategies over a shared pipeline.
//!
//! - [`FallbackChain`] tries targets in order until one succeeds.
//! - [`LoadBalancer`] spreads requests across targets round-robin.
//!
//! Both dispatch through the full [`Pipeline`] path, so middlewares and retries apply to
//! every attempt.

use crate::pipeline::Pipeline;
use crate::types::{ModelResponse, Prompt};
use crate::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError};

/// Sequential fallback across targets.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    pipeline: Arc<Pipeline>,
    targets: Vec<String>,
}

impl FallbackChain {
    pub fn new<I, S>(pipeline: Arc<Pipeline>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pipeline,
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Returns the first successful response, or the last error if every target failed.
    pub async fn generate(&self, prompt: impl Into<Prompt>) -> Result<ModelResponse> {
        let prompt = prompt.into();
        let mut last_error = None;

        for target in &self.targets {
            match self.pipeline.generate(target, prompt.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    log::warn!("target {} failed, trying next: {}", target, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(Error::NoTargets))
    }
}

/// Round-robin distribution across targets.
#[derive(Debug)]
pub struct LoadBalancer {
    pipeline: Arc<Pipeline>,
    targets: Vec<String>,
    cursor: Mutex<usize>,
}

impl LoadBalancer {
    pub fn new<I, S>(pipeline: Arc<Pipeline>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pipeline,
            targets: targets.into_iter().map(Into::into).collect(),
            cursor: Mutex::new(0),
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Picks the next target and advances the cursor.
    pub fn next_target(&self) -> Result<&str> {
        if self.targets.is_empty() {
            return Err(Error::NoTargets);
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let target = &self.targets[*cursor % self.targets.len()];
        *cursor = (*cursor + 1) % self.targets.len();
        Ok(target)
    }

    pub async fn generate(&self, prompt: impl Into<Prompt>) -> Result<ModelResponse> {
        let target = self.next_target()?;
        self.pipeline.generate(target, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatBackend, ChatRequest};
    use crate::retry::RetryConfig;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ChatBackend for Echo {
        async fn complete(&self, request: &ChatRequest<'_>) -> Result<ModelResponse> {
            if request.target.starts_with("down") {
                return Err(Error::api(format!("API error 400: {} rejected", request.target)));
            }
            Ok(ModelResponse::new(request.target))
        }
    }

    fn pipeline() -> Arc<Pipeline> {
        Arc::new(
            Pipeline::builder()
                .backend(Echo)
                .retry(RetryConfig::disabled())
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_round_robin_order() {
        let balancer = LoadBalancer::new(pipeline(), ["a", "b"]);
        let picks: Vec<_> = (0..5).map(|_| balancer.next_target().unwrap()).collect();
        assert_eq!(picks, vec!["a", "b", "a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_empty_targets() {
        let balancer = LoadBalancer::new(pipeline(), Vec::<String>::new());
        assert!(matches!(balancer.generate("p").await, Err(Error::NoTargets)));

        let chain = FallbackChain::new(pipeline(), Vec::<String>::new());
        assert!(matches!(chain.generate("p").await, Err(Error::NoTargets)));
    }

    #[tokio::test]
    async fn test_fallback_returns_first_success() {
        let chain = FallbackChain::new(pipeline(), ["down-1", "up", "never"]);
        let response = chain.generate("p").await.unwrap();
        assert_eq!(response.text, "up");
    }

    #[tokio::test]
    async fn test_fallback_surfaces_last_error() {
        let chain = FallbackChain::new(pipeline(), ["down-1", "down-2"]);
        let err = chain.generate("p").await.unwrap_err();
        assert!(err.to_string().contains("down-2"));
    }
}
