//! Embedding-based response cache.
//!
//! [`SemanticCache`] embeds the text of each request and looks for a previously stored
//! request whose embedding is close enough (cosine similarity at or above the
//! threshold). A hit answers the request directly through a short-circuit; a miss lets
//! the request through and stores the fresh response afterwards.
//!
//! The cache text is the bare prompt string or, for message prompts, the content of
//! the most recent user message. Requests without such text are never cached.
//!
//! Storage is pluggable through [`VectorStore`]; [`InMemoryVectorStore`] is an
//! unbounded, append-only list with a linear scan.

use crate::Result;
use crate::middleware::{BeforeRequest, CallContext, Middleware};
use crate::types::{ModelResponse, Prompt};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

/// Turns text into an embedding vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Storage for cached responses keyed by embedding.
pub trait VectorStore: Send + Sync {
    fn add(&self, vector: Vec<f32>, response: ModelResponse);

    /// The stored response most similar to `vector`, if its similarity is at least
    /// `threshold`.
    fn search(&self, vector: &[f32], threshold: f32) -> Option<ModelResponse>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cosine similarity of two vectors.
///
/// `None` when the lengths differ, a vector is empty, or either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    Some(dot / denom)
}

#[derive(Debug, Clone)]
struct Entry {
    vector: Vec<f32>,
    response: ModelResponse,
}

/// Unbounded in-process [`VectorStore`].
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn add(&self, vector: Vec<f32>, response: ModelResponse) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry { vector, response });
    }

    fn search(&self, vector: &[f32], threshold: f32) -> Option<ModelResponse> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let mut best: Option<(f32, &Entry)> = None;
        for entry in entries.iter() {
            let Some(score) = cosine_similarity(vector, &entry.vector) else {
                continue;
            };
            // Strictly greater keeps the earliest entry on ties
            if best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, entry));
            }
        }

        best.filter(|(score, _)| *score >= threshold)
            .map(|(_, entry)| entry.response.clone())
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Semantic cache middleware.
pub struct SemanticCache {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    threshold: f32,
}

impl SemanticCache {
    pub const DEFAULT_THRESHOLD: f32 = 0.9;

    /// A cache over a fresh [`InMemoryVectorStore`] with the default threshold.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            store: Arc::new(InMemoryVectorStore::new()),
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = store;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }
}

impl std::fmt::Debug for SemanticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCache")
            .field("threshold", &self.threshold)
            .field("entries", &self.store.len())
            .finish()
    }
}

#[async_trait]
impl Middleware for SemanticCache {
    async fn before_request(&self, target: &str, prompt: Prompt) -> Result<BeforeRequest> {
        let Some(text) = prompt.query_text() else {
            return Ok(BeforeRequest::Continue(prompt));
        };

        let vector = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                log::warn!("embedding failed, skipping cache lookup: {}", e);
                return Ok(BeforeRequest::Continue(prompt));
            }
        };

        match self.store.search(&vector, self.threshold) {
            Some(cached) => {
                log::debug!("semantic cache hit for {}", target);
                Ok(BeforeRequest::ShortCircuit(cached))
            }
            None => Ok(BeforeRequest::Continue(prompt)),
        }
    }

    async fn after_response(
        &self,
        call: &CallContext<'_>,
        response: ModelResponse,
    ) -> Result<ModelResponse> {
        let Some(text) = call.prompt.query_text() else {
            return Ok(response);
        };

        match self.embedder.embed(text).await {
            Ok(vector) => self.store.add(vector, response.clone()),
            Err(e) => log::warn!("embedding failed, response not cached: {}", e),
        }
        Ok(response)
    }
}
