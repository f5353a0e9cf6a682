//! Token and cost accounting.
//!
//! [`CostTracker`] adds the usage of every completed request to running totals and
//! prices it with a [`PricingTable`]. The target used for pricing comes from the
//! request's own [`CallContext`], so concurrent requests to different targets are
//! always billed at their own rates.
//!
//! Requests answered by a short-circuit (for example a semantic cache hit) never reach
//! `after_response` and are not billed.

use crate::Result;
use crate::middleware::{CallContext, Middleware};
use crate::types::ModelResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Rates in USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    /// Cost of a request with the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input
            + (output_tokens as f64 / 1_000_000.0) * self.output
    }
}

/// One row of a [`PricingTable`]: targets containing `pattern` use `pricing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub pattern: String,
    #[serde(flatten)]
    pub pricing: ModelPricing,
}

/// Ordered price list; the first entry whose pattern is a substring of the target wins.
///
/// Deserializes from a JSON array:
///
/// ```rust
/// use llm_conduit::PricingTable;
///
/// let table: PricingTable = serde_json::from_str(
///     r#"[{"pattern": "my-model", "input": 1.0, "output": 2.0}]"#,
/// ).unwrap();
/// assert!(table.lookup("my-model-v2").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable {
    entries: Vec<PricingEntry>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::empty()
            .with("gpt-4", ModelPricing::new(30.0, 60.0))
            .with("gpt-4o", ModelPricing::new(5.0, 15.0))
            .with("gpt-3.5", ModelPricing::new(0.5, 1.5))
            .with("claude-3-opus", ModelPricing::new(15.0, 75.0))
            .with("claude-3-sonnet", ModelPricing::new(3.0, 15.0))
            .with("claude-3-haiku", ModelPricing::new(0.25, 1.25))
            .with("gemini-1.5-pro", ModelPricing::new(3.5, 10.5))
            .with("gemini-1.5-flash", ModelPricing::new(0.35, 0.7))
            .with("gemini-2.0", ModelPricing::new(0.0, 0.0))
            .with("grok-2", ModelPricing::new(2.0, 10.0))
    }
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry after all existing ones.
    pub fn with(mut self, pattern: impl Into<String>, pricing: ModelPricing) -> Self {
        self.entries.push(PricingEntry {
            pattern: pattern.into(),
            pricing,
        });
        self
    }

    pub fn lookup(&self, target: &str) -> Option<&ModelPricing> {
        if target.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| target.contains(entry.pattern.as_str()))
            .map(|entry| &entry.pricing)
    }

    pub fn entries(&self) -> &[PricingEntry] {
        &self.entries
    }
}

/// Running totals reported by [`CostTracker::totals`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub requests: u64,
}

/// Usage and cost accounting middleware.
#[derive(Debug, Default)]
pub struct CostTracker {
    pricing: PricingTable,
    totals: Mutex<UsageTotals>,
}

impl CostTracker {
    /// A tracker using the default price list.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            totals: Mutex::new(UsageTotals::default()),
        }
    }

    /// Adds one completed request for `target` to the totals.
    pub fn record(&self, target: &str, response: &ModelResponse) {
        let mut totals = self.lock();
        totals.requests += 1;

        let Some(usage) = response.usage else {
            return;
        };
        totals.input_tokens += usage.input_tokens;
        totals.output_tokens += usage.output_tokens;

        match self.pricing.lookup(target) {
            Some(rates) => totals.cost_usd += rates.cost(usage.input_tokens, usage.output_tokens),
            None => log::debug!("no pricing for {}, tokens counted without cost", target),
        }
    }

    pub fn totals(&self) -> UsageTotals {
        *self.lock()
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn reset(&self) {
        *self.lock() = UsageTotals::default();
    }

    fn lock(&self) -> MutexGuard<'_, UsageTotals> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Middleware for CostTracker {
    async fn after_response(
        &self,
        call: &CallContext<'_>,
        response: ModelResponse,
    ) -> Result<ModelResponse> {
        self.record(call.target, &response);
        Ok(response)
    }
}
