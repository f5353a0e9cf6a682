//! Failure-tracking gate in front of a backend.
//!
//! The breaker counts backend failures reported through `on_error`. Once the count
//! reaches `failure_threshold` it opens and rejects every request with
//! [`Error::CircuitOpen`] until `recovery_timeout` has elapsed since the last failure.
//! The first request after that is let through as a probe (HalfOpen); a successful
//! response closes the breaker again, a failure re-opens it.
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(timeout elapsed)--> HalfOpen
//!    ^                                  ^                            |
//!    |                                  +---------(failure)----------+
//!    +-------------------------(success)-----------------------------+
//! ```
//!
//! One breaker instance guards whatever pipeline it is registered on; register one
//! pipeline per target when targets should trip independently.

use crate::middleware::{BeforeRequest, CallContext, Middleware};
use crate::types::{ModelResponse, Prompt};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker middleware.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

impl CircuitBreaker {
    /// A closed breaker that opens after `failure_threshold` failures.
    ///
    /// A threshold of zero is treated as one.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Middleware for CircuitBreaker {
    async fn before_request(&self, target: &str, prompt: Prompt) -> Result<BeforeRequest> {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure
                .is_none_or(|at| at.elapsed() > self.recovery_timeout);
            if !recovered {
                return Err(Error::circuit_open(target));
            }
            log::debug!("circuit for {} half-open, admitting probe", target);
            inner.state = CircuitState::HalfOpen;
        }
        Ok(BeforeRequest::Continue(prompt))
    }

    async fn after_response(
        &self,
        call: &CallContext<'_>,
        response: ModelResponse,
    ) -> Result<ModelResponse> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                log::debug!("probe to {} succeeded, closing circuit", call.target);
                inner.state = CircuitState::Closed;
                inner.failures = 0;
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
        Ok(response)
    }

    async fn on_error(&self, _error: &Error, target: &str) {
        let mut inner = self.lock();
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failures >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                log::warn!(
                    "circuit for {} opened after {} failures",
                    target,
                    inner.failures
                );
            }
            inner.state = CircuitState::Open;
        }
    }
}
