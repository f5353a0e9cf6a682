//! Sliding-window request shaping.
//!
//! [`RateLimiter`] admits at most `max_requests` calls per trailing `window`. A caller
//! that finds the window full is delayed, not rejected: it sleeps until the oldest
//! admission leaves the window and then checks again. The lock is never held while
//! sleeping, so other callers can still inspect the window, and every waiter
//! re-validates after waking.

use crate::Result;
use crate::middleware::{BeforeRequest, Middleware};
use crate::types::Prompt;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Sliding-window rate limiter middleware.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

impl RateLimiter {
    /// At most `max_requests` per `window`; zero is treated as one.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(requests_per_minute: usize) -> Self {
        Self::new(requests_per_minute, Duration::from_secs(60))
    }

    /// Waits until a slot is free, then records the admission.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut admitted = self.lock();
                let now = Instant::now();
                while admitted
                    .front()
                    .is_some_and(|at| now.duration_since(*at) >= self.window)
                {
                    admitted.pop_front();
                }

                if admitted.len() < self.max_requests {
                    admitted.push_back(now);
                    return;
                }

                match admitted.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            log::debug!("rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Admissions currently inside the window.
    pub fn admitted_in_window(&self) -> usize {
        let admitted = self.lock();
        let now = Instant::now();
        admitted
            .iter()
            .filter(|at| now.duration_since(**at) < self.window)
            .count()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.admitted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Middleware for RateLimiter {
    async fn before_request(&self, _target: &str, prompt: Prompt) -> Result<BeforeRequest> {
        self.acquire().await;
        Ok(BeforeRequest::Continue(prompt))
    }
}
