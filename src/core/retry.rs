//! Bounded retry policy used by the credential readiness poll.

use crate::core::config::{Backoff, ReadinessConfig};
use crate::core::time::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any single delay, whatever the backoff.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Attempt ceiling, backoff function and clock source for one retry loop.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff,
            clock,
        }
    }

    pub fn from_config(config: &ReadinessConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.max_attempts, config.base_delay(), config.backoff, clock)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt.max(1)),
        };
        delay.min(MAX_DELAY)
    }

    /// Block the calling thread between attempts. No pause follows the last one.
    pub fn pause_after(&self, attempt: u32) {
        if attempt < self.max_attempts {
            self.clock.sleep(self.delay_after(attempt));
        }
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Longest time a caller can be blocked by a full run of this policy.
    pub fn worst_case_latency(&self) -> Duration {
        (1..self.max_attempts)
            .map(|a| self.delay_after(a))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff", &self.backoff)
            .finish()
    }
}
