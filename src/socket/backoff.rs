//! Reconnect delay policy.
//!
//! Bounded exponential backoff with one bit of jitter:
//!
//! ```text
//! delay = 2^(attempt mod 7 + coin) * 500ms,   coin ∈ {0, 1}
//! ```
//!
//! The attempt counter wraps at [`CEILING`], capping the delay at 64s. It is
//! reset only once the server has welcomed a new connection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Attempt counter wraps at this value.
pub const CEILING: u32 = 7;

const BASE_DELAY_MS: u64 = 500;

#[derive(Debug)]
pub struct Backoff {
    /// Wrapped attempt counter that drives the exponent
    attempt: u32,
    /// Consecutive failures since the last welcome (never wraps)
    failures: u32,
    rng: StdRng,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Backoff {
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            attempt: 0,
            failures: 0,
            rng,
        }
    }

    /// Compute the delay before the next attempt and advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        let coin = u32::from(self.rng.gen_bool(0.5));
        let exponent = self.attempt % CEILING + coin;
        self.attempt = (self.attempt + 1) % CEILING;
        self.failures = self.failures.saturating_add(1);
        Duration::from_millis((1u64 << exponent) * BASE_DELAY_MS)
    }

    /// A connection was welcomed; start over.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.failures = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
