//! # Fibonacci Backoff
//!
//! Error backoff for the controller's error policy. Delays grow along the
//! Fibonacci sequence in multiples of a base step and are capped, so a
//! resource that keeps failing settles at the cap instead of growing
//! without bound.
//!
//! With a one minute step and a ten minute cap the delays are
//! 1m, 1m, 2m, 3m, 5m, 8m, 10m, 10m, ...
//!
//! ```rust
//! use oneagent_operator::controller::backoff::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_secs(60), Duration::from_secs(600));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(120));
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator, one per resource
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    step: Duration,
    max: Duration,
    /// Fibonacci pair in units of `step`
    prev: u32,
    current: u32,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            prev: 0,
            current: 1,
        }
    }

    /// Next delay; advances the sequence until the cap is reached
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.step.saturating_mul(self.current).min(self.max);
        if delay < self.max {
            let next = self.prev.saturating_add(self.current);
            self.prev = self.current;
            self.current = next;
        }
        delay
    }
}

impl Default for FibonacciBackoff {
    /// 1 minute steps, capped at 10 minutes
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(600))
    }
}
