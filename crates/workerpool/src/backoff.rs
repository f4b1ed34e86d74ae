//! Polling interval backoff
//!
//! An empty dispatcher tick multiplies the interval by [`BACKOFF_FACTOR`];
//! a tick that yields work snaps it back to the base interval.

use std::time::Duration;

use crate::config::PollerConfig;

/// Multiplier applied to the polling interval after an empty tick
pub const BACKOFF_FACTOR: u32 = 10;

/// Current polling interval of a dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub struct PollBackoff {
    base: Duration,
    max: Option<Duration>,
    current: Duration,
}

impl PollBackoff {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            base: config.base_interval,
            max: config.max_interval,
            current: config.base_interval,
        }
    }

    /// Interval to arm the timer with
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Widen the interval after a tick that found no work
    pub fn back_off(&mut self) -> Duration {
        let next = self
            .current
            .checked_mul(BACKOFF_FACTOR)
            .unwrap_or(Duration::MAX);
        self.current = match self.max {
            Some(max) => next.min(max),
            None => next,
        };
        self.current
    }

    /// Return to the base interval after a tick that found work
    pub fn reset(&mut self) -> Duration {
        self.current = self.base;
        self.current
    }
}
