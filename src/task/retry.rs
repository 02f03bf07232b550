// src/task/retry.rs

use std::time::Duration;

use crate::task::TaskError;

/// How many times a task may retry a retryable step error.
///
/// Retries live inside the task: a retried step keeps the task `Running` and
/// the runner simply polls it again on its next interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_retries: 0 }
    }

    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether `err` should be retried given `retries` already consumed.
    pub fn should_retry(&self, err: &TaskError, retries: u32) -> bool {
        err.is_retryable() && retries < self.max_retries
    }
}

/// Growing poll interval: starts at `initial`, multiplies by `factor` after
/// every wait, never exceeds `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        let factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.0
        };
        Self {
            current: initial.min(max),
            factor,
            max,
        }
    }

    /// The delay to wait now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .map_or(self.max, |next| next.min(self.max));
        delay
    }
}
