//! Bounded retry with backoff for store calls.
//!
//! Every adapter funnels its retryable work through [`RetryPolicy::run`]. The
//! policy decides how many attempts are made and how long to wait between
//! them; the [`Sleeper`] decides how waiting happens, so tests can observe the
//! schedule without sleeping.
//!
//! Only errors where [`Error::is_retryable`] is true are retried. Anything else
//! is returned from the first attempt that produced it.

use core::time::Duration;
use std::time::Instant;

use rand::Rng;

use crate::{BackendKind, Error, Result};

/// Abstracts over how the retry loop waits between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, dur: Duration);
}

/// Blocks the current thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl Sleeper for ThreadSleep {
    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

/// A point in time after which no further attempt or backoff is started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline.
    pub const fn never() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn allows(&self, wait: Duration) -> bool {
        self.remaining().is_none_or(|left| wait < left)
    }
}

/// How the base delay grows with each failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// `base` every time.
    Fixed,
    /// `base * n` after the n-th failure.
    Linear,
    /// `base * 2^(n-1)` after the n-th failure.
    Exponential,
}

/// Attempt budget and backoff schedule for one kind of store call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on the computed delay, before jitter.
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Extra random delay, as a fraction (0.0..=1.0) of the computed delay.
    pub jitter: f64,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            jitter: 0.0,
        }
    }

    /// Read-scan-write row store: 3 attempts, 0.5 s, 1 s between them.
    pub const fn tabular() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff: Backoff::Linear,
            jitter: 0.0,
        }
    }

    /// Server-side increment procedure.
    ///
    /// A timed-out call may still have incremented, so a retry can skip a
    /// value. It can never hand out the same value twice.
    pub const fn rpc() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            backoff: Backoff::Exponential,
            jitter: 0.25,
        }
    }

    /// Conditional writes against a versioned file: 5 attempts with
    /// exponential backoff from 0.5 s.
    pub const fn versioned() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff: Backoff::Exponential,
            jitter: 0.25,
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the `failed`-th attempt (1-based), before jitter.
    pub fn base_delay_after(&self, failed: u32) -> Duration {
        let failed = failed.max(1);
        let raw = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(failed),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(failed - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        raw.min(self.max_delay)
    }

    /// Delay after the `failed`-th attempt, jitter included.
    pub fn delay_after(&self, failed: u32) -> Duration {
        let base = self.base_delay_after(failed);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::rng().random_range(0.0..=jitter);
        base + base.mul_f64(extra)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts, or would cross `deadline`.
    ///
    /// `op` receives the 1-based attempt number. When the budget is spent the
    /// last error is wrapped in [`Error::RetriesExhausted`]; a single-attempt
    /// policy returns the error as is.
    pub fn run<T, F>(
        &self,
        backend: BackendKind,
        operation: &str,
        deadline: Deadline,
        op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        self.run_with(&ThreadSleep, backend, operation, deadline, op)
    }

    /// [`Self::run`] with an explicit [`Sleeper`].
    pub fn run_with<T, S, F>(
        &self,
        sleeper: &S,
        backend: BackendKind,
        _operation: &str,
        deadline: Deadline,
        mut op: F,
    ) -> Result<T>
    where
        S: Sleeper + ?Sized,
        F: FnMut(u32) -> Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if deadline.is_expired() {
                return Err(Error::DeadlineExceeded {
                    backend,
                    attempts: attempt,
                });
            }
            attempt += 1;

            let err = match op(attempt) {
                Ok(value) => {
                    #[cfg(feature = "tracing")]
                    if attempt > 1 {
                        tracing::debug!(
                            %backend,
                            operation = _operation,
                            attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= max_attempts {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    %backend,
                    operation = _operation,
                    attempt,
                    error = %err,
                    "retries exhausted"
                );
                if max_attempts == 1 {
                    return Err(err);
                }
                return Err(Error::RetriesExhausted {
                    backend,
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_after(attempt);
            if !deadline.allows(delay) {
                return Err(Error::DeadlineExceeded {
                    backend,
                    attempts: attempt,
                });
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                %backend,
                operation = _operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable error, backing off"
            );
            sleeper.sleep(delay);
        }
    }
}
