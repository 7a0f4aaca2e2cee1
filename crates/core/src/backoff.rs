//! Backoff policies: how long to wait before the next attempt, or whether to
//! give up.
//!
//! A policy is a stateless function of the attempt number. The attempt passed
//! in is the 1-based index of the attempt that just failed, so a policy that
//! allows `n` total attempts answers [`Backoff::Stop`] for attempt `n`.
//!
//! Any `Fn(u32) -> Backoff` closure is a policy, so callers can supply
//! one-off strategies without a new type.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Decision returned by a [`BackoffPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait this long, then try again.
    Wait(Duration),
    /// Give up; the last error is final.
    Stop,
}

/// Strategy mapping a failed attempt to the next wait.
pub trait BackoffPolicy: Send + Sync {
    fn next(&self, attempt: u32) -> Backoff;
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32) -> Backoff + Send + Sync,
{
    fn next(&self, attempt: u32) -> Backoff {
        self(attempt)
    }
}

/// Never retry: the first failure is final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopImmediately;

impl BackoffPolicy for StopImmediately {
    fn next(&self, _attempt: u32) -> Backoff {
        Backoff::Stop
    }
}

/// At most `attempts` attempts, with a constant pause in between.
///
/// `attempts = 0` behaves like `attempts = 1`: the task always runs once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPause {
    pub attempts: u32,
    pub pause: Duration,
}

impl FixedPause {
    pub fn new(attempts: u32, pause: Duration) -> Self {
        Self { attempts, pause }
    }
}

impl BackoffPolicy for FixedPause {
    fn next(&self, attempt: u32) -> Backoff {
        if attempt < self.attempts {
            Backoff::Wait(self.pause)
        } else {
            Backoff::Stop
        }
    }
}

/// Exponential backoff: `first * factor^(attempt - 1)`, capped at `max`.
///
/// `attempts = None` retries forever, which is what required startup
/// dependencies use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    pub first: Duration,
    /// Multiplicative growth factor.
    pub factor: f64,
    /// Maximum delay cap.
    pub max: Duration,
    /// Total attempts allowed, unbounded when `None`.
    pub attempts: Option<u32>,
    /// Jitter factor (0.0-1.0) spreading retries of many callers apart.
    pub jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(30),
            attempts: Some(5),
            jitter: 0.0,
        }
    }
}

impl ExponentialBackoff {
    /// Retry forever, doubling from `first` up to `max`.
    pub fn unbounded(first: Duration, max: Duration) -> Self {
        Self {
            first,
            max,
            attempts: None,
            ..Default::default()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the retry that follows failed attempt `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let first_ms = self.first.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let exp = self.factor.powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let raw = first_ms * exp;
        let delay_ms = if raw.is_finite() { raw.min(max_ms) } else { max_ms };

        // Deterministic spread so tests stay reproducible.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms) as u64)
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next(&self, attempt: u32) -> Backoff {
        match self.attempts {
            Some(limit) if attempt >= limit => Backoff::Stop,
            _ => Backoff::Wait(self.delay_for_attempt(attempt)),
        }
    }
}
