//! Retrying task executor.
//!
//! Used for startup work that must eventually succeed (connecting to a
//! database, subscribing to a broker) and for any other call where a
//! transient failure is expected. The executor itself never bounds elapsed
//! time; the [`BackoffPolicy`] decides when to give up.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffPolicy};

/// One retryable unit of work.
pub struct RetryTask<F> {
    /// Human-readable description used in logs.
    pub description: String,
    /// Phase tag for log correlation (e.g. `"startup"`).
    pub phase: &'static str,
    pub policy: Arc<dyn BackoffPolicy>,
    pub task: F,
}

impl<F> RetryTask<F> {
    pub fn new(
        description: impl Into<String>,
        phase: &'static str,
        policy: impl BackoffPolicy + 'static,
        task: F,
    ) -> Self {
        Self {
            description: description.into(),
            phase,
            policy: Arc::new(policy),
            task,
        }
    }

    /// Share an existing policy between several tasks.
    pub fn with_shared_policy(
        description: impl Into<String>,
        phase: &'static str,
        policy: Arc<dyn BackoffPolicy>,
        task: F,
    ) -> Self {
        Self {
            description: description.into(),
            phase,
            policy,
            task,
        }
    }
}

/// Runs [`RetryTask`]s until success, policy exhaustion, or cancellation.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    scope: CancellationToken,
}

impl RetryExecutor {
    pub fn new(scope: CancellationToken) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Invoke the task until it succeeds.
    ///
    /// Returns the last error once the policy says [`Backoff::Stop`], or as
    /// soon as the scope is canceled while waiting between attempts.
    pub async fn run<T, E, F, Fut>(&self, task: RetryTask<F>) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let RetryTask {
            description,
            phase,
            policy,
            mut task,
        } = task;

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);

            let err = match task().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(description = %description, phase, attempt, "task succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            warn!(
                description = %description,
                phase,
                attempt,
                error = %err,
                "task attempt failed"
            );

            let wait = match policy.next(attempt) {
                Backoff::Stop => {
                    warn!(description = %description, phase, attempt, "giving up on task");
                    return Err(err);
                }
                Backoff::Wait(wait) => wait,
            };

            if self.scope.is_cancelled() {
                debug!(description = %description, phase, "scope canceled; not retrying");
                return Err(err);
            }

            tokio::select! {
                biased;
                _ = self.scope.cancelled() => {
                    debug!(description = %description, phase, attempt, "scope canceled during backoff");
                    return Err(err);
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
