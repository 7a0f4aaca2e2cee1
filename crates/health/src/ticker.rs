//! Ramp-up probe loop.
//!
//! An [`ExponentialTicker`] probes immediately, then waits `initial`,
//! doubling the wait after every probe until it reaches `steady`. A freshly
//! started service therefore learns quickly when a dependency comes up, and
//! settles into a cheap steady cadence afterwards.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shortest wait the ticker will use, so a zero interval cannot spin.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialTicker {
    initial: Duration,
    steady: Duration,
}

impl ExponentialTicker {
    pub fn new(initial: Duration, steady: Duration) -> Self {
        let steady = steady.max(MIN_WAIT);
        Self {
            initial: initial.clamp(MIN_WAIT, steady),
            steady,
        }
    }

    /// Start probing on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(initial: Duration, steady: Duration, probe: F) -> TickerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(initial, steady).spawn(probe)
    }

    pub fn spawn<F, Fut>(self, mut probe: F) -> TickerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = TickerHandle {
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
        };

        let stop = handle.stop.clone();
        let done = handle.done.clone();
        tokio::spawn(async move {
            let mut wait = self.initial;
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = probe() => {}
                }
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                wait = wait.saturating_mul(2).min(self.steady);
            }
            debug!("ticker stopped");
            done.cancel();
        });

        handle
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn steady(&self) -> Duration {
        self.steady
    }
}

/// Control handle for a running ticker.
#[derive(Debug, Clone)]
pub struct TickerHandle {
    stop: CancellationToken,
    done: CancellationToken,
}

impl TickerHandle {
    /// Ask the loop to exit. No probe starts after this returns.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait until the loop has exited.
    pub async fn stopped(&self) {
        self.done.cancelled().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.done.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    fn recording(start: Instant, into: Arc<Mutex<Vec<u128>>>) -> impl FnMut() -> std::future::Ready<()> {
        move || {
            into.lock().unwrap().push(start.elapsed().as_millis());
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_double_until_steady() {
        let start = Instant::now();
        let probes = Arc::new(Mutex::new(Vec::new()));
        let ticker = ExponentialTicker::start(
            Duration::from_millis(10),
            Duration::from_millis(160),
            recording(start, probes.clone()),
        );

        tokio::time::sleep(Duration::from_millis(480)).await;
        ticker.stop();
        ticker.stopped().await;

        assert_eq!(*probes.lock().unwrap(), vec![0, 10, 30, 70, 150, 310, 470]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_probe_after_stop() {
        let start = Instant::now();
        let probes = Arc::new(Mutex::new(Vec::new()));
        let ticker = ExponentialTicker::start(
            Duration::from_millis(10),
            Duration::from_millis(160),
            recording(start, probes.clone()),
        );

        tokio::time::sleep(Duration::from_millis(35)).await;
        ticker.stop();
        ticker.stopped().await;
        assert!(ticker.is_stopped());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*probes.lock().unwrap(), vec![0, 10, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_abandons_a_hung_probe() {
        let ticker = ExponentialTicker::start(Duration::from_millis(10), Duration::from_secs(1), || {
            std::future::pending::<()>()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        ticker.stop();
        ticker.stopped().await;
    }

    #[test]
    fn intervals_are_clamped() {
        let t = ExponentialTicker::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(t.initial(), MIN_WAIT);
        assert_eq!(t.steady(), MIN_WAIT);

        let t = ExponentialTicker::new(Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(t.initial(), Duration::from_secs(30));
    }
}
