//! Bounded-attempt asynchronous redelivery queue.
//!
//! [`Requeue`] decouples a producer from a best-effort side effect (shipping
//! a telemetry event, notifying a peer service). `push` never blocks. A single
//! background worker runs each item; a failed item is re-enqueued after a
//! fixed pause until its attempts run out, then it is dropped with a warning.
//! Failures never reach the pusher.
//!
//! Everything is memory-resident: when the governing scope is canceled the
//! worker stops and whatever is still queued or waiting is abandoned.
//!
//! Ordering is FIFO for first deliveries only. A failed item re-enters the
//! queue behind anything pushed during its pause.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BoxError;
use crate::id::ItemId;

type WorkFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;
type Work = Box<dyn FnMut() -> WorkFuture + Send>;

/// Requeue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequeueConfig {
    /// Name for logging.
    pub name: String,
    /// Total attempts per item (including the first).
    pub attempts: u32,
    /// Constant pause before a failed item is re-enqueued.
    pub pause: Duration,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            name: "requeue".to_string(),
            attempts: 3,
            pause: Duration::from_millis(500),
        }
    }
}

impl RequeueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }
}

/// Requeue runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequeueStats {
    pub pushed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dropped: u64,
}

struct Item {
    id: ItemId,
    description: String,
    remaining: u32,
    work: Work,
}

/// Handle to a running redelivery queue. Cheap to clone.
#[derive(Clone)]
pub struct Requeue {
    name: Arc<str>,
    attempts: u32,
    tx: mpsc::UnboundedSender<Item>,
    stats: Arc<Mutex<RequeueStats>>,
    finished: CancellationToken,
}

impl std::fmt::Debug for Requeue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requeue")
            .field("name", &self.name)
            .field("attempts", &self.attempts)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Requeue {
    /// Start the worker. It runs until `scope` is canceled, whether or not
    /// any handle is still alive.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(scope: CancellationToken, config: RequeueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(RequeueStats::default()));
        let finished = CancellationToken::new();
        let name: Arc<str> = Arc::from(config.name.as_str());

        let worker = Worker {
            name: Arc::clone(&name),
            scope,
            pause: config.pause,
            requeue: tx.clone(),
            stats: Arc::clone(&stats),
        };
        let done = finished.clone();
        tokio::spawn(async move {
            worker.run(rx).await;
            done.cancel();
        });

        Self {
            name,
            attempts: config.attempts.max(1),
            tx,
            stats,
            finished,
        }
    }

    /// Enqueue `work` and return immediately.
    ///
    /// `work` is called once per attempt. Its errors are logged, never
    /// returned.
    pub fn push<F, Fut, E>(&self, description: impl Into<String>, mut work: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let work: Work = Box::new(move || {
            let fut = work();
            Box::pin(async move { fut.await.map_err(Into::into) })
        });
        let item = Item {
            id: ItemId::new(),
            description: description.into(),
            remaining: self.attempts,
            work,
        };

        record(&self.stats, |s| s.pushed += 1);
        if let Err(mpsc::error::SendError(item)) = self.tx.send(item) {
            warn!(
                requeue = %self.name,
                item_id = %item.id,
                description = %item.description,
                "requeue worker stopped; dropping item"
            );
            record(&self.stats, |s| s.dropped += 1);
        }
    }

    pub fn stats(&self) -> RequeueStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the worker has exited.
    pub fn is_closed(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Wait until the worker has exited.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }
}

struct Worker {
    name: Arc<str>,
    scope: CancellationToken,
    pause: Duration,
    requeue: mpsc::UnboundedSender<Item>,
    stats: Arc<Mutex<RequeueStats>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Item>) {
        info!(requeue = %self.name, "requeue worker started");

        loop {
            let mut item = tokio::select! {
                biased;
                _ = self.scope.cancelled() => break,
                next = rx.recv() => match next {
                    Some(item) => item,
                    None => break,
                },
            };

            let outcome = tokio::select! {
                biased;
                _ = self.scope.cancelled() => {
                    debug!(requeue = %self.name, item_id = %item.id, "abandoning in-flight item");
                    break;
                }
                outcome = (item.work)() => outcome,
            };

            match outcome {
                Ok(()) => {
                    debug!(requeue = %self.name, item_id = %item.id, "item delivered");
                    record(&self.stats, |s| s.succeeded += 1);
                }
                Err(err) => self.handle_failure(item, err),
            }
        }

        rx.close();
        info!(requeue = %self.name, "requeue worker stopped");
    }

    fn handle_failure(&self, mut item: Item, err: BoxError) {
        item.remaining = item.remaining.saturating_sub(1);

        if item.remaining == 0 {
            warn!(
                requeue = %self.name,
                item_id = %item.id,
                description = %item.description,
                error = %err,
                "dropping item after exhausting attempts"
            );
            record(&self.stats, |s| s.dropped += 1);
            return;
        }

        debug!(
            requeue = %self.name,
            item_id = %item.id,
            description = %item.description,
            remaining = item.remaining,
            error = %err,
            "item failed; requeueing after pause"
        );
        record(&self.stats, |s| s.retried += 1);

        let scope = self.scope.clone();
        let requeue = self.requeue.clone();
        let stats = Arc::clone(&self.stats);
        let name = Arc::clone(&self.name);
        let pause = self.pause;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = scope.cancelled() => {}
                _ = tokio::time::sleep(pause) => {
                    if let Err(mpsc::error::SendError(item)) = requeue.send(item) {
                        warn!(
                            requeue = %name,
                            item_id = %item.id,
                            description = %item.description,
                            "requeue worker stopped; dropping item"
                        );
                        record(&stats, |s| s.dropped += 1);
                    }
                }
            }
        });
    }
}

fn record(stats: &Mutex<RequeueStats>, f: impl FnOnce(&mut RequeueStats)) {
    f(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));
}
