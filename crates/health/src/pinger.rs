//! Background health probing of shared dependencies.

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use metaex_auth::RemoteKeyStore;
use metaex_core::BoxError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::ticker::{ExponentialTicker, TickerHandle};

/// A dependency that can be asked whether it is reachable.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), BoxError>;
}

/// Refetches the key set from its source, bypassing the fetcher's cache.
#[async_trait]
impl HealthCheck for RemoteKeyStore {
    async fn health_check(&self) -> Result<(), BoxError> {
        self.refresh_key_set().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingerKind {
    KeyStore,
    Cache,
    Database,
    SearchIndex,
}

impl fmt::Display for PingerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KeyStore => "key_store",
            Self::Cache => "cache",
            Self::Database => "database",
            Self::SearchIndex => "search_index",
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum PingError {
    /// No probe has completed yet.
    #[error("not probed yet")]
    NeverRun,

    #[error("{kind} probe failed: {source}")]
    Probe {
        kind: PingerKind,
        source: Arc<dyn StdError + Send + Sync>,
    },
}

impl PartialEq for PingError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NeverRun, Self::NeverRun) => true,
            (Self::Probe { kind: a, source: x }, Self::Probe { kind: b, source: y }) => {
                a == b && x.to_string() == y.to_string()
            }
            _ => false,
        }
    }
}

/// Probe cadence: start at `initial`, double up to `steady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSchedule {
    pub initial: Duration,
    pub steady: Duration,
}

impl Default for PingSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            steady: Duration::from_secs(30),
        }
    }
}

impl PingSchedule {
    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_steady(mut self, steady: Duration) -> Self {
        self.steady = steady;
        self
    }
}

type Status = Arc<Mutex<Result<(), PingError>>>;

/// Periodically probes one dependency and remembers the last outcome.
pub struct Pinger {
    kind: PingerKind,
    status: Status,
    ticker: TickerHandle,
}

impl fmt::Debug for Pinger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinger")
            .field("kind", &self.kind)
            .field("last_error", &self.last_error())
            .finish()
    }
}

impl Pinger {
    /// Start probing `client` on `schedule`.
    ///
    /// # Panics
    ///
    /// If `client` is `None`; a pinger without a client is a wiring bug.
    pub fn start(
        kind: PingerKind,
        client: Option<Arc<dyn HealthCheck>>,
        schedule: PingSchedule,
    ) -> Self {
        let Some(client) = client else {
            panic!("{kind} pinger started without a client");
        };

        let status: Status = Arc::new(Mutex::new(Err(PingError::NeverRun)));
        let probe_status = Arc::clone(&status);
        let ticker = ExponentialTicker::start(schedule.initial, schedule.steady, move || {
            let client = Arc::clone(&client);
            let status = Arc::clone(&probe_status);
            async move { probe(kind, client.as_ref(), &status).await }
                .instrument(info_span!("pinger", %kind))
        });

        info!(%kind, initial_ms = schedule.initial.as_millis() as u64, steady_ms = schedule.steady.as_millis() as u64, "pinger started");
        Self {
            kind,
            status,
            ticker,
        }
    }

    pub fn key_store(client: Option<Arc<dyn HealthCheck>>, schedule: PingSchedule) -> Self {
        Self::start(PingerKind::KeyStore, client, schedule)
    }

    pub fn cache(client: Option<Arc<dyn HealthCheck>>, schedule: PingSchedule) -> Self {
        Self::start(PingerKind::Cache, client, schedule)
    }

    pub fn database(client: Option<Arc<dyn HealthCheck>>, schedule: PingSchedule) -> Self {
        Self::start(PingerKind::Database, client, schedule)
    }

    pub fn search_index(client: Option<Arc<dyn HealthCheck>>, schedule: PingSchedule) -> Self {
        Self::start(PingerKind::SearchIndex, client, schedule)
    }

    pub fn kind(&self) -> PingerKind {
        self.kind
    }

    /// Outcome of the most recent probe; [`PingError::NeverRun`] until one
    /// completes.
    pub fn last_error(&self) -> Result<(), PingError> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stop(&self) {
        self.ticker.stop();
    }

    pub async fn stopped(&self) {
        self.ticker.stopped().await;
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        self.ticker.stop();
    }
}

async fn probe(kind: PingerKind, client: &dyn HealthCheck, status: &Mutex<Result<(), PingError>>) {
    let outcome = client
        .health_check()
        .await
        .map_err(|source| PingError::Probe {
            kind,
            source: Arc::from(source),
        });

    let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
    match (&*status, &outcome) {
        (Ok(()), Ok(())) => debug!("probe ok"),
        (Err(_), Ok(())) => info!("dependency healthy"),
        (_, Err(err)) => warn!(error = %err, "probe failed"),
    }
    *status = outcome;
}

/// A group of pingers reported together.
#[derive(Debug, Default)]
pub struct PingerSet {
    pingers: Vec<Pinger>,
}

impl PingerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pinger: Pinger) -> Self {
        self.push(pinger);
        self
    }

    pub fn push(&mut self, pinger: Pinger) {
        self.pingers.push(pinger);
    }

    pub fn len(&self) -> usize {
        self.pingers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pingers.is_empty()
    }

    pub fn statuses(&self) -> Vec<(PingerKind, Result<(), PingError>)> {
        self.pingers
            .iter()
            .map(|p| (p.kind(), p.last_error()))
            .collect()
    }

    /// Every pinger has completed a probe and the last one succeeded.
    pub fn is_healthy(&self) -> bool {
        self.pingers.iter().all(|p| p.last_error().is_ok())
    }

    pub async fn stop_all(&self) {
        for pinger in &self.pingers {
            pinger.stop();
        }
        for pinger in &self.pingers {
            pinger.stopped().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` probes, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    fn client(flaky: &Arc<Flaky>) -> Option<Arc<dyn HealthCheck>> {
        Some(flaky.clone())
    }

    #[async_trait]
    impl HealthCheck for Flaky {
        async fn health_check(&self) -> Result<(), BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(format!("connection refused ({n})").into())
            } else {
                Ok(())
            }
        }
    }

    fn fast() -> PingSchedule {
        PingSchedule::default()
            .with_initial(Duration::from_millis(10))
            .with_steady(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn starts_as_never_run_then_tracks_outcomes() {
        let flaky = Flaky::new(2);
        let pinger = Pinger::database(client(&flaky), fast());
        assert_eq!(pinger.last_error(), Err(PingError::NeverRun));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(
            pinger.last_error(),
            Err(PingError::Probe { kind: PingerKind::Database, .. })
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pinger.last_error(), Ok(()));
        assert!(flaky.calls.load(Ordering::SeqCst) >= 3);

        pinger.stop();
        pinger.stopped().await;
    }

    #[test]
    #[should_panic(expected = "cache pinger started without a client")]
    fn missing_client_panics() {
        let _ = Pinger::cache(None, PingSchedule::default());
    }

    #[tokio::test(start_paused = true)]
    async fn set_is_healthy_only_when_every_pinger_is() {
        let set = PingerSet::new()
            .with(Pinger::cache(client(&Flaky::new(0)), fast()))
            .with(Pinger::search_index(client(&Flaky::new(u32::MAX)), fast()));
        assert!(!set.is_healthy());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let statuses = set.statuses();
        assert_eq!(statuses[0], (PingerKind::Cache, Ok(())));
        assert_eq!(statuses[1].0, PingerKind::SearchIndex);
        assert!(statuses[1].1.is_err());
        assert!(!set.is_healthy());

        set.stop_all().await;
    }

    #[test]
    fn kind_names() {
        assert_eq!(PingerKind::SearchIndex.to_string(), "search_index");
        assert_eq!(
            serde_json::to_string(&PingerKind::KeyStore).unwrap(),
            "\"key_store\""
        );
    }
}
