//! `metaex-health`: periodic dependency probing.

pub mod pinger;
pub mod ticker;

pub use pinger::{HealthCheck, PingError, PingSchedule, Pinger, PingerKind, PingerSet};
pub use ticker::{ExponentialTicker, TickerHandle};
