//! Infrastructure layer: concrete backends, health probes, startup wiring,
//! and environment configuration.

pub mod config;
pub mod connect;
pub mod event_bus;
pub mod probes;

mod integration_tests;

pub use config::{ConfigError, InfraConfig};
pub use connect::{PostgresOptions, connect_key_store, connect_postgres};
#[cfg(feature = "redis")]
pub use connect::connect_redis;
#[cfg(feature = "redis")]
pub use event_bus::RedisPubSubClient;
pub use probes::PostgresProbe;
#[cfg(feature = "redis")]
pub use probes::RedisProbe;
