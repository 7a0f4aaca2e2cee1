//! Startup connectors.
//!
//! Each connector drives its dependency through a [`RetryExecutor`] so a
//! service can start before its backing stores are up. Configuration errors
//! are reported before the first attempt and never retried.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metaex_auth::{KeySetFetcher, KeyStoreConfig, RemoteKeyStore};
use metaex_core::{BackoffPolicy, RetryExecutor, RetryTask};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

pub const PHASE: &str = "startup";

#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Open a Postgres pool, retrying per `policy`.
pub async fn connect_postgres(
    executor: &RetryExecutor,
    database_url: &str,
    options: PostgresOptions,
    policy: Arc<dyn BackoffPolicy>,
) -> anyhow::Result<PgPool> {
    let pool = executor
        .run(RetryTask::with_shared_policy(
            "connect to postgres",
            PHASE,
            policy,
            || {
                PgPoolOptions::new()
                    .max_connections(options.max_connections)
                    .acquire_timeout(options.acquire_timeout)
                    .connect(database_url)
            },
        ))
        .await
        .context("connecting to postgres")?;

    info!(phase = PHASE, "postgres pool ready");
    Ok(pool)
}

/// Build the key store, retrying the initial key-set fetch per `policy`.
pub async fn connect_key_store(
    executor: &RetryExecutor,
    config: KeyStoreConfig,
    fetcher: Arc<dyn KeySetFetcher>,
    policy: Arc<dyn BackoffPolicy>,
) -> anyhow::Result<RemoteKeyStore> {
    let uri = config
        .parsed_uri()
        .context("invalid key store configuration")?;

    let store = executor
        .run(RetryTask::with_shared_policy(
            format!("fetch key set from {uri}"),
            PHASE,
            policy,
            || RemoteKeyStore::new(executor.scope(), config.clone(), Arc::clone(&fetcher)),
        ))
        .await
        .context("initializing key store")?;

    Ok(store)
}

/// Connect the Redis pub/sub client, retrying per `policy`.
#[cfg(feature = "redis")]
pub async fn connect_redis(
    executor: &RetryExecutor,
    redis_url: &str,
    policy: Arc<dyn BackoffPolicy>,
) -> anyhow::Result<crate::event_bus::RedisPubSubClient> {
    let client = executor
        .run(RetryTask::with_shared_policy(
            "connect to redis",
            PHASE,
            policy,
            || crate::event_bus::RedisPubSubClient::connect(redis_url),
        ))
        .await
        .context("connecting to redis")?;

    info!(phase = PHASE, "redis ready");
    Ok(client)
}
