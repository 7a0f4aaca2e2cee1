//! [`HealthCheck`] adapters for the shared backing stores.

use async_trait::async_trait;
use metaex_core::BoxError;
use metaex_health::HealthCheck;
use sqlx::PgPool;

/// Postgres liveness via `SELECT 1` on a pooled connection.
#[derive(Debug, Clone)]
pub struct PostgresProbe(pub PgPool);

#[async_trait]
impl HealthCheck for PostgresProbe {
    async fn health_check(&self) -> Result<(), BoxError> {
        sqlx::query("SELECT 1").execute(&self.0).await?;
        Ok(())
    }
}

/// Redis liveness via `PING`.
#[cfg(feature = "redis")]
#[derive(Debug, Clone)]
pub struct RedisProbe(pub redis::Client);

#[cfg(feature = "redis")]
#[async_trait]
impl HealthCheck for RedisProbe {
    async fn health_check(&self) -> Result<(), BoxError> {
        let mut conn = self.0.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(format!("unexpected PING reply {pong:?}").into());
        }
        Ok(())
    }
}
