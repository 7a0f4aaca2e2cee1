//! Process configuration from `METAEX_*` environment variables.
//!
//! | variable | meaning | default |
//! |---|---|---|
//! | `METAEX_JWKS_URI` | key set location | unset (no key store) |
//! | `METAEX_INTERNAL_AUTH_HOST` | host allowed to serve keys over http | `auth` |
//! | `METAEX_JWKS_ISSUER` / `METAEX_JWKS_AUDIENCE` | expected `iss` / `aud` | unset |
//! | `METAEX_JWKS_REFRESH_SECS` | background key refresh | unset (off) |
//! | `METAEX_DATABASE_URL` | Postgres URL | unset |
//! | `METAEX_REDIS_URL` | Redis URL | unset |
//! | `METAEX_REQUEUE_ATTEMPTS` / `METAEX_REQUEUE_PAUSE_MS` | redelivery | 3 / 500 |
//! | `METAEX_PING_INITIAL_MS` / `METAEX_PING_STEADY_MS` | health probing | 500 / 30000 |

use std::str::FromStr;
use std::time::Duration;

use metaex_auth::KeyStoreConfig;
use metaex_core::RequeueConfig;
use metaex_health::PingSchedule;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct InfraConfig {
    pub key_store: Option<KeyStoreConfig>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub requeue: RequeueConfig,
    pub ping: PingSchedule,
}

impl InfraConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let key_store = match get("METAEX_JWKS_URI") {
            None => None,
            Some(uri) => {
                let mut config = KeyStoreConfig::new(uri);
                if let Some(host) = get("METAEX_INTERNAL_AUTH_HOST") {
                    config = config.with_internal_host(host);
                }
                if let Some(issuer) = get("METAEX_JWKS_ISSUER") {
                    config = config.with_issuer(issuer);
                }
                if let Some(audience) = get("METAEX_JWKS_AUDIENCE") {
                    config = config.with_audience(audience);
                }
                if let Some(secs) = parse::<u64>(&get, "METAEX_JWKS_REFRESH_SECS")? {
                    config = config.with_refresh_interval(Duration::from_secs(secs));
                }
                Some(config)
            }
        };

        let mut requeue = RequeueConfig::default();
        if let Some(attempts) = parse::<u32>(&get, "METAEX_REQUEUE_ATTEMPTS")? {
            if attempts == 0 {
                return Err(ConfigError::Invalid {
                    key: "METAEX_REQUEUE_ATTEMPTS",
                    value: attempts.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            requeue = requeue.with_attempts(attempts);
        }
        if let Some(ms) = parse::<u64>(&get, "METAEX_REQUEUE_PAUSE_MS")? {
            requeue = requeue.with_pause(Duration::from_millis(ms));
        }

        let mut ping = PingSchedule::default();
        if let Some(ms) = parse::<u64>(&get, "METAEX_PING_INITIAL_MS")? {
            ping = ping.with_initial(Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64>(&get, "METAEX_PING_STEADY_MS")? {
            ping = ping.with_steady(Duration::from_millis(ms));
        }

        Ok(Self {
            key_store,
            database_url: get("METAEX_DATABASE_URL"),
            redis_url: get("METAEX_REDIS_URL"),
            requeue,
            ping,
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
