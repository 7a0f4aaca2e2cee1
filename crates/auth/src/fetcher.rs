//! Key-set retrieval.
//!
//! [`KeySetFetcher`] is the seam the key store fetches through. The HTTP
//! implementation, [`CachingJwksFetcher`], keeps the last key set until the
//! origin says it is stale, so calling `fetch` on every validation is cheap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use reqwest::header::{CACHE_CONTROL, EXPIRES, HeaderMap};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::error::KeyStoreError;

/// Source of the current key set.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Current key set; may be served from a cache.
    async fn fetch(&self, uri: &Url) -> Result<Arc<JwkSet>, KeyStoreError>;

    /// Bypass any cache and fetch again.
    async fn refresh(&self, uri: &Url) -> Result<Arc<JwkSet>, KeyStoreError> {
        self.fetch(uri).await
    }
}

struct CachedKeySet {
    uri: Url,
    keys: Arc<JwkSet>,
    expires_at: Instant,
}

/// HTTP JWKS fetcher that honors the origin's cache headers.
///
/// - `Cache-Control: max-age=N` keeps the set for N seconds
/// - `no-store` / `no-cache` disable caching
/// - otherwise `Expires`, otherwise the default TTL
///
/// Concurrent callers with a stale cache wait on a single request, which is
/// bounded by the request timeout.
pub struct CachingJwksFetcher {
    http: reqwest::Client,
    default_ttl: Duration,
    request_timeout: Duration,
    cache: Mutex<Option<CachedKeySet>>,
}

impl std::fmt::Debug for CachingJwksFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingJwksFetcher")
            .field("default_ttl", &self.default_ttl)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for CachingJwksFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl CachingJwksFetcher {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            default_ttl: Self::DEFAULT_TTL,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            cache: Mutex::new(None),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Upper bound on one key-set request, body included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Forget the cached set; the next `fetch` goes to the network.
    pub async fn invalidate(&self) {
        self.cache.lock().await.take();
    }

    async fn fetch_remote(&self, uri: &Url) -> Result<(Arc<JwkSet>, Duration), KeyStoreError> {
        tokio::time::timeout(self.request_timeout, self.request(uri))
            .await
            .map_err(|_| {
                KeyStoreError::Fetch(format!(
                    "no response from {uri} within {:?}",
                    self.request_timeout
                ))
            })?
    }

    async fn request(&self, uri: &Url) -> Result<(Arc<JwkSet>, Duration), KeyStoreError> {
        let response = self
            .http
            .get(uri.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| KeyStoreError::Fetch(e.to_string()))?;

        let ttl = cache_ttl(response.headers(), self.default_ttl, Utc::now());
        let keys = response
            .json::<JwkSet>()
            .await
            .map_err(|e| KeyStoreError::Fetch(e.to_string()))?;

        debug!(uri = %uri, keys = keys.keys.len(), ttl_secs = ttl.as_secs(), "fetched key set");
        Ok((Arc::new(keys), ttl))
    }

    async fn load(&self, uri: &Url, force: bool) -> Result<Arc<JwkSet>, KeyStoreError> {
        let mut cache = self.cache.lock().await;

        if !force {
            if let Some(cached) = cache.as_ref() {
                if cached.uri == *uri && Instant::now() < cached.expires_at {
                    return Ok(Arc::clone(&cached.keys));
                }
            }
        }

        let (keys, ttl) = self.fetch_remote(uri).await?;
        *cache = Some(CachedKeySet {
            uri: uri.clone(),
            keys: Arc::clone(&keys),
            expires_at: Instant::now() + ttl,
        });
        Ok(keys)
    }
}

#[async_trait]
impl KeySetFetcher for CachingJwksFetcher {
    async fn fetch(&self, uri: &Url) -> Result<Arc<JwkSet>, KeyStoreError> {
        self.load(uri, false).await
    }

    async fn refresh(&self, uri: &Url) -> Result<Arc<JwkSet>, KeyStoreError> {
        self.load(uri, true).await
    }
}

/// How long a response may be reused.
pub(crate) fn cache_ttl(headers: &HeaderMap, default: Duration, now: DateTime<Utc>) -> Duration {
    if let Some(value) = headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
        let mut max_age = None;
        for directive in value.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            if directive == "no-store" || directive == "no-cache" {
                return Duration::ZERO;
            }
            if let Some(secs) = directive.strip_prefix("max-age=") {
                if let Ok(secs) = secs.trim_matches('"').parse::<u64>() {
                    max_age = Some(Duration::from_secs(secs));
                }
            }
        }
        if let Some(max_age) = max_age {
            return max_age;
        }
    }

    let expires = headers
        .get(EXPIRES)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok());
    match expires {
        Some(expires) => (expires.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const DEFAULT: Duration = Duration::from_secs(300);

    fn headers(pairs: &[(reqwest::header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc2822("Wed, 21 Oct 2026 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn max_age_wins() {
        let h = headers(&[
            (CACHE_CONTROL, "public, max-age=60, must-revalidate"),
            (EXPIRES, "Wed, 21 Oct 2026 08:28:00 GMT"),
        ]);
        assert_eq!(cache_ttl(&h, DEFAULT, now()), Duration::from_secs(60));
    }

    #[test]
    fn no_store_and_no_cache_disable_caching() {
        for value in ["no-store", "max-age=60, no-cache", "No-Store"] {
            let h = headers(&[(CACHE_CONTROL, value)]);
            assert_eq!(cache_ttl(&h, DEFAULT, now()), Duration::ZERO, "{value}");
        }
    }

    #[test]
    fn expires_is_used_without_max_age() {
        let h = headers(&[(EXPIRES, "Wed, 21 Oct 2026 07:38:00 GMT")]);
        assert_eq!(cache_ttl(&h, DEFAULT, now()), Duration::from_secs(600));

        let past = headers(&[(EXPIRES, "Wed, 21 Oct 2026 07:00:00 GMT")]);
        assert_eq!(cache_ttl(&past, DEFAULT, now()), Duration::ZERO);
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(cache_ttl(&HeaderMap::new(), DEFAULT, now()), DEFAULT);

        let garbage = headers(&[(CACHE_CONTROL, "max-age=soon"), (EXPIRES, "0")]);
        assert_eq!(cache_ttl(&garbage, DEFAULT, now()), DEFAULT);
    }
}
