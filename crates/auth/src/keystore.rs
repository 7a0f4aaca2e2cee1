//! Cached remote key store for token validation.
//!
//! The store is built once at startup from a JWKS URI. Construction enforces
//! the transport policy (https everywhere except the internal auth host) and
//! performs the first fetch eagerly; a store that exists and is configured is
//! therefore ready. Later lookups go through the [`KeySetFetcher`], which
//! decides whether to reuse its cached set.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::claims::{TokenClaims, validate_claims};
use crate::error::KeyStoreError;
use crate::fetcher::KeySetFetcher;

/// Key store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    /// Where the key set is published.
    pub jwks_uri: String,
    /// The one host allowed to serve the key set over plain http.
    pub internal_host: String,
    /// Expected `iss`, if any.
    pub issuer: Option<String>,
    /// Expected `aud`, if any.
    pub audience: Option<String>,
    /// Clock skew tolerance for `exp`/`nbf`/`iat`.
    pub leeway: Duration,
    /// Refetch the key set in the background at this interval.
    pub refresh_interval: Option<Duration>,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            jwks_uri: String::new(),
            internal_host: "auth".to_string(),
            issuer: None,
            audience: None,
            leeway: Duration::from_secs(60),
            refresh_interval: None,
        }
    }
}

impl KeyStoreConfig {
    pub fn new(jwks_uri: impl Into<String>) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            ..Self::default()
        }
    }

    pub fn with_internal_host(mut self, host: impl Into<String>) -> Self {
        self.internal_host = host.into();
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn with_refresh_interval(mut self, every: Duration) -> Self {
        self.refresh_interval = Some(every);
        self
    }

    /// Parse `jwks_uri` and apply the transport policy.
    pub fn parsed_uri(&self) -> Result<Url, KeyStoreError> {
        check_uri(&self.jwks_uri, &self.internal_host)
    }
}

struct Source {
    uri: Url,
    fetcher: Arc<dyn KeySetFetcher>,
}

/// Remote key store.
pub struct RemoteKeyStore {
    source: Option<Source>,
    ready: bool,
    issuer: Option<String>,
    audience: Option<String>,
    leeway: Duration,
}

impl std::fmt::Debug for RemoteKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteKeyStore")
            .field("uri", &self.source.as_ref().map(|s| s.uri.as_str()))
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

impl RemoteKeyStore {
    /// Validate the URI, fetch the key set once, and start the optional
    /// background refresh.
    ///
    /// Nothing is fetched when the URI is rejected.
    pub async fn new(
        scope: &CancellationToken,
        config: KeyStoreConfig,
        fetcher: Arc<dyn KeySetFetcher>,
    ) -> Result<Self, KeyStoreError> {
        let uri = config.parsed_uri()?;

        let keys = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(KeyStoreError::Canceled),
            keys = fetcher.fetch(&uri) => keys?,
        };
        info!(uri = %uri, keys = keys.keys.len(), "key store ready");

        if let Some(every) = config.refresh_interval {
            tokio::spawn(refresh(
                scope.clone(),
                Arc::clone(&fetcher),
                uri.clone(),
                every,
            ));
        }

        Ok(Self {
            source: Some(Source { uri, fetcher }),
            ready: true,
            issuer: config.issuer,
            audience: config.audience,
            leeway: config.leeway,
        })
    }

    /// A store with nothing behind it. Never ready; every validation fails
    /// with [`KeyStoreError::NotConfigured`].
    pub fn unconfigured() -> Self {
        Self {
            source: None,
            ready: false,
            issuer: None,
            audience: None,
            leeway: Duration::ZERO,
        }
    }

    /// Whether the initial key set was fetched. Never reverts.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn uri(&self) -> Option<&Url> {
        self.source.as_ref().map(|s| &s.uri)
    }

    /// Fetch the current key set (through the fetcher's cache).
    pub async fn key_set(&self) -> Result<Arc<JwkSet>, KeyStoreError> {
        let source = self.source.as_ref().ok_or(KeyStoreError::NotConfigured)?;
        source.fetcher.fetch(&source.uri).await
    }

    /// Fetch the key set from the source, bypassing any cache.
    pub async fn refresh_key_set(&self) -> Result<Arc<JwkSet>, KeyStoreError> {
        let source = self.source.as_ref().ok_or(KeyStoreError::NotConfigured)?;
        source.fetcher.refresh(&source.uri).await
    }

    /// Verify `token` against the current key set and return its claims.
    pub async fn validate_jwt(&self, token: &str) -> Result<TokenClaims, KeyStoreError> {
        let keys = self.key_set().await?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| KeyStoreError::InvalidToken(e.to_string()))?;
        let jwk = select_key(&keys, header.kid.as_deref())?;
        let algorithm = infer_algorithm(jwk)?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| KeyStoreError::UnsupportedKey(e.to_string()))?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway.as_secs();
        validation.validate_nbf = true;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| KeyStoreError::InvalidToken(e.to_string()))?;

        let leeway = chrono::Duration::from_std(self.leeway).unwrap_or(chrono::Duration::zero());
        validate_claims(&data.claims, Utc::now(), leeway)?;

        debug!(sub = %data.claims.sub, kid = ?header.kid, "token validated");
        Ok(data.claims)
    }
}

fn check_uri(raw: &str, internal_host: &str) -> Result<Url, KeyStoreError> {
    let invalid = |reason: &str| KeyStoreError::InvalidUri {
        uri: raw.to_string(),
        reason: reason.to_string(),
    };

    let uri = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    let host = uri.host_str().ok_or_else(|| invalid("missing host"))?;

    match uri.scheme() {
        "https" => Ok(uri),
        "http" if host == internal_host => Ok(uri),
        "http" => Err(KeyStoreError::InsecureTransport {
            uri: raw.to_string(),
            internal_host: internal_host.to_string(),
        }),
        other => Err(invalid(&format!("unsupported scheme `{other}`"))),
    }
}

/// Match by `kid`; a single-key set matches any token.
fn select_key<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Result<&'a Jwk, KeyStoreError> {
    if let [only] = keys.keys.as_slice() {
        return Ok(only);
    }

    kid.and_then(|kid| keys.find(kid))
        .ok_or_else(|| KeyStoreError::UnknownKey(kid.map(str::to_string)))
}

/// The algorithm a key is meant for: its `alg` member if present, else the
/// conventional default for its key type and curve.
fn infer_algorithm(jwk: &Jwk) -> Result<Algorithm, KeyStoreError> {
    if let Some(alg) = &jwk.common.key_algorithm {
        return match alg {
            KeyAlgorithm::HS256 => Ok(Algorithm::HS256),
            KeyAlgorithm::HS384 => Ok(Algorithm::HS384),
            KeyAlgorithm::HS512 => Ok(Algorithm::HS512),
            KeyAlgorithm::ES256 => Ok(Algorithm::ES256),
            KeyAlgorithm::ES384 => Ok(Algorithm::ES384),
            KeyAlgorithm::RS256 => Ok(Algorithm::RS256),
            KeyAlgorithm::RS384 => Ok(Algorithm::RS384),
            KeyAlgorithm::RS512 => Ok(Algorithm::RS512),
            KeyAlgorithm::PS256 => Ok(Algorithm::PS256),
            KeyAlgorithm::PS384 => Ok(Algorithm::PS384),
            KeyAlgorithm::PS512 => Ok(Algorithm::PS512),
            KeyAlgorithm::EdDSA => Ok(Algorithm::EdDSA),
            #[allow(unreachable_patterns)]
            other => Err(KeyStoreError::UnsupportedKey(format!(
                "`{other:?}` is not a signing algorithm"
            ))),
        };
    }

    #[allow(unreachable_patterns)]
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Ok(Algorithm::RS256),
        AlgorithmParameters::OctetKey(_) => Ok(Algorithm::HS256),
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => Ok(Algorithm::ES256),
            EllipticCurve::P384 => Ok(Algorithm::ES384),
            ref curve => Err(KeyStoreError::UnsupportedKey(format!(
                "elliptic curve {curve:?}"
            ))),
        },
        AlgorithmParameters::OctetKeyPair(okp) => match okp.curve {
            EllipticCurve::Ed25519 => Ok(Algorithm::EdDSA),
            ref curve => Err(KeyStoreError::UnsupportedKey(format!(
                "octet key pair curve {curve:?}"
            ))),
        },
        _ => Err(KeyStoreError::UnsupportedKey("unknown key type".to_string())),
    }
}

async fn refresh(
    scope: CancellationToken,
    fetcher: Arc<dyn KeySetFetcher>,
    uri: Url,
    every: Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            _ = tokio::time::sleep(every) => {}
        }

        let result = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            result = fetcher.refresh(&uri) => result,
        };
        match result {
            Ok(keys) => debug!(uri = %uri, keys = keys.keys.len(), "key set refreshed"),
            Err(err) => warn!(uri = %uri, error = %err, "key set refresh failed"),
        }
    }
    debug!(uri = %uri, "key set refresh stopped");
}
