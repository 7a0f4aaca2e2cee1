use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::claims::TokenClaims;
use crate::error::{AuthError, KeyStoreError};
use crate::keystore::RemoteKeyStore;

/// Anything that can turn a bearer token into verified claims.
#[async_trait]
pub trait JwtValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<TokenClaims, KeyStoreError>;
}

#[async_trait]
impl JwtValidator for RemoteKeyStore {
    async fn validate(&self, token: &str) -> Result<TokenClaims, KeyStoreError> {
        self.validate_jwt(token).await
    }
}

#[async_trait]
impl<V> JwtValidator for Arc<V>
where
    V: JwtValidator + ?Sized,
{
    async fn validate(&self, token: &str) -> Result<TokenClaims, KeyStoreError> {
        (**self).validate(token).await
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::Unauthenticated)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::Unauthenticated)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::Unauthenticated);
    }

    Ok(token)
}

/// Authenticate a request from its `Authorization` header.
///
/// Callers only ever see [`AuthError::Unauthenticated`]. The reason is
/// logged: server-side problems at `error`, bad client tokens at `info`.
pub async fn authenticate(
    validator: &dyn JwtValidator,
    authorization: Option<&str>,
) -> Result<TokenClaims, AuthError> {
    let token = match extract_bearer(authorization) {
        Ok(token) => token,
        Err(err) => {
            info!(present = authorization.is_some(), "missing or malformed bearer token");
            return Err(err);
        }
    };

    match validator.validate(token).await {
        Ok(claims) => Ok(claims),
        Err(err) if err.is_misconfiguration() => {
            error!(error = %err, "cannot validate tokens");
            Err(AuthError::Unauthenticated)
        }
        Err(err) => {
            info!(error = %err, "rejected token");
            Err(AuthError::Unauthenticated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    struct Fixed(Result<TokenClaims, KeyStoreError>);

    #[async_trait]
    impl JwtValidator for Fixed {
        async fn validate(&self, _token: &str) -> Result<TokenClaims, KeyStoreError> {
            self.0.clone()
        }
    }

    fn claims() -> TokenClaims {
        TokenClaims {
            sub: "alice".to_string(),
            iss: None,
            aud: None,
            exp: i64::MAX / 2,
            iat: None,
            nbf: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(Some("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(extract_bearer(Some("Bearer   tok  ")), Ok("tok"));
        assert_eq!(extract_bearer(None), Err(AuthError::Unauthenticated));
        assert_eq!(extract_bearer(Some("Basic dXNlcg==")), Err(AuthError::Unauthenticated));
        assert_eq!(extract_bearer(Some("Bearer ")), Err(AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn valid_token_yields_claims() {
        let validator = Fixed(Ok(claims()));
        let got = authenticate(&validator, Some("Bearer t")).await.unwrap();
        assert_eq!(got.sub, "alice");
    }

    #[tokio::test]
    async fn every_failure_is_generic() {
        for err in [
            KeyStoreError::NotConfigured,
            KeyStoreError::Fetch("dns".to_string()),
            KeyStoreError::InvalidToken("bad signature".to_string()),
            KeyStoreError::UnknownKey(Some("k9".to_string())),
        ] {
            let validator = Fixed(Err(err));
            assert_eq!(
                authenticate(&validator, Some("Bearer t")).await,
                Err(AuthError::Unauthenticated)
            );
        }
    }

    #[tokio::test]
    async fn unconfigured_store_rejects_everything() {
        let store = RemoteKeyStore::unconfigured();
        assert_eq!(
            authenticate(&store, Some("Bearer a.b.c")).await,
            Err(AuthError::Unauthenticated)
        );
    }
}
