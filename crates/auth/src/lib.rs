//! `metaex-auth`: token validation against a remote key set.
//!
//! Transport-agnostic: callers hand in the raw `Authorization` header value.

pub mod claims;
pub mod error;
pub mod fetcher;
pub mod keystore;
pub mod validator;

pub use claims::{Audience, TokenClaims, TokenValidationError, validate_claims};
pub use error::{AuthError, KeyStoreError};
pub use fetcher::{CachingJwksFetcher, KeySetFetcher};
pub use keystore::{KeyStoreConfig, RemoteKeyStore};
pub use validator::{JwtValidator, authenticate, extract_bearer};
