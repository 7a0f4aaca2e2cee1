use thiserror::Error;

use crate::claims::TokenValidationError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("invalid key set uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// Plain HTTP is only accepted for the internal auth host.
    #[error("key set uri `{uri}` must use https (plain http is only allowed for `{internal_host}`)")]
    InsecureTransport { uri: String, internal_host: String },

    #[error("no key store configured")]
    NotConfigured,

    #[error("failed to fetch key set: {0}")]
    Fetch(String),

    #[error("key store setup canceled")]
    Canceled,

    #[error("no key matches token key id {0:?}")]
    UnknownKey(Option<String>),

    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

impl KeyStoreError {
    /// Whether the failure is on the server side (bad setup, unreachable key
    /// set) rather than a bad token presented by the client.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::InvalidUri { .. }
                | Self::InsecureTransport { .. }
                | Self::NotConfigured
                | Self::Fetch(_)
                | Self::Canceled
                | Self::UnsupportedKey(_)
        )
    }
}

/// The only error surfaced to callers of [`authenticate`](crate::authenticate).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,
}
