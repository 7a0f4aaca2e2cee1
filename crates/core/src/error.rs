//! Core error model.

use thiserror::Error;

/// Boxed, type-erased error used at seams where the concrete failure type
/// belongs to a collaborator (redelivered work, probes, ...).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error surfaced by the core primitives themselves.
///
/// Invariant violations are not represented here: those panic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl CoreError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
