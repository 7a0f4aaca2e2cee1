//! Process-wide logging setup shared by every metaex service.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{LogFormat, ObservabilityConfig, init_with};

/// Initialize logging from the environment (`RUST_LOG`, `METAEX_LOG_FORMAT`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    crate::tracing::init_with(&ObservabilityConfig::from_env());
}
