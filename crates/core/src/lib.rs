//! `metaex-core`: shared concurrency and resilience primitives.
//!
//! Every service in the platform builds on these to survive transient
//! network failures and to coordinate background work without blocking
//! request-serving tasks. All primitives are single-process and in-memory.

pub mod backoff;
pub mod error;
pub mod id;
pub mod promise;
pub mod requeue;
pub mod retry;

pub use backoff::{Backoff, BackoffPolicy, ExponentialBackoff, FixedPause, StopImmediately};
pub use error::{BoxError, CoreError};
pub use id::ItemId;
pub use promise::{Promise, Settler};
pub use requeue::{Requeue, RequeueConfig, RequeueStats};
pub use retry::{RetryExecutor, RetryTask};
pub use tokio_util::sync::CancellationToken;
