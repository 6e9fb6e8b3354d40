//! Error Types
//!
//! The map has no runtime failure modes: a missing key is `None`, a failing
//! expiration callback is contained inside the sweep. What remains are
//! construction-time mistakes, reported through [`TtlMapError`].

use thiserror::Error;

/// Errors returned when building an [`ExpiringMap`](crate::ExpiringMap) or a
/// [`Reaper`](crate::Reaper).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TtlMapError {
    /// The map TTL was zero.
    #[error("timeout must be a positive duration")]
    ZeroTimeout,

    /// The map was configured with zero shards.
    #[error("shard amount must be at least 1")]
    ZeroShards,

    /// The reaper interval was zero.
    #[error("reaper interval must be a positive duration")]
    ZeroInterval,

    /// A reaper was started outside of a tokio runtime.
    #[error("no tokio runtime available to drive the reaper")]
    NoRuntime,
}

/// Convenience result type for this crate.
pub type Result<T> = std::result::Result<T, TtlMapError>;
