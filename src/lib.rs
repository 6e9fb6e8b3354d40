//! # ttlmap - A Concurrent Map with Self-Expiring Entries
//!
//! `ttlmap` provides [`ExpiringMap`], a thread-safe key-value map whose
//! entries are removed once they are older than a fixed time-to-live, without
//! every user having to run a background sweeper.
//!
//! ## Features
//!
//! - **Write-Triggered Cleanup**: Writes schedule a full sweep at most once
//!   per half TTL, so cleanup cost follows write traffic
//! - **Coalescing Sweeps**: At most one sweep runs at a time; extra requests
//!   return immediately instead of queueing
//! - **Optional Reaper**: [`Reaper`] sweeps on a timer for maps that are
//!   rarely written
//! - **Expiration Callback**: Observe every entry a sweep removes
//! - **Injectable Time and Dispatch**: [`Clock`] and [`Spawner`] make expiry
//!   deterministic in tests
//!
//! ## Quick Start
//!
//! ```
//! use std::time::Duration;
//! use ttlmap::ExpiringMap;
//!
//! let map = ExpiringMap::builder(Duration::from_secs(30))
//!     .on_expire(|key: String, value: u64| {
//!         println!("{} expired with {}", key, value);
//!     })
//!     .build()
//!     .unwrap();
//!
//! map.store("visits".to_string(), 1);
//! assert_eq!(map.load(&"visits".to_string()), Some(1));
//! ```
//!
//! ## Expiry Is Best-Effort
//!
//! Reads never check the TTL. An entry stays visible until a sweep removes it,
//! and a sweep only happens when:
//! 1. A write arrives at least half a TTL after the previous scheduled sweep
//! 2. Someone calls [`ExpiringMap::clean_now`]
//! 3. A [`Reaper`] ticks
//!
//! ## Module Overview
//!
//! - [`storage`]: The expiring map and the reaper
//! - [`clock`]: Time sources
//! - [`spawner`]: How write-triggered sweeps are dispatched
//! - [`error`]: Construction errors

pub mod clock;
pub mod error;
pub mod spawner;
pub mod storage;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, TtlMapError};
pub use spawner::{DefaultSpawner, InlineSpawner, Spawner, Task};
pub use storage::{ExpiringMap, MapBuilder, MapStats, Reaper};

/// Version of ttlmap
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
