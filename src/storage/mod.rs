//! Storage Module
//!
//! The expiring map and its optional periodic reaper.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       ExpiringMap                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐             │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...N     │             │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │             │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘             │
//! │        ▲                                                     │
//! │        │ clean_now()  (one at a time, atomic flag)           │
//! │  ┌─────┴──────────────────┐   ┌───────────────────────────┐  │
//! │  │ write-triggered sweep  │   │ Reaper (Tokio task, opt.) │  │
//! │  │ via Spawner, ≤ 2 / TTL │   │ every interval            │  │
//! │  └────────────────────────┘   └───────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Uniform TTL**: One timeout per map, fixed at construction
//! - **Lazy Expiry**: Writes schedule sweeps, throttled to once per half TTL
//! - **Active Expiry**: An optional reaper sweeps maps that see no writes
//! - **Expiration Callback**: Invoked once per entry removed by a sweep

pub mod map;
pub mod reaper;

// Re-export commonly used types
pub use map::{ExpireCallback, ExpiringMap, MapBuilder, MapStats, DEFAULT_SHARD_AMOUNT};
pub use reaper::Reaper;
