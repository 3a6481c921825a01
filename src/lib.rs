//! # FlashMap - A Sharded Concurrent Map with Expiry
//!
//! FlashMap is an in-memory key-value map for use inside a single process.
//! Keys can expire, and expired keys are removed both on access and by a
//! background sweep that never stops callers from reading or writing.
//!
//! ## Features
//!
//! - **Sharded**: keys are spread over independent partitions by CRC16
//! - **Non-Blocking Sweep**: a sweeping partition serves callers from a
//!   mirror and parks their writes until the sweep reconciles them
//! - **TTL Support**: `set_ex`, conditional `set_nx` / `set_ex_nx`, counters
//! - **Generic Values**: any `V: Clone + Send + Sync`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashMap                                   │
//! │                                                                         │
//! │   caller ──> ShardRouter::route(key) ──> Partition ──> region by mode   │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                          Partition                               │   │
//! │  │  ┌─────────┐  ┌─────────┐  ┌────────────────┐  ┌───────────────┐ │   │
//! │  │  │ primary │  │ mirror  │  │ pending_writes │  │pending_deletes│ │   │
//! │  │  └─────────┘  └─────────┘  └────────────────┘  └───────────────┘ │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! │                                 ▲                                       │
//! │                                 │                                       │
//! │              ┌──────────────────┴───────────────────┐                   │
//! │              │           SweepScheduler             │                   │
//! │              │       (Background Tokio Task)        │                   │
//! │              └──────────────────────────────────────┘                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use flashmap::{MapConfig, ShardRouter};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> flashmap::Result<()> {
//!     let map = ShardRouter::new(
//!         MapConfig::default()
//!             .with_slot_count(16)
//!             .with_sweep_interval(Duration::from_secs(30)),
//!     )?;
//!
//!     map.set("name", 1u64);
//!     map.set_ex("session", 2u64, Duration::from_secs(60));
//!     assert!(!map.set_nx("name", 3u64));
//!     assert_eq!(map.get("name"), Some(1));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: entries, partitions, routing and the sweep scheduler
//! - [`config`]: construction-time configuration
//! - [`error`]: error type
//!
//! ## Design Highlights
//!
//! ### Four Regions
//!
//! Each partition keeps a primary store, a mirror, and two pending regions,
//! each behind its own lock. While a sweep scans the primary store, callers
//! read the mirror and their writes and deletes are recorded in the pending
//! regions. The sweep then merges them back, deciding conflicts by write
//! order rather than by which lock was taken first.
//!
//! ### Lazy + Active Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: When a key is accessed, we check if it's expired
//! 2. **Active**: A background task periodically sweeps every partition

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::MapConfig;
pub use error::{Error, Result};
pub use storage::{
    Mode, Partition, PartitionDetail, PartitionStats, ShardRouter, SweepScheduler, NO_EXPIRY,
};

/// Version of FlashMap
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
