//! Storage Module
//!
//! This module provides the core of FlashMap: a concurrent partition with
//! per-key expiry, the router that shards keys across partitions, and the
//! background scheduler that sweeps expired keys.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ShardRouter                            │
//! │              index = crc16(key) mod N                       │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐ ┌───────────┐    │
//! │  │Partition 0│ │Partition 1│ │Partition 2│ │...N       │    │
//! │  │ 4 regions │ │ 4 regions │ │ 4 regions │ │partitions │    │
//! │  └───────────┘ └───────────┘ └───────────┘ └───────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ sweep()
//!              ┌─────────────┴─────────────┐
//!              │     SweepScheduler        │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Sharded Storage**: keys never share a lock with keys of other partitions
//! - **Non-Blocking Sweep**: callers keep reading and writing while a
//!   partition evicts expired keys
//! - **Lazy Expiry**: expired keys are removed on access
//! - **Active Expiry**: the scheduler removes expired keys nobody reads
//!
//! ## Example
//!
//! ```
//! use flashmap::storage::{Partition, NO_EXPIRY};
//! use std::time::Duration;
//!
//! let partition = Partition::new();
//!
//! partition.set_ex("session", "token123", Duration::from_secs(3600));
//! partition.set_ex("config", "v1", NO_EXPIRY);
//!
//! assert_eq!(partition.get("session"), Some("token123"));
//! assert_eq!(partition.ttl("config"), Some(None));
//! ```

pub mod entry;
pub mod expiry;
pub mod partition;
pub mod router;

// Re-export commonly used types
pub use entry::{Clock, Entry, ManualClock, SystemClock, Timestamp, NO_EXPIRY};
pub use expiry::{SweepConfig, SweepScheduler};
pub use partition::{Mode, Partition, PartitionDetail, PartitionStats, RegionView};
pub use router::{Crc16, KeyHasher, RouterBuilder, ShardRouter};
