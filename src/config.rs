//! Construction-time configuration for a [`ShardRouter`](crate::ShardRouter).

use crate::error::{Error, Result};
use std::time::Duration;

/// Default number of partitions.
pub const DEFAULT_SLOT_COUNT: usize = 64;

/// Default interval between two background sweep passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default pause between sweeping two partitions of the same pass.
pub const DEFAULT_SLOT_PAUSE: Duration = Duration::from_millis(10);

/// Default number of entries listed per region in a detail view.
pub const DEFAULT_DETAIL_LIMIT: usize = 10;

/// Default key count above which a partition counts as over-weight.
pub const DEFAULT_OVERWEIGHT_THRESHOLD: usize = 200_000;

/// Configuration for a sharded map.
///
/// The slot count and hash function are fixed for the lifetime of the
/// router; everything here is read once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapConfig {
    /// Number of partitions (default: 64)
    pub slot_count: usize,

    /// Interval between background sweep passes (default: 60s)
    pub sweep_interval: Duration,

    /// Pause between two partitions inside one pass (default: 10ms)
    pub slot_pause: Duration,

    /// Maximum entries per region in a detail view (default: 10)
    pub detail_limit: usize,

    /// Keys per partition above which `should_extend` reports pressure
    pub overweight_threshold: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            slot_pause: DEFAULT_SLOT_PAUSE,
            detail_limit: DEFAULT_DETAIL_LIMIT,
            overweight_threshold: DEFAULT_OVERWEIGHT_THRESHOLD,
        }
    }
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_slot_pause(mut self, pause: Duration) -> Self {
        self.slot_pause = pause;
        self
    }

    pub fn with_detail_limit(mut self, limit: usize) -> Self {
        self.detail_limit = limit;
        self
    }

    pub fn with_overweight_threshold(mut self, threshold: usize) -> Self {
        self.overweight_threshold = threshold;
        self
    }

    /// Checks that the configuration can build a working router.
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(Error::config("slot_count must be greater than zero"));
        }
        if self.slot_count > i64::MAX as usize {
            return Err(Error::config(format!(
                "slot_count {} exceeds the hash range",
                self.slot_count
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::config("sweep_interval must be non-zero"));
        }
        Ok(())
    }
}
