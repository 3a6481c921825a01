//! Shard Router
//!
//! A [`ShardRouter`] owns a fixed array of [`Partition`]s and sends every key
//! to exactly one of them:
//!
//! ```text
//! index = hash(key).rem_euclid(partition_count)
//! ```
//!
//! The hash function and the partition count are fixed at construction.
//! Changing either would send existing keys to partitions that don't hold
//! them, so neither can change afterwards.
//!
//! Unless disabled, building a router also starts a [`SweepScheduler`] on the
//! current Tokio runtime. Dropping the router asks it to stop.

use super::entry::{Clock, SystemClock};
use super::expiry::{SweepConfig, SweepScheduler};
use super::partition::{Partition, PartitionDetail, PartitionStats};
use crate::config::MapConfig;
use crate::error::{Error, Result};
use crc::{Crc, CRC_16_MODBUS};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Maps a key to a number used for partition routing.
///
/// The value may be negative or larger than the partition count; the router
/// reduces it with `rem_euclid`. Implemented for any `Fn(&str) -> i64`.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &str) -> i64;
}

impl<F> KeyHasher for F
where
    F: Fn(&str) -> i64 + Send + Sync,
{
    #[inline]
    fn hash(&self, key: &str) -> i64 {
        self(key)
    }
}

const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// The default hasher: CRC-16/MODBUS of the key bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc16;

impl KeyHasher for Crc16 {
    #[inline]
    fn hash(&self, key: &str) -> i64 {
        i64::from(MODBUS.checksum(key.as_bytes()))
    }
}

/// Builder for a [`ShardRouter`].
pub struct RouterBuilder {
    config: MapConfig,
    hasher: Arc<dyn KeyHasher>,
    clock: Arc<dyn Clock>,
    background_sweep: bool,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            config: MapConfig::default(),
            hasher: Arc::new(Crc16),
            clock: Arc::new(SystemClock),
            background_sweep: true,
        }
    }
}

impl RouterBuilder {
    pub fn config(mut self, config: MapConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default CRC16 hasher.
    pub fn hasher<H: KeyHasher + 'static>(mut self, hasher: H) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    /// Clock shared by every partition.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether to start the background sweep scheduler (default: on).
    ///
    /// With it off, call [`ShardRouter::sweep_all`] yourself.
    pub fn background_sweep(mut self, enabled: bool) -> Self {
        self.background_sweep = enabled;
        self
    }

    /// Builds the router.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration doesn't validate, `NoRuntime` if
    /// background sweeping is on and no Tokio runtime is running.
    pub fn build<V>(self) -> Result<ShardRouter<V>>
    where
        V: Send + Sync + 'static,
    {
        self.config.validate()?;

        let partitions: Arc<[Partition<V>]> = (0..self.config.slot_count)
            .map(|_| Partition::with_options(Arc::clone(&self.clock), self.config.detail_limit))
            .collect::<Vec<_>>()
            .into();

        let sweeper = if self.background_sweep {
            let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
            Some(SweepScheduler::start_on(
                &runtime,
                Arc::clone(&partitions),
                SweepConfig::from(&self.config),
            ))
        } else {
            None
        };

        info!(
            slots = self.config.slot_count,
            background_sweep = self.background_sweep,
            "Shard router initialized"
        );

        Ok(ShardRouter {
            partitions,
            hasher: self.hasher,
            config: self.config,
            sweeper,
        })
    }
}

/// A sharded concurrent map with per-key expiry.
///
/// # Example
///
/// ```
/// use flashmap::{MapConfig, ShardRouter};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> flashmap::Result<()> {
/// let map = ShardRouter::new(MapConfig::default().with_slot_count(16))?;
///
/// map.set("name", "Ariz".to_string());
/// assert_eq!(map.get("name"), Some("Ariz".to_string()));
///
/// map.set_ex("session", "token".to_string(), Duration::from_secs(3600));
/// assert!(map.exists("session"));
/// # Ok(())
/// # }
/// ```
pub struct ShardRouter<V> {
    partitions: Arc<[Partition<V>]>,
    hasher: Arc<dyn KeyHasher>,
    config: MapConfig,
    sweeper: Option<SweepScheduler>,
}

impl<V> fmt::Debug for ShardRouter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardRouter")
            .field("partitions", &self.partitions.len())
            .field("len", &self.len())
            .field("background_sweep", &self.sweeper.is_some())
            .finish()
    }
}

impl<V: Send + Sync + 'static> ShardRouter<V> {
    /// Creates a router with the default hasher and a background sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: MapConfig) -> Result<Self> {
        RouterBuilder::default().config(config).build()
    }
}

impl ShardRouter<()> {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }
}

impl<V> ShardRouter<V> {
    /// Index of the partition that owns `key`.
    #[inline]
    pub fn route(&self, key: &str) -> usize {
        let count = self.partitions.len() as i64;
        self.hasher.hash(key).rem_euclid(count) as usize
    }

    #[inline]
    fn slot(&self, key: &str) -> &Partition<V> {
        &self.partitions[self.route(key)]
    }

    pub fn set(&self, key: &str, value: V) {
        self.slot(key).set(key, value)
    }

    pub fn set_ex(&self, key: &str, value: V, ttl: Duration) {
        self.slot(key).set_ex(key, value, ttl)
    }

    pub fn set_nx(&self, key: &str, value: V) -> bool {
        self.slot(key).set_nx(key, value)
    }

    pub fn set_ex_nx(&self, key: &str, value: V, ttl: Duration) -> bool {
        self.slot(key).set_ex_nx(key, value, ttl)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.slot(key).delete(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.slot(key).exists(key)
    }

    /// See [`Partition::ttl`].
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        self.slot(key).ttl(key)
    }

    /// Keys across all primary stores.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Partition::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Partition::is_empty)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition(&self, index: usize) -> Option<&Partition<V>> {
        self.partitions.get(index)
    }

    pub fn partitions(&self) -> &[Partition<V>] {
        &self.partitions
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Sweeps every partition in order, returning the total evicted.
    pub fn sweep_all(&self) -> usize {
        self.partitions.iter().map(Partition::sweep).sum()
    }

    /// Aggregated statistics of all partitions.
    pub fn stats(&self) -> PartitionStats {
        let mut total = PartitionStats::default();
        for partition in self.partitions.iter() {
            total += partition.stats();
        }
        total
    }

    /// Reports whether enough partitions are over-weight to justify more
    /// slots. Partitions in the middle of a sweep are skipped.
    pub fn should_extend(&self) -> bool {
        let required = (self.partitions.len() / 3).max(1);
        let overweight = self
            .partitions
            .iter()
            .filter(|p| !p.is_busy() && p.len() > self.config.overweight_threshold)
            .count();
        overweight >= required
    }

    /// Extension hook. The slot count is fixed, so this never resizes and
    /// always returns `false`.
    pub fn extend(&self) -> bool {
        if self.should_extend() {
            debug!(
                slots = self.partitions.len(),
                threshold = self.config.overweight_threshold,
                "Partitions are over-weight but the slot count is fixed"
            );
        }
        false
    }

    /// The background scheduler, if one is running.
    pub fn sweeper(&self) -> Option<&SweepScheduler> {
        self.sweeper.as_ref()
    }

    /// Stops the background scheduler after the partition it is sweeping and
    /// waits for it to exit.
    pub async fn shutdown(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
    }

    /// Abandons the background scheduler at its next await point.
    pub fn abort_sweeper(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl<V: Clone> ShardRouter<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        self.slot(key).get(key)
    }

    /// Detail view of the partition that owns `key`.
    pub fn detail_of(&self, key: &str) -> PartitionDetail<V> {
        self.slot(key).detail()
    }
}

impl ShardRouter<i64> {
    pub fn incr(&self, key: &str) -> Result<i64> {
        self.slot(key).incr(key)
    }

    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.slot(key).incr_by(key, delta)
    }

    pub fn incr_by_ex(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        self.slot(key).incr_by_ex(key, delta, ttl)
    }

    pub fn decr(&self, key: &str) -> Result<i64> {
        self.slot(key).decr(key)
    }

    pub fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.slot(key).decr_by(key, delta)
    }

    pub fn decr_by_ex(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        self.slot(key).decr_by_ex(key, delta, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entry::ManualClock;
    use bytes::Bytes;
    use std::thread;

    const SEC: Duration = Duration::from_secs(1);

    fn manual_router<V>(slots: usize) -> (Arc<ManualClock>, ShardRouter<V>)
    where
        V: Send + Sync + 'static,
    {
        let clock = Arc::new(ManualClock::new(0));
        let router = ShardRouter::builder()
            .config(MapConfig::default().with_slot_count(slots))
            .clock(clock.clone())
            .background_sweep(false)
            .build()
            .unwrap();
        (clock, router)
    }

    #[test]
    fn test_crc16_matches_modbus() {
        // CRC-16/MODBUS check value
        assert_eq!(Crc16.hash("123456789"), 0x4B37);
        assert_eq!(Crc16.hash(""), 0xFFFF);
    }

    #[test]
    fn test_route_is_deterministic() {
        let (_, router) = manual_router::<i64>(15);

        for i in 0..100 {
            let key = format!("hello{}", i);
            let first = router.route(&key);
            assert!(first < 15);
            assert_eq!(router.route(&key), first);
            assert_eq!(first, (Crc16.hash(&key) % 15) as usize);
        }
    }

    #[test]
    fn test_negative_hash_is_normalized() {
        let router: ShardRouter<i64> = ShardRouter::builder()
            .config(MapConfig::default().with_slot_count(5))
            .hasher(|_: &str| -7i64)
            .background_sweep(false)
            .build()
            .unwrap();

        assert_eq!(router.route("anything"), 3);

        let router: ShardRouter<i64> = ShardRouter::builder()
            .config(MapConfig::default().with_slot_count(5))
            .hasher(|_: &str| i64::MIN)
            .background_sweep(false)
            .build()
            .unwrap();
        assert!(router.route("anything") < 5);
        router.set("anything", 1);
        assert_eq!(router.get("anything"), Some(1));
    }

    #[test]
    fn test_key_lives_in_one_partition() {
        let (_, router) = manual_router::<i64>(8);

        router.set("user:1", 1);
        let owner = router.route("user:1");
        for (index, partition) in router.partitions().iter().enumerate() {
            assert_eq!(partition.exists("user:1"), index == owner);
        }
    }

    #[test]
    fn test_operations_delegate() {
        let (clock, router) = manual_router::<Bytes>(4);

        router.set("a", Bytes::from("1"));
        router.set_ex("b", Bytes::from("2"), 5 * SEC);
        assert!(router.set_nx("c", Bytes::from("3")));
        assert!(!router.set_nx("c", Bytes::from("x")));
        assert!(router.set_ex_nx("d", Bytes::from("4"), SEC));

        assert_eq!(router.len(), 4);
        assert_eq!(router.get("c"), Some(Bytes::from("3")));
        assert_eq!(router.ttl("b"), Some(Some(5 * SEC)));

        clock.advance(2 * SEC);
        assert_eq!(router.get("d"), None);
        assert!(router.delete("a"));
        assert!(!router.exists("a"));
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn test_sweep_all() {
        let (clock, router) = manual_router::<i64>(7);

        for i in 0..100 {
            router.set_ex(&format!("short{}", i), i, SEC);
            router.set(&format!("long{}", i), i);
        }
        clock.advance(2 * SEC);

        assert_eq!(router.sweep_all(), 100);
        assert_eq!(router.len(), 100);

        let stats = router.stats();
        assert_eq!(stats.swept, 100);
        assert_eq!(stats.sweeps, 7);
        assert_eq!(stats.keys, 100);
    }

    #[test]
    fn test_concurrent_clients() {
        let (clock, router) = manual_router::<i64>(15);
        let router = Arc::new(router);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let router = Arc::clone(&router);
                thread::spawn(move || {
                    let key = format!("hello3:{}", i);
                    assert!(router.set_nx(&key, 5));
                    assert!(!router.set_nx(&key, 8));
                    assert!(!router.set_ex_nx(&key, 10, SEC));
                    assert_eq!(router.get(&key), Some(5));

                    let plain = format!("hello{}", i);
                    router.set(&plain, 5);
                    assert_eq!(router.get(&plain), Some(5));

                    router.sweep_all();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        clock.advance(10 * SEC);
        router.sweep_all();
        for i in 0..10 {
            assert_eq!(router.get(&format!("hello3:{}", i)), Some(5));
        }
        assert_eq!(router.len(), 20);
    }

    #[test]
    fn test_counters_route() {
        let (_, router) = manual_router::<i64>(3);

        assert_eq!(router.incr("n").unwrap(), 1);
        assert_eq!(router.incr_by("n", 9).unwrap(), 10);
        assert_eq!(router.decr("n").unwrap(), 9);
        assert_eq!(router.decr_by("n", 4).unwrap(), 5);
        assert_eq!(router.incr_by_ex("m", 2, SEC).unwrap(), 2);
        assert_eq!(router.decr_by_ex("m", 1, SEC).unwrap(), 1);
        assert_eq!(router.get("n"), Some(5));
    }

    #[test]
    fn test_detail_of() {
        let (_, router) = manual_router::<i64>(4);

        router.set("key", 1);
        let detail = router.detail_of("key");
        assert!(detail.primary.entries.contains_key("key"));
        assert!(detail.to_json().unwrap().contains("\"key\""));
    }

    #[test]
    fn test_extension_hook_is_inert() {
        let router: ShardRouter<i64> = ShardRouter::builder()
            .config(
                MapConfig::default()
                    .with_slot_count(3)
                    .with_overweight_threshold(2),
            )
            .hasher(|_: &str| 0i64)
            .background_sweep(false)
            .build()
            .unwrap();

        assert!(!router.should_extend());
        for i in 0..5 {
            router.set(&format!("k{}", i), i);
        }
        assert!(router.should_extend());
        assert!(!router.extend());
        assert_eq!(router.partition_count(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ShardRouter::builder()
            .config(MapConfig::default().with_slot_count(0))
            .background_sweep(false)
            .build::<i64>();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_background_sweep_needs_runtime() {
        let result = ShardRouter::<i64>::new(MapConfig::default());
        assert!(matches!(result, Err(Error::NoRuntime)));
    }

    #[tokio::test]
    async fn test_background_sweep_evicts() {
        let config = MapConfig::default()
            .with_slot_count(4)
            .with_sweep_interval(Duration::from_millis(20))
            .with_slot_pause(Duration::ZERO);
        let mut router = ShardRouter::new(config).unwrap();

        for i in 0..10 {
            router.set_ex(&format!("key{}", i), i, Duration::from_millis(30));
        }
        router.set("persistent", -1);
        assert_eq!(router.len(), 11);

        tokio::time::sleep(Duration::from_millis(300)).await;

        // Swept, not lazily expired: nothing read these keys
        assert_eq!(router.len(), 1);
        assert_eq!(router.stats().swept, 10);
        assert_eq!(router.get("persistent"), Some(-1));

        router.shutdown().await;
        assert!(router.sweeper().is_none());
    }
}
