//! Concurrent Partition with a Non-Blocking Expiry Sweep
//!
//! A [`Partition`] is one independently locked piece of the key space. It
//! keeps its data in four regions, each behind its own `RwLock`, so that an
//! expiry sweep can scan the authoritative store while callers keep reading
//! and writing somewhere else.
//!
//! ## Regions
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Partition                            │
//! │                                                               │
//! │   mode: RwLock<Mode>            sweeping: AtomicBool          │
//! │                                                               │
//! │   ┌──────────┐  ┌──────────┐  ┌────────────────┐  ┌─────────┐ │
//! │   │ primary  │  │  mirror  │  │ pending_writes │  │ pending │ │
//! │   │ RwLock   │  │  RwLock  │  │     RwLock     │  │ deletes │ │
//! │   └──────────┘  └──────────┘  └────────────────┘  └─────────┘ │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Mode     | primary     | mirror        | pending_writes | pending_deletes |
//! |----------|-------------|---------------|----------------|-----------------|
//! | Normal   | read+write  | write-through | unused         | unused          |
//! | Sweeping | sweep only  | read+write    | `set*`         | `delete`        |
//!
//! ## Locking
//!
//! Every caller operation holds the mode lock for reading while it picks a
//! region and writes to it, so the mode cannot flip between the check and the
//! act. Locks are always taken in this order:
//!
//! ```text
//! mode -> primary -> mirror -> pending_writes -> pending_deletes
//! ```
//!
//! Write stamps are issued while holding the region lock that serializes the
//! key, so for a single key entry order is the order the writes happened.
//!
//! ## Sweep
//!
//! 1. Flip to `Sweeping` (mode write lock, released immediately).
//! 2. Collect expired keys of `primary` under a read lock, then remove them
//!    under a write lock.
//! 3. Take both pending regions in one step and merge the writes into
//!    `primary`, keeping whichever entry is later.
//! 4. Apply the taken deletes: a tombstone removes a `primary` entry only if
//!    the tombstone is later.
//! 5. Drop the evicted keys from `mirror` unless a later write replaced them.
//! 6. Under the mode write lock, drain what arrived since step 3 and flip
//!    back to `Normal`.
//!
//! Callers only wait on the mode lock for the two flips and the residual
//! drain in step 6, never for the scan.

use super::entry::{expiry_after, Clock, Entry, Stamper, SystemClock, Timestamp, NO_EXPIRY};
use crate::config::DEFAULT_DETAIL_LIMIT;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

type Region<V> = RwLock<HashMap<String, Arc<Entry<V>>>>;

/// Which regions serve callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// `primary` is readable and writable; `mirror` follows every write.
    Normal,
    /// A sweep owns `primary`; callers use `mirror` and the pending regions.
    Sweeping,
}

/// A concurrent map partition with per-key expiry.
///
/// # Example
///
/// ```
/// use flashmap::storage::Partition;
/// use std::time::Duration;
///
/// let partition = Partition::new();
///
/// partition.set("name", "Ariz");
/// assert_eq!(partition.get("name"), Some("Ariz"));
///
/// // Only the first conditional write lands
/// assert!(partition.set_nx("lock", "a"));
/// assert!(!partition.set_nx("lock", "b"));
/// assert_eq!(partition.get("lock"), Some("a"));
///
/// partition.set_ex("session", "token", Duration::from_secs(60));
/// assert_eq!(partition.sweep(), 0);
/// ```
pub struct Partition<V> {
    mode: RwLock<Mode>,
    sweeping: AtomicBool,

    primary: Region<V>,
    mirror: Region<V>,
    pending_writes: Region<V>,
    pending_deletes: Region<V>,

    stamper: Stamper,
    clock: Arc<dyn Clock>,
    detail_limit: usize,
    counters: Counters,
}

impl<V> fmt::Debug for Partition<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("mode", &*self.mode.read())
            .field("len", &self.primary.read().len())
            .field("sequence", &self.stamper.current())
            .finish()
    }
}

impl<V> Default for Partition<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Partition<V> {
    /// Creates an empty partition using the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty partition reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_options(clock, DEFAULT_DETAIL_LIMIT)
    }

    pub(crate) fn with_options(clock: Arc<dyn Clock>, detail_limit: usize) -> Self {
        Self {
            mode: RwLock::new(Mode::Normal),
            sweeping: AtomicBool::new(false),
            primary: RwLock::new(HashMap::new()),
            mirror: RwLock::new(HashMap::new()),
            pending_writes: RwLock::new(HashMap::new()),
            pending_deletes: RwLock::new(HashMap::new()),
            stamper: Stamper::new(),
            clock,
            detail_limit,
            counters: Counters::default(),
        }
    }

    /// Sets a key without expiry, replacing any previous value.
    pub fn set(&self, key: &str, value: V) {
        self.write(key, value, NO_EXPIRY, false);
    }

    /// Sets a key that expires `ttl` from now.
    ///
    /// `NO_EXPIRY` behaves like [`set`](Self::set). A zero ttl stores an entry
    /// that is already expired.
    pub fn set_ex(&self, key: &str, value: V, ttl: Duration) {
        self.write(key, value, ttl, false);
    }

    /// Sets a key only if it is absent or expired.
    ///
    /// Returns `true` if the value was written.
    pub fn set_nx(&self, key: &str, value: V) -> bool {
        self.write(key, value, NO_EXPIRY, true)
    }

    /// Sets a key with a ttl only if it is absent or expired.
    pub fn set_ex_nx(&self, key: &str, value: V, ttl: Duration) -> bool {
        self.write(key, value, ttl, true)
    }

    /// Deletes a key.
    ///
    /// Returns `true` if a live value was removed. While a sweep runs the
    /// delete is also recorded as a tombstone and applied to `primary` when
    /// the sweep reconciles.
    pub fn delete(&self, key: &str) -> bool {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);

        let mode = self.mode.read();
        let removed = match *mode {
            Mode::Normal => {
                let mut primary = self.primary.write();
                let removed = primary.remove(key);
                self.mirror.write().remove(key);
                removed
            }
            Mode::Sweeping => {
                let mut mirror = self.mirror.write();
                let removed = mirror.remove(key);
                let (written_at, sequence) = self.stamper.stamp(self.clock.now());
                self.pending_deletes.write().insert(
                    key.to_owned(),
                    Arc::new(Entry::tombstone(written_at, sequence)),
                );
                removed
            }
        };

        let now = self.clock.now();
        removed.map(|entry| !entry.is_expired(now)).unwrap_or(false)
    }

    /// Number of keys in the primary store.
    ///
    /// Expired keys not yet swept are counted. While a sweep runs the value
    /// does not include writes parked in the pending regions.
    pub fn len(&self) -> usize {
        self.primary.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` while a sweep owns the primary store.
    pub fn is_busy(&self) -> bool {
        *self.mode.read() == Mode::Sweeping
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        *self.mode.read()
    }

    /// Checks if a key exists and is not expired.
    pub fn exists(&self, key: &str) -> bool {
        self.live_entry(key).is_some()
    }

    /// Remaining ttl of a key.
    ///
    /// - `None` if the key doesn't exist
    /// - `Some(None)` if the key exists without expiry
    /// - `Some(Some(ttl))` otherwise
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let entry = self.live_entry(key)?;
        Some(entry.ttl_remaining(self.clock.now()))
    }

    /// Removes expired keys and reconciles writes made during the sweep.
    ///
    /// Returns the number of expired keys removed from the primary store.
    /// Calling this while another sweep is running on the same partition
    /// does nothing and returns 0.
    pub fn sweep(&self) -> usize {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Sweep already running on this partition, skipping");
            return 0;
        }

        let guard = SweepGuard::new(self);
        *self.mode.write() = Mode::Sweeping;

        let evicted = self.evict_expired();
        let bulk = self.reconcile_pending();
        self.resync_mirror(&evicted);
        let residual = guard.finish();

        self.counters.sweeps.fetch_add(1, Ordering::Relaxed);
        self.counters
            .swept
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);

        trace!(
            evicted = evicted.len(),
            merged = bulk.merged + residual.merged,
            deleted = bulk.deleted + residual.deleted,
            "Partition sweep finished"
        );

        evicted.len()
    }

    /// Operation counters for this partition.
    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            keys: self.len(),
            gets: self.counters.gets.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            lazy_expired: self.counters.lazy_expired.load(Ordering::Relaxed),
            sweeps: self.counters.sweeps.load(Ordering::Relaxed),
            swept: self.counters.swept.load(Ordering::Relaxed),
        }
    }

    fn stamped(&self, value: V, ttl: Duration) -> Arc<Entry<V>> {
        let now = self.clock.now();
        let (written_at, sequence) = self.stamper.stamp(now);
        Arc::new(Entry::new(value, expiry_after(now, ttl), written_at, sequence))
    }

    fn write(&self, key: &str, value: V, ttl: Duration, only_if_absent: bool) -> bool {
        let mode = self.mode.read();
        let written = match *mode {
            Mode::Normal => {
                let mut primary = self.primary.write();
                if only_if_absent && is_live(primary.get(key), self.clock.now()) {
                    false
                } else {
                    let entry = self.stamped(value, ttl);
                    self.mirror
                        .write()
                        .insert(key.to_owned(), Arc::clone(&entry));
                    primary.insert(key.to_owned(), entry);
                    true
                }
            }
            Mode::Sweeping => {
                let mut mirror = self.mirror.write();
                if only_if_absent && is_live(mirror.get(key), self.clock.now()) {
                    false
                } else {
                    let entry = self.stamped(value, ttl);
                    self.pending_writes
                        .write()
                        .insert(key.to_owned(), Arc::clone(&entry));
                    mirror.insert(key.to_owned(), entry);
                    true
                }
            }
        };

        if written {
            self.counters.sets.fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    /// Looks a key up in the region callers currently read from, evicting it
    /// if it has expired.
    fn live_entry(&self, key: &str) -> Option<Arc<Entry<V>>> {
        let mode = self.mode.read();
        let region = match *mode {
            Mode::Normal => &self.primary,
            Mode::Sweeping => &self.mirror,
        };

        let entry = region.read().get(key).cloned()?;
        if !entry.is_expired(self.clock.now()) {
            return Some(entry);
        }

        self.expire_lazily(*mode, key, &entry);
        None
    }

    /// Removes an expired entry found on read, unless a later write has
    /// already replaced it.
    fn expire_lazily(&self, mode: Mode, key: &str, expired: &Entry<V>) {
        let removed = match mode {
            Mode::Normal => {
                let mut primary = self.primary.write();
                let removed = remove_if_not_later(&mut primary, key, expired);
                if removed {
                    remove_if_not_later(&mut self.mirror.write(), key, expired);
                }
                removed
            }
            // primary belongs to the sweep; it evicts or reconciles the key
            Mode::Sweeping => remove_if_not_later(&mut self.mirror.write(), key, expired),
        };

        if removed {
            self.counters.lazy_expired.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Step 2: removes expired entries from `primary`.
    fn evict_expired(&self) -> Vec<(String, Arc<Entry<V>>)> {
        let now = self.clock.now();

        // Collect under the read lock to keep the write lock short
        let expired: Vec<String> = self
            .primary
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        if expired.is_empty() {
            return Vec::new();
        }

        let mut primary = self.primary.write();
        expired
            .into_iter()
            .filter_map(|key| {
                let still_expired = primary
                    .get(&key)
                    .map(|entry| entry.is_expired(now))
                    .unwrap_or(false);
                if !still_expired {
                    return None;
                }
                primary.remove(&key).map(|entry| (key, entry))
            })
            .collect()
    }

    /// Steps 3 and 4: moves pending writes and deletes into `primary`.
    ///
    /// Both pending regions are taken together and cleared whether or not
    /// their entries end up applied.
    fn reconcile_pending(&self) -> Reconciled {
        let (writes, deletes) = {
            let mut writes = self.pending_writes.write();
            let mut deletes = self.pending_deletes.write();
            (mem::take(&mut *writes), mem::take(&mut *deletes))
        };

        let mut reconciled = Reconciled::default();
        if writes.is_empty() && deletes.is_empty() {
            return reconciled;
        }

        let mut primary = self.primary.write();
        for (key, entry) in writes {
            let stale = primary
                .get(&key)
                .map(|current| !entry.later_than(current))
                .unwrap_or(false);
            if !stale {
                primary.insert(key, entry);
                reconciled.merged += 1;
            }
        }

        for (key, tombstone) in deletes {
            let applies = primary
                .get(&key)
                .map(|current| tombstone.later_than(current))
                .unwrap_or(false);
            if applies {
                primary.remove(&key);
                reconciled.deleted += 1;
            }
        }

        reconciled
    }

    /// Step 5: brings `mirror` back in line with `primary` after eviction.
    fn resync_mirror(&self, evicted: &[(String, Arc<Entry<V>>)]) {
        if evicted.is_empty() {
            return;
        }

        let mut mirror = self.mirror.write();
        for (key, entry) in evicted {
            remove_if_not_later(&mut mirror, key, entry);
        }
    }

    /// Step 6: drains the pending regions and returns to `Normal`.
    ///
    /// Runs with the mode write lock held, so no caller can park a write in
    /// a pending region that would then be left behind.
    fn finish_sweep(&self) -> Reconciled {
        let mut mode = self.mode.write();
        let reconciled = self.reconcile_pending();
        *mode = Mode::Normal;
        self.sweeping.store(false, Ordering::Release);
        reconciled
    }
}

impl<V: Clone> Partition<V> {
    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. Expired keys
    /// found here are removed on the spot.
    pub fn get(&self, key: &str) -> Option<V> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        self.live_entry(key)
            .and_then(|entry| entry.value().cloned())
    }

    /// Snapshot of the partition's regions for debugging.
    ///
    /// Regions are read one after another, so the view is not atomic.
    pub fn detail(&self) -> PartitionDetail<V> {
        PartitionDetail {
            mode: self.mode(),
            sequence: self.stamper.current(),
            primary: RegionView::capture(&self.primary, self.detail_limit),
            mirror: RegionView::capture(&self.mirror, self.detail_limit),
            pending_writes: RegionView::capture(&self.pending_writes, self.detail_limit),
            pending_deletes: RegionView::capture(&self.pending_deletes, self.detail_limit),
        }
    }
}

impl Partition<i64> {
    /// Increments a counter by 1. Missing keys start at 0.
    pub fn incr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, 1)
    }

    /// Increments a counter, keeping the key's current expiry.
    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.update_counter(key, NO_EXPIRY, |n| n.checked_add(delta))
    }

    /// Increments a counter; a key created by this call expires after `ttl`.
    pub fn incr_by_ex(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        self.update_counter(key, ttl, |n| n.checked_add(delta))
    }

    /// Decrements a counter by 1.
    pub fn decr(&self, key: &str) -> Result<i64> {
        self.decr_by(key, 1)
    }

    pub fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.update_counter(key, NO_EXPIRY, |n| n.checked_sub(delta))
    }

    pub fn decr_by_ex(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        self.update_counter(key, ttl, |n| n.checked_sub(delta))
    }

    /// Read-modify-write under the region lock of the current mode.
    fn update_counter(
        &self,
        key: &str,
        ttl: Duration,
        step: impl FnOnce(i64) -> Option<i64>,
    ) -> Result<i64> {
        let mode = self.mode.read();
        let (region, shadow) = match *mode {
            Mode::Normal => (&self.primary, &self.mirror),
            Mode::Sweeping => (&self.mirror, &self.pending_writes),
        };

        let mut data = region.write();
        let now = self.clock.now();
        let live = data.get(key).filter(|entry| !entry.is_expired(now));

        let current = live.and_then(|entry| entry.value().copied()).unwrap_or(0);
        let next = step(current).ok_or_else(|| Error::Overflow {
            key: key.to_owned(),
            current,
        })?;

        let expires_at = match live {
            Some(entry) => entry.expires_at(),
            None => expiry_after(now, ttl),
        };
        let (written_at, sequence) = self.stamper.stamp(now);
        let entry = Arc::new(Entry::new(next, expires_at, written_at, sequence));

        shadow.write().insert(key.to_owned(), Arc::clone(&entry));
        data.insert(key.to_owned(), entry);
        self.counters.sets.fetch_add(1, Ordering::Relaxed);

        Ok(next)
    }
}

fn is_live<V>(entry: Option<&Arc<Entry<V>>>, now: Timestamp) -> bool {
    entry.map(|entry| !entry.is_expired(now)).unwrap_or(false)
}

fn remove_if_not_later<V>(
    data: &mut HashMap<String, Arc<Entry<V>>>,
    key: &str,
    entry: &Entry<V>,
) -> bool {
    let replaceable = data
        .get(key)
        .map(|current| !current.later_than(entry))
        .unwrap_or(false);
    if replaceable {
        data.remove(key);
    }
    replaceable
}

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy)]
struct Reconciled {
    merged: usize,
    deleted: usize,
}

/// Returns the partition to `Normal` when a sweep ends, including by unwind.
struct SweepGuard<'a, V> {
    partition: &'a Partition<V>,
    finished: bool,
}

impl<'a, V> SweepGuard<'a, V> {
    fn new(partition: &'a Partition<V>) -> Self {
        Self {
            partition,
            finished: false,
        }
    }

    fn finish(mut self) -> Reconciled {
        self.finished = true;
        self.partition.finish_sweep()
    }
}

impl<V> Drop for SweepGuard<'_, V> {
    fn drop(&mut self) {
        if !self.finished {
            self.partition.finish_sweep();
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    lazy_expired: AtomicU64,
    sweeps: AtomicU64,
    swept: AtomicU64,
}

/// Partition statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    /// Keys in the primary store
    pub keys: usize,
    /// Total GET operations
    pub gets: u64,
    /// Total successful writes (set, conditional set, counters)
    pub sets: u64,
    /// Total DEL operations
    pub deletes: u64,
    /// Expired keys removed on access
    pub lazy_expired: u64,
    /// Completed sweeps
    pub sweeps: u64,
    /// Expired keys removed by sweeps
    pub swept: u64,
}

impl AddAssign for PartitionStats {
    fn add_assign(&mut self, other: Self) {
        self.keys += other.keys;
        self.gets += other.gets;
        self.sets += other.sets;
        self.deletes += other.deletes;
        self.lazy_expired += other.lazy_expired;
        self.sweeps += other.sweeps;
        self.swept += other.swept;
    }
}

/// Debug view of one region, capped at the partition's detail limit.
#[derive(Debug, Clone, Serialize)]
pub struct RegionView<V> {
    /// Number of entries in the region
    pub len: usize,
    /// `true` if `entries` was cut short
    pub truncated: bool,
    pub entries: BTreeMap<String, Entry<V>>,
}

impl<V: Clone> RegionView<V> {
    fn capture(region: &Region<V>, limit: usize) -> Self {
        let data = region.read();
        let entries = data
            .iter()
            .take(limit)
            .map(|(key, entry)| (key.clone(), Entry::clone(entry)))
            .collect();

        Self {
            len: data.len(),
            truncated: data.len() > limit,
            entries,
        }
    }
}

/// Debug view of a whole partition.
///
/// # Example
///
/// ```
/// use flashmap::storage::Partition;
///
/// let partition = Partition::new();
/// partition.set("user", 7u32);
///
/// let detail = partition.detail();
/// assert_eq!(detail.primary.len, 1);
/// println!("{}", detail.to_json().unwrap());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct PartitionDetail<V> {
    pub mode: Mode,
    /// Last issued write sequence
    pub sequence: u64,
    pub primary: RegionView<V>,
    pub mirror: RegionView<V>,
    pub pending_writes: RegionView<V>,
    pub pending_deletes: RegionView<V>,
}

impl<V: Serialize> PartitionDetail<V> {
    /// Renders the view as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
