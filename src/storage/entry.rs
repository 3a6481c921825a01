//! Entries, Ordering and Clocks
//!
//! Every write to a partition produces a fresh, immutable [`Entry`]. A key's
//! value never changes in place: it is replaced by a newer entry. Entries
//! carry a logical stamp (`written_at`, `sequence`) that totally orders the
//! writes a partition has accepted, which is how a sweep decides between a
//! value that sat in the primary store and one that arrived while the sweep
//! was running.
//!
//! ## Ordering
//!
//! ```text
//! A later_than B  <=>  A.written_at >  B.written_at
//!                  ||  A.written_at == B.written_at && A.sequence > B.sequence
//! ```
//!
//! `sequence` wraps to zero on `u64` overflow. A comparison spanning the wrap
//! instant with an identical `written_at` can order two writes backwards;
//! that needs 2^64 writes inside one nanosecond and is accepted as benign.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds as reported by a [`Clock`].
pub type Timestamp = u64;

/// A ttl value meaning "never expires".
pub const NO_EXPIRY: Duration = Duration::MAX;

/// Source of time for expiry and write stamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in nanoseconds.
    fn now(&self) -> Timestamp;
}

/// Wall clock, nanoseconds since the UNIX epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_nanos)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Intended for tests.
///
/// # Example
///
/// ```
/// use flashmap::storage::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_nanos(500));
/// assert_eq!(clock.now(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_nanos(by), Ordering::SeqCst);
    }

    /// Jumps to an absolute time, forwards or backwards.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Converts a duration to nanoseconds, saturating at `u64::MAX`.
#[inline]
pub(crate) fn duration_nanos(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

/// Absolute expiry for a ttl starting at `now`. `NO_EXPIRY` maps to `None`.
#[inline]
pub(crate) fn expiry_after(now: Timestamp, ttl: Duration) -> Option<Timestamp> {
    if ttl == NO_EXPIRY {
        None
    } else {
        Some(now.saturating_add(duration_nanos(ttl)))
    }
}

/// A stored value with its expiry and write stamp.
///
/// Entries without a value are delete tombstones; they only ever live in a
/// partition's pending-delete region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry<V> {
    value: Option<V>,
    expires_at: Option<Timestamp>,
    written_at: Timestamp,
    sequence: u64,
}

impl<V> Entry<V> {
    pub(crate) fn new(
        value: V,
        expires_at: Option<Timestamp>,
        written_at: Timestamp,
        sequence: u64,
    ) -> Self {
        Self {
            value: Some(value),
            expires_at,
            written_at,
            sequence,
        }
    }

    pub(crate) fn tombstone(written_at: Timestamp, sequence: u64) -> Self {
        Self {
            value: None,
            expires_at: None,
            written_at,
            sequence,
        }
    }

    /// The stored value, `None` for a delete tombstone.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    pub fn written_at(&self) -> Timestamp {
        self.written_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// True if this entry was written after `other`.
    #[inline]
    pub fn later_than(&self, other: &Entry<V>) -> bool {
        if self.written_at != other.written_at {
            return self.written_at > other.written_at;
        }
        self.sequence > other.sequence
    }

    /// True if this entry was written before `other`.
    #[inline]
    pub fn earlier_than(&self, other: &Entry<V>) -> bool {
        if self.written_at != other.written_at {
            return self.written_at < other.written_at;
        }
        self.sequence < other.sequence
    }

    /// Checks if this entry has expired at `now`.
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Remaining time to live, or `None` if the entry never expires.
    pub fn ttl_remaining(&self, now: Timestamp) -> Option<Duration> {
        self.expires_at
            .map(|exp| Duration::from_nanos(exp.saturating_sub(now)))
    }
}

/// Issues write stamps for one partition.
///
/// `written_at` never goes backwards even if the wall clock does, so a stamp
/// issued later always compares later.
#[derive(Debug, Default)]
pub(crate) struct Stamper {
    last: AtomicU64,
    sequence: AtomicU64,
}

impl Stamper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `(written_at, sequence)` for a new write.
    #[inline]
    pub(crate) fn stamp(&self, now: Timestamp) -> (Timestamp, u64) {
        let previous = self.last.fetch_max(now, Ordering::AcqRel);
        // fetch_add wraps on overflow
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        (previous.max(now), sequence)
    }

    /// The most recently issued sequence number.
    pub(crate) fn current(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn with_sequence(sequence: u64) -> Self {
        Self {
            last: AtomicU64::new(0),
            sequence: AtomicU64::new(sequence),
        }
    }
}
