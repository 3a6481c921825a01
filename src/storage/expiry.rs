//! Background Sweep Scheduler
//!
//! Reading a key past its expiry removes it ("lazy expiry"), but a key that
//! is never read again would stay in memory forever. The scheduler fixes
//! that by periodically calling [`Partition::sweep`] on every partition of a
//! router ("active expiry").
//!
//! ## Design
//!
//! The scheduler runs as a Tokio task and:
//! 1. Sleeps for the configured interval
//! 2. Sweeps the partitions one after another
//! 3. Pauses briefly between two partitions to spread the CPU cost
//! 4. Logs what each partition evicted
//!
//! ## Stopping
//!
//! - [`SweepScheduler::stop`] (and dropping the handle) is graceful: the
//!   partition being swept is finished, then the task exits.
//! - [`SweepScheduler::abort`] is forced: the task is cancelled at its next
//!   await point. A partition sweep never awaits, so it always completes and
//!   returns its partition to normal mode.

use super::partition::Partition;
use crate::config::MapConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Configuration for the sweep scheduler.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Interval between two passes over all partitions (default: 60s)
    pub interval: Duration,

    /// Pause between two partitions of the same pass (default: 10ms)
    pub slot_pause: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::from(&MapConfig::default())
    }
}

impl From<&MapConfig> for SweepConfig {
    fn from(config: &MapConfig) -> Self {
        Self {
            interval: config.sweep_interval,
            slot_pause: config.slot_pause,
        }
    }
}

/// A handle to the running sweep scheduler.
///
/// When this handle is dropped, the scheduler is asked to stop gracefully.
#[derive(Debug)]
pub struct SweepScheduler {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SweepScheduler {
    /// Starts sweeping `partitions` as a task on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime. [`ShardRouter`] checks for a
    /// runtime first and reports `Error::NoRuntime` instead.
    ///
    /// [`ShardRouter`]: crate::ShardRouter
    pub fn start<V>(partitions: Arc<[Partition<V>]>, config: SweepConfig) -> Self
    where
        V: Send + Sync + 'static,
    {
        Self::start_on(&Handle::current(), partitions, config)
    }

    pub(crate) fn start_on<V>(
        runtime: &Handle,
        partitions: Arc<[Partition<V>]>,
        config: SweepConfig,
    ) -> Self
    where
        V: Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let interval_ms = config.interval.as_millis();
        let handle = runtime.spawn(sweeper_loop(partitions, config, shutdown_rx));

        info!(interval_ms, "Background sweep scheduler started");

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Asks the scheduler to stop once the current partition is swept.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!("Background sweep scheduler stopping");
    }

    /// Stops gracefully and waits for the task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            // A cancelled or panicked task has exited as well
            let _ = handle.await;
        }
        debug!("Background sweep scheduler exited");
    }

    /// Cancels the task without waiting for the current pass to finish.
    pub fn abort(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        info!("Background sweep scheduler aborted");
    }

    /// Returns `true` once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Waits for `duration` unless shutdown is requested first.
///
/// Returns `false` if the scheduler should exit.
async fn pause(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        result = shutdown_rx.changed() => {
            result.is_ok() && !*shutdown_rx.borrow()
        }
    }
}

/// The main scheduler loop.
async fn sweeper_loop<V>(
    partitions: Arc<[Partition<V>]>,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    V: Send + Sync + 'static,
{
    loop {
        if !pause(config.interval, &mut shutdown_rx).await {
            debug!("Sweep scheduler received shutdown signal");
            return;
        }

        let mut evicted = 0;
        for (index, partition) in partitions.iter().enumerate() {
            let removed = partition.sweep();
            evicted += removed;

            if removed > 0 {
                debug!(
                    partition = index,
                    evicted = removed,
                    keys_remaining = partition.len(),
                    "Expired keys cleaned up"
                );
            }

            if *shutdown_rx.borrow() {
                debug!(partition = index, "Sweep scheduler stopping mid-pass");
                return;
            }

            let last = index + 1 == partitions.len();
            if !last
                && !config.slot_pause.is_zero()
                && !pause(config.slot_pause, &mut shutdown_rx).await
            {
                debug!(partition = index, "Sweep scheduler stopping mid-pass");
                return;
            }
        }

        trace!(partitions = partitions.len(), evicted, "Sweep pass finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Mode;

    fn partitions(count: usize) -> Arc<[Partition<u32>]> {
        (0..count)
            .map(|_| Partition::new())
            .collect::<Vec<_>>()
            .into()
    }

    fn fast() -> SweepConfig {
        SweepConfig {
            interval: Duration::from_millis(10),
            slot_pause: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_scheduler_cleans_expired_keys() {
        let partitions = partitions(3);

        for (i, partition) in partitions.iter().enumerate() {
            for j in 0..10 {
                partition.set_ex(&format!("key{}", j), j, Duration::from_millis(50));
            }
            partition.set("persistent", i as u32);
        }

        let _scheduler = SweepScheduler::start(Arc::clone(&partitions), fast());

        tokio::time::sleep(Duration::from_millis(250)).await;

        for partition in partitions.iter() {
            assert_eq!(partition.len(), 1);
            assert!(partition.exists("persistent"));
            assert_eq!(partition.stats().swept, 10);
        }
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_drop() {
        let partitions = partitions(2);

        {
            let _scheduler = SweepScheduler::start(Arc::clone(&partitions), fast());
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Scheduler is dropped here
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        partitions[0].set_ex("key", 1, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Not swept, but get() expires it lazily
        assert_eq!(partitions[0].len(), 1);
        assert!(partitions[0].get("key").is_none());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_waits_for_exit() {
        let partitions = partitions(4);
        let scheduler = SweepScheduler::start(Arc::clone(&partitions), fast());

        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.shutdown().await;

        for partition in partitions.iter() {
            assert_eq!(partition.mode(), Mode::Normal);
        }
    }

    #[tokio::test]
    async fn test_abort_leaves_partitions_normal() {
        let partitions = partitions(4);
        for partition in partitions.iter() {
            for j in 0..1000 {
                partition.set_ex(&format!("key{}", j), j, Duration::from_millis(5));
            }
        }

        let scheduler = SweepScheduler::start(Arc::clone(&partitions), fast());
        tokio::time::sleep(Duration::from_millis(15)).await;
        scheduler.abort();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for partition in partitions.iter() {
            assert!(!partition.is_busy());
            partition.set("after", 1);
            assert_eq!(partition.get("after"), Some(1));
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let scheduler = SweepScheduler::start(partitions(1), fast());

        scheduler.stop();
        scheduler.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scheduler.is_finished());
    }
}
