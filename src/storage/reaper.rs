//! Periodic Reaper
//!
//! An [`ExpiringMap`] only cleans itself when it is written to. A map that
//! receives a burst of writes and then goes quiet would keep its expired
//! entries forever. The [`Reaper`] fixes that by sweeping the map on a fixed
//! interval, whether or not anyone writes.
//!
//! ## Design
//!
//! The reaper runs as a Tokio task and:
//! 1. Waits for the next tick (default: half the map TTL)
//! 2. Calls [`ExpiringMap::clean_now`]
//! 3. Stops when closed, dropped, or when the map itself is gone
//!
//! The task only holds a weak reference to the map, so a forgotten reaper
//! does not keep a map alive.

use std::hash::Hash;
use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::map::{ExpiringMap, Inner};
use crate::error::{Result, TtlMapError};

/// A handle to a running reaper.
///
/// Closing the reaper, or dropping this handle, stops the background task.
/// Neither waits for the task to exit; use [`is_finished`](Reaper::is_finished)
/// if that matters.
#[derive(Debug)]
pub struct Reaper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    interval: Duration,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Starts a reaper that sweeps `map` every half TTL.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use ttlmap::{ExpiringMap, Reaper};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let map = ExpiringMap::new(Duration::from_millis(100)).unwrap();
    /// let reaper = Reaper::new(&map).unwrap();
    /// assert_eq!(reaper.interval(), Duration::from_millis(50));
    ///
    /// map.store("session", 42);
    /// tokio::time::sleep(Duration::from_millis(300)).await;
    /// assert!(map.load(&"session").is_none());
    ///
    /// reaper.close();
    /// # }
    /// ```
    pub fn new<K, V>(map: &ExpiringMap<K, V>) -> Result<Self>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let interval = (map.timeout() / 2).max(Duration::from_nanos(1));
        Self::with_interval(map, interval)
    }

    /// Starts a reaper that sweeps `map` every `interval`.
    ///
    /// Returns [`TtlMapError::ZeroInterval`] for a zero interval and
    /// [`TtlMapError::NoRuntime`] outside of a tokio runtime.
    pub fn with_interval<K, V>(map: &ExpiringMap<K, V>, interval: Duration) -> Result<Self>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(TtlMapError::ZeroInterval);
        }
        let runtime = Handle::try_current().map_err(|_| TtlMapError::NoRuntime)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(reaper_loop(map.downgrade(), interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Reaper started");

        Ok(Self {
            shutdown_tx,
            interval,
            task,
        })
    }

    /// Stops the reaper.
    ///
    /// Returns without waiting for the background task. Calling this more
    /// than once is a no-op.
    pub fn close(&self) {
        let was_closed = self.shutdown_tx.send_replace(true);
        if !was_closed {
            info!("Reaper stopped");
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Returns true once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// The sweep interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.close();
    }
}

/// The main reaper loop.
async fn reaper_loop<K, V>(
    map: Weak<Inner<K, V>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // First sweep one full period after start.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Reaper received shutdown signal");
                    return;
                }
            }
        }

        let Some(inner) = map.upgrade() else {
            debug!("Map dropped, reaper exiting");
            return;
        };

        let removed = inner.clean_now();
        if removed > 0 {
            debug!(expired = removed, "Reaper cleaned up expired entries");
        }
    }
}
