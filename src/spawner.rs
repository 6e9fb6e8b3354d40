//! Sweep Dispatch
//!
//! When a write wins the throttling race, the map hands a sweep to a
//! [`Spawner`] and returns to the caller without waiting for it.
//!
//! - [`DefaultSpawner`] runs the sweep on tokio's blocking pool when called
//!   from inside a runtime, and on a fresh OS thread otherwise.
//! - [`InlineSpawner`] runs the sweep on the calling thread. Useful in tests
//!   and for callers that prefer cleanup to happen deterministically.

use tokio::runtime::Handle;
use tracing::error;

/// A unit of work handed to a [`Spawner`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks asynchronously (or not) on behalf of the map.
pub trait Spawner: Send + Sync + 'static {
    /// Runs `task`. Must not propagate a panic raised by the task to the
    /// caller unless the spawner runs tasks inline.
    fn spawn(&self, task: Task);
}

/// Name given to sweep threads spawned outside a tokio runtime.
const SWEEP_THREAD_NAME: &str = "ttlmap-sweep";

/// Spawns on tokio's blocking pool, or on a dedicated thread when no runtime
/// is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSpawner;

impl Spawner for DefaultSpawner {
    fn spawn(&self, task: Task) {
        if let Ok(handle) = Handle::try_current() {
            // The returned JoinHandle is dropped: fire and forget.
            handle.spawn_blocking(task);
            return;
        }

        let result = std::thread::Builder::new()
            .name(SWEEP_THREAD_NAME.to_string())
            .spawn(task);
        if let Err(e) = result {
            error!(error = %e, "Failed to spawn sweep thread, skipping sweep");
        }
    }
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineSpawner;

impl Spawner for InlineSpawner {
    #[inline]
    fn spawn(&self, task: Task) {
        task();
    }
}
