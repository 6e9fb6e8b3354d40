//! Thread-Safe Map with Self-Expiring Entries
//!
//! This module implements [`ExpiringMap`], a concurrent key-value map whose
//! entries are removed once they are older than a fixed TTL.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Entries live in several `RwLock<HashMap>` shards, so
//!    writers to different keys rarely contend.
//! 2. **Write-Triggered Cleanup**: There is no mandatory background task.
//!    Writes periodically schedule a full sweep, at most once per half TTL.
//! 3. **Coalescing Sweeps**: An atomic flag lets only one sweep run at a time.
//!    A sweep requested while another is running returns immediately.
//! 4. **Callbacks Outside Locks**: Expired entries are removed under the shard
//!    write lock and handed to the expiration callback after it is released.
//!
//! ## Throttling
//!
//! ```text
//!  last_scheduled          last_scheduled + ttl/2
//!        │                          │
//! ───────┼──────────────────────────┼──────────────────▶ time
//!        │   writes: no sweep       │ first write here wins the CAS
//!        │                          │ and schedules one sweep
//! ```
//!
//! Reads never check expiry: an entry that aged past its TTL stays visible
//! until the next sweep removes it.

use std::collections::hash_map::{DefaultHasher, Entry as MapEntry};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, TtlMapError};
use crate::spawner::{DefaultSpawner, Spawner};

/// Default number of shards.
pub const DEFAULT_SHARD_AMOUNT: usize = 16;

/// Callback invoked with each entry removed by a sweep.
pub type ExpireCallback<K, V> = Box<dyn Fn(K, V) + Send + Sync + 'static>;

/// A stored value together with the instant it was written.
#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    created_at: Instant,
}

impl<V> Entry<V> {
    fn new(value: V, created_at: Instant) -> Self {
        Self { value, created_at }
    }

    /// An entry is expired once it is strictly older than `timeout`.
    #[inline]
    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > timeout
    }
}

/// A single shard containing a portion of the entries.
struct Shard<K, V> {
    data: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> Shard<K, V> {
    fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    // Callbacks never run under a shard lock, so poisoning means a key's
    // Hash or Eq impl panicked mid-operation. The shard can't be trusted
    // after that.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, Entry<V>>> {
        self.data.read().expect("ttlmap shard lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, Entry<V>>> {
        self.data.write().expect("ttlmap shard lock poisoned")
    }
}

/// Map statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    /// Number of entries currently stored, expired-but-unswept included
    pub entries: usize,
    /// Writes that inserted an entry
    pub stores: u64,
    /// Sweeps handed to the spawner by write traffic
    pub sweeps_scheduled: u64,
    /// Sweeps that ran to completion
    pub sweeps: u64,
    /// `clean_now` calls that found another sweep running
    pub sweeps_skipped: u64,
    /// Entries removed by sweeps
    pub expired: u64,
    /// Expiration callbacks that panicked
    pub callback_panics: u64,
}

/// Shared state behind every [`ExpiringMap`] handle.
pub(crate) struct Inner<K, V> {
    shards: Vec<Shard<K, V>>,
    timeout: Duration,
    on_expire: Option<ExpireCallback<K, V>>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawner>,

    /// Clock reading taken at construction; `last_scheduled` counts from here.
    epoch: Instant,
    /// Nanoseconds since `epoch` at which the last sweep was scheduled.
    last_scheduled: AtomicU64,
    /// Set while a sweep is running.
    sweeping: AtomicBool,

    store_count: AtomicU64,
    scheduled_count: AtomicU64,
    sweep_count: AtomicU64,
    skipped_count: AtomicU64,
    expired_count: AtomicU64,
    panic_count: AtomicU64,
}

/// Clears the sweep flag when dropped, unwinding included.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    #[inline]
    fn shard(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Nanoseconds elapsed on the map's clock since construction.
    fn nanos_since_epoch(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.epoch);
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Runs one sweep unless another is in progress. Returns the number of
    /// entries removed.
    pub(crate) fn clean_now(&self) -> usize {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.skipped_count.fetch_add(1, Ordering::Relaxed);
            trace!("Sweep already running, skipping");
            return 0;
        }
        let _guard = SweepGuard(&self.sweeping);

        let now = self.clock.now();
        let mut removed = 0usize;

        for shard in &self.shards {
            // Check and removal happen under the same write lock, so an entry
            // re-stored concurrently is either seen fresh or not seen at all.
            let expired: Vec<(K, V)> = {
                let mut data = shard.write();
                let keys: Vec<K> = data
                    .iter()
                    .filter(|(_, entry)| entry.is_expired(now, self.timeout))
                    .map(|(key, _)| key.clone())
                    .collect();
                keys.into_iter()
                    .filter_map(|key| data.remove(&key).map(|entry| (key, entry.value)))
                    .collect()
            };

            removed += expired.len();
            if let Some(callback) = &self.on_expire {
                for (key, value) in expired {
                    self.notify_expired(callback, key, value);
                }
            }
        }

        self.sweep_count.fetch_add(1, Ordering::Relaxed);
        if removed > 0 {
            self.expired_count.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(expired = removed, "Expired entries cleaned up");
        } else {
            trace!("Sweep found no expired entries");
        }

        removed
    }

    fn notify_expired(&self, callback: &ExpireCallback<K, V>, key: K, value: V) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(key, value)));
        if outcome.is_err() {
            self.panic_count.fetch_add(1, Ordering::Relaxed);
            warn!("Expiration callback panicked, continuing sweep");
        }
    }
}

impl<K, V> Inner<K, V> {
    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }
}

/// A thread-safe map whose entries expire after a fixed TTL.
///
/// Expired entries are removed by sweeps. A sweep is scheduled by write
/// traffic (at most once per half TTL), by [`clean_now`](Self::clean_now),
/// or periodically by a [`Reaper`](crate::Reaper) for maps that rarely see
/// writes. Until a sweep runs, expired entries remain readable.
///
/// `ExpiringMap` is a handle: cloning it is cheap and clones share the same
/// entries.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ttlmap::ExpiringMap;
///
/// let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
///
/// map.store("name", "Ariz");
/// assert_eq!(map.load(&"name"), Some("Ariz"));
///
/// let (actual, loaded) = map.load_or_store("name", "Bob");
/// assert_eq!((actual, loaded), ("Ariz", true));
///
/// map.delete(&"name");
/// assert!(map.load(&"name").is_none());
/// ```
pub struct ExpiringMap<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ExpiringMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for ExpiringMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringMap")
            .field("timeout", &self.inner.timeout)
            .field("shards", &self.inner.shards.len())
            .field("has_callback", &self.inner.on_expire.is_some())
            .field("sweeping", &self.inner.sweeping.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a map with the given TTL and default options.
    ///
    /// Returns [`TtlMapError::ZeroTimeout`] if `timeout` is zero.
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::builder(timeout).build()
    }

    /// Starts configuring a map with the given TTL.
    pub fn builder(timeout: Duration) -> MapBuilder<K, V> {
        MapBuilder::new(timeout)
    }

    /// The TTL shared by every entry.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Returns the value stored for `key`.
    ///
    /// Expiry is not checked here: an entry past its TTL is returned until a
    /// sweep removes it.
    pub fn load(&self, key: &K) -> Option<V> {
        let data = self.inner.shard(key).read();
        data.get(key).map(|entry| entry.value.clone())
    }

    /// Inserts or overwrites `key` with a fresh creation time.
    ///
    /// May schedule a sweep on the map's spawner.
    pub fn store(&self, key: K, value: V) {
        let entry = Entry::new(value, self.inner.clock.now());
        {
            let mut data = self.inner.shard(&key).write();
            data.insert(key, entry);
        }
        self.inner.store_count.fetch_add(1, Ordering::Relaxed);
        self.hit();
    }

    /// Removes `key` if present. Never invokes the expiration callback.
    pub fn delete(&self, key: &K) {
        self.inner.shard(key).write().remove(key);
    }

    /// Removes `key` and returns its value, if it was present.
    ///
    /// Never invokes the expiration callback and never schedules a sweep.
    pub fn load_and_delete(&self, key: &K) -> Option<V> {
        let removed = self.inner.shard(key).write().remove(key);
        removed.map(|entry| entry.value)
    }

    /// Returns the existing value for `key`, or inserts `value`.
    ///
    /// The boolean is `true` when the value was already present. An existing
    /// entry keeps its original creation time; only an insert may schedule a
    /// sweep.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool) {
        let now = self.inner.clock.now();
        {
            let mut data = self.inner.shard(&key).write();
            match data.entry(key) {
                MapEntry::Occupied(existing) => return (existing.get().value.clone(), true),
                MapEntry::Vacant(slot) => {
                    slot.insert(Entry::new(value.clone(), now));
                }
            }
        }
        self.inner.store_count.fetch_add(1, Ordering::Relaxed);
        self.hit();
        (value, false)
    }

    /// Calls `visitor` for each entry until it returns `false`.
    ///
    /// Order is unspecified. Each shard is copied under its read lock and
    /// visited after the lock is dropped, so the visitor may use the map.
    /// Entries added or removed concurrently may or may not be seen.
    pub fn range<F>(&self, mut visitor: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for shard in &self.inner.shards {
            let snapshot: Vec<(K, V)> = shard
                .read()
                .iter()
                .map(|(key, entry)| (key.clone(), entry.value.clone()))
                .collect();

            for (key, value) in &snapshot {
                if !visitor(key, value) {
                    return;
                }
            }
        }
    }

    /// Synchronously removes entries older than the TTL.
    ///
    /// Returns the number of entries removed. If another sweep is already
    /// running this returns `0` right away without waiting for it. Entries
    /// written while the sweep runs may be skipped until the next one.
    pub fn clean_now(&self) -> usize {
        self.inner.clean_now()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns map statistics.
    pub fn stats(&self) -> MapStats {
        let inner = &self.inner;
        MapStats {
            entries: inner.len(),
            stores: inner.store_count.load(Ordering::Relaxed),
            sweeps_scheduled: inner.scheduled_count.load(Ordering::Relaxed),
            sweeps: inner.sweep_count.load(Ordering::Relaxed),
            sweeps_skipped: inner.skipped_count.load(Ordering::Relaxed),
            expired: inner.expired_count.load(Ordering::Relaxed),
            callback_panics: inner.panic_count.load(Ordering::Relaxed),
        }
    }

    /// Weak reference to the shared state, used by the reaper.
    pub(crate) fn downgrade(&self) -> Weak<Inner<K, V>> {
        Arc::downgrade(&self.inner)
    }

    /// Throttled scheduling, run after every inserting write.
    ///
    /// Exactly one writer per half-TTL window wins the compare-and-swap and
    /// hands a sweep to the spawner.
    fn hit(&self) {
        let inner = &self.inner;
        let last = inner.last_scheduled.load(Ordering::Acquire);
        let window = u64::try_from((inner.timeout / 2).as_nanos()).unwrap_or(u64::MAX);
        let next = last.saturating_add(window);

        if inner.nanos_since_epoch() < next {
            return;
        }
        if inner
            .last_scheduled
            .compare_exchange(last, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        inner.scheduled_count.fetch_add(1, Ordering::Relaxed);
        trace!(window_ns = window, "Scheduling sweep");
        let shared = Arc::clone(inner);
        inner.spawner.spawn(Box::new(move || {
            shared.clean_now();
        }));
    }
}

/// Builder for [`ExpiringMap`].
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use ttlmap::{ExpiringMap, InlineSpawner, ManualClock};
///
/// let clock = Arc::new(ManualClock::new());
/// let expired = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&expired);
///
/// let map = ExpiringMap::builder(Duration::from_secs(1))
///     .clock(clock.clone())
///     .spawner(Arc::new(InlineSpawner))
///     .on_expire(move |_key: u32, _value: u32| {
///         counter.fetch_add(1, Ordering::SeqCst);
///     })
///     .build()
///     .unwrap();
///
/// map.store(1, 10);
/// clock.advance(Duration::from_secs(2));
/// map.store(2, 20); // schedules a sweep, run inline
///
/// assert_eq!(expired.load(Ordering::SeqCst), 1);
/// assert_eq!(map.load(&1), None);
/// assert_eq!(map.load(&2), Some(20));
/// ```
pub struct MapBuilder<K, V> {
    timeout: Duration,
    on_expire: Option<ExpireCallback<K, V>>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawner>,
    shard_amount: usize,
}

impl<K, V> MapBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            on_expire: None,
            clock: Arc::new(SystemClock),
            spawner: Arc::new(DefaultSpawner),
            shard_amount: DEFAULT_SHARD_AMOUNT,
        }
    }

    /// Sets the callback invoked once for every entry a sweep removes.
    ///
    /// Callbacks run on the sweeping thread, one at a time, with no shard
    /// lock held. A panicking callback is caught and the sweep moves on.
    pub fn on_expire<F>(mut self, callback: F) -> Self
    where
        F: Fn(K, V) + Send + Sync + 'static,
    {
        self.on_expire = Some(Box::new(callback));
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets how write-triggered sweeps are dispatched.
    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Sets the number of lock shards.
    pub fn shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = shard_amount;
        self
    }

    /// Builds the map.
    pub fn build(self) -> Result<ExpiringMap<K, V>> {
        if self.timeout.is_zero() {
            return Err(TtlMapError::ZeroTimeout);
        }
        if self.shard_amount == 0 {
            return Err(TtlMapError::ZeroShards);
        }

        let shards = (0..self.shard_amount).map(|_| Shard::new()).collect();
        let epoch = self.clock.now();

        Ok(ExpiringMap {
            inner: Arc::new(Inner {
                shards,
                timeout: self.timeout,
                on_expire: self.on_expire,
                clock: self.clock,
                spawner: self.spawner,
                epoch,
                // Counting from "now" keeps the first write from sweeping.
                last_scheduled: AtomicU64::new(0),
                sweeping: AtomicBool::new(false),
                store_count: AtomicU64::new(0),
                scheduled_count: AtomicU64::new(0),
                sweep_count: AtomicU64::new(0),
                skipped_count: AtomicU64::new(0),
                expired_count: AtomicU64::new(0),
                panic_count: AtomicU64::new(0),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::spawner::{InlineSpawner, Task};
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use tokio_test::{assert_err, assert_ok};

    /// Counts spawned sweeps and optionally runs them inline.
    #[derive(Default)]
    struct CountingSpawner {
        spawned: AtomicU64,
        run: bool,
    }

    impl CountingSpawner {
        fn running() -> Self {
            Self {
                spawned: AtomicU64::new(0),
                run: true,
            }
        }

        fn count(&self) -> u64 {
            self.spawned.load(Ordering::SeqCst)
        }
    }

    impl Spawner for CountingSpawner {
        fn spawn(&self, task: Task) {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            if self.run {
                task();
            }
        }
    }

    fn manual_map<K, V>(
        timeout: Duration,
    ) -> (ExpiringMap<K, V>, Arc<ManualClock>, Arc<CountingSpawner>)
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let clock = Arc::new(ManualClock::new());
        let spawner = Arc::new(CountingSpawner::running());
        let map = ExpiringMap::builder(timeout)
            .clock(clock.clone())
            .spawner(spawner.clone())
            .build()
            .unwrap();
        (map, clock, spawner)
    }

    #[test]
    fn test_store_and_load() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        map.store("foo", "bar");
        assert_eq!(map.load(&"foo"), Some("bar"));
        assert_eq!(map.load(&"baz"), None);
    }

    #[test]
    fn test_overwrite() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        map.store("key", 1);
        map.store("key", 2);
        assert_eq!(map.load(&"key"), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_delete() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        map.store("foo", "bar");
        map.delete(&"foo");
        map.delete(&"baz");
        assert_eq!(map.load(&"foo"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_load_and_delete() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        map.store("foo", "bar");
        assert_eq!(map.load_and_delete(&"foo"), Some("bar"));
        assert_eq!(map.load_and_delete(&"foo"), None);
    }

    #[test]
    fn test_load_or_store() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        map.store("foo", "bar");
        assert_eq!(map.load_or_store("foo", "baz"), ("bar", true));

        map.delete(&"foo");
        assert_eq!(map.load_or_store("foo", "baz"), ("baz", false));
        assert_eq!(map.load(&"foo"), Some("baz"));
    }

    #[test]
    fn test_load_or_store_keeps_creation_time() {
        let (map, clock, _) = manual_map(Duration::from_secs(1));
        map.store("old", 1);

        clock.advance(Duration::from_millis(900));
        assert_eq!(map.load_or_store("old", 2), (1, true));

        clock.advance(Duration::from_millis(200));
        assert_eq!(map.clean_now(), 1);
        assert_eq!(map.load(&"old"), None);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ExpiringMap::<u32, u32>::new(Duration::ZERO);
        assert_eq!(assert_err!(result), TtlMapError::ZeroTimeout);
    }

    #[test]
    fn test_zero_shards_rejected() {
        let result = ExpiringMap::<u32, u32>::builder(Duration::from_secs(1))
            .shard_amount(0)
            .build();
        assert_eq!(assert_err!(result), TtlMapError::ZeroShards);
    }

    #[test]
    fn test_single_shard() {
        let map = assert_ok!(ExpiringMap::builder(Duration::from_secs(1))
            .shard_amount(1)
            .build());
        for i in 0..100 {
            map.store(i, i * 2);
        }
        assert_eq!(map.len(), 100);
        assert_eq!(map.load(&42), Some(84));
    }

    #[test]
    fn test_range_visits_all() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        for i in 0..50 {
            map.store(i, i + 100);
        }

        let mut seen = Vec::new();
        map.range(|k, v| {
            assert_eq!(*v, *k + 100);
            seen.push(*k);
            true
        });
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_range_stops_early() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        for i in 0..50 {
            map.store(i, i);
        }

        let mut visited = 0;
        map.range(|_, _| {
            visited += 1;
            visited < 3
        });
        assert_eq!(visited, 3);
    }

    #[test]
    fn test_range_visitor_can_mutate_map() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        for i in 0..10 {
            map.store(i, i);
        }

        map.range(|k, _| {
            map.delete(k);
            true
        });
        assert!(map.is_empty());
    }

    #[test]
    fn test_clone_shares_entries() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        let other = map.clone();
        map.store("shared", 1);
        assert_eq!(other.load(&"shared"), Some(1));
    }

    #[test]
    fn test_first_write_does_not_schedule() {
        let (map, _, spawner) = manual_map(Duration::from_millis(1));
        for i in 0..5 {
            map.store(i, i);
        }
        assert_eq!(spawner.count(), 0);
        assert_eq!(map.stats().sweeps_scheduled, 0);
    }

    #[test]
    fn test_expiry_is_write_triggered() {
        let (map, clock, spawner) = manual_map(Duration::from_secs(1));
        map.store("a", "foo");

        clock.advance(Duration::from_secs(2));

        // No write since: the entry is stale but still visible.
        assert_eq!(map.load(&"a"), Some("foo"));
        assert_eq!(spawner.count(), 0);
    }

    #[test]
    fn test_later_write_expires_earlier_entries() {
        let (map, clock, spawner) = manual_map(Duration::from_secs(1));
        map.store("a", "foo");

        clock.advance(Duration::from_secs(2));
        map.store("b", "bar");

        assert_eq!(spawner.count(), 1);
        assert_eq!(map.load(&"a"), None);
        assert_eq!(map.load(&"b"), Some("bar"));
    }

    #[test]
    fn test_inserting_load_or_store_schedules() {
        let (map, clock, spawner) = manual_map(Duration::from_secs(1));
        map.store("a", 1);
        clock.advance(Duration::from_secs(2));

        // Hit on an existing key does not count.
        assert_eq!(map.load_or_store("a", 2), (1, true));
        assert_eq!(spawner.count(), 0);

        assert_eq!(map.load_or_store("b", 3), (3, false));
        assert_eq!(spawner.count(), 1);
        assert_eq!(map.load(&"a"), None);
    }

    #[test]
    fn test_one_writer_per_window() {
        let clock = Arc::new(ManualClock::new());
        let spawner = Arc::new(CountingSpawner::default());
        let map = ExpiringMap::builder(Duration::from_secs(1))
            .clock(clock.clone())
            .spawner(spawner.clone())
            .build()
            .unwrap();

        clock.advance(Duration::from_millis(600));
        for i in 0..10 {
            map.store(i, i);
        }
        assert_eq!(spawner.count(), 1);

        // Window moved to 500ms; the next one opens at 1000ms.
        clock.advance(Duration::from_millis(300));
        map.store(100, 100);
        assert_eq!(spawner.count(), 1);

        clock.advance(Duration::from_millis(100));
        map.store(101, 101);
        assert_eq!(spawner.count(), 2);
        assert_eq!(map.stats().sweeps_scheduled, 2);
    }

    #[test]
    fn test_concurrent_writers_win_once() {
        let clock = Arc::new(ManualClock::new());
        let spawner = Arc::new(CountingSpawner::default());
        let map = ExpiringMap::builder(Duration::from_secs(1))
            .clock(clock.clone())
            .spawner(spawner.clone())
            .build()
            .unwrap();
        clock.advance(Duration::from_millis(700));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = map.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        map.store(t * 1000 + i, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(spawner.count(), 1);
    }

    #[test]
    fn test_clean_now_removes_only_expired() {
        let (map, clock, _) = manual_map(Duration::from_secs(10));
        map.store("old", 1);
        clock.advance(Duration::from_secs(6));
        map.store("new", 2);
        clock.advance(Duration::from_secs(5));

        assert_eq!(map.clean_now(), 1);
        assert_eq!(map.load(&"old"), None);
        assert_eq!(map.load(&"new"), Some(2));
    }

    #[test]
    fn test_entry_at_exact_ttl_is_kept() {
        let (map, clock, _) = manual_map(Duration::from_secs(1));
        map.store("edge", 1);
        clock.advance(Duration::from_secs(1));
        assert_eq!(map.clean_now(), 0);

        clock.advance(Duration::from_nanos(1));
        assert_eq!(map.clean_now(), 1);
    }

    #[test]
    fn test_store_and_expire_with_callback() {
        let clock = Arc::new(ManualClock::new());
        let expired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&expired);
        let map = ExpiringMap::builder(Duration::from_millis(1))
            .clock(clock.clone())
            .spawner(Arc::new(InlineSpawner))
            .on_expire(move |k: i32, v: i32| sink.lock().unwrap().push((k, v)))
            .build()
            .unwrap();

        for i in 0..5 {
            map.store(i, i + 100);
        }
        for i in 0..5 {
            assert_eq!(map.load(&i), Some(i + 100));
        }
        assert!(expired.lock().unwrap().is_empty());

        clock.advance(Duration::from_millis(100));
        map.store(-1, 123);

        let mut pairs = expired.lock().unwrap().clone();
        pairs.sort_unstable();
        assert_eq!(pairs, (0..5).map(|i| (i, i + 100)).collect::<Vec<_>>());

        let mut remaining = 0;
        map.range(|_, _| {
            remaining += 1;
            true
        });
        assert_eq!(remaining, 1, "only the last write should remain");

        expired.lock().unwrap().clear();
        clock.advance(Duration::from_millis(100));
        map.store(-2, 456);
        assert_eq!(expired.lock().unwrap().as_slice(), &[(-1, 123)]);
    }

    #[test]
    fn test_callback_not_called_on_delete() {
        let clock = Arc::new(ManualClock::new());
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let map = ExpiringMap::builder(Duration::from_secs(1))
            .clock(clock.clone())
            .on_expire(move |_: u32, _: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        map.store(1, 1);
        map.store(2, 2);
        map.delete(&1);
        map.delete(&3);
        assert_eq!(map.load_and_delete(&2), Some(2));

        clock.advance(Duration::from_secs(5));
        assert_eq!(map.clean_now(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let clock = Arc::new(ManualClock::new());
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let map = ExpiringMap::builder(Duration::from_secs(1))
            .clock(clock.clone())
            .spawner(Arc::new(InlineSpawner))
            .on_expire(move |k: u32, _: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                if k == 2 {
                    panic!("callback failure for key {}", k);
                }
            })
            .build()
            .unwrap();

        for i in 0..5 {
            map.store(i, i);
        }
        clock.advance(Duration::from_secs(2));

        assert_eq!(map.clean_now(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(map.is_empty());

        let stats = map.stats();
        assert_eq!(stats.callback_panics, 1);
        assert_eq!(stats.expired, 5);

        // The sweep flag was released.
        map.store(10, 10);
        clock.advance(Duration::from_secs(2));
        assert_eq!(map.clean_now(), 1);
    }

    #[test]
    fn test_concurrent_sweep_returns_immediately() {
        let clock = Arc::new(ManualClock::new());
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let (cb_entered, cb_release) = (Arc::clone(&entered), Arc::clone(&release));
        let map = ExpiringMap::builder(Duration::from_secs(1))
            .clock(clock.clone())
            .spawner(Arc::new(CountingSpawner::default()))
            .on_expire(move |_: u32, _: u32| {
                cb_entered.wait();
                cb_release.wait();
            })
            .build()
            .unwrap();

        map.store(1, 1);
        clock.advance(Duration::from_secs(2));

        let sweeper = {
            let map = map.clone();
            thread::spawn(move || map.clean_now())
        };

        // The first sweep is now parked inside the callback.
        entered.wait();
        map.store(2, 2);
        assert_eq!(map.clean_now(), 0);
        assert_eq!(map.stats().sweeps_skipped, 1);
        release.wait();

        assert_eq!(sweeper.join().unwrap(), 1);
        assert_eq!(map.load(&2), Some(2));
    }

    #[test]
    fn test_concurrent_cleanup() {
        let map = ExpiringMap::new(Duration::from_millis(10)).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = map.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        map.store(t * 1000 + i, i);
                        map.clean_now();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        thread::sleep(Duration::from_millis(20));
        // A scheduled sweep may still hold the flag; retry until one runs.
        for _ in 0..100 {
            if map.is_empty() {
                break;
            }
            map.clean_now();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(map.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let map = ExpiringMap::new(Duration::from_secs(60)).unwrap();
        let handles: Vec<_> = (0..10)
            .map(|t| {
                let map = map.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("key_{}_{}", t, i);
                        map.store(key.clone(), i);
                        assert_eq!(map.load(&key), Some(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 1000);
        assert_eq!(map.stats().stores, 1000);
    }

    #[test]
    fn test_stats() {
        let (map, clock, _) = manual_map(Duration::from_secs(1));
        map.store(1, 1);
        map.store(2, 2);
        map.load_or_store(2, 3);
        clock.advance(Duration::from_secs(2));
        map.clean_now();

        let stats = map.stats();
        assert_eq!(stats.stores, 2);
        assert_eq!(stats.sweeps, 1);
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.sweeps_skipped, 0);
    }
}
