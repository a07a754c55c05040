//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the key store for chronokv: a sharded map from key
//! to [`Entry`], where every entry carries an optional absolute expiry.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys are spread over 64
//!    shards, each behind its own `RwLock`.
//! 2. **Lazy Expiry**: Every operation normalizes the key first. An expired
//!    entry is removed before the read or write proceeds, so callers never
//!    see it, even if the background sweeper has not visited it yet.
//! 3. **One Critical Section per Command**: The liveness check and the
//!    follow-up read or mutation happen under the same shard lock, with the
//!    same `now`.
//! 4. **Injected Clock**: All time comes from a [`Clock`], so tests can cross
//!    expiry boundaries deterministically.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲ blocking lock (commands)       ▲ try_write (sweeper)
//! ```
//!
//! Foreground commands take bounded, blocking shard locks. The expiry sweeper
//! only ever uses `try_write`, so it backs off instead of queueing behind
//! client traffic.

use crate::storage::clock::{Clock, SystemClock};
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// Absolute expiry in Unix milliseconds (None = never expires)
    pub expires_at: Option<u64>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry that expires at `expires_at` (Unix ms).
    pub fn expiring_at(value: Bytes, expires_at: u64) -> Self {
        Self {
            value,
            expires_at: Some(expires_at),
        }
    }

    /// Checks if this entry has expired at `now_ms`.
    ///
    /// An entry whose expiry equals `now_ms` is already expired.
    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }

    /// Returns true if the entry has an expiry at all.
    #[inline]
    pub fn is_volatile(&self) -> bool {
        self.expires_at.is_some()
    }

    /// Remaining lifetime of a live entry as seen at `now_ms`.
    pub fn ttl_state(&self, now_ms: u64) -> TtlState {
        match self.expires_at {
            None => TtlState::Persistent,
            Some(at) => TtlState::Remaining(at.saturating_sub(now_ms)),
        }
    }
}

/// What TTL and PTTL report for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    /// The key does not exist (or has expired).
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after this many milliseconds.
    Remaining(u64),
}

impl TtlState {
    /// PTTL encoding: whole milliseconds, `-1` or `-2`.
    pub fn as_millis(self) -> i64 {
        match self {
            TtlState::Missing => -2,
            TtlState::Persistent => -1,
            TtlState::Remaining(ms) => ms.min(i64::MAX as u64) as i64,
        }
    }

    /// TTL encoding: seconds rounded up, `-1` or `-2`.
    ///
    /// Rounding up keeps a freshly set `EX n` key at `n` rather than `n - 1`,
    /// and since the remaining milliseconds never exceed `n * 1000` the result
    /// never exceeds `n` either.
    pub fn as_secs(self) -> i64 {
        match self {
            TtlState::Missing => -2,
            TtlState::Persistent => -1,
            TtlState::Remaining(ms) => ms.div_ceil(1000).min(i64::MAX as u64) as i64,
        }
    }
}

/// How a write changes a key's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryUpdate {
    /// Remove any expiry.
    Persist,
    /// Leave the current expiry untouched.
    Keep,
    /// Expire this long after the moment the write is applied.
    After(Duration),
    /// Expire at this absolute instant (Unix ms).
    At(u64),
}

impl ExpiryUpdate {
    /// Resolves to the new absolute expiry given `now` and the current one.
    fn resolve(self, now_ms: u64, current: Option<u64>) -> Option<u64> {
        match self {
            ExpiryUpdate::Persist => None,
            ExpiryUpdate::Keep => current,
            ExpiryUpdate::After(ttl) => Some(now_ms.saturating_add(ttl.as_millis() as u64)),
            ExpiryUpdate::At(at) => Some(at),
        }
    }
}

/// Existence condition for a SET.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    #[default]
    Always,
    /// NX: only write if the key does not exist
    IfAbsent,
    /// XX: only write if the key already exists
    IfPresent,
}

/// Options for [`StorageEngine::set_with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    pub condition: SetCondition,
    pub expiry: ExpiryUpdate,
    /// Return the value the key held before the write
    pub return_previous: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            condition: SetCondition::Always,
            expiry: ExpiryUpdate::Persist,
            return_previous: false,
        }
    }
}

/// Result of [`StorageEngine::set_with_options`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// False when an NX/XX condition prevented the write
    pub written: bool,
    /// The previous live value, if `return_previous` was requested
    pub previous: Option<Bytes>,
}

/// Result of sampling one shard for expired keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSample {
    /// Number of volatile keys examined
    pub sampled: usize,
    /// Number of those that were expired and removed
    pub expired: usize,
}

/// Errors surfaced by the storage engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The shard is locked by a foreground operation; try again later.
    #[error("shard {shard} is busy")]
    ShardBusy { shard: usize },
}

type ShardMap = HashMap<Bytes, Entry>;

/// A single shard containing a portion of the key-value pairs.
///
/// Poisoned guards are recovered; no operation leaves the map half-updated.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<ShardMap>,
}

impl Shard {
    fn read(&self) -> RwLockReadGuard<'_, ShardMap> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShardMap> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_write(&self) -> Option<RwLockWriteGuard<'_, ShardMap>> {
        match self.data.try_write() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// The key store.
///
/// Wrap it in an `Arc` and share it between connection tasks and the expiry
/// sweeper. All operations are thread-safe and each single-key operation is
/// atomic with respect to other operations on the same key.
///
/// # Example
///
/// ```
/// use chronokv::storage::{StorageEngine, TtlState};
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
/// let key = Bytes::from("session");
///
/// engine.set(key.clone(), Bytes::from("abc123"));
/// assert_eq!(engine.ttl(&key), TtlState::Persistent);
///
/// engine.set_with_ttl(key.clone(), Bytes::from("abc123"), Duration::from_secs(60));
/// assert!(engine.ttl(&key).as_secs() <= 60);
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,

    clock: Arc<dyn Clock>,

    /// Number of keys currently stored (approximate; includes expired keys
    /// not yet reclaimed)
    key_count: AtomicU64,

    /// Keys removed on access after expiring
    lazy_expired: AtomicU64,

    /// Keys removed by the background sweeper
    active_expired: AtomicU64,

    /// Completed sweeper cycles
    sweep_cycles: AtomicU64,

    /// Next shard the sweeper visits
    sweep_cursor: AtomicUsize,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("clock", &self.clock)
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new storage engine driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Creates a new storage engine driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            clock,
            key_count: AtomicU64::new(0),
            lazy_expired: AtomicU64::new(0),
            active_expired: AtomicU64::new(0),
            sweep_cycles: AtomicU64::new(0),
            sweep_cursor: AtomicUsize::new(0),
        }
    }

    /// Current time according to the engine's clock (Unix ms).
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Lazy reclaimer: drops `key` from a locked shard if it expired by `now_ms`.
    ///
    /// Returns true if an expired entry was removed.
    fn reclaim_expired(&self, data: &mut ShardMap, key: &Bytes, now_ms: u64) -> bool {
        if !data.get(key).is_some_and(|e| e.is_expired(now_ms)) {
            return false;
        }

        data.remove(key);
        self.key_count.fetch_sub(1, Ordering::Relaxed);
        self.lazy_expired.fetch_add(1, Ordering::Relaxed);
        trace!(key = ?key, "Lazily expired key");
        true
    }

    /// Removes a live key from a locked shard.
    fn remove_locked(&self, data: &mut ShardMap, key: &Bytes) -> bool {
        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Runs `f` on the live entry for `key`, if any.
    ///
    /// Takes a read lock on the fast path. If the entry turns out to be
    /// expired, the shard is re-locked for writing and the entry reclaimed.
    /// `now` is read after each lock is taken, never before.
    fn read_live<R>(&self, key: &Bytes, f: impl FnOnce(&Entry, u64) -> R) -> Option<R> {
        let shard = self.get_shard(key);

        {
            let data = shard.read();
            let now = self.clock.now_ms();
            match data.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(f(entry, now)),
                Some(_) => {}
            }
        }

        // Expired under the read lock. A writer may have replaced it since,
        // so reclaim_expired re-checks and a fresh entry is read normally.
        let mut data = shard.write();
        let now = self.clock.now_ms();
        if self.reclaim_expired(&mut data, key, now) {
            return None;
        }
        data.get(key).map(|entry| f(entry, now))
    }

    /// Sets a key-value pair without expiry, clearing any previous TTL.
    ///
    /// Returns `true` if a new key was created.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.store(key, value, ExpiryUpdate::Persist)
    }

    /// Sets a key-value pair that expires after `ttl`.
    ///
    /// Returns `true` if a new key was created.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> bool {
        self.store(key, value, ExpiryUpdate::After(ttl))
    }

    fn store(&self, key: Bytes, value: Bytes, expiry: ExpiryUpdate) -> bool {
        let options = SetOptions {
            expiry,
            ..SetOptions::default()
        };
        self.apply_set(key, value, options).1
    }

    /// SET with NX/XX, GET and expiry options, applied atomically.
    ///
    /// An absolute expiry that has already passed still counts as a write:
    /// the value lands and is reclaimed in the same critical section.
    pub fn set_with_options(&self, key: Bytes, value: Bytes, options: SetOptions) -> SetOutcome {
        self.apply_set(key, value, options).0
    }

    /// Returns the outcome and whether a new key was created.
    fn apply_set(&self, key: Bytes, value: Bytes, options: SetOptions) -> (SetOutcome, bool) {
        let shard = self.get_shard(&key);
        let mut data = shard.write();
        let now = self.clock.now_ms();

        self.reclaim_expired(&mut data, &key, now);

        let (exists, current_expiry, previous) = match data.get(&key) {
            Some(entry) => (
                true,
                entry.expires_at,
                options.return_previous.then(|| entry.value.clone()),
            ),
            None => (false, None, None),
        };

        let allowed = match options.condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => !exists,
            SetCondition::IfPresent => exists,
        };
        if !allowed {
            let outcome = SetOutcome {
                written: false,
                previous,
            };
            return (outcome, false);
        }

        let expires_at = options.expiry.resolve(now, current_expiry);
        if expires_at.is_some_and(|at| at <= now) {
            self.remove_locked(&mut data, &key);
            let outcome = SetOutcome {
                written: true,
                previous,
            };
            return (outcome, false);
        }

        let created = data.insert(key, Entry { value, expires_at }).is_none();
        if created {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        let outcome = SetOutcome {
            written: true,
            previous,
        };
        (outcome, created)
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        self.read_live(key, |entry, _| entry.value.clone())
    }

    /// GETEX: returns the value and applies `update` to its expiry in the
    /// same critical section.
    ///
    /// `ExpiryUpdate::Keep` is a pure read. If the update resolves to an
    /// instant that has already passed, the value is returned and the key
    /// removed.
    pub fn get_ex(&self, key: &Bytes, update: ExpiryUpdate) -> Option<Bytes> {
        if update == ExpiryUpdate::Keep {
            return self.get(key);
        }

        let shard = self.get_shard(key);
        let mut data = shard.write();
        let now = self.clock.now_ms();

        self.reclaim_expired(&mut data, key, now);

        let (value, expires_at) = {
            let entry = data.get_mut(key)?;
            let expires_at = update.resolve(now, entry.expires_at);
            entry.expires_at = expires_at;
            (entry.value.clone(), expires_at)
        };

        if expires_at.is_some_and(|at| at <= now) {
            self.remove_locked(&mut data, key);
        }

        Some(value)
    }

    /// Remaining lifetime of `key` (TTL / PTTL).
    pub fn ttl(&self, key: &Bytes) -> TtlState {
        self.read_live(key, |entry, now| entry.ttl_state(now))
            .unwrap_or(TtlState::Missing)
    }

    /// Absolute expiry of `key` (EXPIRETIME / PEXPIRETIME).
    ///
    /// - `None` if the key doesn't exist
    /// - `Some(None)` if the key exists but has no expiry
    /// - `Some(Some(ms))` otherwise
    pub fn expire_time(&self, key: &Bytes) -> Option<Option<u64>> {
        self.read_live(key, |entry, _| entry.expires_at)
    }

    /// Applies `update` to an existing key's expiry.
    ///
    /// Returns `true` if the key existed. An instant that has already
    /// passed deletes the key.
    pub fn update_expiry(&self, key: &Bytes, update: ExpiryUpdate) -> bool {
        self.get_ex(key, update).is_some()
    }

    /// Sets the expiry of an existing key to `ttl` from now.
    pub fn expire(&self, key: &Bytes, ttl: Duration) -> bool {
        self.update_expiry(key, ExpiryUpdate::After(ttl))
    }

    /// Removes the expiry from a key (makes it persistent).
    ///
    /// Returns `true` only if a TTL was actually removed.
    pub fn persist(&self, key: &Bytes) -> bool {
        let shard = self.get_shard(key);
        let mut data = shard.write();
        let now = self.clock.now_ms();

        self.reclaim_expired(&mut data, key, now);

        data.get_mut(key)
            .and_then(|entry| entry.expires_at.take())
            .is_some()
    }

    /// Deletes a key from the database.
    ///
    /// Returns `true` if a live key was deleted. An expired key that had not
    /// been reclaimed yet counts as already gone.
    pub fn delete(&self, key: &Bytes) -> bool {
        let shard = self.get_shard(key);
        let mut data = shard.write();
        let now = self.clock.now_ms();

        if self.reclaim_expired(&mut data, key, now) {
            return false;
        }
        self.remove_locked(&mut data, key)
    }

    /// Deletes multiple keys, returning how many were removed.
    pub fn delete_many(&self, keys: &[Bytes]) -> u64 {
        keys.iter().filter(|k| self.delete(k)).count() as u64
    }

    /// Checks if a key exists (and is not expired).
    pub fn exists(&self, key: &Bytes) -> bool {
        self.read_live(key, |_, _| ()).is_some()
    }

    /// Counts how many of the given keys exist.
    pub fn exists_many(&self, keys: &[Bytes]) -> u64 {
        keys.iter().filter(|k| self.exists(k)).count() as u64
    }

    /// Returns the approximate number of keys in the database.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            lazy_expired: self.lazy_expired.load(Ordering::Relaxed),
            active_expired: self.active_expired.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
        }
    }

    /// Counts one finished sweeper cycle.
    pub(crate) fn record_sweep_cycle(&self) {
        self.sweep_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Samples the next shard in round-robin order. See [`Self::sweep_shard`].
    pub fn sweep_next_shard(&self, sample_size: usize) -> Result<SweepSample, StorageError> {
        let index = self.sweep_cursor.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        self.sweep_shard(index, sample_size)
    }

    /// Active expiry for one shard.
    ///
    /// Picks up to `sample_size` random keys that carry an expiry and removes
    /// the ones that have expired. Never blocks: if the shard is locked, returns
    /// [`StorageError::ShardBusy`].
    pub fn sweep_shard(&self, index: usize, sample_size: usize) -> Result<SweepSample, StorageError> {
        let index = index % self.shards.len();
        let mut data = self.shards[index]
            .try_write()
            .ok_or(StorageError::ShardBusy { shard: index })?;

        let now = self.clock.now_ms();
        let candidates: Vec<Bytes> = data
            .iter()
            .filter(|(_, entry)| entry.is_volatile())
            .map(|(key, _)| key)
            .choose_multiple(&mut rand::thread_rng(), sample_size)
            .into_iter()
            .cloned()
            .collect();

        let mut expired = 0;
        for key in &candidates {
            if data.get(key).is_some_and(|e| e.is_expired(now)) {
                data.remove(key);
                expired += 1;
            }
        }

        if expired > 0 {
            self.key_count.fetch_sub(expired as u64, Ordering::Relaxed);
            self.active_expired
                .fetch_add(expired as u64, Ordering::Relaxed);
        }

        Ok(SweepSample {
            sampled: candidates.len(),
            expired,
        })
    }
}

/// Database statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Expired keys reclaimed on access
    pub lazy_expired: u64,
    /// Expired keys reclaimed by the sweeper
    pub active_expired: u64,
    /// Sweeper cycles run so far
    pub sweep_cycles: u64,
}
