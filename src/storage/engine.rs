//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the embedded store: one key space holding three
//! kinds of values (strings, hashes, sorted sets), with TTLs that apply to
//! any kind.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Keys are spread over independent shards, so string
//!    and hash operations on different keys rarely contend.
//! 2. **Ordered Shards**: Each shard keeps its keys in a `BTreeMap`, which
//!    lets `scan_keys` resume strictly after the last key it examined.
//! 3. **Lazy Expiry**: Every read consults the shard's `ExpiryIndex` first;
//!    an expired key is purged under the write lock and reported absent.
//! 4. **Per-Set Locks**: A sorted set carries its own `RwLock`. Upserts and
//!    reads on one set lock only that set (under a shared shard lock), so
//!    unrelated keys in the same shard keep flowing.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ BTreeMap│ │ BTreeMap│ │ BTreeMap│ │ BTreeMap│           │
//! │  │ Expiry  │ │ Expiry  │ │ Expiry  │ │ Expiry  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{StoreError, StoreResult};
use crate::storage::expiry::ExpiryIndex;
use crate::storage::pattern::GlobPattern;
use crate::storage::ranked::{RankOrder, RankedSet};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 64;

/// Default number of keys examined per `scan_keys` call.
pub const DEFAULT_SCAN_BATCH: usize = 100;

/// Sizing for a `StorageEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of independently locked shards
    pub shards: usize,
    /// Keys examined (not returned) per `scan_keys` call
    pub scan_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
            scan_batch: DEFAULT_SCAN_BATCH,
        }
    }
}

/// The kind of value held by a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Hash,
    SortedSet,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Hash => "hash",
            ValueKind::SortedSet => "zset",
        }
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// Key does not exist or is already expired.
    Missing,
    /// Key exists but has no expiration set.
    NoExpiry,
    /// Key expires after the given duration.
    ExpiresIn(Duration),
}

/// Position of an incremental key scan.
///
/// Obtain the first one with [`ScanCursor::start`] and feed back the cursor
/// of each page until [`ScanCursor::is_done`] returns true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(CursorPos);

#[derive(Debug, Clone, PartialEq, Eq)]
enum CursorPos {
    Start,
    Embedded { shard: usize, after: Option<Bytes> },
    Remote(u64),
    Done,
}

impl ScanCursor {
    pub fn start() -> Self {
        ScanCursor(CursorPos::Start)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.0, CursorPos::Done)
    }

    pub(crate) fn done() -> Self {
        ScanCursor(CursorPos::Done)
    }

    /// Wraps a cursor returned by a networked store; `0` means finished.
    pub(crate) fn from_remote(cursor: u64) -> Self {
        if cursor == 0 {
            Self::done()
        } else {
            ScanCursor(CursorPos::Remote(cursor))
        }
    }

    /// The cursor to send to a networked store.
    pub(crate) fn to_remote(&self) -> StoreResult<u64> {
        match self.0 {
            CursorPos::Start => Ok(0),
            CursorPos::Remote(cursor) => Ok(cursor),
            _ => Err(StoreError::invalid(
                "scan cursor was issued by a different backend",
            )),
        }
    }
}

/// One page of a key scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<Bytes>,
    pub cursor: ScanCursor,
}

#[derive(Debug)]
enum Value {
    Str(Bytes),
    Hash(HashMap<Bytes, Bytes>),
    Ranked(RwLock<RankedSet>),
}

impl Value {
    fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::String,
            Value::Hash(_) => ValueKind::Hash,
            Value::Ranked(_) => ValueKind::SortedSet,
        }
    }
}

#[derive(Debug, Default)]
struct ShardState {
    entries: BTreeMap<Bytes, Value>,
    expiry: ExpiryIndex,
}

/// A single shard containing a portion of the key space.
#[derive(Debug, Default)]
struct Shard {
    state: RwLock<ShardState>,
}

impl Shard {
    fn read(&self) -> RwLockReadGuard<'_, ShardState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShardState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_set(lock: &RwLock<RankedSet>) -> RwLockReadGuard<'_, RankedSet> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_set(lock: &RwLock<RankedSet>) -> RwLockWriteGuard<'_, RankedSet> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn check_score(score: f64) -> StoreResult<()> {
    if score.is_nan() {
        return Err(StoreError::invalid("score is not a number"));
    }
    Ok(())
}

fn check_ttl(ttl: Duration) -> StoreResult<()> {
    if ttl.is_zero() {
        return Err(StoreError::invalid("ttl must be positive"));
    }
    Ok(())
}

/// The embedded storage engine.
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// every caller. All operations are synchronous and thread-safe.
///
/// # Example
///
/// ```
/// use standbykv::storage::{RankOrder, StorageEngine};
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"), None).unwrap();
/// assert_eq!(engine.get(b"name").unwrap(), Some(Bytes::from("Ariz")));
///
/// engine.set(Bytes::from("session"), Bytes::from("abc123"), Some(Duration::from_secs(60))).unwrap();
///
/// engine.ranked_upsert(Bytes::from("board"), Bytes::from("alice"), 90.0).unwrap();
/// assert_eq!(engine.rank_of(b"board", b"alice", RankOrder::Descending).unwrap(), Some(0));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    scan_batch: usize,

    /// Stored entries, including expired ones not yet purged
    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new storage engine with default settings.
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    /// Creates a storage engine with explicit sizing.
    ///
    /// Fails with `InvalidArgument` if either size is zero.
    pub fn with_config(config: EngineConfig) -> StoreResult<Self> {
        if config.shards == 0 {
            return Err(StoreError::invalid("engine needs at least one shard"));
        }
        if config.scan_batch == 0 {
            return Err(StoreError::invalid("scan batch must be positive"));
        }
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        Self {
            shards: (0..config.shards).map(|_| Shard::default()).collect(),
            scan_batch: config.scan_batch,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn note_removed(&self, expired: bool) {
        self.key_count.fetch_sub(1, Ordering::Relaxed);
        if expired {
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes `key` from `state` if its deadline has passed.
    fn purge_if_expired(&self, state: &mut ShardState, key: &[u8], now: Instant) {
        if state.expiry.is_expired(key, now) {
            state.expiry.clear(key);
            if state.entries.remove(key).is_some() {
                self.note_removed(true);
            }
        }
    }

    /// Runs `f` on the live value for `key` under the shard's read lock.
    ///
    /// An expired key is purged first and `f` sees `None`.
    fn with_live<T>(&self, key: &[u8], f: impl FnOnce(Option<&Value>) -> T) -> T {
        let shard = self.shard(key);
        {
            let state = shard.read();
            if !state.expiry.is_expired(key, Instant::now()) {
                return f(state.entries.get(key));
            }
        }

        let mut state = shard.write();
        self.purge_if_expired(&mut state, key, Instant::now());
        f(state.entries.get(key))
    }

    /// Takes the shard's write lock with `key` already purged if expired.
    fn write_live(&self, key: &[u8]) -> RwLockWriteGuard<'_, ShardState> {
        let mut state = self.shard(key).write();
        self.purge_if_expired(&mut state, key, Instant::now());
        state
    }

    // ========================================================================
    // KEY / VALUE OPERATIONS
    // ========================================================================

    /// Sets a string value, replacing whatever `key` held before.
    ///
    /// With `ttl`, the key expires after that duration; without, any
    /// previous expiry is dropped.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> StoreResult<()> {
        if let Some(ttl) = ttl {
            check_ttl(ttl)?;
        }
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut state = self.write_live(&key);
        match ttl {
            Some(ttl) => {
                state.expiry.set_expiry(key.clone(), ttl, Instant::now())?;
            }
            None => {
                state.expiry.clear(&key);
            }
        }
        if state.entries.insert(key, Value::Str(value)).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Gets the string value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        self.with_live(key, |value| match value {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v.clone())),
            Some(_) => Err(StoreError::TypeConflict),
        })
    }

    /// Deletes a key of any kind together with its expiry.
    ///
    /// Returns `true` if a live key was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut state = self.shard(key).write();
        let expired = state.expiry.is_expired(key, Instant::now());
        state.expiry.clear(key);

        if state.entries.remove(key).is_some() {
            self.note_removed(expired);
            !expired
        } else {
            false
        }
    }

    /// Checks if a key exists (and is not expired).
    pub fn exists(&self, key: &[u8]) -> bool {
        self.with_live(key, |value| value.is_some())
    }

    /// Returns the kind of value stored at `key`.
    pub fn kind(&self, key: &[u8]) -> Option<ValueKind> {
        self.with_live(key, |value| value.map(Value::kind))
    }

    /// Sets an expiry on an existing key of any kind.
    ///
    /// Returns `false` if the key doesn't exist.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> StoreResult<bool> {
        check_ttl(ttl)?;

        let mut state = self.write_live(key);
        match state.entries.get_key_value(key) {
            Some((stored, _)) => {
                let stored = stored.clone();
                state.expiry.set_expiry(stored, ttl, Instant::now())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes the expiry from a key.
    ///
    /// Returns `true` if the key existed and had an expiry.
    pub fn persist(&self, key: &[u8]) -> bool {
        let mut state = self.write_live(key);
        state.expiry.clear(key)
    }

    /// Reports the remaining lifetime of a key.
    pub fn ttl(&self, key: &[u8]) -> TtlStatus {
        let shard = self.shard(key);
        {
            let state = shard.read();
            let now = Instant::now();
            if !state.expiry.is_expired(key, now) {
                if !state.entries.contains_key(key) {
                    return TtlStatus::Missing;
                }
                return match state.expiry.deadline(key) {
                    Some(deadline) => TtlStatus::ExpiresIn(deadline.saturating_duration_since(now)),
                    None => TtlStatus::NoExpiry,
                };
            }
        }

        let mut state = shard.write();
        self.purge_if_expired(&mut state, key, Instant::now());
        TtlStatus::Missing
    }

    // ========================================================================
    // HASH OPERATIONS
    // ========================================================================

    /// Merges `fields` into the hash at `key`, creating it if absent.
    ///
    /// Existing fields not named in `fields` are left untouched. Returns the
    /// number of fields that were newly added.
    pub fn hash_set<I>(&self, key: Bytes, fields: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = (Bytes, Bytes)>,
    {
        let fields: Vec<(Bytes, Bytes)> = fields.into_iter().collect();
        if fields.is_empty() {
            return Err(StoreError::invalid("hash_set needs at least one field"));
        }
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut state = self.write_live(&key);
        match state.entries.get_mut(&key) {
            Some(Value::Hash(map)) => {
                let mut added = 0;
                for (field, value) in fields {
                    if map.insert(field, value).is_none() {
                        added += 1;
                    }
                }
                Ok(added)
            }
            Some(_) => Err(StoreError::TypeConflict),
            None => {
                let map: HashMap<Bytes, Bytes> = fields.into_iter().collect();
                let added = map.len();
                state.entries.insert(key, Value::Hash(map));
                self.key_count.fetch_add(1, Ordering::Relaxed);
                Ok(added)
            }
        }
    }

    /// Returns every field of the hash at `key` (empty if absent or expired).
    pub fn hash_get_all(&self, key: &[u8]) -> StoreResult<HashMap<Bytes, Bytes>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        self.with_live(key, |value| match value {
            None => Ok(HashMap::new()),
            Some(Value::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(StoreError::TypeConflict),
        })
    }

    // ========================================================================
    // SORTED SET OPERATIONS
    // ========================================================================

    /// Inserts `member` with `score`, or moves an existing member to `score`.
    ///
    /// Returns `true` if the member is new to the set.
    pub fn ranked_upsert(&self, key: Bytes, member: Bytes, score: f64) -> StoreResult<bool> {
        check_score(score)?;
        self.set_count.fetch_add(1, Ordering::Relaxed);

        // Fast path: the set exists, so only its own lock is taken exclusively.
        {
            let state = self.shard(&key).read();
            if !state.expiry.is_expired(&key, Instant::now()) {
                match state.entries.get(&key) {
                    Some(Value::Ranked(set)) => return Ok(write_set(set).upsert(member, score)),
                    Some(_) => return Err(StoreError::TypeConflict),
                    None => {}
                }
            }
        }

        let mut state = self.write_live(&key);
        match state.entries.get_mut(&key) {
            Some(Value::Ranked(set)) => Ok(set
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .upsert(member, score)),
            Some(_) => Err(StoreError::TypeConflict),
            None => {
                let mut set = RankedSet::new();
                set.upsert(member, score);
                state.entries.insert(key, Value::Ranked(RwLock::new(set)));
                self.key_count.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
        }
    }

    /// Removes `member` from the set at `key`; an emptied set is deleted.
    ///
    /// Returns `true` if the member was present.
    pub fn ranked_remove(&self, key: &[u8], member: &[u8]) -> StoreResult<bool> {
        let mut state = self.write_live(key);
        let (removed, now_empty) = match state.entries.get_mut(key) {
            None => return Ok(false),
            Some(Value::Ranked(set)) => {
                let set = set.get_mut().unwrap_or_else(PoisonError::into_inner);
                (set.remove(member), set.is_empty())
            }
            Some(_) => return Err(StoreError::TypeConflict),
        };

        if now_empty {
            state.entries.remove(key);
            state.expiry.clear(key);
            self.note_removed(false);
        }
        Ok(removed)
    }

    /// Members ranked `start..=end` in `order`, with their scores.
    ///
    /// Negative bounds count from the end; out-of-range bounds clamp. An
    /// absent key yields an empty sequence.
    pub fn ranked_range(
        &self,
        key: &[u8],
        start: i64,
        end: i64,
        order: RankOrder,
    ) -> StoreResult<Vec<(Bytes, f64)>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        self.with_live(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::Ranked(set)) => Ok(read_set(set).range(start, end, order)),
            Some(_) => Err(StoreError::TypeConflict),
        })
    }

    /// 0-based rank of `member` in `order`.
    pub fn rank_of(&self, key: &[u8], member: &[u8], order: RankOrder) -> StoreResult<Option<usize>> {
        self.with_live(key, |value| match value {
            None => Ok(None),
            Some(Value::Ranked(set)) => Ok(read_set(set).rank(member, order)),
            Some(_) => Err(StoreError::TypeConflict),
        })
    }

    pub fn score_of(&self, key: &[u8], member: &[u8]) -> StoreResult<Option<f64>> {
        self.with_live(key, |value| match value {
            None => Ok(None),
            Some(Value::Ranked(set)) => Ok(read_set(set).score(member)),
            Some(_) => Err(StoreError::TypeConflict),
        })
    }

    /// Number of members in the set at `key` (0 if absent).
    pub fn cardinality(&self, key: &[u8]) -> StoreResult<usize> {
        self.with_live(key, |value| match value {
            None => Ok(0),
            Some(Value::Ranked(set)) => Ok(read_set(set).len()),
            Some(_) => Err(StoreError::TypeConflict),
        })
    }

    // ========================================================================
    // ENUMERATION AND EXPIRY
    // ========================================================================

    /// Returns the next page of live keys matching `pattern`.
    ///
    /// Each call examines at most the configured scan batch of keys and
    /// holds one shard's read lock at a time. Every key that stays in the
    /// store for the whole scan is returned exactly once; keys added
    /// mid-scan may or may not appear.
    pub fn scan_keys(&self, pattern: &str, cursor: &ScanCursor) -> StoreResult<ScanPage> {
        let pattern = GlobPattern::parse(pattern)?;

        let (mut shard_index, mut after) = match &cursor.0 {
            CursorPos::Start => (0, None),
            CursorPos::Embedded { shard, after } => (*shard, after.clone()),
            CursorPos::Done => {
                return Ok(ScanPage {
                    keys: Vec::new(),
                    cursor: ScanCursor::done(),
                })
            }
            CursorPos::Remote(_) => {
                return Err(StoreError::invalid(
                    "scan cursor was issued by a different backend",
                ))
            }
        };
        if shard_index >= self.shards.len() {
            return Err(StoreError::invalid("scan cursor is out of range"));
        }

        let mut budget = self.scan_batch;
        let mut keys = Vec::new();
        let now = Instant::now();

        while shard_index < self.shards.len() && budget > 0 {
            let state = self.shards[shard_index].read();
            let lower = match &after {
                Some(last) => Bound::Excluded(&last[..]),
                None => Bound::Unbounded,
            };

            let mut last_seen = None;
            let mut exhausted = true;
            for (key, _) in state.entries.range::<[u8], _>((lower, Bound::Unbounded)) {
                if budget == 0 {
                    exhausted = false;
                    break;
                }
                budget -= 1;
                if !state.expiry.is_expired(key, now) && pattern.matches(key) {
                    keys.push(key.clone());
                }
                last_seen = Some(key.clone());
            }
            drop(state);

            if exhausted {
                shard_index += 1;
                after = None;
            } else {
                after = last_seen;
            }
        }

        let cursor = if shard_index >= self.shards.len() {
            ScanCursor::done()
        } else {
            ScanCursor(CursorPos::Embedded {
                shard: shard_index,
                after,
            })
        };
        Ok(ScanPage { keys, cursor })
    }

    /// Purges up to `batch_per_shard` due keys from each shard.
    ///
    /// Called by the background expiry sweeper. Returns the number of keys
    /// removed.
    pub fn sweep_expired(&self, batch_per_shard: usize) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut state = shard.write();
            let now = Instant::now();
            for key in state.expiry.due(now, batch_per_shard) {
                state.expiry.clear(&key);
                if state.entries.remove(&key).is_some() {
                    cleaned += 1;
                }
            }
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }

    /// Returns the number of stored keys, counting expired keys that have
    /// not been purged yet.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns engine statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total read operations
    pub get_ops: u64,
    /// Total write operations
    pub set_ops: u64,
    /// Total delete operations
    pub del_ops: u64,
    /// Total expired keys cleaned up
    pub expired: u64,
}
