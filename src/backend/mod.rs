//! Backends and the Store Handle
//!
//! A [`Backend`] is one concrete implementation of the store's operation
//! set: the networked primary or the embedded [`StorageEngine`].
//!
//! A [`StoreHandle`] is the indirection every caller holds. All clones of a
//! handle share one cell; the supervisor swaps the backend inside that cell,
//! and every clone (including ones handed out before the swap) sees the
//! new backend on its next call.
//!
//! ```text
//!   caller ──┐
//!   caller ──┼──> StoreHandle ──> RwLock<Slot> ──> Arc<Backend>
//!   caller ──┘    (Arc clone)     state + backend    ├── Primary(RemoteBackend)
//!                                                    └── Embedded(StorageEngine)
//! ```
//!
//! A call resolves the backend once, under the read lock, and releases the
//! lock before running. A call therefore runs entirely against either the
//! old or the new backend, never a mix.

pub mod remote;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::{StoreError, StoreResult};
use crate::storage::{RankOrder, ScanCursor, ScanPage, StorageEngine, TtlStatus};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub use remote::{RemoteAddress, RemoteBackend, RemoteConfig};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};

/// Lifecycle of the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing attempted yet.
    Disconnected,
    /// Trying the primary; `attempt` is 1-based.
    Connecting { attempt: u32 },
    /// Serving from the primary.
    Connected,
    /// Serving from the embedded engine.
    Degraded,
    /// No backend could be initialized.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting { attempt } => write!(f, "connecting (attempt {})", attempt),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded => write!(f, "degraded"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// A concrete store implementation.
#[derive(Debug)]
pub enum Backend {
    Primary(RemoteBackend),
    Embedded(Arc<StorageEngine>),
}

#[derive(Debug)]
struct Slot {
    state: ConnectionState,
    backend: Option<Arc<Backend>>,
}

/// Shared, swappable reference to the active backend.
///
/// Cheap to clone. Operations made before any backend is installed, or after
/// the supervisor gave up, fail with `BackendUnavailable`.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    slot: Arc<RwLock<Slot>>,
}

impl StoreHandle {
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(RwLock::new(Slot {
                state: ConnectionState::Disconnected,
                backend: None,
            })),
        }
    }

    /// A handle permanently bound to an embedded engine.
    pub fn from_engine(engine: Arc<StorageEngine>) -> Self {
        let handle = Self::new();
        handle.install(Backend::Embedded(engine), ConnectionState::Degraded);
        handle
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).state
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.slot.write().unwrap_or_else(PoisonError::into_inner).state = state;
    }

    /// Swaps in `backend` and `state` together.
    pub(crate) fn install(&self, backend: Backend, state: ConnectionState) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.backend = Some(Arc::new(backend));
        slot.state = state;
    }

    /// Drops any backend and enters `Failed`.
    pub(crate) fn fail(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.backend = None;
        slot.state = ConnectionState::Failed;
    }

    fn backend(&self) -> StoreResult<Arc<Backend>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        match (&slot.backend, slot.state) {
            (Some(backend), _) => Ok(Arc::clone(backend)),
            (None, ConnectionState::Failed) => Err(StoreError::BackendUnavailable(
                "no backend could be initialized".to_string(),
            )),
            (None, state) => Err(StoreError::BackendUnavailable(format!(
                "store not ready ({})",
                state
            ))),
        }
    }

    /// The embedded engine, if that is what the handle currently serves from.
    pub fn embedded_engine(&self) -> Option<Arc<StorageEngine>> {
        match self.backend().ok()?.as_ref() {
            Backend::Embedded(engine) => Some(Arc::clone(engine)),
            Backend::Primary(_) => None,
        }
    }

    pub async fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.get(key).await,
            Backend::Embedded(engine) => engine.get(key),
        }
    }

    pub async fn set(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let (key, value) = (key.into(), value.into());
        match &*self.backend()? {
            Backend::Primary(remote) => remote.set(key, value, ttl).await,
            Backend::Embedded(engine) => engine.set(key, value, ttl),
        }
    }

    /// Returns `true` if a key was removed.
    pub async fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.delete(key).await,
            Backend::Embedded(engine) => Ok(engine.delete(key)),
        }
    }

    pub async fn exists(&self, key: &[u8]) -> StoreResult<bool> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.exists(key).await,
            Backend::Embedded(engine) => Ok(engine.exists(key)),
        }
    }

    pub async fn expire(&self, key: &[u8], ttl: Duration) -> StoreResult<bool> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.expire(key, ttl).await,
            Backend::Embedded(engine) => engine.expire(key, ttl),
        }
    }

    pub async fn persist(&self, key: &[u8]) -> StoreResult<bool> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.persist(key).await,
            Backend::Embedded(engine) => Ok(engine.persist(key)),
        }
    }

    pub async fn ttl(&self, key: &[u8]) -> StoreResult<TtlStatus> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.ttl(key).await,
            Backend::Embedded(engine) => Ok(engine.ttl(key)),
        }
    }

    pub async fn hash_set<I, F, V>(&self, key: impl Into<Bytes>, fields: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<Bytes>,
        V: Into<Bytes>,
    {
        let key = key.into();
        let fields: Vec<(Bytes, Bytes)> = fields
            .into_iter()
            .map(|(field, value)| (field.into(), value.into()))
            .collect();
        match &*self.backend()? {
            Backend::Primary(remote) => remote.hash_set(key, fields).await,
            Backend::Embedded(engine) => engine.hash_set(key, fields),
        }
    }

    pub async fn hash_get_all(&self, key: &[u8]) -> StoreResult<HashMap<Bytes, Bytes>> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.hash_get_all(key).await,
            Backend::Embedded(engine) => engine.hash_get_all(key),
        }
    }

    pub async fn ranked_upsert(
        &self,
        key: impl Into<Bytes>,
        member: impl Into<Bytes>,
        score: f64,
    ) -> StoreResult<bool> {
        let (key, member) = (key.into(), member.into());
        match &*self.backend()? {
            Backend::Primary(remote) => remote.ranked_upsert(key, member, score).await,
            Backend::Embedded(engine) => engine.ranked_upsert(key, member, score),
        }
    }

    pub async fn ranked_remove(&self, key: &[u8], member: &[u8]) -> StoreResult<bool> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.ranked_remove(key, member).await,
            Backend::Embedded(engine) => engine.ranked_remove(key, member),
        }
    }

    pub async fn ranked_range(
        &self,
        key: &[u8],
        start: i64,
        end: i64,
        order: RankOrder,
    ) -> StoreResult<Vec<(Bytes, f64)>> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.ranked_range(key, start, end, order).await,
            Backend::Embedded(engine) => engine.ranked_range(key, start, end, order),
        }
    }

    pub async fn rank_of(&self, key: &[u8], member: &[u8], order: RankOrder) -> StoreResult<Option<usize>> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.rank_of(key, member, order).await,
            Backend::Embedded(engine) => engine.rank_of(key, member, order),
        }
    }

    pub async fn score_of(&self, key: &[u8], member: &[u8]) -> StoreResult<Option<f64>> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.score_of(key, member).await,
            Backend::Embedded(engine) => engine.score_of(key, member),
        }
    }

    pub async fn cardinality(&self, key: &[u8]) -> StoreResult<usize> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.cardinality(key).await,
            Backend::Embedded(engine) => engine.cardinality(key),
        }
    }

    /// One page of an incremental scan; see [`StorageEngine::scan_keys`].
    ///
    /// A cursor is only valid against the backend that issued it.
    pub async fn scan_keys(&self, pattern: &str, cursor: &ScanCursor) -> StoreResult<ScanPage> {
        match &*self.backend()? {
            Backend::Primary(remote) => remote.scan_keys(pattern, cursor).await,
            Backend::Embedded(engine) => engine.scan_keys(pattern, cursor),
        }
    }

    /// Collects every key matching `pattern` by paging through a scan.
    pub async fn scan_all(&self, pattern: &str) -> StoreResult<Vec<Bytes>> {
        let mut cursor = ScanCursor::start();
        let mut keys = Vec::new();
        loop {
            let page = self.scan_keys(pattern, &cursor).await?;
            keys.extend(page.keys);
            if page.cursor.is_done() {
                return Ok(keys);
            }
            cursor = page.cursor;
        }
    }
}
