//! Session store: one hash per session with a rolling TTL.

use crate::backend::StoreHandle;
use crate::error::StoreResult;
use crate::storage::ScanCursor;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Key prefix shared by every session hash.
pub const SESSION_PREFIX: &str = "session:";

/// Session id: 16 random bytes, hex encoded.
///
/// Drawn from `fastrand`, which is not a cryptographic generator.
pub fn new_session_id() -> String {
    let mut id = String::with_capacity(32);
    for _ in 0..16 {
        let _ = write!(id, "{:02x}", fastrand::u8(..));
    }
    id
}

fn session_key(id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, id)
}

fn unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
        .to_string()
}

fn to_strings(map: HashMap<Bytes, Bytes>) -> HashMap<String, String> {
    map.into_iter()
        .map(|(field, value)| {
            (
                String::from_utf8_lossy(&field).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            )
        })
        .collect()
}

/// Sessions kept as hashes under `session:<id>`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    store: StoreHandle,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: StoreHandle, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Creates a session for `user_id` carrying `data`, and returns its id.
    ///
    /// The hash always holds `id`, `userId`, `createdAt` and `lastAccess`
    /// (Unix milliseconds); `data` may override none of them.
    pub async fn create(&self, user_id: &str, data: HashMap<String, String>) -> StoreResult<String> {
        let id = new_session_id();
        let key = session_key(&id);
        let now = unix_millis();

        let mut fields = data;
        fields.insert("id".to_string(), id.clone());
        fields.insert("userId".to_string(), user_id.to_string());
        fields.insert("createdAt".to_string(), now.clone());
        fields.insert("lastAccess".to_string(), now);

        self.store.hash_set(key.clone(), fields).await?;
        if let Err(e) = self.store.expire(key.as_bytes(), self.ttl).await {
            // A session without a TTL would never be reclaimed.
            if let Err(cleanup) = self.store.delete(key.as_bytes()).await {
                warn!(session = %id, error = %cleanup, "Could not remove session without TTL");
            }
            return Err(e);
        }

        debug!(session = %id, user = user_id, "Session created");
        Ok(id)
    }

    /// Returns the session's fields and renews its TTL, or `None` if the
    /// session does not exist or has expired.
    pub async fn get(&self, id: &str) -> StoreResult<Option<HashMap<String, String>>> {
        let key = session_key(id);

        let fields = self.store.hash_get_all(key.as_bytes()).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        if !self.store.expire(key.as_bytes(), self.ttl).await? {
            // Expired between the read and the renewal.
            return Ok(None);
        }
        Ok(Some(to_strings(fields)))
    }

    /// Ends a session. Returns `true` if it existed.
    pub async fn destroy(&self, id: &str) -> StoreResult<bool> {
        self.store.delete(session_key(id).as_bytes()).await
    }

    /// Counts live sessions with an incremental scan.
    pub async fn count_active(&self) -> StoreResult<usize> {
        let pattern = format!("{}*", SESSION_PREFIX);
        let mut cursor = ScanCursor::start();
        let mut count = 0;

        loop {
            let page = self.store.scan_keys(&pattern, &cursor).await?;
            count += page.keys.len();
            if page.cursor.is_done() {
                return Ok(count);
            }
            cursor = page.cursor;
        }
    }
}
