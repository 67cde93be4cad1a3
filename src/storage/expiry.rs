//! Expiry Index and Background Expiry Sweeper
//!
//! Expiry bookkeeping is kept apart from value storage so that strings,
//! hashes and sorted sets all expire the same way. The engine consults the
//! index before returning or enumerating a key ("lazy expiry").
//!
//! Lazy expiry alone never reclaims a key that is not read again, so a
//! background task periodically purges due keys ("active expiry"). The
//! sweeper visits one shard at a time and removes at most a bounded batch
//! from each, so it never holds a lock across the whole key space.
//!
//! ## Adaptive Frequency
//!
//! If many keys are expiring, the sweeper will run more frequently.
//! If few keys are expiring, it will back off to save CPU.

use crate::error::{StoreError, StoreResult};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Converts a caller-supplied TTL in seconds into a `Duration`.
///
/// Zero and negative values are rejected.
pub fn ttl_from_secs(secs: i64) -> StoreResult<Duration> {
    if secs <= 0 {
        return Err(StoreError::invalid(format!(
            "ttl must be positive, got {}",
            secs
        )));
    }
    Ok(Duration::from_secs(secs as u64))
}

/// Per-key absolute deadlines.
///
/// Deadlines are indexed twice: by key for the read-path predicate, and by
/// time so the sweeper can find due keys without scanning every record.
#[derive(Debug, Default)]
pub struct ExpiryIndex {
    deadlines: HashMap<Bytes, Instant>,
    schedule: BTreeSet<(Instant, Bytes)>,
}

impl ExpiryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `key` is absent from `now + ttl` onwards, replacing any
    /// previous deadline. Returns the new deadline.
    pub fn set_expiry(&mut self, key: Bytes, ttl: Duration, now: Instant) -> StoreResult<Instant> {
        if ttl.is_zero() {
            return Err(StoreError::invalid("ttl must be positive"));
        }
        let deadline = now
            .checked_add(ttl)
            .ok_or_else(|| StoreError::invalid("ttl out of range"))?;

        if let Some(previous) = self.deadlines.insert(key.clone(), deadline) {
            self.schedule.remove(&(previous, key.clone()));
        }
        self.schedule.insert((deadline, key));
        Ok(deadline)
    }

    /// Pure predicate: has `key` passed its deadline at `now`?
    #[inline]
    pub fn is_expired(&self, key: &[u8], now: Instant) -> bool {
        self.deadlines
            .get(key)
            .map(|deadline| now >= *deadline)
            .unwrap_or(false)
    }

    /// Returns the deadline for `key`, if it has one.
    pub fn deadline(&self, key: &[u8]) -> Option<Instant> {
        self.deadlines.get(key).copied()
    }

    /// Removes the expiry record for `key`.
    ///
    /// Returns `true` if a record existed.
    pub fn clear(&mut self, key: &[u8]) -> bool {
        match self.deadlines.remove_entry(key) {
            Some((key, deadline)) => {
                self.schedule.remove(&(deadline, key));
                true
            }
            None => false,
        }
    }

    /// Returns up to `limit` keys whose deadline is at or before `now`,
    /// earliest first.
    pub fn due(&self, now: Instant, limit: usize) -> Vec<Bytes> {
        self.schedule
            .iter()
            .take_while(|(deadline, _)| *deadline <= now)
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Base interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,

    /// If this fraction of stored keys expired in one sweep, speed up sweeping
    pub speedup_threshold: f64,

    /// If this fraction of stored keys expired in one sweep, slow down sweeping
    pub slowdown_threshold: f64,

    /// Maximum keys purged from a single shard per sweep
    pub batch_per_shard: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
            batch_per_shard: 64,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = engine.len();
        let expired = engine.sweep_expired(config.batch_per_shard);

        if keys_before > 0 {
            let expiry_rate = expired as f64 / keys_before as f64;

            if expiry_rate > config.speedup_threshold {
                current_interval = (current_interval / 2).max(config.min_interval);
                debug!(
                    expired = expired,
                    rate = %format!("{:.2}%", expiry_rate * 100.0),
                    new_interval_ms = current_interval.as_millis(),
                    "High expiry rate, speeding up sweeper"
                );
            } else if expiry_rate < config.slowdown_threshold && expired == 0 {
                current_interval = (current_interval * 2).min(config.max_interval);
                trace!(
                    new_interval_ms = current_interval.as_millis(),
                    "Low expiry rate, slowing down sweeper"
                );
            }
        }

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}
