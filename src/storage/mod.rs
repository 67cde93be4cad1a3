//! Storage Engine Module
//!
//! This module provides the embedded store that takes over when the primary
//! backend cannot be reached. It includes a thread-safe, sharded key space
//! holding strings, hashes and sorted sets, a uniform TTL layer, glob-based
//! key enumeration and a background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! │     │ strings · hashes · RankedSet (own RwLock)            │
//! │     │ ExpiryIndex per shard                                │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Sharded Storage**: independent shards reduce lock contention
//! - **Ranked Sets**: skip list with O(log n) upsert, rank and range
//! - **TTL Support**: any key kind can expire
//! - **Lazy Expiry**: expired keys are hidden and purged on access
//! - **Active Expiry**: background sweeper purges in bounded batches
//! - **Incremental Scan**: cursor-based enumeration by glob pattern
//!
//! ## Example
//!
//! ```
//! use standbykv::storage::{ScanCursor, StorageEngine};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("cache:a"), Bytes::from("1"), Some(Duration::from_secs(300))).unwrap();
//! engine.set(Bytes::from("cache:b"), Bytes::from("2"), None).unwrap();
//!
//! let page = engine.scan_keys("cache:*", &ScanCursor::start()).unwrap();
//! assert_eq!(page.keys.len(), 2);
//! assert!(page.cursor.is_done());
//! ```

pub mod engine;
pub mod expiry;
pub mod pattern;
pub mod ranked;

// Re-export commonly used types
pub use engine::{
    EngineConfig, ScanCursor, ScanPage, StorageEngine, StorageStats, TtlStatus, ValueKind,
    DEFAULT_SCAN_BATCH, DEFAULT_SHARDS,
};
pub use expiry::{ttl_from_secs, ExpiryConfig, ExpiryIndex, ExpirySweeper};
pub use pattern::GlobPattern;
pub use ranked::{RankOrder, RankedSet};
