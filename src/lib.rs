//! # StandbyKV - A Key-Value Store Client with an Embedded Fallback
//!
//! StandbyKV gives an application one handle to "the store". Behind that
//! handle sits either a networked RESP server (the primary) or, if the
//! primary cannot be reached at startup, an in-process engine with the same
//! string, hash, sorted-set and expiry semantics.
//!
//! ## Features
//!
//! - **Transparent Failover**: handles obtained before the switch follow it
//! - **Bounded Retry**: fixed or exponential backoff against the primary
//! - **Embedded Engine**: sharded storage with RwLock for concurrent access
//! - **Ranked Sets**: skip-list sorted sets with deterministic tie-breaks
//! - **TTL Support**: any key can expire, with lazy and active cleanup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              StandbyKV                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────────────────┐  │
//! │  │  Services   │───>│ StoreHandle │───>│ Arc<Backend> (swappable)    │  │
//! │  │ cache/sess/ │    │  (shared)   │    └──────┬───────────────┬──────┘  │
//! │  │ leaderboard │    └──────▲──────┘           │               │         │
//! │  └─────────────┘           │ install          ▼               ▼         │
//! │                   ┌────────┴────────┐  ┌─────────────┐ ┌─────────────┐  │
//! │                   │   Connection    │  │RemoteBackend│ │StorageEngine│  │
//! │                   │   Supervisor    │  │ RESP / TCP  │ │  64 shards  │  │
//! │                   └─────────────────┘  └─────────────┘ └──────▲──────┘  │
//! │                                                               │         │
//! │                                                 ┌─────────────┴───────┐ │
//! │                                                 │   ExpirySweeper     │ │
//! │                                                 │ (Background Task)   │ │
//! │                                                 └─────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use standbykv::{Config, ConnectionState, ConnectionSupervisor, SupervisorConfig};
//! use standbykv::services::Leaderboard;
//!
//! # tokio_test::block_on(async {
//! let config = Config {
//!     use_embedded: true,
//!     ..Config::default()
//! };
//! let supervisor = ConnectionSupervisor::new(SupervisorConfig::from(&config));
//! let store = supervisor.handle();
//!
//! assert_eq!(supervisor.start().await.unwrap(), ConnectionState::Degraded);
//!
//! let board = Leaderboard::new(store, "leaderboard:academic");
//! board.update_score("alice", 90.0).await.unwrap();
//! assert_eq!(board.rank("alice").await.unwrap(), Some(0));
//! # });
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the embedded engine, expiry index, ranked sets and glob matcher
//! - [`protocol`]: RESP encoder and decoder used to talk to the primary
//! - [`backend`]: the primary client, the swappable handle and the supervisor
//! - [`services`]: cache-aside, session and leaderboard helpers
//! - [`config`]: environment configuration
//!
//! ## Design Highlights
//!
//! ### One Indirection
//!
//! Every caller holds a clone of the same `StoreHandle`. Failover replaces
//! the backend inside it under a write lock, so no caller ever re-fetches a
//! handle and no call observes a half-swapped backend.
//!
//! ### Lazy + Active Expiry
//!
//! Keys with TTL are expired in two ways:
//! 1. **Lazy**: When a key is accessed, we check if it's expired
//! 2. **Active**: A background task periodically purges due keys in batches
//!
//! This ensures memory is reclaimed even for keys that are never accessed again.

pub mod backend;
pub mod config;
pub mod error;
pub mod protocol;
pub mod services;
pub mod storage;

// Re-export commonly used types for convenience
pub use backend::{ConnectionState, ConnectionSupervisor, StoreHandle, SupervisorConfig};
pub use config::{Backoff, Config, RetryPolicy};
pub use error::{ConfigError, StoreError, StoreResult};
pub use storage::{RankOrder, ScanCursor, ScanPage, StorageEngine, TtlStatus};

/// Version of StandbyKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
