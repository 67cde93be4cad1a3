//! Collaborator Services
//!
//! Thin helpers built only on the public [`StoreHandle`](crate::backend::StoreHandle)
//! operations. They keep working unchanged when the supervisor fails over,
//! because they hold the handle rather than a backend.
//!
//! - [`CacheAside`]: JSON cache-aside with a default TTL
//! - [`SessionStore`]: hash-per-session with a rolling TTL
//! - [`Leaderboard`]: rankings over one sorted set

pub mod cache;
pub mod leaderboard;
pub mod session;

pub use cache::CacheAside;
pub use leaderboard::{Leaderboard, Standing, DEFAULT_LEADERBOARD_KEY};
pub use session::{new_session_id, SessionStore, SESSION_PREFIX};
