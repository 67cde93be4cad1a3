//! Error Types
//!
//! Missing or expired keys are never errors: reads report them as `None`,
//! an empty map or an empty range. Everything here is an actual failure.

use thiserror::Error;

/// Result type used by the engine, the backends and the store handle.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A malformed argument: non-positive TTL, NaN score, bad glob pattern,
    /// or a scan cursor issued by a different backend.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The key holds a value of another kind than the operation expects.
    #[error("WRONGTYPE operation against a key holding the wrong kind of value")]
    TypeConflict,

    /// Neither the primary nor the embedded engine can serve requests.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The connected primary failed mid-request (I/O or protocol error).
    #[error("primary backend error: {0}")]
    Remote(String),
}

impl StoreError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidArgument(msg.into())
    }

    /// Returns true if the error came from the transport rather than from
    /// the request itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StoreError::BackendUnavailable(_) | StoreError::Remote(_)
        )
    }
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
