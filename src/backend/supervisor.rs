//! Connection Supervisor
//!
//! Owns the process-wide [`StoreHandle`] and decides which backend sits
//! behind it.
//!
//! ## State Machine
//!
//! ```text
//!  Disconnected ──start──> Connecting{1} ──fail──> ... Connecting{n}
//!                               │                          │
//!                            success                 retries exhausted
//!                               ▼                          ▼
//!                           Connected              embedded engine init
//!                                                     │          │
//!                                                    ok         error
//!                                                     ▼          ▼
//!                                                 Degraded     Failed
//! ```
//!
//! Retry waits happen inside `start` only. Nothing is served while the
//! supervisor is still connecting, so the waits never block live traffic.

use crate::backend::remote::{RemoteBackend, RemoteConfig};
use crate::backend::{Backend, ConnectionState, StoreHandle};
use crate::config::{Config, RetryPolicy};
use crate::error::{StoreError, StoreResult};
use crate::storage::{EngineConfig, ExpiryConfig, ExpirySweeper, StorageEngine};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};

/// Everything the supervisor needs to bring a backend up.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub redis_url: String,
    /// Go straight to the embedded engine
    pub use_embedded: bool,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub engine: EngineConfig,
    pub expiry: ExpiryConfig,
}

impl From<&Config> for SupervisorConfig {
    fn from(config: &Config) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            use_embedded: config.use_embedded,
            retry: config.retry,
            connect_timeout: config.connect_timeout,
            engine: config.engine,
            expiry: ExpiryConfig {
                batch_per_shard: config.sweep_batch,
                ..ExpiryConfig::default()
            },
        }
    }
}

/// Brings up the active backend and keeps the shared handle pointing at it.
///
/// # Example
///
/// ```no_run
/// use standbykv::{Config, ConnectionSupervisor, SupervisorConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::from_env()?;
/// let supervisor = ConnectionSupervisor::new(SupervisorConfig::from(&config));
/// let store = supervisor.handle();
///
/// supervisor.start().await?;
/// store.set("greeting", "hello", None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    handle: StoreHandle,
    sweeper: Mutex<Option<ExpirySweeper>>,
    /// Held for the whole startup sequence.
    startup: tokio::sync::Mutex<()>,
}

impl ConnectionSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            handle: StoreHandle::new(),
            sweeper: Mutex::new(None),
            startup: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns a handle that follows every future backend swap.
    pub fn handle(&self) -> StoreHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Runs the startup sequence to completion.
    ///
    /// Returns the resulting state (`Connected` or `Degraded`), or
    /// `BackendUnavailable` if even the embedded engine could not start.
    /// The sequence runs once. Concurrent callers wait for it and share its
    /// outcome; later calls return the settled state.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(&self) -> StoreResult<ConnectionState> {
        let _startup = self.startup.lock().await;

        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Failed => {
                return Err(StoreError::BackendUnavailable(
                    "no backend could be initialized".to_string(),
                ))
            }
            state => return Ok(state),
        }

        if self.config.use_embedded {
            info!("Embedded store requested, skipping primary");
            return self.promote_embedded();
        }

        let remote = RemoteConfig {
            url: self.config.redis_url.clone(),
            connect_timeout: self.config.connect_timeout,
            scan_batch: self.config.engine.scan_batch,
        };
        let max_retries = self.config.retry.max_retries;

        for attempt in 1..=max_retries {
            self.handle.set_state(ConnectionState::Connecting { attempt });
            info!(
                attempt = attempt,
                max_retries = max_retries,
                url = %remote.url,
                "Connecting to primary store"
            );

            match RemoteBackend::connect(&remote).await {
                Ok(backend) => {
                    let address = backend.address();
                    info!(
                        attempt = attempt,
                        host = %address.host,
                        port = address.port,
                        db = address.db,
                        "Connected to primary store"
                    );
                    self.handle
                        .install(Backend::Primary(backend), ConnectionState::Connected);
                    return Ok(ConnectionState::Connected);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        max_retries = max_retries,
                        error = %e,
                        "Primary store connection failed"
                    );
                    if attempt < max_retries {
                        let delay = self.config.retry.delay_after(attempt);
                        info!(delay_ms = delay.as_millis() as u64, "Retrying primary store");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(
            attempts = max_retries,
            "Primary store unreachable, switching to embedded store"
        );
        self.promote_embedded()
    }

    fn promote_embedded(&self) -> StoreResult<ConnectionState> {
        let engine = match StorageEngine::with_config(self.config.engine) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                error!(error = %e, "Embedded store failed to initialize");
                self.handle.fail();
                return Err(StoreError::BackendUnavailable(format!(
                    "embedded store failed to initialize: {}",
                    e
                )));
            }
        };

        let sweeper = ExpirySweeper::start(Arc::clone(&engine), self.config.expiry.clone());
        *self.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(sweeper);

        self.handle
            .install(Backend::Embedded(engine), ConnectionState::Degraded);
        warn!(
            shards = self.config.engine.shards,
            "Serving from embedded store (degraded mode)"
        );
        Ok(ConnectionState::Degraded)
    }
}
