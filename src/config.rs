//! Environment Configuration
//!
//! Every setting is optional. Unset variables fall back to the defaults
//! below; set-but-malformed variables are an error rather than silently
//! ignored.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `REDIS_URL` | `redis://127.0.0.1:6379` |
//! | `USE_EMBEDDED_STORE` | `false` |
//! | `STORE_MAX_RETRIES` | `5` |
//! | `STORE_RETRY_DELAY_MS` | `2000` |
//! | `STORE_RETRY_BACKOFF` | `fixed` (or `exponential`) |
//! | `STORE_CONNECT_TIMEOUT_MS` | `1000` |
//! | `CACHE_TTL_SECS` | `300` |
//! | `SESSION_TTL_SECS` | `1800` |
//! | `STORE_SCAN_BATCH` | `100` |
//! | `STORE_SWEEP_BATCH` | `64` |
//! | `STORE_SHARDS` | `64` |

use crate::error::ConfigError;
use crate::storage::{EngineConfig, DEFAULT_SCAN_BATCH, DEFAULT_SHARDS};
use std::str::FromStr;
use std::time::Duration;

/// Default primary backend address.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Upper bound for a single exponential backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How the wait between connection attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    #[default]
    Fixed,
    /// Doubles after every failed attempt, capped at [`MAX_BACKOFF`].
    Exponential,
}

impl FromStr for Backoff {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "exponential" | "exp" => Ok(Backoff::Exponential),
            _ => Err(()),
        }
    }
}

/// Bounded retry schedule for the primary backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_millis(2000),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(MAX_BACKOFF.max(self.delay))
            }
        }
    }
}

/// Process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Primary backend address
    pub redis_url: String,
    /// Skip the primary and serve from the embedded engine right away
    pub use_embedded: bool,
    pub retry: RetryPolicy,
    /// Per-attempt connect + handshake timeout
    pub connect_timeout: Duration,
    /// Default TTL for cache-aside entries
    pub cache_ttl: Duration,
    /// Rolling TTL for sessions
    pub session_ttl: Duration,
    /// Embedded engine sizing
    pub engine: EngineConfig,
    /// Expired keys purged per shard per sweep
    pub sweep_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            use_embedded: false,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_millis(1000),
            cache_ttl: Duration::from_secs(300),
            session_ttl: Duration::from_secs(1800),
            engine: EngineConfig {
                shards: DEFAULT_SHARDS,
                scan_batch: DEFAULT_SCAN_BATCH,
            },
            sweep_batch: 64,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &'static str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        };

        Ok(Config {
            redis_url: var("REDIS_URL")
                .map(|(_, value)| value)
                .unwrap_or(defaults.redis_url),
            use_embedded: match var("USE_EMBEDDED_STORE") {
                Some((key, value)) => parse_bool(key, value)?,
                None => defaults.use_embedded,
            },
            retry: RetryPolicy {
                max_retries: parse_or(var("STORE_MAX_RETRIES"), defaults.retry.max_retries)?,
                delay: parse_or(var("STORE_RETRY_DELAY_MS"), defaults.retry.delay.as_millis() as u64)
                    .map(Duration::from_millis)?,
                backoff: parse_or(var("STORE_RETRY_BACKOFF"), defaults.retry.backoff)?,
            },
            connect_timeout: positive_millis(
                var("STORE_CONNECT_TIMEOUT_MS"),
                defaults.connect_timeout,
            )?,
            cache_ttl: positive_secs(var("CACHE_TTL_SECS"), defaults.cache_ttl)?,
            session_ttl: positive_secs(var("SESSION_TTL_SECS"), defaults.session_ttl)?,
            engine: EngineConfig {
                // Zero shards is left for the engine to reject at startup.
                shards: parse_or(var("STORE_SHARDS"), defaults.engine.shards)?,
                scan_batch: positive(var("STORE_SCAN_BATCH"), defaults.engine.scan_batch)?,
            },
            sweep_batch: positive(var("STORE_SWEEP_BATCH"), defaults.sweep_batch)?,
        })
    }
}

fn parse_or<T: FromStr>(var: Option<(&'static str, String)>, default: T) -> Result<T, ConfigError> {
    match var {
        Some((key, value)) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn positive(var: Option<(&'static str, String)>, default: usize) -> Result<usize, ConfigError> {
    match var {
        Some((key, value)) => match value.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::Invalid { key, value }),
        },
        None => Ok(default),
    }
}

fn positive_secs(var: Option<(&'static str, String)>, default: Duration) -> Result<Duration, ConfigError> {
    positive(var, default.as_secs() as usize).map(|secs| Duration::from_secs(secs as u64))
}

fn positive_millis(
    var: Option<(&'static str, String)>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    positive(var, default.as_millis() as usize).map(|ms| Duration::from_millis(ms as u64))
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.delay, Duration::from_secs(2));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.session_ttl, Duration::from_secs(1800));
        assert!(!config.use_embedded);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("REDIS_URL", "redis://cache.internal:6380/2"),
            ("USE_EMBEDDED_STORE", "true"),
            ("STORE_MAX_RETRIES", "3"),
            ("STORE_RETRY_DELAY_MS", "250"),
            ("STORE_RETRY_BACKOFF", "Exponential"),
            ("CACHE_TTL_SECS", "60"),
            ("STORE_SHARDS", "0"),
            ("STORE_SCAN_BATCH", "10"),
        ])
        .unwrap();

        assert_eq!(config.redis_url, "redis://cache.internal:6380/2");
        assert!(config.use_embedded);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.delay, Duration::from_millis(250));
        assert_eq!(config.retry.backoff, Backoff::Exponential);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.engine.shards, 0);
        assert_eq!(config.engine.scan_batch, 10);
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config_from(&[("REDIS_URL", "  "), ("STORE_MAX_RETRIES", "")]).unwrap();
        assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_malformed_values() {
        assert_eq!(
            config_from(&[("STORE_MAX_RETRIES", "many")]),
            Err(ConfigError::Invalid {
                key: "STORE_MAX_RETRIES",
                value: "many".to_string()
            })
        );
        assert!(config_from(&[("USE_EMBEDDED_STORE", "maybe")]).is_err());
        assert!(config_from(&[("STORE_RETRY_BACKOFF", "linear")]).is_err());
        assert!(config_from(&[("CACHE_TTL_SECS", "0")]).is_err());
        assert!(config_from(&[("SESSION_TTL_SECS", "-5")]).is_err());
        assert!(config_from(&[("STORE_SCAN_BATCH", "0")]).is_err());
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(4), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            delay: Duration::from_secs(2),
            backoff: Backoff::Exponential,
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(16));
        assert_eq!(policy.delay_after(5), MAX_BACKOFF);
        assert_eq!(policy.delay_after(40), MAX_BACKOFF);
    }
}
