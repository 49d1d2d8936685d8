//! Client and pool configuration.
//!
//! Both structs are plain serde values so they can be loaded from JSON
//! alongside the rest of an application's settings.

use crate::base::neterror::NetError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection pool limits and eviction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum open connections across all routes (default: 256).
    pub max_connections: usize,
    /// Maximum open connections per (scheme, host, port) (default: 6).
    pub max_connections_per_route: usize,
    /// How long an idle connection may sit in the pool (default: 60s).
    pub pooled_idle_timeout: Duration,
    /// `None` fails a lease immediately when a limit is reached.
    /// `Some(d)` waits up to `d` for a release before failing.
    pub acquire_timeout: Option<Duration>,
    /// Period of the background idle sweep (default: 30s).
    pub cleanup_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 256,
            max_connections_per_route: 6,
            pooled_idle_timeout: Duration::from_secs(60),
            acquire_timeout: None,
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), NetError> {
        if self.max_connections == 0 {
            return Err(NetError::InvalidConfig("max_connections must be at least 1".into()));
        }
        if self.max_connections_per_route == 0 {
            return Err(NetError::InvalidConfig(
                "max_connections_per_route must be at least 1".into(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(NetError::InvalidConfig("cleanup_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    /// Keep connections open between requests (default: true).
    pub keep_alive: bool,
    /// Overall deadline for one exchange, auth retries included.
    pub request_timeout: Option<Duration>,
    /// Replay once on a fresh connection when a pooled one turns out dead.
    pub retry_on_stale_pooled_connection: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            keep_alive: true,
            request_timeout: None,
            retry_on_stale_pooled_connection: true,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        let config: ClientConfig =
            serde_json::from_str(json).map_err(|e| NetError::InvalidConfig(e.to_string()))?;
        config.pool.validate()?;
        Ok(config)
    }
}
