//! Configuration types for ObjectIO
//!
//! This module defines the configuration of a storage node's disk gateway:
//! the pool topology, which drives are local, the internode credential and
//! the keep-alive and retry tunables.

use crate::error::{Error, Result};
use crate::types::{DiskCoord, Endpoint, PoolTopology};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a storage node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Internode credential
    pub credentials: CredentialsConfig,
    /// Authentication tunables
    pub auth: AuthConfig,
    /// Server pools, in pool index order
    pub pools: Vec<PoolConfig>,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Keep-alive framing tunables
    pub keepalive: KeepAliveConfig,
}

/// Node identity and listener configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Listen address for the storage REST API
    pub listen: String,
    /// Default log level, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9002".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// The cluster-wide credential every node signs internode calls with
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub access_key: String,
    pub secret_key: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            access_key: "objectioadmin".to_string(),
            secret_key: "objectioadmin-change-me".to_string(),
        }
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Authentication tunables
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted difference between the caller's clock and ours
    pub max_skew_secs: u64,
    /// Lifetime of tokens issued by the internode client
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_skew_secs: 15 * 60,
            token_ttl_secs: 15 * 60,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn max_skew(&self) -> Duration {
        Duration::from_secs(self.max_skew_secs)
    }

    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// One server pool
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub set_count: usize,
    pub drives_per_set: usize,
    pub endpoints: Vec<EndpointConfig>,
}

/// One drive of a pool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub path: PathBuf,
    pub set: usize,
    pub disk: usize,
    /// Drives owned by other nodes are listed for topology but never attached here
    #[serde(default = "default_true")]
    pub local: bool,
}

const fn default_true() -> bool {
    true
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Refuse drives whose filesystem rejects O_DIRECT
    pub direct_io: bool,
    /// Interval between attach attempts for a drive that failed at startup
    pub retry_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            direct_io: false,
            retry_interval_ms: 3_000,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Keep-alive framing tunables
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Interval between heartbeat bytes while an operation is in flight
    pub heartbeat_interval_ms: u64,
    /// Largest data block accepted or emitted by block streaming
    pub max_block_size: usize,
    /// Blocks buffered between producers and the writer task
    pub stream_capacity: usize,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            max_block_size: 16 * 1024 * 1024,
            stream_capacity: 1,
        }
    }
}

impl KeepAliveConfig {
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Shape of every pool, in pool index order
    #[must_use]
    pub fn topology(&self) -> Vec<PoolTopology> {
        self.pools
            .iter()
            .map(|p| PoolTopology {
                set_count: p.set_count,
                drives_per_set: p.drives_per_set,
            })
            .collect()
    }

    /// Every configured endpoint with its full coordinate
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.pools
            .iter()
            .enumerate()
            .flat_map(|(pool, p)| {
                p.endpoints.iter().map(move |e| Endpoint {
                    path: e.path.clone(),
                    coord: DiskCoord::new(pool, e.set, e.disk),
                    is_local: e.local,
                })
            })
            .collect()
    }

    /// Endpoints this node owns
    #[must_use]
    pub fn local_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints().into_iter().filter(|e| e.is_local).collect()
    }

    /// Check coordinates fit the topology and nothing is listed twice
    pub fn validate(&self) -> Result<()> {
        if self.credentials.access_key.is_empty() || self.credentials.secret_key.is_empty() {
            return Err(Error::Configuration(
                "credentials.access_key and credentials.secret_key must be set".into(),
            ));
        }

        let mut coords = HashSet::new();
        let mut paths = HashSet::new();
        for (pool, p) in self.pools.iter().enumerate() {
            if p.set_count == 0 || p.drives_per_set == 0 {
                return Err(Error::Configuration(format!(
                    "pool {pool}: set_count and drives_per_set must be non-zero"
                )));
            }
            for e in &p.endpoints {
                if e.set >= p.set_count || e.disk >= p.drives_per_set {
                    return Err(Error::Configuration(format!(
                        "pool {pool}: endpoint {} at set {} disk {} is outside {}x{}",
                        e.path.display(),
                        e.set,
                        e.disk,
                        p.set_count,
                        p.drives_per_set
                    )));
                }
                if !coords.insert(DiskCoord::new(pool, e.set, e.disk)) {
                    return Err(Error::Configuration(format!(
                        "pool {pool}: set {} disk {} listed twice",
                        e.set, e.disk
                    )));
                }
                if e.local && !paths.insert(e.path.clone()) {
                    return Err(Error::Configuration(format!(
                        "local drive {} listed twice",
                        e.path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}
