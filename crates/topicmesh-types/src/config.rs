//! Configuration types for masters, nodes and the transport.
//!
//! Every struct uses `#[serde(default)]` so a config file only needs to name
//! the values it overrides.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default master listen address.
pub const DEFAULT_MASTER_ADDR: &str = "localhost:11511";

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub master: MasterConfig,
    pub node: NodeConfig,
    pub transport: TransportConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            master: MasterConfig::default(),
            node: NodeConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

/// Master process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Address the master listens on.
    pub listen_addr: Address,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: Address::new("localhost", 11511),
        }
    }
}

/// Node process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the node listens on; port 0 picks an ephemeral port.
    pub listen_addr: Address,
    /// Where the master is.
    pub master_addr: Address,
    /// How long to wait for `__registration_confirm__`.
    pub registration_timeout_ms: u64,
}

impl NodeConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: Address::new("localhost", 0),
            master_addr: Address::new("localhost", 11511),
            registration_timeout_ms: 5_000,
        }
    }
}

/// Connection handling shared by masters and nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Outbound connect attempts before giving up.
    pub connect_attempts: u32,
    /// Pause between two connect attempts.
    pub connect_retry_delay_ms: u64,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: u32,
}

impl TransportConfig {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            connect_retry_delay_ms: 1_000,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}
