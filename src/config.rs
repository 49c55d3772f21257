//! Parsing and validation of the YAML configuration file.
//!
//! The file has four sections: `threads`, `replication`, `capacities`, and
//! `server`. See `example-config.yml` in the repository root for a complete
//! example.

use eyre::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The parsed configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Worker thread counts per tier.
    pub threads: Threads,
    /// Default replication factors.
    pub replication: Replication,
    /// Per-node storage capacities.
    pub capacities: Capacities,
    /// Addresses of this node and of its external collaborators.
    pub server: ServerConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file `{}`", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file `{}`", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the constraints that the rest of the system relies on.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.threads.memory == 0 || self.threads.ebs == 0 {
            bail!("thread counts must be positive");
        }
        if self.replication.memory == 0 && self.replication.ebs == 0 {
            bail!("at least one tier needs a non-zero default replication factor");
        }
        if self.replication.local == 0 {
            bail!("local replication factor must be positive");
        }
        Ok(())
    }
}

/// Number of worker threads per node, by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threads {
    /// Threads on memory-tier nodes.
    pub memory: u32,
    /// Threads on disk-tier nodes.
    pub ebs: u32,
}

/// Default replication factors, used for keys without explicit replication
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replication {
    /// Number of memory-tier nodes replicating each key.
    pub memory: usize,
    /// Number of disk-tier nodes replicating each key.
    pub ebs: usize,
    /// Number of threads per node replicating each key.
    pub local: usize,
}

/// Per-node storage capacity in megabytes, by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacities {
    /// Capacity of memory-tier nodes.
    #[serde(rename = "memory-cap")]
    pub memory_cap: u64,
    /// Capacity of disk-tier nodes.
    #[serde(rename = "ebs-cap")]
    pub ebs_cap: u64,
}

/// Addresses of this node and the cluster roles it talks to.
///
/// Node discovery and message delivery run over zenoh, so most entries are
/// either zenoh locators (`tcp/host:port`) or node IDs rather than raw
/// sockets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Locator other peers can reach this node at.
    pub public_ip: String,
    /// Locator this node binds its zenoh listener to.
    pub private_ip: String,
    /// Locator of a running peer to join through; queried for the initial
    /// cluster snapshot.
    pub seed_ip: String,
    /// Node ID of the management plane, or `"NULL"` to run without one.
    pub mgmt_ip: String,
    /// Node IDs of the monitoring nodes.
    #[serde(default)]
    pub monitoring: Vec<String>,
    /// Node IDs of routing nodes to announce to (in addition to the ones in
    /// the cluster snapshot).
    #[serde(default)]
    pub routing: Vec<String>,
}

impl ServerConfig {
    /// The management node ID, if a management plane is configured.
    pub fn management_id(&self) -> Option<&str> {
        match self.mgmt_ip.as_str() {
            "NULL" | "" => None,
            id => Some(id),
        }
    }
}
