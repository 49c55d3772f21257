//! Wire message schemas exchanged between cluster roles.
//!
//! All messages are JSON-encoded zenoh payloads. The schemas here are shared
//! with the routing, monitoring, and client crates, so changes must stay
//! backwards compatible across roles.

pub use self::{
    depart::{Departed, SelfDepart},
    join::JoinMessage,
    membership::{ClusterMembership, TierMembership},
    notify::Notify,
    replication::{ReplicationFactor, ReplicationFactorUpdate, ReplicationValue},
    request::{KeyOperation, KeyRequest, PutTuple, RequestOperation},
    response::{KeyResponse, KeyTuple, ResponseType},
};

mod depart;
mod join;
mod membership;
mod notify;
mod replication;

pub mod management;
pub mod request;
pub mod response;
pub mod stats;

/// The tiers a cluster is partitioned into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Tier {
    /// Nodes storing values in memory.
    Memory,
    /// Nodes storing values on block storage.
    Disk,
    /// The routing proxies (holds no data).
    Routing,
}

impl Tier {
    /// The canonical uppercase name of the tier.
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Memory => "MEMORY",
            Tier::Disk => "DISK",
            Tier::Routing => "ROUTING",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Tier {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MEMORY" => Ok(Tier::Memory),
            "DISK" => Ok(Tier::Disk),
            "ROUTING" => Ok(Tier::Routing),
            other => Err(eyre::anyhow!("unknown tier name `{}`", other)),
        }
    }
}
