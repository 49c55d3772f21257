//! Reserved metadata keys and per-tier metadata.
//!
//! Metadata keys always live on the memory tier with a fixed replication
//! factor, so looking one up never requires a replication-factor lookup of
//! its own.

use crate::{messages::Tier, topics::ServerThread, ClientKey, Key};
use eyre::anyhow;

/// A key in the reserved metadata namespace.
#[derive(Debug, PartialEq, Eq, Hash, Clone, serde::Serialize, serde::Deserialize)]
pub enum MetadataKey {
    /// Stores the [`ReplicationFactor`](crate::messages::ReplicationFactor)
    /// of a client key.
    Replication {
        /// The client key the replication factor belongs to.
        key: ClientKey,
    },
    /// Stores statistics reported by one server thread.
    PerThread {
        /// Tier of the reporting node.
        tier: Tier,
        /// The reporting thread.
        thread: ServerThread,
        /// Which report this key stores.
        kind: ReportKind,
    },
    /// Stores the set of keys held by one function-executor cache.
    CacheKeys {
        /// ID of the cache process.
        cache_id: String,
    },
}

/// The report kinds a server thread publishes each epoch.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub enum ReportKind {
    /// Storage consumption, occupancy, epoch, and access counts
    /// ([`ThreadStatistics`](crate::messages::stats::ThreadStatistics)).
    ServerStats,
    /// Per-key access frequencies within the monitoring window
    /// ([`KeyAccessSnapshot`](crate::messages::stats::KeyAccessSnapshot)).
    KeyAccess,
    /// Sizes of the keys this thread is the primary replica of
    /// ([`KeySizeSnapshot`](crate::messages::stats::KeySizeSnapshot)).
    KeySize,
}

impl std::convert::TryFrom<Key> for MetadataKey {
    type Error = eyre::Error;

    fn try_from(value: Key) -> Result<Self, Self::Error> {
        match value {
            Key::Metadata(key) => Ok(key),
            Key::Client(_) => Err(anyhow!("expected a metadata key, got a client key")),
        }
    }
}

/// Static description of one storage tier.
#[derive(Debug, Clone)]
pub struct TierMetadata {
    /// Worker threads per node in this tier.
    pub thread_count: u32,
    /// Default per-key replication factor of this tier.
    pub default_replication: usize,
    /// Capacity of a node in this tier, in bytes.
    pub node_capacity: u64,
}
