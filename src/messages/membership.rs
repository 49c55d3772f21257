//! The cluster snapshot served by routing nodes.

use super::Tier;

/// Which server nodes belong to which tier, plus the known routing nodes.
///
/// Served as the reply to a seed query when a node starts up.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClusterMembership {
    /// The server nodes of each tier.
    pub tiers: Vec<TierMembership>,
    /// IDs of the routing nodes in the cluster.
    pub routing_node_ids: Vec<String>,
}

/// The server nodes of a single tier.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TierMembership {
    /// The tier these nodes belong to.
    pub tier: Tier,
    /// IDs of the server nodes in this tier.
    pub servers: Vec<String>,
}
