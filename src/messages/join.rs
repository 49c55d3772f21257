use super::Tier;

/// Announces that a node joined the cluster.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JoinMessage {
    /// Tier of the joining node.
    pub tier: Tier,
    /// ID of the joining node.
    pub node_id: String,
    /// Incarnation number of the joining node; greater than zero when a node
    /// rejoins after a restart.
    pub join_count: u32,
}
