use super::Tier;

/// Announces that a node left the cluster.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Departed {
    /// Tier of the departed node.
    pub tier: Tier,
    /// ID of the departed node.
    pub node_id: String,
}

/// Orders the receiving node to leave the cluster.
///
/// The node hands its keys to the surviving replicas, acknowledges with a
/// [`Departed`] message on `response_topic`, and exits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SelfDepart {
    /// Topic the acknowledging [`Departed`] message is sent to.
    pub response_topic: String,
}
