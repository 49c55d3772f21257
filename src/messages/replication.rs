use crate::ClientKey;

/// The replication factors of one key, as stored under its replication
/// metadata key and as carried by change commands.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplicationFactor {
    /// The key the factors apply to.
    pub key: ClientKey,
    /// Cross-node replication per tier.
    pub global: Vec<ReplicationValue>,
    /// Intra-node (thread) replication per tier.
    pub local: Vec<ReplicationValue>,
}

/// A replication factor at one tier.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplicationValue {
    /// The tier the factor applies to.
    pub tier: super::Tier,
    /// The number of replicas.
    pub value: usize,
}

/// A batch of replication-factor changes from the monitoring plane.
#[derive(Default, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplicationFactorUpdate {
    /// The changed factors.
    pub updates: Vec<ReplicationFactor>,
}
