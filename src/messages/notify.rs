use super::{Departed, JoinMessage};

/// Membership change notification for routing and monitoring nodes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Notify {
    /// A node joined the cluster.
    Join(JoinMessage),
    /// A node left the cluster.
    Depart(Departed),
}
