//! Messages exchanged with the management plane.

use std::collections::HashSet;

/// Asks the management plane for the current set of function-executor cache
/// nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CacheListQuery {
    /// Topic the [`NodeSet`] reply is sent to.
    pub response_topic: String,
}

/// A set of node IDs, e.g. the live function-executor caches.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeSet {
    /// The node IDs.
    pub nodes: HashSet<String>,
}
