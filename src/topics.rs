//! Zenoh topic paths for addressing individual threads of cluster roles.
//!
//! Every topic is prefixed with a deployment-specific string so that several
//! clusters (or several tests) can share one zenoh network.

// Channels a server thread listens on.
const NODE_JOIN: &str = "node_join";
const NODE_DEPART: &str = "node_depart";
const SELF_DEPART: &str = "self_depart";
const KEY_REQUEST: &str = "key_request";
const GOSSIP: &str = "gossip";
const REPLICATION_RESPONSE: &str = "replication_response";
const REPLICATION_CHANGE: &str = "replication_change";
const CACHE_KEYS_RESPONSE: &str = "cache_keys_response";
const MANAGEMENT_RESPONSE: &str = "management_response";

// Routing-tier channels the server publishes to.
const SEED: &str = "seed";
const ROUTING_NOTIFY: &str = "routing_notify";

// Monitoring / management / cache channels.
const MONITORING_NOTIFY: &str = "monitoring_notify";
const CACHE_LIST_QUERY: &str = "cache_list_query";
const RESTART_COUNT: &str = "restart_count";
const CACHE_UPDATE: &str = "cache_update";

// Client-proxy channel that responses are sent to.
const USER_RESPONSE: &str = "user_response";

fn thread_topic(prefix: &str, node_id: &str, channel: &str, thread_id: u32) -> String {
    format!("{}/{}/{}/{}", prefix, node_id, channel, thread_id)
}

/// Addresses one worker thread of one server node.
///
/// Serialized into messages (e.g. the responsible-thread lists in gossip
/// staging), so it doubles as the cluster-wide thread identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ServerThread {
    /// ID of the server node.
    pub node_id: String,
    /// Worker thread index within the node.
    pub thread_id: u32,
}

impl ServerThread {
    /// Addresses the given thread of the given node.
    pub fn new(node_id: String, thread_id: u32) -> Self {
        Self { node_id, thread_id }
    }

    /// Topic for [`JoinMessage`](crate::messages::JoinMessage)s from newly
    /// started nodes.
    pub fn node_join_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, NODE_JOIN, self.thread_id)
    }

    /// Topic for [`Departed`](crate::messages::Departed) notifications.
    pub fn node_depart_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, NODE_DEPART, self.thread_id)
    }

    /// Topic telling this thread that its own node should leave the cluster
    /// ([`SelfDepart`](crate::messages::SelfDepart) messages).
    pub fn self_depart_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, SELF_DEPART, self.thread_id)
    }

    /// Topic for client [`KeyRequest`](crate::messages::KeyRequest)s.
    pub fn request_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, KEY_REQUEST, self.thread_id)
    }

    /// Topic for replica gossip, which reuses the
    /// [`KeyRequest`](crate::messages::KeyRequest) schema with PUT semantics.
    pub fn gossip_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, GOSSIP, self.thread_id)
    }

    /// Topic for [`KeyResponse`](crate::messages::KeyResponse)s to
    /// replication-factor lookups this thread issued.
    pub fn replication_response_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, REPLICATION_RESPONSE, self.thread_id)
    }

    /// Topic for replication-factor change commands from the monitoring
    /// plane.
    pub fn replication_change_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, REPLICATION_CHANGE, self.thread_id)
    }

    /// Topic for responses listing the keys cached by a function-executor
    /// cache.
    pub fn cache_keys_response_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, CACHE_KEYS_RESPONSE, self.thread_id)
    }

    /// Topic for responses from the management plane.
    pub fn management_response_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, MANAGEMENT_RESPONSE, self.thread_id)
    }
}

/// Addresses one thread of a routing node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingThread {
    /// ID of the routing node.
    pub node_id: String,
    /// Thread index within the routing node.
    pub thread_id: u32,
}

impl RoutingThread {
    /// Addresses the given thread of the given routing node.
    pub fn new(node_id: String, thread_id: u32) -> Self {
        Self { node_id, thread_id }
    }

    /// Starting servers query this topic for a
    /// [`ClusterMembership`](crate::messages::ClusterMembership) snapshot.
    ///
    /// Unlike the other channels this is a zenoh `get` with an immediate
    /// reply, answered by whichever routing node is up.
    pub fn seed_topic(prefix: &str) -> String {
        format!("{}/{}", prefix, SEED)
    }

    /// Topic for [`Notify`](crate::messages::Notify) messages about joins
    /// and departures.
    pub fn notify_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, ROUTING_NOTIFY, self.thread_id)
    }
}

/// Addresses a monitoring node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitoringThread {
    /// ID of the monitoring node.
    pub node_id: String,
}

impl MonitoringThread {
    /// Addresses the given monitoring node.
    pub fn new(node_id: String) -> Self {
        Self { node_id }
    }

    /// Topic for [`Notify`](crate::messages::Notify) messages about joins
    /// and departures.
    pub fn notify_topic(&self, prefix: &str) -> String {
        format!("{}/{}/{}", prefix, self.node_id, MONITORING_NOTIFY)
    }
}

/// Addresses the management plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagementThread {
    /// ID of the management node.
    pub node_id: String,
}

impl ManagementThread {
    /// Addresses the given management node.
    pub fn new(node_id: String) -> Self {
        Self { node_id }
    }

    /// Topic for [`CacheListQuery`](crate::messages::management::CacheListQuery)
    /// messages asking for the current set of function-executor caches.
    pub fn cache_list_query_topic(&self, prefix: &str) -> String {
        format!("{}/{}/{}", prefix, self.node_id, CACHE_LIST_QUERY)
    }

    /// Per-server topic answering restart counts; queried via zenoh `get`
    /// when a node starts under a management plane.
    pub fn restart_count_topic(&self, prefix: &str, server_node_id: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.node_id, RESTART_COUNT, server_node_id
        )
    }
}

/// Addresses one thread of a function-executor cache process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheThread {
    /// ID of the cache process.
    pub cache_id: String,
    /// Thread index within the cache process.
    pub thread_id: u32,
}

impl CacheThread {
    /// Addresses the given thread of the given cache.
    pub fn new(cache_id: String, thread_id: u32) -> Self {
        Self { cache_id, thread_id }
    }

    /// Topic on which caches receive invalidation gossip for the keys they
    /// hold.
    pub fn cache_update_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.cache_id, CACHE_UPDATE, self.thread_id)
    }
}

/// Addresses one thread of a client proxy.
#[derive(Debug, Clone)]
pub struct ClientThread {
    /// ID of the client node.
    pub node_id: String,
    /// Thread index within the client node.
    pub thread_id: u32,
}

impl ClientThread {
    /// Addresses the given thread of the given client node.
    pub fn new(node_id: String, thread_id: u32) -> Self {
        Self { node_id, thread_id }
    }

    /// Topic on which the client awaits
    /// [`KeyResponse`](crate::messages::KeyResponse)s.
    pub fn response_topic(&self, prefix: &str) -> String {
        thread_topic(prefix, &self.node_id, USER_RESPONSE, self.thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_topics_are_disjoint_per_thread() {
        let t0 = ServerThread::new("node-a".into(), 0);
        let t1 = ServerThread::new("node-a".into(), 1);

        assert_ne!(t0.request_topic("p"), t1.request_topic("p"));
        assert_ne!(t0.gossip_topic("p"), t0.request_topic("p"));
        assert_eq!(t0.gossip_topic("p"), "p/node-a/gossip/0");
    }

    #[test]
    fn restart_count_topic_embeds_server_id() {
        let mgmt = ManagementThread::new("mgmt-0".into());
        assert_eq!(
            mgmt.restart_count_topic("p", "kvs-1"),
            "p/mgmt-0/restart_count/kvs-1"
        );
    }
}
