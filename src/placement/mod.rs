//! Consistent-hash placement: which nodes and threads own which keys.

use self::ring::{HashRing, VirtualNode, VirtualThread};
use crate::{
    messages::{KeyRequest, RequestOperation, Tier},
    metadata::MetadataKey,
    topics::ServerThread,
    ClientKey, Key,
};
use eyre::{anyhow, eyre, Context};
use rand::prelude::SliceRandom;
use std::collections::{HashMap, HashSet};

pub mod ring;

/// Metadata keys always use this fixed global replication factor, so they
/// can be located without consulting any replication metadata.
const METADATA_REPLICATION: usize = 1;

/// Virtual ring entries per node and per thread.
///
/// Spreading each member across many pseudo-random positions keeps the key
/// distribution close to uniform even for few members or skewed key hashes.
const VIRTUAL_ENTRIES: u32 = 3000;

/// Tracks which server nodes of one tier own which hash ranges.
#[derive(Default)]
pub struct GlobalHashRing {
    ring: HashRing<VirtualNode>,
    /// node ID -> currently ringed incarnation
    members: HashMap<String, u32>,
}

impl GlobalHashRing {
    /// Adds a node, or refreshes it after a rejoin.
    ///
    /// Returns `true` if the call changed the ring: the node was new, or
    /// `join_count` is higher than the ringed incarnation. A rejoin replaces
    /// every virtual entry of the older incarnation, so no shadow positions
    /// survive.
    pub fn insert_node(&mut self, node_id: String, join_count: u32) -> bool {
        match self.members.get(&node_id) {
            Some(&current) if current >= join_count => false,
            Some(&current) => {
                for index in 0..VIRTUAL_ENTRIES {
                    self.ring
                        .remove(&VirtualNode::new(node_id.clone(), current, index));
                }
                for index in 0..VIRTUAL_ENTRIES {
                    self.ring
                        .insert(VirtualNode::new(node_id.clone(), join_count, index));
                }
                self.members.insert(node_id, join_count);
                true
            }
            None => {
                for index in 0..VIRTUAL_ENTRIES {
                    self.ring
                        .insert(VirtualNode::new(node_id.clone(), join_count, index));
                }
                self.members.insert(node_id, join_count);
                true
            }
        }
    }

    /// Removes a node and all of its virtual entries.
    pub fn remove_node(&mut self, node_id: &str) {
        if let Some(incarnation) = self.members.remove(node_id) {
            for index in 0..VIRTUAL_ENTRIES {
                self.ring
                    .remove(&VirtualNode::new(node_id.to_owned(), incarnation, index));
            }
        }
    }

    /// Iterates over the member node IDs.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(|id| id.as_str())
    }

    /// The number of member nodes.
    pub fn node_count(&self) -> usize {
        self.members.len()
    }

    /// The number of virtual entries on the ring (roughly
    /// `node_count * VIRTUAL_ENTRIES`).
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` if no nodes are on the ring.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// The first `replication` distinct nodes encountered on a clockwise
    /// walk from the key's position, in walk order.
    pub fn responsible_nodes(&self, key: &Key, replication: usize) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();

        if replication == 0 {
            return nodes;
        }
        for entry in self.ring.walk_from(key) {
            if seen.insert(entry.node_id()) {
                nodes.push(entry.node_id());
                if nodes.len() >= replication {
                    break;
                }
            }
        }
        nodes
    }

    /// The node whose entry is hit first when walking from the key.
    pub fn primary_node(&self, key: &Key) -> Option<&str> {
        self.ring.walk_from(key).next().map(|entry| entry.node_id())
    }
}

/// Tracks which worker threads within one node own which hash ranges.
#[derive(Default)]
pub struct LocalHashRing {
    ring: HashRing<VirtualThread>,
}

impl LocalHashRing {
    /// Adds a thread to the ring.
    pub fn insert_thread(&mut self, thread_id: u32) {
        for index in 0..VIRTUAL_ENTRIES {
            self.ring.insert(VirtualThread::new(thread_id, index));
        }
    }

    /// The first `replication` distinct threads encountered on a clockwise
    /// walk from the key's position, in walk order.
    pub fn responsible_threads(&self, key: &Key, replication: usize) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut threads = Vec::new();

        if replication == 0 {
            return threads;
        }
        for entry in self.ring.walk_from(key) {
            if seen.insert(entry.thread_id()) {
                threads.push(entry.thread_id());
                if threads.len() >= replication {
                    break;
                }
            }
        }
        threads
    }

    /// The thread whose entry is hit first when walking from the key.
    pub fn primary_thread(&self, key: &Key) -> Option<u32> {
        self.ring.walk_from(key).next().map(|entry| entry.thread_id())
    }
}

/// The replication factors of one key, per tier.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyReplication {
    /// Number of nodes per tier holding the key.
    pub global: HashMap<Tier, usize>,
    /// Number of threads per node holding the key.
    pub local: HashMap<Tier, usize>,
}

impl KeyReplication {
    /// Builds a replication description for the memory and disk tiers.
    pub fn new(
        global_memory: usize,
        global_disk: usize,
        local_memory: usize,
        local_disk: usize,
    ) -> Self {
        Self {
            global: vec![(Tier::Memory, global_memory), (Tier::Disk, global_disk)]
                .into_iter()
                .collect(),
            local: vec![(Tier::Memory, local_memory), (Tier::Disk, local_disk)]
                .into_iter()
                .collect(),
        }
    }
}

/// The outcome of a placement resolution.
pub enum Resolution {
    /// The ordered set of threads responsible for the key.
    Ready(Vec<ServerThread>),
    /// The key's replication factors are unknown; the caller must queue the
    /// work and issue a replication-factor lookup.
    AwaitingReplication,
}

/// Resolves keys to their responsible threads.
pub struct Placement {
    /// Local replication used for metadata keys (and as the default the
    /// replication metadata itself starts from).
    default_local_replication: usize,
}

impl Placement {
    /// Creates a resolver with the configured default local replication.
    pub fn new(default_local_replication: usize) -> Self {
        Self {
            default_local_replication,
        }
    }

    /// Computes the responsible threads of `key` across the given tiers.
    ///
    /// Metadata keys resolve against the memory tier with fixed replication
    /// and never return [`Resolution::AwaitingReplication`].
    pub fn resolve(
        &self,
        key: &Key,
        tiers: &[Tier],
        global_rings: &HashMap<Tier, GlobalHashRing>,
        local_rings: &HashMap<Tier, LocalHashRing>,
        replication_map: &HashMap<ClientKey, KeyReplication>,
    ) -> Resolution {
        match key {
            Key::Metadata(key) => {
                let empty_global = GlobalHashRing::default();
                let empty_local = LocalHashRing::default();
                Resolution::Ready(self.resolve_metadata(
                    key,
                    global_rings.get(&Tier::Memory).unwrap_or(&empty_global),
                    local_rings.get(&Tier::Memory).unwrap_or(&empty_local),
                ))
            }
            Key::Client(client_key) => {
                let replication = match replication_map.get(client_key) {
                    Some(replication) => replication,
                    None => return Resolution::AwaitingReplication,
                };

                let mut threads = Vec::new();
                for tier in tiers {
                    let empty_global = GlobalHashRing::default();
                    let empty_local = LocalHashRing::default();
                    let global_ring = global_rings.get(tier).unwrap_or(&empty_global);
                    let local_ring = local_rings.get(tier).unwrap_or(&empty_local);

                    let global_replication =
                        replication.global.get(tier).copied().unwrap_or_default();
                    let local_replication =
                        replication.local.get(tier).copied().unwrap_or_default();

                    threads.extend(responsible_threads(
                        key,
                        global_replication,
                        local_replication,
                        global_ring,
                        local_ring,
                    ));
                }
                Resolution::Ready(threads)
            }
        }
    }

    /// Computes the responsible threads of a metadata key.
    pub fn resolve_metadata(
        &self,
        key: &MetadataKey,
        global_memory_ring: &GlobalHashRing,
        local_memory_ring: &LocalHashRing,
    ) -> Vec<ServerThread> {
        responsible_threads(
            &key.clone().into(),
            METADATA_REPLICATION,
            self.default_local_replication,
            global_memory_ring,
            local_memory_ring,
        )
    }

    /// Sends a replication-factor lookup for `key` to a random thread that
    /// owns the key's replication metadata.
    ///
    /// The lookup is a GET on the replication metadata key; the answer
    /// arrives on `response_topic` as a regular [`KeyResponse`] and is
    /// handled by the replication-response handler.
    ///
    /// [`KeyResponse`]: crate::messages::KeyResponse
    pub async fn request_replication_factor(
        &self,
        response_topic: String,
        key: ClientKey,
        global_memory_ring: &GlobalHashRing,
        local_memory_ring: &LocalHashRing,
        zenoh: &zenoh::Session,
        zenoh_prefix: &str,
    ) -> eyre::Result<()> {
        log::info!("issuing replication factor lookup for key {}", key);

        let metadata_key = MetadataKey::Replication { key };
        let threads =
            self.resolve_metadata(&metadata_key, global_memory_ring, local_memory_ring);
        let target = threads
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| anyhow!("no threads are responsible for replication metadata"))?;

        let lookup = KeyRequest {
            request_id: None,
            response_address: Some(response_topic),
            address_cache_size: Default::default(),
            operation: RequestOperation::Get {
                keys: vec![metadata_key.into()],
            },
        };
        let serialized =
            serde_json::to_string(&lookup).context("failed to serialize replication lookup")?;

        zenoh
            .put(&target.request_topic(zenoh_prefix), serialized)
            .await
            .map_err(|e| eyre!(e))
            .context("failed to send replication factor lookup")?;

        Ok(())
    }
}

/// The cartesian product of the responsible nodes and the responsible
/// thread IDs, in ring-walk order.
pub fn responsible_threads(
    key: &Key,
    global_replication: usize,
    local_replication: usize,
    global_ring: &GlobalHashRing,
    local_ring: &LocalHashRing,
) -> Vec<ServerThread> {
    let nodes = global_ring.responsible_nodes(key, global_replication);
    let thread_ids = local_ring.responsible_threads(key, local_replication);

    let mut threads = Vec::with_capacity(nodes.len() * thread_ids.len());
    for node_id in nodes {
        for &thread_id in &thread_ids {
            threads.push(ServerThread::new(node_id.to_owned(), thread_id));
        }
    }
    threads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> Key {
        Key::Client(name.into())
    }

    fn ring_of(nodes: &[(&str, u32)]) -> GlobalHashRing {
        let mut ring = GlobalHashRing::default();
        for &(node, join_count) in nodes {
            ring.insert_node(node.to_owned(), join_count);
        }
        ring
    }

    #[test]
    fn responsible_nodes_are_distinct_and_bounded() {
        let ring = ring_of(&[("a", 0), ("b", 0), ("c", 0)]);

        for replication in 1..=3 {
            let nodes = ring.responsible_nodes(&key("some-key"), replication);
            assert_eq!(nodes.len(), replication);
            let distinct: HashSet<_> = nodes.iter().collect();
            assert_eq!(distinct.len(), replication);
        }
        // asking for more replicas than nodes returns every node
        assert_eq!(ring.responsible_nodes(&key("some-key"), 9).len(), 3);
    }

    #[test]
    fn duplicate_insert_is_a_noop() {
        let mut ring = ring_of(&[("a", 0)]);
        assert_eq!(ring.len(), 3000);
        assert!(!ring.insert_node("a".to_owned(), 0));
        assert_eq!(ring.len(), 3000);
        assert_eq!(ring.node_count(), 1);
    }

    #[test]
    fn rejoin_replaces_prior_incarnation() {
        let mut ring = ring_of(&[("a", 0), ("b", 0)]);
        assert!(ring.insert_node("a".to_owned(), 2));

        // no shadow entries: the ring is exactly the same as one where the
        // node joined with incarnation 2 in the first place
        let fresh = ring_of(&[("a", 2), ("b", 0)]);
        assert_eq!(ring.len(), fresh.len());
        for name in ["k1", "k2", "k3", "k4"].iter() {
            assert_eq!(
                ring.responsible_nodes(&key(name), 2),
                fresh.responsible_nodes(&key(name), 2),
            );
        }

        // lower or equal join counts cannot roll the node back
        assert!(!ring.insert_node("a".to_owned(), 1));
        assert!(!ring.insert_node("a".to_owned(), 2));
    }

    #[test]
    fn remove_node_clears_all_entries() {
        let mut ring = ring_of(&[("a", 3), ("b", 0)]);
        ring.remove_node("a");
        assert_eq!(ring.node_count(), 1);
        assert_eq!(ring.len(), 3000);
        assert_eq!(ring.responsible_nodes(&key("k"), 2), vec!["b"]);
    }

    #[test]
    fn local_ring_walks_threads() {
        let mut ring = LocalHashRing::default();
        for thread_id in 0..4 {
            ring.insert_thread(thread_id);
        }

        let threads = ring.responsible_threads(&key("k"), 2);
        assert_eq!(threads.len(), 2);
        assert_ne!(threads[0], threads[1]);
        assert_eq!(ring.primary_thread(&key("k")), Some(threads[0]));
    }

    #[test]
    fn resolve_combines_nodes_and_threads() {
        let placement = Placement::new(1);

        let mut global_rings = HashMap::new();
        global_rings.insert(Tier::Memory, ring_of(&[("a", 0), ("b", 0)]));
        let mut local_rings = HashMap::new();
        let mut local = LocalHashRing::default();
        local.insert_thread(0);
        local.insert_thread(1);
        local_rings.insert(Tier::Memory, local);

        let mut replication_map = HashMap::new();
        replication_map.insert("k".into(), KeyReplication::new(2, 0, 2, 0));

        match placement.resolve(
            &key("k"),
            &[Tier::Memory],
            &global_rings,
            &local_rings,
            &replication_map,
        ) {
            Resolution::Ready(threads) => {
                assert_eq!(threads.len(), 4);
                let distinct: HashSet<_> = threads.iter().collect();
                assert_eq!(distinct.len(), 4);
            }
            Resolution::AwaitingReplication => panic!("replication factors are known"),
        }
    }

    #[test]
    fn resolve_unknown_replication_is_not_ready() {
        let placement = Placement::new(1);
        let resolution = placement.resolve(
            &key("unknown"),
            &[Tier::Memory],
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(matches!(resolution, Resolution::AwaitingReplication));
    }

    #[test]
    fn metadata_keys_resolve_without_replication_metadata() {
        let placement = Placement::new(1);
        let global = ring_of(&[("a", 0), ("b", 0)]);
        let mut local = LocalHashRing::default();
        local.insert_thread(0);

        let threads = placement.resolve_metadata(
            &MetadataKey::Replication { key: "k".into() },
            &global,
            &local,
        );
        // fixed global replication of one
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].thread_id, 0);
    }
}
