//! The server node: per-thread state and the main event loop.

use self::{cache::CacheTracker, report::Reporter};
use crate::{
    config::Config,
    messages::{
        ClusterMembership, JoinMessage, KeyRequest, KeyResponse, Notify,
        ReplicationFactorUpdate, ResponseType, SelfDepart, Tier,
    },
    metadata::TierMetadata,
    nodes::{request_cluster_info, request_join_count},
    placement::{GlobalHashRing, KeyReplication, LocalHashRing, Placement, Resolution},
    store::{KeyProperty, SerializerRegistry, StoredKeyMap},
    topics::{MonitoringThread, RoutingThread, ServerThread},
    ClientKey, Key, KvError, LatticeValue, ZenohValueAsString, ALL_TIERS,
};
use eyre::{bail, eyre, Context};
use futures::{future::FusedFuture, Future, FutureExt, StreamExt};
use std::{
    collections::{HashMap, HashSet},
    mem,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

pub use self::gossip::{GOSSIP_PERIOD, REPORT_PERIOD};

mod cache;
mod gossip;
mod handlers;
mod report;

/// Storage root of disk-tier backends; each worker thread owns the
/// subdirectory named after its thread ID.
const DISK_STORAGE_ROOT: &str = "/tmp/strata/disk";

/// Starts a server node with one event-loop thread per configured worker.
///
/// The tier is selected through the `SERVER_TYPE` environment variable
/// (`memory` or `ebs`); starting without it runs the node in memory mode.
/// Blocks until a thread fails or the node departs.
pub fn run(
    config: &Config,
    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,
) -> eyre::Result<()> {
    let self_tier = match std::env::var("SERVER_TYPE").as_deref() {
        Ok("memory") => Tier::Memory,
        Ok("ebs") => Tier::Disk,
        Ok(other) => bail!(
            "unrecognized server type `{}`; valid types are `memory` and `ebs`",
            other
        ),
        Err(std::env::VarError::NotPresent) => {
            log::info!("no server type specified, defaulting to memory mode");
            Tier::Memory
        }
        Err(std::env::VarError::NotUnicode(_)) => bail!("SERVER_TYPE is not valid unicode"),
    };

    let mut tier_metadata = HashMap::new();
    tier_metadata.insert(
        Tier::Memory,
        TierMetadata {
            thread_count: config.threads.memory,
            default_replication: config.replication.memory,
            node_capacity: config.capacities.memory_cap * 1_000_000,
        },
    );
    tier_metadata.insert(
        Tier::Disk,
        TierMetadata {
            thread_count: config.threads.ebs,
            default_replication: config.replication.ebs,
            node_capacity: config.capacities.ebs_cap * 1_000_000,
        },
    );

    let thread_count = tier_metadata[&self_tier].thread_count;

    let node_id = format!("server-{}", uuid::Uuid::new_v4());
    log::info!("node {} starting up", node_id);

    let config_data = ConfigData {
        self_tier,
        thread_count,
        default_local_replication: config.replication.local,
        tier_metadata,
        management_id: config.server.management_id().map(|id| id.to_owned()),
        monitoring_ids: config.server.monitoring.clone(),
        extra_routing_ids: config.server.routing.clone(),
        disk_root: PathBuf::from(DISK_STORAGE_ROOT),
    };

    // every worker thread runs its own cooperative event loop; the scoped
    // spawn is needed because the zenoh session is borrowed
    crossbeam_utils::thread::scope(|scope| {
        let (shutdown_tx, shutdown) = smol::channel::unbounded::<()>();
        let (error_tx, thread_errors) = smol::channel::unbounded();

        for thread_id in 0..thread_count {
            let config_data = config_data.clone();
            let zenoh = zenoh.clone();
            let zenoh_prefix = zenoh_prefix.clone();
            let node_id = node_id.clone();
            let error_tx = error_tx.clone();
            let mut shutdown = shutdown.clone();

            let task = async move {
                let node =
                    ServerNode::init(node_id.clone(), thread_id, config_data, zenoh, zenoh_prefix)
                        .await?;
                node.run(shutdown.next().map(|_| ()))
                    .await
                    .with_context(|| format!("server thread {}/{} failed", node_id, thread_id))
            };
            scope.spawn(move |_| {
                smol::block_on(async {
                    match task.await {
                        Ok(()) => {}
                        Err(err) => {
                            let _ = error_tx.send(err).await;
                        }
                    }
                })
            });
        }

        mem::drop(error_tx);
        mem::drop(shutdown);

        smol::block_on(thread_errors.recv().map(|result| match result {
            Ok(error) => {
                shutdown_tx.close();
                Err(error)
            }
            // all threads exited cleanly (self-depart)
            Err(smol::channel::RecvError) => Ok(()),
        }))
    })
    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))?;

    Ok(())
}

/// The configuration slice each worker thread keeps.
#[derive(Debug, Clone)]
pub struct ConfigData {
    /// The tier this node runs in.
    pub self_tier: Tier,
    /// Worker threads on this node.
    pub thread_count: u32,
    /// Default thread-level replication factor.
    pub default_local_replication: usize,
    /// Static descriptions of all tiers.
    pub tier_metadata: HashMap<Tier, TierMetadata>,
    /// ID of the management node, if one is configured.
    pub management_id: Option<String>,
    /// IDs of the monitoring nodes to notify about membership changes.
    pub monitoring_ids: Vec<String>,
    /// Routing nodes to announce to in addition to the membership snapshot.
    pub extra_routing_ids: Vec<String>,
    /// Storage root for disk-tier backends.
    pub disk_root: PathBuf,
}

/// One worker thread of a server node.
///
/// All fields are thread-private; threads coordinate exclusively through
/// messages, exactly like threads of different nodes do.
pub struct ServerNode {
    node_id: String,
    thread_id: u32,
    /// Incarnation number; non-zero after restarts under a management plane.
    self_join_count: u32,
    /// This thread's own cluster-wide identity.
    wt: ServerThread,

    /// Cluster snapshot received from the seed node at startup.
    membership: ClusterMembership,
    config_data: ConfigData,

    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,

    /// Node placement per tier.
    global_hash_rings: HashMap<Tier, GlobalHashRing>,
    /// Thread placement per tier.
    local_hash_rings: HashMap<Tier, LocalHashRing>,
    placement: Placement,

    /// Value storage, one backend per lattice type.
    serializers: SerializerRegistry,
    /// Size and lattice type of every key materialized on this thread.
    stored_keys: StoredKeyMap,

    /// Cached replication factors.
    key_replication_map: HashMap<ClientKey, KeyReplication>,

    /// Requests parked until a replication-factor lookup answers.
    pending_requests: HashMap<Key, Vec<PendingRequest>>,
    /// Inbound gossip parked until a replication-factor lookup answers.
    pending_gossip: HashMap<Key, Vec<PendingGossip>>,

    /// Keys mutated since the last outbound gossip round.
    local_changeset: HashSet<Key>,

    /// Keys to hand to specific peers after a node join, drained in bounded
    /// slices per event-loop tick.
    join_gossip_map: HashMap<String, HashSet<Key>>,
    /// Keys to delete locally once `join_gossip_map` is fully drained.
    join_remove_set: HashSet<Key>,

    /// Function-executor caches and the keys they hold.
    cache_tracker: CacheTracker,

    /// Statistics collection for the periodic reports.
    reporter: Reporter,

    /// Start of the current gossip period.
    gossip_start: Instant,

    /// Monotonic counter for locally generated request IDs.
    request_id: u32,
}

impl ServerNode {
    /// Fetches the cluster snapshot and restart count, then builds the node.
    pub async fn init(
        node_id: String,
        thread_id: u32,
        config_data: ConfigData,
        zenoh: Arc<zenoh::Session>,
        zenoh_prefix: String,
    ) -> eyre::Result<ServerNode> {
        let membership = request_cluster_info(&zenoh, &zenoh_prefix).await?;

        let self_join_count = match &config_data.management_id {
            Some(management_id) => {
                request_join_count(&zenoh, &zenoh_prefix, management_id, &node_id).await?
            }
            None => 0,
        };

        Self::new(
            node_id,
            thread_id,
            self_join_count,
            membership,
            config_data,
            zenoh,
            zenoh_prefix,
        )
    }

    /// Builds the node from an already-known cluster snapshot.
    fn new(
        node_id: String,
        thread_id: u32,
        self_join_count: u32,
        membership: ClusterMembership,
        config_data: ConfigData,
        zenoh: Arc<zenoh::Session>,
        zenoh_prefix: String,
    ) -> eyre::Result<ServerNode> {
        let serializers = match config_data.self_tier {
            Tier::Memory => SerializerRegistry::memory(),
            Tier::Disk => SerializerRegistry::disk(&config_data.disk_root, thread_id)?,
            Tier::Routing => bail!("a server node cannot run in the routing tier"),
        };

        let mut node = ServerNode {
            wt: ServerThread::new(node_id.clone(), thread_id),
            node_id,
            thread_id,
            self_join_count,
            membership,
            placement: Placement::new(config_data.default_local_replication),
            reporter: Reporter::new(config_data.management_id.clone()),
            config_data,
            zenoh,
            zenoh_prefix,
            global_hash_rings: Default::default(),
            local_hash_rings: Default::default(),
            serializers,
            stored_keys: Default::default(),
            key_replication_map: Default::default(),
            pending_requests: Default::default(),
            pending_gossip: Default::default(),
            local_changeset: Default::default(),
            join_gossip_map: Default::default(),
            join_remove_set: Default::default(),
            cache_tracker: Default::default(),
            gossip_start: Instant::now(),
            request_id: 0,
        };

        for tier in &node.membership.tiers {
            let ring = node.global_hash_rings.entry(tier.tier).or_default();
            for server in &tier.servers {
                ring.insert_node(server.clone(), 0);
            }
        }
        node.global_hash_rings
            .entry(node.config_data.self_tier)
            .or_default()
            .insert_node(node.node_id.clone(), node.self_join_count);

        for (&tier, tier_meta) in &node.config_data.tier_metadata {
            let ring = node.local_hash_rings.entry(tier).or_default();
            for thread_id in 0..tier_meta.thread_count {
                ring.insert_thread(thread_id);
            }
        }

        Ok(node)
    }

    /// Runs the event loop until self-depart or until `shutdown` fires.
    pub async fn run(
        mut self,
        mut shutdown: impl Future<Output = ()> + FusedFuture + Unpin,
    ) -> eyre::Result<()> {
        if self.thread_id == 0 {
            self.announce_join().await?;
        }

        let zenoh = self.zenoh.clone();

        let mut join_subscriber = zenoh
            .subscribe(&self.wt.node_join_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the node join topic")?;
        let mut join_stream = join_subscriber.receiver().fuse();

        let mut depart_subscriber = zenoh
            .subscribe(&self.wt.node_depart_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the node depart topic")?;
        let mut depart_stream = depart_subscriber.receiver().fuse();

        let mut self_depart_subscriber = zenoh
            .subscribe(&self.wt.self_depart_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the self depart topic")?;
        let mut self_depart_stream = self_depart_subscriber.receiver().fuse();

        let mut request_subscriber = zenoh
            .subscribe(&self.wt.request_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the request topic")?;
        let mut request_stream = request_subscriber.receiver().fuse();

        let mut gossip_subscriber = zenoh
            .subscribe(&self.wt.gossip_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the gossip topic")?;
        let mut gossip_stream = gossip_subscriber.receiver().fuse();

        let mut replication_response_subscriber = zenoh
            .subscribe(&self.wt.replication_response_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the replication response topic")?;
        let mut replication_response_stream = replication_response_subscriber.receiver().fuse();

        let mut replication_change_subscriber = zenoh
            .subscribe(&self.wt.replication_change_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the replication change topic")?;
        let mut replication_change_stream = replication_change_subscriber.receiver().fuse();

        let mut cache_keys_subscriber = zenoh
            .subscribe(&self.wt.cache_keys_response_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the cache keys topic")?;
        let mut cache_keys_stream = cache_keys_subscriber.receiver().fuse();

        let mut management_subscriber = zenoh
            .subscribe(&self.wt.management_response_topic(&self.zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to subscribe to the management response topic")?;
        let mut management_stream = management_subscriber.receiver().fuse();

        // the tick keeps gossip, reports, and the join drain moving when no
        // messages arrive
        let mut tick = futures_timer::Delay::new(gossip::TICK_INTERVAL).fuse();

        loop {
            futures::select! {
                sample = join_stream.select_next_some() => {
                    let message: JoinMessage =
                        serde_json::from_str(&sample.value.as_string()?)
                            .context("failed to deserialize JoinMessage")?;
                    self.node_join_handler(message)
                        .await
                        .context("failed to handle node join")?;
                }
                sample = depart_stream.select_next_some() => {
                    let message = serde_json::from_str(&sample.value.as_string()?)
                        .context("failed to deserialize Departed message")?;
                    self.node_depart_handler(message)
                        .await
                        .context("failed to handle node departure")?;
                }
                sample = self_depart_stream.select_next_some() => {
                    let message: SelfDepart =
                        serde_json::from_str(&sample.value.as_string()?)
                            .context("failed to deserialize SelfDepart message")?;
                    self.self_depart_handler(message)
                        .await
                        .context("failed to handle self depart")?;
                    // terminal: the node has left the cluster
                    return Ok(());
                }
                sample = request_stream.select_next_some() => {
                    let request: KeyRequest =
                        serde_json::from_str(&sample.value.as_string()?)
                            .context("failed to deserialize KeyRequest")?;
                    self.request_handler(request)
                        .await
                        .context("failed to handle request")?;
                }
                sample = gossip_stream.select_next_some() => {
                    let gossip: KeyRequest =
                        serde_json::from_str(&sample.value.as_string()?)
                            .context("failed to deserialize gossip batch")?;
                    self.gossip_handler(gossip)
                        .await
                        .context("failed to handle gossip")?;
                }
                sample = replication_response_stream.select_next_some() => {
                    let response: KeyResponse =
                        serde_json::from_str(&sample.value.as_string()?)
                            .context("failed to deserialize replication response")?;
                    self.replication_response_handler(response)
                        .await
                        .context("failed to handle replication response")?;
                }
                sample = replication_change_stream.select_next_some() => {
                    let update: ReplicationFactorUpdate =
                        serde_json::from_str(&sample.value.as_string()?)
                            .context("failed to deserialize ReplicationFactorUpdate")?;
                    self.replication_change_handler(update)
                        .await
                        .context("failed to handle replication change")?;
                }
                sample = cache_keys_stream.select_next_some() => {
                    let response: KeyResponse =
                        serde_json::from_str(&sample.value.as_string()?)
                            .context("failed to deserialize cache keys response")?;
                    self.cache_keys_handler(response)
                        .await
                        .context("failed to handle cache keys response")?;
                }
                sample = management_stream.select_next_some() => {
                    let nodes = serde_json::from_str(&sample.value.as_string()?)
                        .context("failed to deserialize management NodeSet")?;
                    self.management_response_handler(nodes)
                        .await
                        .context("failed to handle management response")?;
                }
                () = &mut tick => {
                    tick = futures_timer::Delay::new(gossip::TICK_INTERVAL).fuse();
                }
                () = shutdown => return Ok(()),
                complete => return Ok(()),
            }

            self.periodic_tasks()
                .await
                .context("failed to run periodic tasks")?;
        }
    }

    /// Thread 0 announces this node to every known peer, routing node, and
    /// monitoring node.
    async fn announce_join(&self) -> eyre::Result<()> {
        let join_message = JoinMessage {
            tier: self.config_data.self_tier,
            node_id: self.node_id.clone(),
            join_count: self.self_join_count,
        };

        for ring in self.global_hash_rings.values() {
            for node_id in ring.nodes() {
                if node_id != self.node_id {
                    self.publish(
                        &ServerThread::new(node_id.to_owned(), 0)
                            .node_join_topic(&self.zenoh_prefix),
                        &join_message,
                    )
                    .await
                    .context("failed to announce join to a server node")?;
                }
            }
        }

        let notify = Notify::Join(join_message);
        for routing_id in self.routing_node_ids() {
            self.publish(
                &RoutingThread::new(routing_id, 0).notify_topic(&self.zenoh_prefix),
                &notify,
            )
            .await
            .context("failed to announce join to a routing node")?;
        }
        for monitoring_id in &self.config_data.monitoring_ids {
            self.publish(
                &MonitoringThread::new(monitoring_id.clone()).notify_topic(&self.zenoh_prefix),
                &notify,
            )
            .await
            .context("failed to announce join to a monitoring node")?;
        }

        Ok(())
    }

    /// The routing nodes from the cluster snapshot plus the configured
    /// extras, deduplicated.
    fn routing_node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.membership.routing_node_ids.clone();
        for extra in &self.config_data.extra_routing_ids {
            if !ids.contains(extra) {
                ids.push(extra.clone());
            }
        }
        ids
    }

    /// Serializes a message and publishes it to the given topic.
    async fn publish<T: serde::Serialize>(&self, topic: &str, message: &T) -> eyre::Result<()> {
        let serialized = serde_json::to_string(message).context("failed to serialize message")?;
        self.zenoh
            .put(topic, serialized)
            .await
            .map_err(|e| eyre!(e))
            .with_context(|| format!("failed to publish to `{}`", topic))
    }

    /// Resolves the responsible threads of `key` across `tiers`.
    ///
    /// Returns `None` after issuing a replication-factor lookup if the key's
    /// replication is not cached yet; the caller must park its work in the
    /// matching pending queue.
    async fn try_responsible_threads(
        &self,
        key: &Key,
        tiers: &[Tier],
    ) -> eyre::Result<Option<Vec<ServerThread>>> {
        match self.placement.resolve(
            key,
            tiers,
            &self.global_hash_rings,
            &self.local_hash_rings,
            &self.key_replication_map,
        ) {
            Resolution::Ready(threads) => Ok(Some(threads)),
            Resolution::AwaitingReplication => {
                let client_key = match key {
                    Key::Client(key) => key.clone(),
                    Key::Metadata(_) => unreachable!("metadata keys always resolve"),
                };
                self.refresh_replication_factor(client_key)
                    .await
                    .context("failed to issue replication factor lookup")?;
                Ok(None)
            }
        }
    }

    /// Issues a replication-factor lookup for `key`; the answer arrives on
    /// this thread's replication-response topic.
    async fn refresh_replication_factor(&self, key: ClientKey) -> eyre::Result<()> {
        let empty_global = GlobalHashRing::default();
        let empty_local = LocalHashRing::default();
        self.placement
            .request_replication_factor(
                self.wt.replication_response_topic(&self.zenoh_prefix),
                key,
                self.global_hash_rings
                    .get(&Tier::Memory)
                    .unwrap_or(&empty_global),
                self.local_hash_rings
                    .get(&Tier::Memory)
                    .unwrap_or(&empty_local),
                &self.zenoh,
                &self.zenoh_prefix,
            )
            .await
    }

    /// Seeds the replication factors of a key with the configured defaults.
    fn init_replication(&mut self, key: ClientKey) {
        let entry = self.key_replication_map.entry(key).or_default();
        for &tier in ALL_TIERS {
            let default_replication = self
                .config_data
                .tier_metadata
                .get(&tier)
                .map(|meta| meta.default_replication)
                .unwrap_or_default();
            entry.global.insert(tier, default_replication);
            entry
                .local
                .insert(tier, self.config_data.default_local_replication);
        }
    }

    /// Reads the current value and size of a key from its backend.
    fn value_of(&self, key: &Key) -> eyre::Result<Option<(LatticeValue, usize)>> {
        match self.stored_keys.get(key) {
            Some(property) => self.serializers.get(property.lattice_type, key),
            None => Ok(None),
        }
    }

    /// Merges a value into a key's backend and updates the key property.
    ///
    /// The outer `Result` is an internal failure (e.g. disk I/O); the inner
    /// one reports a lattice-type conflict without mutating anything.
    fn merge_value(
        &mut self,
        key: &Key,
        value: &LatticeValue,
    ) -> eyre::Result<Result<LatticeValue, KvError>> {
        if let Some(property) = self.stored_keys.get(key) {
            if property.lattice_type != value.ty() {
                return Ok(Err(KvError::LatticeTypeMismatch));
            }
        }

        let (merged, size) = self.serializers.put(key, value)?;
        self.stored_keys.insert(
            key.clone(),
            KeyProperty {
                size,
                lattice_type: value.ty(),
            },
        );
        Ok(Ok(merged))
    }

    /// Deletes a key from its backend, the key index, and the changeset.
    fn remove_value(&mut self, key: &Key) -> eyre::Result<()> {
        if let Some(property) = self.stored_keys.remove(key) {
            self.serializers.remove(property.lattice_type, key)?;
        }
        self.local_changeset.remove(key);
        Ok(())
    }

    /// A fresh locally-unique request ID.
    fn next_request_id(&mut self, response_topic: &str) -> String {
        let id = format!("{}:{}", response_topic, self.request_id);
        self.request_id += 1;
        id
    }
}

/// A request parked while its key's replication factors are looked up.
#[derive(Debug)]
struct PendingRequest {
    ty: ResponseType,
    value: Option<LatticeValue>,
    response_address: Option<String>,
    response_id: Option<String>,
}

impl PendingRequest {
    fn new_response(&self) -> KeyResponse {
        KeyResponse {
            response_id: self.response_id.clone(),
            ty: self.ty,
            error: Ok(()),
            tuples: Vec::new(),
        }
    }
}

/// An inbound gossip value parked while its key's replication factors are
/// looked up.
struct PendingGossip {
    value: LatticeValue,
}

#[cfg(test)]
pub(crate) fn server_test_instance(
    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,
) -> ServerNode {
    let mut tier_metadata = HashMap::new();
    tier_metadata.insert(
        Tier::Memory,
        TierMetadata {
            thread_count: 1,
            default_replication: 1,
            node_capacity: 1_000_000,
        },
    );
    tier_metadata.insert(
        Tier::Disk,
        TierMetadata {
            thread_count: 1,
            default_replication: 1,
            node_capacity: 1_000_000,
        },
    );

    let config_data = ConfigData {
        self_tier: Tier::Memory,
        thread_count: 1,
        default_local_replication: 1,
        tier_metadata,
        management_id: None,
        monitoring_ids: Vec::new(),
        extra_routing_ids: Vec::new(),
        disk_root: PathBuf::from(DISK_STORAGE_ROOT),
    };

    let node = ServerNode::new(
        "test-server".to_owned(),
        0,
        0,
        ClusterMembership {
            tiers: Vec::new(),
            routing_node_ids: Vec::new(),
        },
        config_data,
        zenoh,
        zenoh_prefix,
    )
    .expect("failed to build test server");

    // `new` already ringed this node and its threads; nothing else to set up
    node
}
