//! End-to-end test of two server threads converging through gossip.

use pretty_assertions::assert_eq;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use strata::{
    lattice::{last_writer_wins::Timestamp, Lattice, LastWriterWinsLattice},
    messages::{
        ClusterMembership, KeyRequest, KeyResponse, PutTuple, RequestOperation, Tier,
        TierMembership,
    },
    metadata::TierMetadata,
    nodes::server::{ConfigData, ServerNode},
    topics::{ClientThread, RoutingThread, ServerThread},
    zenoh_test_instance, ClientKey, LatticeValue, ZenohValueAsString,
};
use zenoh::prelude::{Receiver, Sample, ZFuture};

fn config_data() -> ConfigData {
    let mut tier_metadata = HashMap::new();
    tier_metadata.insert(
        Tier::Memory,
        TierMetadata {
            thread_count: 1,
            default_replication: 2,
            node_capacity: 1_000_000,
        },
    );
    tier_metadata.insert(
        Tier::Disk,
        TierMetadata {
            thread_count: 1,
            default_replication: 0,
            node_capacity: 1_000_000,
        },
    );

    ConfigData {
        self_tier: Tier::Memory,
        thread_count: 1,
        default_local_replication: 1,
        tier_metadata,
        management_id: None,
        monitoring_ids: Vec::new(),
        extra_routing_ids: Vec::new(),
        disk_root: PathBuf::from("/tmp/strata-test/disk"),
    }
}

/// Answers seed queries with a fixed two-node membership, like a routing
/// node would.
fn spawn_seed_stub(zenoh: Arc<zenoh::Session>, zenoh_prefix: String) {
    thread::spawn(move || {
        let membership = ClusterMembership {
            tiers: vec![TierMembership {
                tier: Tier::Memory,
                servers: vec!["node-a".to_owned(), "node-b".to_owned()],
            }],
            routing_node_ids: Vec::new(),
        };
        let serialized = serde_json::to_string(&membership).unwrap();

        let mut queryable = zenoh
            .queryable(&RoutingThread::seed_topic(&zenoh_prefix))
            .wait()
            .unwrap();
        while let Ok(query) = queryable.receiver().recv() {
            smol::block_on(query.reply_async(Sample::new(
                query.key_selector().to_owned(),
                serialized.as_str(),
            )));
        }
    });
}

fn spawn_server(zenoh: Arc<zenoh::Session>, zenoh_prefix: String, node_id: &str) {
    let node_id = node_id.to_owned();
    thread::spawn(move || {
        smol::block_on(async {
            let node = ServerNode::init(node_id, 0, config_data(), zenoh, zenoh_prefix)
                .await
                .expect("failed to init server node");
            node.run(futures::future::pending::<()>())
                .await
                .expect("server node failed");
        })
    });
}

fn put(
    zenoh: &zenoh::Session,
    zenoh_prefix: &str,
    target: &ServerThread,
    key: &ClientKey,
    value: LatticeValue,
    request_id: &str,
) {
    let request = KeyRequest {
        request_id: Some(request_id.to_owned()),
        response_address: Some(
            ClientThread::new("convergence-client".into(), 0).response_topic(zenoh_prefix),
        ),
        address_cache_size: Default::default(),
        operation: RequestOperation::Put {
            tuples: vec![PutTuple {
                key: key.clone().into(),
                value,
            }],
        },
    };
    let serialized = serde_json::to_string(&request).unwrap();
    zenoh
        .put(&target.request_topic(zenoh_prefix), serialized)
        .wait()
        .unwrap();
}

fn get(
    zenoh: &zenoh::Session,
    zenoh_prefix: &str,
    target: &ServerThread,
    key: &ClientKey,
    request_id: &str,
) {
    let request = KeyRequest {
        request_id: Some(request_id.to_owned()),
        response_address: Some(
            ClientThread::new("convergence-client".into(), 0).response_topic(zenoh_prefix),
        ),
        address_cache_size: Default::default(),
        operation: RequestOperation::Get {
            keys: vec![key.clone().into()],
        },
    };
    let serialized = serde_json::to_string(&request).unwrap();
    zenoh
        .put(&target.request_topic(zenoh_prefix), serialized)
        .wait()
        .unwrap();
}

#[test]
fn concurrent_writes_converge_on_both_replicas() {
    let zenoh = zenoh_test_instance();
    let zenoh_prefix = uuid::Uuid::new_v4().to_string();

    spawn_seed_stub(zenoh.clone(), zenoh_prefix.clone());
    spawn_server(zenoh.clone(), zenoh_prefix.clone(), "node-a");
    spawn_server(zenoh.clone(), zenoh_prefix.clone(), "node-b");

    let client = ClientThread::new("convergence-client".into(), 0);
    let mut subscriber = zenoh
        .subscribe(&client.response_topic(&zenoh_prefix))
        .wait()
        .unwrap();

    let node_a = ServerThread::new("node-a".into(), 0);
    let node_b = ServerThread::new("node-b".into(), 0);
    let key: ClientKey = "converging-key".into();

    // two concurrent writes with distinct timestamps, one per node
    let older = Timestamp::now();
    let newer = Timestamp::now();
    put(
        &zenoh,
        &zenoh_prefix,
        &node_a,
        &key,
        LastWriterWinsLattice::from_pair(older, b"a".to_vec()).into(),
        "put-a",
    );
    put(
        &zenoh,
        &zenoh_prefix,
        &node_b,
        &key,
        LastWriterWinsLattice::from_pair(newer, b"b".to_vec()).into(),
        "put-b",
    );

    // both replicas must end up with the newer value
    for target in [&node_a, &node_b].iter().copied() {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            assert!(
                Instant::now() < deadline,
                "replica {:?} did not converge in time",
                target.node_id
            );

            get(&zenoh, &zenoh_prefix, target, &key, "poll");
            let raw = match subscriber
                .receiver()
                .recv_timeout(Duration::from_secs(2))
            {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let response: KeyResponse =
                serde_json::from_str(&raw.value.as_string().unwrap()).unwrap();
            if response.response_id.as_deref() != Some("poll") {
                continue;
            }

            let tuple = &response.tuples[0];
            if tuple.error.is_none() {
                let stored = tuple.lattice.as_ref().unwrap().as_lww().unwrap();
                if stored.reveal().value() == b"b" {
                    assert_eq!(stored.reveal().timestamp(), newer);
                    break;
                }
            }

            thread::sleep(Duration::from_millis(200));
        }
    }
}
