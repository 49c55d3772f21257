use crate::{
    messages::{KeyRequest, PutTuple, RequestOperation},
    nodes::server::{report::EventClass, PendingGossip, ServerNode},
    Key,
};
use eyre::{bail, Context};
use std::{collections::HashMap, time::Instant};

impl ServerNode {
    /// Handles an inbound gossip batch from a peer replica.
    ///
    /// Values for keys this thread owns are merged into the store without
    /// entering the local changeset, so gossip does not echo back and forth.
    /// Metadata gossip for other owners is forwarded; client-key gossip with
    /// unknown replication is parked until the lookup answers.
    pub async fn gossip_handler(&mut self, gossip: KeyRequest) -> eyre::Result<()> {
        let work_start = Instant::now();

        let tuples = match gossip.operation {
            RequestOperation::Put { tuples } => tuples,
            RequestOperation::Get { .. } => bail!("gossip batches must carry PUT semantics"),
        };

        let mut forwarded: HashMap<String, Vec<PutTuple>> = HashMap::new();

        for tuple in tuples {
            let key = tuple.key.clone();
            let threads = self
                .try_responsible_threads(&key, &[self.config_data.self_tier])
                .await
                .context("failed to resolve responsible threads")?;

            match threads {
                Some(threads) => {
                    if threads.contains(&self.wt) {
                        if let Err(error) = self.merge_value(&key, &tuple.value)? {
                            // a replica disagrees about the key's lattice
                            // type; dropping the value keeps us converging
                            // on the established type
                            log::error!("rejected gossip for key {:?}: {}", key, error);
                        }
                    } else {
                        match key {
                            Key::Metadata(_) => {
                                // misrouted metadata gossip is passed on to
                                // the actual owners
                                for thread in threads {
                                    forwarded
                                        .entry(thread.gossip_topic(&self.zenoh_prefix))
                                        .or_default()
                                        .push(tuple.clone());
                                }
                            }
                            Key::Client(client_key) => {
                                // the sender believed we own this key, so
                                // our cached factors may be stale; refresh
                                // them and park the value until the answer
                                self.refresh_replication_factor(client_key.clone())
                                    .await
                                    .context("failed to refresh replication factors")?;
                                self.pending_gossip
                                    .entry(client_key.into())
                                    .or_default()
                                    .push(PendingGossip { value: tuple.value });
                            }
                        }
                    }
                }
                None => {
                    self.pending_gossip
                        .entry(key)
                        .or_default()
                        .push(PendingGossip { value: tuple.value });
                }
            }
        }

        for (topic, tuples) in forwarded {
            let batch = KeyRequest {
                request_id: None,
                response_address: None,
                address_cache_size: Default::default(),
                operation: RequestOperation::Put { tuples },
            };
            self.publish(&topic, &batch)
                .await
                .context("failed to forward gossip")?;
        }

        self.reporter
            .record_event_time(EventClass::Gossip, work_start.elapsed());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        lattice::{last_writer_wins::Timestamp, Lattice, LastWriterWinsLattice},
        messages::{KeyRequest, PutTuple, RequestOperation},
        nodes::server::server_test_instance,
        placement::KeyReplication,
        zenoh_test_instance, ClientKey, Key, LatticeValue,
    };

    fn gossip_batch(key: ClientKey, value: LatticeValue) -> KeyRequest {
        KeyRequest {
            request_id: None,
            response_address: None,
            address_cache_size: Default::default(),
            operation: RequestOperation::Put {
                tuples: vec![PutTuple {
                    key: key.into(),
                    value,
                }],
            },
        }
    }

    #[test]
    fn gossip_creates_the_key() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let mut server = server_test_instance(zenoh, zenoh_prefix);
        let key: ClientKey = "k".into();
        server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

        let value = LastWriterWinsLattice::from_pair(Timestamp::now(), b"v".to_vec());
        let batch = gossip_batch(key.clone(), value.clone().into());
        smol::block_on(server.gossip_handler(batch)).unwrap();

        assert!(server.pending_gossip.is_empty());
        // merged but not re-gossiped
        assert!(server.local_changeset.is_empty());

        let (stored, _) = server.value_of(&key.into()).unwrap().unwrap();
        assert_eq!(stored.as_lww().unwrap(), &value);
    }

    #[test]
    fn gossip_merges_with_the_stored_value() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let mut server = server_test_instance(zenoh, zenoh_prefix);
        let key: ClientKey = "k".into();
        server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

        let old_ts = Timestamp::now();
        let new_ts = Timestamp::now();
        server
            .merge_value(
                &key.clone().into(),
                &LastWriterWinsLattice::from_pair(old_ts, b"old".to_vec()).into(),
            )
            .unwrap()
            .unwrap();

        let batch = gossip_batch(
            key.clone(),
            LastWriterWinsLattice::from_pair(new_ts, b"new".to_vec()).into(),
        );
        smol::block_on(server.gossip_handler(batch)).unwrap();

        let (stored, _) = server.value_of(&key.into()).unwrap().unwrap();
        assert_eq!(stored.as_lww().unwrap().reveal().value(), b"new");
    }

    #[test]
    fn replaying_gossip_changes_nothing() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let mut server = server_test_instance(zenoh, zenoh_prefix);
        let key: ClientKey = "k".into();
        server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

        let value: LatticeValue =
            LastWriterWinsLattice::from_pair(Timestamp::now(), b"v".to_vec()).into();
        let batch = gossip_batch(key.clone(), value.clone());
        smol::block_on(server.gossip_handler(batch.clone())).unwrap();
        let (after_first, _) = server.value_of(&key.clone().into()).unwrap().unwrap();

        smol::block_on(server.gossip_handler(batch)).unwrap();
        let (after_replay, _) = server.value_of(&key.into()).unwrap().unwrap();

        assert_eq!(after_first, after_replay);
    }

    #[test]
    fn unknown_replication_parks_the_gossip() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let mut server = server_test_instance(zenoh, zenoh_prefix);
        let key: ClientKey = "unseen".into();

        let batch = gossip_batch(
            key.clone(),
            LastWriterWinsLattice::new_now(b"v".to_vec()).into(),
        );
        smol::block_on(server.gossip_handler(batch)).unwrap();

        assert_eq!(
            server
                .pending_gossip
                .get(&Key::Client(key))
                .map(|pending| pending.len()),
            Some(1)
        );
    }
}
