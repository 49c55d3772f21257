use crate::{
    messages::{KeyOperation, KeyRequest, KeyTuple, RequestOperation},
    nodes::server::{report::EventClass, PendingRequest, ServerNode},
    topics::ServerThread,
    ClientKey, Key, KvError,
};
use eyre::Context;
use std::{collections::HashMap, time::Instant};

impl ServerNode {
    /// Handles a batched GET/PUT request.
    ///
    /// Each operation in the batch is independently resolved: executed here
    /// if this thread is responsible, parked if the key's replication is
    /// still unknown, forwarded to a sibling thread if one is responsible,
    /// and failed with [`KvError::WrongThread`] otherwise.
    pub async fn request_handler(&mut self, request: KeyRequest) -> eyre::Result<()> {
        let work_start = Instant::now();

        let mut response = request.new_response();
        let response_address = request.response_address;
        let response_id = request.request_id;
        let address_cache_size = request.address_cache_size;

        for operation in request.operation.into_operations() {
            let key = operation.key().clone();

            let threads = self
                .try_responsible_threads(&key, &[self.config_data.self_tier])
                .await
                .context("failed to resolve responsible threads")?;

            let threads = match threads {
                Some(threads) => threads,
                None => {
                    // a replication-factor lookup is in flight; the
                    // replication-response handler will drain this queue
                    self.pending_requests
                        .entry(key)
                        .or_default()
                        .push(PendingRequest {
                            ty: operation.response_ty(),
                            value: operation.into_value(),
                            response_address: response_address.clone(),
                            response_id: response_id.clone(),
                        });
                    continue;
                }
            };

            if threads.contains(&self.wt) {
                let tuple =
                    self.execute_operation(&key, operation, &threads, &address_cache_size)?;
                response.tuples.push(tuple);
                self.reporter.record_key_access(&key, Instant::now());
            } else if let Some(sibling) = threads
                .iter()
                .find(|thread| thread.node_id == self.node_id)
            {
                // not this thread, but a sibling on this node owns the key
                self.forward_operation(
                    sibling.clone(),
                    operation,
                    response_address.clone(),
                    response_id.clone(),
                    &address_cache_size,
                )
                .await
                .context("failed to forward the operation to a sibling thread")?;
            } else {
                // the whole node is not responsible; tell the caller to
                // re-resolve the key through the routing tier
                let mut tuple = KeyTuple::new(key);
                tuple.error = Some(KvError::WrongThread);
                tuple.invalidate = true;
                if let KeyOperation::Put(put) = operation {
                    tuple.lattice = Some(put.value);
                }
                response.tuples.push(tuple);
            }
        }

        self.reporter
            .record_event_time(EventClass::Request, work_start.elapsed());

        if let Some(response_address) = response_address {
            if !response.tuples.is_empty() {
                self.publish(&response_address, &response)
                    .await
                    .context("failed to send the response")?;
            }
        }

        Ok(())
    }

    /// Executes one operation this thread is responsible for.
    fn execute_operation(
        &mut self,
        key: &Key,
        operation: KeyOperation,
        responsible_threads: &[ServerThread],
        address_cache_size: &HashMap<ClientKey, usize>,
    ) -> eyre::Result<KeyTuple> {
        let mut tuple = KeyTuple::new(key.clone());

        match operation {
            KeyOperation::Get(_) => match self.value_of(key)? {
                Some((value, _)) => tuple.lattice = Some(value),
                None => tuple.error = Some(KvError::KeyNotFound),
            },
            KeyOperation::Put(put) => match self.merge_value(key, &put.value)? {
                Ok(_) => {
                    self.local_changeset.insert(key.clone());
                    tuple.lattice = Some(put.value);
                }
                Err(error) => tuple.error = Some(error),
            },
        }

        if let Key::Client(client_key) = key {
            if let Some(&cached) = address_cache_size.get(client_key) {
                if cached != responsible_threads.len() {
                    tuple.invalidate = true;
                }
            }
        }

        Ok(tuple)
    }

    /// Re-publishes one operation to a responsible sibling thread, keeping
    /// the caller's response address so the sibling answers directly.
    async fn forward_operation(
        &self,
        target: ServerThread,
        operation: KeyOperation,
        response_address: Option<String>,
        response_id: Option<String>,
        address_cache_size: &HashMap<ClientKey, usize>,
    ) -> eyre::Result<()> {
        let operation = match operation {
            KeyOperation::Get(key) => RequestOperation::Get { keys: vec![key] },
            KeyOperation::Put(tuple) => RequestOperation::Put {
                tuples: vec![tuple],
            },
        };
        let forwarded = KeyRequest {
            request_id: response_id,
            response_address,
            address_cache_size: address_cache_size.clone(),
            operation,
        };
        self.publish(&target.request_topic(&self.zenoh_prefix), &forwarded)
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        lattice::{
            causal::{SingleKeyCausalLattice, VectorClock, VectorClockValuePair},
            last_writer_wins::Timestamp,
            Lattice, LastWriterWinsLattice, MaxLattice, OrderedSetLattice, PriorityLattice,
            SetLattice,
        },
        messages::{KeyRequest, KeyResponse, PutTuple, RequestOperation},
        nodes::server::server_test_instance,
        placement::KeyReplication,
        topics::ClientThread,
        zenoh_test_instance, ClientKey, Key, KvError, LatticeValue, ZenohValueAsString,
    };
    use std::{collections::BTreeSet, time::Duration};
    use zenoh::prelude::{Receiver, ZFuture};

    fn get_request(key: ClientKey, request_id: &str, zenoh_prefix: &str) -> KeyRequest {
        KeyRequest {
            request_id: Some(request_id.to_owned()),
            response_address: Some(
                ClientThread::new("test-client".into(), 0).response_topic(zenoh_prefix),
            ),
            address_cache_size: Default::default(),
            operation: RequestOperation::Get {
                keys: vec![key.into()],
            },
        }
    }

    fn put_request(
        key: ClientKey,
        value: LatticeValue,
        request_id: &str,
        zenoh_prefix: &str,
    ) -> KeyRequest {
        KeyRequest {
            request_id: Some(request_id.to_owned()),
            response_address: Some(
                ClientThread::new("test-client".into(), 0).response_topic(zenoh_prefix),
            ),
            address_cache_size: Default::default(),
            operation: RequestOperation::Put {
                tuples: vec![PutTuple {
                    key: key.into(),
                    value,
                }],
            },
        }
    }

    fn recv_response(subscriber: &mut zenoh::subscriber::Subscriber<'_>) -> KeyResponse {
        let raw = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        serde_json::from_str(&raw.value.as_string().unwrap()).unwrap()
    }

    #[test]
    fn get_of_missing_key_reports_not_found() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/test-client/**", zenoh_prefix))
            .wait()
            .unwrap();

        let mut server = server_test_instance(zenoh.clone(), zenoh_prefix.clone());
        let key: ClientKey = "missing".into();
        server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

        let request = get_request(key.clone(), "req-0", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();

        let response = recv_response(&mut subscriber);
        assert_eq!(response.response_id.as_deref(), Some("req-0"));
        assert_eq!(response.tuples.len(), 1);
        assert_eq!(response.tuples[0].error, Some(KvError::KeyNotFound));
    }

    #[test]
    fn put_then_get_lww() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/test-client/**", zenoh_prefix))
            .wait()
            .unwrap();

        let mut server = server_test_instance(zenoh.clone(), zenoh_prefix.clone());
        let key: ClientKey = "k".into();
        server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

        let value = LastWriterWinsLattice::from_pair(Timestamp::now(), b"v1".to_vec());
        let request = put_request(key.clone(), value.clone().into(), "put-0", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();

        let response = recv_response(&mut subscriber);
        assert_eq!(response.tuples[0].error, None);
        assert_eq!(server.local_changeset.len(), 1);
        assert_eq!(server.reporter.access_count(), 1);

        let request = get_request(key.clone(), "get-0", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();

        let response = recv_response(&mut subscriber);
        assert_eq!(response.tuples[0].error, None);
        assert_eq!(
            response.tuples[0].lattice.as_ref().unwrap().as_lww().unwrap(),
            &value
        );
        assert_eq!(server.reporter.access_count(), 2);
    }

    #[test]
    fn older_timestamp_loses_on_put() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/test-client/**", zenoh_prefix))
            .wait()
            .unwrap();

        let mut server = server_test_instance(zenoh.clone(), zenoh_prefix.clone());
        let key: ClientKey = "k".into();
        server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

        let old_ts = Timestamp::now();
        let new_ts = Timestamp::now();
        let newer = LastWriterWinsLattice::from_pair(new_ts, b"new".to_vec());

        let request = put_request(key.clone(), newer.clone().into(), "put-0", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();
        recv_response(&mut subscriber);

        let request = put_request(
            key.clone(),
            LastWriterWinsLattice::from_pair(old_ts, b"old".to_vec()).into(),
            "put-1",
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(request)).unwrap();
        recv_response(&mut subscriber);

        let request = get_request(key, "get-0", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();
        let response = recv_response(&mut subscriber);
        assert_eq!(
            response.tuples[0]
                .lattice
                .as_ref()
                .unwrap()
                .as_lww()
                .unwrap()
                .reveal()
                .value(),
            b"new"
        );
    }

    #[test]
    fn put_with_conflicting_type_is_rejected() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/test-client/**", zenoh_prefix))
            .wait()
            .unwrap();

        let mut server = server_test_instance(zenoh.clone(), zenoh_prefix.clone());
        let key: ClientKey = "k".into();
        server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

        let lww = LastWriterWinsLattice::from_pair(Timestamp::now(), b"v".to_vec());
        let request = put_request(key.clone(), lww.clone().into(), "put-0", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();
        recv_response(&mut subscriber);

        let mut set = SetLattice::default();
        set.insert(b"a".to_vec());
        let request = put_request(key.clone(), set.into(), "put-1", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();

        let response = recv_response(&mut subscriber);
        assert_eq!(
            response.tuples[0].error,
            Some(KvError::LatticeTypeMismatch)
        );

        // the stored value is unchanged
        let request = get_request(key, "get-0", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();
        let response = recv_response(&mut subscriber);
        assert_eq!(
            response.tuples[0].lattice.as_ref().unwrap().as_lww().unwrap(),
            &lww
        );
    }

    #[test]
    fn put_and_get_remaining_lattice_families() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/test-client/**", zenoh_prefix))
            .wait()
            .unwrap();

        let mut server = server_test_instance(zenoh.clone(), zenoh_prefix.clone());

        let ordered: BTreeSet<Vec<u8>> =
            [b"b".to_vec(), b"a".to_vec()].iter().cloned().collect();
        let causal = {
            let mut clock = VectorClock::default();
            clock.insert("writer".into(), MaxLattice::new(1));
            let mut value = SetLattice::default();
            value.insert(b"x".to_vec());
            SingleKeyCausalLattice::new(VectorClockValuePair::new(clock, value))
        };
        let mut plain_set = SetLattice::default();
        plain_set.insert(b"s".to_vec());

        let values: Vec<(ClientKey, LatticeValue)> = vec![
            ("set-key".into(), plain_set.into()),
            ("ordered-key".into(), OrderedSetLattice::new(ordered).into()),
            ("causal-key".into(), causal.into()),
            (
                "priority-key".into(),
                PriorityLattice::from_pair(2.5, b"p".to_vec()).into(),
            ),
        ];

        for (key, value) in values {
            server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

            let request = put_request(key.clone(), value.clone(), "put", &zenoh_prefix);
            smol::block_on(server.request_handler(request)).unwrap();
            let response = recv_response(&mut subscriber);
            assert_eq!(response.tuples[0].error, None, "put of {} failed", key);

            let request = get_request(key.clone(), "get", &zenoh_prefix);
            smol::block_on(server.request_handler(request)).unwrap();
            let response = recv_response(&mut subscriber);
            assert_eq!(response.tuples[0].lattice.as_ref(), Some(&value));
        }
    }

    #[test]
    fn unknown_replication_parks_the_request() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let mut server = server_test_instance(zenoh, zenoh_prefix.clone());
        let key: ClientKey = "unseen".into();

        // no replication metadata for the key: the handler must park the
        // request instead of answering
        let request = get_request(key.clone(), "req-0", &zenoh_prefix);
        smol::block_on(server.request_handler(request)).unwrap();

        let parked = server.pending_requests.get(&Key::Client(key)).unwrap();
        assert_eq!(parked.len(), 1);
    }

    #[test]
    fn stale_address_cache_is_flagged() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/test-client/**", zenoh_prefix))
            .wait()
            .unwrap();

        let mut server = server_test_instance(zenoh.clone(), zenoh_prefix.clone());
        let key: ClientKey = "k".into();
        server
            .key_replication_map
            .insert(key.clone(), KeyReplication::new(1, 0, 1, 0));

        let mut request = get_request(key.clone(), "req-0", &zenoh_prefix);
        // the client believes three threads serve this key
        request.address_cache_size.insert(key, 3);
        smol::block_on(server.request_handler(request)).unwrap();

        let response = recv_response(&mut subscriber);
        assert!(response.tuples[0].invalidate);
    }
}
