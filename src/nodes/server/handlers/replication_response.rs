use crate::{
    lattice::Lattice,
    messages::{
        KeyRequest, KeyResponse, KeyTuple, PutTuple, ReplicationFactor, RequestOperation,
        ResponseType,
    },
    metadata::MetadataKey,
    nodes::server::{report::EventClass, ServerNode},
    Key, KvError,
};
use eyre::{anyhow, bail, Context};
use std::{collections::HashMap, time::Instant};

impl ServerNode {
    /// Handles the answer to a replication-factor lookup.
    ///
    /// Updates the cached factors (falling back to the configured defaults
    /// when no factors are stored yet), then drains the requests and gossip
    /// parked on the key.
    pub async fn replication_response_handler(
        &mut self,
        response: KeyResponse,
    ) -> eyre::Result<()> {
        let work_start = Instant::now();

        if response.error.is_err() || response.ty != ResponseType::Get {
            bail!("malformed replication-factor response");
        }
        let tuple = match response.tuples.as_slice() {
            [tuple] => tuple,
            other => bail!("expected a single response tuple, got {} of them", other.len()),
        };
        let key = match &tuple.key {
            Key::Metadata(MetadataKey::Replication { key }) => key.clone(),
            other => bail!("expected a replication metadata key, got {:?}", other),
        };

        match tuple.error {
            None => {
                let lww = tuple
                    .lattice
                    .as_ref()
                    .ok_or_else(|| anyhow!("replication response carries no value"))?
                    .as_lww()?;
                let factors: ReplicationFactor =
                    serde_json::from_slice(lww.reveal().value().as_slice())
                        .context("failed to decode stored replication factors")?;

                let entry = self.key_replication_map.entry(key.clone()).or_default();
                for global in &factors.global {
                    entry.global.insert(global.tier, global.value);
                }
                for local in &factors.local {
                    entry.local.insert(local.tier, local.value);
                }
            }
            Some(KvError::KeyNotFound) => {
                // the metadata owner has nothing stored for this key, which
                // simply means nobody changed the factors yet
                self.init_replication(key.clone());
            }
            Some(KvError::WrongThread) => {
                // the metadata moved; ask again at the current owner
                self.refresh_replication_factor(key)
                    .await
                    .context("failed to re-issue the replication lookup")?;
                return Ok(());
            }
            Some(error) => bail!("unexpected replication response error {:?}", error),
        }

        let key = Key::from(key);
        self.drain_pending_requests(&key)
            .await
            .context("failed to drain pending requests")?;
        self.drain_pending_gossip(&key)
            .await
            .context("failed to drain pending gossip")?;

        self.reporter
            .record_event_time(EventClass::ReplicationResponse, work_start.elapsed());

        Ok(())
    }

    /// Serves the requests that were parked while the key's replication
    /// factors were unknown.
    async fn drain_pending_requests(&mut self, key: &Key) -> eyre::Result<()> {
        let parked = match self.pending_requests.remove(key) {
            Some(parked) => parked,
            None => return Ok(()),
        };

        let threads = self
            .try_responsible_threads(key, &[self.config_data.self_tier])
            .await
            .context("failed to resolve responsible threads")?;
        let threads = match threads {
            Some(threads) => threads,
            None => {
                log::error!("replication factors still missing while draining requests");
                return Ok(());
            }
        };
        let responsible = threads.contains(&self.wt);

        for request in parked {
            let now = Instant::now();

            if let Some(response_address) = &request.response_address {
                let mut response = request.new_response();
                let mut tuple = KeyTuple::new(key.clone());

                if responsible {
                    match request.ty {
                        ResponseType::Get => match self.value_of(key)? {
                            Some((value, _)) => tuple.lattice = Some(value),
                            None => tuple.error = Some(KvError::KeyNotFound),
                        },
                        ResponseType::Put => {
                            let value = request
                                .value
                                .ok_or_else(|| anyhow!("parked PUT carries no value"))?;
                            match self.merge_value(key, &value)? {
                                Ok(_) => {
                                    self.local_changeset.insert(key.clone());
                                    tuple.lattice = Some(value);
                                }
                                Err(error) => tuple.error = Some(error),
                            }
                        }
                    }
                    self.reporter.record_key_access(key, now);
                } else {
                    tuple.error = Some(KvError::WrongThread);
                    tuple.invalidate = true;
                }

                response.tuples.push(tuple);
                self.publish(response_address, &response)
                    .await
                    .context("failed to answer a parked request")?;
            } else if responsible {
                // fire-and-forget writes (e.g. reports) have no response
                // address but still need to be applied
                match (request.ty, request.value) {
                    (ResponseType::Put, Some(value)) => {
                        match self.merge_value(key, &value)? {
                            Ok(_) => {
                                self.local_changeset.insert(key.clone());
                                self.reporter.record_key_access(key, now);
                            }
                            Err(error) => {
                                log::error!("rejected parked write for {:?}: {}", key, error);
                            }
                        }
                    }
                    (ResponseType::Put, None) => {
                        log::error!("parked PUT for {:?} carries no value", key);
                    }
                    (ResponseType::Get, _) => {
                        log::error!("parked GET for {:?} has no response address", key);
                    }
                }
            }
        }

        Ok(())
    }

    /// Merges or forwards the gossip that was parked while the key's
    /// replication factors were unknown.
    async fn drain_pending_gossip(&mut self, key: &Key) -> eyre::Result<()> {
        let parked = match self.pending_gossip.remove(key) {
            Some(parked) => parked,
            None => return Ok(()),
        };

        let threads = self
            .try_responsible_threads(key, &[self.config_data.self_tier])
            .await
            .context("failed to resolve responsible threads")?;
        let threads = match threads {
            Some(threads) => threads,
            None => {
                log::error!("replication factors still missing while draining gossip");
                return Ok(());
            }
        };

        if threads.contains(&self.wt) {
            for gossip in parked {
                if let Err(error) = self.merge_value(key, &gossip.value)? {
                    log::error!("rejected parked gossip for {:?}: {}", key, error);
                }
            }
        } else {
            // hand the parked values to the actual owners
            let mut forwarded: HashMap<String, Vec<PutTuple>> = HashMap::new();
            for gossip in parked {
                for thread in &threads {
                    forwarded
                        .entry(thread.gossip_topic(&self.zenoh_prefix))
                        .or_default()
                        .push(PutTuple {
                            key: key.clone(),
                            value: gossip.value.clone(),
                        });
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
                    .context("failed to forward parked gossip")?;
            }
        }

        Ok(())
    }
}
