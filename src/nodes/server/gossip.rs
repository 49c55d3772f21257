//! Outbound gossip, statistics reporting, and post-join data redistribution.

use super::{report::EventClass, ServerNode};
use crate::{
    messages::{
        stats::{KeySize, KeySizeSnapshot},
        KeyRequest, PutTuple, RequestOperation, Tier,
    },
    topics::CacheThread,
    ClientKey, Key, ALL_TIERS,
};
use eyre::Context;
use rand::prelude::SliceRandom;
use std::{
    collections::{HashMap, HashSet},
    convert::TryFrom,
    time::{Duration, Instant},
};

/// How often the event loop wakes up without messages.
pub(super) const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum time between two outbound gossip rounds.
pub const GOSSIP_PERIOD: Duration = Duration::from_millis(100);

/// Minimum time between two statistics reports.
pub const REPORT_PERIOD: Duration = Duration::from_secs(15);

/// At most this many keys are redistributed per peer per event-loop tick
/// after a node join, bounding the work done in a single tick.
const DATA_REDISTRIBUTE_THRESHOLD: usize = 50;

impl ServerNode {
    /// Time-driven duties, run once per event-loop tick: outbound gossip,
    /// statistics reports, and the bounded join-rebalance drain.
    pub(super) async fn periodic_tasks(&mut self) -> eyre::Result<()> {
        if self.gossip_start.elapsed() >= GOSSIP_PERIOD {
            self.send_out_gossip()
                .await
                .context("failed to send out gossip")?;
        }

        let report_elapsed = self.reporter.report_start().elapsed();
        if report_elapsed >= REPORT_PERIOD {
            self.send_out_report(report_elapsed)
                .await
                .context("failed to send out report")?;
        }

        if !self.join_gossip_map.is_empty() {
            self.drain_join_gossip()
                .await
                .context("failed to redistribute keys after a join")?;
        }

        Ok(())
    }

    /// Gossips every key in the local changeset to its other replicas and to
    /// the caches holding it, then clears the changeset.
    async fn send_out_gossip(&mut self) -> eyre::Result<()> {
        let work_start = Instant::now();

        let changeset: Vec<Key> = self.local_changeset.drain().collect();
        let mut staged: HashMap<String, HashSet<Key>> = HashMap::new();

        for key in changeset {
            let threads = self
                .try_responsible_threads(&key, ALL_TIERS)
                .await
                .context("failed to resolve responsible threads")?;

            match threads {
                Some(threads) => {
                    for thread in &threads {
                        if thread != &self.wt {
                            staged
                                .entry(thread.gossip_topic(&self.zenoh_prefix))
                                .or_default()
                                .insert(key.clone());
                        }
                    }
                }
                None => {
                    log::error!("missing replication factors in the gossip round");
                }
            }

            if let Some(cache_ids) = self.cache_tracker.caches_for_key(&key) {
                for cache_id in cache_ids {
                    let cache = CacheThread::new(cache_id.clone(), 0);
                    staged
                        .entry(cache.cache_update_topic(&self.zenoh_prefix))
                        .or_default()
                        .insert(key.clone());
                }
            }
        }

        if !staged.is_empty() {
            self.send_gossip(&staged)
                .await
                .context("failed to send gossip")?;
        }

        self.gossip_start = Instant::now();
        self.reporter
            .record_event_time(EventClass::GossipSend, work_start.elapsed());

        Ok(())
    }

    /// Builds and sends one gossip batch per staged endpoint.
    ///
    /// Values are read from the serializer at send time, so receivers always
    /// get the latest merged state even if a key was staged a while ago.
    pub(super) async fn send_gossip(
        &self,
        staged: &HashMap<String, HashSet<Key>>,
    ) -> eyre::Result<()> {
        for (topic, keys) in staged {
            let mut tuples = Vec::new();
            for key in keys {
                if let Some((value, _)) = self.value_of(key)? {
                    tuples.push(PutTuple {
                        key: key.clone(),
                        value,
                    });
                }
            }

            let batch = KeyRequest {
                request_id: None,
                response_address: None,
                address_cache_size: Default::default(),
                operation: RequestOperation::Put { tuples },
            };
            self.publish(topic, &batch)
                .await
                .context("failed to send gossip batch")?;
        }

        Ok(())
    }

    /// Sends a bounded slice of `join_gossip_map` and, once the whole map
    /// has drained, deletes the keys this thread no longer owns.
    ///
    /// Keys are only deleted after the final slice so that every new replica
    /// has received its copy before the old replica discards one.
    async fn drain_join_gossip(&mut self) -> eyre::Result<()> {
        let mut staged: HashMap<String, HashSet<Key>> = HashMap::new();

        for (topic, keys) in &mut self.join_gossip_map {
            let slice: HashSet<Key> = keys
                .iter()
                .take(DATA_REDISTRIBUTE_THRESHOLD)
                .cloned()
                .collect();
            for key in &slice {
                keys.remove(key);
            }
            staged.insert(topic.clone(), slice);
        }
        self.join_gossip_map.retain(|_, keys| !keys.is_empty());

        self.send_gossip(&staged).await?;

        if self.join_gossip_map.is_empty() {
            let remove_set = std::mem::take(&mut self.join_remove_set);
            for key in remove_set {
                self.remove_value(&key)
                    .context("failed to remove handed-off key")?;
            }
        }

        Ok(())
    }

    /// Sends the periodic statistics reports to the threads owning the
    /// matching metadata keys.
    async fn send_out_report(&mut self, elapsed: Duration) -> eyre::Result<()> {
        let key_sizes = KeySizeSnapshot {
            key_sizes: self.primary_key_sizes(),
        };
        let storage_consumption: u64 = self
            .stored_keys
            .values()
            .map(|property| property.size as u64)
            .sum();

        let reports = self
            .reporter
            .next_epoch(
                elapsed,
                self.config_data.self_tier,
                &self.wt,
                key_sizes,
                storage_consumption,
                &self.zenoh,
                &self.zenoh_prefix,
            )
            .await?;

        for report in reports {
            let empty_global = Default::default();
            let empty_local = Default::default();
            let threads = self.placement.resolve_metadata(
                &report.key,
                self.global_hash_rings
                    .get(&Tier::Memory)
                    .unwrap_or(&empty_global),
                self.local_hash_rings
                    .get(&Tier::Memory)
                    .unwrap_or(&empty_local),
            );

            if let Some(target) = threads.choose(&mut rand::thread_rng()) {
                self.publish(&target.request_topic(&self.zenoh_prefix), &report.request)
                    .await
                    .context("failed to send report")?;
            }
        }

        Ok(())
    }

    /// The serialized sizes of the stored client keys this thread is the
    /// primary replica of.
    fn primary_key_sizes(&self) -> Vec<KeySize> {
        let mut sizes = Vec::new();
        for (key, property) in &self.stored_keys {
            if let Ok(client_key) = ClientKey::try_from(key.clone()) {
                if self.is_primary_replica(&client_key) {
                    sizes.push(KeySize {
                        key: client_key,
                        size: property.size,
                    });
                }
            }
        }
        sizes
    }

    /// Whether this thread is the key's primary replica: the first thread in
    /// the responsible set under deterministic ring iteration, within this
    /// node's own tier.
    ///
    /// Sizes are reported by the primary replica of each tier only, so the
    /// monitoring plane never double-counts replicated values.
    fn is_primary_replica(&self, key: &ClientKey) -> bool {
        let self_tier = self.config_data.self_tier;
        let replication = self
            .key_replication_map
            .get(key)
            .and_then(|replication| replication.global.get(&self_tier))
            .copied()
            .unwrap_or_default();
        if replication == 0 {
            return false;
        }

        let key = Key::from(key);
        let primary_node = self
            .global_hash_rings
            .get(&self_tier)
            .and_then(|ring| ring.primary_node(&key));
        if primary_node != Some(self.node_id.as_str()) {
            return false;
        }
        let primary_thread = self
            .local_hash_rings
            .get(&self_tier)
            .and_then(|ring| ring.primary_thread(&key));
        primary_thread == Some(self.thread_id)
    }
}
