use crate::{
    messages::{management::NodeSet, KeyRequest, RequestOperation, Tier},
    metadata::MetadataKey,
    nodes::server::{report::EventClass, ServerNode},
    Key,
};
use eyre::Context;
use rand::prelude::SliceRandom;
use std::{collections::HashMap, time::Instant};

impl ServerNode {
    /// Handles the management plane's answer listing the live caches.
    ///
    /// Caches that disappeared are dropped from the tracker, and a key-set
    /// lookup is issued for every live cache so the tracker's mappings catch
    /// up before the next gossip round.
    pub async fn management_response_handler(&mut self, nodes: NodeSet) -> eyre::Result<()> {
        let work_start = Instant::now();

        self.cache_tracker.set_extant_caches(nodes.nodes);

        // batch one key-set lookup per responsible thread
        let mut lookups: HashMap<String, Vec<Key>> = HashMap::new();
        for cache_id in self.cache_tracker.extant_caches() {
            let metadata_key = MetadataKey::CacheKeys {
                cache_id: cache_id.clone(),
            };

            let empty_global = Default::default();
            let empty_local = Default::default();
            let threads = self.placement.resolve_metadata(
                &metadata_key,
                self.global_hash_rings
                    .get(&Tier::Memory)
                    .unwrap_or(&empty_global),
                self.local_hash_rings
                    .get(&Tier::Memory)
                    .unwrap_or(&empty_local),
            );

            match threads.choose(&mut rand::thread_rng()) {
                Some(target) => {
                    lookups
                        .entry(target.request_topic(&self.zenoh_prefix))
                        .or_default()
                        .push(metadata_key.into());
                }
                // no servers ringed yet; retried on the next report round
                None => continue,
            }
        }

        let response_topic = self.wt.cache_keys_response_topic(&self.zenoh_prefix);
        for (topic, keys) in lookups {
            let request = KeyRequest {
                request_id: Some(self.next_request_id(&response_topic)),
                response_address: Some(response_topic.clone()),
                address_cache_size: Default::default(),
                operation: RequestOperation::Get { keys },
            };
            self.publish(&topic, &request)
                .await
                .context("failed to send a cache key-set lookup")?;
        }

        self.reporter
            .record_event_time(EventClass::Management, work_start.elapsed());

        Ok(())
    }
}
