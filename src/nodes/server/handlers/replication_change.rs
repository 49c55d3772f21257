use crate::{
    messages::ReplicationFactorUpdate,
    nodes::server::{report::EventClass, ServerNode},
    topics::ServerThread,
    Key, ALL_TIERS,
};
use eyre::Context;
use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};

impl ServerNode {
    /// Handles a replication-factor change from the monitoring plane.
    ///
    /// For each changed key the factors are updated in place, ownership is
    /// re-derived, newly responsible threads receive the value via an
    /// immediate gossip round, and keys this thread lost are removed.
    pub async fn replication_change_handler(
        &mut self,
        update: ReplicationFactorUpdate,
    ) -> eyre::Result<()> {
        let work_start = Instant::now();

        log::info!("received a replication factor change");
        if self.thread_id == 0 {
            for sibling_id in 1..self.config_data.thread_count {
                self.publish(
                    &ServerThread::new(self.node_id.clone(), sibling_id)
                        .replication_change_topic(&self.zenoh_prefix),
                    &update,
                )
                .await
                .context("failed to relay the change to a sibling thread")?;
            }
        }

        let mut staged: HashMap<String, HashSet<Key>> = HashMap::new();
        let mut remove_set: HashSet<Key> = HashSet::new();

        for factors in update.updates {
            let client_key = factors.key.clone();
            let key = Key::from(&client_key);

            if !self.stored_keys.contains_key(&key) {
                // not materialized here: just cache the new factors
                let entry = self.key_replication_map.entry(client_key).or_default();
                for global in factors.global {
                    entry.global.insert(global.tier, global.value);
                }
                for local in factors.local {
                    entry.local.insert(local.tier, local.value);
                }
                continue;
            }

            let orig_threads = self
                .try_responsible_threads(&key, ALL_TIERS)
                .await
                .context("failed to resolve the prior responsible threads")?;

            // update the cached factors, noting whether any factor shrank
            let mut shrank = false;
            {
                let entry = self
                    .key_replication_map
                    .entry(client_key.clone())
                    .or_default();
                for global in factors.global {
                    if global.value < entry.global.get(&global.tier).copied().unwrap_or_default()
                    {
                        shrank = true;
                    }
                    entry.global.insert(global.tier, global.value);
                }
                for local in factors.local {
                    if local.value < entry.local.get(&local.tier).copied().unwrap_or_default() {
                        shrank = true;
                    }
                    entry.local.insert(local.tier, local.value);
                }
            }

            let orig_threads = match orig_threads {
                Some(threads) => threads,
                None => {
                    log::error!("missing replication factors in the change routine");
                    continue;
                }
            };
            let new_threads = match self
                .try_responsible_threads(&key, ALL_TIERS)
                .await
                .context("failed to resolve the new responsible threads")?
            {
                Some(threads) => threads,
                None => {
                    log::error!("missing replication factors in the change routine");
                    continue;
                }
            };

            if !new_threads.contains(&self.wt) {
                // ownership moved away: hand the value to every new owner,
                // then drop it locally
                remove_set.insert(key.clone());
                for thread in &new_threads {
                    staged
                        .entry(thread.gossip_topic(&self.zenoh_prefix))
                        .or_default()
                        .insert(key.clone());
                }
            }

            // on a pure increase, the primary replica seeds the added
            // replicas; shrinking factors need no data movement
            let is_primary_node = orig_threads
                .first()
                .map(|thread| thread.node_id == self.wt.node_id)
                .unwrap_or(false);
            if !shrank && is_primary_node {
                for thread in &new_threads {
                    if !orig_threads.contains(thread) {
                        staged
                            .entry(thread.gossip_topic(&self.zenoh_prefix))
                            .or_default()
                            .insert(key.clone());
                    }
                }
            }
        }

        self.send_gossip(&staged)
            .await
            .context("failed to gossip to the new replicas")?;

        for key in remove_set {
            self.remove_value(&key)
                .context("failed to remove a reassigned key")?;
        }

        self.reporter
            .record_event_time(EventClass::ReplicationChange, work_start.elapsed());

        Ok(())
    }
}
