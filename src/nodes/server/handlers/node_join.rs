use crate::{
    messages::JoinMessage,
    nodes::server::{report::EventClass, ServerNode},
    topics::ServerThread,
    Key,
};
use eyre::Context;
use std::time::Instant;

impl ServerNode {
    /// Handles the announcement of a joining (or rejoining) node.
    ///
    /// Besides ringing the new node, thread 0 spreads the announcement to
    /// peers and sibling threads, and every thread stages the stored keys
    /// the new node is now responsible for in `join_gossip_map`.
    pub async fn node_join_handler(&mut self, message: JoinMessage) -> eyre::Result<()> {
        let work_start = Instant::now();

        let JoinMessage {
            tier,
            node_id: ref new_node_id,
            join_count,
        } = message;

        let inserted = self
            .global_hash_rings
            .entry(tier)
            .or_default()
            .insert_node(new_node_id.clone(), join_count);

        if inserted {
            log::info!(
                "node {} joined tier {} with join count {}",
                new_node_id,
                tier,
                join_count
            );

            // only thread 0 talks to other nodes; it relays the announcement
            // to its sibling threads and, in case the join raced another
            // membership change, to the other nodes
            if self.thread_id == 0 {
                let own_join = JoinMessage {
                    tier: self.config_data.self_tier,
                    node_id: self.node_id.clone(),
                    join_count: self.self_join_count,
                };
                self.publish(
                    &ServerThread::new(new_node_id.clone(), 0).node_join_topic(&self.zenoh_prefix),
                    &own_join,
                )
                .await
                .context("failed to introduce ourselves to the joined node")?;

                let mut peers = Vec::new();
                for (&ring_tier, ring) in &self.global_hash_rings {
                    for node_id in ring.nodes() {
                        if node_id != self.node_id && node_id != new_node_id.as_str() {
                            peers.push(ServerThread::new(node_id.to_owned(), 0));
                        }
                    }
                    log::info!(
                        "hash ring for tier {} now has {} virtual entries",
                        ring_tier,
                        ring.len()
                    );
                }
                for peer in peers {
                    self.publish(&peer.node_join_topic(&self.zenoh_prefix), &message)
                        .await
                        .context("failed to relay the join to a peer node")?;
                }

                for sibling_id in 1..self.config_data.thread_count {
                    self.publish(
                        &ServerThread::new(self.node_id.clone(), sibling_id)
                            .node_join_topic(&self.zenoh_prefix),
                        &message,
                    )
                    .await
                    .context("failed to relay the join to a sibling thread")?;
                }
            }

            if tier == self.config_data.self_tier {
                self.stage_rebalance(new_node_id)
                    .await
                    .context("failed to stage keys for the joined node")?;
            }
        }

        self.reporter
            .record_event_time(EventClass::NodeJoin, work_start.elapsed());

        Ok(())
    }

    /// Recomputes ownership of every stored key under the updated ring.
    ///
    /// Keys whose responsible set now includes the new node are staged for
    /// it; keys this thread no longer owns join `join_remove_set` and are
    /// deleted once the staged gossip has drained.
    async fn stage_rebalance(&mut self, new_node_id: &str) -> eyre::Result<()> {
        let stored: Vec<Key> = self.stored_keys.keys().cloned().collect();

        for key in stored {
            let threads = self
                .try_responsible_threads(&key, &[self.config_data.self_tier])
                .await
                .context("failed to resolve responsible threads")?;

            match threads {
                Some(threads) => {
                    for thread in &threads {
                        if thread.node_id == new_node_id {
                            self.join_gossip_map
                                .entry(thread.gossip_topic(&self.zenoh_prefix))
                                .or_default()
                                .insert(key.clone());
                        }
                    }
                    if !threads.contains(&self.wt) {
                        self.join_remove_set.insert(key.clone());
                    }
                }
                None => {
                    // stored keys have cached replication factors, so this
                    // should never trigger
                    log::error!("missing replication factors while rebalancing after a join");
                }
            }
        }

        Ok(())
    }
}
