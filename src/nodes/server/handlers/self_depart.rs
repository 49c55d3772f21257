use crate::{
    messages::{Departed, Notify, SelfDepart},
    nodes::server::{report::EventClass, ServerNode},
    topics::{MonitoringThread, RoutingThread, ServerThread},
    Key, ALL_TIERS,
};
use eyre::Context;
use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};

impl ServerNode {
    /// Handles the order to leave the cluster.
    ///
    /// Every stored key is gossiped to the surviving replicas one final
    /// time, the cluster roles are notified, and the acknowledging
    /// [`Departed`] message is published. The caller terminates the event
    /// loop afterwards.
    pub async fn self_depart_handler(&mut self, message: SelfDepart) -> eyre::Result<()> {
        let work_start = Instant::now();
        log::info!("node is departing");

        self.global_hash_rings
            .entry(self.config_data.self_tier)
            .or_default()
            .remove_node(&self.node_id);

        if self.thread_id == 0 {
            let departed = Departed {
                tier: self.config_data.self_tier,
                node_id: self.node_id.clone(),
            };

            let mut peers = Vec::new();
            for ring in self.global_hash_rings.values() {
                for node_id in ring.nodes() {
                    peers.push(ServerThread::new(node_id.to_owned(), 0));
                }
            }
            for peer in peers {
                self.publish(&peer.node_depart_topic(&self.zenoh_prefix), &departed)
                    .await
                    .context("failed to notify a peer node of the departure")?;
            }

            let notify = Notify::Depart(departed);
            for routing_id in self.routing_node_ids() {
                self.publish(
                    &RoutingThread::new(routing_id, 0).notify_topic(&self.zenoh_prefix),
                    &notify,
                )
                .await
                .context("failed to notify a routing node of the departure")?;
            }
            for monitoring_id in &self.config_data.monitoring_ids {
                self.publish(
                    &MonitoringThread::new(monitoring_id.clone()).notify_topic(&self.zenoh_prefix),
                    &notify,
                )
                .await
                .context("failed to notify a monitoring node of the departure")?;
            }

            for sibling_id in 1..self.config_data.thread_count {
                self.publish(
                    &ServerThread::new(self.node_id.clone(), sibling_id)
                        .self_depart_topic(&self.zenoh_prefix),
                    &message,
                )
                .await
                .context("failed to relay the self-depart to a sibling thread")?;
            }
        }

        // hand every stored key to the replicas that remain responsible;
        // this node is already off the ring, so resolution excludes it
        let mut staged: HashMap<String, HashSet<Key>> = HashMap::new();
        let stored: Vec<Key> = self.stored_keys.keys().cloned().collect();
        for key in stored {
            let threads = self
                .try_responsible_threads(&key, ALL_TIERS)
                .await
                .context("failed to resolve responsible threads")?;

            match threads {
                Some(threads) => {
                    for thread in threads {
                        staged
                            .entry(thread.gossip_topic(&self.zenoh_prefix))
                            .or_default()
                            .insert(key.clone());
                    }
                }
                None => log::error!("missing replication factors in the departure routine"),
            }
        }
        self.send_gossip(&staged)
            .await
            .context("failed to send the final gossip round")?;

        let ack = Departed {
            tier: self.config_data.self_tier,
            node_id: self.node_id.clone(),
        };
        self.publish(&message.response_topic, &ack)
            .await
            .context("failed to acknowledge the self-depart")?;

        self.reporter
            .record_event_time(EventClass::SelfDepart, work_start.elapsed());

        Ok(())
    }
}
