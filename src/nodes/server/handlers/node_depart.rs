use crate::{
    messages::Departed,
    nodes::server::{report::EventClass, ServerNode},
    topics::ServerThread,
};
use eyre::Context;
use std::time::Instant;

impl ServerNode {
    /// Handles the announcement that a peer node left the cluster.
    ///
    /// Only the ring is updated; the departed node's data is re-replicated
    /// by the surviving replicas through their normal gossip.
    pub async fn node_depart_handler(&mut self, message: Departed) -> eyre::Result<()> {
        let work_start = Instant::now();

        log::info!(
            "node {} departed from tier {}",
            message.node_id,
            message.tier
        );

        if let Some(ring) = self.global_hash_rings.get_mut(&message.tier) {
            ring.remove_node(&message.node_id);
        }

        if self.thread_id == 0 {
            for sibling_id in 1..self.config_data.thread_count {
                self.publish(
                    &ServerThread::new(self.node_id.clone(), sibling_id)
                        .node_depart_topic(&self.zenoh_prefix),
                    &message,
                )
                .await
                .context("failed to relay the departure to a sibling thread")?;
            }

            for (&tier, ring) in &self.global_hash_rings {
                log::info!(
                    "hash ring for tier {} now has {} virtual entries",
                    tier,
                    ring.len()
                );
            }
        }

        self.reporter
            .record_event_time(EventClass::NodeDepart, work_start.elapsed());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        messages::{Departed, Tier},
        nodes::server::server_test_instance,
        zenoh_test_instance, ZenohValueAsString,
    };
    use std::time::Duration;
    use zenoh::prelude::{Receiver, ZFuture};

    #[test]
    fn departure_shrinks_the_ring_and_is_relayed() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        let mut server = server_test_instance(zenoh.clone(), zenoh_prefix);
        server.config_data.thread_count = 2;
        server
            .global_hash_rings
            .entry(Tier::Memory)
            .or_default()
            .insert_node("other-server".into(), 0);
        assert_eq!(server.global_hash_rings[&Tier::Memory].node_count(), 2);

        let departed = Departed {
            tier: Tier::Memory,
            node_id: "other-server".into(),
        };
        smol::block_on(server.node_depart_handler(departed.clone())).unwrap();

        let relayed: Departed = {
            let raw = subscriber
                .receiver()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
            serde_json::from_str(&raw.value.as_string().unwrap()).unwrap()
        };
        assert_eq!(relayed, departed);
        assert_eq!(server.global_hash_rings[&Tier::Memory].node_count(), 1);
    }

    #[test]
    fn unknown_node_departure_is_harmless() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let mut server = server_test_instance(zenoh, zenoh_prefix);
        let before = server.global_hash_rings[&Tier::Memory].len();

        let departed = Departed {
            tier: Tier::Memory,
            node_id: "never-joined".into(),
        };
        smol::block_on(server.node_depart_handler(departed)).unwrap();

        assert_eq!(server.global_hash_rings[&Tier::Memory].len(), before);
    }
}
