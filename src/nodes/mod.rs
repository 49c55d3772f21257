//! The node roles implemented by this crate.
//!
//! Only the server node lives here; routing, monitoring, and client proxies
//! are separate programs that share the [`messages`](crate::messages)
//! schemas.

use crate::{
    messages::ClusterMembership,
    topics::{ManagementThread, RoutingThread},
    ZenohValueAsString,
};
use eyre::{bail, eyre, Context};
use futures::StreamExt;
use std::time::Duration;

pub mod server;

/// How often startup queries are retried before the node gives up.
const STARTUP_QUERY_ATTEMPTS: u64 = 30;

/// Queries a routing node for the current cluster membership snapshot.
///
/// A node cannot join without this snapshot, so the query is retried with a
/// growing delay and failure is an error the caller should treat as fatal.
pub async fn request_cluster_info(
    zenoh: &zenoh::Session,
    zenoh_prefix: &str,
) -> eyre::Result<ClusterMembership> {
    let mut attempt = 0;
    loop {
        let replies = zenoh
            .get(&RoutingThread::seed_topic(zenoh_prefix))
            .await
            .map_err(|e| eyre!(e))
            .context("failed to query the seed node")?;

        let mut replies: Vec<_> = replies.collect().await;
        match replies.as_mut_slice() {
            [] if attempt < STARTUP_QUERY_ATTEMPTS => {
                futures_timer::Delay::new(Duration::from_millis(100 * attempt)).await;
                attempt += 1;
            }
            [] => bail!("seed node did not answer the membership query"),
            [reply] => {
                let membership = serde_json::from_str(&reply.sample.value.as_string()?)
                    .context("failed to deserialize ClusterMembership")?;
                return Ok(membership);
            }
            _ => bail!("multiple replies to the membership query"),
        }
    }
}

/// Asks the management plane how often this node has been restarted.
///
/// The returned count becomes the node's join incarnation, which keeps a
/// restarted node's ring positions distinct from its previous life. Like the
/// seed query, an unreachable management plane is fatal; without the count
/// the node could silently shadow its own stale ring entries.
pub async fn request_join_count(
    zenoh: &zenoh::Session,
    zenoh_prefix: &str,
    management_id: &str,
    node_id: &str,
) -> eyre::Result<u32> {
    let topic =
        ManagementThread::new(management_id.to_owned()).restart_count_topic(zenoh_prefix, node_id);

    let mut attempt = 0;
    loop {
        let replies = zenoh
            .get(&topic)
            .await
            .map_err(|e| eyre!(e))
            .context("failed to query the management plane for the restart count")?;

        let mut replies: Vec<_> = replies.collect().await;
        match replies.as_mut_slice() {
            [] if attempt < STARTUP_QUERY_ATTEMPTS => {
                futures_timer::Delay::new(Duration::from_millis(100 * attempt)).await;
                attempt += 1;
            }
            [] => bail!("management plane did not answer the restart count query"),
            [reply] => {
                let raw = reply.sample.value.as_string()?;
                return raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid restart count `{}`", raw));
            }
            _ => bail!("multiple replies to the restart count query"),
        }
    }
}
