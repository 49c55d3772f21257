#![warn(missing_docs)]

//! Server node of the strata key-value store.
//!
//! A strata cluster is partitioned into storage tiers (volatile memory and
//! durable disk) and converges without coordination: values are
//! [lattices](strata_api::lattice) and replicas exchange periodic gossip that
//! merges them. This crate implements the server node — consistent-hash
//! placement, the request pipeline, the gossip and anti-entropy engine,
//! membership and replication-factor reconfiguration, and the statistics
//! reporter — on top of [`zenoh`] pub/sub messaging.
//!
//! The routing proxies, the monitoring node, and the management plane are
//! separate roles; only their message schemas live here (see [`messages`]).

pub use strata_api::{lattice, ClientKey, KvError, LatticeType, LatticeValue};

use crate::{messages::Tier, metadata::MetadataKey};
use eyre::anyhow;

pub mod config;
pub mod messages;
pub mod metadata;
pub mod nodes;
pub mod placement;
pub mod store;
pub mod topics;

/// The storage tiers a key can be replicated in (routing excluded).
pub const ALL_TIERS: &[Tier] = &[Tier::Memory, Tier::Disk];

/// The topic prefix all cluster roles use unless told otherwise.
///
/// Deployments that share a zenoh network (or tests sharing a session) pass
/// their own prefix instead.
pub fn default_zenoh_prefix() -> &'static str {
    "strata"
}

/// A key as seen by a server thread: either user data or internal metadata.
#[derive(Debug, PartialEq, Eq, Hash, Clone, serde::Serialize, serde::Deserialize)]
pub enum Key {
    /// A key written by a client.
    Client(ClientKey),
    /// A reserved key carrying cluster metadata.
    Metadata(MetadataKey),
}

impl From<ClientKey> for Key {
    fn from(key: ClientKey) -> Self {
        Self::Client(key)
    }
}

impl<'a> From<&'a ClientKey> for Key {
    fn from(key: &'a ClientKey) -> Self {
        Self::Client(key.clone())
    }
}

impl From<MetadataKey> for Key {
    fn from(key: MetadataKey) -> Self {
        Self::Metadata(key)
    }
}

impl std::convert::TryFrom<Key> for ClientKey {
    type Error = eyre::Error;

    fn try_from(value: Key) -> Result<Self, Self::Error> {
        match value {
            Key::Client(key) => Ok(key),
            Key::Metadata(_) => Err(anyhow!("expected a client key, got a metadata key")),
        }
    }
}

/// Extension trait for reading zenoh payloads as UTF-8 strings.
pub trait ZenohValueAsString {
    /// Returns the payload bytes as an owned string.
    fn as_string(&self) -> eyre::Result<String>;
}

impl ZenohValueAsString for zenoh::prelude::Value {
    fn as_string(&self) -> eyre::Result<String> {
        String::from_utf8(self.payload.contiguous().into_owned())
            .map_err(|e| anyhow!("zenoh payload is not valid UTF-8: {}", e))
    }
}

/// A process-wide zenoh session for unit tests.
///
/// Spinning up a session per test is slow and makes the peer discovery
/// chatty, so all tests share one.
pub fn zenoh_test_instance() -> std::sync::Arc<zenoh::Session> {
    use once_cell::sync::OnceCell;
    use zenoh::prelude::ZFuture;

    static INSTANCE: OnceCell<std::sync::Arc<zenoh::Session>> = OnceCell::new();
    INSTANCE
        .get_or_init(|| {
            let session = zenoh::open(zenoh::config::Config::default())
                .wait()
                .expect("failed to open zenoh test session");
            std::sync::Arc::new(session)
        })
        .clone()
}
