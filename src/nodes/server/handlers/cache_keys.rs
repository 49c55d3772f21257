use crate::{
    lattice::Lattice,
    messages::KeyResponse,
    metadata::MetadataKey,
    nodes::server::{report::EventClass, ServerNode},
    ClientKey, Key,
};
use eyre::{anyhow, bail, Context};
use std::{collections::HashSet, time::Instant};

impl ServerNode {
    /// Handles the answers to the per-cache key-set lookups.
    ///
    /// Each tuple holds the full key set of one function-executor cache; the
    /// tracker replaces that cache's set so both cache maps stay inverses.
    pub async fn cache_keys_handler(&mut self, response: KeyResponse) -> eyre::Result<()> {
        let work_start = Instant::now();

        for tuple in response.tuples {
            if tuple.error.is_some() {
                // KeyNotFound: the cache has not registered any keys yet.
                // WrongThread: our metadata placement was stale; the next
                // report round re-queries with fresh rings.
                continue;
            }

            let cache_id = match &tuple.key {
                Key::Metadata(MetadataKey::CacheKeys { cache_id }) => cache_id.clone(),
                other => bail!("expected a cache-keys metadata key, got {:?}", other),
            };

            let lww = tuple
                .lattice
                .as_ref()
                .ok_or_else(|| anyhow!("cache-keys tuple carries no value"))?
                .as_lww()?;
            let keys: HashSet<ClientKey> =
                serde_json::from_slice(lww.reveal().value().as_slice())
                    .context("failed to decode the cached key set")?;

            self.cache_tracker.replace_cache_keys(cache_id, keys);
        }

        self.reporter
            .record_event_time(EventClass::CacheKeys, work_start.elapsed());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        lattice::LastWriterWinsLattice,
        messages::{KeyResponse, KeyTuple, ResponseType},
        metadata::MetadataKey,
        nodes::server::server_test_instance,
        zenoh_test_instance, ClientKey, Key, LatticeValue,
    };
    use std::collections::HashSet;

    fn cache_keys_response(cache_id: &str, keys: &[&str]) -> KeyResponse {
        let key_set: HashSet<ClientKey> = keys.iter().map(|&k| k.into()).collect();
        let payload = serde_json::to_vec(&key_set).unwrap();

        let mut tuple = KeyTuple::new(Key::Metadata(MetadataKey::CacheKeys {
            cache_id: cache_id.to_owned(),
        }));
        tuple.lattice = Some(LatticeValue::Lww(LastWriterWinsLattice::new_now(payload)));

        KeyResponse {
            response_id: None,
            ty: ResponseType::Get,
            error: Ok(()),
            tuples: vec![tuple],
        }
    }

    #[test]
    fn cache_key_sets_are_installed_and_replaced() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();

        let mut server = server_test_instance(zenoh, zenoh_prefix);

        let response = cache_keys_response("cache-1", &["a", "b"]);
        smol::block_on(server.cache_keys_handler(response)).unwrap();
        assert!(server
            .cache_tracker
            .caches_for_key(&Key::Client("a".into()))
            .is_some());

        // a fresh set drops "a" from the cache
        let response = cache_keys_response("cache-1", &["b"]);
        smol::block_on(server.cache_keys_handler(response)).unwrap();
        assert!(server
            .cache_tracker
            .caches_for_key(&Key::Client("a".into()))
            .is_none());
        assert!(server
            .cache_tracker
            .caches_for_key(&Key::Client("b".into()))
            .is_some());
    }
}
