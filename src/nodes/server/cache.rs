//! Bookkeeping for function-executor caches subscribed to key updates.

use crate::{ClientKey, Key};
use std::collections::{HashMap, HashSet};

/// Tracks which caches exist and which keys each of them holds.
///
/// The authoritative cache→keys mapping is owned by the management plane;
/// this is the thread's mirror of it, plus the inverted key→caches view the
/// gossip engine needs. Both views are only ever updated together, which
/// keeps them exact inverses.
#[derive(Debug, Default)]
pub struct CacheTracker {
    /// Caches reported live by the management plane.
    extant: HashSet<String>,
    /// cache ID -> keys that cache holds.
    cache_to_keys: HashMap<String, HashSet<ClientKey>>,
    /// key -> cache IDs holding it.
    key_to_caches: HashMap<Key, HashSet<String>>,
}

impl CacheTracker {
    /// Replaces the key set of one cache.
    ///
    /// Keys dropped from the cache's previous set are unlinked from the
    /// inverted view, new keys are linked.
    pub fn replace_cache_keys(&mut self, cache_id: String, keys: HashSet<ClientKey>) {
        let previous = self
            .cache_to_keys
            .insert(cache_id.clone(), keys.clone())
            .unwrap_or_default();

        for dropped in previous.difference(&keys) {
            self.unlink(&dropped.into(), &cache_id);
        }
        for key in keys {
            self.key_to_caches
                .entry(key.into())
                .or_default()
                .insert(cache_id.clone());
        }
    }

    /// Installs the live cache set, forgetting every cache not in it.
    pub fn set_extant_caches(&mut self, live: HashSet<String>) {
        let gone: Vec<String> = self
            .extant
            .iter()
            .filter(|cache_id| !live.contains(*cache_id))
            .cloned()
            .collect();
        for cache_id in gone {
            let keys = self.cache_to_keys.remove(&cache_id).unwrap_or_default();
            for key in keys {
                self.unlink(&key.into(), &cache_id);
            }
        }
        self.extant = live;
    }

    /// The caches currently reported live.
    pub fn extant_caches(&self) -> &HashSet<String> {
        &self.extant
    }

    /// The caches holding the given key, if any.
    pub fn caches_for_key(&self, key: &Key) -> Option<&HashSet<String>> {
        self.key_to_caches.get(key)
    }

    fn unlink(&mut self, key: &Key, cache_id: &str) {
        if let Some(caches) = self.key_to_caches.get_mut(key) {
            caches.remove(cache_id);
            if caches.is_empty() {
                self.key_to_caches.remove(key);
            }
        }
    }

    /// Checks that the two views are exact inverses of each other.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let forward_ok = self.cache_to_keys.iter().all(|(cache_id, keys)| {
            keys.iter().all(|key| {
                self.key_to_caches
                    .get(&key.into())
                    .map(|caches| caches.contains(cache_id))
                    .unwrap_or(false)
            })
        });
        let inverse_ok = self.key_to_caches.iter().all(|(key, caches)| {
            caches.iter().all(|cache_id| {
                let client_key = match key {
                    Key::Client(key) => key,
                    Key::Metadata(_) => return false,
                };
                self.cache_to_keys
                    .get(cache_id)
                    .map(|keys| keys.contains(client_key))
                    .unwrap_or(false)
            })
        });
        forward_ok && inverse_ok
    }
}
