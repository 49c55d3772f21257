use super::{serialized_size, Serializer};
use crate::{Key, LatticeValue};
use eyre::eyre;
use std::collections::{hash_map, HashMap};

/// In-memory backend: a hash map of lattice values.
///
/// Used for every lattice type on memory-tier nodes.
#[derive(Default)]
pub struct MemorySerializer {
    values: HashMap<Key, LatticeValue>,
}

impl Serializer for MemorySerializer {
    fn get(&self, key: &Key) -> eyre::Result<Option<(LatticeValue, usize)>> {
        match self.values.get(key) {
            Some(value) => Ok(Some((value.clone(), serialized_size(value)?))),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &Key, value: &LatticeValue) -> eyre::Result<(LatticeValue, usize)> {
        let merged = match self.values.entry(key.clone()) {
            hash_map::Entry::Vacant(entry) => entry.insert(value.clone()),
            hash_map::Entry::Occupied(entry) => {
                let stored = entry.into_mut();
                stored.try_merge(value).map_err(|e| eyre!(e))?;
                stored
            }
        };
        let size = serialized_size(merged)?;
        Ok((merged.clone(), size))
    }

    fn remove(&mut self, key: &Key) -> eyre::Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{Lattice, SetLattice};

    fn set_value(items: &[&str]) -> LatticeValue {
        LatticeValue::Set(SetLattice::new(
            items.iter().map(|i| i.as_bytes().to_owned()).collect(),
        ))
    }

    #[test]
    fn put_creates_then_merges() {
        let mut backend = MemorySerializer::default();
        let key = Key::Client("k".into());

        backend.put(&key, &set_value(&["a"])).unwrap();
        let (merged, _) = backend.put(&key, &set_value(&["b"])).unwrap();

        assert_eq!(merged.as_set().unwrap().len().reveal(), &2);
    }

    #[test]
    fn get_reports_serialized_size() {
        let mut backend = MemorySerializer::default();
        let key = Key::Client("k".into());
        backend.put(&key, &set_value(&["abc"])).unwrap();

        let (value, size) = backend.get(&key).unwrap().unwrap();
        assert_eq!(size, serialized_size(&value).unwrap());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut backend = MemorySerializer::default();
        let key = Key::Client("k".into());
        backend.put(&key, &set_value(&["a"])).unwrap();
        backend.remove(&key).unwrap();
        backend.remove(&key).unwrap();
        assert!(backend.get(&key).unwrap().is_none());
    }
}
