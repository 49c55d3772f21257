use super::{BoolLattice, Lattice, SetLattice};
use std::{borrow::Borrow, collections::HashMap, hash::Hash};

/// Hash-map lattice whose values are themselves lattices.
///
/// Joining takes the union of the key sets; keys present on both sides have
/// their values folded together with the value type's own join operator.
/// This is the building block for vector clocks and for dependency sets in
/// the causal lattices.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MapLattice<K, V> {
    #[serde(bound = "
        K: Hash + Eq + serde::Serialize + for<'a> serde::Deserialize<'a>,
        V: serde::Serialize + for<'a> serde::Deserialize<'a>,
    ")]
    entries: HashMap<K, V>,
}

impl<K, V> MapLattice<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new lattice from the given map.
    pub fn new(entries: HashMap<K, V>) -> Self {
        Self { entries }
    }

    /// Inserts a value, folding it into the previous value if one exists.
    pub fn insert(&mut self, key: K, value: V)
    where
        V: Lattice,
    {
        if let Some(current) = self.entries.get_mut(&key) {
            current.merge(&value);
        } else {
            self.entries.insert(key, value);
        }
    }

    /// Removes the value stored under the given key.
    pub fn remove<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key);
    }

    /// The set of keys present in the map, as a [`SetLattice`].
    pub fn key_set(&self) -> SetLattice<K>
    where
        K: Clone,
    {
        SetLattice::new(self.entries.keys().cloned().collect())
    }

    /// Whether the map holds a value for the given key, as a [`BoolLattice`].
    pub fn contains_key(&self, key: &K) -> BoolLattice {
        BoolLattice::new(self.entries.contains_key(key))
    }
}

impl<K, V> Lattice for MapLattice<K, V>
where
    K: Eq + Hash + Clone,
    V: Lattice + Clone,
{
    type Element = HashMap<K, V>;

    fn reveal(&self) -> &HashMap<K, V> {
        &self.entries
    }

    fn into_inner(self) -> HashMap<K, V> {
        self.entries
    }

    fn assign(&mut self, entries: HashMap<K, V>) {
        self.entries = entries;
    }

    fn join(&mut self, entries: &HashMap<K, V>) {
        for (key, incoming) in entries {
            if let Some(current) = self.entries.get_mut(key) {
                current.merge(incoming);
            } else {
                self.entries.insert(key.clone(), incoming.clone());
            }
        }
    }
}

impl<K, V> Default for MapLattice<K, V> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
        }
    }
}

impl<K, V> PartialEq for MapLattice<K, V>
where
    K: Eq + Hash,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K, V> Eq for MapLattice<K, V>
where
    K: Eq + Hash,
    V: PartialEq,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::MaxLattice;

    #[test]
    fn join_unions_keys_and_folds_collisions() {
        let left: HashMap<_, _> = vec![("a", MaxLattice::new(1)), ("b", MaxLattice::new(5))]
            .into_iter()
            .collect();
        let right: HashMap<_, _> = vec![("b", MaxLattice::new(3)), ("c", MaxLattice::new(9))]
            .into_iter()
            .collect();

        let mut l = MapLattice::new(left);
        l.join(&right);

        assert_eq!(l.reveal().get("a"), Some(&MaxLattice::new(1)));
        assert_eq!(l.reveal().get("b"), Some(&MaxLattice::new(5)));
        assert_eq!(l.reveal().get("c"), Some(&MaxLattice::new(9)));
    }

    #[test]
    fn insert_folds_existing() {
        let mut l = MapLattice::default();
        l.insert("clock", MaxLattice::new(2));
        l.insert("clock", MaxLattice::new(1));
        assert_eq!(l.reveal().get("clock"), Some(&MaxLattice::new(2)));
    }

    #[test]
    fn key_set_and_contains() {
        let mut l = MapLattice::default();
        l.insert('x', MaxLattice::new(0));
        assert!(*l.contains_key(&'x').reveal());
        assert!(!l.contains_key(&'y').reveal());
        assert_eq!(l.key_set().len().reveal(), &1);
    }
}
