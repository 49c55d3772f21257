use super::{Lattice, MaxLattice};
use std::collections::HashSet;
use std::hash::Hash;

/// Unordered set lattice whose join operator is set union.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SetLattice<T: Hash + Eq> {
    #[serde(bound = "T: Hash + Eq + serde::Serialize + for<'a> serde::Deserialize<'a>")]
    items: HashSet<T>,
}

impl<T: Hash + Eq> PartialEq for SetLattice<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Hash + Eq> Eq for SetLattice<T> {}

impl<T> SetLattice<T>
where
    T: Hash + Eq,
{
    /// Creates a new lattice from the given set.
    pub fn new(items: HashSet<T>) -> Self {
        Self { items }
    }

    /// Adds a single item to the set.
    pub fn insert(&mut self, item: T) {
        self.items.insert(item);
    }

    /// The current number of items, as a [`MaxLattice`].
    pub fn len(&self) -> MaxLattice<usize> {
        MaxLattice::new(self.items.len())
    }

    /// Returns `true` if the set holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Lattice for SetLattice<T>
where
    T: Hash + Eq + Clone,
{
    type Element = HashSet<T>;

    fn reveal(&self) -> &HashSet<T> {
        &self.items
    }

    fn into_inner(self) -> HashSet<T> {
        self.items
    }

    fn assign(&mut self, items: HashSet<T>) {
        self.items = items;
    }

    fn join(&mut self, items: &HashSet<T>) {
        self.items.extend(items.iter().cloned());
    }
}

impl<T: Hash + Eq> Default for SetLattice<T> {
    fn default() -> Self {
        Self {
            items: Default::default(),
        }
    }
}
