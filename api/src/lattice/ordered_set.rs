use super::{Lattice, MaxLattice};
use std::collections::BTreeSet;

/// Ordered set lattice whose join operator is set union.
///
/// Unlike [`SetLattice`](super::SetLattice) the items are kept in sorted
/// order, so iteration yields a deterministic sequence on every replica.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OrderedSetLattice<T> {
    #[serde(bound = "T: Ord + serde::Serialize + for<'a> serde::Deserialize<'a>")]
    items: BTreeSet<T>,
}

impl<T> OrderedSetLattice<T>
where
    T: Ord,
{
    /// Creates a new lattice from the given set.
    pub fn new(items: BTreeSet<T>) -> Self {
        Self { items }
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

impl<T> Lattice for OrderedSetLattice<T>
where
    T: Ord + Clone,
{
    type Element = BTreeSet<T>;

    fn reveal(&self) -> &BTreeSet<T> {
        &self.items
    }

    fn into_inner(self) -> BTreeSet<T> {
        self.items
    }

    fn assign(&mut self, items: BTreeSet<T>) {
        self.items = items;
    }

    fn join(&mut self, items: &BTreeSet<T>) {
        self.items.extend(items.iter().cloned());
    }
}

impl<T> Default for OrderedSetLattice<T>
where
    T: Ord,
{
    fn default() -> Self {
        Self {
            items: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_union_and_stays_sorted() {
        let low: BTreeSet<i32> = [3, 1, 2].iter().copied().collect();
        let high: BTreeSet<i32> = [5, 2, 4].iter().copied().collect();

        let mut l = OrderedSetLattice::new(high);
        l.join(&low);

        assert_eq!(l.len().reveal(), &5);
        assert_eq!(l.reveal().iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn join_is_idempotent() {
        let items: BTreeSet<i32> = [1, 2].iter().copied().collect();
        let mut l = OrderedSetLattice::new(items.clone());
        l.join(&items);
        assert_eq!(l.reveal(), &items);
    }
}
