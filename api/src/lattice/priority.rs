//! The [`PriorityLattice`], a min-priority register.

use super::Lattice;
use std::cmp::Ordering;

/// Lattice that keeps the value with the lowest priority.
///
/// The inverse of [`LastWriterWinsLattice`](super::LastWriterWinsLattice) in
/// spirit: instead of the newest write, the write with the smallest
/// [`priority`](PriorityValuePair::priority) survives joining. Ties on the
/// priority are broken by the larger value bytes so that concurrent writes
/// converge deterministically.
///
/// Priorities must be finite; a NaN priority never replaces the stored pair.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PriorityLattice<T> {
    pair: PriorityValuePair<T>,
}

impl<T> PriorityLattice<T> {
    /// Creates a new lattice from the given prioritized value.
    pub fn new(pair: PriorityValuePair<T>) -> Self {
        Self { pair }
    }

    /// Creates a new lattice from a priority and a value.
    pub fn from_pair(priority: f64, value: T) -> Self {
        Self::new(PriorityValuePair::new(priority, value))
    }
}

impl<T> Lattice for PriorityLattice<T>
where
    T: Ord + Clone,
{
    type Element = PriorityValuePair<T>;

    fn reveal(&self) -> &PriorityValuePair<T> {
        &self.pair
    }

    fn into_inner(self) -> PriorityValuePair<T> {
        self.pair
    }

    fn assign(&mut self, pair: PriorityValuePair<T>) {
        self.pair = pair;
    }

    fn join(&mut self, incoming: &PriorityValuePair<T>) {
        match incoming.priority.partial_cmp(&self.pair.priority) {
            Some(Ordering::Less) => self.pair = incoming.clone(),
            Some(Ordering::Equal) => {
                if incoming.value > self.pair.value {
                    self.pair = incoming.clone();
                }
            }
            // incoming priority is higher or NaN
            Some(Ordering::Greater) | None => {}
        }
    }
}

/// A value together with its priority.
#[derive(Debug, PartialEq, Clone, serde::Serialize, serde::Deserialize)]
pub struct PriorityValuePair<T> {
    /// Lower priorities win joins.
    pub priority: f64,
    /// The stored value.
    pub value: T,
}

impl<T> PriorityValuePair<T> {
    /// Pairs the given priority and value.
    pub fn new(priority: f64, value: T) -> Self {
        Self { priority, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_priority_wins() {
        let mut l = PriorityLattice::from_pair(5.0, b"five".to_vec());
        l.join(&PriorityValuePair::new(1.0, b"one".to_vec()));
        assert_eq!(l.reveal().value, b"one");

        l.join(&PriorityValuePair::new(3.0, b"three".to_vec()));
        assert_eq!(l.reveal().value, b"one");
    }

    #[test]
    fn equal_priorities_break_ties_on_bytes() {
        let mut left = PriorityLattice::from_pair(2.0, b"aaa".to_vec());
        left.join(&PriorityValuePair::new(2.0, b"zzz".to_vec()));

        let mut right = PriorityLattice::from_pair(2.0, b"zzz".to_vec());
        right.join(&PriorityValuePair::new(2.0, b"aaa".to_vec()));

        assert_eq!(left, right);
        assert_eq!(left.reveal().value, b"zzz");
    }

    #[test]
    fn nan_never_replaces() {
        let mut l = PriorityLattice::from_pair(2.0, b"kept".to_vec());
        l.join(&PriorityValuePair::new(f64::NAN, b"dropped".to_vec()));
        assert_eq!(l.reveal().value, b"kept");
    }
}
