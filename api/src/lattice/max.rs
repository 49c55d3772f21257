use super::Lattice;
use std::{cmp::Ordering, ops};

/// Lattice over an ordered type that joins by keeping the maximum.
///
/// Useful on its own for monotonic counters and as the per-node clock value
/// inside a [vector clock](super::causal::VectorClock).
///
/// ```
/// use strata_api::lattice::{Lattice, MaxLattice};
///
/// let mut counter = MaxLattice::new(4);
/// counter.join(&6);
/// assert_eq!(counter.reveal(), &6);
/// counter.join(&5);
/// assert_eq!(counter.reveal(), &6);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MaxLattice<T>(T);

impl<T: Ord> MaxLattice<T> {
    /// Creates a new lattice holding the given value.
    pub fn new(value: T) -> Self {
        MaxLattice(value)
    }
}

impl<T: Ord + Clone> Lattice for MaxLattice<T> {
    type Element = T;

    fn reveal(&self) -> &T {
        &self.0
    }

    fn into_inner(self) -> T {
        self.0
    }

    fn assign(&mut self, value: T) {
        self.0 = value;
    }

    fn join(&mut self, value: &T) {
        if let Ordering::Less = self.0.cmp(value) {
            self.0 = value.clone();
        }
    }
}

// Arithmetic on the wrapped value. Note that subtraction is not monotonic;
// callers must only use it outside of join paths.
impl<T: ops::Add<Output = T>> ops::Add<T> for MaxLattice<T> {
    type Output = MaxLattice<T>;

    fn add(self, rhs: T) -> Self::Output {
        MaxLattice(self.0 + rhs)
    }
}

impl<T: ops::AddAssign> ops::AddAssign<T> for MaxLattice<T> {
    fn add_assign(&mut self, rhs: T) {
        self.0 += rhs;
    }
}

impl<T: ops::Sub<Output = T>> ops::Sub<T> for MaxLattice<T> {
    type Output = MaxLattice<T>;

    fn sub(self, rhs: T) -> Self::Output {
        MaxLattice(self.0 - rhs)
    }
}

impl<T: ops::SubAssign> ops::SubAssign<T> for MaxLattice<T> {
    fn sub_assign(&mut self, rhs: T) {
        self.0 -= rhs;
    }
}
