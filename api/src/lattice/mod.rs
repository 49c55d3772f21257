//! The [`Lattice`] trait and the lattice types built on top of it.
//!
//! Base lattices:
//!
//! - [`BoolLattice`] joins with logical OR.
//! - [`MaxLattice`] joins by keeping the maximum.
//! - [`SetLattice`] and [`OrderedSetLattice`] join with set union.
//! - [`LastWriterWinsLattice`] keeps the value with the newest timestamp.
//! - [`PriorityLattice`] keeps the value with the lowest priority.
//!
//! Compound lattices wrap other lattices:
//!
//! - [`MapLattice`] is a hash map whose values are lattices; colliding
//!   entries are resolved by joining the values.
//! - The [`causal`] module builds vector-clock lattices for causal
//!   consistency out of `MapLattice` and `MaxLattice`.

pub use self::{
    bool::BoolLattice, last_writer_wins::LastWriterWinsLattice, map::MapLattice, max::MaxLattice,
    ordered_set::OrderedSetLattice, priority::PriorityLattice, set::SetLattice,
};

pub mod causal;
pub mod last_writer_wins;
pub mod priority;

mod bool;
mod map;
mod max;
mod ordered_set;
mod set;

/// A [bounded join semilattice](https://en.wikipedia.org/wiki/Semilattice):
/// the foundation of the store's coordination freedom.
///
/// A join semilattice pairs a set of values with a least-upper-bound operator
/// `⊔` that is commutative, associative, and idempotent. Because the supremum
/// of a collection of updates does not depend on the order (or multiplicity)
/// with which they are combined, replicas can apply writes and gossip in any
/// interleaving and still converge to the same value, without any
/// cross-replica synchronization.
///
/// Every implementation **must** uphold all three join laws; the consistency
/// of the whole store rests on them. Prefer composing the existing lattice
/// types over writing new `Lattice` impls from scratch.
pub trait Lattice {
    /// The value wrapped by the lattice.
    type Element;

    /// Borrows the current value.
    fn reveal(&self) -> &Self::Element;

    /// Unwraps the lattice into its current value.
    fn into_inner(self) -> Self::Element;

    /// Overwrites the value, bypassing the join. Only safe where the caller
    /// knows the replacement supersedes the current value.
    fn assign(&mut self, element: Self::Element);

    /// Folds a bare value into the lattice.
    ///
    /// This is the `⊔` operator described above.
    fn join(&mut self, element: &Self::Element);

    /// Folds another lattice of the same type into this one.
    fn merge(&mut self, other: &Self) {
        self.join(other.reveal());
    }
}
