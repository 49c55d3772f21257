//! Vector-clock lattices providing causal consistency.

pub use self::{
    multi_key::{MultiKeyCausalLattice, MultiKeyCausalPayload},
    single_key::{SingleKeyCausalLattice, VectorClockValuePair},
};
use super::{Lattice, MapLattice, MaxLattice};

mod multi_key;
mod single_key;

/// A [vector clock](https://en.wikipedia.org/wiki/Vector_clock) tracking one
/// logical clock per writer.
///
/// Composed out of a [`MapLattice`] of [`MaxLattice`] clocks, so joining two
/// vector clocks takes the entry-wise maximum. Shared by
/// [`SingleKeyCausalLattice`] and [`MultiKeyCausalLattice`].
pub type VectorClock = MapLattice<String, MaxLattice<usize>>;

/// How a local vector clock relates to an incoming one.
enum CausalOrder {
    /// The local clock dominates (or equals) the incoming one; the incoming
    /// write carries nothing new.
    Ahead,
    /// The incoming clock strictly dominates the local one; the incoming
    /// write supersedes the local state.
    Behind,
    /// Neither clock dominates; the writes happened concurrently.
    Concurrent,
}

/// Compares two vector clocks entry by entry.
///
/// A clock dominates when it is at least as far along for every writer the
/// other clock has seen. Writers missing from a clock count as zero.
fn causal_order(ours: &VectorClock, theirs: &VectorClock) -> CausalOrder {
    let theirs_has_new = theirs.reveal().iter().any(|(writer, their_clock)| {
        match ours.reveal().get(writer) {
            Some(our_clock) => our_clock.reveal() < their_clock.reveal(),
            None => true,
        }
    });
    let ours_has_new = ours.reveal().iter().any(|(writer, our_clock)| {
        match theirs.reveal().get(writer) {
            Some(their_clock) => their_clock.reveal() < our_clock.reveal(),
            None => true,
        }
    });

    match (ours_has_new, theirs_has_new) {
        (true, true) => CausalOrder::Concurrent,
        (false, true) => CausalOrder::Behind,
        // equal clocks also land here: nothing new to take over
        (_, false) => CausalOrder::Ahead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(&str, usize)]) -> VectorClock {
        let mut vc = VectorClock::default();
        for &(writer, count) in entries {
            vc.insert(writer.to_owned(), MaxLattice::new(count));
        }
        vc
    }

    #[test]
    fn order_detects_dominance() {
        let ours = clock(&[("a", 2), ("b", 1)]);
        let behind = clock(&[("a", 1)]);
        let ahead = clock(&[("a", 2), ("b", 2)]);
        let concurrent = clock(&[("a", 1), ("c", 1)]);

        assert!(matches!(causal_order(&ours, &behind), CausalOrder::Ahead));
        assert!(matches!(causal_order(&ours, &ahead), CausalOrder::Behind));
        assert!(matches!(
            causal_order(&ours, &concurrent),
            CausalOrder::Concurrent
        ));
    }

    #[test]
    fn equal_clocks_are_ahead() {
        let a = clock(&[("a", 1)]);
        let b = clock(&[("a", 1)]);
        assert!(matches!(causal_order(&a, &b), CausalOrder::Ahead));
    }

    #[test]
    fn missing_writers_count_as_zero() {
        let empty = clock(&[]);
        let seen = clock(&[("a", 1)]);
        assert!(matches!(causal_order(&empty, &seen), CausalOrder::Behind));
        assert!(matches!(causal_order(&seen, &empty), CausalOrder::Ahead));
    }
}
