use crate::{
    lattice::{
        causal::{causal_order, CausalOrder, VectorClock},
        Lattice, MapLattice,
    },
    ClientKey,
};

/// Causally consistent register that also tracks cross-key dependencies.
///
/// Works like [`SingleKeyCausalLattice`](super::SingleKeyCausalLattice), but
/// the payload additionally records the vector clocks of the keys this value
/// depends on. The payload is classified as a whole: a strictly dominating
/// incoming write replaces value and dependencies together, a dominated one
/// is discarded, and concurrent writes join clocks, dependencies, and
/// values.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MultiKeyCausalLattice<T> {
    state: MultiKeyCausalPayload<T>,
}

impl<T> MultiKeyCausalLattice<T> {
    /// Creates a new lattice from the given payload.
    pub fn new(state: MultiKeyCausalPayload<T>) -> Self {
        Self { state }
    }
}

impl<T> Lattice for MultiKeyCausalLattice<T>
where
    T: Lattice + Clone,
{
    type Element = MultiKeyCausalPayload<T>;

    fn reveal(&self) -> &MultiKeyCausalPayload<T> {
        &self.state
    }

    fn into_inner(self) -> MultiKeyCausalPayload<T> {
        self.state
    }

    fn assign(&mut self, state: MultiKeyCausalPayload<T>) {
        self.state = state;
    }

    fn join(&mut self, incoming: &MultiKeyCausalPayload<T>) {
        match causal_order(&self.state.vector_clock, &incoming.vector_clock) {
            CausalOrder::Behind => self.state = incoming.clone(),
            CausalOrder::Ahead => {}
            CausalOrder::Concurrent => {
                self.state.vector_clock.merge(&incoming.vector_clock);
                self.state.dependencies.merge(&incoming.dependencies);
                self.state.value.merge(&incoming.value);
            }
        }
    }
}

/// The payload of a [`MultiKeyCausalLattice`]: the value, its own vector
/// clock, and the vector clocks of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[allow(missing_docs)]
pub struct MultiKeyCausalPayload<T> {
    pub value: T,
    pub dependencies: MapLattice<ClientKey, VectorClock>,
    pub vector_clock: VectorClock,
}

impl<T> MultiKeyCausalPayload<T> {
    /// Builds a payload from its parts.
    pub fn new(
        vector_clock: VectorClock,
        dependencies: MapLattice<ClientKey, VectorClock>,
        value: T,
    ) -> Self {
        Self {
            value,
            dependencies,
            vector_clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{MaxLattice, SetLattice};

    fn clock(entries: &[(&str, usize)]) -> VectorClock {
        let mut vc = VectorClock::default();
        for &(writer, count) in entries {
            vc.insert(writer.to_owned(), MaxLattice::new(count));
        }
        vc
    }

    fn deps(entries: &[(&str, &[(&str, usize)])]) -> MapLattice<ClientKey, VectorClock> {
        let mut map = MapLattice::default();
        for &(key, entries) in entries {
            map.insert(key.into(), clock(entries));
        }
        map
    }

    fn value(items: &[&str]) -> SetLattice<Vec<u8>> {
        SetLattice::new(items.iter().map(|i| i.as_bytes().to_owned()).collect())
    }

    #[test]
    fn concurrent_writes_join_dependencies() {
        let mut l = MultiKeyCausalLattice::new(MultiKeyCausalPayload::new(
            clock(&[("a", 1)]),
            deps(&[("x", &[("a", 1)])]),
            value(&["left"]),
        ));
        l.join(&MultiKeyCausalPayload::new(
            clock(&[("b", 1)]),
            deps(&[("y", &[("b", 1)])]),
            value(&["right"]),
        ));

        assert_eq!(l.reveal().value, value(&["left", "right"]));
        assert_eq!(
            l.reveal().dependencies,
            deps(&[("x", &[("a", 1)]), ("y", &[("b", 1)])])
        );
    }

    #[test]
    fn dominating_write_replaces_dependencies() {
        let mut l = MultiKeyCausalLattice::new(MultiKeyCausalPayload::new(
            clock(&[("a", 1)]),
            deps(&[("x", &[("a", 1)])]),
            value(&["old"]),
        ));
        l.join(&MultiKeyCausalPayload::new(
            clock(&[("a", 2)]),
            deps(&[("z", &[("a", 2)])]),
            value(&["new"]),
        ));

        assert_eq!(l.reveal().value, value(&["new"]));
        assert_eq!(l.reveal().dependencies, deps(&[("z", &[("a", 2)])]));
    }

    #[test]
    fn dominated_write_keeps_dependencies() {
        let payload = MultiKeyCausalPayload::new(
            clock(&[("a", 2)]),
            deps(&[("x", &[("a", 2)])]),
            value(&["current"]),
        );
        let mut l = MultiKeyCausalLattice::new(payload.clone());
        l.join(&MultiKeyCausalPayload::new(
            clock(&[("a", 1)]),
            deps(&[("y", &[("a", 1)])]),
            value(&["stale"]),
        ));
        assert_eq!(l.reveal(), &payload);
    }
}
