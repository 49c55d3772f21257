use crate::lattice::{
    causal::{causal_order, CausalOrder, VectorClock},
    Lattice,
};

/// Causally consistent register for a single key.
///
/// Each value carries a [`VectorClock`]. Joining first classifies the two
/// clocks: a strictly dominating incoming write supersedes the local state
/// wholesale, a dominated one is discarded, and concurrent writes fall back
/// to joining both the clocks and the values.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SingleKeyCausalLattice<T> {
    state: VectorClockValuePair<T>,
}

impl<T> SingleKeyCausalLattice<T> {
    /// Creates a new lattice from the given clocked value.
    pub fn new(state: VectorClockValuePair<T>) -> Self {
        Self { state }
    }
}

impl<T> Lattice for SingleKeyCausalLattice<T>
where
    T: Lattice + Clone,
{
    type Element = VectorClockValuePair<T>;

    fn reveal(&self) -> &VectorClockValuePair<T> {
        &self.state
    }

    fn into_inner(self) -> VectorClockValuePair<T> {
        self.state
    }

    fn assign(&mut self, state: VectorClockValuePair<T>) {
        self.state = state;
    }

    fn join(&mut self, incoming: &VectorClockValuePair<T>) {
        match causal_order(&self.state.vector_clock, &incoming.vector_clock) {
            CausalOrder::Behind => self.state = incoming.clone(),
            CausalOrder::Ahead => {}
            CausalOrder::Concurrent => {
                self.state.vector_clock.merge(&incoming.vector_clock);
                self.state.value.merge(&incoming.value);
            }
        }
    }
}

/// A value and the [`VectorClock`] describing its causal history.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[allow(missing_docs)]
pub struct VectorClockValuePair<T> {
    pub value: T,
    pub vector_clock: VectorClock,
}

impl<T> VectorClockValuePair<T> {
    /// Pairs the given clock and value.
    pub fn new(vector_clock: VectorClock, value: T) -> Self {
        Self {
            value,
            vector_clock,
        }
    }
}
