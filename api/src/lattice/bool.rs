use super::Lattice;

/// Boolean lattice that joins with logical OR.
///
/// Once a `BoolLattice` has become `true` it stays `true` forever, which
/// makes it suitable for one-way flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BoolLattice(bool);

impl BoolLattice {
    /// Creates a new lattice holding the given flag.
    pub fn new(flag: bool) -> Self {
        BoolLattice(flag)
    }
}

impl Lattice for BoolLattice {
    type Element = bool;

    fn reveal(&self) -> &bool {
        &self.0
    }

    fn into_inner(self) -> bool {
        self.0
    }

    fn assign(&mut self, flag: bool) {
        self.0 = flag;
    }

    fn join(&mut self, flag: &bool) {
        self.0 = self.0 || *flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_or() {
        let mut flag = BoolLattice::default();
        assert!(!flag.reveal());

        flag.join(&false);
        assert!(!flag.reveal());

        flag.join(&true);
        assert!(*flag.reveal());

        // true is absorbing
        flag.join(&false);
        assert!(*flag.reveal());
    }
}
