use crate::{
    lattice::{
        causal::{MultiKeyCausalLattice, SingleKeyCausalLattice},
        Lattice, LastWriterWinsLattice, OrderedSetLattice, PriorityLattice, SetLattice,
    },
    KvError,
};
use eyre::anyhow;

/// A stored value, tagged with its lattice type.
///
/// This is the unit that requests, responses, and gossip messages carry.
/// The payload of every variant is raw bytes; interpreting them is up to the
/// client.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LatticeValue {
    /// Last-writer-wins register.
    Lww(LastWriterWinsLattice<Vec<u8>>),
    /// Unordered set.
    Set(SetLattice<Vec<u8>>),
    /// Ordered set.
    OrderedSet(OrderedSetLattice<Vec<u8>>),
    /// Single-key causal register.
    SingleCausal(SingleKeyCausalLattice<SetLattice<Vec<u8>>>),
    /// Multi-key causal register with dependency tracking.
    MultiCausal(MultiKeyCausalLattice<SetLattice<Vec<u8>>>),
    /// Min-priority register.
    Priority(PriorityLattice<Vec<u8>>),
}

macro_rules! cast_fns {
    ($as_fn:ident, $into_fn:ident, $variant:ident, $ty:ty, $name:literal) => {
        /// Borrows the wrapped lattice if the value has the matching type.
        pub fn $as_fn(&self) -> eyre::Result<&$ty> {
            match self {
                Self::$variant(val) => Ok(val),
                other => Err(anyhow!(concat!("expected ", $name, " lattice, got `{:?}`"), other)),
            }
        }

        /// Unwraps the lattice if the value has the matching type.
        pub fn $into_fn(self) -> eyre::Result<$ty> {
            match self {
                Self::$variant(val) => Ok(val),
                other => Err(anyhow!(concat!("expected ", $name, " lattice, got `{:?}`"), other)),
            }
        }
    };
}

impl LatticeValue {
    cast_fns!(as_lww, into_lww, Lww, LastWriterWinsLattice<Vec<u8>>, "Lww");
    cast_fns!(as_set, into_set, Set, SetLattice<Vec<u8>>, "Set");
    cast_fns!(
        as_ordered_set,
        into_ordered_set,
        OrderedSet,
        OrderedSetLattice<Vec<u8>>,
        "OrderedSet"
    );
    cast_fns!(
        as_single_causal,
        into_single_causal,
        SingleCausal,
        SingleKeyCausalLattice<SetLattice<Vec<u8>>>,
        "SingleCausal"
    );
    cast_fns!(
        as_multi_causal,
        into_multi_causal,
        MultiCausal,
        MultiKeyCausalLattice<SetLattice<Vec<u8>>>,
        "MultiCausal"
    );
    cast_fns!(
        as_priority,
        into_priority,
        Priority,
        PriorityLattice<Vec<u8>>,
        "Priority"
    );

    /// Merges `other` into `self` if both sides have the same lattice type.
    ///
    /// Returns [`KvError::LatticeTypeMismatch`] (and leaves `self` untouched)
    /// if the types differ.
    pub fn try_merge(&mut self, other: &LatticeValue) -> Result<(), KvError> {
        match (self, other) {
            (Self::Lww(s), Self::Lww(o)) => s.merge(o),
            (Self::Set(s), Self::Set(o)) => s.merge(o),
            (Self::OrderedSet(s), Self::OrderedSet(o)) => s.merge(o),
            (Self::SingleCausal(s), Self::SingleCausal(o)) => s.merge(o),
            (Self::MultiCausal(s), Self::MultiCausal(o)) => s.merge(o),
            (Self::Priority(s), Self::Priority(o)) => s.merge(o),
            _ => return Err(KvError::LatticeTypeMismatch),
        }
        Ok(())
    }

    /// The lattice type tag of this value.
    pub fn ty(&self) -> LatticeType {
        match self {
            Self::Lww(_) => LatticeType::Lww,
            Self::Set(_) => LatticeType::Set,
            Self::OrderedSet(_) => LatticeType::OrderedSet,
            Self::SingleCausal(_) => LatticeType::SingleCausal,
            Self::MultiCausal(_) => LatticeType::MultiCausal,
            Self::Priority(_) => LatticeType::Priority,
        }
    }
}

impl From<LastWriterWinsLattice<Vec<u8>>> for LatticeValue {
    fn from(val: LastWriterWinsLattice<Vec<u8>>) -> Self {
        Self::Lww(val)
    }
}

impl From<SetLattice<Vec<u8>>> for LatticeValue {
    fn from(val: SetLattice<Vec<u8>>) -> Self {
        Self::Set(val)
    }
}

impl From<OrderedSetLattice<Vec<u8>>> for LatticeValue {
    fn from(val: OrderedSetLattice<Vec<u8>>) -> Self {
        Self::OrderedSet(val)
    }
}

impl From<SingleKeyCausalLattice<SetLattice<Vec<u8>>>> for LatticeValue {
    fn from(val: SingleKeyCausalLattice<SetLattice<Vec<u8>>>) -> Self {
        Self::SingleCausal(val)
    }
}

impl From<MultiKeyCausalLattice<SetLattice<Vec<u8>>>> for LatticeValue {
    fn from(val: MultiKeyCausalLattice<SetLattice<Vec<u8>>>) -> Self {
        Self::MultiCausal(val)
    }
}

impl From<PriorityLattice<Vec<u8>>> for LatticeValue {
    fn from(val: PriorityLattice<Vec<u8>>) -> Self {
        Self::Priority(val)
    }
}

/// The closed set of lattice types the store supports.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum LatticeType {
    /// Last-writer-wins register.
    Lww,
    /// Unordered set.
    Set,
    /// Ordered set.
    OrderedSet,
    /// Single-key causal register.
    SingleCausal,
    /// Multi-key causal register.
    MultiCausal,
    /// Min-priority register.
    Priority,
}

impl LatticeType {
    /// All lattice types, in a fixed order.
    pub const ALL: &'static [LatticeType] = &[
        LatticeType::Lww,
        LatticeType::Set,
        LatticeType::OrderedSet,
        LatticeType::SingleCausal,
        LatticeType::MultiCausal,
        LatticeType::Priority,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::last_writer_wins::Timestamp;

    #[test]
    fn try_merge_same_type() {
        let mut value = LatticeValue::Set(SetLattice::new(
            [b"a".to_vec()].iter().cloned().collect(),
        ));
        let other = LatticeValue::Set(SetLattice::new(
            [b"b".to_vec()].iter().cloned().collect(),
        ));

        value.try_merge(&other).unwrap();
        assert_eq!(value.as_set().unwrap().len().reveal(), &2);
    }

    #[test]
    fn try_merge_type_mismatch() {
        let mut value =
            LatticeValue::Lww(LastWriterWinsLattice::from_pair(Timestamp::now(), vec![1]));
        let other = LatticeValue::Set(SetLattice::default());

        assert_eq!(value.try_merge(&other), Err(KvError::LatticeTypeMismatch));
        // the stored value is untouched
        assert_eq!(value.as_lww().unwrap().reveal().value(), &vec![1]);
    }

    #[test]
    fn type_tags() {
        let value = LatticeValue::Priority(PriorityLattice::from_pair(1.0, vec![]));
        assert_eq!(value.ty(), LatticeType::Priority);
        assert!(value.as_lww().is_err());
    }
}
