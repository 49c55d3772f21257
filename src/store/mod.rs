//! Value storage behind the serializer registry.
//!
//! Each lattice type has its own backend. Memory-tier nodes install an
//! in-memory backend per type, disk-tier nodes a file-per-key backend. The
//! registry dispatches by lattice type and is the only way handlers touch
//! stored values.

pub use self::{disk::DiskSerializer, memory::MemorySerializer};
use crate::{Key, LatticeType, LatticeValue};
use eyre::{anyhow, Context};
use std::{collections::HashMap, path::Path};

mod disk;
mod memory;

/// What a thread knows about one of its stored keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyProperty {
    /// Serialized size of the current value in bytes.
    pub size: usize,
    /// The lattice type the key was created with. Fixed for the key's
    /// lifetime on this node.
    pub lattice_type: LatticeType,
}

/// Per-thread index of materialized keys and their properties.
pub type StoredKeyMap = HashMap<Key, KeyProperty>;

/// A storage backend for a single lattice type.
///
/// `put` performs the lattice join against the stored value, so callers get
/// read-merge-write semantics no matter where the bytes live.
pub trait Serializer: Send {
    /// Reads the current value and its serialized size.
    fn get(&self, key: &Key) -> eyre::Result<Option<(LatticeValue, usize)>>;

    /// Merges `value` into the stored value (or creates the key), returning
    /// the merged value and its new serialized size.
    fn put(&mut self, key: &Key, value: &LatticeValue) -> eyre::Result<(LatticeValue, usize)>;

    /// Deletes the key.
    fn remove(&mut self, key: &Key) -> eyre::Result<()>;
}

/// Owns one [`Serializer`] per lattice type and dispatches operations to the
/// backend matching the key's type.
pub struct SerializerRegistry {
    backends: HashMap<LatticeType, Box<dyn Serializer>>,
}

impl SerializerRegistry {
    /// A registry with in-memory backends for every lattice type.
    pub fn memory() -> Self {
        let mut backends: HashMap<LatticeType, Box<dyn Serializer>> = HashMap::new();
        for &ty in LatticeType::ALL {
            backends.insert(ty, Box::new(MemorySerializer::default()));
        }
        Self { backends }
    }

    /// A registry with file-per-key disk backends for every lattice type.
    ///
    /// `base` is the storage root; each thread owns the subdirectory named
    /// after its thread ID, so threads never contend on files.
    pub fn disk(base: &Path, thread_id: u32) -> eyre::Result<Self> {
        let thread_dir = base.join(thread_id.to_string());
        let mut backends: HashMap<LatticeType, Box<dyn Serializer>> = HashMap::new();
        for &ty in LatticeType::ALL {
            backends.insert(ty, Box::new(DiskSerializer::new(&thread_dir, ty)?));
        }
        Ok(Self { backends })
    }

    /// Reads a key from the backend of the given lattice type.
    pub fn get(&self, ty: LatticeType, key: &Key) -> eyre::Result<Option<(LatticeValue, usize)>> {
        self.backend(ty)?.get(key)
    }

    /// Merges a value into the backend matching the value's lattice type.
    pub fn put(&mut self, key: &Key, value: &LatticeValue) -> eyre::Result<(LatticeValue, usize)> {
        let ty = value.ty();
        self.backend_mut(ty)?.put(key, value)
    }

    /// Removes a key from the backend of the given lattice type.
    pub fn remove(&mut self, ty: LatticeType, key: &Key) -> eyre::Result<()> {
        self.backend_mut(ty)?.remove(key)
    }

    fn backend(&self, ty: LatticeType) -> eyre::Result<&dyn Serializer> {
        self.backends
            .get(&ty)
            .map(|backend| backend.as_ref())
            .ok_or_else(|| anyhow!("no serializer registered for lattice type {:?}", ty))
    }

    fn backend_mut(&mut self, ty: LatticeType) -> eyre::Result<&mut Box<dyn Serializer>> {
        self.backends
            .get_mut(&ty)
            .ok_or_else(|| anyhow!("no serializer registered for lattice type {:?}", ty))
    }
}

/// Serializes a value the way the backends store it, for size accounting.
pub fn serialized_size(value: &LatticeValue) -> eyre::Result<usize> {
    let encoded = serde_json::to_vec(value).context("failed to serialize lattice value")?;
    Ok(encoded.len())
}
