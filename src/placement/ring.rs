//! The raw 64-bit consistent hash ring.

use crate::Key;
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap},
    hash::{Hash, Hasher},
};

/// Maps hash positions on a 64-bit ring to entries.
///
/// Entries are placed at the hash of their own identity; lookups walk the
/// ring clockwise starting at the hash of the key. Every node in the cluster
/// computes the same positions, so placement agrees globally as long as the
/// ring contents agree.
pub struct HashRing<T> {
    positions: BTreeMap<u64, T>,
}

impl<T> HashRing<T>
where
    T: Hash,
{
    /// The number of entries on the ring.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if the ring has no entries.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Places an entry at the hash of its identity.
    ///
    /// Position collisions resolve deterministically (last insert wins), so
    /// all nodes agree even on the degenerate case.
    pub fn insert(&mut self, entry: T) {
        self.positions.insert(position(&entry), entry);
    }

    /// Removes an entry, addressed by its identity.
    pub fn remove(&mut self, entry: &T) {
        self.positions.remove(&position(entry));
    }

    /// Walks the ring clockwise starting at the hash of `key`, wrapping
    /// around at the end.
    pub fn walk_from(&self, key: &Key) -> impl Iterator<Item = &T> {
        let start = position(key);
        self.positions
            .range(start..)
            .chain(self.positions.range(..start))
            .map(|(_, entry)| entry)
    }
}

impl<T> Default for HashRing<T> {
    fn default() -> Self {
        Self {
            positions: Default::default(),
        }
    }
}

fn position<T: Hash + ?Sized>(entry: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    entry.hash(&mut hasher);
    hasher.finish()
}

/// One virtual ring entry of a server node.
///
/// The incarnation number is part of the hashed identity, so a rejoining
/// node lands on fresh positions and its previous incarnation can be removed
/// without guesswork.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct VirtualNode {
    node_id: String,
    incarnation: u32,
    index: u32,
}

impl VirtualNode {
    /// Creates the `index`-th virtual entry of the given node incarnation.
    pub fn new(node_id: String, incarnation: u32, index: u32) -> Self {
        Self {
            node_id,
            incarnation,
            index,
        }
    }

    /// The node this entry belongs to.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

/// One virtual ring entry of a worker thread.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct VirtualThread {
    thread_id: u32,
    index: u32,
}

impl VirtualThread {
    /// Creates the `index`-th virtual entry of the given thread.
    pub fn new(thread_id: u32, index: u32) -> Self {
        Self { thread_id, index }
    }

    /// The thread this entry belongs to.
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> Key {
        Key::Client(name.into())
    }

    #[test]
    fn walk_visits_every_entry_once() {
        let mut ring = HashRing::default();
        for index in 0..8 {
            ring.insert(VirtualThread::new(index, 0));
        }

        let visited: Vec<u32> = ring.walk_from(&key("k")).map(|t| t.thread_id()).collect();
        assert_eq!(visited.len(), 8);
        let mut sorted = visited.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn walk_is_deterministic() {
        let mut a = HashRing::default();
        let mut b = HashRing::default();
        for index in 0..8 {
            a.insert(VirtualThread::new(index, 7));
            b.insert(VirtualThread::new(index, 7));
        }

        let from_a: Vec<u32> = a.walk_from(&key("x")).map(|t| t.thread_id()).collect();
        let from_b: Vec<u32> = b.walk_from(&key("x")).map(|t| t.thread_id()).collect();
        assert_eq!(from_a, from_b);
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut ring = HashRing::default();
        ring.insert(VirtualThread::new(1, 0));
        ring.insert(VirtualThread::new(2, 0));
        ring.remove(&VirtualThread::new(1, 0));

        assert_eq!(ring.len(), 1);
        assert!(ring.walk_from(&key("k")).all(|t| t.thread_id() == 2));
    }
}
