//! Statistics records published by the reporter.
//!
//! Each record is serialized and PUT as a last-writer-wins value under a
//! reserved metadata key, where the monitoring plane picks it up.

use crate::{ClientKey, Key};

/// Per-thread load statistics for one reporting epoch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThreadStatistics {
    /// Bytes of stored values, in kilobytes.
    pub storage_consumption: u64,
    /// Fraction of the epoch spent handling events.
    pub occupancy: f64,
    /// The reporting epoch, increasing by one per report.
    pub epoch: usize,
    /// Number of key accesses served during the epoch.
    pub access_count: usize,
}

/// Access frequencies of the keys this thread served within the monitoring
/// window.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyAccessSnapshot {
    /// One entry per tracked key.
    pub keys: Vec<KeyCount>,
}

/// Access count of a single key.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyCount {
    /// The tracked key.
    pub key: Key,
    /// Accesses within the monitoring window.
    pub access_count: usize,
}

/// Sizes of the keys this thread is the primary replica of.
///
/// Restricted to primary replicas so that summing over all threads does not
/// double-count replicated values.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeySizeSnapshot {
    /// One entry per primary key.
    pub key_sizes: Vec<KeySize>,
}

/// Size of a single key's serialized value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeySize {
    /// The measured key.
    pub key: ClientKey,
    /// Serialized size in bytes.
    pub size: usize,
}
