//! The [`KeyResponse`] message and its building blocks.

use crate::{Key, KvError, LatticeValue};

/// The response to a [`KeyRequest`](super::KeyRequest).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyResponse {
    /// Echo of the request's `request_id`.
    pub response_id: Option<String>,
    /// Whether this answers a GET or a PUT.
    pub ty: ResponseType,
    /// Error affecting the request as a whole; per-key errors live in the
    /// tuples.
    pub error: Result<(), KvError>,
    /// One entry per key of the request batch.
    pub tuples: Vec<KeyTuple>,
}

/// Distinguishes GET from PUT responses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum ResponseType {
    /// Response to a GET.
    Get,
    /// Response to a PUT.
    Put,
}

/// The per-key part of a [`KeyResponse`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyTuple {
    /// The key this entry is about.
    pub key: Key,
    /// The stored (GET) or merged (PUT) value; `None` on error.
    pub lattice: Option<LatticeValue>,
    /// Error for this key, if any.
    pub error: Option<KvError>,
    /// Set when the caller's cached responsible-thread count for this key is
    /// stale and should be re-resolved through the routing tier.
    pub invalidate: bool,
}

impl KeyTuple {
    /// An entry with no value, no error, and no invalidation.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            lattice: None,
            error: None,
            invalidate: false,
        }
    }
}
