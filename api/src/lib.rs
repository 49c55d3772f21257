#![warn(missing_docs)]

//! Data model shared between strata servers, proxies, and clients.
//!
//! This crate defines the [`Lattice`](lattice::Lattice) trait together with
//! every lattice type the store supports, the [`ClientKey`] string type, the
//! tagged [`LatticeValue`] union that travels over the wire, and the
//! [`KvError`] enum used in response messages.

use std::{error::Error, fmt, sync::Arc};

pub use crate::value::{LatticeType, LatticeValue};

pub mod lattice;

mod value;

/// A user-supplied key.
///
/// Keys are cloned on almost every hop through the request pipeline, so the
/// backing string is reference-counted: cloning bumps a counter instead of
/// reallocating.
#[derive(
    Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct ClientKey(Arc<String>);

impl std::ops::Deref for ClientKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for ClientKey {
    fn from(key: String) -> Self {
        Self(Arc::new(key))
    }
}

impl From<&str> for ClientKey {
    fn from(key: &str) -> Self {
        Self::from(key.to_owned())
    }
}

/// Error kinds reported in response messages.
///
/// Only some of the variants can originate at a server node; the rest are
/// produced by the routing tier or the client proxy, which share this enum.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum KvError {
    /// The requested key is not stored on the addressed thread.
    KeyNotFound,
    /// The addressed thread is not in the responsible set for the key.
    WrongThread,
    /// The request timed out on the client side.
    Timeout,
    /// A PUT declared a lattice type that conflicts with the type the key
    /// already carries.
    LatticeTypeMismatch,
    /// The routing tier knows of no live servers.
    NoServers,
    /// A message could not be encoded or decoded.
    Serialization,
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound => write!(f, "the requested key does not exist"),
            Self::WrongThread => {
                write!(f, "the addressed thread is not responsible for the key")
            }
            Self::Timeout => write!(f, "the request timed out"),
            Self::LatticeTypeMismatch => {
                write!(f, "the declared lattice type conflicts with the stored key")
            }
            Self::NoServers => write!(f, "no server nodes are part of the cluster"),
            Self::Serialization => write!(f, "message serialization failed"),
        }
    }
}

impl Error for KvError {}

impl From<serde_json::Error> for KvError {
    fn from(_: serde_json::Error) -> Self {
        Self::Serialization
    }
}
