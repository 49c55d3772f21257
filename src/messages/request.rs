//! The [`KeyRequest`] message and its building blocks.

use super::response::{KeyResponse, ResponseType};
use crate::{ClientKey, Key, LatticeValue};
use std::collections::HashMap;

/// A batched GET or PUT against one server thread.
///
/// Gossip reuses this schema: a gossip batch is a `KeyRequest` with PUT
/// semantics, no `request_id`, and no `response_address`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyRequest {
    /// Caller-chosen ID for matching the asynchronous response; `None` for
    /// fire-and-forget messages such as gossip.
    pub request_id: Option<String>,
    /// Topic the response is published to; `None` suppresses the response.
    pub response_address: Option<String>,
    /// How many responsible threads the caller currently knows per key; the
    /// server flags the response for invalidation when its own count
    /// differs.
    pub address_cache_size: HashMap<ClientKey, usize>,
    /// The operation to perform.
    pub operation: RequestOperation,
}

impl KeyRequest {
    /// Starts a [`KeyResponse`] answering this request, with no tuples and
    /// no error yet.
    pub fn new_response(&self) -> KeyResponse {
        KeyResponse {
            response_id: self.request_id.clone(),
            ty: self.operation.response_ty(),
            error: Ok(()),
            tuples: Vec::new(),
        }
    }
}

/// The payload of a [`KeyRequest`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RequestOperation {
    /// Reads the values of the given keys.
    Get {
        /// The keys to read.
        keys: Vec<Key>,
    },
    /// Merges the given values into the store.
    Put {
        /// The writes batched into this request.
        tuples: Vec<PutTuple>,
    },
}

impl RequestOperation {
    /// Splits the batch into per-key operations.
    pub fn into_operations(self) -> Vec<KeyOperation> {
        match self {
            RequestOperation::Get { keys } => keys.into_iter().map(KeyOperation::Get).collect(),
            RequestOperation::Put { tuples } => {
                tuples.into_iter().map(KeyOperation::Put).collect()
            }
        }
    }

    /// The [`ResponseType`] a response to this operation carries.
    pub fn response_ty(&self) -> ResponseType {
        match self {
            RequestOperation::Get { .. } => ResponseType::Get,
            RequestOperation::Put { .. } => ResponseType::Put,
        }
    }
}

/// A single write within a PUT batch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PutTuple {
    /// The key to update.
    pub key: Key,
    /// The value merged into the current one.
    pub value: LatticeValue,
}

/// One key's worth of work from a request batch.
#[derive(Debug)]
pub enum KeyOperation {
    /// Read the key.
    Get(Key),
    /// Merge a value into the key.
    Put(PutTuple),
}

impl KeyOperation {
    /// The key this operation touches.
    pub fn key(&self) -> &Key {
        match self {
            KeyOperation::Get(key) => key,
            KeyOperation::Put(tuple) => &tuple.key,
        }
    }

    /// The [`ResponseType`] for this operation.
    pub fn response_ty(&self) -> ResponseType {
        match self {
            KeyOperation::Get(_) => ResponseType::Get,
            KeyOperation::Put(_) => ResponseType::Put,
        }
    }

    /// The value to write, if this is a PUT.
    pub fn into_value(self) -> Option<LatticeValue> {
        match self {
            KeyOperation::Get(_) => None,
            KeyOperation::Put(tuple) => Some(tuple.value),
        }
    }
}
