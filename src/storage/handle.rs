//! Map Handle Contract
//!
//! The surface a dispatcher consumes from the grid: a cloneable handle to one
//! named map, and a provider that hands such handles out by name.
//!
//! Every call may wait, either on a key lock held by another owner or on the
//! network when the handle talks to a remote grid node.

use super::predicate::{Predicate, PredicateError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

/// Coarse classification of a map failure, shared over the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MapErrorKind {
    NullValue,
    NotLockOwner,
    LockTimeout,
    Predicate,
    Unavailable,
    Protocol,
}

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("null values are not allowed in map '{map}'")]
    NullValue { map: String },

    #[error("key '{key}' of map '{map}' is not locked by this owner")]
    NotLockOwner { map: String, key: String },

    #[error("key '{key}' of map '{map}' stayed locked by another owner for {waited_ms} ms")]
    LockTimeout {
        map: String,
        key: String,
        waited_ms: u64,
    },

    #[error(transparent)]
    Predicate(#[from] PredicateError),

    #[error("grid node unavailable: {0}")]
    Unavailable(String),

    #[error("grid node rejected the request ({kind:?}): {message}")]
    Remote { kind: MapErrorKind, message: String },

    #[error("malformed grid response: {0}")]
    Protocol(String),
}

impl MapError {
    pub fn kind(&self) -> MapErrorKind {
        match self {
            MapError::NullValue { .. } => MapErrorKind::NullValue,
            MapError::NotLockOwner { .. } => MapErrorKind::NotLockOwner,
            MapError::LockTimeout { .. } => MapErrorKind::LockTimeout,
            MapError::Predicate(_) => MapErrorKind::Predicate,
            MapError::Unavailable(_) => MapErrorKind::Unavailable,
            MapError::Remote { kind, .. } => *kind,
            MapError::Protocol(_) => MapErrorKind::Protocol,
        }
    }

    /// True when the failure is about reaching the grid, not about the request.
    pub fn is_transport(&self) -> bool {
        self.kind() == MapErrorKind::Unavailable
    }
}

pub type MapResult<T> = Result<T, MapError>;

/// A handle to one named, concurrent key-value map.
///
/// Handles are cheap to clone. Key locks taken through a handle are owned by
/// that handle (and its clones): writes through other handles wait until the
/// key is unlocked.
pub trait MapHandle: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;

    /// A handle to the same map under a fresh lock owner.
    fn fork(&self) -> Self;

    /// Inserts or replaces, returning the previous value.
    fn put(&self, key: &str, value: Value) -> impl Future<Output = MapResult<Option<Value>>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = MapResult<Option<Value>>> + Send;

    /// Looks up every key; keys without a value are left out of the result.
    fn get_all(
        &self,
        keys: &BTreeSet<String>,
    ) -> impl Future<Output = MapResult<BTreeMap<String, Value>>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = MapResult<Option<Value>>> + Send;

    /// Replaces the value only if the key is present; returns the previous value.
    fn replace(&self, key: &str, value: Value) -> impl Future<Output = MapResult<Option<Value>>> + Send;

    /// Atomically replaces the value only if it currently equals `expected`.
    fn replace_if(
        &self,
        key: &str,
        expected: Value,
        value: Value,
    ) -> impl Future<Output = MapResult<bool>> + Send;

    fn values(&self) -> impl Future<Output = MapResult<Vec<Value>>> + Send;

    fn values_where(&self, predicate: &Predicate) -> impl Future<Output = MapResult<Vec<Value>>> + Send;

    fn clear(&self) -> impl Future<Output = MapResult<()>> + Send;

    /// Waits until the key is free, then locks it for this handle. Reentrant.
    fn lock(&self, key: &str) -> impl Future<Output = MapResult<()>> + Send;

    fn unlock(&self, key: &str) -> impl Future<Output = MapResult<()>> + Send;
}

/// Hands out map handles by name.
pub trait MapProvider: Send + Sync + 'static {
    type Map: MapHandle;

    fn get_map(&self, name: &str) -> Self::Map;
}
