//! Store abstraction - the hierarchical real-time tree the ORM writes to
//!
//! The underlying document store is an external collaborator: a JSON tree
//! addressed by slash paths, with atomic multi-path updates and value-change
//! subscriptions. This module defines the trait the rest of the crate
//! programs against, plus the in-process [`MemoryStore`] backend used for
//! development and tests.

pub mod memory;
pub mod path;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::future;
use futures::Stream;
use serde_json::Value;

use crate::error::OrmError;
use self::path::join_path;

pub use memory::MemoryStore;

/// One atomic multi-path write: absolute path to new value. Writing
/// [`Value::Null`] at a path deletes that subtree. `BTreeMap` keeps the
/// write set deterministic for a given input.
pub type UpdateMap = BTreeMap<String, Value>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store backend error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("subscription closed by the store")]
    SubscriptionClosed,
}

impl From<StoreError> for OrmError {
    fn from(err: StoreError) -> Self {
        OrmError::Store(err.to_string())
    }
}

/// Target of a change subscription: a single node, or a single-field
/// equality query over a collection's direct children.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeTarget {
    Path(String),
    Query {
        path: String,
        /// Slash path evaluated inside each child.
        field: String,
        equals: Value,
    },
}

/// Single-field equality filter, the only query shape the store supports.
/// `field` may be a slash path into each child node. An empty filter reads
/// the whole collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub field: Option<String>,
    pub equals: Option<Value>,
}

impl QueryFilter {
    /// Matches every child of the collection.
    pub fn none() -> Self {
        Self::default()
    }

    /// Matches children whose value at `field` equals `value`.
    pub fn field_equals(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: Some(field.into()),
            equals: Some(value),
        }
    }
}

/// Stream of values at a subscribed target. Each item is the full current
/// value (`None` when the node does not exist). The subscription ends when
/// the stream is dropped.
pub type ValueStream = Pin<Box<dyn Stream<Item = Option<Value>> + Send>>;

/// Black-box hierarchical store: get/query/update/push/subscribe over a
/// JSON tree. All suspension points of the ORM are awaits on these methods.
#[async_trait]
pub trait TreeStore: Send + Sync + 'static {
    /// Reads the subtree at `path`. `None` when the node does not exist.
    async fn get(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Reads the direct children of `path` whose value at the `field` slash
    /// path equals `equals`. `None` when nothing matches.
    async fn query(&self, path: &str, field: &str, equals: &Value) -> StoreResult<Option<Value>>;

    /// Applies `updates` as a single all-or-nothing write. Observers see at
    /// most one change notification per call.
    async fn update(&self, updates: UpdateMap) -> StoreResult<()>;

    /// Generates a new child key for `path` without writing anything.
    fn push_key(&self, path: &str) -> String;

    /// Subscribes to value changes at `target`. The current value is
    /// delivered first; `only_once` ends the stream after that first value.
    fn subscribe(&self, target: SubscribeTarget, only_once: bool) -> StoreResult<ValueStream>;
}

/// Fetches several children of one collection in parallel. An absent member
/// yields `None` rather than failing the batch; only transport errors fail.
pub async fn multi_get(
    store: &dyn TreeStore,
    collection_path: &str,
    ids: &[String],
) -> StoreResult<BTreeMap<String, Option<Value>>> {
    let paths: Vec<String> = ids
        .iter()
        .map(|id| join_path(&[collection_path, id]))
        .collect();
    let values = future::try_join_all(paths.iter().map(|path| store.get(path))).await?;
    Ok(ids.iter().cloned().zip(values).collect())
}
