//! In-process tree store
//!
//! A [`TreeStore`] backed by a JSON tree in memory, with the same observable
//! semantics as the real backend: atomic multi-path updates, null-deletes,
//! and change subscriptions that deliver the current value on subscribe and
//! re-deliver only when the value at the subscribed target actually changes.
//! Used as the development backend and as the store double in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use super::path::{delete_at_path, set_at_path, value_at_path};
use super::{StoreResult, SubscribeTarget, TreeStore, UpdateMap, ValueStream};

struct Subscriber {
    target: SubscribeTarget,
    /// Last delivered value; `None` means "node absent" was delivered.
    last: Option<Value>,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

/// In-memory [`TreeStore`] implementation.
pub struct MemoryStore {
    root: RwLock<Value>,
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber: AtomicU64,
    /// Log of every get/query path served, for change-count assertions in
    /// tests.
    reads: Mutex<Vec<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_root(Value::Object(Map::new()))
    }

    /// Creates a store seeded with an existing tree.
    pub fn with_root(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
            subscribers: DashMap::new(),
            next_subscriber: AtomicU64::new(0),
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of every read served so far, in order.
    pub fn read_log(&self) -> Vec<String> {
        self.reads.lock().expect("read log poisoned").clone()
    }

    pub fn clear_read_log(&self) {
        self.reads.lock().expect("read log poisoned").clear();
    }

    fn record_read(&self, entry: String) {
        self.reads.lock().expect("read log poisoned").push(entry);
    }

    fn evaluate(root: &Value, target: &SubscribeTarget) -> Option<Value> {
        match target {
            SubscribeTarget::Path(path) => value_at_path(root, path).cloned(),
            SubscribeTarget::Query { path, field, equals } => {
                let children = value_at_path(root, path)?.as_object()?;
                let matches: Map<String, Value> = children
                    .iter()
                    .filter(|(_, child)| value_at_path(child, field) == Some(equals))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if matches.is_empty() {
                    None
                } else {
                    Some(Value::Object(matches))
                }
            }
        }
    }

    /// One notification pass after an atomic update: every subscriber whose
    /// target value changed gets exactly one delivery.
    fn notify(&self) {
        let root = self.root.read().expect("store tree poisoned");
        let mut dropped = Vec::new();
        for mut entry in self.subscribers.iter_mut() {
            let current = Self::evaluate(&root, &entry.target);
            if current == entry.last {
                continue;
            }
            if entry.tx.send(current.clone()).is_err() {
                dropped.push(*entry.key());
                continue;
            }
            entry.last = current;
        }
        drop(root);
        for id in dropped {
            self.subscribers.remove(&id);
        }
    }
}

/// Strips null entries out of a value before insertion; the store holds no
/// explicit nulls (writing null at a path is a delete).
fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), sanitize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait::async_trait]
impl TreeStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        self.record_read(format!("get:{}", path));
        let root = self.root.read().expect("store tree poisoned");
        Ok(value_at_path(&root, path).cloned())
    }

    async fn query(&self, path: &str, field: &str, equals: &Value) -> StoreResult<Option<Value>> {
        self.record_read(format!("query:{}?{}", path, field));
        let root = self.root.read().expect("store tree poisoned");
        Ok(Self::evaluate(
            &root,
            &SubscribeTarget::Query {
                path: path.to_string(),
                field: field.to_string(),
                equals: equals.clone(),
            },
        ))
    }

    async fn update(&self, updates: UpdateMap) -> StoreResult<()> {
        tracing::debug!(paths = updates.len(), "applying atomic update");
        {
            let mut root = self.root.write().expect("store tree poisoned");
            for (path, value) in &updates {
                if value.is_null() {
                    delete_at_path(&mut root, path);
                } else {
                    set_at_path(&mut root, path, sanitize(value));
                }
            }
        }
        self.notify();
        Ok(())
    }

    fn push_key(&self, _path: &str) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn subscribe(&self, target: SubscribeTarget, only_once: bool) -> StoreResult<ValueStream> {
        let current = {
            let root = self.root.read().expect("store tree poisoned");
            Self::evaluate(&root, &target)
        };
        if only_once {
            return Ok(Box::pin(futures::stream::iter([current])));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(current.clone()).expect("receiver alive");
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(subscriber = id, ?target, "subscribed");
        self.subscribers.insert(
            id,
            Subscriber {
                target,
                last: current,
                tx,
            },
        );
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
