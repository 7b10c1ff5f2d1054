//! Reactive observation - live streams of hydrated entities
//!
//! Each observation runs a supervisor task; collection observations spawn
//! one child task per member and fan their updates into the supervisor over
//! a channel. Object-level changes and relation re-fetching are decoupled:
//! related entities are only re-resolved when the change detector sees a
//! difference in the metadata restricted to the included relation set, so an
//! unrelated scalar write never re-fetches relations. Dropping the returned
//! stream aborts the supervisor, which tears down every child subscription.
//!
//! Merging is idempotent under event reordering: the supervisor always
//! reflects the latest known value per source, never the arrival order.

use std::collections::{BTreeMap, BTreeSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::delegate::fetch::fetch_one_related;
use crate::delegate::{IncludeOptions, ModelDelegate};
use crate::error::OrmResult;
use crate::model::{Entity, Fetched, Related};
use crate::relations::{connected_keys, RelationKind, RelationView};
use crate::store::path::{join_path, META_KEY};
use crate::store::{QueryFilter, SubscribeTarget, TreeStore};

/// Which relations keep live store subscriptions while observed, instead of
/// being re-fetched once per metadata change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenNested {
    /// Related entities are fetched once per metadata change.
    #[default]
    None,
    /// Every included relation stays live.
    All,
    /// Per-kind granularity.
    Kinds {
        one_to_one: bool,
        one_to_many: bool,
        many_to_many: bool,
    },
}

impl ListenNested {
    fn for_kind(self, kind: RelationKind) -> bool {
        match self {
            ListenNested::None => false,
            ListenNested::All => true,
            ListenNested::Kinds {
                one_to_one,
                one_to_many,
                many_to_many,
            } => match kind {
                RelationKind::OneToOne => one_to_one,
                RelationKind::OneToMany => one_to_many,
                RelationKind::ManyToMany => many_to_many,
            },
        }
    }
}

/// Options for collection observations.
#[derive(Debug, Clone)]
pub struct ObserveOptions {
    /// Relations to hydrate; `None` means all.
    pub include: Option<IncludeOptions>,
    pub listen_nested: ListenNested,
    /// Window collapsing rapid successive raw changes into one re-emission.
    pub debounce: Duration,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            include: None,
            listen_nested: ListenNested::None,
            debounce: Duration::from_millis(500),
        }
    }
}

impl ObserveOptions {
    pub fn with_include(mut self, include: IncludeOptions) -> Self {
        self.include = Some(include);
        self
    }

    pub fn with_listen_nested(mut self, listen_nested: ListenNested) -> Self {
        self.listen_nested = listen_nested;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Live stream of one hydrated entity. Errors are terminal; a vanished
/// node completes the stream instead.
pub type EntityStream<T> = Pin<Box<dyn Stream<Item = OrmResult<Fetched<T>>> + Send>>;

/// Live stream of a hydrated entity set, keyed by id.
pub type EntityMapStream<T> =
    Pin<Box<dyn Stream<Item = OrmResult<BTreeMap<String, Fetched<T>>>> + Send>>;

/// Output stream that aborts its supervisor task on drop, tearing down all
/// child subscriptions with it.
struct Guarded<S> {
    inner: S,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: Stream + Unpin> Stream for Guarded<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

impl<S> Drop for Guarded<S> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The entity's metadata restricted to the given relation fields, bucket by
/// bucket. Two values with equal views need no relation re-fetch.
fn metadata_view(value: &Value, fields: &BTreeSet<String>) -> Value {
    let mut out = Map::new();
    if let Some(meta) = value.get(META_KEY).and_then(Value::as_object) {
        for (kind, bucket) in meta {
            if let Some(bucket) = bucket.as_object() {
                let filtered: Map<String, Value> = bucket
                    .iter()
                    .filter(|(field, _)| fields.contains(*field))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect();
                if !filtered.is_empty() {
                    out.insert(kind.clone(), Value::Object(filtered));
                }
            }
        }
    }
    Value::Object(out)
}

fn metadata_changed(previous: Option<&Value>, current: &Value, fields: &BTreeSet<String>) -> bool {
    match previous {
        None => true,
        Some(previous) => metadata_view(previous, fields) != metadata_view(current, fields),
    }
}

fn strip_meta(value: &Value) -> Value {
    let mut stripped = value.clone();
    if let Some(object) = stripped.as_object_mut() {
        object.remove(META_KEY);
    }
    stripped
}

/// Spawns one watcher per included relation. Without nested listening a
/// watcher resolves its relation once and reports; with it, the watcher
/// keeps the store subscription open and reports every foreign-side change.
/// Watchers end when the consuming channel closes.
fn spawn_related_watchers(
    store: &Arc<dyn TreeStore>,
    views: &[RelationView],
    value: &Value,
    id: &str,
    listen: ListenNested,
    tx: &mpsc::UnboundedSender<(String, OrmResult<Related>)>,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::with_capacity(views.len());
    for view in views {
        let field = view.local_field().to_string();
        let live = listen.for_kind(view.kind());
        let store = Arc::clone(store);
        let tx = tx.clone();
        let view = view.clone();
        let value = value.clone();
        let id = id.to_string();
        tasks.push(tokio::spawn(async move {
            if live {
                watch_related(store, view, value, id, field, tx).await;
            } else {
                let result = fetch_one_related(store.as_ref(), &view, &value, &id).await;
                let _ = tx.send((field, result));
            }
        }));
    }
    tasks
}

async fn watch_related(
    store: Arc<dyn TreeStore>,
    view: RelationView,
    value: Value,
    id: String,
    field: String,
    tx: mpsc::UnboundedSender<(String, OrmResult<Related>)>,
) {
    if view.local_is_single() {
        let key = connected_keys(&view, &value)
            .and_then(|mut keys| (!keys.is_empty()).then(|| keys.swap_remove(0)));
        let Some(key) = key else {
            let _ = tx.send((field, Ok(Related::One(None))));
            return;
        };
        let target = SubscribeTarget::Path(join_path(&[view.foreign_collection_path(), &key]));
        let mut stream = match store.subscribe(target, false) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = tx.send((field, Err(err.into())));
                return;
            }
        };
        while let Some(foreign) = stream.next().await {
            if tx.send((field.clone(), Ok(Related::One(foreign)))).is_err() {
                break;
            }
        }
    } else if view.kind() == RelationKind::OneToMany {
        // Master side: live back-reference query on the foreign collection.
        let target = SubscribeTarget::Query {
            path: view.foreign_collection_path().to_string(),
            field: view.foreign_reference(),
            equals: json!(id),
        };
        let mut stream = match store.subscribe(target, false) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = tx.send((field, Err(err.into())));
                return;
            }
        };
        while let Some(snapshot) = stream.next().await {
            let children: BTreeMap<String, Option<Value>> = snapshot
                .and_then(|value| value.as_object().cloned())
                .map(|map| map.into_iter().map(|(k, v)| (k, Some(v))).collect())
                .unwrap_or_default();
            if tx.send((field.clone(), Ok(Related::Many(children)))).is_err() {
                break;
            }
        }
    } else {
        // Many-to-many: one live subscription per connected key, merged.
        let keys = connected_keys(&view, &value).unwrap_or_default();
        if keys.is_empty() {
            let _ = tx.send((field, Ok(Related::Many(BTreeMap::new()))));
            return;
        }
        let mut streams = Vec::with_capacity(keys.len());
        for key in &keys {
            let target = SubscribeTarget::Path(join_path(&[view.foreign_collection_path(), key]));
            match store.subscribe(target, false) {
                Ok(stream) => {
                    let key = key.clone();
                    streams.push(Box::pin(stream.map(move |v| (key.clone(), v)))
                        as Pin<Box<dyn Stream<Item = (String, Option<Value>)> + Send>>);
                }
                Err(err) => {
                    let _ = tx.send((field, Err(err.into())));
                    return;
                }
            }
        }
        let mut merged = futures::stream::select_all(streams);
        let mut members: BTreeMap<String, Option<Value>> = BTreeMap::new();
        while let Some((key, member)) = merged.next().await {
            members.insert(key, member);
            // Report once every key has delivered, then on each change.
            if members.len() == keys.len()
                && tx
                    .send((field.clone(), Ok(Related::Many(members.clone()))))
                    .is_err()
            {
                break;
            }
        }
    }
}

/// Emits the merged value when both halves are ready. `Err(())` means the
/// stream is finished (consumer gone or a terminal decode error was sent).
async fn emit_one<T: Entity>(
    delegate: &ModelDelegate<T>,
    object: &Option<Value>,
    related: &BTreeMap<String, Related>,
    expected: usize,
    out: &mpsc::Sender<OrmResult<Fetched<T>>>,
) -> Result<(), ()> {
    let Some(value) = object else {
        return Ok(());
    };
    if related.len() != expected {
        return Ok(());
    }
    match delegate.assemble(value.clone(), related.clone()) {
        Ok(fetched) => out.send(Ok(fetched)).await.map_err(|_| ()),
        Err(err) => {
            let _ = out.send(Err(err)).await;
            Err(())
        }
    }
}

struct MemberHandle {
    tx: mpsc::UnboundedSender<Value>,
    task: JoinHandle<()>,
}

fn send_member<T: Entity>(
    delegate: &ModelDelegate<T>,
    key: &str,
    object: &Option<Value>,
    related: &BTreeMap<String, Related>,
    agg: &mpsc::UnboundedSender<(String, OrmResult<Fetched<T>>)>,
) -> Result<(), ()> {
    let Some(value) = object else {
        return Ok(());
    };
    match delegate.assemble(value.clone(), related.clone()) {
        Ok(fetched) => agg.send((key.to_string(), Ok(fetched))).map_err(|_| ()),
        Err(err) => {
            let _ = agg.send((key.to_string(), Err(err)));
            Err(())
        }
    }
}

/// Per-member state machine for collection observations. Raw values are
/// pushed in from the aggregate snapshot; the member re-resolves relations
/// on metadata changes and reports merged values upward.
fn spawn_member<T: Entity>(
    delegate: &ModelDelegate<T>,
    key: String,
    views: Vec<RelationView>,
    fields: BTreeSet<String>,
    listen: ListenNested,
    agg_tx: mpsc::UnboundedSender<(String, OrmResult<Fetched<T>>)>,
) -> MemberHandle {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Value>();
    let delegate = delegate.clone();
    let task = tokio::spawn(async move {
        let (rel_tx, mut rel_rx) = mpsc::unbounded_channel::<(String, OrmResult<Related>)>();
        let mut watchers: Vec<JoinHandle<()>> = Vec::new();
        let mut previous: Option<Value> = None;
        let mut object: Option<Value> = None;
        let mut related: BTreeMap<String, Related> = BTreeMap::new();
        let expected = views.len();
        loop {
            tokio::select! {
                raw = raw_rx.recv() => match raw {
                    None => break,
                    Some(value) => {
                        if metadata_changed(previous.as_ref(), &value, &fields) {
                            for watcher in watchers.drain(..) {
                                watcher.abort();
                            }
                            watchers = spawn_related_watchers(
                                &delegate.store, &views, &value, &key, listen, &rel_tx,
                            );
                        }
                        let object_changed = previous
                            .as_ref()
                            .map(|p| strip_meta(p) != strip_meta(&value))
                            .unwrap_or(true);
                        previous = Some(value.clone());
                        object = Some(value);
                        if object_changed
                            && related.len() == expected
                            && send_member(&delegate, &key, &object, &related, &agg_tx).is_err()
                        {
                            break;
                        }
                    }
                },
                message = rel_rx.recv() => match message {
                    Some((field, Ok(value))) => {
                        let changed = related.get(&field) != Some(&value);
                        related.insert(field, value);
                        if changed
                            && object.is_some()
                            && related.len() == expected
                            && send_member(&delegate, &key, &object, &related, &agg_tx).is_err()
                        {
                            break;
                        }
                    }
                    Some((_, Err(err))) => {
                        let _ = agg_tx.send((key.clone(), Err(err)));
                        break;
                    }
                    None => break,
                },
            }
        }
        for watcher in watchers {
            watcher.abort();
        }
    });
    MemberHandle { tx: raw_tx, task }
}

impl<T: Entity> ModelDelegate<T> {
    /// Live stream of one entity with its included relations. Re-emits on
    /// every object change; re-resolves relations only when the included
    /// metadata changes. If the node does not exist (or disappears), logs an
    /// error and completes rather than erroring the subscriber.
    pub fn observe_one(
        &self,
        id: &str,
        include: Option<&IncludeOptions>,
        listen_nested: ListenNested,
    ) -> OrmResult<EntityStream<T>> {
        let raw = self
            .store
            .subscribe(SubscribeTarget::Path(self.node_path(id)), false)
            .map_err(crate::error::OrmError::from)?;
        let views = self.relations_for(include);
        let fields: BTreeSet<String> = views.iter().map(|v| v.local_field().to_string()).collect();
        let delegate = self.clone();
        let observed_id = id.to_string();
        let (out_tx, out_rx) = mpsc::channel::<OrmResult<Fetched<T>>>(16);

        let supervisor = tokio::spawn(async move {
            let mut raw = raw;
            let (rel_tx, mut rel_rx) = mpsc::unbounded_channel::<(String, OrmResult<Related>)>();
            let mut watchers: Vec<JoinHandle<()>> = Vec::new();
            let mut previous: Option<Value> = None;
            let mut object: Option<Value> = None;
            let mut related: BTreeMap<String, Related> = BTreeMap::new();
            let expected = views.len();
            loop {
                tokio::select! {
                    event = raw.next() => match event {
                        None => break,
                        Some(None) => {
                            tracing::error!(
                                model = %delegate.entity_name,
                                id = %observed_id,
                                "observed snapshot does not exist; completing stream"
                            );
                            break;
                        }
                        Some(Some(value)) => {
                            if metadata_changed(previous.as_ref(), &value, &fields) {
                                for watcher in watchers.drain(..) {
                                    watcher.abort();
                                }
                                watchers = spawn_related_watchers(
                                    &delegate.store, &views, &value, &observed_id,
                                    listen_nested, &rel_tx,
                                );
                            }
                            previous = Some(value.clone());
                            object = Some(value);
                            if emit_one(&delegate, &object, &related, expected, &out_tx).await.is_err() {
                                break;
                            }
                        }
                    },
                    message = rel_rx.recv() => match message {
                        Some((field, Ok(value))) => {
                            related.insert(field, value);
                            if emit_one(&delegate, &object, &related, expected, &out_tx).await.is_err() {
                                break;
                            }
                        }
                        Some((_, Err(err))) => {
                            let _ = out_tx.send(Err(err)).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
            for watcher in watchers {
                watcher.abort();
            }
        });

        Ok(Box::pin(Guarded {
            inner: ReceiverStream::new(out_rx),
            tasks: vec![supervisor],
        }))
    }

    /// Observes several ids at once; emits the full map once every member
    /// has delivered, then on every member change. A member that disappears
    /// keeps its last value until its stream completes.
    pub fn observe_multiple(
        &self,
        ids: &[String],
        include: Option<&IncludeOptions>,
        listen_nested: ListenNested,
    ) -> OrmResult<EntityMapStream<T>> {
        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            members.push((id.clone(), self.observe_one(id, include, listen_nested)?));
        }
        let expected = members.len();
        let (out_tx, out_rx) = mpsc::channel::<OrmResult<BTreeMap<String, Fetched<T>>>>(16);

        let supervisor = tokio::spawn(async move {
            let streams = members.into_iter().map(|(id, stream)| {
                Box::pin(stream.map(move |item| (id.clone(), item)))
                    as Pin<Box<dyn Stream<Item = (String, OrmResult<Fetched<T>>)> + Send>>
            });
            let mut merged = futures::stream::select_all(streams);
            let mut latest: BTreeMap<String, Fetched<T>> = BTreeMap::new();
            while let Some((id, item)) = merged.next().await {
                match item {
                    Ok(fetched) => {
                        latest.insert(id, fetched);
                        if latest.len() == expected && out_tx.send(Ok(latest.clone())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = out_tx.send(Err(err)).await;
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(Guarded {
            inner: ReceiverStream::new(out_rx),
            tasks: vec![supervisor],
        }))
    }

    /// Observes the query's result set. Members appearing and disappearing
    /// spin their per-member state machines up and down; the aggregate
    /// re-emits only when the member set or any member's merged value
    /// changes. Raw query changes inside the debounce window collapse into
    /// one re-evaluation.
    pub fn observe_many(
        &self,
        filter: &QueryFilter,
        options: ObserveOptions,
    ) -> OrmResult<EntityMapStream<T>> {
        let target = match &filter.field {
            Some(field) => SubscribeTarget::Query {
                path: self.collection_path.clone(),
                field: field.clone(),
                equals: filter.equals.clone().unwrap_or(Value::Null),
            },
            None => SubscribeTarget::Path(self.collection_path.clone()),
        };
        let raw = self
            .store
            .subscribe(target, false)
            .map_err(crate::error::OrmError::from)?;
        let views = self.relations_for(options.include.as_ref());
        let fields: BTreeSet<String> = views.iter().map(|v| v.local_field().to_string()).collect();
        let listen_nested = options.listen_nested;
        let debounce = options.debounce;
        let delegate = self.clone();
        let (out_tx, out_rx) = mpsc::channel::<OrmResult<BTreeMap<String, Fetched<T>>>>(16);

        let supervisor = tokio::spawn(async move {
            let mut raw = raw;
            let (agg_tx, mut agg_rx) =
                mpsc::unbounded_channel::<(String, OrmResult<Fetched<T>>)>();
            let mut members: BTreeMap<String, MemberHandle> = BTreeMap::new();
            let mut latest: BTreeMap<String, Fetched<T>> = BTreeMap::new();
            let mut pending: Option<Option<Value>> = None;
            'supervise: loop {
                tokio::select! {
                    event = raw.next() => match event {
                        None => break,
                        Some(snapshot) => {
                            pending = Some(snapshot);
                        }
                    },
                    _ = tokio::time::sleep(debounce), if pending.is_some() => {
                        let snapshot = pending.take().expect("guarded by select condition");
                        match snapshot {
                            None => {
                                tracing::warn!(
                                    model = %delegate.entity_name,
                                    "observed result set is empty"
                                );
                                for handle in members.values() {
                                    handle.task.abort();
                                }
                                members.clear();
                                latest.clear();
                                if out_tx.send(Ok(BTreeMap::new())).await.is_err() {
                                    break;
                                }
                            }
                            Some(snapshot) => {
                                let Some(children) = snapshot.as_object() else {
                                    continue;
                                };
                                let removed: Vec<String> = members
                                    .keys()
                                    .filter(|key| !children.contains_key(*key))
                                    .cloned()
                                    .collect();
                                let mut membership_changed = !removed.is_empty();
                                for key in removed {
                                    if let Some(handle) = members.remove(&key) {
                                        handle.task.abort();
                                    }
                                    latest.remove(&key);
                                }
                                for (key, value) in children {
                                    if !members.contains_key(key) {
                                        membership_changed = true;
                                        members.insert(
                                            key.clone(),
                                            spawn_member(
                                                &delegate,
                                                key.clone(),
                                                views.clone(),
                                                fields.clone(),
                                                listen_nested,
                                                agg_tx.clone(),
                                            ),
                                        );
                                    }
                                    let handle = members.get(key).expect("just inserted");
                                    let _ = handle.tx.send(value.clone());
                                }
                                // A shrunk set can re-emit right away; growth
                                // emits once the new member reports.
                                if membership_changed
                                    && !members.is_empty()
                                    && latest.len() == members.len()
                                    && out_tx.send(Ok(latest.clone())).await.is_err()
                                {
                                    break 'supervise;
                                }
                            }
                        }
                    },
                    message = agg_rx.recv() => match message {
                        Some((key, Ok(fetched))) => {
                            if members.contains_key(&key) {
                                latest.insert(key, fetched);
                                if latest.len() == members.len()
                                    && out_tx.send(Ok(latest.clone())).await.is_err()
                                {
                                    break;
                                }
                            }
                        }
                        Some((_, Err(err))) => {
                            let _ = out_tx.send(Err(err)).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
            for handle in members.values() {
                handle.task.abort();
            }
        });

        Ok(Box::pin(Guarded {
            inner: ReceiverStream::new(out_rx),
            tasks: vec![supervisor],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_view_restricts_to_included_fields() {
        let fields: BTreeSet<String> = ["club".to_string()].into_iter().collect();
        let value = json!({
            "id": "s1",
            "name": "ada",
            "__refs__": {
                "one_to_many": {"club": "c1"},
                "many_to_many": {"courses": {"m1": {"connected": true}}}
            }
        });
        assert_eq!(
            metadata_view(&value, &fields),
            json!({"one_to_many": {"club": "c1"}})
        );
    }

    #[test]
    fn test_metadata_changed_ignores_scalar_edits() {
        let fields: BTreeSet<String> = ["club".to_string()].into_iter().collect();
        let before = json!({"name": "ada", "__refs__": {"one_to_many": {"club": "c1"}}});
        let after_scalar = json!({"name": "ada l.", "__refs__": {"one_to_many": {"club": "c1"}}});
        let after_relation = json!({"name": "ada l.", "__refs__": {"one_to_many": {"club": "c2"}}});

        assert!(!metadata_changed(Some(&before), &after_scalar, &fields));
        assert!(metadata_changed(Some(&before), &after_relation, &fields));
        assert!(metadata_changed(None, &before, &fields));
    }

    #[test]
    fn test_listen_nested_granularity() {
        assert!(!ListenNested::None.for_kind(RelationKind::OneToOne));
        assert!(ListenNested::All.for_kind(RelationKind::ManyToMany));
        let kinds = ListenNested::Kinds {
            one_to_one: true,
            one_to_many: false,
            many_to_many: true,
        };
        assert!(kinds.for_kind(RelationKind::OneToOne));
        assert!(!kinds.for_kind(RelationKind::OneToMany));
        assert!(kinds.for_kind(RelationKind::ManyToMany));
    }

    #[test]
    fn test_strip_meta() {
        let value = json!({"id": "s1", "__refs__": {"one_to_many": {"club": "c1"}}});
        assert_eq!(strip_meta(&value), json!({"id": "s1"}));
    }
}
