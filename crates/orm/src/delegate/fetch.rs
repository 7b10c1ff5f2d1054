//! Fetch/relate resolution - hydrating an entity with its related entities
//!
//! For each included relation, fetches the foreign side per the relation's
//! cardinality and direction: a single get for single-valued references, a
//! back-reference equality query for the one-to-many master, and a parallel
//! multi-get for many-to-many. A single relation's store failure fails the
//! whole composite fetch; only absent members of a multi-get degrade to
//! `None`.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::{OrmError, OrmResult};
use crate::model::{validate_fetched, Entity, Fetched, Related};
use crate::relations::{connected_keys, RelationKind, RelationView};
use crate::store::path::{join_path, META_KEY};
use crate::store::{multi_get, TreeStore};

use super::{IncludeOptions, ModelDelegate};

/// Fetches the related value for one relation, from the viewpoint of the
/// entity that owns `value`. The caller supplies the entity id because a
/// master-side query filters the foreign collection by it.
pub(crate) async fn fetch_one_related(
    store: &dyn TreeStore,
    view: &RelationView,
    value: &Value,
    id: &str,
) -> OrmResult<Related> {
    match view.kind() {
        RelationKind::OneToOne => fetch_single(store, view, value).await,
        RelationKind::OneToMany if view.is_master() => fetch_children(store, view, id).await,
        RelationKind::OneToMany => fetch_single(store, view, value).await,
        RelationKind::ManyToMany => fetch_members(store, view, value).await,
    }
}

/// Single-valued reference: fetch the one foreign entity the metadata names.
/// No recorded key means no store round-trip and an empty result.
async fn fetch_single(
    store: &dyn TreeStore,
    view: &RelationView,
    value: &Value,
) -> OrmResult<Related> {
    let key = connected_keys(view, value).and_then(|mut keys| {
        if keys.is_empty() {
            None
        } else {
            Some(keys.swap_remove(0))
        }
    });
    let fetched = match key {
        Some(key) => store
            .get(&join_path(&[view.foreign_collection_path(), &key]))
            .await
            .map_err(OrmError::from)?,
        None => None,
    };
    Ok(Related::One(fetched))
}

/// Master side of a one-to-many: server-side equality query on the foreign
/// collection's back-reference.
async fn fetch_children(store: &dyn TreeStore, view: &RelationView, id: &str) -> OrmResult<Related> {
    let snapshot = store
        .query(
            view.foreign_collection_path(),
            &view.foreign_reference(),
            &json!(id),
        )
        .await
        .map_err(OrmError::from)?;
    let children = snapshot
        .and_then(|value| value.as_object().cloned())
        .map(|map| map.into_iter().map(|(k, v)| (k, Some(v))).collect())
        .unwrap_or_default();
    Ok(Related::Many(children))
}

/// Many-to-many: fetch every connected key in parallel; absent members map
/// to `None` rather than failing the batch.
async fn fetch_members(
    store: &dyn TreeStore,
    view: &RelationView,
    value: &Value,
) -> OrmResult<Related> {
    let keys = connected_keys(view, value).unwrap_or_default();
    let members = multi_get(store, view.foreign_collection_path(), &keys)
        .await
        .map_err(OrmError::from)?;
    Ok(Related::Many(members))
}

impl<T: Entity> ModelDelegate<T> {
    /// Hydrates a raw entity value with the included related entities.
    /// Use this when the value was fetched manually: the connected instances
    /// come from the metadata inside the value, so stale metadata yields
    /// stale relations.
    pub async fn get_related(
        &self,
        value: Value,
        include: Option<&IncludeOptions>,
    ) -> OrmResult<Fetched<T>> {
        let related = self.fetch_related(&value, include).await?;
        self.assemble(value, related)
    }

    /// The relation-fetch half of [`get_related`](Self::get_related).
    pub(crate) async fn fetch_related(
        &self,
        value: &Value,
        include: Option<&IncludeOptions>,
    ) -> OrmResult<BTreeMap<String, Related>> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OrmError::Validation(format!(
                    "{}: get_related requires an entity id",
                    self.entity_name
                ))
            })?
            .to_string();
        tracing::debug!(model = %self.entity_name, id = %id, "resolving related entities");

        let mut related = BTreeMap::new();
        for view in self.relations_for(include) {
            let fetched = fetch_one_related(self.store.as_ref(), &view, value, &id).await?;
            related.insert(view.local_field().to_string(), fetched);
        }
        Ok(related)
    }

    /// Validates and decodes a raw value into the typed entity, pairing it
    /// with its metadata and related values.
    pub(crate) fn assemble(
        &self,
        value: Value,
        related: BTreeMap<String, Related>,
    ) -> OrmResult<Fetched<T>> {
        validate_fetched(T::model(), &value)?;
        let metadata = value.get(META_KEY).cloned().unwrap_or(Value::Null);
        let entity: T = serde_json::from_value(value)?;
        Ok(Fetched {
            entity,
            metadata,
            related,
        })
    }
}
