//! Entity delegates - the per-type operation surface
//!
//! A [`ModelDelegate`] binds one entity type to the store and the relation
//! registry and exposes the read/write operations. Every mutation is
//! submitted as a single atomic multi-path write built by the update-map
//! builder; the `*_map` variants expose the raw write sets so callers can
//! merge several mutations into one atomic apply.

pub(crate) mod fetch;

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future;
use serde_json::{json, Value};

use crate::error::{OrmError, OrmResult};
use crate::model::{Entity, Fetched, SerializeMode};
use crate::mutation::UpdateMapBuilder;
use crate::relations::{
    all_connected_keys, connected_keys, ConnectOptions, Disconnect, Keys, RelationRegistry,
    RelationView,
};
use crate::schema::ModelDescriptor;
use crate::store::path::{join_path, META_KEY};
use crate::store::{QueryFilter, TreeStore, UpdateMap};

/// Relation field names to hydrate on a read. `None` at the API means "all
/// relations"; an empty set means none.
pub type IncludeOptions = BTreeSet<String>;

/// Builds an include set from field names.
pub fn include<I, S>(fields: I) -> IncludeOptions
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    fields.into_iter().map(Into::into).collect()
}

/// Operations for one entity type.
#[derive(Clone)]
pub struct ModelDelegate<T: Entity> {
    pub(crate) store: Arc<dyn TreeStore>,
    /// This model's relations, projected onto its viewpoint, in declaration
    /// order.
    pub(crate) relations: Vec<RelationView>,
    pub(crate) collection_path: String,
    pub(crate) entity_name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> ModelDelegate<T> {
    pub fn new(store: Arc<dyn TreeStore>, registry: &RelationRegistry) -> OrmResult<Self> {
        let model = T::model();
        let mut relations = Vec::with_capacity(model.relations.len());
        for decl in &model.relations {
            let descriptor = registry.get(&decl.name).ok_or_else(|| {
                OrmError::Configuration(format!(
                    "relation '{}' on model '{}' is not registered",
                    decl.name, model.name
                ))
            })?;
            relations.push(RelationView::project(descriptor, &model.name)?);
        }
        Ok(Self {
            store,
            relations,
            collection_path: model.path.clone(),
            entity_name: model.name.clone(),
            _marker: PhantomData,
        })
    }

    pub fn model(&self) -> &'static ModelDescriptor {
        T::model()
    }

    /// Absolute storage path of one entity node.
    pub fn node_path(&self, id: &str) -> String {
        join_path(&[&self.collection_path, id])
    }

    pub(crate) fn builder(&self) -> UpdateMapBuilder<'_> {
        UpdateMapBuilder::new(T::model(), &self.relations)
    }

    /// The relations selected by an include set; `None` selects all.
    pub(crate) fn relations_for(&self, include: Option<&IncludeOptions>) -> Vec<RelationView> {
        match include {
            None => self.relations.clone(),
            Some(set) => self
                .relations
                .iter()
                .filter(|view| set.contains(view.local_field()))
                .cloned()
                .collect(),
        }
    }

    /// Reads one entity and hydrates the included relations. Absence is a
    /// `NotFound` error.
    pub async fn find_one(
        &self,
        id: &str,
        include: Option<&IncludeOptions>,
    ) -> OrmResult<Fetched<T>> {
        let path = self.node_path(id);
        let value = self
            .store
            .get(&path)
            .await
            .map_err(OrmError::from)?
            .ok_or(OrmError::NotFound(path))?;
        self.get_related(value, include).await
    }

    /// Reads every entity matched by the filter. An empty result set is a
    /// `NotFound` error, mirroring the single-read contract: this store
    /// cannot distinguish an empty collection from a missing one.
    pub async fn find_many(
        &self,
        filter: &QueryFilter,
        include: Option<&IncludeOptions>,
    ) -> OrmResult<Vec<Fetched<T>>> {
        let snapshot = match (&filter.field, &filter.equals) {
            (Some(field), equals) => self
                .store
                .query(
                    &self.collection_path,
                    field,
                    equals.as_ref().unwrap_or(&Value::Null),
                )
                .await
                .map_err(OrmError::from)?,
            (None, _) => self
                .store
                .get(&self.collection_path)
                .await
                .map_err(OrmError::from)?,
        };
        let children = snapshot
            .as_ref()
            .and_then(Value::as_object)
            .ok_or_else(|| OrmError::NotFound(self.collection_path.clone()))?;

        let mut output = Vec::with_capacity(children.len());
        for value in children.values() {
            output.push(self.get_related(value.clone(), include).await?);
        }
        Ok(output)
    }

    /// Reads several entities by id, in parallel. A missing id fails the
    /// whole call with `NotFound`, exactly as the per-id reads would.
    pub async fn find_multiple(
        &self,
        ids: &[String],
        include: Option<&IncludeOptions>,
    ) -> OrmResult<BTreeMap<String, Fetched<T>>> {
        let fetched =
            future::try_join_all(ids.iter().map(|id| self.find_one(id, include))).await?;
        Ok(ids.iter().cloned().zip(fetched).collect())
    }

    /// Inserts the entity, generating an id when it has none, and connects
    /// the named relations in the same atomic write. The generated id is
    /// written back onto the entity.
    pub async fn add(&self, entity: &mut T, connect: Option<&ConnectOptions>) -> OrmResult<String> {
        let (updates, id) = self.add_map(entity, connect)?;
        self.store.update(updates).await.map_err(OrmError::from)?;
        entity.set_id(id.clone());
        tracing::debug!(model = %self.entity_name, id = %id, "added entity");
        Ok(id)
    }

    /// The write set [`add`](Self::add) would submit, without applying it.
    pub fn add_map(
        &self,
        entity: &T,
        connect: Option<&ConnectOptions>,
    ) -> OrmResult<(UpdateMap, String)> {
        let mut value = serde_json::to_value(entity)?;
        let id = match entity.id().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.store.push_key(&self.collection_path),
        };
        if let Some(object) = value.as_object_mut() {
            object.insert("id".to_string(), json!(id));
        }
        let updates = self
            .builder()
            .build(&value, connect, None, SerializeMode::Full)?;
        Ok((updates, id))
    }

    /// Applies the entity's present scalar fields and the given relation
    /// directives as one atomic write.
    pub async fn update(
        &self,
        entity: &T,
        connect: Option<&ConnectOptions>,
        disconnect: Option<&Disconnect>,
    ) -> OrmResult<()> {
        let updates = self.update_map(entity, connect, disconnect).await?;
        self.store.update(updates).await.map_err(OrmError::from)?;
        tracing::debug!(model = %self.entity_name, "updated entity");
        Ok(())
    }

    /// The write set [`update`](Self::update) would submit. Directives that
    /// resolve against existing connections re-read the entity's metadata
    /// from the store first.
    pub async fn update_map(
        &self,
        entity: &T,
        connect: Option<&ConnectOptions>,
        disconnect: Option<&Disconnect>,
    ) -> OrmResult<UpdateMap> {
        let mut value = serde_json::to_value(entity)?;
        if needs_metadata(connect, disconnect) {
            self.renew_metadata(&mut value).await?;
        }
        self.builder()
            .build(&value, connect, disconnect, SerializeMode::Partial)
    }

    /// Removes the entity and disconnects related entities; the disconnect
    /// directive defaults to every recorded connection.
    pub async fn delete(&self, id: &str, disconnect: Option<&Disconnect>) -> OrmResult<()> {
        let updates = self.delete_map(id, disconnect).await?;
        self.store.update(updates).await.map_err(OrmError::from)?;
        tracing::debug!(model = %self.entity_name, id = %id, "deleted entity");
        Ok(())
    }

    /// The write set [`delete`](Self::delete) would submit: the foreign-side
    /// disconnect writes plus a null at the entity's own node. Metadata is
    /// always renewed from the store, so the disconnects reflect the
    /// connections as stored, not as the caller remembers them.
    pub async fn delete_map(
        &self,
        id: &str,
        disconnect: Option<&Disconnect>,
    ) -> OrmResult<UpdateMap> {
        let mut value = json!({ "id": id });
        self.renew_metadata(&mut value).await?;
        let disconnect = disconnect.cloned().unwrap_or(Disconnect::All);
        let mut updates =
            self.builder()
                .build(&value, None, Some(&disconnect), SerializeMode::Skip)?;
        updates.insert(self.node_path(id), Value::Null);
        Ok(updates)
    }

    /// Foreign keys recorded on `entity` for the given relation field, or
    /// `None` when the field is unknown or nothing is recorded. The answer
    /// reflects the metadata inside the value, not the store's latest state.
    pub fn connected_keys(&self, field: &str, entity: &Value) -> Option<Vec<String>> {
        let view = self
            .relations
            .iter()
            .find(|view| view.local_field() == field)?;
        connected_keys(view, entity)
    }

    /// Connected keys of every relation with recorded connections, keyed by
    /// local field name.
    pub fn all_connected_keys(&self, entity: &Value) -> BTreeMap<String, Vec<String>> {
        all_connected_keys(&self.relations, entity)
    }

    /// Overlays the stored `__refs__` sub-tree onto an entity value.
    pub(crate) async fn renew_metadata(&self, value: &mut Value) -> OrmResult<()> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                OrmError::Validation(format!(
                    "{}: cannot renew metadata without an entity id",
                    self.entity_name
                ))
            })?;
        let path = join_path(&[&self.collection_path, id, META_KEY]);
        if let Some(metadata) = self.store.get(&path).await.map_err(OrmError::from)? {
            if let Some(object) = value.as_object_mut() {
                object.insert(META_KEY.to_string(), metadata);
            }
        }
        Ok(())
    }
}

fn needs_metadata(connect: Option<&ConnectOptions>, disconnect: Option<&Disconnect>) -> bool {
    let connect_all = connect
        .map(|map| map.values().any(|keys| *keys == Keys::All))
        .unwrap_or(false);
    let disconnect_all = match disconnect {
        Some(Disconnect::All) => true,
        Some(Disconnect::Fields(map)) => map.values().any(|keys| *keys == Keys::All),
        None => false,
    };
    connect_all || disconnect_all
}
