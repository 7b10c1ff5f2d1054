//! # canopy-orm: relations for hierarchical real-time stores
//!
//! An object-relational layer over JSON-tree databases with value-change
//! subscriptions. Application code declares typed models and named
//! bidirectional relations (one-to-one, one-to-many, many-to-many); the
//! crate maintains the denormalized back-references on both sides of every
//! relation through atomic multi-path writes, and serves live, debounced
//! streams of entities hydrated with their related entities.
//!
//! The entry point is [`Canopy::initialize`], which builds the relation
//! registry once from an explicit model list and hands out per-type
//! [`ModelDelegate`]s.

pub mod delegate;
pub mod error;
pub mod indices;
pub mod model;
pub mod mutation;
pub mod observe;
pub mod relations;
pub mod schema;
pub mod store;

use std::sync::Arc;

pub use delegate::{include, IncludeOptions, ModelDelegate};
pub use error::{OrmError, OrmResult};
pub use indices::index_manifest;
pub use model::{Entity, Fetched, Related, SerializeMode};
pub use mutation::UpdateMapBuilder;
pub use observe::{EntityMapStream, EntityStream, ListenNested, ObserveOptions};
pub use relations::{
    connect_one, ConnectOptions, Disconnect, Keys, RelationDescriptor, RelationKind,
    RelationRegistry, RelationView,
};
pub use schema::{ModelDescriptor, PropertyDescriptor, PropertyType, RelationDecl};
pub use store::{
    MemoryStore, QueryFilter, StoreError, StoreResult, SubscribeTarget, TreeStore, UpdateMap,
};

/// A configured ORM instance: one store handle plus the relation registry,
/// built once and shared by reference. No global state, no import-order
/// side effects - everything the delegates need is passed in here.
pub struct Canopy {
    store: Arc<dyn TreeStore>,
    registry: Arc<RelationRegistry>,
}

impl Canopy {
    /// Builds the relation registry from the full model list and binds it to
    /// the store. Configuration errors here are fatal: a half-declared
    /// relation cannot be repaired at runtime.
    pub fn initialize(store: Arc<dyn TreeStore>, models: &[ModelDescriptor]) -> OrmResult<Self> {
        let registry = Arc::new(RelationRegistry::build(models)?);
        tracing::info!(
            models = models.len(),
            relations = registry.len(),
            "canopy initialized"
        );
        Ok(Self { store, registry })
    }

    /// The operation surface for one entity type.
    pub fn delegate<T: Entity>(&self) -> OrmResult<ModelDelegate<T>> {
        ModelDelegate::new(Arc::clone(&self.store), &self.registry)
    }

    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RelationRegistry> {
        &self.registry
    }

    /// JSON text describing the server-side indices the registered
    /// relations require.
    pub fn indices(&self) -> String {
        index_manifest(&self.registry)
    }
}
