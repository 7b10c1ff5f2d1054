//! Relation registry - pairing the two declarations of every relation
//!
//! Built once from the full model list at initialization, validated
//! eagerly, and read-only afterwards: the registry is shared behind an
//! `Arc` with no locking, which is safe precisely because nothing writes
//! after `build` returns.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{OrmError, OrmResult};
use crate::schema::{ModelDescriptor, RelationDecl};

use super::descriptor::{RelationDescriptor, RelationKind, RelationSide};

/// Process-wide mapping from relation name to its canonical descriptor.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    relations: HashMap<String, Arc<RelationDescriptor>>,
    by_model: HashMap<String, Vec<Arc<RelationDescriptor>>>,
}

impl RelationRegistry {
    /// Pairs and validates all relation declarations across `models`.
    ///
    /// Fails with a `Configuration` error when a relation name does not have
    /// exactly two declarations, when the kind is missing on both sides or
    /// contradicts between them, or when the master flag is not on exactly
    /// one side of a one-to-many.
    pub fn build(models: &[ModelDescriptor]) -> OrmResult<Self> {
        let mut seen_models: HashMap<&str, &ModelDescriptor> = HashMap::new();
        for model in models {
            if seen_models.insert(&model.name, model).is_some() {
                return Err(OrmError::Configuration(format!(
                    "model '{}' is declared more than once",
                    model.name
                )));
            }
        }

        let mut order: Vec<&str> = Vec::new();
        let mut declarations: HashMap<&str, Vec<(&ModelDescriptor, &RelationDecl)>> =
            HashMap::new();
        for model in models {
            for decl in &model.relations {
                let entry = declarations.entry(&decl.name).or_default();
                if entry.is_empty() {
                    order.push(&decl.name);
                }
                entry.push((model, decl));
            }
        }

        let mut registry = Self::default();
        for name in order {
            let pair = &declarations[name];
            if pair.len() != 2 {
                return Err(OrmError::Configuration(format!(
                    "relation '{}' must be declared on exactly two models, found {}",
                    name,
                    pair.len()
                )));
            }
            let (model_a, decl_a) = pair[0];
            let (model_b, decl_b) = pair[1];

            if decl_a.foreign_model != model_b.name || decl_b.foreign_model != model_a.name {
                return Err(OrmError::Configuration(format!(
                    "relation '{}': declarations disagree on the participating models \
                     ('{}' names '{}', '{}' names '{}')",
                    name, model_a.name, decl_a.foreign_model, model_b.name, decl_b.foreign_model
                )));
            }

            let kind = match (decl_a.kind, decl_b.kind) {
                (None, None) => {
                    return Err(OrmError::Configuration(format!(
                        "relation '{}': kind is not defined on either side",
                        name
                    )))
                }
                (Some(kind), None) | (None, Some(kind)) => kind,
                (Some(a), Some(b)) if a == b => a,
                (Some(a), Some(b)) => {
                    return Err(OrmError::Configuration(format!(
                        "relation '{}': sides declare conflicting kinds ({} vs {})",
                        name, a, b
                    )))
                }
            };

            if kind != RelationKind::OneToMany && (decl_a.master || decl_b.master) {
                return Err(OrmError::Configuration(format!(
                    "relation '{}': the master flag is only meaningful for one_to_many",
                    name
                )));
            }

            // Side 0 is the master for one-to-many; declaration order for
            // symmetric kinds.
            let ((master_model, master_decl), (slave_model, slave_decl)) = match kind {
                RelationKind::OneToMany => match (decl_a.master, decl_b.master) {
                    (true, false) => (pair[0], pair[1]),
                    (false, true) => (pair[1], pair[0]),
                    _ => {
                        return Err(OrmError::Configuration(format!(
                            "relation '{}': the master flag must be set on exactly one side \
                             of a one_to_many",
                            name
                        )))
                    }
                },
                _ => (pair[0], pair[1]),
            };

            let descriptor = Arc::new(RelationDescriptor::new(
                name.to_string(),
                kind,
                [
                    RelationSide {
                        model: master_model.name.clone(),
                        collection_path: master_model.path.clone(),
                    },
                    RelationSide {
                        model: slave_model.name.clone(),
                        collection_path: slave_model.path.clone(),
                    },
                ],
                [master_decl.field.clone(), slave_decl.field.clone()],
                [master_decl.reference.clone(), slave_decl.reference.clone()],
            ));

            registry
                .relations
                .insert(name.to_string(), Arc::clone(&descriptor));
            registry
                .by_model
                .entry(master_model.name.clone())
                .or_default()
                .push(Arc::clone(&descriptor));
            if slave_model.name != master_model.name {
                registry
                    .by_model
                    .entry(slave_model.name.clone())
                    .or_default()
                    .push(descriptor);
            }
        }

        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RelationDescriptor>> {
        self.relations.get(name)
    }

    /// Every relation the given model participates in.
    pub fn relations_for(&self, model: &str) -> &[Arc<RelationDescriptor>] {
        self.by_model
            .get(model)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RelationDescriptor>> {
        self.relations.values()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
