//! Model descriptors - explicit schema input
//!
//! Descriptors are assembled by external tooling (annotation processors or
//! code generation) and handed to [`crate::Canopy::initialize`] as plain
//! values. Nothing in the crate relies on runtime type introspection; the
//! registry is built once from this list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::relations::RelationKind;

/// Primitive type tag of a scalar property. Validation only cares about the
/// tag where the store representation is ambiguous (timestamps); everything
/// else passes through serde untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Json,
}

/// One declared scalar property of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub property_type: PropertyType,
    pub is_array: bool,
    pub optional: bool,
    pub default_value: Option<Value>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            is_array: false,
            optional: false,
            default_value: None,
        }
    }

    /// Marks the property as holding an array of its primitive type.
    pub fn with_array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Marks the property as optional (absent/null tolerated).
    pub fn with_optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Value written when an optional property is absent.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// One side's declaration of a named relation. The same `name` must appear
/// on exactly two models; the registry pairs them into a
/// [`crate::relations::RelationDescriptor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDecl {
    /// Identifier shared by both declarations that define one relation.
    pub name: String,
    /// Relation kind; may be left to the other side's declaration, but at
    /// least one side must carry it.
    pub kind: Option<RelationKind>,
    /// Property name on this model holding the relation.
    pub field: String,
    /// Name of the model on the other side.
    pub foreign_model: String,
    /// Explicit storage sub-path for this side's back-reference. Defaults to
    /// a path derived from the relation kind and field name.
    pub reference: Option<String>,
    /// For one-to-many: marks this declaration as the "one" side, whose
    /// field holds the collection of children.
    pub master: bool,
}

impl RelationDecl {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        foreign_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: None,
            field: field.into(),
            foreign_model: foreign_model.into(),
            reference: None,
            master: false,
        }
    }

    pub fn with_kind(mut self, kind: RelationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn as_master(mut self) -> Self {
        self.master = true;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Immutable description of one entity type: name, storage collection root,
/// scalar properties, and relation declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    /// Storage collection root, e.g. `/students`.
    pub path: String,
    pub properties: Vec<PropertyDescriptor>,
    pub relations: Vec<RelationDecl>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            properties: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_relation(mut self, relation: RelationDecl) -> Self {
        self.relations.push(relation);
        self
    }

    /// Scalar properties, excluding any that a relation declaration claims
    /// as its field. Only these take part in entity (de)serialization.
    pub fn base_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties
            .iter()
            .filter(|p| !self.relations.iter().any(|r| r.field == p.name))
    }
}
