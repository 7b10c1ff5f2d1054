//! Relation descriptors and viewpoint projections
//!
//! A [`RelationDescriptor`] is the canonical, immutable record of one
//! declared relation between two models. All viewpoint-dependent questions
//! (which side is local, where does my back-reference live, am I the master)
//! go through a [`RelationView`], a cheap read-only projection produced by
//! `with_side` - the canonical descriptor is never mutated.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};
use crate::store::path::{join_path, META_KEY};

/// Cardinality of a relation. `many_to_one` is accepted as an input alias
/// for `one_to_many` (the same relation viewed from the many side) and
/// normalizes to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    #[serde(rename = "one_to_one")]
    OneToOne,
    #[serde(rename = "one_to_many", alias = "many_to_one")]
    OneToMany,
    #[serde(rename = "many_to_many")]
    ManyToMany,
}

impl RelationKind {
    /// Storage segment used in default back-reference paths. Keeping the
    /// kind in the path keeps defaults distinct when several relation kinds
    /// share a field name.
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::OneToOne => "one_to_one",
            RelationKind::OneToMany => "one_to_many",
            RelationKind::ManyToMany => "many_to_many",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one_to_one" => Some(RelationKind::OneToOne),
            "one_to_many" | "many_to_one" => Some(RelationKind::OneToMany),
            "many_to_many" => Some(RelationKind::ManyToMany),
            _ => None,
        }
    }

    /// True for kinds where both sides behave identically (no master/slave
    /// polarity).
    pub fn is_symmetric(self) -> bool {
        !matches!(self, RelationKind::OneToMany)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One participating side of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSide {
    /// Model name.
    pub model: String,
    /// The model's storage collection root.
    pub collection_path: String,
}

/// Canonical record of one relation. For one-to-many, side 0 is always the
/// master (the "one" side whose field holds the collection of children).
/// Immutable once the registry has seen both declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    name: String,
    kind: RelationKind,
    sides: [RelationSide; 2],
    fields: [String; 2],
    references: [Option<String>; 2],
}

impl RelationDescriptor {
    pub(crate) fn new(
        name: String,
        kind: RelationKind,
        sides: [RelationSide; 2],
        fields: [String; 2],
        references: [Option<String>; 2],
    ) -> Self {
        Self {
            name,
            kind,
            sides,
            fields,
            references,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn side(&self, idx: usize) -> &RelationSide {
        &self.sides[idx]
    }

    pub fn field(&self, idx: usize) -> &str {
        &self.fields[idx]
    }

    /// Back-reference sub-path on the given side: the explicit path when one
    /// was declared, otherwise `__refs__/<kind>/<field>`.
    pub fn reference(&self, idx: usize) -> String {
        self.references[idx]
            .clone()
            .unwrap_or_else(|| join_path(&[META_KEY, self.kind.as_str(), &self.fields[idx]]))
    }

}

/// A relation seen from one of its sides. `local_*` accessors answer for the
/// viewpoint model, `foreign_*` for the other side. Projecting again onto
/// the other side yields the reversed view; projecting a reversed view back
/// restores the original orientation - there is never a third state.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationView {
    descriptor: Arc<RelationDescriptor>,
    reversed: bool,
}

impl RelationView {
    /// Projects a relation onto the viewpoint of `model`. Errors when the
    /// model is neither side.
    pub fn project(descriptor: &Arc<RelationDescriptor>, model: &str) -> OrmResult<RelationView> {
        if descriptor.sides[0].model == model {
            Ok(RelationView {
                descriptor: Arc::clone(descriptor),
                reversed: false,
            })
        } else if descriptor.sides[1].model == model {
            Ok(RelationView {
                descriptor: Arc::clone(descriptor),
                reversed: true,
            })
        } else {
            Err(OrmError::Configuration(format!(
                "model '{}' is not a side of relation '{}'",
                model,
                descriptor.name()
            )))
        }
    }

    fn local_idx(&self) -> usize {
        usize::from(self.reversed)
    }

    fn foreign_idx(&self) -> usize {
        usize::from(!self.reversed)
    }

    pub fn descriptor(&self) -> &Arc<RelationDescriptor> {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn kind(&self) -> RelationKind {
        self.descriptor.kind()
    }

    pub fn local_model(&self) -> &str {
        &self.descriptor.side(self.local_idx()).model
    }

    pub fn foreign_model(&self) -> &str {
        &self.descriptor.side(self.foreign_idx()).model
    }

    pub fn local_field(&self) -> &str {
        self.descriptor.field(self.local_idx())
    }

    pub fn foreign_field(&self) -> &str {
        self.descriptor.field(self.foreign_idx())
    }

    pub fn local_reference(&self) -> String {
        self.descriptor.reference(self.local_idx())
    }

    pub fn foreign_reference(&self) -> String {
        self.descriptor.reference(self.foreign_idx())
    }

    pub fn local_collection_path(&self) -> &str {
        &self.descriptor.side(self.local_idx()).collection_path
    }

    pub fn foreign_collection_path(&self) -> &str {
        &self.descriptor.side(self.foreign_idx()).collection_path
    }

    /// For one-to-many: is the viewpoint the "one" side? Symmetric kinds
    /// report `true` from both sides.
    pub fn is_master(&self) -> bool {
        self.kind().is_symmetric() || !self.reversed
    }

    pub fn is_slave(&self) -> bool {
        !self.is_master()
    }

    /// Whether the stored back-reference on the viewpoint side is a single
    /// scalar id (as opposed to a map keyed by foreign id).
    pub fn local_is_single(&self) -> bool {
        match self.kind() {
            RelationKind::OneToOne => true,
            RelationKind::OneToMany => self.is_slave(),
            RelationKind::ManyToMany => false,
        }
    }

    pub fn foreign_is_single(&self) -> bool {
        match self.kind() {
            RelationKind::OneToOne => true,
            RelationKind::OneToMany => self.is_master(),
            RelationKind::ManyToMany => false,
        }
    }

    /// Re-projects onto `model`, which must be one of the two sides.
    pub fn with_side(&self, model: &str) -> OrmResult<RelationView> {
        if self.local_model() == model {
            Ok(self.clone())
        } else if self.foreign_model() == model {
            Ok(RelationView {
                descriptor: Arc::clone(&self.descriptor),
                reversed: !self.reversed,
            })
        } else {
            Err(OrmError::Configuration(format!(
                "model '{}' is not a side of relation '{}'",
                model,
                self.name()
            )))
        }
    }
}
