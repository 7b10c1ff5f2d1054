//! Connected-keys resolution
//!
//! Reads the set of foreign keys currently recorded on an entity for a
//! relation, normalizing the cardinality difference between single-valued
//! references (one-to-one, slave of one-to-many) and map-valued references
//! (many-to-many, master of one-to-many) into a uniform sequence.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::store::path::{value_at_path, META_KEY};

use super::descriptor::RelationView;
use super::keys::Keys;

/// Foreign keys recorded on `entity` for the viewpoint relation. `None`
/// when nothing is recorded - callers must not conflate that with an
/// explicitly empty connection set. Map-shaped references yield their keys
/// in no guaranteed order.
pub fn connected_keys(view: &RelationView, entity: &Value) -> Option<Vec<String>> {
    let raw = value_at_path(entity, &view.local_reference())?;
    if raw.is_null() {
        return None;
    }
    if view.local_is_single() {
        match raw {
            Value::String(id) => Some(vec![id.clone()]),
            _ => None,
        }
    } else {
        raw.as_object().map(|m| m.keys().cloned().collect())
    }
}

/// Connected keys for every relation in `views`, keyed by local field name,
/// skipping relations with nothing recorded. Used to present the full
/// connection state of an entity.
pub fn all_connected_keys(views: &[RelationView], entity: &Value) -> BTreeMap<String, Vec<String>> {
    views
        .iter()
        .filter_map(|view| {
            connected_keys(view, entity).map(|keys| (view.local_field().to_string(), keys))
        })
        .collect()
}

/// Like [`all_connected_keys`] but preserving the stored shape as [`Keys`]
/// directives: single-valued references become `Keys::One`, map-valued ones
/// `Keys::Many`. This is the expansion of a disconnect-"all".
pub fn all_connected_as_directives(views: &[RelationView], entity: &Value) -> BTreeMap<String, Keys> {
    views
        .iter()
        .filter_map(|view| {
            let mut keys = connected_keys(view, entity)?;
            let directive = if view.local_is_single() {
                Keys::One(keys.swap_remove(0))
            } else {
                Keys::Many(keys)
            };
            Some((view.local_field().to_string(), directive))
        })
        .collect()
}

/// Wraps a bare metadata sub-tree into an entity-shaped value so the same
/// reference paths resolve. Lets callers that only hold the `__refs__`
/// sub-tree reuse the resolvers above.
pub fn entity_from_metadata(metadata: &Value) -> Value {
    json!({ META_KEY: metadata })
}
