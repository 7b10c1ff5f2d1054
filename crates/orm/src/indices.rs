//! Index manifest for server-side back-reference queries
//!
//! Every one-to-many relation is resolved on the master side by an equality
//! query against the slave collection's back-reference, which the store only
//! serves efficiently with an index. This renders the `".indexOn"` JSON the
//! store expects, for out-of-band provisioning.

use serde_json::{json, Map, Value};

use crate::relations::{RelationKind, RelationRegistry};
use crate::store::path::{join_path, path_segments, set_at_path, value_at_path};

/// JSON text describing the indices the registered relations require: one
/// entry per one-to-many back-reference, keyed by the slave collection and
/// reference path.
pub fn index_manifest(registry: &RelationRegistry) -> String {
    let mut output = Value::Object(Map::new());
    let mut relations: Vec<_> = registry.iter().collect();
    relations.sort_by(|a, b| a.name().cmp(b.name()));

    for relation in relations {
        if relation.kind() != RelationKind::OneToMany {
            continue;
        }
        // The indexed field is the leaf of the slave-side reference; the
        // rest of the reference path nests under the collection.
        let reference = relation.reference(1);
        let mut segments: Vec<String> = path_segments(&reference).map(str::to_string).collect();
        let Some(field) = segments.pop() else {
            continue;
        };
        let collection = &relation.side(1).collection_path;
        let mut parts: Vec<&str> = Vec::with_capacity(segments.len() + 2);
        parts.push(collection);
        parts.extend(segments.iter().map(String::as_str));
        parts.push(".indexOn");
        let index_path = join_path(&parts);

        let mut fields = value_at_path(&output, &index_path)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        fields.push(json!(field));
        set_at_path(&mut output, &index_path, Value::Array(fields));
    }

    serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
}
