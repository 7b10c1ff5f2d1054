//! Path helpers for the JSON tree
//!
//! Pure functions over slash-separated storage paths and `serde_json::Value`
//! trees. Every absolute path in an update map is produced by these helpers,
//! so slash normalization lives here and nowhere else.

use serde_json::{Map, Value};

use crate::store::UpdateMap;

/// Reserved key on every entity node under which relation state is recorded,
/// namespaced by relation kind then field name. Distinct from user-visible
/// scalar properties.
pub const META_KEY: &str = "__refs__";

/// Joins path components with a single slash between each, collapsing any
/// run of slashes inside the components themselves.
///
/// ```
/// use canopy_orm::store::path::join_path;
/// assert_eq!(join_path(&["/users", "/u1/"]), "/users/u1/");
/// ```
pub fn join_path(parts: &[&str]) -> String {
    let joined = parts.join("/");
    let mut out = String::with_capacity(joined.len());
    let mut prev_slash = false;
    for ch in joined.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    out
}

/// Splits a path into its non-empty segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Reads the value at a slash path inside a JSON tree. Returns `None` when
/// any intermediate segment is missing or not an object.
pub fn value_at_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path_segments(path) {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes a value at a slash path inside a JSON tree, creating intermediate
/// objects as needed. An intermediate non-object value is replaced by an
/// object.
pub fn set_at_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path_segments(path).collect();
    if segments.is_empty() {
        *root = value;
        return;
    }
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()
            .expect("just ensured object")
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    current
        .as_object_mut()
        .expect("just ensured object")
        .insert(segments[segments.len() - 1].to_string(), value);
}

/// Removes the value at a slash path, pruning parent objects that become
/// empty. The tree never holds empty objects, matching the store's own
/// null-deletes-subtree semantics.
pub fn delete_at_path(root: &mut Value, path: &str) {
    let segments: Vec<&str> = path_segments(path).collect();
    if segments.is_empty() {
        *root = Value::Object(Map::new());
        return;
    }
    prune(root, &segments);
}

fn prune(node: &mut Value, segments: &[&str]) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    if segments.len() == 1 {
        map.remove(segments[0]);
    } else if let Some(child) = map.get_mut(segments[0]) {
        if prune(child, &segments[1..]) {
            map.remove(segments[0]);
        }
    }
    map.is_empty()
}

/// Explodes a subtree into per-leaf absolute-path entries of an update map.
///
/// `depth` bounds the recursion: objects nested deeper than `depth` levels
/// below the prefix are written whole. Nulls are leaves at any depth, so a
/// cleared reference flattens to a deleting write rather than recursing.
pub fn flatten_value(prefix: &str, value: &Value, depth: u32, out: &mut UpdateMap) {
    match value {
        Value::Object(map) if depth > 0 => {
            for (key, child) in map {
                flatten_value(&join_path(&[prefix, key]), child, depth - 1, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}
