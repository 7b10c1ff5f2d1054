//! Connect/disconnect directives
//!
//! One canonical encoding for "which foreign keys does this write touch":
//! a tagged [`Keys`] variant decoded once at the API boundary, instead of
//! sentinel strings, booleans, and bare arrays sprinkled through call sites.

use std::collections::BTreeMap;

/// Foreign keys named by a directive for a single relation field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keys {
    /// Whatever is currently connected, per the entity's stored metadata.
    All,
    One(String),
    Many(Vec<String>),
}

impl Keys {
    pub fn one(id: impl Into<String>) -> Self {
        Keys::One(id.into())
    }

    pub fn many<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Keys::Many(ids.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for Keys {
    fn from(id: &str) -> Self {
        Keys::One(id.to_string())
    }
}

impl From<String> for Keys {
    fn from(id: String) -> Self {
        Keys::One(id)
    }
}

impl From<Vec<String>> for Keys {
    fn from(ids: Vec<String>) -> Self {
        Keys::Many(ids)
    }
}

impl From<&[&str]> for Keys {
    fn from(ids: &[&str]) -> Self {
        Keys::many(ids.iter().copied())
    }
}

/// Per-write connect directives: local relation field name to the keys to
/// connect. Ordered for deterministic processing.
pub type ConnectOptions = BTreeMap<String, Keys>;

/// Builds a single-field [`ConnectOptions`] map.
pub fn connect_one(field: impl Into<String>, keys: impl Into<Keys>) -> ConnectOptions {
    BTreeMap::from([(field.into(), keys.into())])
}

/// Per-write disconnect directives. `All` disconnects every relation with
/// recorded connections; `Fields` targets specific relation fields, each of
/// which may itself name [`Keys::All`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    All,
    Fields(BTreeMap<String, Keys>),
}

impl Disconnect {
    pub fn field(field: impl Into<String>, keys: impl Into<Keys>) -> Self {
        Disconnect::Fields(BTreeMap::from([(field.into(), keys.into())]))
    }
}
