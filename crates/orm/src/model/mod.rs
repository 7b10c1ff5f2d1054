//! Entity trait, scalar (de)serialization, and hydrated fetch results
//!
//! Typed entities are plain serde structs bound to a static
//! [`ModelDescriptor`]. The serializer works on the JSON representation and
//! enforces the descriptor's property contract (required, array shape);
//! relation state never appears in the typed struct - reads return it
//! alongside the entity in [`Fetched`], writes renew it from the store.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{OrmError, OrmResult};
use crate::schema::{ModelDescriptor, PropertyType};

/// A typed entity bound to a model descriptor.
///
/// `id` is the primary key and equals the entity's storage-path leaf
/// segment. Entities without an id get one assigned on `add`.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The descriptor this entity type is declared by.
    fn model() -> &'static ModelDescriptor;

    fn id(&self) -> Option<&str>;

    fn set_id(&mut self, id: String);
}

/// How entity scalars enter an update map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeMode {
    /// Every base property, validated against the descriptor. Used by `add`.
    Full,
    /// Only the properties present on the value; `null` unsets. Used by
    /// `update`.
    Partial,
    /// No entity body at all. Used by `delete`, which only needs the id and
    /// the foreign-side disconnect writes.
    Skip,
}

/// Serializes the base (non-relation) properties of an entity value.
///
/// Full mode fails with a `Validation` error naming the property when a
/// required property is null or absent, or when an array-typed property
/// holds a non-array. Partial mode passes through whatever keys are present
/// (null meaning "unset") and ignores keys the descriptor does not declare.
pub fn serialize_entity(model: &ModelDescriptor, entity: &Value, mode: SerializeMode) -> OrmResult<Value> {
    let object = entity.as_object().ok_or_else(|| {
        OrmError::Validation(format!("entity value for Model ({}) must be an object", model.name))
    })?;
    let mut output = Map::new();
    match mode {
        SerializeMode::Full => {
            for prop in model.base_properties() {
                let value = object.get(&prop.name).cloned().unwrap_or(Value::Null);
                if value.is_null() {
                    if !prop.optional {
                        return Err(OrmError::Validation(format!(
                            "Property ({}) in Model ({}) cannot be null or undefined",
                            prop.name, model.name
                        )));
                    }
                    output.insert(
                        prop.name.clone(),
                        prop.default_value.clone().unwrap_or(Value::Null),
                    );
                } else {
                    if prop.is_array && !value.is_array() {
                        return Err(OrmError::Validation(format!(
                            "Property ({}) in Model ({}) should be an array, instead given value was ({})",
                            prop.name, model.name, value
                        )));
                    }
                    output.insert(prop.name.clone(), value);
                }
            }
        }
        SerializeMode::Partial => {
            for prop in model.base_properties() {
                let Some(value) = object.get(&prop.name) else {
                    continue;
                };
                if prop.is_array && !value.is_array() && !value.is_null() {
                    return Err(OrmError::Validation(format!(
                        "Property ({}) in Model ({}) should be an array, instead given value was ({})",
                        prop.name, model.name, value
                    )));
                }
                output.insert(prop.name.clone(), value.clone());
            }
        }
        SerializeMode::Skip => {}
    }
    if let Some(id) = object.get("id") {
        output.insert("id".to_string(), id.clone());
    }
    Ok(Value::Object(output))
}

/// Validates a raw store value against the descriptor before it is handed
/// to serde: required properties present, array shapes intact, timestamp
/// strings parseable. Surfaced errors name the property, since a bad value
/// here means the store holds data this model cannot represent.
pub fn validate_fetched(model: &ModelDescriptor, value: &Value) -> OrmResult<()> {
    let object = value.as_object().ok_or_else(|| {
        OrmError::Serialization(format!("fetched value for Model ({}) is not an object", model.name))
    })?;
    for prop in model.base_properties() {
        match object.get(&prop.name) {
            None | Some(Value::Null) => {
                if !prop.optional {
                    return Err(OrmError::Validation(format!(
                        "Deserializing: Property ({}) in Model ({}) cannot be null or undefined",
                        prop.name, model.name
                    )));
                }
            }
            Some(value) => {
                if prop.is_array && !value.is_array() {
                    return Err(OrmError::Validation(format!(
                        "Deserializing: Property ({}) in Model ({}) should be an array, instead given value was ({})",
                        prop.name, model.name, value
                    )));
                }
                if prop.property_type == PropertyType::DateTime {
                    if let Value::String(raw) = value {
                        chrono::DateTime::parse_from_rfc3339(raw).map_err(|e| {
                            OrmError::Serialization(format!(
                                "Property ({}) in Model ({}) holds an unparseable timestamp '{}': {}",
                                prop.name, model.name, raw, e
                            ))
                        })?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// A related value attached to a fetched entity: a single foreign entity or
/// a map keyed by foreign id. `None` members mark recorded connections whose
/// foreign entity is absent from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Value>),
    Many(BTreeMap<String, Option<Value>>),
}

impl Related {
    pub fn as_one(&self) -> Option<&Value> {
        match self {
            Related::One(v) => v.as_ref(),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&BTreeMap<String, Option<Value>>> {
        match self {
            Related::One(_) => None,
            Related::Many(m) => Some(m),
        }
    }
}

/// A fully hydrated read result: the typed entity, its raw relation
/// metadata, and the related values requested through the include set.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub entity: T,
    /// The entity's `__refs__` sub-tree as stored (`Null` when absent).
    pub metadata: Value,
    /// Related values keyed by local relation field name.
    pub related: BTreeMap<String, Related>,
}

impl<T> Fetched<T> {
    pub fn related_one(&self, field: &str) -> Option<&Value> {
        self.related.get(field).and_then(Related::as_one)
    }

    pub fn related_many(&self, field: &str) -> Option<&BTreeMap<String, Option<Value>>> {
        self.related.get(field).and_then(Related::as_many)
    }
}
