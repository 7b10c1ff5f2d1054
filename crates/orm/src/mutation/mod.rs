//! Update-map construction
//!
//! The write-path core: given an entity value and connect/disconnect
//! directives, produce one flat map of absolute path to value that the
//! store applies as a single atomic multi-path write. The map covers the
//! entity's own serialized scalars, its side of every touched relation's
//! back-reference, and the mirrored write on each affected foreign entity,
//! so both sides stay mutually consistent under the atomic apply.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::{OrmError, OrmResult};
use crate::model::{serialize_entity, SerializeMode};
use crate::relations::{
    all_connected_as_directives, connected_keys, ConnectOptions, Disconnect, Keys, RelationKind,
    RelationView,
};
use crate::schema::ModelDescriptor;
use crate::store::path::{flatten_value, join_path, set_at_path, META_KEY};
use crate::store::UpdateMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Connect,
    Disconnect,
}

impl Op {
    fn connects(self) -> bool {
        matches!(self, Op::Connect)
    }

    fn as_str(self) -> &'static str {
        match self {
            Op::Connect => "connect",
            Op::Disconnect => "disconnect",
        }
    }
}

fn value_or_null(connect: bool, value: Value) -> Value {
    if connect {
        value
    } else {
        Value::Null
    }
}

fn true_or_null(connect: bool) -> Value {
    value_or_null(connect, Value::Bool(true))
}

/// Builds update maps for one entity type. Holds the model descriptor and
/// its relations already projected onto the model's viewpoint, in
/// declaration order - a given input always yields the identical write set.
pub struct UpdateMapBuilder<'a> {
    model: &'a ModelDescriptor,
    relations: &'a [RelationView],
}

impl<'a> UpdateMapBuilder<'a> {
    pub fn new(model: &'a ModelDescriptor, relations: &'a [RelationView]) -> Self {
        Self { model, relations }
    }

    /// Produces the flat write set for one mutation.
    ///
    /// The entity value must carry current relation metadata when any
    /// directive resolves against it (`Keys::All`, `Disconnect::All`).
    /// Connect is processed before disconnect; a field targeted by both in
    /// the same call is a `Validation` error. Later entries for the same
    /// path overwrite earlier ones and are not validated.
    pub fn build(
        &self,
        entity: &Value,
        connect: Option<&ConnectOptions>,
        disconnect: Option<&Disconnect>,
        mode: SerializeMode,
    ) -> OrmResult<UpdateMap> {
        let mut data = serialize_entity(self.model, entity, mode)?;
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                OrmError::Validation(format!("Missing id on {} write", self.model.name))
            })?;

        let disconnect = match disconnect {
            Some(Disconnect::All) => Some(all_connected_as_directives(self.relations, entity)),
            Some(Disconnect::Fields(fields)) => Some(fields.clone()),
            None => None,
        };
        if let (Some(connect), Some(disconnect)) = (connect, disconnect.as_ref()) {
            for field in connect.keys() {
                if disconnect.contains_key(field) {
                    return Err(OrmError::Validation(format!(
                        "field '{}' in entity ({}) is targeted by both connect and disconnect in one call",
                        field, self.model.name
                    )));
                }
            }
        }

        let mut updates = UpdateMap::new();
        let passes: [(Op, Option<&BTreeMap<String, Keys>>); 2] =
            [(Op::Connect, connect), (Op::Disconnect, disconnect.as_ref())];
        for (op, directives) in passes {
            let Some(directives) = directives else {
                continue;
            };
            for view in self
                .relations
                .iter()
                .filter(|v| directives.contains_key(v.local_field()))
            {
                let keys = &directives[view.local_field()];
                self.apply(op, view, keys, entity, &id, &mut data, &mut updates)?;
            }
        }

        if mode != SerializeMode::Skip {
            let metadata = data.as_object_mut().and_then(|m| m.remove(META_KEY));
            let node_path = join_path(&[&self.model.path, &id]);
            flatten_value(&node_path, &data, 1, &mut updates);
            if let Some(metadata) = metadata {
                // Map-shaped references flatten down to the per-id leaf so
                // sibling connections survive the write.
                flatten_value(&join_path(&[&node_path, META_KEY]), &metadata, 3, &mut updates);
            }
        }
        Ok(updates)
    }

    fn apply(
        &self,
        op: Op,
        view: &RelationView,
        keys: &Keys,
        entity: &Value,
        id: &str,
        data: &mut Value,
        updates: &mut UpdateMap,
    ) -> OrmResult<()> {
        let connects = op.connects();
        match view.kind() {
            RelationKind::OneToOne => {
                let Some(target) = self.resolve_single(op, view, keys, entity)? else {
                    return Ok(());
                };
                set_at_path(
                    data,
                    &view.local_reference(),
                    value_or_null(connects, json!(target)),
                );
                updates.insert(
                    join_path(&[view.foreign_collection_path(), &target, &view.foreign_reference()]),
                    value_or_null(connects, json!(id)),
                );
            }
            RelationKind::OneToMany if view.is_master() => {
                for target in self.resolve_many(op, view, keys, entity)? {
                    set_at_path(
                        data,
                        &join_path(&[&view.local_reference(), &target]),
                        true_or_null(connects),
                    );
                    updates.insert(
                        join_path(&[
                            view.foreign_collection_path(),
                            &target,
                            &view.foreign_reference(),
                        ]),
                        value_or_null(connects, json!(id)),
                    );
                }
            }
            RelationKind::OneToMany => {
                let Some(target) = self.resolve_single(op, view, keys, entity)? else {
                    return Ok(());
                };
                set_at_path(
                    data,
                    &view.local_reference(),
                    value_or_null(connects, json!(target)),
                );
                updates.insert(
                    join_path(&[
                        view.foreign_collection_path(),
                        &target,
                        &view.foreign_reference(),
                        id,
                    ]),
                    true_or_null(connects),
                );
            }
            RelationKind::ManyToMany => {
                for target in self.resolve_many(op, view, keys, entity)? {
                    set_at_path(
                        data,
                        &join_path(&[&view.local_reference(), &target]),
                        value_or_null(connects, json!({"connected": true})),
                    );
                    updates.insert(
                        join_path(&[
                            view.foreign_collection_path(),
                            &target,
                            &view.foreign_reference(),
                            id,
                        ]),
                        value_or_null(connects, json!({"connected": true})),
                    );
                }
            }
        }
        Ok(())
    }

    /// Resolves a directive that must name one foreign id. `Keys::All` with
    /// nothing recorded resolves to "skip this relation".
    fn resolve_single(
        &self,
        op: Op,
        view: &RelationView,
        keys: &Keys,
        entity: &Value,
    ) -> OrmResult<Option<String>> {
        match keys {
            Keys::One(id) => Ok(Some(id.clone())),
            Keys::All => Ok(connected_keys(view, entity)
                .and_then(|mut keys| (!keys.is_empty()).then(|| keys.swap_remove(0)))),
            Keys::Many(_) => Err(OrmError::Validation(format!(
                "{}['{}'] must be a single id in entity ({})",
                op.as_str(),
                view.local_field(),
                self.model.name
            ))),
        }
    }

    /// Resolves a directive that must name a set of foreign ids.
    fn resolve_many(
        &self,
        op: Op,
        view: &RelationView,
        keys: &Keys,
        entity: &Value,
    ) -> OrmResult<Vec<String>> {
        match keys {
            Keys::Many(ids) => Ok(ids.clone()),
            Keys::All => Ok(connected_keys(view, entity).unwrap_or_default()),
            Keys::One(_) => Err(OrmError::Validation(format!(
                "{}['{}'] must be an array of ids in entity ({})",
                op.as_str(),
                view.local_field(),
                self.model.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::{connect_one, RelationRegistry};
    use crate::schema::{PropertyDescriptor, PropertyType, RelationDecl};

    fn models() -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor::new("User", "/users")
                .with_property(PropertyDescriptor::new("name", PropertyType::String))
                .with_relation(
                    RelationDecl::new("user-profile", "profile", "Profile")
                        .with_kind(RelationKind::OneToOne),
                ),
            ModelDescriptor::new("Profile", "/profiles")
                .with_property(PropertyDescriptor::new("bio", PropertyType::String))
                .with_relation(RelationDecl::new("user-profile", "user", "User")),
            ModelDescriptor::new("Club", "/clubs")
                .with_property(PropertyDescriptor::new("title", PropertyType::String))
                .with_relation(
                    RelationDecl::new("club-members", "members", "Student")
                        .with_kind(RelationKind::OneToMany)
                        .as_master(),
                ),
            ModelDescriptor::new("Student", "/students")
                .with_property(PropertyDescriptor::new("name", PropertyType::String))
                .with_relation(RelationDecl::new("club-members", "club", "Club"))
                .with_relation(
                    RelationDecl::new("enrollment", "courses", "Course")
                        .with_kind(RelationKind::ManyToMany),
                ),
            ModelDescriptor::new("Course", "/courses")
                .with_property(PropertyDescriptor::new("title", PropertyType::String))
                .with_relation(RelationDecl::new("enrollment", "students", "Student")),
        ]
    }

    fn views_for(model_name: &str, models: &[ModelDescriptor]) -> Vec<RelationView> {
        let registry = RelationRegistry::build(models).unwrap();
        let model = models.iter().find(|m| m.name == model_name).unwrap();
        model
            .relations
            .iter()
            .map(|decl| {
                RelationView::project(registry.get(&decl.name).unwrap(), model_name).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_one_to_one_connect_writes_both_sides() {
        let models = models();
        let views = views_for("User", &models);
        let builder = UpdateMapBuilder::new(&models[0], &views);

        let map = builder
            .build(
                &json!({"id": "u1", "name": "ada"}),
                Some(&connect_one("profile", "p1")),
                None,
                SerializeMode::Full,
            )
            .unwrap();

        assert_eq!(map.get("/users/u1/name"), Some(&json!("ada")));
        assert_eq!(
            map.get("/users/u1/__refs__/one_to_one/profile"),
            Some(&json!("p1"))
        );
        assert_eq!(
            map.get("/profiles/p1/__refs__/one_to_one/user"),
            Some(&json!("u1"))
        );
    }

    #[test]
    fn test_one_to_many_master_connect() {
        let models = models();
        let views = views_for("Club", &models);
        let builder = UpdateMapBuilder::new(&models[2], &views);

        let map = builder
            .build(
                &json!({"id": "c1", "title": "chess"}),
                Some(&connect_one("members", Keys::many(["s1", "s2"]))),
                None,
                SerializeMode::Full,
            )
            .unwrap();

        assert_eq!(
            map.get("/clubs/c1/__refs__/one_to_many/members/s1"),
            Some(&json!(true))
        );
        assert_eq!(
            map.get("/clubs/c1/__refs__/one_to_many/members/s2"),
            Some(&json!(true))
        );
        assert_eq!(
            map.get("/students/s1/__refs__/one_to_many/club"),
            Some(&json!("c1"))
        );
        assert_eq!(
            map.get("/students/s2/__refs__/one_to_many/club"),
            Some(&json!("c1"))
        );
    }

    #[test]
    fn test_one_to_many_slave_connect() {
        let models = models();
        let views = views_for("Student", &models);
        let builder = UpdateMapBuilder::new(&models[3], &views);

        let map = builder
            .build(
                &json!({"id": "s1", "name": "ada"}),
                Some(&connect_one("club", "c1")),
                None,
                SerializeMode::Full,
            )
            .unwrap();

        assert_eq!(
            map.get("/students/s1/__refs__/one_to_many/club"),
            Some(&json!("c1"))
        );
        assert_eq!(
            map.get("/clubs/c1/__refs__/one_to_many/members/s1"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_many_to_many_connect_marks_both_sides() {
        let models = models();
        let views = views_for("Student", &models);
        let builder = UpdateMapBuilder::new(&models[3], &views);

        let map = builder
            .build(
                &json!({"id": "s1", "name": "ada"}),
                Some(&connect_one("courses", Keys::many(["m1"]))),
                None,
                SerializeMode::Full,
            )
            .unwrap();

        assert_eq!(
            map.get("/students/s1/__refs__/many_to_many/courses/m1"),
            Some(&json!({"connected": true}))
        );
        assert_eq!(
            map.get("/courses/m1/__refs__/many_to_many/students/s1"),
            Some(&json!({"connected": true}))
        );
    }

    #[test]
    fn test_disconnect_all_nulls_every_touched_side() {
        let models = models();
        let views = views_for("Student", &models);
        let builder = UpdateMapBuilder::new(&models[3], &views);

        // Two active relations: slave one-to-many plus one many-to-many key.
        let entity = json!({
            "id": "s1",
            "__refs__": {
                "one_to_many": {"club": "c1"},
                "many_to_many": {"courses": {"m1": {"connected": true}}}
            }
        });
        let map = builder
            .build(&entity, None, Some(&Disconnect::All), SerializeMode::Skip)
            .unwrap();

        // Exactly one foreign-side null write per active connection, and
        // nothing else in skip mode.
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("/clubs/c1/__refs__/one_to_many/members/s1"),
            Some(&Value::Null)
        );
        assert_eq!(
            map.get("/courses/m1/__refs__/many_to_many/students/s1"),
            Some(&Value::Null)
        );
    }

    #[test]
    fn test_partial_update_disconnect_clears_local_reference() {
        let models = models();
        let views = views_for("Student", &models);
        let builder = UpdateMapBuilder::new(&models[3], &views);

        let entity = json!({"id": "s1", "__refs__": {"one_to_many": {"club": "c1"}}});
        let map = builder
            .build(
                &entity,
                None,
                Some(&Disconnect::field("club", Keys::All)),
                SerializeMode::Partial,
            )
            .unwrap();

        assert_eq!(
            map.get("/students/s1/__refs__/one_to_many/club"),
            Some(&Value::Null)
        );
        assert_eq!(
            map.get("/clubs/c1/__refs__/one_to_many/members/s1"),
            Some(&Value::Null)
        );
    }

    #[test]
    fn test_connect_and_disconnect_same_field_rejected() {
        let models = models();
        let views = views_for("Student", &models);
        let builder = UpdateMapBuilder::new(&models[3], &views);

        let err = builder
            .build(
                &json!({"id": "s1", "name": "ada"}),
                Some(&connect_one("club", "c1")),
                Some(&Disconnect::field("club", Keys::One("c2".to_string()))),
                SerializeMode::Partial,
            )
            .unwrap_err();
        assert!(err.to_string().contains("both connect and disconnect"));
    }

    #[test]
    fn test_wrong_directive_shape_names_field_and_entity() {
        let models = models();
        let views = views_for("User", &models);
        let builder = UpdateMapBuilder::new(&models[0], &views);

        let err = builder
            .build(
                &json!({"id": "u1", "name": "ada"}),
                Some(&connect_one("profile", Keys::many(["p1", "p2"]))),
                None,
                SerializeMode::Full,
            )
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("connect['profile']"));
        assert!(msg.contains("(User)"));

        let views = views_for("Club", &models);
        let builder = UpdateMapBuilder::new(&models[2], &views);
        let err = builder
            .build(
                &json!({"id": "c1", "title": "chess"}),
                Some(&connect_one("members", "s1")),
                None,
                SerializeMode::Full,
            )
            .unwrap_err();
        assert!(err.to_string().contains("must be an array of ids"));
    }

    #[test]
    fn test_connect_all_with_nothing_recorded_is_skipped() {
        let models = models();
        let views = views_for("User", &models);
        let builder = UpdateMapBuilder::new(&models[0], &views);

        let map = builder
            .build(
                &json!({"id": "u1", "name": "ada"}),
                Some(&connect_one("profile", Keys::All)),
                None,
                SerializeMode::Full,
            )
            .unwrap();
        assert!(map.keys().all(|k| k.starts_with("/users/u1/")));
        assert!(!map.contains_key("/users/u1/__refs__/one_to_one/profile"));
    }

    #[test]
    fn test_missing_id_rejected() {
        let models = models();
        let views = views_for("User", &models);
        let builder = UpdateMapBuilder::new(&models[0], &views);

        let err = builder
            .build(&json!({"name": "ada"}), None, None, SerializeMode::Full)
            .unwrap_err();
        assert!(err.to_string().contains("Missing id"));
    }
}
