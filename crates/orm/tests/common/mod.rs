//! Shared fixtures: a school-shaped schema exercising every relation kind.
//!
//! User <-> Profile        one-to-one
//! Club  <-> Student       one-to-many (Club is the master side)
//! Student <-> Course      many-to-many

#![allow(dead_code)]

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use canopy_orm::{
    Canopy, Entity, MemoryStore, ModelDescriptor, PropertyDescriptor, PropertyType, RelationDecl,
    RelationKind, TreeStore,
};

static USER_MODEL: Lazy<ModelDescriptor> = Lazy::new(|| {
    ModelDescriptor::new("User", "/users")
        .with_property(PropertyDescriptor::new("name", PropertyType::String))
        .with_property(PropertyDescriptor::new("email", PropertyType::String).with_optional())
        .with_relation(
            RelationDecl::new("user-profile", "profile", "Profile")
                .with_kind(RelationKind::OneToOne),
        )
});

static PROFILE_MODEL: Lazy<ModelDescriptor> = Lazy::new(|| {
    ModelDescriptor::new("Profile", "/profiles")
        .with_property(PropertyDescriptor::new("bio", PropertyType::String))
        .with_relation(RelationDecl::new("user-profile", "user", "User"))
});

static CLUB_MODEL: Lazy<ModelDescriptor> = Lazy::new(|| {
    ModelDescriptor::new("Club", "/clubs")
        .with_property(PropertyDescriptor::new("title", PropertyType::String))
        .with_relation(
            RelationDecl::new("club-members", "members", "Student")
                .with_kind(RelationKind::OneToMany)
                .as_master(),
        )
});

static STUDENT_MODEL: Lazy<ModelDescriptor> = Lazy::new(|| {
    ModelDescriptor::new("Student", "/students")
        .with_property(PropertyDescriptor::new("name", PropertyType::String))
        .with_property(
            PropertyDescriptor::new("tags", PropertyType::String)
                .with_array()
                .with_optional(),
        )
        .with_relation(RelationDecl::new("club-members", "club", "Club"))
        .with_relation(
            RelationDecl::new("enrollment", "courses", "Course")
                .with_kind(RelationKind::ManyToMany),
        )
});

static COURSE_MODEL: Lazy<ModelDescriptor> = Lazy::new(|| {
    ModelDescriptor::new("Course", "/courses")
        .with_property(PropertyDescriptor::new("title", PropertyType::String))
        .with_relation(RelationDecl::new("enrollment", "students", "Student"))
});

macro_rules! impl_entity {
    ($ty:ident, $model:ident) => {
        impl Entity for $ty {
            fn model() -> &'static ModelDescriptor {
                &$model
            }

            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub bio: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Club {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
}

impl_entity!(User, USER_MODEL);
impl_entity!(Profile, PROFILE_MODEL);
impl_entity!(Club, CLUB_MODEL);
impl_entity!(Student, STUDENT_MODEL);
impl_entity!(Course, COURSE_MODEL);

pub fn models() -> Vec<ModelDescriptor> {
    vec![
        USER_MODEL.clone(),
        PROFILE_MODEL.clone(),
        CLUB_MODEL.clone(),
        STUDENT_MODEL.clone(),
        COURSE_MODEL.clone(),
    ]
}

pub fn setup() -> (Arc<MemoryStore>, Canopy) {
    let store = Arc::new(MemoryStore::new());
    let tree: Arc<dyn TreeStore> = store.clone();
    let canopy = Canopy::initialize(tree, &models()).expect("schema is valid");
    (store, canopy)
}

pub fn user(name: &str) -> User {
    User {
        id: None,
        name: name.to_string(),
        email: None,
    }
}

pub fn profile(bio: &str) -> Profile {
    Profile {
        id: None,
        bio: bio.to_string(),
    }
}

pub fn club(title: &str) -> Club {
    Club {
        id: None,
        title: title.to_string(),
    }
}

pub fn student(name: &str) -> Student {
    Student {
        id: None,
        name: name.to_string(),
        tags: None,
    }
}

pub fn course(title: &str) -> Course {
    Course {
        id: None,
        title: title.to_string(),
    }
}
