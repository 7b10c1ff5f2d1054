//! Example: declared relations kept in sync across both sides
//!
//! Declares a Club/Student one-to-many relation, writes through the
//! delegates, and watches a live stream pick up the changes. Runs entirely
//! against the in-memory store backend.

use std::sync::Arc;

use futures::StreamExt;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use canopy_orm::{
    connect_one, include, Canopy, Entity, ListenNested, MemoryStore, ModelDescriptor,
    OrmResult, PropertyDescriptor, PropertyType, RelationDecl, RelationKind,
};

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
        .with_relation(RelationDecl::new("club-members", "club", "Club"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Club {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    title: String,
}

impl Entity for Club {
    fn model() -> &'static ModelDescriptor {
        &CLUB_MODEL
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Student {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
}

impl Entity for Student {
    fn model() -> &'static ModelDescriptor {
        &STUDENT_MODEL
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

#[tokio::main]
async fn main() -> OrmResult<()> {
    let store = Arc::new(MemoryStore::new());
    let canopy = Canopy::initialize(store, &[CLUB_MODEL.clone(), STUDENT_MODEL.clone()])?;

    let clubs = canopy.delegate::<Club>()?;
    let students = canopy.delegate::<Student>()?;

    let mut chess = Club {
        id: None,
        title: "chess club".to_string(),
    };
    let club_id = clubs.add(&mut chess, None).await?;
    println!("created club {club_id}");

    // Watch the club together with its members while we mutate.
    let inc = include(["members"]);
    let mut live = clubs.observe_one(&club_id, Some(&inc), ListenNested::None)?;
    let first = live.next().await.expect("initial emission")?;
    println!("members at start: {}", first.related_many("members").map_or(0, |m| m.len()));

    let mut ada = Student {
        id: None,
        name: "ada".to_string(),
    };
    students
        .add(&mut ada, Some(&connect_one("club", club_id.as_str())))
        .await?;

    // The connect touched the club's metadata, so the stream re-resolves
    // the members relation.
    loop {
        let emission = live.next().await.expect("stream alive")?;
        if let Some(members) = emission.related_many("members") {
            if !members.is_empty() {
                println!(
                    "members now: {:?}",
                    members.keys().collect::<Vec<_>>()
                );
                break;
            }
        }
    }

    println!("indices to provision:\n{}", canopy.indices());
    Ok(())
}
