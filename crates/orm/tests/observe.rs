//! Read-path integration: reactive observation semantics.

mod common;

use common::*;

use canopy_orm::{connect_one, include, Disconnect, Keys, ListenNested, ObserveOptions, QueryFilter};
use futures::StreamExt;
use serde_json::json;

#[tokio::test]
async fn test_observe_one_refetches_relations_only_on_metadata_change() {
    let (store, canopy) = setup();
    let clubs = canopy.delegate::<Club>().unwrap();
    let students = canopy.delegate::<Student>().unwrap();

    let mut chess = club("chess");
    let chess_id = clubs.add(&mut chess, None).await.unwrap();
    let mut math = club("math");
    let math_id = clubs.add(&mut math, None).await.unwrap();

    let mut ada = student("ada");
    let _student_id = students
        .add(&mut ada, Some(&connect_one("club", chess_id.as_str())))
        .await
        .unwrap();

    store.clear_read_log();
    let relation_reads =
        |s: &std::sync::Arc<canopy_orm::MemoryStore>| s.read_log().iter().filter(|e| e.starts_with("get:/clubs")).count();

    let inc = include(["club"]);
    let mut stream = students
        .observe_one(ada.id.as_deref().unwrap(), Some(&inc), ListenNested::None)
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.related_one("club").unwrap()["title"], json!("chess"));
    assert_eq!(relation_reads(&store), 1);

    // Scalar-only change: re-emits without touching the club collection.
    ada.name = "ada l.".to_string();
    students.update(&ada, None, None).await.unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.entity.name, "ada l.");
    assert_eq!(relation_reads(&store), 1);

    // Relation change: exactly one re-fetch of the newly connected club.
    students
        .update(&ada, Some(&connect_one("club", math_id.as_str())), None)
        .await
        .unwrap();
    // The object change emits first (still carrying the old club), the
    // re-fetched relation follows.
    let _stale = stream.next().await.unwrap().unwrap();
    let fresh = stream.next().await.unwrap().unwrap();
    assert_eq!(fresh.related_one("club").unwrap()["title"], json!("math"));
    assert_eq!(relation_reads(&store), 2);
}

#[tokio::test]
async fn test_observe_one_missing_snapshot_completes() {
    let (_store, canopy) = setup();
    let students = canopy.delegate::<Student>().unwrap();
    let mut stream = students
        .observe_one("ghost", None, ListenNested::None)
        .unwrap();
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_observe_one_nested_follows_foreign_changes() {
    let (_store, canopy) = setup();
    let clubs = canopy.delegate::<Club>().unwrap();
    let students = canopy.delegate::<Student>().unwrap();

    let mut chess = club("chess");
    let chess_id = clubs.add(&mut chess, None).await.unwrap();
    let mut ada = student("ada");
    students
        .add(&mut ada, Some(&connect_one("club", chess_id.as_str())))
        .await
        .unwrap();

    let inc = include(["club"]);
    let mut stream = students
        .observe_one(ada.id.as_deref().unwrap(), Some(&inc), ListenNested::All)
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.related_one("club").unwrap()["title"], json!("chess"));

    // A change on the foreign node re-emits without any local change.
    chess.title = "blitz".to_string();
    clubs.update(&chess, None, None).await.unwrap();

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.related_one("club").unwrap()["title"], json!("blitz"));
    assert_eq!(second.entity.name, "ada");
}

#[tokio::test(start_paused = true)]
async fn test_observe_many_tracks_membership() {
    let (_store, canopy) = setup();
    let clubs = canopy.delegate::<Club>().unwrap();
    let students = canopy.delegate::<Student>().unwrap();

    let mut chess = club("chess");
    let club_id = clubs.add(&mut chess, None).await.unwrap();
    let mut ada = student("ada");
    let student_id = students.add(&mut ada, None).await.unwrap();

    let options = ObserveOptions::default().with_include(include(Vec::<String>::new()));
    let mut stream = students
        .observe_many(
            &QueryFilter::field_equals("__refs__/one_to_many/club", json!(club_id)),
            options,
        )
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert!(first.is_empty());

    students
        .update(&ada, Some(&connect_one("club", club_id.as_str())), None)
        .await
        .unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[&student_id].entity.name, "ada");

    students
        .update(&ada, None, Some(&Disconnect::field("club", Keys::All)))
        .await
        .unwrap();
    let third = stream.next().await.unwrap().unwrap();
    assert!(third.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_observe_many_debounce_collapses_rapid_changes() {
    let (_store, canopy) = setup();
    let clubs = canopy.delegate::<Club>().unwrap();

    let options = ObserveOptions::default().with_include(include(Vec::<String>::new()));
    let mut stream = clubs.observe_many(&QueryFilter::none(), options).unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert!(first.is_empty());

    // Two writes inside one debounce window surface as a single emission
    // carrying both.
    let mut chess = club("chess");
    clubs.add(&mut chess, None).await.unwrap();
    let mut go = club("go");
    clubs.add(&mut go, None).await.unwrap();

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn test_observe_multiple_combines_members() {
    let (_store, canopy) = setup();
    let students = canopy.delegate::<Student>().unwrap();

    let mut ada = student("ada");
    let ada_id = students.add(&mut ada, None).await.unwrap();
    let mut bob = student("bob");
    let bob_id = students.add(&mut bob, None).await.unwrap();

    let inc = include(Vec::<String>::new());
    let mut stream = students
        .observe_multiple(
            &[ada_id.clone(), bob_id.clone()],
            Some(&inc),
            ListenNested::None,
        )
        .unwrap();

    // Emits once every member has delivered.
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 2);

    bob.name = "bob jr.".to_string();
    students.update(&bob, None, None).await.unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second[&bob_id].entity.name, "bob jr.");
    assert_eq!(second[&ada_id].entity.name, "ada");
}

#[tokio::test]
async fn test_dropping_stream_stops_observation() {
    let (_store, canopy) = setup();
    let students = canopy.delegate::<Student>().unwrap();

    let mut ada = student("ada");
    students.add(&mut ada, None).await.unwrap();

    let stream = students
        .observe_one(ada.id.as_deref().unwrap(), None, ListenNested::None)
        .unwrap();
    drop(stream);

    // Writes keep flowing with no observer left behind.
    ada.name = "ada l.".to_string();
    students.update(&ada, None, None).await.unwrap();
}
