/// Room membership flow: the seeded rooms are visible to everyone, the
/// general room is joined on first sight without duplicating on reopen,
/// and newly created rooms reach other rosters only once their members
/// are added.

use herald_client::{RosterChange, Session};
use herald_store::{GENERAL_ROOM_ID, Store, StoreConfig};
use herald_types::models::{MemberRole, RoomKind};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn memory_store() -> Store {
    Store::open_in_memory(StoreConfig::default()).expect("in-memory store")
}

async fn register(store: &Store, username: &str, display_name: &str) -> Session {
    Session::register(store.clone(), username, display_name, "correct-horse")
        .await
        .expect("register")
}

#[tokio::test]
async fn seeded_rooms_are_visible_and_general_is_joined() {
    init_logging();
    let store = memory_store();
    let alice = register(&store, "alice", "Alice").await;
    assert!(
        store
            .members_of(GENERAL_ROOM_ID)
            .await
            .expect("members")
            .is_empty()
    );

    let mut roster = alice.roster().await.expect("open roster");
    let names: Vec<&str> = roster.rooms().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["general", "updates"]);
    assert_eq!(roster.general().expect("general room").id, GENERAL_ROOM_ID);
    assert_eq!(roster.bulletin().expect("bulletin room").name, "updates");

    let members = store.members_of(GENERAL_ROOM_ID).await.expect("members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, alice.user_id());
    assert_eq!(members[0].role, MemberRole::Member);

    // The join published a membership event; folding it finds nothing new
    // to join, so the loop quiesces.
    assert_eq!(roster.pump().await.expect("pump"), RosterChange::Refreshed);

    // A second roster for the same user joins nothing.
    let _again = alice.roster().await.expect("reopen roster");
    let members = store.members_of(GENERAL_ROOM_ID).await.expect("members");
    assert_eq!(members.len(), 1);
}

#[tokio::test]
async fn created_rooms_reach_other_rosters() {
    init_logging();
    let store = memory_store();
    let alice = register(&store, "alice", "Alice").await;
    let bob = register(&store, "bob", "Bob").await;

    let mut roster_a = alice.roster().await.expect("open roster");
    let mut roster_b = bob.roster().await.expect("open roster");

    // Drain the general-room join events queued at open.
    assert_eq!(roster_a.pump().await.expect("pump"), RosterChange::Refreshed);
    assert_eq!(roster_a.pump().await.expect("pump"), RosterChange::Ignored);
    assert_eq!(roster_b.pump().await.expect("pump"), RosterChange::Refreshed);

    let room = roster_a
        .create_room("design", Some("mockups"))
        .await
        .expect("create room");
    assert_eq!(room.kind, RoomKind::Standard);
    assert_eq!(room.created_by, alice.user_id());
    assert_eq!(room.description.as_deref(), Some("mockups"));

    let members = store.members_of(room.id).await.expect("members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, alice.user_id());
    assert_eq!(members[0].role, MemberRole::Admin);

    // The creator folds the room event and their own admin membership.
    assert_eq!(roster_a.pump().await.expect("pump"), RosterChange::Refreshed);
    assert_eq!(roster_a.pump().await.expect("pump"), RosterChange::Refreshed);
    let names: Vec<&str> = roster_a.rooms().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["design", "general", "updates"]);

    // Bob sees the room event and a foreign membership; the two wakeups
    // land in scheduler order.
    let mut changes = [
        roster_b.pump().await.expect("pump"),
        roster_b.pump().await.expect("pump"),
    ];
    changes.sort_by_key(|c| *c == RosterChange::Ignored);
    assert_eq!(changes, [RosterChange::Refreshed, RosterChange::Ignored]);

    // Not a member, so the standard room stays out of Bob's list.
    let names: Vec<&str> = roster_b.rooms().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["general", "updates"]);

    store
        .ensure_member(room.id, bob.user_id())
        .await
        .expect("join")
        .expect("first join inserts");
    assert_eq!(roster_b.pump().await.expect("pump"), RosterChange::Refreshed);
    let names: Vec<&str> = roster_b.rooms().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["design", "general", "updates"]);
    assert_eq!(roster_a.pump().await.expect("pump"), RosterChange::Ignored);
}
