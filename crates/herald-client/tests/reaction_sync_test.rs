/// Reaction flow across clients: toggling writes through to the store,
/// every open view folds the same events into the same buckets, and a
/// racing write on another device surfaces as a store error that the
/// next pump reconciles.

use herald_client::{ReactionGroup, ReactionsChange, Session, ToggleOutcome};
use herald_store::{Store, StoreConfig};
use herald_types::error::Error;
use herald_types::models::{Message, MessageKind};

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

async fn seed_message(store: &Store, alice: &Session, bob: &Session) -> Message {
    store
        .append_direct(alice.user_id(), bob.user_id(), "nice work", MessageKind::Text)
        .await
        .expect("send")
}

#[tokio::test]
async fn toggling_adds_then_removes() {
    init_logging();
    let store = memory_store();
    let alice = register(&store, "alice", "Alice").await;
    let bob = register(&store, "bob", "Bob").await;
    let message = seed_message(&store, &alice, &bob).await;

    let mut view = bob.reactions(message.id).await.expect("open reactions");
    assert!(view.grouped().is_empty());

    assert_eq!(view.toggle("👍").await.expect("toggle"), ToggleOutcome::Added);
    // The write lands in the view through the feed, not the call.
    assert!(!view.reacted_with("👍"));
    assert_eq!(view.pump().await.expect("pump"), ReactionsChange::Changed);
    assert!(view.reacted_with("👍"));
    assert_eq!(
        view.grouped(),
        vec![ReactionGroup {
            emoji: "👍".into(),
            count: 1,
            user_ids: vec![bob.user_id()],
        }]
    );

    assert_eq!(view.toggle("👍").await.expect("toggle"), ToggleOutcome::Removed);
    assert_eq!(view.pump().await.expect("pump"), ReactionsChange::Changed);
    assert!(view.grouped().is_empty());
    assert!(!view.reacted_with("👍"));
}

#[tokio::test]
async fn open_views_converge_on_the_same_buckets() {
    init_logging();
    let store = memory_store();
    let alice = register(&store, "alice", "Alice").await;
    let bob = register(&store, "bob", "Bob").await;
    let message = seed_message(&store, &alice, &bob).await;

    let mut alice_view = alice.reactions(message.id).await.expect("open reactions");
    let mut bob_view = bob.reactions(message.id).await.expect("open reactions");

    bob_view.toggle("👍").await.expect("toggle");
    assert_eq!(alice_view.pump().await.expect("pump"), ReactionsChange::Changed);
    assert_eq!(bob_view.pump().await.expect("pump"), ReactionsChange::Changed);

    alice_view.toggle("👍").await.expect("toggle");
    assert_eq!(alice_view.pump().await.expect("pump"), ReactionsChange::Changed);
    assert_eq!(bob_view.pump().await.expect("pump"), ReactionsChange::Changed);

    bob_view.toggle("🎉").await.expect("toggle");
    assert_eq!(alice_view.pump().await.expect("pump"), ReactionsChange::Changed);
    assert_eq!(bob_view.pump().await.expect("pump"), ReactionsChange::Changed);

    // Bob withdraws the thumbs-up; the bucket keeps its slot with Alice's.
    assert_eq!(
        bob_view.toggle("👍").await.expect("toggle"),
        ToggleOutcome::Removed
    );
    assert_eq!(alice_view.pump().await.expect("pump"), ReactionsChange::Changed);
    assert_eq!(bob_view.pump().await.expect("pump"), ReactionsChange::Changed);

    let expected = vec![
        ReactionGroup {
            emoji: "👍".into(),
            count: 1,
            user_ids: vec![alice.user_id()],
        },
        ReactionGroup {
            emoji: "🎉".into(),
            count: 1,
            user_ids: vec![bob.user_id()],
        },
    ];
    assert_eq!(alice_view.grouped(), expected);
    assert_eq!(bob_view.grouped(), expected);
}

#[tokio::test]
async fn a_racing_write_surfaces_and_reconciles() {
    init_logging();
    let store = memory_store();
    let alice = register(&store, "alice", "Alice").await;
    let bob = register(&store, "bob", "Bob").await;
    let message = seed_message(&store, &alice, &bob).await;

    let mut view = bob.reactions(message.id).await.expect("open reactions");

    // Bob's other device reacts first; this view has not folded it yet.
    store
        .add_reaction(message.id, bob.user_id(), "👍")
        .await
        .expect("other device");
    assert_eq!(
        view.toggle("👍").await.unwrap_err(),
        Error::AlreadyExists
    );

    assert_eq!(view.pump().await.expect("pump"), ReactionsChange::Changed);
    assert!(view.reacted_with("👍"));

    // Reconciled, the toggle now resolves to a removal.
    assert_eq!(view.toggle("👍").await.expect("toggle"), ToggleOutcome::Removed);
    assert_eq!(view.pump().await.expect("pump"), ReactionsChange::Changed);
    assert!(!view.reacted_with("👍"));
}
