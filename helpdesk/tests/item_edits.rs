//! Items view end to end: debounced edits against the in-memory table.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use helpdesk::features::items::save_id;
use helpdesk::features::{ItemsAction, ItemsEnvironment, ItemsReducer, ItemsState};
use helpdesk::mocks::InMemoryRepository;
use helpdesk::{Item, ItemService, RecordId};
use helpdesk_core::Change;
use helpdesk_runtime::Store;
use std::sync::Arc;
use std::time::Duration;

type Repo = InMemoryRepository<Item>;
type ItemsStore = Store<ItemsState, ItemsAction, ItemsEnvironment<Repo>, ItemsReducer<Repo>>;

const DEBOUNCE: Duration = Duration::from_millis(500);
const WAIT: Duration = Duration::from_secs(1);

async fn subscribed(repository: &Repo) -> ItemsStore {
    let env = ItemsEnvironment::new(Arc::new(ItemService::new(repository.clone())), DEBOUNCE);
    let store = Store::with_broadcast_capacity(ItemsState::default(), ItemsReducer::new(), env, 64);
    let subscribed = store
        .send_and_wait_for(ItemsAction::Subscribe, |a| matches!(a, ItemsAction::Subscribed), WAIT)
        .await;
    assert!(subscribed.is_ok());
    store
}

async fn add(store: &ItemsStore, value: &str) -> RecordId {
    store.send(ItemsAction::SetDraft(value.to_string())).await.unwrap();
    let echo = store
        .send_and_wait_for(
            ItemsAction::Create,
            |a| matches!(a, ItemsAction::ChangeReceived(Change::Inserted(_))),
            WAIT,
        )
        .await;
    match echo {
        Ok(ItemsAction::ChangeReceived(Change::Inserted(item))) => item.id,
        other => unreachable!("expected the insert echo, got {other:?}"),
    }
}

async fn edit(store: &ItemsStore, id: &RecordId, value: &str) {
    store
        .send(ItemsAction::Edit {
            id: id.clone(),
            value: value.to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn typing_burst_is_written_once() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let id = add(&store, "milk").await;

    for text in ["o", "oa", "oat", "oat milk"] {
        edit(&store, &id, text).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Every keystroke is visible at once
    assert_eq!(store.state(|s| s.items[0].value.clone()).await, "oat milk");
    assert_eq!(repository.calls("update"), 0);
    assert!(store.is_running(&save_id(&id)));

    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(repository.calls("update"), 1);
    assert_eq!(repository.rows()[0].value, "oat milk");
    assert!(store.state(|s| s.unsaved.is_empty()).await);
}

#[tokio::test(start_paused = true)]
async fn edits_to_different_items_are_saved_separately() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let first = add(&store, "milk").await;
    let second = add(&store, "eggs").await;

    edit(&store, &first, "oat milk").await;
    edit(&store, &second, "free range eggs").await;
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(repository.calls("update"), 2);
    let values: Vec<String> = repository.rows().into_iter().map(|i| i.value).collect();
    assert_eq!(values, ["oat milk", "free range eggs"]);
}

#[tokio::test(start_paused = true)]
async fn remote_update_waits_behind_a_local_edit() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let id = add(&store, "milk").await;
    let mut actions = store.subscribe_actions();

    edit(&store, &id, "oat milk").await;
    let created_at = repository.rows()[0].created_at;
    repository.emit(Change::Updated(Item {
        id: id.clone(),
        value: "soy milk".to_string(),
        created_at,
    }));
    tokio::time::timeout(WAIT, async {
        while !matches!(
            actions.recv().await,
            Ok(ItemsAction::ChangeReceived(Change::Updated(_)))
        ) {}
    })
    .await
    .unwrap();
    assert_eq!(store.state(|s| s.items[0].value.clone()).await, "oat milk");

    // Once saved, the local text is what the table holds
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(repository.rows()[0].value, "oat milk");
    assert_eq!(store.state(|s| s.items[0].value.clone()).await, "oat milk");
}

#[tokio::test(start_paused = true)]
async fn deleting_drops_the_pending_save() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let id = add(&store, "milk").await;

    edit(&store, &id, "oat milk").await;
    let deleted = store
        .send_and_wait_for(
            ItemsAction::Delete(id.clone()),
            |a| matches!(a, ItemsAction::ChangeReceived(Change::Deleted(_))),
            WAIT,
        )
        .await;
    assert!(deleted.is_ok());
    assert!(!store.is_running(&save_id(&id)));

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(repository.calls("update"), 0);
    assert!(store.state(|s| s.items.is_empty()).await);
}

#[tokio::test(start_paused = true)]
async fn blank_items_are_not_created() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;

    store.send(ItemsAction::SetDraft("   ".to_string())).await.unwrap();
    store.send(ItemsAction::Create).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(repository.calls("create"), 0);
}
