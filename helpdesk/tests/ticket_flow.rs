//! Tickets view end to end: a Store over the in-memory table.
//!
//! Every write reaches the list only through the change feed, the same way
//! it does against the hosted backend.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use helpdesk::domain::validation::EMAIL_INVALID;
use helpdesk::features::tickets::{ALREADY_FINAL, FEED};
use helpdesk::features::{TicketsAction, TicketsEnvironment, TicketsReducer, TicketsState};
use helpdesk::mocks::InMemoryRepository;
use helpdesk::{Repository, StoreError, Ticket, TicketDraft, TicketService, TicketStatus};
use helpdesk_core::effect::EffectId;
use helpdesk_core::Change;
use helpdesk_runtime::Store;
use std::sync::Arc;
use std::time::Duration;

type Repo = InMemoryRepository<Ticket>;
type TicketsStore =
    Store<TicketsState, TicketsAction, TicketsEnvironment<Repo>, TicketsReducer<Repo>>;

const WAIT: Duration = Duration::from_secs(1);

fn store(repository: &Repo) -> TicketsStore {
    let env = TicketsEnvironment::new(Arc::new(TicketService::new(repository.clone())));
    Store::with_broadcast_capacity(TicketsState::default(), TicketsReducer::new(), env, 64)
}

async fn subscribed(repository: &Repo) -> TicketsStore {
    let store = store(repository);
    let subscribed = store
        .send_and_wait_for(
            TicketsAction::Subscribe,
            |a| matches!(a, TicketsAction::Subscribed),
            WAIT,
        )
        .await;
    assert!(subscribed.is_ok());
    store
}

/// Send `action`, then wait until both its request result and the feed's
/// echo have been reduced. Returns the echo.
async fn settle(
    store: &TicketsStore,
    action: TicketsAction,
    is_result: fn(&TicketsAction) -> bool,
    is_echo: fn(&TicketsAction) -> bool,
) -> TicketsAction {
    let mut actions = store.subscribe_actions();
    store.send(action).await.unwrap();

    let mut result_seen = false;
    let mut echo = None;
    while !result_seen || echo.is_none() {
        let action = tokio::time::timeout(WAIT, actions.recv()).await.unwrap().unwrap();
        if is_result(&action) {
            result_seen = true;
        } else if is_echo(&action) {
            echo = Some(action);
        }
    }
    echo.unwrap()
}

async fn create(store: &TicketsStore, name: &str) -> Ticket {
    store
        .send(TicketsAction::FillForm(TicketDraft::new(name, "john@x.com", "black")))
        .await
        .unwrap();
    let echo = settle(
        store,
        TicketsAction::Submit,
        |a| matches!(a, TicketsAction::Submitted(_)),
        |a| matches!(a, TicketsAction::ChangeReceived(Change::Inserted(_))),
    )
    .await;
    match echo {
        TicketsAction::ChangeReceived(Change::Inserted(ticket)) => ticket,
        other => unreachable!("expected the insert echo, got {other:?}"),
    }
}

#[tokio::test]
async fn created_ticket_arrives_through_the_feed() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;

    let ticket = create(&store, "John").await;

    assert_eq!(ticket.status, TicketStatus::OrderReceived);
    assert_eq!(ticket.order_number.as_deref(), Some("CK-0001"));
    let (count, form_empty) = store
        .state(|s| (s.tickets.len(), s.form == TicketDraft::default()))
        .await;
    assert_eq!(count, 1);
    assert!(form_empty);
}

#[tokio::test]
async fn invalid_form_never_reaches_the_table() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;

    store
        .send(TicketsAction::FillForm(TicketDraft::new("John", "not-an-email", "black")))
        .await
        .unwrap();
    store.send(TicketsAction::Submit).await.unwrap();

    let errors = store.state(|s| s.form_errors.clone()).await;
    assert!(errors.contains(EMAIL_INVALID));
    assert_eq!(repository.calls("create"), 0);
}

#[tokio::test]
async fn newest_ticket_is_listed_first() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;

    create(&store, "First").await;
    create(&store, "Second").await;

    let names = store
        .state(|s| s.tickets.iter().map(|t| t.customer_name.clone()).collect::<Vec<_>>())
        .await;
    assert_eq!(names, ["Second", "First"]);
}

#[tokio::test]
async fn kanban_walks_a_ticket_to_completion() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let ticket = create(&store, "John").await;

    for expected in [
        TicketStatus::InProgress,
        TicketStatus::FinalInspection,
        TicketStatus::Completed,
    ] {
        settle(
            &store,
            TicketsAction::MoveToNextStage(ticket.id.clone()),
            |a| matches!(a, TicketsAction::Moved(..)),
            |a| matches!(a, TicketsAction::ChangeReceived(Change::Updated(_))),
        )
        .await;
        let status = store.state(|s| s.tickets[0].status).await;
        assert_eq!(status, expected);
    }

    store
        .send(TicketsAction::MoveToNextStage(ticket.id.clone()))
        .await
        .unwrap();
    let error = store.state(|s| s.error.clone()).await;
    assert_eq!(error.as_deref(), Some(ALREADY_FINAL));
    assert_eq!(repository.calls("update"), 3);
}

#[tokio::test]
async fn delete_removes_the_ticket_without_refetching() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let ticket = create(&store, "John").await;

    settle(
        &store,
        TicketsAction::Delete(ticket.id.clone()),
        |a| matches!(a, TicketsAction::Deleted(..)),
        |a| matches!(a, TicketsAction::ChangeReceived(Change::Deleted(_))),
    )
    .await;

    let (empty, pending) = store.state(|s| (s.tickets.is_empty(), s.pending.is_empty())).await;
    assert!(empty);
    assert!(pending);
    assert_eq!(repository.calls("get_all"), 0);
}

#[tokio::test]
async fn other_writers_show_up_live() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let mut actions = store.subscribe_actions();

    // Another client inserts straight into the table
    let new = helpdesk::NewTicket {
        customer_name: "Jane".to_string(),
        customer_email: "jane@x.com".to_string(),
        coating_color: "white".to_string(),
        coating_finish: None,
    };
    repository.create(&new).await.unwrap();

    let action = tokio::time::timeout(WAIT, actions.recv()).await.unwrap().unwrap();
    assert!(matches!(
        action,
        TicketsAction::ChangeReceived(Change::Inserted(ref t)) if t.customer_name == "Jane"
    ));
    assert_eq!(store.state(|s| s.tickets.len()).await, 1);
}

#[tokio::test]
async fn failed_move_clears_the_pending_marker() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let ticket = create(&store, "John").await;

    repository.fail_next(StoreError::Request("offline".to_string()));
    let moved = store
        .send_and_wait_for(
            TicketsAction::MoveToStatus(ticket.id.clone(), TicketStatus::Completed),
            |a| matches!(a, TicketsAction::Moved(..)),
            WAIT,
        )
        .await;

    assert!(matches!(moved, Ok(TicketsAction::Moved(_, Err(_)))));
    let (pending, error, status) = store
        .state(|s| (s.pending.is_empty(), s.error.clone(), s.tickets[0].status))
        .await;
    assert!(pending);
    assert_eq!(error.as_deref(), Some("Request failed: offline"));
    assert_eq!(status, TicketStatus::OrderReceived);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    assert_eq!(repository.subscriber_count(), 1);

    store.send(TicketsAction::Unsubscribe).await.unwrap();
    assert!(!store.is_running(&EffectId::new(FEED)));

    tokio::time::timeout(WAIT, async {
        while repository.subscriber_count() != 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn resubscribing_never_duplicates_events() {
    let repository = Repo::new();
    let store = subscribed(&repository).await;
    let again = store
        .send_and_wait_for(
            TicketsAction::Subscribe,
            |a| matches!(a, TicketsAction::Subscribed),
            WAIT,
        )
        .await;
    assert!(again.is_ok());

    create(&store, "John").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.state(|s| s.tickets.len()).await, 1);
    assert_eq!(repository.subscriber_count(), 1);
}

#[tokio::test]
async fn results_after_teardown_are_dropped() {
    let repository = Repo::new();
    let store = store(&repository);

    store.send(TicketsAction::Load).await.unwrap();
    store.teardown();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.state(|s| s.loading).await);
    assert!(store.send(TicketsAction::Load).await.is_err());
}
