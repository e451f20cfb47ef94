//! `SupabaseRepository` against a mocked REST service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use helpdesk::domain::{ItemPatch, NewItem};
use helpdesk::{Item, RecordId, Repository, StoreError, SupabaseRepository, Ticket, TicketStatus};
use helpdesk_runtime::retry::RetryPolicy;
use helpdesk_supabase::{SupabaseClient, SupabaseConfig};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn repository<T: helpdesk::Table>() -> (MockServer, SupabaseRepository<T>) {
    let server = MockServer::start().await;
    let client = SupabaseClient::new(SupabaseConfig::new(server.uri(), "anon-key"));
    let repository = SupabaseRepository::new(client).with_subscribe_retry(RetryPolicy::never());
    (server, repository)
}

#[tokio::test]
async fn tickets_are_fetched_newest_first() {
    let (server, repository) = repository::<Ticket>().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/tickets"))
        .and(query_param("order", "created_at.desc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "b2",
            "order_number": "CK-0002",
            "customer_name": "Jane",
            "customer_email": "jane@x.com",
            "coating_color": "white",
            "coating_finish": "higher_gloss",
            "status": "In Progress",
            "created_at": "2025-01-02T00:00:00Z"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let tickets = repository.get_all().await.unwrap();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].status, TicketStatus::InProgress);
    assert_eq!(tickets[0].order_number.as_deref(), Some("CK-0002"));
}

#[tokio::test]
async fn items_are_fetched_oldest_first_with_numeric_ids() {
    let (server, repository) = repository::<Item>().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/items"))
        .and(query_param("order", "created_at.asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "value": "milk", "created_at": "2025-01-01T00:00:00Z" },
            { "id": 2, "value": "eggs", "created_at": "2025-01-02T00:00:00Z" }
        ])))
        .mount(&server)
        .await;

    let items = repository.get_all().await.unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["1", "2"]);
}

#[tokio::test]
async fn create_returns_the_stored_row() {
    let (server, repository) = repository::<Item>().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/items"))
        .and(body_json(json!({ "value": "milk" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!(
            { "id": 9, "value": "milk", "created_at": "2025-01-01T00:00:00Z" }
        )))
        .expect(1)
        .mount(&server)
        .await;

    let item = repository
        .create(&NewItem {
            value: "milk".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(item.id, RecordId::new("9"));
}

#[tokio::test]
async fn update_of_a_missing_row_is_not_found() {
    let (server, repository) = repository::<Item>().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/items"))
        .and(query_param("id", "eq.404"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({
            "message": "JSON object requested, multiple (or no) rows returned"
        })))
        .mount(&server)
        .await;

    let result = repository
        .update(
            &RecordId::new("404"),
            &ItemPatch {
                value: "oat milk".to_string(),
            },
        )
        .await;
    assert_eq!(result, Err(StoreError::NotFound));
}

#[tokio::test]
async fn delete_filters_by_id() {
    let (server, repository) = repository::<Ticket>().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/tickets"))
        .and(query_param("id", "eq.b2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(repository.delete(&RecordId::new("b2")).await, Ok(()));
}

#[tokio::test]
async fn rejected_requests_carry_the_backend_message() {
    let (server, repository) = repository::<Ticket>().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/tickets"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "boom" })))
        .mount(&server)
        .await;

    let error = repository.delete(&RecordId::new("b2")).await.unwrap_err();
    assert!(error.to_string().contains("boom"), "{error}");
}

#[tokio::test]
async fn feed_that_cannot_connect_is_a_subscription_error() {
    let (_server, repository) = repository::<Ticket>().await;

    let result = repository.subscribe_to_changes().await;
    assert!(matches!(result, Err(StoreError::Subscription(_))));
}
