//! PostgREST store tests against a `wiremock` server

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::base_time;
use salesdesk::gateway::{ConversationFilter, ConversationGateway, ListMessagesParams, MessageGateway};
use salesdesk::store::PostgrestStore;
use salesdesk::{ConversationStatus, SalesdeskError};

const COLUMNS: &str = "thread_id,page_id,psid,display_name,summary,updated_at,conversation_status";

fn make_store(server: &MockServer) -> Arc<PostgrestStore> {
    Arc::new(
        PostgrestStore::new(server.uri(), "anon-key", "assistant", Duration::from_secs(5))
            .expect("store"),
    )
}

fn row(thread_id: &str, updated_at: &str, status: &str) -> serde_json::Value {
    json!({
        "thread_id": thread_id,
        "page_id": "page-1",
        "psid": "psid-1",
        "display_name": "Ana",
        "summary": null,
        "updated_at": updated_at,
        "conversation_status": status
    })
}

#[tokio::test]
async fn test_list_conversations_sends_keyset_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/conversations"))
        .and(query_param("select", COLUMNS))
        .and(query_param("page_id", "eq.page-1"))
        .and(query_param(
            "or",
            "(updated_at.lt.\"2024-05-01T09:00:00.000000Z\",and(updated_at.eq.\"2024-05-01T09:00:00.000000Z\",thread_id.gt.t5))",
        ))
        .and(query_param("order", "updated_at.desc,thread_id.asc"))
        .and(query_param("limit", "2"))
        .and(header("apikey", "anon-key"))
        .and(header("Authorization", "Bearer anon-key"))
        .and(header("Accept-Profile", "assistant"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            row("t6", "2024-05-01T09:00:00+00:00", "active"),
            row("t7", "2024-05-01T08:59:00+00:00", "follow up"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = ConversationGateway::new(make_store(&server));
    let cursor = salesdesk::ConversationCursor {
        updated_at: base_time(),
        thread_id: "t5".to_string(),
    };
    let filter = ConversationFilter {
        page_id: Some("page-1".to_string()),
        ..Default::default()
    };
    let page = gateway
        .list_conversations(&filter, Some(&cursor), Some(2))
        .await
        .expect("page");

    assert_eq!(page.len(), 2);
    assert_eq!(page[1].conversation_status, ConversationStatus::FollowUp);
}

#[tokio::test]
async fn test_search_uses_ilike_on_name_and_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/conversations"))
        .and(query_param(
            "or",
            "(display_name.ilike.%ana%,summary.ilike.%ana%)",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = ConversationGateway::new(make_store(&server));
    let filter = ConversationFilter {
        query: Some(" ana ".to_string()),
        ..Default::default()
    };
    assert!(gateway
        .list_conversations(&filter, None, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_update_status_patches_and_returns_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/conversations"))
        .and(query_param("thread_id", "eq.t1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([row("t1", "2024-05-01T09:00:00+00:00", "active")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/conversations"))
        .and(query_param("thread_id", "eq.t1"))
        .and(query_param("select", COLUMNS))
        .and(header("Prefer", "return=representation"))
        .and(header("Content-Profile", "assistant"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([row("t1", "2024-05-01T09:30:00+00:00", "closed")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = ConversationGateway::new(make_store(&server));
    let updated = gateway
        .update_conversation_status("t1", ConversationStatus::Closed)
        .await
        .unwrap();
    assert_eq!(updated.conversation_status, ConversationStatus::Closed);

    let requests = server.received_requests().await.expect("recording enabled");
    let patch = requests
        .iter()
        .find(|r| r.method.to_string() == "PATCH")
        .expect("patch request");
    let body: serde_json::Value = serde_json::from_slice(&patch.body).unwrap();
    assert_eq!(body["conversation_status"], "closed");
    assert!(body["updated_at"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_update_of_missing_row_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = ConversationGateway::new(make_store(&server));
    let err = gateway
        .update_conversation_status("ghost", ConversationStatus::Closed)
        .await
        .unwrap_err();
    assert!(matches!(
        SalesdeskError::from_anyhow(&err),
        SalesdeskError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_message_listing_reads_newest_first_and_returns_ascending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/messages"))
        .and(query_param("thread_id", "eq.t1"))
        .and(query_param("order", "ts.desc,mid.desc"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"mid": "m2", "thread_id": "t1", "role": "assistant", "text": "b", "ts": "2024-05-01T09:00:02Z"},
            {"mid": "m1", "thread_id": "t1", "role": "user", "text": "a", "ts": "2024-05-01T09:00:01Z"},
        ])))
        .mount(&server)
        .await;

    let gateway = MessageGateway::new(make_store(&server));
    let page = gateway
        .list_messages(&ListMessagesParams {
            limit: Some(2),
            ..ListMessagesParams::for_thread("t1")
        })
        .await
        .unwrap();
    let mids: Vec<_> = page.iter().map(|m| m.mid.as_str()).collect();
    assert_eq!(mids, vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_server_error_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let gateway = ConversationGateway::new(make_store(&server));
    let err = gateway
        .list_conversations(&ConversationFilter::default(), None, None)
        .await
        .unwrap_err();
    match SalesdeskError::from_anyhow(&err) {
        SalesdeskError::Transport(msg) => assert!(msg.contains("503")),
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_array_body_is_storage_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "nope"})))
        .mount(&server)
        .await;

    let gateway = ConversationGateway::new(make_store(&server));
    let err = gateway.get_conversation("t1").await.unwrap_err();
    assert!(matches!(
        SalesdeskError::from_anyhow(&err),
        SalesdeskError::Storage(_)
    ));
}
