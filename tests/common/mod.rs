use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use salesdesk::config::SuggestionConfig;
use salesdesk::store::{Select, SqliteStore, Store, Update};
use salesdesk::{Conversation, ConversationStatus, Message, MessageRole};

#[allow(dead_code)]
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn conversation(thread_id: &str, updated_at: DateTime<Utc>) -> Conversation {
    Conversation {
        thread_id: thread_id.to_string(),
        page_id: "page-1".to_string(),
        psid: format!("psid-{}", thread_id),
        display_name: Some(format!("Customer {}", thread_id)),
        summary: None,
        updated_at,
        conversation_status: ConversationStatus::Active,
    }
}

/// `count` messages in `thread_id`, one second apart, oldest first
#[allow(dead_code)]
pub fn message_series(thread_id: &str, count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| Message {
            mid: format!("{}-m{:03}", thread_id, i),
            thread_id: thread_id.to_string(),
            role: if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            },
            text: format!("message {}", i),
            ts: base_time() + chrono::Duration::seconds(i as i64),
        })
        .collect()
}

#[allow(dead_code)]
pub fn create_temp_store() -> (SqliteStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = SqliteStore::new_with_path(tmp.path().join("salesdesk.db"))
        .expect("failed to create sqlite store with path");
    (store, tmp)
}

/// Store seeded with the given rows
#[allow(dead_code)]
pub fn seeded_store(conversations: &[Conversation], messages: &[Message]) -> (SqliteStore, TempDir) {
    let (store, tmp) = create_temp_store();
    for c in conversations {
        store.insert_conversation(c).expect("insert conversation");
    }
    for m in messages {
        store.insert_message(m).expect("insert message");
    }
    (store, tmp)
}

/// Wraps a store, counting selects and delaying each one
#[allow(dead_code)]
pub struct CountingStore<S> {
    inner: S,
    selects: AtomicUsize,
    delay_ms: AtomicU64,
}

#[allow(dead_code)]
impl<S: Store> CountingStore<S> {
    pub fn new(inner: S, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            selects: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
        })
    }

    pub fn selects(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    /// Delay applied to selects issued from now on
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: Store> Store for CountingStore<S> {
    async fn select(&self, query: &Select) -> salesdesk::Result<Vec<Value>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        tokio::time::sleep(delay).await;
        self.inner.select(query).await
    }

    async fn update(&self, update: &Update) -> salesdesk::Result<Vec<Value>> {
        self.inner.update(update).await
    }
}

#[allow(dead_code)]
pub fn webhook_config(server_uri: &str) -> SuggestionConfig {
    SuggestionConfig {
        webhook_url: Some(format!("{}/webhook/suggest", server_uri)),
        auth_token: Some("secret-token".to_string()),
        timeout_seconds: 5,
    }
}

/// Webhook envelope with the suggestions in the given encoding
#[allow(dead_code)]
pub fn suggestion_envelope(thread_id: &str, suggestions: Value) -> Value {
    json!([{
        "thread_id": thread_id,
        "based_on_mid": format!("{}-m044", thread_id),
        "generated_at": "2024-05-01T10:00:00Z",
        "suggestions": suggestions
    }])
}

#[allow(dead_code)]
pub fn sample_suggestions() -> Value {
    json!([
        {"id": "s1", "type": "discovery", "message": "What are you looking for?", "rationale": "open"},
        {"id": "s2", "type": "qualify", "message": "What is your budget?", "rationale": "budget"},
        {"id": "s3", "type": "offer", "message": "We have a bundle.", "rationale": "close"}
    ])
}
