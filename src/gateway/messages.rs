//! Message data gateway
//!
//! Messages are keyed by `(ts, mid)` within a thread. Results are always
//! returned oldest first so callers can merge pages without re-sorting.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::decode_rows;
use crate::error::Result;
use crate::models::{format_timestamp, Message, MessageCursor, MessageRole};
use crate::store::{Filter, OrderBy, Select, Store, MESSAGES_TABLE, MESSAGE_COLUMNS};

/// Page size used when the caller does not pass one
pub const DEFAULT_MESSAGE_LIMIT: usize = 30;

/// Parameters of one message page request
///
/// Supply at most one of `before` and `after`. When both are present
/// `before` wins and `after` is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMessagesParams {
    pub thread_id: String,
    pub limit: Option<usize>,
    /// Load the page immediately older than this position
    pub before: Option<MessageCursor>,
    /// Load the page immediately newer than this position
    pub after: Option<MessageCursor>,
    pub role: Option<MessageRole>,
}

impl ListMessagesParams {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }
}

/// Reads message history
#[derive(Clone)]
pub struct MessageGateway {
    store: Arc<dyn Store>,
}

impl MessageGateway {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// One page of messages, ascending by `(ts, mid)`
    ///
    /// - `before`: up to `limit` messages strictly older than the cursor,
    ///   the ones closest to it
    /// - `after`: up to `limit` messages strictly newer than the cursor
    /// - neither: the newest `limit` messages of the thread
    pub async fn list_messages(&self, params: &ListMessagesParams) -> Result<Vec<Message>> {
        let limit = params.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);
        let mut select = Select::new(MESSAGES_TABLE, MESSAGE_COLUMNS)
            .filter(Filter::Eq("thread_id", params.thread_id.clone()))
            .limit(limit);

        if let Some(role) = params.role {
            select = select.filter(Filter::Eq("role", role.as_str().to_string()));
        }

        // Backward windows are read newest-first so the limit keeps the rows
        // nearest the cursor, then flipped to ascending.
        let newest_first = match (&params.before, &params.after) {
            (Some(before), after) => {
                if after.is_some() {
                    tracing::warn!(
                        thread_id = %params.thread_id,
                        "both before and after cursors supplied; ignoring after"
                    );
                }
                select = select.filter(keyset_filter(before, false));
                true
            }
            (None, Some(after)) => {
                select = select.filter(keyset_filter(after, true));
                false
            }
            (None, None) => true,
        };

        select = if newest_first {
            select
                .order_by(OrderBy::desc("ts"))
                .order_by(OrderBy::desc("mid"))
        } else {
            select
                .order_by(OrderBy::asc("ts"))
                .order_by(OrderBy::asc("mid"))
        };

        tracing::debug!(
            thread_id = %params.thread_id,
            before = ?params.before,
            after = ?params.after,
            limit,
            "listing messages"
        );
        let rows = self.store.select(&select).await?;
        let mut messages: Vec<Message> = decode_rows(rows)?;
        if newest_first {
            messages.reverse();
        }
        Ok(messages)
    }
}

/// `(ts, mid) > cursor` when `newer`, `(ts, mid) < cursor` otherwise
fn keyset_filter(cursor: &MessageCursor, newer: bool) -> Filter {
    let ts = format_timestamp(&cursor.ts);
    let mid = cursor.mid.clone();
    if newer {
        Filter::Or(vec![
            Filter::Gt("ts", ts.clone()),
            Filter::And(vec![Filter::Eq("ts", ts), Filter::Gt("mid", mid)]),
        ])
    } else {
        Filter::Or(vec![
            Filter::Lt("ts", ts.clone()),
            Filter::And(vec![Filter::Eq("ts", ts), Filter::Lt("mid", mid)]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::{Duration, TimeZone, Utc};

    fn seeded(count: usize) -> (MessageGateway, Vec<Message>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new_with_path(dir.path().join("m.db")).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let mut all = Vec::new();
        for i in 0..count {
            let msg = Message {
                mid: format!("m{:03}", i),
                thread_id: "t1".to_string(),
                role: if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                },
                text: format!("message {}", i),
                // pairs share a timestamp so mid breaks the tie
                ts: start + Duration::seconds((i / 2) as i64),
            };
            store.insert_message(&msg).unwrap();
            all.push(msg);
        }
        (MessageGateway::new(Arc::new(store)), all, dir)
    }

    #[tokio::test]
    async fn test_no_cursor_returns_newest_page_ascending() {
        let (gw, all, _dir) = seeded(10);
        let page = gw
            .list_messages(&ListMessagesParams {
                limit: Some(4),
                ..ListMessagesParams::for_thread("t1")
            })
            .await
            .unwrap();
        assert_eq!(page, all[6..].to_vec());
    }

    #[tokio::test]
    async fn test_before_returns_page_adjacent_to_cursor() {
        let (gw, all, _dir) = seeded(10);
        let page = gw
            .list_messages(&ListMessagesParams {
                limit: Some(3),
                before: Some(all[7].cursor()),
                ..ListMessagesParams::for_thread("t1")
            })
            .await
            .unwrap();
        assert_eq!(page, all[4..7].to_vec());
    }

    #[tokio::test]
    async fn test_after_returns_newer_page_ascending() {
        let (gw, all, _dir) = seeded(10);
        let page = gw
            .list_messages(&ListMessagesParams {
                limit: Some(3),
                after: Some(all[2].cursor()),
                ..ListMessagesParams::for_thread("t1")
            })
            .await
            .unwrap();
        assert_eq!(page, all[3..6].to_vec());
    }

    #[tokio::test]
    async fn test_before_takes_precedence_over_after() {
        let (gw, all, _dir) = seeded(10);
        let page = gw
            .list_messages(&ListMessagesParams {
                limit: Some(2),
                before: Some(all[5].cursor()),
                after: Some(all[0].cursor()),
                ..ListMessagesParams::for_thread("t1")
            })
            .await
            .unwrap();
        assert_eq!(page, all[3..5].to_vec());
    }

    #[tokio::test]
    async fn test_role_filter() {
        let (gw, _all, _dir) = seeded(10);
        let page = gw
            .list_messages(&ListMessagesParams {
                role: Some(MessageRole::Assistant),
                ..ListMessagesParams::for_thread("t1")
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 5);
        assert!(page.iter().all(|m| m.role == MessageRole::Assistant));
    }

    #[tokio::test]
    async fn test_other_threads_are_excluded() {
        let (gw, _all, _dir) = seeded(3);
        let page = gw
            .list_messages(&ListMessagesParams::for_thread("t2"))
            .await
            .unwrap();
        assert!(page.is_empty());
    }
}
