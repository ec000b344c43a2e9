//! Conversation data gateway
//!
//! Conversations are ordered newest first by `updated_at`, ties broken by
//! `thread_id` ascending. A page continues strictly after the cursor in that
//! order, so consecutive pages never overlap or skip a row as long as the
//! filter and the data are unchanged.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::decode_rows;
use crate::error::{Result, SalesdeskError};
use crate::models::{format_timestamp, Conversation, ConversationCursor, ConversationStatus};
use crate::store::{
    contains_pattern, Filter, OrderBy, Select, Store, Update, CONVERSATIONS_TABLE,
    CONVERSATION_COLUMNS,
};

/// Page size used when the caller does not pass one
pub const DEFAULT_CONVERSATION_LIMIT: usize = 25;

/// Optional restrictions applied to a conversation listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    /// Case-insensitive substring of display name or summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl ConversationFilter {
    /// Search term after trimming, or `None` if blank
    pub fn search_term(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }
}

/// Reads and updates conversation rows
#[derive(Clone)]
pub struct ConversationGateway {
    store: Arc<dyn Store>,
}

impl ConversationGateway {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// One page of conversations, newest first
    ///
    /// Without a cursor the newest page is returned; with one, the page
    /// immediately after it in `(updated_at DESC, thread_id ASC)` order.
    pub async fn list_conversations(
        &self,
        filter: &ConversationFilter,
        cursor: Option<&ConversationCursor>,
        limit: Option<usize>,
    ) -> Result<Vec<Conversation>> {
        let limit = limit.unwrap_or(DEFAULT_CONVERSATION_LIMIT);
        let mut select = Select::new(CONVERSATIONS_TABLE, CONVERSATION_COLUMNS)
            .order_by(OrderBy::desc("updated_at"))
            .order_by(OrderBy::asc("thread_id"))
            .limit(limit);

        if let Some(page_id) = &filter.page_id {
            select = select.filter(Filter::Eq("page_id", page_id.clone()));
        }
        if let Some(status) = filter.status {
            select = select.filter(Filter::Eq(
                "conversation_status",
                status.as_str().to_string(),
            ));
        }
        if let Some(term) = filter.search_term() {
            let pattern = contains_pattern(term);
            select = select.filter(Filter::Or(vec![
                Filter::ILike("display_name", pattern.clone()),
                Filter::ILike("summary", pattern),
            ]));
        }
        if let Some(cursor) = cursor {
            let ts = format_timestamp(&cursor.updated_at);
            select = select.filter(Filter::Or(vec![
                Filter::Lt("updated_at", ts.clone()),
                Filter::And(vec![
                    Filter::Eq("updated_at", ts),
                    Filter::Gt("thread_id", cursor.thread_id.clone()),
                ]),
            ]));
        }

        tracing::debug!(?filter, ?cursor, limit, "listing conversations");
        let rows = self.store.select(&select).await?;
        decode_rows(rows)
    }

    /// Look up one conversation; `Ok(None)` when it does not exist
    pub async fn get_conversation(&self, thread_id: &str) -> Result<Option<Conversation>> {
        let select = Select::new(CONVERSATIONS_TABLE, CONVERSATION_COLUMNS)
            .filter(Filter::Eq("thread_id", thread_id.to_string()))
            .limit(1);
        let rows = self.store.select(&select).await?;
        Ok(decode_rows(rows)?.into_iter().next())
    }

    /// Set the status and bump `updated_at`
    ///
    /// The new `updated_at` is the current time, or one microsecond past the
    /// previous value if the clock has not moved beyond it.
    ///
    /// # Errors
    ///
    /// Returns `SalesdeskError::NotFound` if no conversation has this id.
    pub async fn update_conversation_status(
        &self,
        thread_id: &str,
        status: ConversationStatus,
    ) -> Result<Conversation> {
        let current = self
            .get_conversation(thread_id)
            .await?
            .ok_or_else(|| SalesdeskError::NotFound(format!("conversation {}", thread_id)))?;

        let updated_at = next_updated_at(current.updated_at, Utc::now());
        let update = Update {
            table: CONVERSATIONS_TABLE,
            returning: CONVERSATION_COLUMNS,
            set: vec![
                ("conversation_status", status.as_str().to_string()),
                ("updated_at", format_timestamp(&updated_at)),
            ],
            filters: vec![Filter::Eq("thread_id", thread_id.to_string())],
        };

        let rows = self.store.update(&update).await?;
        let updated = decode_rows::<Conversation>(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| SalesdeskError::NotFound(format!("conversation {}", thread_id)))?;

        tracing::info!(
            thread_id,
            from = %current.conversation_status,
            to = %updated.conversation_status,
            "conversation status updated"
        );
        Ok(updated)
    }
}

/// Microsecond-truncated `now`, forced strictly past `previous`
fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now
        .duration_trunc(Duration::microseconds(1))
        .unwrap_or(now);
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::TimeZone;

    fn seeded_gateway(rows: &[(&str, u32, Option<&str>, Option<&str>)]) -> (ConversationGateway, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new_with_path(dir.path().join("c.db")).unwrap();
        for (id, minute, name, summary) in rows {
            store
                .insert_conversation(&Conversation {
                    thread_id: id.to_string(),
                    page_id: "page-1".to_string(),
                    psid: "psid".to_string(),
                    display_name: name.map(str::to_string),
                    summary: summary.map(str::to_string),
                    updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, *minute, 0).unwrap(),
                    conversation_status: ConversationStatus::Active,
                })
                .unwrap();
        }
        (ConversationGateway::new(Arc::new(store)), dir)
    }

    fn ids(rows: &[Conversation]) -> Vec<&str> {
        rows.iter().map(|c| c.thread_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_ties_broken_by_thread_id_ascending() {
        let (gw, _dir) = seeded_gateway(&[
            ("c", 5, None, None),
            ("a", 5, None, None),
            ("b", 5, None, None),
            ("z", 9, None, None),
        ]);
        let all = gw
            .list_conversations(&ConversationFilter::default(), None, None)
            .await
            .unwrap();
        assert_eq!(ids(&all), vec!["z", "a", "b", "c"]);

        let page1 = gw
            .list_conversations(&ConversationFilter::default(), None, Some(2))
            .await
            .unwrap();
        let page2 = gw
            .list_conversations(
                &ConversationFilter::default(),
                Some(&page1[1].cursor()),
                Some(2),
            )
            .await
            .unwrap();
        assert_eq!(ids(&page1), vec!["z", "a"]);
        assert_eq!(ids(&page2), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_search_matches_name_or_summary_case_insensitively() {
        let (gw, _dir) = seeded_gateway(&[
            ("a", 1, Some("Maria Lopez"), None),
            ("b", 2, None, Some("wants a MARIAchi band")),
            ("c", 3, Some("Tom"), Some("pricing")),
        ]);
        let filter = ConversationFilter {
            query: Some("  maria ".to_string()),
            ..Default::default()
        };
        let rows = gw.list_conversations(&filter, None, None).await.unwrap();
        assert_eq!(ids(&rows), vec!["b", "a"]);

        let blank = ConversationFilter {
            query: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(gw.list_conversations(&blank, None, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_get_conversation_not_found_is_none() {
        let (gw, _dir) = seeded_gateway(&[("a", 1, None, None)]);
        assert!(gw.get_conversation("missing").await.unwrap().is_none());
        assert!(gw.get_conversation("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_missing_conversation_is_not_found() {
        let (gw, _dir) = seeded_gateway(&[]);
        let err = gw
            .update_conversation_status("ghost", ConversationStatus::Closed)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SalesdeskError>(),
            Some(SalesdeskError::NotFound(_))
        ));
    }

    #[test]
    fn test_next_updated_at_is_strictly_increasing() {
        let prev = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_updated_at(prev, now), prev + Duration::microseconds(1));

        let later = prev + Duration::seconds(5);
        assert_eq!(next_updated_at(prev, later), later);
    }
}
