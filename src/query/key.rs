//! Query key registry
//!
//! Every cached result is addressed by a [`QueryKey`]. Keys are structured
//! so that whole families can be invalidated at once through a
//! [`QueryKeyPrefix`].

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::gateway::ConversationFilter;
use crate::models::MessageRole;

/// Cached entity family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Conversations,
    Messages,
    Suggestions,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Conversations => "conversations",
            Entity::Messages => "messages",
            Entity::Suggestions => "suggestions",
        }
    }
}

/// Operation within an entity family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    ById,
    ByThread,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::ById => "by_id",
            Operation::ByThread => "by_thread",
        }
    }
}

/// Identifier of one cached query result
///
/// `params` is the canonical JSON rendering of the query parameters (object
/// keys sorted, absent options omitted), so equal parameters always yield
/// equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub entity: Entity,
    pub operation: Operation,
    pub params: String,
    /// Thread the result belongs to, for thread-scoped keys
    thread_id: Option<String>,
}

impl QueryKey {
    /// A page-accumulating conversation listing
    pub fn conversation_list(filter: &ConversationFilter, limit: usize) -> Self {
        let mut params = BTreeMap::new();
        params.insert("limit", json!(limit));
        if let Some(page_id) = &filter.page_id {
            params.insert("page_id", json!(page_id));
        }
        if let Some(status) = filter.status {
            params.insert("status", json!(status.as_str()));
        }
        if let Some(term) = filter.search_term() {
            params.insert("query", json!(term));
        }
        Self {
            entity: Entity::Conversations,
            operation: Operation::List,
            params: canonical(params),
            thread_id: None,
        }
    }

    pub fn conversation_by_id(thread_id: &str) -> Self {
        Self {
            entity: Entity::Conversations,
            operation: Operation::ById,
            params: canonical(BTreeMap::from([("thread_id", json!(thread_id))])),
            thread_id: Some(thread_id.to_string()),
        }
    }

    /// A page-accumulating message history of one thread
    pub fn message_list(thread_id: &str, role: Option<MessageRole>, limit: usize) -> Self {
        let mut params = BTreeMap::from([("thread_id", json!(thread_id)), ("limit", json!(limit))]);
        if let Some(role) = role {
            params.insert("role", json!(role.as_str()));
        }
        Self {
            entity: Entity::Messages,
            operation: Operation::List,
            params: canonical(params),
            thread_id: Some(thread_id.to_string()),
        }
    }

    pub fn suggestions_by_thread(thread_id: &str) -> Self {
        Self {
            entity: Entity::Suggestions,
            operation: Operation::ByThread,
            params: canonical(BTreeMap::from([("thread_id", json!(thread_id))])),
            thread_id: Some(thread_id.to_string()),
        }
    }

    /// Thread this key is scoped to, if any
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }
}

/// JSON object with keys in sorted order
fn canonical(params: BTreeMap<&'static str, Value>) -> String {
    serde_json::to_string(&params).unwrap_or_default()
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}",
            self.entity.as_str(),
            self.operation.as_str(),
            self.params
        )
    }
}

/// Selects a family of keys for invalidation or removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryKeyPrefix {
    entity: Option<Entity>,
    operation: Option<Operation>,
    thread_id: Option<String>,
}

impl QueryKeyPrefix {
    /// Every cached query
    pub fn all() -> Self {
        Self {
            entity: None,
            operation: None,
            thread_id: None,
        }
    }

    /// Conversation lists and single conversations
    pub fn conversations() -> Self {
        Self {
            entity: Some(Entity::Conversations),
            ..Self::all()
        }
    }

    /// Every conversation list regardless of filter or page size
    pub fn conversation_lists() -> Self {
        Self {
            entity: Some(Entity::Conversations),
            operation: Some(Operation::List),
            thread_id: None,
        }
    }

    /// The single-conversation entry of one thread
    pub fn conversation(thread_id: &str) -> Self {
        Self {
            entity: Some(Entity::Conversations),
            operation: Some(Operation::ById),
            thread_id: Some(thread_id.to_string()),
        }
    }

    pub fn messages() -> Self {
        Self {
            entity: Some(Entity::Messages),
            ..Self::all()
        }
    }

    /// Message histories of one thread, any role filter or page size
    pub fn messages_for(thread_id: &str) -> Self {
        Self {
            entity: Some(Entity::Messages),
            operation: None,
            thread_id: Some(thread_id.to_string()),
        }
    }

    pub fn suggestions() -> Self {
        Self {
            entity: Some(Entity::Suggestions),
            ..Self::all()
        }
    }

    pub fn suggestions_for(thread_id: &str) -> Self {
        Self {
            entity: Some(Entity::Suggestions),
            operation: None,
            thread_id: Some(thread_id.to_string()),
        }
    }

    /// Whether `key` belongs to this family
    pub fn matches(&self, key: &QueryKey) -> bool {
        self.entity.map_or(true, |e| e == key.entity)
            && self.operation.map_or(true, |o| o == key.operation)
            && self
                .thread_id
                .as_deref()
                .map_or(true, |t| key.thread_id() == Some(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationStatus;

    #[test]
    fn test_equal_params_give_equal_keys() {
        let a = ConversationFilter {
            page_id: Some("p1".into()),
            status: Some(ConversationStatus::FollowUp),
            query: Some(" acme ".into()),
        };
        let b = ConversationFilter {
            query: Some("acme".into()),
            ..a.clone()
        };
        assert_eq!(
            QueryKey::conversation_list(&a, 25),
            QueryKey::conversation_list(&b, 25)
        );
        assert_ne!(
            QueryKey::conversation_list(&a, 25),
            QueryKey::conversation_list(&a, 10)
        );
    }

    #[test]
    fn test_blank_query_is_same_key_as_none() {
        let blank = ConversationFilter {
            query: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(
            QueryKey::conversation_list(&blank, 25),
            QueryKey::conversation_list(&ConversationFilter::default(), 25)
        );
    }

    #[test]
    fn test_params_are_canonical_json() {
        let key = QueryKey::message_list("t1", Some(MessageRole::User), 30);
        assert_eq!(key.params, r#"{"limit":30,"role":"user","thread_id":"t1"}"#);
        assert_eq!(
            key.to_string(),
            r#"messages/list{"limit":30,"role":"user","thread_id":"t1"}"#
        );
    }

    #[test]
    fn test_prefix_matching() {
        let list = QueryKey::conversation_list(&ConversationFilter::default(), 25);
        let by_id = QueryKey::conversation_by_id("t1");
        let msgs = QueryKey::message_list("t1", None, 30);
        let other_msgs = QueryKey::message_list("t2", None, 30);
        let sugg = QueryKey::suggestions_by_thread("t1");

        assert!(QueryKeyPrefix::conversations().matches(&list));
        assert!(QueryKeyPrefix::conversations().matches(&by_id));
        assert!(QueryKeyPrefix::conversation_lists().matches(&list));
        assert!(!QueryKeyPrefix::conversation_lists().matches(&by_id));
        assert!(QueryKeyPrefix::messages_for("t1").matches(&msgs));
        assert!(!QueryKeyPrefix::messages_for("t1").matches(&other_msgs));
        assert!(!QueryKeyPrefix::messages_for("t1").matches(&sugg));
        assert!(QueryKeyPrefix::suggestions_for("t1").matches(&sugg));
        assert!(QueryKeyPrefix::all().matches(&sugg));
    }
}
