//! Record types shared by the gateways and the query client
//!
//! Rows are decoded straight from the store's JSON representation, so the
//! serde field names match the store's column names.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SalesdeskError;

/// Canonical text form of a timestamp as written to and compared in the store
///
/// RFC 3339, UTC, microsecond precision, `Z` suffix. Lexicographic order of
/// these strings equals chronological order.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use salesdesk::models::format_timestamp;
///
/// let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
/// assert_eq!(format_timestamp(&ts), "2024-05-01T12:00:00.000000Z");
/// ```
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Workflow status of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "follow up", alias = "follow-up", alias = "follow_up")]
    FollowUp,
    #[serde(rename = "closed")]
    Closed,
}

impl ConversationStatus {
    /// Value stored in the `conversation_status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::FollowUp => "follow up",
            ConversationStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = SalesdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(ConversationStatus::Active),
            "follow up" | "follow-up" | "follow_up" => Ok(ConversationStatus::FollowUp),
            "closed" => Ok(ConversationStatus::Closed),
            other => Err(SalesdeskError::Storage(format!(
                "unknown conversation status: {}",
                other
            ))),
        }
    }
}

/// One customer conversation thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub thread_id: String,
    /// Page (inbox) the conversation belongs to
    pub page_id: String,
    /// Page-scoped id of the customer
    pub psid: String,
    pub display_name: Option<String>,
    pub summary: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub conversation_status: ConversationStatus,
}

impl Conversation {
    /// Keyset position of this row in the conversation ordering
    pub fn cursor(&self) -> ConversationCursor {
        ConversationCursor {
            updated_at: self.updated_at,
            thread_id: self.thread_id.clone(),
        }
    }
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message inside a conversation thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub mid: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub text: String,
    pub ts: DateTime<Utc>,
}

impl Message {
    /// Keyset position of this message within its thread
    pub fn cursor(&self) -> MessageCursor {
        MessageCursor {
            ts: self.ts,
            mid: self.mid.clone(),
        }
    }
}

/// Position after which the next (older) conversation page starts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationCursor {
    pub updated_at: DateTime<Utc>,
    pub thread_id: String,
}

/// Keyset position of a message: `(ts, mid)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageCursor {
    pub ts: DateTime<Utc>,
    pub mid: String,
}

/// Category of a suggested reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionType {
    #[default]
    Discovery,
    Qualify,
    Offer,
}

impl SuggestionType {
    /// Parse a wire value, falling back to `Discovery` for unknown kinds
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "qualify" => SuggestionType::Qualify,
            "offer" => SuggestionType::Offer,
            _ => SuggestionType::Discovery,
        }
    }
}

/// A single AI-generated reply suggestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    #[serde(rename = "type")]
    pub suggestion_type: SuggestionType,
    pub message: String,
    pub rationale: String,
}

/// Normalized suggestion envelope for one thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionBatch {
    pub thread_id: String,
    /// Latest message id the suggestions were generated from
    pub based_on_mid: String,
    /// Generation time exactly as sent by the webhook
    pub generated_at: String,
    pub suggestions: Vec<Suggestion>,
    /// Set when a string-encoded suggestion list could not be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
}

impl SuggestionBatch {
    /// Suggestions of one category, in their original order
    pub fn by_type(&self, kind: SuggestionType) -> Vec<&Suggestion> {
        self.suggestions
            .iter()
            .filter(|s| s.suggestion_type == kind)
            .collect()
    }
}
