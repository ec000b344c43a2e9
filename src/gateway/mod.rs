//! Stateless request/response gateways
//!
//! - `conversations`: keyset-paginated conversation listing, lookup and
//!   status updates
//! - `messages`: keyset-paginated message history for one thread
//! - `suggestions`: reply suggestions from the external webhook

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, SalesdeskError};

pub mod conversations;
pub mod messages;
pub mod suggestions;

pub use conversations::{ConversationFilter, ConversationGateway, DEFAULT_CONVERSATION_LIMIT};
pub use messages::{ListMessagesParams, MessageGateway, DEFAULT_MESSAGE_LIMIT};
pub use suggestions::{normalize_envelope, SuggestionGateway};

/// Decode store rows into typed records
fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| SalesdeskError::Storage(format!("Failed to decode row: {}", e)).into())
        })
        .collect()
}
