//! Salesdesk - data core of a sales assistant side panel
//!
//! This library provides keyset-paginated access to conversations and
//! messages, reply suggestions from an external webhook, and a query client
//! that caches, deduplicates and orders requests on top of them.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `store`: declarative select/update interface with SQLite and PostgREST
//!   backends
//! - `gateway`: conversation, message and suggestion gateways
//! - `query`: query keys, cache, single-flight table and the query client
//! - `models`: records shared by all layers
//! - `config`: configuration management and validation
//! - `logging`: tracing subscriber setup
//! - `error`: error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use salesdesk::query::{ConversationListParams, QueryClient};
//! use salesdesk::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("salesdesk.yaml")?;
//!     config.validate()?;
//!     salesdesk::logging::init_logging(&config.logging)?;
//!
//!     let client = QueryClient::from_config(&config)?;
//!     let state = client.conversations(&ConversationListParams::default()).await;
//!     if let Some(pages) = state.data {
//!         for conversation in pages.flatten() {
//!             println!("{} {}", conversation.thread_id, conversation.conversation_status);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod query;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, SalesdeskError};
pub use models::{
    Conversation, ConversationCursor, ConversationStatus, Message, MessageCursor, MessageRole,
    Suggestion, SuggestionBatch, SuggestionType,
};
pub use query::{QueryClient, QueryState};
