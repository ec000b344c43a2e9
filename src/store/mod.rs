//! Relational store query interface
//!
//! Gateways describe what they want as a [`Select`] or [`Update`]; a
//! [`Store`] backend executes it and returns rows as JSON objects keyed by
//! column name. Two backends are provided:
//!
//! - [`SqliteStore`]: embedded database, filters compiled to parameterized SQL
//! - [`PostgrestStore`]: remote PostgREST endpoint, filters rendered as query
//!   parameters

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;

pub mod postgrest;
pub mod sqlite;

pub use postgrest::PostgrestStore;
pub use sqlite::SqliteStore;

/// Table holding one row per conversation thread
pub const CONVERSATIONS_TABLE: &str = "conversations";
/// Table holding one row per message
pub const MESSAGES_TABLE: &str = "messages";

/// Columns of the conversations table, in select order
pub const CONVERSATION_COLUMNS: &[&str] = &[
    "thread_id",
    "page_id",
    "psid",
    "display_name",
    "summary",
    "updated_at",
    "conversation_status",
];

/// Columns of the messages table, in select order
pub const MESSAGE_COLUMNS: &[&str] = &["mid", "thread_id", "role", "text", "ts"];

/// Row predicate over text-valued columns
///
/// Column names are always static identifiers chosen by the gateways; only
/// values come from callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(&'static str, String),
    Lt(&'static str, String),
    Gt(&'static str, String),
    /// Case-insensitive `LIKE` with `%`/`_` wildcards and `\` as escape
    ILike(&'static str, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

/// Sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// Filtered, ordered, limited read of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    /// AND-ed together
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Targeted update returning the updated rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub table: &'static str,
    /// Columns returned for each updated row
    pub returning: &'static [&'static str],
    /// Column assignments
    pub set: Vec<(&'static str, String)>,
    /// AND-ed together
    pub filters: Vec<Filter>,
}

/// Executes store queries
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a read and return matching rows as JSON objects
    async fn select(&self, query: &Select) -> Result<Vec<Value>>;

    /// Apply an update and return the rows it touched
    async fn update(&self, update: &Update) -> Result<Vec<Value>>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn select(&self, query: &Select) -> Result<Vec<Value>> {
        (**self).select(query).await
    }

    async fn update(&self, update: &Update) -> Result<Vec<Value>> {
        (**self).update(update).await
    }
}

/// Open the backend selected by configuration
///
/// # Errors
///
/// Returns a configuration error when the PostgREST backend lacks a URL or
/// key, or a storage error when the SQLite database cannot be opened.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Sqlite => {
            let store = match &config.sqlite_path {
                Some(path) => SqliteStore::new_with_path(path.clone())?,
                None => SqliteStore::new()?,
            };
            Ok(Arc::new(store))
        }
        StoreBackend::Postgrest => Ok(Arc::new(PostgrestStore::from_config(config)?)),
    }
}

/// Escape `LIKE` wildcards so `term` matches literally, then wrap it for a
/// substring match
pub fn contains_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}
