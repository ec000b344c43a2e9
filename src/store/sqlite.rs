use crate::error::{Result, SalesdeskError};
use crate::models::{format_timestamp, Conversation, Message};
use crate::store::{Filter, Select, Store, Update, CONVERSATIONS_TABLE, MESSAGES_TABLE};
use anyhow::Context;
use async_trait::async_trait;
use directories::ProjectDirs;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Embedded SQLite backend
///
/// A connection is opened per call on the blocking thread pool, so async
/// callers are never blocked on disk I/O.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Create a new store instance
    ///
    /// Initializes the database file in the user's data directory, or at
    /// `SALESDESK_DB_PATH` when that variable is set.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("SALESDESK_DB_PATH") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "salesdesk", "salesdesk")
            .ok_or_else(|| SalesdeskError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| SalesdeskError::Storage(e.to_string()))?;

        Self::new_with_path(data_dir.join("salesdesk.db"))
    }

    /// Create a new store instance that uses the specified database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use salesdesk::store::SqliteStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteStore::new_with_path(dir.path().join("salesdesk.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| SalesdeskError::Storage(e.to_string()))?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                thread_id TEXT PRIMARY KEY,
                page_id TEXT NOT NULL,
                psid TEXT NOT NULL,
                display_name TEXT,
                summary TEXT,
                updated_at TEXT NOT NULL,
                conversation_status TEXT NOT NULL DEFAULT 'active'
            );
            CREATE INDEX IF NOT EXISTS conversations_keyset
                ON conversations (updated_at DESC, thread_id ASC);
            CREATE TABLE IF NOT EXISTS messages (
                mid TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                ts TEXT NOT NULL,
                PRIMARY KEY (thread_id, mid)
            );
            CREATE INDEX IF NOT EXISTS messages_keyset
                ON messages (thread_id, ts, mid);",
        )
        .context("Failed to create tables")
        .map_err(|e| SalesdeskError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Insert or replace a conversation row
    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO conversations
                (thread_id, page_id, psid, display_name, summary, updated_at, conversation_status)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                conversation.thread_id,
                conversation.page_id,
                conversation.psid,
                conversation.display_name,
                conversation.summary,
                format_timestamp(&conversation.updated_at),
                conversation.conversation_status.as_str(),
            ],
        )
        .context("Failed to insert conversation")
        .map_err(|e| SalesdeskError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Insert or replace a message row
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO messages (mid, thread_id, role, text, ts)
             VALUES (?, ?, ?, ?, ?)",
            params![
                message.mid,
                message.thread_id,
                message.role.as_str(),
                message.text,
                format_timestamp(&message.ts),
            ],
        )
        .context("Failed to insert message")
        .map_err(|e| SalesdeskError::Storage(e.to_string()))?;
        Ok(())
    }

    fn run_select(db_path: PathBuf, query: Select) -> Result<Vec<Value>> {
        check_table(query.table)?;
        let (sql, params) = compile_select(&query);
        tracing::trace!(sql = %sql, "sqlite select");

        let conn = connect(&db_path)?;
        let mut stmt = conn
            .prepare(&sql)
            .context("Failed to prepare statement")
            .map_err(|e| SalesdeskError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                row_to_json(row, query.columns)
            })
            .context("Failed to run select")
            .map_err(|e| SalesdeskError::Storage(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| SalesdeskError::Storage(e.to_string()))?);
        }
        Ok(out)
    }

    fn run_update(db_path: PathBuf, update: Update) -> Result<Vec<Value>> {
        check_table(update.table)?;
        if update.set.is_empty() {
            return Err(SalesdeskError::Storage("update without assignments".into()).into());
        }
        let (sql, params) = compile_update(&update);
        tracing::trace!(sql = %sql, "sqlite update");

        let conn = connect(&db_path)?;
        let mut stmt = conn
            .prepare(&sql)
            .context("Failed to prepare statement")
            .map_err(|e| SalesdeskError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                row_to_json(row, update.returning)
            })
            .context("Failed to run update")
            .map_err(|e| SalesdeskError::Storage(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| SalesdeskError::Storage(e.to_string()))?);
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn select(&self, query: &Select) -> Result<Vec<Value>> {
        let db_path = self.db_path.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || Self::run_select(db_path, query))
            .await
            .map_err(|e| SalesdeskError::Storage(format!("select task failed: {}", e)))?
    }

    async fn update(&self, update: &Update) -> Result<Vec<Value>> {
        let db_path = self.db_path.clone();
        let update = update.clone();
        tokio::task::spawn_blocking(move || Self::run_update(db_path, update))
            .await
            .map_err(|e| SalesdeskError::Storage(format!("update task failed: {}", e)))?
    }
}

/// Open `db_path` and register `unicode_lower`
///
/// SQLite's built-in `lower()` only folds ASCII letters.
fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .context("Failed to open database")
        .map_err(|e| SalesdeskError::Storage(e.to_string()))?;
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
    .context("Failed to register unicode_lower")
    .map_err(|e| SalesdeskError::Storage(e.to_string()))?;
    Ok(conn)
}

fn check_table(table: &str) -> Result<()> {
    if table == CONVERSATIONS_TABLE || table == MESSAGES_TABLE {
        Ok(())
    } else {
        Err(SalesdeskError::Storage(format!("unknown table: {}", table)).into())
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn compile_filter(filter: &Filter, params: &mut Vec<String>) -> String {
    match filter {
        Filter::Eq(col, value) => {
            params.push(value.clone());
            format!("{} = ?", quote_ident(col))
        }
        Filter::Lt(col, value) => {
            params.push(value.clone());
            format!("{} < ?", quote_ident(col))
        }
        Filter::Gt(col, value) => {
            params.push(value.clone());
            format!("{} > ?", quote_ident(col))
        }
        Filter::ILike(col, pattern) => {
            params.push(pattern.clone());
            format!(
                "unicode_lower({}) LIKE unicode_lower(?) ESCAPE '\\'",
                quote_ident(col)
            )
        }
        Filter::And(filters) => join_filters(filters, " AND ", "1 = 1", params),
        Filter::Or(filters) => join_filters(filters, " OR ", "1 = 0", params),
    }
}

fn join_filters(
    filters: &[Filter],
    separator: &str,
    empty: &str,
    params: &mut Vec<String>,
) -> String {
    if filters.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|f| compile_filter(f, params))
        .collect();
    format!("({})", parts.join(separator))
}

fn where_clause(filters: &[Filter], params: &mut Vec<String>) -> String {
    if filters.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", join_filters(filters, " AND ", "1 = 1", params))
    }
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn compile_select(query: &Select) -> (String, Vec<String>) {
    let mut params = Vec::new();
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(query.columns),
        quote_ident(query.table)
    );
    sql.push_str(&where_clause(&query.filters, &mut params));

    if !query.order.is_empty() {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|o| {
                format!(
                    "{} {}",
                    quote_ident(o.column),
                    if o.ascending { "ASC" } else { "DESC" }
                )
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    (sql, params)
}

fn compile_update(update: &Update) -> (String, Vec<String>) {
    let mut params = Vec::new();
    let assignments: Vec<String> = update
        .set
        .iter()
        .map(|(col, value)| {
            params.push(value.clone());
            format!("{} = ?", quote_ident(col))
        })
        .collect();
    let mut sql = format!(
        "UPDATE {} SET {}",
        quote_ident(update.table),
        assignments.join(", ")
    );
    sql.push_str(&where_clause(&update.filters, &mut params));
    sql.push_str(&format!(" RETURNING {}", column_list(update.returning)));
    (sql, params)
}

fn row_to_json(row: &Row<'_>, columns: &[&str]) -> rusqlite::Result<Value> {
    let mut obj = Map::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        };
        obj.insert((*column).to_string(), value);
    }
    Ok(Value::Object(obj))
}
