//! PostgREST backend
//!
//! Renders [`Select`] and [`Update`] descriptions as PostgREST query
//! parameters and talks to a Supabase-style `/rest/v1` endpoint.

use crate::config::StoreConfig;
use crate::error::{Result, SalesdeskError};
use crate::store::{Filter, OrderBy, Select, Store, Update};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value};
use std::time::Duration;

/// Remote store reached over PostgREST
pub struct PostgrestStore {
    client: Client,
    base_url: String,
    api_key: String,
    schema: String,
}

impl std::fmt::Debug for PostgrestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestStore")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl PostgrestStore {
    /// Create a store for `base_url` (without the `/rest/v1` suffix)
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        schema: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("salesdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SalesdeskError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!("Initialized PostgREST store: url={}", base_url);

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            schema: schema.into(),
        })
    }

    /// Build the store from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `url` or `key` is missing
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SalesdeskError::Config("store.url is not set".to_string()))?;
        let key = config
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SalesdeskError::Config("store.key is not set".to_string()))?;
        Self::new(
            url,
            key,
            config.schema.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn read_rows(&self, response: Response) -> Result<Vec<Value>> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("PostgREST returned error {}: {}", status, error_text);
            return Err(SalesdeskError::Transport(format!(
                "store returned {}: {}",
                status, error_text
            ))
            .into());
        }

        let body: Value = response.json().await.map_err(|e| {
            SalesdeskError::Storage(format!("Failed to decode store response: {}", e))
        })?;
        match body {
            Value::Array(rows) => Ok(rows),
            other => Err(SalesdeskError::Storage(format!(
                "expected an array of rows, got {}",
                other
            ))
            .into()),
        }
    }
}

#[async_trait]
impl Store for PostgrestStore {
    async fn select(&self, query: &Select) -> Result<Vec<Value>> {
        let params = select_params(query);
        tracing::debug!(table = query.table, ?params, "postgrest select");

        let request = self
            .client
            .get(self.table_url(query.table))
            .query(&params)
            .header("Accept-Profile", &self.schema);

        let response = self.authorize(request).send().await.map_err(|e| {
            tracing::warn!("PostgREST request failed: {}", e);
            SalesdeskError::Transport(format!("Failed to reach store: {}", e))
        })?;

        self.read_rows(response).await
    }

    async fn update(&self, update: &Update) -> Result<Vec<Value>> {
        let mut params = vec![("select".to_string(), update.returning.join(","))];
        params.extend(filter_params(&update.filters));

        let body: Map<String, Value> = update
            .set
            .iter()
            .map(|(col, value)| ((*col).to_string(), Value::String(value.clone())))
            .collect();
        tracing::debug!(table = update.table, ?params, "postgrest update");

        let request = self
            .client
            .patch(self.table_url(update.table))
            .query(&params)
            .header("Content-Profile", &self.schema)
            .header("Accept-Profile", &self.schema)
            .header("Prefer", "return=representation")
            .json(&Value::Object(body));

        let response = self.authorize(request).send().await.map_err(|e| {
            tracing::warn!("PostgREST request failed: {}", e);
            SalesdeskError::Transport(format!("Failed to reach store: {}", e))
        })?;

        self.read_rows(response).await
    }
}

/// Query parameters for a select, in a stable order
fn select_params(query: &Select) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), query.columns.join(","))];
    params.extend(filter_params(&query.filters));
    if !query.order.is_empty() {
        params.push(("order".to_string(), render_order(&query.order)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn render_order(order: &[OrderBy]) -> String {
    order
        .iter()
        .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
        .collect::<Vec<_>>()
        .join(",")
}

/// Column filters become one parameter each; boolean groups are folded into
/// a single `and=(...)` when there is more than one, since repeated logic
/// keys are not reliably combined by the server
fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    let (groups, columns): (Vec<&Filter>, Vec<&Filter>) = filters
        .iter()
        .partition(|f| matches!(f, Filter::And(_) | Filter::Or(_)));

    let mut params: Vec<(String, String)> = columns.into_iter().map(top_level_param).collect();
    match groups.len() {
        0 => {}
        1 => params.push(top_level_param(groups[0])),
        _ => {
            let parts: Vec<String> = groups.into_iter().map(render_nested).collect();
            params.push(("and".to_string(), format!("({})", parts.join(","))));
        }
    }
    params
}

/// A filter as a `key=value` pair: columns map to `col=op.value`, boolean
/// groups to `or=(...)` / `and=(...)`
fn top_level_param(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq(col, v) => ((*col).to_string(), format!("eq.{}", v)),
        Filter::Lt(col, v) => ((*col).to_string(), format!("lt.{}", v)),
        Filter::Gt(col, v) => ((*col).to_string(), format!("gt.{}", v)),
        Filter::ILike(col, v) => ((*col).to_string(), format!("ilike.{}", v)),
        Filter::And(fs) => ("and".to_string(), render_group(fs)),
        Filter::Or(fs) => ("or".to_string(), render_group(fs)),
    }
}

fn render_group(filters: &[Filter]) -> String {
    let parts: Vec<String> = filters.iter().map(render_nested).collect();
    format!("({})", parts.join(","))
}

/// A filter inside a logic tree: `col.op.value`, `and(...)`, `or(...)`
fn render_nested(filter: &Filter) -> String {
    match filter {
        Filter::Eq(col, v) => format!("{}.eq.{}", col, quote_value(v)),
        Filter::Lt(col, v) => format!("{}.lt.{}", col, quote_value(v)),
        Filter::Gt(col, v) => format!("{}.gt.{}", col, quote_value(v)),
        Filter::ILike(col, v) => format!("{}.ilike.{}", col, quote_value(v)),
        Filter::And(fs) => format!("and{}", render_group(fs)),
        Filter::Or(fs) => format!("or{}", render_group(fs)),
    }
}

/// Double-quote values containing PostgREST reserved characters
fn quote_value(value: &str) -> String {
    let reserved = value
        .chars()
        .any(|c| matches!(c, ',' | '.' | ':' | '(' | ')' | '"' | '\\') || c.is_whitespace());
    if !reserved {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}
