//! Query client
//!
//! Orchestrates the gateways behind a keyed cache: identical reads share
//! one request, fresh results are served from memory, infinite queries
//! accumulate pages, and mutations invalidate what they affect.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::{Config, QueryConfig, SuggestionConfig};
use crate::error::{Result, SalesdeskError};
use crate::gateway::{
    ConversationFilter, ConversationGateway, ListMessagesParams, MessageGateway,
    SuggestionGateway,
};
use crate::models::{
    Conversation, ConversationCursor, ConversationStatus, Message, MessageCursor, MessageRole,
    SuggestionBatch,
};
use crate::query::cache::{QueryCache, QueryData};
use crate::query::infinite::{InfinitePages, Paged};
use crate::query::inflight::{Completion, FetchResult, Flight, InflightTable, SharedFetch};
use crate::query::key::{QueryKey, QueryKeyPrefix};
use crate::store::{open_store, Store};

/// What a read hands back to its caller
///
/// `error` reports the failure of the request this read waited on, if
/// any; `data` still holds whatever was cached before it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<SalesdeskError>,
    pub is_stale: bool,
}

impl<T> QueryState<T> {
    fn map<U>(self, f: impl FnOnce(T) -> Option<U>) -> QueryState<U> {
        QueryState {
            data: self.data.and_then(f),
            error: self.error,
            is_stale: self.is_stale,
        }
    }
}

/// Parameters of a conversation list query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationListParams {
    pub filter: ConversationFilter,
    /// Page size; the configured default when `None`
    pub limit: Option<usize>,
}

/// Parameters of a message history query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageListParams {
    pub thread_id: String,
    pub role: Option<MessageRole>,
    /// Page size; the configured default when `None`
    pub limit: Option<usize>,
}

impl MessageListParams {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Default::default()
        }
    }
}

struct Inner {
    conversations: ConversationGateway,
    messages: MessageGateway,
    suggestions: SuggestionGateway,
    cache: QueryCache,
    inflight: InflightTable,
    config: QueryConfig,
    active: Mutex<Option<String>>,
}

/// Cached, deduplicated access to conversations, messages and suggestions
///
/// Cloning is cheap; clones share one cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl QueryClient {
    /// Create a client over an opened store
    ///
    /// # Errors
    ///
    /// Returns error if the webhook HTTP client cannot be built
    pub fn new(
        store: Arc<dyn Store>,
        suggestions: SuggestionConfig,
        config: QueryConfig,
    ) -> Result<Self> {
        let suggestions = SuggestionGateway::new(suggestions)?;
        Ok(Self::with_gateways(
            ConversationGateway::new(store.clone()),
            MessageGateway::new(store),
            suggestions,
            config,
        ))
    }

    /// Open the configured store and build a client on it
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened or the webhook HTTP
    /// client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = open_store(&config.store)?;
        let client = Self::new(store, config.suggestions.clone(), config.query.clone())?;
        tracing::info!(
            backend = ?config.store.backend,
            webhook = config.suggestions.webhook_url.is_some(),
            "query client ready"
        );
        Ok(client)
    }

    pub fn with_gateways(
        conversations: ConversationGateway,
        messages: MessageGateway,
        suggestions: SuggestionGateway,
        config: QueryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                conversations,
                messages,
                suggestions,
                cache: QueryCache::new(),
                inflight: InflightTable::new(),
                config,
                active: Mutex::new(None),
            }),
        }
    }

    /// Underlying cache, for inspection
    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    /// Number of requests currently outstanding
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.len()
    }

    fn conversation_list_key(&self, params: &ConversationListParams) -> (QueryKey, usize) {
        let limit = params
            .limit
            .unwrap_or(self.inner.config.conversation_page_size);
        (QueryKey::conversation_list(&params.filter, limit), limit)
    }

    fn message_list_key(&self, params: &MessageListParams) -> (QueryKey, usize) {
        let limit = params.limit.unwrap_or(self.inner.config.message_page_size);
        (
            QueryKey::message_list(&params.thread_id, params.role, limit),
            limit,
        )
    }

    // ---------------------------------------------------------------------
    // Conversations
    // ---------------------------------------------------------------------

    /// Conversation list, newest first, with every page loaded so far
    ///
    /// Served from cache while fresh. A stale list is reloaded from the
    /// first page, up to as many pages as were loaded before.
    pub async fn conversations(
        &self,
        params: &ConversationListParams,
    ) -> QueryState<InfinitePages<Conversation>> {
        let (key, limit) = self.conversation_list_key(params);
        let stale_time = Some(self.inner.config.conversation_stale_time());
        let page_count = self.loaded_pages(&key, |data| match data {
            QueryData::ConversationPages(pages) => Some(pages.page_count()),
            _ => None,
        });

        let filter = params.filter.clone();
        self.read(key, stale_time, move |inner| {
            async move {
                let pages = reload_pages::<Conversation, _, _>(page_count, limit, |cursor| {
                    let inner = inner.clone();
                    let filter = filter.clone();
                    async move {
                        inner
                            .conversations
                            .list_conversations(&filter, cursor.as_ref(), Some(limit))
                            .await
                    }
                })
                .await?;
                Ok(QueryData::ConversationPages(pages))
            }
            .boxed()
        })
        .await
        .map(|data| match data {
            QueryData::ConversationPages(pages) => Some(pages),
            _ => None,
        })
    }

    /// Load the page after the last loaded one
    ///
    /// Loads the first page if nothing is cached yet. Does nothing once a
    /// fresh list is exhausted. A stale or invalidated list is reloaded from
    /// the first page, one page further than before.
    pub async fn fetch_next_conversations(
        &self,
        params: &ConversationListParams,
    ) -> QueryState<InfinitePages<Conversation>> {
        let (key, limit) = self.conversation_list_key(params);
        let stale_time = Some(self.inner.config.conversation_stale_time());
        self.settle(&key).await;

        let Some(entry) = self.inner.cache.get(&key) else {
            return self.conversations(params).await;
        };
        let stale = entry.is_stale(stale_time);
        let existing = match entry.data {
            Some(QueryData::ConversationPages(pages)) => pages,
            _ => return self.conversations(params).await,
        };
        if !stale && !existing.has_next_page() {
            return self.state(&key, stale_time, None).map(|data| match data {
                QueryData::ConversationPages(pages) => Some(pages),
                _ => None,
            });
        }

        let filter = params.filter.clone();
        self.fetch(key, stale_time, move |inner| {
            async move {
                let fetch_page = |cursor: Option<ConversationCursor>| {
                    let inner = inner.clone();
                    let filter = filter.clone();
                    async move {
                        inner
                            .conversations
                            .list_conversations(&filter, cursor.as_ref(), Some(limit))
                            .await
                    }
                };
                let pages = if stale {
                    let count = existing.page_count() + 1;
                    reload_pages::<Conversation, _, _>(count, limit, fetch_page).await?
                } else {
                    let mut pages = existing;
                    let cursor = pages.next_cursor();
                    let page = fetch_page(cursor.clone()).await?;
                    pages.push(cursor, page);
                    pages
                };
                Ok(QueryData::ConversationPages(pages))
            }
            .boxed()
        })
        .await
        .map(|data| match data {
            QueryData::ConversationPages(pages) => Some(pages),
            _ => None,
        })
    }

    /// One conversation; `data` is `Some(None)` when it does not exist
    pub async fn conversation(&self, thread_id: &str) -> QueryState<Option<Conversation>> {
        let key = QueryKey::conversation_by_id(thread_id);
        let stale_time = Some(self.inner.config.conversation_stale_time());
        let thread_id = thread_id.to_string();
        self.read(key, stale_time, move |inner| {
            async move {
                let found = inner.conversations.get_conversation(&thread_id).await?;
                Ok(QueryData::Conversation(found))
            }
            .boxed()
        })
        .await
        .map(|data| match data {
            QueryData::Conversation(found) => Some(found),
            _ => None,
        })
    }

    /// Change a conversation's status
    ///
    /// On success the cached conversation is replaced with the returned row
    /// and every conversation list is marked stale.
    pub async fn update_conversation_status(
        &self,
        thread_id: &str,
        status: ConversationStatus,
    ) -> std::result::Result<Conversation, SalesdeskError> {
        let updated = self
            .with_timeout(
                &format!("status update of {}", thread_id),
                self.inner
                    .conversations
                    .update_conversation_status(thread_id, status),
            )
            .await?;

        // a read issued before the update must not land on top of it
        self.inner
            .inflight
            .cancel(&QueryKeyPrefix::conversation(thread_id));
        self.inner.cache.set_data(
            QueryKey::conversation_by_id(thread_id),
            QueryData::Conversation(Some(updated.clone())),
        );
        self.invalidate(&QueryKeyPrefix::conversation_lists());
        Ok(updated)
    }

    // ---------------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------------

    /// Message history of a thread, oldest first, with every page loaded so
    /// far
    pub async fn messages(&self, params: &MessageListParams) -> QueryState<InfinitePages<Message>> {
        let (key, limit) = self.message_list_key(params);
        let stale_time = Some(self.inner.config.message_stale_time());
        let page_count = self.loaded_pages(&key, |data| match data {
            QueryData::MessagePages(pages) => Some(pages.page_count()),
            _ => None,
        });

        let params = params.clone();
        self.read(key, stale_time, move |inner| {
            async move {
                let pages = reload_pages::<Message, _, _>(page_count, limit, |cursor| {
                    let inner = inner.clone();
                    let request = ListMessagesParams {
                        thread_id: params.thread_id.clone(),
                        limit: Some(limit),
                        before: cursor,
                        after: None,
                        role: params.role,
                    };
                    async move { inner.messages.list_messages(&request).await }
                })
                .await?;
                Ok(QueryData::MessagePages(pages))
            }
            .boxed()
        })
        .await
        .map(|data| match data {
            QueryData::MessagePages(pages) => Some(pages),
            _ => None,
        })
    }

    /// Load the page of history older than everything loaded so far
    ///
    /// A stale or invalidated history is reloaded from the newest page, one
    /// page further than before.
    pub async fn fetch_older_messages(
        &self,
        params: &MessageListParams,
    ) -> QueryState<InfinitePages<Message>> {
        let (key, limit) = self.message_list_key(params);
        let stale_time = Some(self.inner.config.message_stale_time());
        self.settle(&key).await;

        let Some(entry) = self.inner.cache.get(&key) else {
            return self.messages(params).await;
        };
        let stale = entry.is_stale(stale_time);
        let existing = match entry.data {
            Some(QueryData::MessagePages(pages)) => pages,
            _ => return self.messages(params).await,
        };
        if !stale && !existing.has_next_page() {
            return self.state(&key, stale_time, None).map(|data| match data {
                QueryData::MessagePages(pages) => Some(pages),
                _ => None,
            });
        }

        let params = params.clone();
        self.fetch(key, stale_time, move |inner| {
            async move {
                let fetch_page = |cursor: Option<MessageCursor>| {
                    let inner = inner.clone();
                    let request = ListMessagesParams {
                        thread_id: params.thread_id.clone(),
                        limit: Some(limit),
                        before: cursor,
                        after: None,
                        role: params.role,
                    };
                    async move { inner.messages.list_messages(&request).await }
                };
                let pages = if stale {
                    let count = existing.page_count() + 1;
                    reload_pages::<Message, _, _>(count, limit, fetch_page).await?
                } else {
                    let mut pages = existing;
                    let cursor = pages.next_cursor();
                    let page = fetch_page(cursor.clone()).await?;
                    pages.push(cursor, page);
                    pages
                };
                Ok(QueryData::MessagePages(pages))
            }
            .boxed()
        })
        .await
        .map(|data| match data {
            QueryData::MessagePages(pages) => Some(pages),
            _ => None,
        })
    }

    // ---------------------------------------------------------------------
    // Suggestions
    // ---------------------------------------------------------------------

    /// Suggestions for a thread
    ///
    /// Fetched once and kept until refetched, invalidated or dropped by a
    /// conversation switch.
    pub async fn suggestions(&self, thread_id: &str) -> QueryState<SuggestionBatch> {
        let key = QueryKey::suggestions_by_thread(thread_id);
        let thread_id = thread_id.to_string();
        self.read(key, None, move |inner| suggestion_fetch(inner, thread_id))
            .await
            .map(|data| match data {
                QueryData::Suggestions(batch) => Some(batch),
                _ => None,
            })
    }

    /// Request a new batch, superseding any request still outstanding
    pub async fn refetch_suggestions(&self, thread_id: &str) -> QueryState<SuggestionBatch> {
        let key = QueryKey::suggestions_by_thread(thread_id);
        let thread_id = thread_id.to_string();
        self.fetch(key, None, move |inner| suggestion_fetch(inner, thread_id))
            .await
            .map(|data| match data {
                QueryData::Suggestions(batch) => Some(batch),
                _ => None,
            })
    }

    // ---------------------------------------------------------------------
    // Conversation switching and invalidation
    // ---------------------------------------------------------------------

    /// Make `thread_id` the active conversation; returns the previous one
    ///
    /// Outstanding requests, cached suggestions and cached message pages of
    /// the previously active thread are dropped. Late responses for them
    /// are discarded and their callers receive `Cancelled`.
    pub fn set_active_conversation(&self, thread_id: Option<&str>) -> Option<String> {
        let previous = {
            let mut active = self
                .inner
                .active
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, thread_id.map(str::to_string))
        };

        if let Some(prev) = previous.as_deref().filter(|p| Some(*p) != thread_id) {
            let mut cancelled = 0;
            let mut removed = 0;
            for prefix in [
                QueryKeyPrefix::suggestions_for(prev),
                QueryKeyPrefix::messages_for(prev),
            ] {
                cancelled += self.inner.inflight.cancel(&prefix);
                removed += self.inner.cache.remove(&prefix);
            }
            tracing::info!(
                from = prev,
                to = ?thread_id,
                cancelled,
                removed,
                "active conversation switched"
            );
        }
        previous
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mark matching entries stale and detach their outstanding requests
    ///
    /// The next read of each key issues a fresh request. Callers already
    /// waiting on a detached request still receive its result, reported as
    /// stale and never cached. Returns the number of cache entries marked.
    pub fn invalidate(&self, prefix: &QueryKeyPrefix) -> usize {
        let detached = self.inner.inflight.detach(prefix);
        let marked = self.inner.cache.invalidate(prefix);
        tracing::debug!(?prefix, marked, detached, "invalidated");
        marked
    }

    // ---------------------------------------------------------------------
    // Cache peeks
    // ---------------------------------------------------------------------

    pub fn cached_conversations(
        &self,
        params: &ConversationListParams,
    ) -> Option<InfinitePages<Conversation>> {
        match self.inner.cache.data(&self.conversation_list_key(params).0)? {
            QueryData::ConversationPages(pages) => Some(pages),
            _ => None,
        }
    }

    pub fn cached_conversation(&self, thread_id: &str) -> Option<Option<Conversation>> {
        match self
            .inner
            .cache
            .data(&QueryKey::conversation_by_id(thread_id))?
        {
            QueryData::Conversation(found) => Some(found),
            _ => None,
        }
    }

    pub fn cached_messages(&self, params: &MessageListParams) -> Option<InfinitePages<Message>> {
        match self.inner.cache.data(&self.message_list_key(params).0)? {
            QueryData::MessagePages(pages) => Some(pages),
            _ => None,
        }
    }

    pub fn cached_suggestions(&self, thread_id: &str) -> Option<SuggestionBatch> {
        match self
            .inner
            .cache
            .data(&QueryKey::suggestions_by_thread(thread_id))?
        {
            QueryData::Suggestions(batch) => Some(batch),
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Request plumbing
    // ---------------------------------------------------------------------

    fn loaded_pages(&self, key: &QueryKey, count: impl FnOnce(QueryData) -> Option<usize>) -> usize {
        self.inner
            .cache
            .data(key)
            .and_then(count)
            .unwrap_or(1)
            .max(1)
    }

    /// Serve `key` from cache while fresh, otherwise join or start a request
    async fn read<F>(
        &self,
        key: QueryKey,
        stale_time: Option<Duration>,
        fetch: F,
    ) -> QueryState<QueryData>
    where
        F: FnOnce(Arc<Inner>) -> BoxFuture<'static, Result<QueryData>> + Send + 'static,
    {
        if let Some(entry) = self.inner.cache.get(&key) {
            if entry.data.is_some() && !entry.is_stale(stale_time) {
                tracing::debug!(key = %key, "cache hit");
                return QueryState {
                    data: entry.data,
                    error: entry.error,
                    is_stale: false,
                };
            }
        }

        let build = self.request(key.clone(), fetch);
        let (shared, flight) = self.inner.inflight.join_or_start(&key, build);
        if let Flight::Joined(seq) = flight {
            tracing::debug!(key = %key, seq, "joined outstanding request");
        }
        self.finish(&key, stale_time, shared).await
    }

    /// Start a request for `key` unconditionally, superseding any other
    async fn fetch<F>(
        &self,
        key: QueryKey,
        stale_time: Option<Duration>,
        fetch: F,
    ) -> QueryState<QueryData>
    where
        F: FnOnce(Arc<Inner>) -> BoxFuture<'static, Result<QueryData>> + Send + 'static,
    {
        let build = self.request(key.clone(), fetch);
        let (shared, _) = self.inner.inflight.start(&key, build);
        self.finish(&key, stale_time, shared).await
    }

    /// Wait for the outstanding request of `key`, if any
    async fn settle(&self, key: &QueryKey) {
        if let Some(outstanding) = self.inner.inflight.current(key) {
            let _ = outstanding.await;
        }
    }

    async fn finish(
        &self,
        key: &QueryKey,
        stale_time: Option<Duration>,
        shared: SharedFetch,
    ) -> QueryState<QueryData> {
        match shared.await {
            Ok(data) => QueryState {
                is_stale: self
                    .inner
                    .cache
                    .get(key)
                    .map_or(true, |entry| entry.is_stale(stale_time)),
                data: Some(data),
                error: None,
            },
            Err(err) => self.state(key, stale_time, Some(err)),
        }
    }

    /// Current cached state of `key`, reporting `error` if given
    fn state(
        &self,
        key: &QueryKey,
        stale_time: Option<Duration>,
        error: Option<SalesdeskError>,
    ) -> QueryState<QueryData> {
        match self.inner.cache.get(key) {
            Some(entry) => QueryState {
                is_stale: entry.is_stale(stale_time),
                error: error.or(entry.error),
                data: entry.data,
            },
            None => QueryState {
                data: None,
                error,
                is_stale: true,
            },
        }
    }

    /// Wrap `fetch` into the future registered for request `seq`
    ///
    /// The future applies its outcome to the cache only while its request is
    /// still the registered one for `key`. A detached request hands its
    /// outcome to its callers uncached; a superseded or cancelled one gives
    /// every caller `Cancelled`.
    fn request<F>(&self, key: QueryKey, fetch: F) -> impl FnOnce(u64) -> BoxFuture<'static, FetchResult>
    where
        F: FnOnce(Arc<Inner>) -> BoxFuture<'static, Result<QueryData>> + Send + 'static,
    {
        let inner = self.inner.clone();
        move |seq| {
            async move {
                tracing::debug!(key = %key, seq, "issuing request");
                let work = fetch(inner.clone());
                let outcome = match tokio::time::timeout(inner.config.request_timeout(), work).await
                {
                    Ok(Ok(data)) => Ok(data),
                    Ok(Err(err)) => Err(SalesdeskError::from_anyhow(&err)),
                    Err(_) => Err(SalesdeskError::Transport(format!(
                        "request for {} timed out",
                        key
                    ))),
                };

                let completion = inner.inflight.complete(&key, seq, || match &outcome {
                    Ok(data) => inner.cache.set_data(key.clone(), data.clone()),
                    Err(err) => inner.cache.set_error(key.clone(), err.clone()),
                });
                match completion {
                    Completion::Applied(()) => {
                        if let Err(err) = &outcome {
                            tracing::warn!(key = %key, seq, "request failed: {}", err);
                        }
                        outcome
                    }
                    Completion::Detached => {
                        tracing::debug!(key = %key, seq, "response of invalidated request not cached");
                        outcome
                    }
                    Completion::Dropped => {
                        tracing::debug!(key = %key, seq, "discarding superseded response");
                        Err(SalesdeskError::Cancelled(format!(
                            "request for {} was superseded",
                            key
                        )))
                    }
                }
            }
            .boxed()
        }
    }

    async fn with_timeout<T>(
        &self,
        what: &str,
        work: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, SalesdeskError> {
        match tokio::time::timeout(self.inner.config.request_timeout(), work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SalesdeskError::from_anyhow(&err)),
            Err(_) => Err(SalesdeskError::Transport(format!("{} timed out", what))),
        }
    }
}

fn suggestion_fetch(inner: Arc<Inner>, thread_id: String) -> BoxFuture<'static, Result<QueryData>> {
    async move {
        let batch = inner.suggestions.get_suggestion(&thread_id).await?;
        Ok(QueryData::Suggestions(batch))
    }
    .boxed()
}

/// Fetch up to `count` pages from the start, deriving each cursor from the
/// page before it; stops early once a page ends the list
async fn reload_pages<T, F, Fut>(count: usize, limit: usize, fetch_page: F) -> Result<InfinitePages<T>>
where
    T: Paged,
    F: Fn(Option<T::Cursor>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut pages = InfinitePages::new(limit);
    let mut cursor = None;
    for _ in 0..count.max(1) {
        let page = fetch_page(cursor.clone()).await?;
        pages.push(cursor, page);
        if !pages.has_next_page() {
            break;
        }
        cursor = pages.next_cursor();
    }
    Ok(pages)
}
