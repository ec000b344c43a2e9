//! In-memory result cache keyed by [`QueryKey`]

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::SalesdeskError;
use crate::models::{Conversation, Message, SuggestionBatch};
use crate::query::infinite::InfinitePages;
use crate::query::key::{QueryKey, QueryKeyPrefix};

/// Result payload of any cached query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    ConversationPages(InfinitePages<Conversation>),
    /// `None` records that the conversation does not exist
    Conversation(Option<Conversation>),
    MessagePages(InfinitePages<Message>),
    Suggestions(SuggestionBatch),
}

/// Cached state of one query
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub data: Option<QueryData>,
    /// Error of the most recent failed fetch, cleared by the next success
    pub error: Option<SalesdeskError>,
    /// When `data` was last written
    pub updated_at: Option<Instant>,
    /// Set by invalidation; forces the next read to refetch
    pub invalidated: bool,
}

impl CacheEntry {
    /// Whether the next read should refetch
    ///
    /// `stale_time` of `None` means the data never goes stale on its own.
    pub fn is_stale(&self, stale_time: Option<Duration>) -> bool {
        if self.invalidated {
            return true;
        }
        match (self.updated_at, stale_time) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(at), Some(window)) => at.elapsed() >= window,
        }
    }
}

/// Explicit get/set/invalidate store for query results
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, CacheEntry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.lock().get(key).cloned()
    }

    pub fn data(&self, key: &QueryKey) -> Option<QueryData> {
        self.lock().get(key).and_then(|e| e.data.clone())
    }

    /// Store fresh data, clearing any previous error and invalidation
    pub fn set_data(&self, key: QueryKey, data: QueryData) {
        let mut entries = self.lock();
        let entry = entries.entry(key).or_default();
        entry.data = Some(data);
        entry.error = None;
        entry.updated_at = Some(Instant::now());
        entry.invalidated = false;
    }

    /// Record a failed fetch; previously cached data is kept
    pub fn set_error(&self, key: QueryKey, error: SalesdeskError) {
        self.lock().entry(key).or_default().error = Some(error);
    }

    /// Mark every matching entry stale; returns how many were marked
    pub fn invalidate(&self, prefix: &QueryKeyPrefix) -> usize {
        let mut count = 0;
        for (key, entry) in self.lock().iter_mut() {
            if prefix.matches(key) {
                entry.invalidated = true;
                count += 1;
            }
        }
        count
    }

    /// Drop every matching entry; returns how many were removed
    pub fn remove(&self, prefix: &QueryKeyPrefix) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !prefix.matches(key));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
