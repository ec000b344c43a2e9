//! Single-flight table of outstanding fetches
//!
//! At most one request per [`QueryKey`] is registered at a time. Readers
//! that find a registered request join it and share its result. Every
//! request carries a sequence number; its completion is applied only while
//! it is still the registered request for its key, so a request that was
//! superseded, cancelled or detached can never overwrite newer state.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::SalesdeskError;
use crate::query::cache::QueryData;
use crate::query::key::{QueryKey, QueryKeyPrefix};

/// Outcome shared by every caller of one request
pub type FetchResult = std::result::Result<QueryData, SalesdeskError>;

/// Cloneable handle on a running request
pub type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct Registered {
    seq: u64,
    fetch: SharedFetch,
}

/// What became of a request when it finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<R> {
    /// Still registered; its outcome was applied
    Applied(R),
    /// Detached by invalidation; its outcome must not be cached, but its
    /// callers may still use it
    Detached,
    /// Superseded or cancelled; its outcome must be discarded
    Dropped,
}

impl<R> Completion<R> {
    pub fn applied(self) -> Option<R> {
        match self {
            Completion::Applied(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Table {
    requests: HashMap<QueryKey, Registered>,
    /// Sequence numbers of detached requests that have not finished yet
    detached: HashSet<u64>,
}

/// How a caller came to hold a request handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// A new request was registered with this sequence number
    Started(u64),
    /// An outstanding request with this sequence number was joined
    Joined(u64),
}

#[derive(Default)]
pub struct InflightTable {
    table: Mutex<Table>,
    next_seq: AtomicU64,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Join the outstanding request for `key`, or register the one built by
    /// `start`
    ///
    /// `start` receives the new request's sequence number and must only
    /// construct the future; it runs while the table is locked.
    pub fn join_or_start<F>(&self, key: &QueryKey, start: F) -> (SharedFetch, Flight)
    where
        F: FnOnce(u64) -> BoxFuture<'static, FetchResult>,
    {
        let mut table = self.lock();
        if let Some(existing) = table.requests.get(key) {
            return (existing.fetch.clone(), Flight::Joined(existing.seq));
        }
        let seq = self.allocate_seq();
        let fetch = start(seq).shared();
        table.requests.insert(
            key.clone(),
            Registered {
                seq,
                fetch: fetch.clone(),
            },
        );
        (fetch, Flight::Started(seq))
    }

    /// Register a new request for `key`, superseding any outstanding one
    pub fn start<F>(&self, key: &QueryKey, start: F) -> (SharedFetch, u64)
    where
        F: FnOnce(u64) -> BoxFuture<'static, FetchResult>,
    {
        let mut table = self.lock();
        let seq = self.allocate_seq();
        let fetch = start(seq).shared();
        if let Some(previous) = table.requests.insert(
            key.clone(),
            Registered {
                seq,
                fetch: fetch.clone(),
            },
        ) {
            tracing::debug!(key = %key, superseded = previous.seq, seq, "request superseded");
        }
        (fetch, seq)
    }

    /// Handle on the outstanding request for `key`, if any
    pub fn current(&self, key: &QueryKey) -> Option<SharedFetch> {
        self.lock().requests.get(key).map(|r| r.fetch.clone())
    }

    pub fn is_current(&self, key: &QueryKey, seq: u64) -> bool {
        self.lock().requests.get(key).map_or(false, |r| r.seq == seq)
    }

    /// Retire request `seq` and run `apply` if it is still registered
    ///
    /// `apply` runs under the table lock, so no cancellation can interleave
    /// between the check and the write it performs.
    pub fn complete<R>(
        &self,
        key: &QueryKey,
        seq: u64,
        apply: impl FnOnce() -> R,
    ) -> Completion<R> {
        let mut guard = self.lock();
        let table = &mut *guard;
        match table.requests.get(key) {
            Some(registered) if registered.seq == seq => {
                table.requests.remove(key);
                Completion::Applied(apply())
            }
            _ if table.detached.remove(&seq) => Completion::Detached,
            _ => Completion::Dropped,
        }
    }

    /// Unregister every matching request; their completions will be
    /// discarded. Returns how many were dropped.
    pub fn cancel(&self, prefix: &QueryKeyPrefix) -> usize {
        let mut table = self.lock();
        let before = table.requests.len();
        table.requests.retain(|key, _| !prefix.matches(key));
        before - table.requests.len()
    }

    /// Unregister every matching request without failing its callers
    ///
    /// The next reader of each key starts a fresh request. A detached
    /// request completes as [`Completion::Detached`]. Returns how many were
    /// detached.
    pub fn detach(&self, prefix: &QueryKeyPrefix) -> usize {
        let mut table = self.lock();
        let Table {
            requests,
            detached,
        } = &mut *table;
        let before = requests.len();
        requests.retain(|key, registered| {
            if prefix.matches(key) {
                detached.insert(registered.seq);
                false
            } else {
                true
            }
        });
        before - requests.len()
    }

    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().requests.is_empty()
    }
}
