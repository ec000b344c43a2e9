//! Client-side query orchestration
//!
//! - `key`: structured cache keys and invalidation prefixes
//! - `cache`: keyed result cache with staleness tracking
//! - `inflight`: single-flight table with per-request sequence numbers
//! - `infinite`: page accumulation for cursor-paginated queries
//! - `client`: the [`QueryClient`] tying them to the gateways

pub mod cache;
pub mod client;
pub mod infinite;
pub mod inflight;
pub mod key;

pub use cache::{CacheEntry, QueryCache, QueryData};
pub use client::{ConversationListParams, MessageListParams, QueryClient, QueryState};
pub use infinite::{InfinitePages, Paged};
pub use inflight::{Completion, Flight, InflightTable};
pub use key::{Entity, Operation, QueryKey, QueryKeyPrefix};
