//! Prefix-autocomplete engine.
//!
//! Items (JSON documents with a numeric id) are attached to text keys and
//! retrieved by key prefix:
//! - Path-compressed trie mapping keys to funnel ids
//! - Funnels of item ids plus a reference-counted item store
//! - Field filters, excludes and response projection
//! - Bounded, deduplicating prefix traversal under a shared read lock
//! - Compressed snapshots with a background save worker

pub mod config;
pub mod error;
pub mod index;
pub mod keeper;
pub mod persistence;
pub mod query;
pub mod search;
pub mod service;
pub mod shared;
pub mod storage;
pub mod types;

// Re-export main types
pub use config::{PredictConfig, QueryKeys};
pub use error::{ErrorKind, PredictError, Result};
pub use index::{Enumeration, PrefixTrie};
pub use keeper::Keeper;
pub use persistence::{SavedSnapshot, SnapshotWorker};
pub use query::{FilterChain, Predicate, Projection, Query, QueryCompiler};
pub use search::{SeekResult, Seeker};
pub use service::{PredictResponse, PredictService};
pub use shared::{IndexData, SharedIndex};
pub use storage::{Farm, Funnel};
pub use types::{FunnelId, IndexStats, Item, ItemId};
