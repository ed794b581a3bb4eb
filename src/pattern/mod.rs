//! Pattern discovery over embedded experience records.
//!
//! A [`PatternManager`] owns a cached forest of hierarchical clusters plus
//! flat per-dimension quality clusters, keeps it fresh through debounced
//! incremental updates, and falls back to full rediscovery when the cache is
//! stale or the structure changed.

pub mod discovery;
pub mod incremental;
pub mod manager;
pub mod types;

pub use discovery::{DiscoveryOutcome, DiscoveryParams, HierarchicalDiscovery, PatternDiscovery};
pub use incremental::{ChangeKind, IncrementalOutcome, IncrementalPatternUpdate, NearestClusterUpdate};
pub use manager::{DebounceState, PatternManager, PatternManagerSettings};
pub use types::{
    NavigablePattern, PatternCache, PatternMetadata, PatternStats, QualityPattern, Recency,
};

use thiserror::Error;

use crate::record::store::RecordStoreError;

/// Errors from pattern discovery and cache maintenance.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Pattern not found: {id}\nSuggestion: List root patterns first to get valid pattern ids")]
    NotFound { id: String },

    #[error("Pattern discovery failed: {reason}\nSuggestion: Check that records carry valid embeddings and retry")]
    DiscoveryFailed { reason: String },

    #[error("Pattern cache I/O failed: {0}\nSuggestion: Check disk space and directory permissions")]
    CacheIo(#[from] std::io::Error),

    #[error("Pattern cache is corrupted: {0}\nSuggestion: Delete the cache file to force rediscovery")]
    CacheCorrupt(#[from] serde_json::Error),

    #[error("Record backend failed during re-tagging: {0}")]
    RecordStore(#[from] RecordStoreError),
}
