//! Experiential memory and pattern-discovery engine.
//!
//! Records short experience entries tagged with phenomenological qualities,
//! retrieves them by free text, quality predicate, or semantic similarity,
//! and automatically discovers recurring clusters among stored entries.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod filter;
pub mod logging;
pub mod pattern;
pub mod recall;
pub mod record;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use embedding::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use engine::ExperienceEngine;
pub use error::{EngineError, EngineResult};
pub use filter::{FilterError, FilterExpr, FilterValidation, QualityFilterService};
pub use pattern::{
    NavigablePattern, PatternCache, PatternError, PatternManager, PatternManagerSettings,
    QualityPattern,
};
pub use recall::{RecallQuery, RecallResponse, RecallResult, RecallService, SortOrder};
pub use record::store::{MemoryRecordStore, RecordStore, RecordStoreError};
pub use record::{Dimension, ExperienceRecord, Perspective, Processing, RecordId};
pub use vector::{Similar, VectorDimension, VectorError, VectorStore};
