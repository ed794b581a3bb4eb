//! Embedding vector storage and cosine-similarity search.
//!
//! This module keeps one fixed-dimension embedding per record id, answers
//! nearest-neighbor queries by cosine similarity, and persists the full
//! vector set to a binary snapshot file read back through a memory map.
//!
//! # Consistency
//! A missing or corrupt snapshot loads as an empty store rather than a fatal
//! error; dimension-mismatched vectors are skipped during queries and can be
//! repaired through [`VectorStore::validate`] / [`VectorStore::remove_invalid`].

mod math;
mod snapshot;
mod store;
mod types;

pub use math::{cosine_similarity, is_zero_vector, normalize_vector};
pub use snapshot::{SnapshotError, read_snapshot, write_snapshot};
pub use store::{BatchOutcome, IntegrityReport, Similar, VectorStore};
pub use types::{VECTOR_DIMENSION_384, VectorDimension, VectorError};
