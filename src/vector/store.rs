//! Keyed embedding store with cosine-similarity search.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::record::RecordId;
use crate::vector::math::cosine_similarity;
use crate::vector::snapshot;
use crate::vector::types::{VectorDimension, VectorError};

/// A similarity match returned from nearest-neighbor queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Similar {
    pub id: RecordId,
    pub score: f32,
}

/// Outcome of a batch insertion: how many vectors were accepted and which
/// ids were rejected for dimension mismatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub added: usize,
    pub rejected: Vec<RecordId>,
}

/// Integrity report over stored vectors.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub valid: usize,
    pub invalid: usize,
    /// Per-vector findings for the invalid entries.
    pub details: Vec<String>,
}

/// Keyed storage of fixed-dimension embeddings with cosine-similarity
/// k-nearest-neighbor queries.
///
/// Reads may run concurrently; mutations take the write lock briefly and
/// persist to the snapshot outside of it (the vector set is cloned into a
/// buffer before any disk write).
#[derive(Debug)]
pub struct VectorStore {
    vectors: RwLock<HashMap<RecordId, Vec<f32>>>,
    dimension: VectorDimension,
    snapshot_path: Option<PathBuf>,
}

impl VectorStore {
    /// Creates an in-memory store without snapshot persistence.
    #[must_use]
    pub fn in_memory(dimension: VectorDimension) -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
            dimension,
            snapshot_path: None,
        }
    }

    /// Creates a store persisted to `snapshot_path`, loading any existing
    /// snapshot.
    ///
    /// A missing or corrupt snapshot is treated as an empty store; the
    /// failure is logged, never fatal. A snapshot written with a different
    /// dimension is likewise discarded.
    #[must_use]
    pub fn open(snapshot_path: impl AsRef<Path>, dimension: VectorDimension) -> Self {
        let path = snapshot_path.as_ref().to_path_buf();
        let mut store = Self {
            vectors: RwLock::new(HashMap::new()),
            dimension,
            snapshot_path: Some(path),
        };
        store.load_from_disk();
        store
    }

    /// The configured vector dimension.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    /// Whether the store holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }

    /// Returns a copy of the stored vector for `id`, if present.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<Vec<f32>> {
        self.vectors.read().get(id).cloned()
    }

    /// Copies every stored vector out of the lock, for callers that need a
    /// consistent view of the whole set (clustering runs over this copy).
    #[must_use]
    pub fn snapshot(&self) -> HashMap<RecordId, Vec<f32>> {
        self.vectors.read().clone()
    }

    /// Inserts or overwrites the vector for `id`.
    ///
    /// Returns `false` without mutating state when the vector's length does
    /// not match the configured dimension. Persists on success.
    pub fn add(&self, id: RecordId, vector: Vec<f32>) -> bool {
        if vector.len() != self.dimension.get() {
            warn!(
                id = %id,
                expected = self.dimension.get(),
                actual = vector.len(),
                "rejecting vector with mismatched dimension"
            );
            return false;
        }
        self.vectors.write().insert(id, vector);
        self.persist();
        true
    }

    /// Inserts a batch of vectors, applying the per-item dimension rule.
    ///
    /// Partial success is allowed; a single snapshot write covers the whole
    /// batch.
    pub fn add_batch(&self, entries: Vec<(RecordId, Vec<f32>)>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        {
            let mut vectors = self.vectors.write();
            for (id, vector) in entries {
                if vector.len() != self.dimension.get() {
                    outcome.rejected.push(id);
                } else {
                    vectors.insert(id, vector);
                    outcome.added += 1;
                }
            }
        }
        if outcome.added > 0 {
            self.persist();
        }
        outcome
    }

    /// Removes the vector for `id`. Removing an absent id is a no-op.
    pub fn remove(&self, id: &RecordId) {
        let removed = self.vectors.write().remove(id).is_some();
        if removed {
            self.persist();
        }
    }

    /// Finds the `limit` nearest stored vectors by cosine similarity.
    ///
    /// Results are ordered by descending similarity, contain only entries
    /// with `score >= threshold`, and skip stored vectors whose dimension
    /// does not match the query rather than failing the whole search.
    #[must_use]
    pub fn find_similar(&self, query: &[f32], limit: usize, threshold: f32) -> Vec<Similar> {
        let vectors = self.vectors.read();
        let mut matches: Vec<Similar> = vectors
            .iter()
            .filter(|(_, v)| v.len() == query.len())
            .map(|(id, v)| Similar {
                id: id.clone(),
                score: cosine_similarity(query, v),
            })
            .filter(|m| m.score >= threshold)
            .collect();
        drop(vectors);

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        matches
    }

    /// Same as [`find_similar`](Self::find_similar) using the stored vector
    /// for `id` as the query. The query record itself is excluded from the
    /// results.
    ///
    /// Errors when `id` has no stored vector.
    pub fn find_similar_by_id(
        &self,
        id: &RecordId,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<Similar>, VectorError> {
        let query = self
            .get(id)
            .ok_or_else(|| VectorError::NotFound(id.clone()))?;

        let mut matches = self.find_similar(&query, limit + 1, threshold);
        matches.retain(|m| &m.id != id);
        matches.truncate(limit);
        Ok(matches)
    }

    /// Checks every stored vector against `expected` and reports findings.
    #[must_use]
    pub fn validate(&self, expected: VectorDimension) -> IntegrityReport {
        let vectors = self.vectors.read();
        let mut report = IntegrityReport::default();
        for (id, vector) in vectors.iter() {
            if vector.len() != expected.get() {
                report.invalid += 1;
                report.details.push(format!(
                    "{id}: dimension {} (expected {})",
                    vector.len(),
                    expected.get()
                ));
            } else if vector.iter().all(|x| *x == 0.0) {
                report.invalid += 1;
                report.details.push(format!("{id}: all-zero vector"));
            } else {
                report.valid += 1;
            }
        }
        report
    }

    /// Removes every vector that fails [`validate`](Self::validate),
    /// returning how many were removed.
    pub fn remove_invalid(&self, expected: VectorDimension) -> usize {
        let removed = {
            let mut vectors = self.vectors.write();
            let before = vectors.len();
            vectors.retain(|_, v| v.len() == expected.get() && v.iter().any(|x| *x != 0.0));
            before - vectors.len()
        };
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Writes the full vector set to the snapshot file, if one is
    /// configured.
    pub fn save_to_disk(&self) -> Result<(), VectorError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let entries = self.entries_snapshot();
        snapshot::write_snapshot(path, self.dimension, &entries)
            .map_err(|e| VectorError::Snapshot(e.to_string()))
    }

    /// Reloads the snapshot file, replacing all in-memory vectors.
    ///
    /// A missing or corrupt snapshot yields an empty store.
    pub fn load_from_disk(&mut self) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };
        match snapshot::read_snapshot(&path) {
            Ok((dimension, entries)) if dimension == self.dimension => {
                debug!(count = entries.len(), "loaded vector snapshot");
                *self.vectors.write() = entries.into_iter().collect();
            }
            Ok((dimension, _)) => {
                warn!(
                    snapshot = dimension.get(),
                    configured = self.dimension.get(),
                    "vector snapshot dimension differs from configuration, starting empty"
                );
                self.vectors.write().clear();
            }
            Err(snapshot::SnapshotError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no vector snapshot found, starting empty");
            }
            Err(e) => {
                warn!(error = %e, "failed to load vector snapshot, starting empty");
                self.vectors.write().clear();
            }
        }
    }

    /// Clones the vector set out of the lock for serialization.
    fn entries_snapshot(&self) -> Vec<(RecordId, Vec<f32>)> {
        self.vectors
            .read()
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect()
    }

    fn persist(&self) {
        if let Err(e) = self.save_to_disk() {
            warn!(error = %e, "failed to persist vector snapshot");
        }
    }
}
