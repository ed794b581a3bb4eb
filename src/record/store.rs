//! Record-storage collaborator boundary.
//!
//! The engine does not own record persistence; it consumes a [`RecordStore`]
//! implementation provided by the host. [`MemoryRecordStore`] is an
//! insertion-ordered in-memory implementation used by tests and embedding
//! hosts that keep records elsewhere.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use super::{ExperienceRecord, RecordId};

/// Errors surfaced by a record-storage collaborator.
#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("Record '{0}' not found")]
    NotFound(RecordId),

    #[error("Record storage backend error: {0}")]
    Backend(String),
}

/// The record-storage boundary consumed by the engine.
///
/// Implementations are expected to serialize mutations; the engine itself
/// provides no cross-process locking.
pub trait RecordStore: Send + Sync {
    /// Returns all records in stable insertion order.
    fn all(&self) -> Result<Vec<ExperienceRecord>, RecordStoreError>;

    /// Looks up a single record.
    fn get(&self, id: &RecordId) -> Result<Option<ExperienceRecord>, RecordStoreError>;

    /// Inserts a new record.
    fn insert(&self, record: ExperienceRecord) -> Result<(), RecordStoreError>;

    /// Replaces an existing record; errors if the id is unknown.
    fn update(&self, record: ExperienceRecord) -> Result<(), RecordStoreError>;

    /// Removes a record, returning whether it existed.
    fn remove(&self, id: &RecordId) -> Result<bool, RecordStoreError>;
}

/// In-memory, insertion-ordered record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<ExperienceRecord>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the trait-object form the engine
    /// consumes.
    #[must_use]
    pub fn shared() -> Arc<dyn RecordStore> {
        Arc::new(Self::new())
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn all(&self) -> Result<Vec<ExperienceRecord>, RecordStoreError> {
        Ok(self.records.read().clone())
    }

    fn get(&self, id: &RecordId) -> Result<Option<ExperienceRecord>, RecordStoreError> {
        Ok(self.records.read().iter().find(|r| &r.id == id).cloned())
    }

    fn insert(&self, record: ExperienceRecord) -> Result<(), RecordStoreError> {
        let mut records = self.records.write();
        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        } else {
            records.push(record);
        }
        Ok(())
    }

    fn update(&self, record: ExperienceRecord) -> Result<(), RecordStoreError> {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(RecordStoreError::NotFound(record.id)),
        }
    }

    fn remove(&self, id: &RecordId) -> Result<bool, RecordStoreError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| &r.id != id);
        Ok(records.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order() {
        let store = MemoryRecordStore::new();
        for i in 0..5 {
            store
                .insert(ExperienceRecord::new(format!("exp_{i}"), "text", "claude"))
                .unwrap();
        }

        let all = store.all().unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["exp_0", "exp_1", "exp_2", "exp_3", "exp_4"]);
    }

    #[test]
    fn test_update_unknown_record_errors() {
        let store = MemoryRecordStore::new();
        let record = ExperienceRecord::new("exp_1", "text", "claude");
        assert!(matches!(
            store.update(record),
            Err(RecordStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = MemoryRecordStore::new();
        store
            .insert(ExperienceRecord::new("exp_1", "text", "claude"))
            .unwrap();

        assert!(store.remove(&RecordId::from("exp_1")).unwrap());
        assert!(!store.remove(&RecordId::from("exp_1")).unwrap());
    }
}
