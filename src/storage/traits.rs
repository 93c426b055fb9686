//! Abstract storage traits for the entity registry.
//!
//! These traits define the contract that registry backends must implement.
//! The batch pipeline only talks to the traits, so an in-memory backend
//! serves tests and embedded use while other backends can be swapped in.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::entity::{Entity, EntityId};
use crate::relationship::ClassificationRecord;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Outcome of recording one mention.
#[derive(Debug, Clone)]
pub struct Upsert {
    /// The entity after the mention was applied
    pub entity: Entity,
    /// True if this mention created the entity
    pub created: bool,
}

/// Storage trait for entity records.
///
/// # Concurrency
/// - Mentions of different normalized names may be recorded concurrently.
/// - Mentions of the same normalized name must be applied one at a time so
///   alias and counter updates are atomic.
pub trait EntityStore: Send + Sync {
    /// Record a mention, creating the entity on first sighting.
    ///
    /// A context snippet, when given, is kept within the entity's snippet bound.
    fn upsert_mention(
        &self,
        normalized_name: &str,
        raw_name: &str,
        document_id: &str,
        document_type: &str,
        snippet: Option<&str>,
    ) -> Result<Upsert, StorageError>;

    /// Get an entity by ID.
    fn get(&self, id: EntityId) -> Result<Option<Entity>, StorageError>;

    /// Apply an in-place mutation to an existing entity.
    fn update(&self, id: EntityId, apply: &mut dyn FnMut(&mut Entity)) -> Result<(), StorageError>;

    /// Fold an externally produced record (e.g. a restored snapshot) into the store.
    fn absorb(&self, entity: Entity) -> Result<(), StorageError>;

    /// All entity ids, sorted.
    fn ids(&self) -> Result<Vec<EntityId>, StorageError>;

    /// Number of stored entities.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true if the store is empty.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Copy of every entity keyed by id.
    fn snapshot(&self) -> Result<BTreeMap<EntityId, Entity>, StorageError>;
}

/// Storage trait for relationship classifications.
///
/// Records for an entity are replaced as a whole on reclassification, never
/// appended, so a label appears at most once per entity.
pub trait ClassificationStore: Send + Sync {
    /// Replace every record for an entity.
    fn replace(&self, id: EntityId, records: Vec<ClassificationRecord>) -> Result<(), StorageError>;

    /// Records for an entity (empty if never classified).
    fn get(&self, id: EntityId) -> Result<Vec<ClassificationRecord>, StorageError>;

    /// Copy of every record set keyed by entity id.
    fn snapshot(&self) -> Result<BTreeMap<EntityId, Vec<ClassificationRecord>>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_entity_store_object_safe(_: &dyn EntityStore) {}
    fn _assert_classification_store_object_safe(_: &dyn ClassificationStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::EntityNotFound(EntityId::from_normalized("x"));
        assert!(err.to_string().contains("Entity not found"));

        let err = StorageError::BackendError("poisoned lock".to_string());
        assert!(err.to_string().contains("poisoned lock"));
    }
}
