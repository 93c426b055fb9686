//! The registry context shared by the pipeline stages.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointState, Stage};
use crate::entity::{Entity, EntityId};
use crate::error::RegistryResult;
use crate::mention::MentionId;
use crate::relationship::ClassificationRecord;
use crate::storage::{
    ClassificationStore, EntityStore, InMemoryClassificationStore, InMemoryEntityStore,
};

/// Entity and classification stores, passed explicitly to every stage.
#[derive(Clone)]
pub struct Registry {
    /// Canonical entities
    pub entities: Arc<dyn EntityStore>,
    /// Merged relationship labels per entity
    pub classifications: Arc<dyn ClassificationStore>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entities", &self.entities.len().ok())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Registry {
    /// A registry over the in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            entities: Arc::new(InMemoryEntityStore::new()),
            classifications: Arc::new(InMemoryClassificationStore::new()),
        }
    }

    /// Folds a checkpoint's snapshot into the stores.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a record cannot be written.
    pub fn restore(&self, state: &CheckpointState) -> RegistryResult<()> {
        for entity in state.entities.values() {
            self.entities.absorb(entity.clone())?;
        }
        for (id, records) in &state.classifications {
            self.classifications.replace(*id, records.clone())?;
        }
        Ok(())
    }

    /// Builds a checkpoint state from the current contents.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a snapshot cannot be taken.
    pub fn checkpoint_state(
        &self,
        processed_ids: &BTreeSet<MentionId>,
        stage: Stage,
    ) -> RegistryResult<CheckpointState> {
        Ok(CheckpointState {
            processed_ids: processed_ids.clone(),
            last_updated: Utc::now(),
            stage,
            entities: self.entities.snapshot()?,
            classifications: self.classifications.snapshot()?,
        })
    }

    /// Copies the registry into its output document.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a snapshot cannot be taken.
    pub fn snapshot(&self, taxonomy_version: &str) -> RegistryResult<RegistrySnapshot> {
        Ok(RegistrySnapshot {
            taxonomy_version: taxonomy_version.to_string(),
            generated_at: Utc::now(),
            entities: self.entities.snapshot()?,
            classifications: self.classifications.snapshot()?,
        })
    }
}

/// The registry output document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Version of the taxonomy the labels were drawn from
    pub taxonomy_version: String,
    /// When the document was produced
    pub generated_at: DateTime<Utc>,
    /// Canonical entities by id
    pub entities: BTreeMap<EntityId, Entity>,
    /// Labels per entity, highest confidence first
    pub classifications: BTreeMap<EntityId, Vec<ClassificationRecord>>,
}

impl RegistrySnapshot {
    /// Writes the document as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the I/O or serialization error.
    pub fn write_json<W: Write>(&self, writer: W) -> RegistryResult<()> {
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| crate::error::RegistryError::internal(format!("serialize registry: {e}")))
    }

    /// Entity by id.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Labels for an entity, highest confidence first.
    #[must_use]
    pub fn labels(&self, id: EntityId) -> &[ClassificationRecord] {
        self.classifications.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}
