//! In-memory storage backend.
//!
//! Thread-safe implementations of the storage traits. The entity map is
//! guarded by one `RwLock` and every entity by its own `Mutex`: the map lock
//! is held only long enough to find or insert a slot, so mentions of
//! different names proceed in parallel while mentions of the same name are
//! serialized on that entity's mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use crate::entity::{Entity, EntityId};
use crate::relationship::ClassificationRecord;
use crate::storage::traits::{ClassificationStore, EntityStore, StorageError, Upsert};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

type Slot = Arc<Mutex<Entity>>;

/// Thread-safe in-memory entity store.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    slots: RwLock<HashMap<EntityId, Slot>>,
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: EntityId, context: &'static str) -> Result<Option<Slot>, StorageError> {
        let slots = self.slots.read().map_err(|_| lock_err(context))?;
        Ok(slots.get(&id).cloned())
    }
}

impl EntityStore for InMemoryEntityStore {
    fn upsert_mention(
        &self,
        normalized_name: &str,
        raw_name: &str,
        document_id: &str,
        document_type: &str,
        snippet: Option<&str>,
    ) -> Result<Upsert, StorageError> {
        let id = EntityId::from_normalized(normalized_name);

        let existing = match self.slot(id, "entity.upsert")? {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write().map_err(|_| lock_err("entity.upsert"))?;
                // Another writer may have created it between our read and write locks.
                if let Some(slot) = slots.get(&id).cloned() {
                    slot
                } else {
                    let mut entity = Entity::from_first_mention(
                        raw_name,
                        normalized_name,
                        document_id,
                        document_type,
                    );
                    if let Some(snippet) = snippet {
                        entity.record_snippet(snippet);
                    }
                    slots.insert(id, Arc::new(Mutex::new(entity.clone())));
                    return Ok(Upsert { entity, created: true });
                }
            }
        };

        let mut entity = existing.lock().map_err(|_| lock_err("entity.upsert"))?;
        entity.record_mention(raw_name, document_id, document_type);
        if let Some(snippet) = snippet {
            entity.record_snippet(snippet);
        }
        Ok(Upsert {
            entity: entity.clone(),
            created: false,
        })
    }

    fn get(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
        let Some(slot) = self.slot(id, "entity.get")? else {
            return Ok(None);
        };
        let entity = slot.lock().map_err(|_| lock_err("entity.get"))?;
        Ok(Some(entity.clone()))
    }

    fn update(&self, id: EntityId, apply: &mut dyn FnMut(&mut Entity)) -> Result<(), StorageError> {
        let slot = self
            .slot(id, "entity.update")?
            .ok_or(StorageError::EntityNotFound(id))?;
        let mut entity = slot.lock().map_err(|_| lock_err("entity.update"))?;
        apply(&mut entity);
        if entity.entity_id != id {
            return Err(StorageError::BackendError(format!(
                "update changed entity id: {id} -> {}",
                entity.entity_id
            )));
        }
        Ok(())
    }

    fn absorb(&self, entity: Entity) -> Result<(), StorageError> {
        let id = entity.entity_id;
        if id != EntityId::from_normalized(&entity.normalized_name) {
            return Err(StorageError::BackendError(format!(
                "entity {id} does not match its normalized name {:?}",
                entity.normalized_name
            )));
        }

        let existing = {
            let mut slots = self.slots.write().map_err(|_| lock_err("entity.absorb"))?;
            let existing = slots.get(&id).cloned();
            if existing.is_none() {
                slots.insert(id, Arc::new(Mutex::new(entity.clone())));
            }
            existing
        };

        if let Some(slot) = existing {
            let mut current = slot.lock().map_err(|_| lock_err("entity.absorb"))?;
            current.absorb(&entity);
        }
        Ok(())
    }

    fn ids(&self) -> Result<Vec<EntityId>, StorageError> {
        let slots = self.slots.read().map_err(|_| lock_err("entity.ids"))?;
        let mut ids: Vec<EntityId> = slots.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn len(&self) -> Result<usize, StorageError> {
        let slots = self.slots.read().map_err(|_| lock_err("entity.len"))?;
        Ok(slots.len())
    }

    fn snapshot(&self) -> Result<BTreeMap<EntityId, Entity>, StorageError> {
        let slots: Vec<(EntityId, Slot)> = {
            let slots = self.slots.read().map_err(|_| lock_err("entity.snapshot"))?;
            slots.iter().map(|(id, slot)| (*id, Arc::clone(slot))).collect()
        };

        let mut out = BTreeMap::new();
        for (id, slot) in slots {
            let entity = slot.lock().map_err(|_| lock_err("entity.snapshot"))?;
            out.insert(id, entity.clone());
        }
        Ok(out)
    }
}

/// Thread-safe in-memory classification store.
#[derive(Debug, Default)]
pub struct InMemoryClassificationStore {
    records: RwLock<HashMap<EntityId, Vec<ClassificationRecord>>>,
}

impl InMemoryClassificationStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClassificationStore for InMemoryClassificationStore {
    fn replace(&self, id: EntityId, records: Vec<ClassificationRecord>) -> Result<(), StorageError> {
        if let Some(bad) = records.iter().find(|r| r.entity_id != id) {
            return Err(StorageError::BackendError(format!(
                "record for {} filed under {id}",
                bad.entity_id
            )));
        }
        let mut map = self
            .records
            .write()
            .map_err(|_| lock_err("classification.replace"))?;
        map.insert(id, records);
        Ok(())
    }

    fn get(&self, id: EntityId) -> Result<Vec<ClassificationRecord>, StorageError> {
        let map = self
            .records
            .read()
            .map_err(|_| lock_err("classification.get"))?;
        Ok(map.get(&id).cloned().unwrap_or_default())
    }

    fn snapshot(&self) -> Result<BTreeMap<EntityId, Vec<ClassificationRecord>>, StorageError> {
        let map = self
            .records
            .read()
            .map_err(|_| lock_err("classification.snapshot"))?;
        Ok(map.iter().map(|(id, r)| (*id, r.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::relationship::{EvidenceSource, RelationshipLabel};

    #[test]
    fn first_mention_creates_then_mutates() {
        let store = InMemoryEntityStore::new();
        let first = store.upsert_mention("doug band", "Doug Band", "d1", "email", None).unwrap();
        assert!(first.created);
        assert_eq!(first.entity.mention_count, 1);

        let second = store
            .upsert_mention("doug band", "BAND, DOUG", "d2", "flight_log", Some("Band boarded at Teterboro"))
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.entity.context_snippets, vec!["Band boarded at Teterboro"]);
        assert_eq!(second.entity.mention_count, 2);
        assert_eq!(second.entity.entity_id, first.entity.entity_id);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn concurrent_same_name_mentions_are_counted_once_each() {
        let store = Arc::new(InMemoryEntityStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .upsert_mention("doug band", "Doug Band", &format!("d{t}-{i}"), "email", None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let id = EntityId::from_normalized("doug band");
        let entity = store.get(id).unwrap().unwrap();
        assert_eq!(entity.mention_count, 400);
        assert_eq!(entity.source_refs.len(), 400);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn update_missing_entity_errors() {
        let store = InMemoryEntityStore::new();
        let err = store
            .update(EntityId::from_normalized("nobody"), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, StorageError::EntityNotFound(_)));
    }

    #[test]
    fn absorb_merges_existing_and_inserts_new() {
        let store = InMemoryEntityStore::new();
        store.upsert_mention("doug band", "Doug Band", "d1", "email", None).unwrap();

        let mut restored = Entity::from_first_mention("Doug Band", "doug band", "d7", "court_record");
        restored.record_mention("D. Band", "d8", "court_record");
        store.absorb(restored).unwrap();
        store
            .absorb(Entity::from_first_mention("Clinton Foundation", "clinton foundation", "d3", "email"))
            .unwrap();

        let band = store.get(EntityId::from_normalized("doug band")).unwrap().unwrap();
        assert_eq!(band.mention_count, 3);
        assert!(band.aliases.contains("D. Band"));
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn absorb_rejects_mismatched_id() {
        let store = InMemoryEntityStore::new();
        let mut entity = Entity::from_first_mention("Doug Band", "doug band", "d1", "email");
        entity.normalized_name = "someone else".to_string();
        assert!(store.absorb(entity).is_err());
    }

    #[test]
    fn classification_replace_overwrites() {
        let store = InMemoryClassificationStore::new();
        let id = EntityId::from_normalized("doug band");
        let record = |label| ClassificationRecord {
            entity_id: id,
            label,
            confidence: 0.5,
            evidence_source: EvidenceSource::Biography,
            evidence_snippet: String::new(),
        };

        store.replace(id, vec![record(RelationshipLabel::Associate)]).unwrap();
        store.replace(id, vec![record(RelationshipLabel::Employee)]).unwrap();

        let records = store.get(id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, RelationshipLabel::Employee);
    }

    #[test]
    fn classification_replace_rejects_foreign_records() {
        let store = InMemoryClassificationStore::new();
        let id = EntityId::from_normalized("doug band");
        let other = ClassificationRecord {
            entity_id: EntityId::from_normalized("someone"),
            label: RelationshipLabel::Peripheral,
            confidence: 0.1,
            evidence_source: EvidenceSource::DocumentContext,
            evidence_snippet: String::new(),
        };
        assert!(store.replace(id, vec![other]).is_err());
    }
}
