//! Batch pipeline.
//!
//! Two stages over an ordered mention stream:
//!
//! 1. **Resolution** folds every mention into the registry, in input order,
//!    on the calling thread. Malformed mentions are reported and skipped.
//! 2. **Classification** types and labels every entity on a bounded worker
//!    pool. Entities that already carry a classification are skipped unless
//!    reclassification is forced.
//!
//! Progress is checkpointed every `checkpoint_interval` units of work and at
//! each stage boundary. A resumed batch restores the checkpointed registry
//! and skips mentions it already consumed.
//!
//! A worker writes an entity's labels before marking it classified, and
//! checkpoints are taken while no worker is between those two writes. A
//! checkpoint therefore never holds a classified entity without labels.

mod classifiers;
mod registry;
mod runtime;
mod summary;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointState, CheckpointStore, Stage};
use crate::config::PipelineConfig;
use crate::entity::{Entity, EntityId, TypeSource};
use crate::error::{RegistryError, RegistryResult};
use crate::mention::{Mention, MentionContext, MentionId};
use crate::relationship::RelationshipLabel;
use crate::resolution::IdentityResolver;
use crate::storage::StorageError;

pub use classifiers::{BiographyIndex, BiographyProvider, Classifiers, NoBiographies};
pub use registry::{Registry, RegistrySnapshot};
pub use runtime::{run_pool, PoolConfig};
pub use summary::{BatchSummary, SkippedMention};

enum Outcome {
    Classified {
        source: TypeSource,
        low_signal: bool,
        labels: Vec<RelationshipLabel>,
    },
    AlreadyClassified,
    Stopped,
    Failed(RegistryError),
}

/// Runs batches of mentions through resolution and classification.
pub struct BatchPipeline {
    config: PipelineConfig,
    registry: Registry,
    resolver: IdentityResolver,
    classifiers: Arc<Classifiers>,
    biographies: Arc<dyn BiographyProvider>,
    checkpoint: Option<CheckpointStore>,
    stop: Arc<AtomicBool>,
    /// Workers hold it shared while committing one entity; checkpoints take it
    /// exclusively.
    commit: RwLock<()>,
}

impl std::fmt::Debug for BatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPipeline")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("checkpoint", &self.checkpoint)
            .finish_non_exhaustive()
    }
}

impl BatchPipeline {
    /// Creates a pipeline over a registry.
    #[must_use]
    pub fn new(config: PipelineConfig, registry: Registry, classifiers: Classifiers) -> Self {
        let resolver = IdentityResolver::new(Arc::clone(&registry.entities));
        Self {
            config,
            registry,
            resolver,
            classifiers: Arc::new(classifiers),
            biographies: Arc::new(NoBiographies),
            checkpoint: None,
            stop: Arc::new(AtomicBool::new(false)),
            commit: RwLock::new(()),
        }
    }

    /// Persists progress to a checkpoint file.
    #[must_use]
    pub fn with_checkpoint(mut self, store: CheckpointStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Supplies biography text for classification.
    #[must_use]
    pub fn with_biographies(mut self, biographies: Arc<dyn BiographyProvider>) -> Self {
        self.biographies = biographies;
        self
    }

    /// Flag that asks a running batch to checkpoint and return early.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The registry the pipeline writes to.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The output document for the current registry contents.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a snapshot cannot be taken.
    pub fn snapshot(&self) -> RegistryResult<RegistrySnapshot> {
        self.registry.snapshot(&self.classifiers.taxonomy().version)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Loads and restores the checkpoint, if one is configured and present.
    ///
    /// # Errors
    ///
    /// A corrupt checkpoint is returned as [`RegistryError::Checkpoint`]; the
    /// batch must not continue until the operator clears it.
    pub fn resume(&self) -> RegistryResult<CheckpointState> {
        let Some(store) = &self.checkpoint else {
            return Ok(CheckpointState::default());
        };
        match store.load()? {
            Some(state) => {
                // Absorbing sums counters, so the snapshot is applied once.
                if self.registry.entities.is_empty()? {
                    self.registry.restore(&state)?;
                } else {
                    debug!("registry already populated, checkpoint entities not reapplied");
                }
                info!(
                    processed = state.processed_ids.len(),
                    entities = state.entities.len(),
                    "resumed from checkpoint"
                );
                Ok(state)
            }
            None => Ok(CheckpointState::default()),
        }
    }

    fn save_checkpoint(
        &self,
        processed: &BTreeSet<MentionId>,
        stage: Stage,
        summary: &mut BatchSummary,
    ) -> RegistryResult<()> {
        let Some(store) = &self.checkpoint else {
            return Ok(());
        };
        let state = {
            let _quiesced = self
                .commit
                .write()
                .map_err(|_| RegistryError::internal("commit lock poisoned"))?;
            self.registry.checkpoint_state(processed, stage)?
        };
        store.save(&state)?;
        summary.checkpoints_written += 1;
        Ok(())
    }

    /// Runs both stages over `mentions`.
    ///
    /// Per-mention problems never abort the batch; they are listed in the
    /// summary. Only storage, checkpoint and internal failures are errors.
    ///
    /// # Errors
    ///
    /// Returns fatal errors: an untrustworthy checkpoint, a failing store,
    /// or a checkpoint that cannot be written.
    pub fn run(&self, mentions: &[Mention]) -> RegistryResult<BatchSummary> {
        self.run_with_rejected(mentions, Vec::new())
    }

    /// Like [`Self::run`], listing input the caller already rejected (lines
    /// that never parsed) in the summary alongside malformed mentions.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    pub fn run_with_rejected(
        &self,
        mentions: &[Mention],
        rejected: Vec<SkippedMention>,
    ) -> RegistryResult<BatchSummary> {
        let mut summary = BatchSummary::default();
        for skipped in rejected {
            summary.record_malformed(skipped);
        }
        let mut processed = self.resume()?.processed_ids;

        self.resolve_stage(mentions, &mut processed, &mut summary)?;
        if summary.stopped {
            summary.log();
            return Ok(summary);
        }

        self.classify_stage(&processed, &mut summary)?;
        let final_stage = if summary.stopped {
            Stage::Classification
        } else {
            Stage::Complete
        };
        self.save_checkpoint(&processed, final_stage, &mut summary)?;

        summary.log();
        Ok(summary)
    }

    /// Stage 1: fold mentions into the registry.
    fn resolve_stage(
        &self,
        mentions: &[Mention],
        processed: &mut BTreeSet<MentionId>,
        summary: &mut BatchSummary,
    ) -> RegistryResult<()> {
        info!(mentions = mentions.len(), "resolution stage started");
        let interval = self.config.checkpoint_interval.max(1);
        let mut since_checkpoint = 0usize;

        for (ordinal, mention) in (0u64..).zip(mentions) {
            if self.stopped() {
                warn!(ordinal, "stop requested during resolution");
                summary.stopped = true;
                self.save_checkpoint(processed, Stage::Resolution, summary)?;
                return Ok(());
            }

            summary.mentions_seen += 1;
            let id = mention.id_at(ordinal);
            if processed.contains(&id) {
                summary.mentions_already_processed += 1;
                continue;
            }

            match self
                .resolver
                .resolve(&mention.raw_name, &mention.document_id, MentionContext::from(mention))
            {
                Ok(upsert) => {
                    summary.mentions_resolved += 1;
                    if upsert.created {
                        summary.entities_created += 1;
                    }
                }
                Err(RegistryError::Input(e)) => summary.record_malformed(SkippedMention {
                    ordinal,
                    mention_id: Some(id.clone()),
                    raw_name: mention.raw_name.clone(),
                    reason: e.to_string(),
                }),
                Err(e) => return Err(e),
            }

            // Malformed mentions count as processed so a resume does not
            // report them twice.
            processed.insert(id);
            since_checkpoint += 1;
            if since_checkpoint >= interval {
                self.save_checkpoint(processed, Stage::Resolution, summary)?;
                since_checkpoint = 0;
            }
        }

        self.save_checkpoint(processed, Stage::Classification, summary)?;
        info!(
            resolved = summary.mentions_resolved,
            created = summary.entities_created,
            malformed = summary.malformed.len(),
            "resolution stage finished"
        );
        Ok(())
    }

    /// Stage 2: classify entities on the worker pool.
    fn classify_stage(
        &self,
        processed: &BTreeSet<MentionId>,
        summary: &mut BatchSummary,
    ) -> RegistryResult<()> {
        let ids = self.registry.entities.ids()?;
        info!(entities = ids.len(), workers = self.config.workers, "classification stage started");

        let interval = self.config.checkpoint_interval.max(1);
        let mut since_checkpoint = 0usize;
        let mut first_error: Option<RegistryError> = None;
        let pool = PoolConfig {
            workers: self.config.workers,
            queue_capacity: self.config.queue_capacity,
        };

        run_pool(
            "classify",
            pool,
            ids,
            &self.stop,
            |id| self.classify_one(id),
            |outcome| match outcome {
                Outcome::Classified {
                    source,
                    low_signal,
                    labels,
                } => {
                    summary.record_classification(source, low_signal, &labels);
                    since_checkpoint += 1;
                    if since_checkpoint >= interval && first_error.is_none() {
                        since_checkpoint = 0;
                        if let Err(e) = self.save_checkpoint(processed, Stage::Classification, summary) {
                            first_error = Some(e);
                            self.stop.store(true, Ordering::Release);
                        }
                    }
                }
                Outcome::AlreadyClassified => summary.classification_skipped += 1,
                Outcome::Stopped => summary.stopped = true,
                Outcome::Failed(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        self.stop.store(true, Ordering::Release);
                    }
                }
            },
        )?;

        if let Some(e) = first_error {
            return Err(e);
        }
        if self.stopped() {
            summary.stopped = true;
        }
        info!(
            classified = summary.entities_classified,
            skipped = summary.classification_skipped,
            low_signal = summary.low_signal,
            "classification stage finished"
        );
        Ok(())
    }

    fn classify_one(&self, id: EntityId) -> Outcome {
        if self.stopped() {
            return Outcome::Stopped;
        }
        match self.try_classify_one(id) {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(e),
        }
    }

    fn try_classify_one(&self, id: EntityId) -> RegistryResult<Outcome> {
        let entity = self
            .registry
            .entities
            .get(id)?
            .ok_or(StorageError::EntityNotFound(id))?;
        if !self.config.force_reclassify && entity.is_classified() {
            if !self.registry.classifications.get(id)?.is_empty() {
                debug!(entity_id = %id, "already classified, skipping");
                return Ok(Outcome::AlreadyClassified);
            }
            warn!(entity_id = %id, "classified entity has no labels, reclassifying");
        }

        let biography = self.biographies.biography(&entity);
        let (assignment, records) = self.classifiers.classify_entity(&entity, biography.as_deref());
        let labels = records.iter().map(|r| r.label).collect();

        {
            let _committing = self
                .commit
                .read()
                .map_err(|_| RegistryError::internal("commit lock poisoned"))?;
            self.registry.classifications.replace(id, records)?;
            self.registry
                .entities
                .update(id, &mut |e: &mut Entity| e.apply_type(&assignment))?;
        }

        debug!(
            entity_id = %id,
            name = %entity.canonical_name,
            entity_type = %assignment.entity_type,
            source = %assignment.source,
            "entity classified"
        );
        Ok(Outcome::Classified {
            source: assignment.source,
            low_signal: assignment.low_signal,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::entity::EntityType;
    use crate::storage::{
        ClassificationStore, EntityStore, InMemoryClassificationStore, InMemoryEntityStore, Upsert,
    };
    use crate::taxonomy::Taxonomy;

    /// Entity store that, on every snapshot, records classified entities whose
    /// labels are missing from the classification store.
    struct ConsistencyCheck {
        inner: InMemoryEntityStore,
        labels: Arc<InMemoryClassificationStore>,
        unlabelled: Mutex<Vec<EntityId>>,
        snapshots: Mutex<usize>,
    }

    impl EntityStore for ConsistencyCheck {
        fn upsert_mention(
            &self,
            normalized_name: &str,
            raw_name: &str,
            document_id: &str,
            document_type: &str,
            snippet: Option<&str>,
        ) -> Result<Upsert, StorageError> {
            self.inner
                .upsert_mention(normalized_name, raw_name, document_id, document_type, snippet)
        }

        fn get(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
            self.inner.get(id)
        }

        fn update(&self, id: EntityId, apply: &mut dyn FnMut(&mut Entity)) -> Result<(), StorageError> {
            self.inner.update(id, apply)
        }

        fn absorb(&self, entity: Entity) -> Result<(), StorageError> {
            self.inner.absorb(entity)
        }

        fn ids(&self) -> Result<Vec<EntityId>, StorageError> {
            self.inner.ids()
        }

        fn len(&self) -> Result<usize, StorageError> {
            self.inner.len()
        }

        fn snapshot(&self) -> Result<BTreeMap<EntityId, Entity>, StorageError> {
            let entities = self.inner.snapshot()?;
            for (id, entity) in &entities {
                if entity.is_classified() && self.labels.get(*id)?.is_empty() {
                    self.unlabelled.lock().unwrap().push(*id);
                }
            }
            *self.snapshots.lock().unwrap() += 1;
            Ok(entities)
        }
    }

    fn pipeline(config: PipelineConfig) -> BatchPipeline {
        let classifiers = Classifiers::procedural(Taxonomy::builtin());
        BatchPipeline::new(config, Registry::in_memory(), classifiers)
    }

    #[test]
    fn resolves_and_classifies() {
        let pipeline = pipeline(PipelineConfig::default());
        let summary = pipeline
            .run(&[
                Mention::new("Doug Band", "d1", "email"),
                Mention::new("MR. DOUG BAND", "d2", "flight_log"),
                Mention::new("Clinton Foundation", "d1", "email"),
                Mention::new("  ", "d3", "email"),
            ])
            .unwrap();

        assert_eq!(summary.mentions_seen, 4);
        assert_eq!(summary.mentions_resolved, 3);
        assert_eq!(summary.entities_created, 2);
        assert_eq!(summary.malformed.len(), 1);
        assert_eq!(summary.entities_classified, 2);
        assert!(!summary.stopped);

        let snapshot = pipeline.snapshot().unwrap();
        let foundation = snapshot
            .entity(EntityId::from_normalized("clinton foundation"))
            .unwrap();
        assert_eq!(foundation.entity_type, EntityType::Organization);
        for id in snapshot.entities.keys() {
            assert!(!snapshot.labels(*id).is_empty());
        }
    }

    #[test]
    fn second_run_skips_classified_entities_unless_forced() {
        let pipeline = pipeline(PipelineConfig::default());
        let mentions = [Mention::new("Doug Band", "d1", "email")];
        pipeline.run(&mentions).unwrap();
        let again = pipeline.run(&[Mention::new("Doug Band", "d2", "email")]).unwrap();
        assert_eq!(again.entities_classified, 0);
        assert_eq!(again.classification_skipped, 1);

        let forced = BatchPipeline {
            config: PipelineConfig {
                force_reclassify: true,
                ..PipelineConfig::default()
            },
            ..pipeline
        };
        let summary = forced.run(&[]).unwrap();
        assert_eq!(summary.entities_classified, 1);
    }

    #[test]
    fn checkpoints_never_capture_unlabelled_classified_entities() {
        let labels = Arc::new(InMemoryClassificationStore::new());
        let entities = Arc::new(ConsistencyCheck {
            inner: InMemoryEntityStore::new(),
            labels: Arc::clone(&labels),
            unlabelled: Mutex::new(Vec::new()),
            snapshots: Mutex::new(0),
        });
        let registry = Registry {
            entities: Arc::clone(&entities) as Arc<dyn EntityStore>,
            classifications: labels as Arc<dyn ClassificationStore>,
        };
        let config = PipelineConfig {
            checkpoint_interval: 1,
            workers: 4,
            ..PipelineConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let pipeline = BatchPipeline::new(config, registry, Classifiers::procedural(Taxonomy::builtin()))
            .with_checkpoint(CheckpointStore::new(dir.path().join("registry.ckpt")));

        let mentions: Vec<Mention> = (0..64)
            .map(|i| Mention::new(format!("Person Number{i}"), format!("d{i}"), "email"))
            .collect();
        let summary = pipeline.run(&mentions).unwrap();

        assert_eq!(summary.entities_classified, 64);
        assert!(*entities.snapshots.lock().unwrap() > 64);
        assert!(entities.unlabelled.lock().unwrap().is_empty());
    }

    #[test]
    fn classified_entity_without_labels_is_reclassified() {
        let pipeline = pipeline(PipelineConfig::default());
        pipeline.run(&[Mention::new("Doug Band", "d1", "email")]).unwrap();
        let id = EntityId::from_normalized("doug band");
        pipeline.registry().classifications.replace(id, Vec::new()).unwrap();

        let summary = pipeline.run(&[]).unwrap();
        assert_eq!(summary.entities_classified, 1);
        assert_eq!(summary.classification_skipped, 0);
        assert!(!pipeline.registry().classifications.get(id).unwrap().is_empty());
    }

    #[test]
    fn rejected_input_is_in_the_summary() {
        let pipeline = pipeline(PipelineConfig::default());
        let rejected = vec![SkippedMention::rejected(&crate::error::InputError::UnparseableMention {
            line: 7,
            message: "expected value".to_string(),
        })];
        let summary = pipeline
            .run_with_rejected(&[Mention::new("!!!", "d1", "email")], rejected)
            .unwrap();

        assert_eq!(summary.malformed.len(), 2);
        assert_eq!(summary.malformed[0].ordinal, 7);
        assert!(summary.malformed[0].raw_name.is_empty());
        assert!(summary.malformed[0].reason.contains("expected value"));
        assert_eq!(summary.malformed[1].raw_name, "!!!");
    }

    #[test]
    fn preset_stop_flag_returns_partial_summary() {
        let pipeline = pipeline(PipelineConfig::default());
        pipeline.stop_flag().store(true, Ordering::SeqCst);
        let summary = pipeline.run(&[Mention::new("Doug Band", "d1", "email")]).unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.mentions_resolved, 0);
    }
}
