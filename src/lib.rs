//! # Entity Registry
//!
//! A canonical registry of the people, organizations and places named across
//! a document corpus. Raw mentions come in; deduplicated, typed and
//! relationship-labelled entities come out.
//!
//! ## Core Concepts
//!
//! - **Mention**: A raw name observed in one document
//! - **Entity**: The canonical record every spelling of a name resolves to
//! - **Type tiers**: LLM, then NLP/NER, then procedural rules; the first tier
//!   that answers wins, and the procedural tier always answers
//! - **Relationship labels**: Taxonomy-driven roles with confidence and
//!   evidence, merged per entity
//! - **Checkpoint**: Checksummed, atomically written progress so a long batch
//!   can resume where it stopped
//!
//! ## Usage
//!
//! ```rust
//! use entity_registry::{BatchPipeline, Classifiers, Mention, PipelineConfig, Registry, Taxonomy};
//!
//! let pipeline = BatchPipeline::new(
//!     PipelineConfig::default(),
//!     Registry::in_memory(),
//!     Classifiers::procedural(Taxonomy::builtin()),
//! );
//! let summary = pipeline.run(&[
//!     Mention::new("Mr. Doug Band", "doc-1", "email"),
//!     Mention::new("DOUG BAND", "doc-2", "flight_log"),
//! ])?;
//! assert_eq!(summary.entities_created, 1);
//! # Ok::<(), entity_registry::RegistryError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core records
pub mod entity;
pub mod error;
pub mod mention;
pub mod normalize;

// Resolution and storage
pub mod resolution;
pub mod storage;

// Classification
pub mod classify;
pub mod evidence;
pub mod relationship;
pub mod taxonomy;

// Batch processing
pub mod checkpoint;
pub mod config;
pub mod pipeline;

pub use checkpoint::{CheckpointState, CheckpointStore, Stage};
pub use classify::{TypeAssignment, TypeClassifier, TypeContext, TypeStrategy, TypeVerdict};
pub use config::{LlmConfig, PipelineConfig};
pub use entity::{Entity, EntityId, EntityType, TypeSource};
pub use error::{
    CheckpointError, ConfigError, ExternalError, InputError, RegistryError, RegistryResult,
};
pub use evidence::EvidenceAggregator;
pub use mention::{Mention, MentionContext, MentionId};
pub use pipeline::{
    BatchPipeline, BatchSummary, BiographyIndex, BiographyProvider, Classifiers, Registry,
    RegistrySnapshot, SkippedMention,
};
pub use relationship::{
    ClassificationRecord, EvidenceSource, RelationshipClassifier, RelationshipLabel,
};
pub use resolution::IdentityResolver;
pub use storage::{ClassificationStore, EntityStore, StorageError, Upsert};
pub use taxonomy::Taxonomy;
