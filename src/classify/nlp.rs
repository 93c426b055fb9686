//! NLP tier: keyword priority, then NER over the raw name.

use std::sync::Arc;

use tracing::warn;

use crate::classify::ner::{NerBackend, NerLabel};
use crate::classify::{keyword_step, TypeContext, TypeStrategy, TypeVerdict};
use crate::entity::{EntityType, TypeSource};
use crate::taxonomy::Taxonomy;

/// Confidence for a type taken from NER spans.
pub const NER_CONFIDENCE: f32 = 0.75;

/// Type classification through a [`NerBackend`].
pub struct NlpTier {
    backend: Arc<dyn NerBackend>,
    taxonomy: Arc<Taxonomy>,
}

impl NlpTier {
    /// Creates the tier.
    #[must_use]
    pub fn new(backend: Arc<dyn NerBackend>, taxonomy: Arc<Taxonomy>) -> Self {
        Self { backend, taxonomy }
    }
}

impl TypeStrategy for NlpTier {
    fn source(&self) -> TypeSource {
        TypeSource::Nlp
    }

    fn classify(&self, name: &str, context: &TypeContext) -> Option<TypeVerdict> {
        if !self.backend.is_available() {
            return None;
        }
        if let Some(verdict) = keyword_step(&self.taxonomy, name, context) {
            return Some(verdict);
        }

        let spans = match self.backend.tag(name) {
            Ok(spans) => spans,
            Err(e) => {
                warn!(backend = self.backend.backend_id(), error = %e, "NER failed, falling back");
                return None;
            }
        };

        // Comma-separated personal names are often split into an ORG and a
        // PERSON span; PERSON wins whenever it is present.
        let has = |label| spans.iter().any(|s| s.label == label);
        let entity_type = if has(NerLabel::Person) {
            EntityType::Person
        } else if has(NerLabel::Organization) {
            EntityType::Organization
        } else if has(NerLabel::Location) {
            EntityType::Location
        } else {
            return None;
        };
        Some(TypeVerdict::new(entity_type, NER_CONFIDENCE))
    }
}
