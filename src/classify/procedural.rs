//! Procedural tier: keyword lexicons and name-format rules. Never declines.

use std::sync::Arc;

use crate::classify::name_format::looks_like_personal_name;
use crate::classify::{keyword_step, TypeContext, TypeStrategy, TypeVerdict};
use crate::entity::{EntityType, TypeSource};
use crate::taxonomy::Taxonomy;

/// Confidence for a type taken from personal-name format.
pub const NAME_FORMAT_CONFIDENCE: f32 = 0.6;

/// Deterministic rule-based classification.
#[derive(Debug, Clone)]
pub struct ProceduralTier {
    taxonomy: Arc<Taxonomy>,
}

impl ProceduralTier {
    /// Creates the tier.
    #[must_use]
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self { taxonomy }
    }

    /// Always returns a verdict.
    ///
    /// Names with no keyword and no personal-name shape (bare acronyms, lone
    /// city names, single tokens) become `person` with zero confidence and
    /// the low-signal flag.
    #[must_use]
    pub fn decide(&self, name: &str, context: &TypeContext) -> TypeVerdict {
        if let Some(verdict) = keyword_step(&self.taxonomy, name, context) {
            return verdict;
        }
        if looks_like_personal_name(name) {
            return TypeVerdict::new(EntityType::Person, NAME_FORMAT_CONFIDENCE);
        }
        TypeVerdict::low_signal(EntityType::Person)
    }
}

impl TypeStrategy for ProceduralTier {
    fn source(&self) -> TypeSource {
        TypeSource::Procedural
    }

    fn classify(&self, name: &str, context: &TypeContext) -> Option<TypeVerdict> {
        Some(self.decide(name, context))
    }
}
