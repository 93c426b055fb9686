//! Entity type classification.
//!
//! A [`TypeClassifier`] holds an ordered chain of [`TypeStrategy`] tiers and
//! returns the first tier's answer. The procedural tier always closes the
//! chain and never declines, so classification is total.
//!
//! Inside every tier the same precedence holds: organization keywords, then
//! location keywords, then the tier's own signal (model answer, NER spans or
//! personal-name format). Keyword evidence is never overridden by a
//! name-format guess.

mod llm;
#[cfg(feature = "http-llm")]
mod llm_http;
mod name_format;
mod ner;
mod nlp;
mod procedural;

use std::sync::Arc;

use tracing::debug;

use crate::entity::{Entity, EntityType, TypeSource};
use crate::taxonomy::Taxonomy;

pub use llm::{build_prompt, parse_answer, LlmBackend, LlmTier, RateLimiter};
#[cfg(feature = "http-llm")]
pub use llm_http::HttpLlmBackend;
pub use name_format::looks_like_personal_name;
pub use ner::{NerBackend, NerLabel, NerSpan, RegexNerBackend};
pub use nlp::NlpTier;
pub use procedural::ProceduralTier;

/// Confidence for a type decided by a keyword in the name itself.
pub const NAME_KEYWORD_CONFIDENCE: f32 = 0.9;

/// Confidence for a type decided by a keyword in a context tag.
pub const CONTEXT_KEYWORD_CONFIDENCE: f32 = 0.7;

/// Extra evidence a tier may consult besides the name.
///
/// Only `source_tags` are scanned for keywords. Document types and snippets
/// are descriptive and only reach the model prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeContext {
    /// Biography or description text
    pub biography: Option<String>,
    /// Caller-supplied labels describing the entity itself
    pub source_tags: Vec<String>,
    /// Kinds of documents the entity was seen in
    pub document_types: Vec<String>,
    /// Text surrounding the entity's mentions
    pub snippets: Vec<String>,
}

impl TypeContext {
    /// Context with source tags only.
    #[must_use]
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// The descriptive context an entity carries: document types and
    /// mention snippets, no keyword tags.
    #[must_use]
    pub fn for_entity(entity: &Entity) -> Self {
        Self {
            document_types: entity.document_type_list(),
            snippets: entity.context_snippets.clone(),
            ..Self::default()
        }
    }

    /// Adds biography text.
    #[must_use]
    pub fn biography(mut self, text: impl Into<String>) -> Self {
        self.biography = Some(text.into());
        self
    }
}

/// One tier's answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeVerdict {
    /// Proposed type
    pub entity_type: EntityType,
    /// Unclamped; the chain clamps it into `[0, 1]`
    pub confidence: f32,
    /// True when no evidence supported the answer
    pub low_signal: bool,
}

impl TypeVerdict {
    /// A verdict backed by evidence.
    #[must_use]
    pub fn new(entity_type: EntityType, confidence: f32) -> Self {
        Self {
            entity_type,
            confidence,
            low_signal: false,
        }
    }

    /// The evidence-free default.
    #[must_use]
    pub const fn low_signal(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            confidence: 0.0,
            low_signal: true,
        }
    }
}

/// The chain's final answer, with provenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeAssignment {
    /// Assigned type
    pub entity_type: EntityType,
    /// In `[0, 1]`
    pub confidence: f32,
    /// Tier that answered
    pub source: TypeSource,
    /// True when no evidence supported the answer
    pub low_signal: bool,
}

impl TypeAssignment {
    fn from_verdict(verdict: TypeVerdict, source: TypeSource) -> Self {
        let confidence = if verdict.low_signal || verdict.confidence.is_nan() {
            0.0
        } else {
            verdict.confidence.clamp(0.0, 1.0)
        };
        Self {
            entity_type: verdict.entity_type,
            confidence,
            source,
            low_signal: verdict.low_signal,
        }
    }
}

/// A single tier of the type classification chain.
pub trait TypeStrategy: Send + Sync {
    /// The provenance recorded when this tier answers.
    fn source(&self) -> TypeSource;

    /// Classifies a display name, or declines with `None`.
    ///
    /// Declining is how a tier reports that it is unavailable, failed, or
    /// had nothing to say; it is never an error for the caller.
    fn classify(&self, name: &str, context: &TypeContext) -> Option<TypeVerdict>;
}

/// The organization/location keyword step every tier runs first.
pub(crate) fn keyword_step(
    taxonomy: &Taxonomy,
    name: &str,
    context: &TypeContext,
) -> Option<TypeVerdict> {
    let hit = taxonomy.keyword_type(name, &context.source_tags)?;
    let confidence = if hit.from_context {
        CONTEXT_KEYWORD_CONFIDENCE
    } else {
        NAME_KEYWORD_CONFIDENCE
    };
    debug!(
        name,
        keyword = %hit.keyword,
        entity_type = %hit.entity_type,
        from_context = hit.from_context,
        "type decided by keyword"
    );
    Some(TypeVerdict::new(hit.entity_type, confidence))
}

/// Ordered tier chain for entity types.
pub struct TypeClassifier {
    tiers: Vec<Box<dyn TypeStrategy>>,
    procedural: ProceduralTier,
}

impl std::fmt::Debug for TypeClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tiers: Vec<TypeSource> = self.tiers.iter().map(|t| t.source()).collect();
        f.debug_struct("TypeClassifier")
            .field("tiers", &tiers)
            .field("procedural", &self.procedural)
            .finish()
    }
}

impl TypeClassifier {
    /// A chain with only the procedural tier.
    #[must_use]
    pub fn procedural_only(taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            tiers: Vec::new(),
            procedural: ProceduralTier::new(taxonomy),
        }
    }

    /// Appends a tier ahead of the procedural tier.
    ///
    /// Tiers are consulted in the order they were added.
    #[must_use]
    pub fn with_tier(mut self, tier: Box<dyn TypeStrategy>) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Provenance of each tier, in consultation order.
    #[must_use]
    pub fn tier_sources(&self) -> Vec<TypeSource> {
        let mut sources: Vec<TypeSource> = self.tiers.iter().map(|t| t.source()).collect();
        sources.push(TypeSource::Procedural);
        sources
    }

    /// Classifies a display name.
    #[must_use]
    pub fn classify_name(&self, name: &str, context: &TypeContext) -> TypeAssignment {
        for tier in &self.tiers {
            if let Some(verdict) = tier.classify(name, context) {
                return TypeAssignment::from_verdict(verdict, tier.source());
            }
            debug!(name, tier = %tier.source(), "tier declined");
        }
        TypeAssignment::from_verdict(self.procedural.decide(name, context), TypeSource::Procedural)
    }

    /// Classifies an entity by its canonical name.
    ///
    /// Without an explicit context, [`TypeContext::for_entity`] is used.
    #[must_use]
    pub fn classify_type(&self, entity: &Entity, context: Option<&TypeContext>) -> TypeAssignment {
        match context {
            Some(ctx) => self.classify_name(&entity.canonical_name, ctx),
            None => self.classify_name(&entity.canonical_name, &TypeContext::for_entity(entity)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<TypeVerdict>, TypeSource);

    impl TypeStrategy for Fixed {
        fn source(&self) -> TypeSource {
            self.1
        }

        fn classify(&self, _name: &str, _context: &TypeContext) -> Option<TypeVerdict> {
            self.0
        }
    }

    #[test]
    fn first_answering_tier_wins() {
        let classifier = TypeClassifier::procedural_only(Taxonomy::builtin())
            .with_tier(Box::new(Fixed(None, TypeSource::Llm)))
            .with_tier(Box::new(Fixed(
                Some(TypeVerdict::new(EntityType::Location, 0.6)),
                TypeSource::Nlp,
            )));

        let assignment = classifier.classify_name("Zorro", &TypeContext::default());
        assert_eq!(assignment.entity_type, EntityType::Location);
        assert_eq!(assignment.source, TypeSource::Nlp);
        assert_eq!(
            classifier.tier_sources(),
            vec![TypeSource::Llm, TypeSource::Nlp, TypeSource::Procedural]
        );
    }

    #[test]
    fn procedural_closes_the_chain() {
        let classifier = TypeClassifier::procedural_only(Taxonomy::builtin())
            .with_tier(Box::new(Fixed(None, TypeSource::Llm)));

        let assignment = classifier.classify_name("FBI", &TypeContext::default());
        assert_eq!(assignment.source, TypeSource::Procedural);
        assert_eq!(assignment.entity_type, EntityType::Person);
        assert!(assignment.low_signal);
        assert!(assignment.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let classifier = TypeClassifier::procedural_only(Taxonomy::builtin()).with_tier(Box::new(
            Fixed(Some(TypeVerdict::new(EntityType::Person, 1.7)), TypeSource::Llm),
        ));
        let assignment = classifier.classify_name("Doug Band", &TypeContext::default());
        assert!((assignment.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn only_explicit_tags_are_keyword_evidence() {
        let classifier = TypeClassifier::procedural_only(Taxonomy::builtin());
        let mut entity = Entity::from_first_mention("Zorro", "zorro", "d1", "Court Filing");
        entity.record_mention("Zorro", "d2", "police report");
        entity.record_snippet("the foundation's island estate");
        let assignment = classifier.classify_type(&entity, None);
        assert_eq!(assignment.entity_type, EntityType::Person);
        assert!(assignment.low_signal);

        let ctx = TypeContext::with_tags(["Island estate"]);
        let assignment = classifier.classify_type(&entity, Some(&ctx));
        assert_eq!(assignment.entity_type, EntityType::Location);
        assert!((assignment.confidence - CONTEXT_KEYWORD_CONFIDENCE).abs() < f32::EPSILON);
    }
}
