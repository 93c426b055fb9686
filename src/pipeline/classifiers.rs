//! The per-entity classification step and its inputs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::classify::{
    LlmBackend, LlmTier, NerBackend, NlpTier, RateLimiter, RegexNerBackend, TypeAssignment,
    TypeClassifier, TypeContext,
};
use crate::config::PipelineConfig;
use crate::entity::Entity;
use crate::error::ConfigError;
use crate::evidence::EvidenceAggregator;
use crate::normalize::normalize;
use crate::relationship::{ClassificationRecord, RelationshipClassifier};
use crate::taxonomy::Taxonomy;

/// Supplies biography text for entities.
pub trait BiographyProvider: Send + Sync {
    /// Biography for an entity, if one exists.
    fn biography(&self, entity: &Entity) -> Option<String>;
}

/// No biographies at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBiographies;

impl BiographyProvider for NoBiographies {
    fn biography(&self, _entity: &Entity) -> Option<String> {
        None
    }
}

/// Biographies keyed by name, matched through normalization.
#[derive(Debug, Clone, Default)]
pub struct BiographyIndex {
    by_key: HashMap<String, String>,
}

impl BiographyIndex {
    /// Builds an index; names are normalized, so `"Mr. Doug Band"` and
    /// `"doug band"` share an entry (the later one wins).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let by_key = pairs
            .into_iter()
            .map(|(k, v)| (normalize(k.as_ref()), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { by_key }
    }

    /// Loads a JSON object of `name -> biography`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the file cannot be read or is
    /// not a string map.
    pub fn from_json_path(path: &Path) -> Result<Self, ConfigError> {
        let fail = |reason: String| ConfigError::InvalidValue {
            key: "biographies".to_string(),
            value: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let map: HashMap<String, String> =
            serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;
        Ok(Self::from_pairs(map))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns true if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl BiographyProvider for BiographyIndex {
    fn biography(&self, entity: &Entity) -> Option<String> {
        self.by_key.get(&entity.normalized_name).cloned()
    }
}

/// Type and relationship classification for one entity.
#[derive(Debug)]
pub struct Classifiers {
    /// Entity type tier chain
    pub types: TypeClassifier,
    /// Relationship labelling
    pub relationships: RelationshipClassifier,
    /// Per-entity evidence merge
    pub aggregator: EvidenceAggregator,
    taxonomy: Arc<Taxonomy>,
}

impl Classifiers {
    /// Procedural typing only, with the given taxonomy.
    #[must_use]
    pub fn procedural(taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            types: TypeClassifier::procedural_only(Arc::clone(&taxonomy)),
            relationships: RelationshipClassifier::new(Arc::clone(&taxonomy)),
            aggregator: EvidenceAggregator::new(),
            taxonomy,
        }
    }

    /// Assembles the tier chain from configuration.
    ///
    /// `llm` and `ner` override the default backends; pass `None` to use the
    /// HTTP client (requires the `http-llm` feature) and the regex tagger.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the LLM tier is enabled but no backend
    /// can be built.
    pub fn from_config(
        config: &PipelineConfig,
        taxonomy: Arc<Taxonomy>,
        llm: Option<Arc<dyn LlmBackend>>,
        ner: Option<Arc<dyn NerBackend>>,
    ) -> Result<Self, ConfigError> {
        let mut types = TypeClassifier::procedural_only(Arc::clone(&taxonomy));

        if config.llm.enabled {
            let backend = match llm {
                Some(backend) => backend,
                None => default_llm_backend(config)?,
            };
            let limiter = Arc::new(RateLimiter::new(config.llm.min_interval));
            types = types.with_tier(Box::new(LlmTier::new(backend, limiter, Arc::clone(&taxonomy))));
        }
        if config.nlp_enabled {
            let ner = ner.unwrap_or_else(|| Arc::new(RegexNerBackend::new()) as Arc<dyn NerBackend>);
            types = types.with_tier(Box::new(NlpTier::new(ner, Arc::clone(&taxonomy))));
        }

        Ok(Self {
            types,
            relationships: RelationshipClassifier::new(Arc::clone(&taxonomy)),
            aggregator: EvidenceAggregator::new(),
            taxonomy,
        })
    }

    /// The taxonomy shared by every classifier.
    #[must_use]
    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    /// Types and labels an entity. Pure: the caller persists the result.
    ///
    /// Document types are relationship evidence. For typing they and the
    /// mention snippets only describe the entity to the model; they are
    /// never scanned for type keywords.
    #[must_use]
    pub fn classify_entity(
        &self,
        entity: &Entity,
        biography: Option<&str>,
    ) -> (TypeAssignment, Vec<ClassificationRecord>) {
        let mut context = TypeContext::for_entity(entity);
        context.biography = biography.map(str::to_string);

        let assignment = self.types.classify_type(entity, Some(&context));
        let mut typed = entity.clone();
        typed.apply_type(&assignment);

        let records = self.relationships.classify_relationships(
            &typed,
            biography,
            Some(context.document_types.as_slice()),
        );
        (assignment, self.aggregator.merge(records))
    }
}

#[cfg(feature = "http-llm")]
fn default_llm_backend(config: &PipelineConfig) -> Result<Arc<dyn LlmBackend>, ConfigError> {
    let key = config.llm_api_key(&|k: &str| std::env::var(k).ok())?;
    let backend = crate::classify::HttpLlmBackend::new(
        config.llm.endpoint.clone(),
        config.llm.model.clone(),
        key,
        config.llm.timeout,
    )?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "http-llm"))]
fn default_llm_backend(_config: &PipelineConfig) -> Result<Arc<dyn LlmBackend>, ConfigError> {
    Err(ConfigError::Unsupported {
        reason: "the LLM tier is enabled but this build has no HTTP backend (enable the \
                 `http-llm` feature)"
            .to_string(),
    })
}
