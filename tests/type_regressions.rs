//! Entity typing regressions across the tier chain.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use entity_registry::classify::{LlmBackend, LlmTier, NlpTier, RateLimiter, RegexNerBackend};
use entity_registry::{
    EntityType, ExternalError, Taxonomy, TypeClassifier, TypeContext, TypeSource,
};

struct Answering {
    answer: &'static str,
    calls: AtomicUsize,
}

impl Answering {
    fn new(answer: &'static str) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }
}

impl LlmBackend for Answering {
    fn backend_id(&self) -> &str {
        "answering"
    }

    fn complete(&self, _prompt: &str) -> Result<String, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.to_string())
    }
}

struct Failing;

impl LlmBackend for Failing {
    fn backend_id(&self) -> &str {
        "failing"
    }

    fn complete(&self, _prompt: &str) -> Result<String, ExternalError> {
        Err(ExternalError::Timeout {
            backend: "failing".to_string(),
            duration_ms: 30_000,
        })
    }
}

fn procedural() -> TypeClassifier {
    TypeClassifier::procedural_only(Taxonomy::builtin())
}

fn with_nlp() -> TypeClassifier {
    procedural().with_tier(Box::new(NlpTier::new(
        Arc::new(RegexNerBackend::new()),
        Taxonomy::builtin(),
    )))
}

fn with_llm(backend: Arc<dyn LlmBackend>) -> TypeClassifier {
    procedural().with_tier(Box::new(LlmTier::new(
        backend,
        Arc::new(RateLimiter::unlimited()),
        Taxonomy::builtin(),
    )))
}

#[test]
fn organization_keywords_beat_personal_name_shape() {
    let classifier = procedural();
    for name in ["Trump Organization", "Clinton Foundation", "Harvard University", "Acme Holdings LLC"] {
        let assignment = classifier.classify_name(name, &TypeContext::default());
        assert_eq!(assignment.entity_type, EntityType::Organization, "{name}");
        assert_eq!(assignment.source, TypeSource::Procedural);
        assert!(!assignment.low_signal);
    }
}

#[test]
fn location_keywords_beat_personal_name_shape() {
    let classifier = procedural();
    for name in ["Little St. James Island", "Zorro Ranch", "Teterboro Airport"] {
        let assignment = classifier.classify_name(name, &TypeContext::default());
        assert_eq!(assignment.entity_type, EntityType::Location, "{name}");
    }
}

#[test]
fn personal_names_are_people() {
    let classifier = procedural();
    for name in ["Epstein, Jeffrey", "Doug Band", "Ghislaine Maxwell"] {
        let assignment = classifier.classify_name(name, &TypeContext::default());
        assert_eq!(assignment.entity_type, EntityType::Person, "{name}");
        assert!(!assignment.low_signal, "{name}");
        assert!(assignment.confidence > 0.0);
    }
}

#[test]
fn context_tags_carry_keyword_evidence() {
    let classifier = procedural();
    let context = TypeContext::with_tags(["foundation donor list"]);
    let assignment = classifier.classify_name("Maxwell", &context);
    assert_eq!(assignment.entity_type, EntityType::Organization);
    assert!(assignment.confidence < 0.9);
}

#[test]
fn names_without_signal_are_flagged() {
    let assignment = procedural().classify_name("FBI", &TypeContext::default());
    assert_eq!(assignment.entity_type, EntityType::Person);
    assert!(assignment.low_signal);
    assert!(assignment.confidence.abs() < f32::EPSILON);
}

#[test]
fn nlp_tier_recognises_agencies_and_places() {
    let classifier = with_nlp();
    let fbi = classifier.classify_name("FBI", &TypeContext::default());
    assert_eq!(fbi.entity_type, EntityType::Organization);
    assert_eq!(fbi.source, TypeSource::Nlp);

    let paris = classifier.classify_name("Paris", &TypeContext::default());
    assert_eq!(paris.entity_type, EntityType::Location);
    assert_eq!(paris.source, TypeSource::Nlp);
}

#[test]
fn nlp_tier_keeps_keyword_priority() {
    let assignment = with_nlp().classify_name("Trump Organization", &TypeContext::default());
    assert_eq!(assignment.entity_type, EntityType::Organization);
    assert_eq!(assignment.source, TypeSource::Nlp);
}

#[test]
fn nlp_tier_declines_unknown_tokens() {
    let assignment = with_nlp().classify_name("zorro", &TypeContext::default());
    assert_eq!(assignment.source, TypeSource::Procedural);
    assert!(assignment.low_signal);
}

#[test]
fn llm_answer_is_used_when_keywords_are_silent() {
    let backend = Answering::new("location");
    let classifier = with_llm(backend.clone());
    let assignment = classifier.classify_name("Mar-a-Lago", &TypeContext::default());
    assert_eq!(assignment.entity_type, EntityType::Location);
    assert_eq!(assignment.source, TypeSource::Llm);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn keywords_override_llm_answer() {
    let backend = Answering::new("person");
    let classifier = with_llm(backend.clone());
    let assignment = classifier.classify_name("Clinton Foundation", &TypeContext::default());
    assert_eq!(assignment.entity_type, EntityType::Organization);
    assert_eq!(assignment.source, TypeSource::Llm);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn llm_failure_falls_through_to_next_tier() {
    let classifier = with_llm(Arc::new(Failing));
    let assignment = classifier.classify_name("Doug Band", &TypeContext::default());
    assert_eq!(assignment.entity_type, EntityType::Person);
    assert_eq!(assignment.source, TypeSource::Procedural);
}

#[test]
fn unparseable_llm_answer_falls_through() {
    let classifier = with_llm(Answering::new("I think this is probably a person"));
    let assignment = classifier.classify_name("Doug Band", &TypeContext::default());
    assert_eq!(assignment.source, TypeSource::Procedural);
}
