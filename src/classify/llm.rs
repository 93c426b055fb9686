//! LLM tier: asks a language model for a one-word type.
//!
//! Every failure of the model call (timeout, auth, rate limit, network,
//! unparseable answer) makes the tier decline so the chain falls through.
//! Calls from all workers share one [`RateLimiter`].

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::classify::{keyword_step, TypeContext, TypeStrategy, TypeVerdict};
use crate::entity::{EntityType, TypeSource};
use crate::error::ExternalError;
use crate::taxonomy::Taxonomy;

/// Confidence for a type answered by the model.
pub const LLM_CONFIDENCE: f32 = 0.85;

/// Longest biography excerpt sent with a prompt, in characters.
pub const PROMPT_BIOGRAPHY_CHARS: usize = 600;

/// Most mention snippets sent with a prompt.
pub const PROMPT_SNIPPETS: usize = 3;

/// A text-completion service.
pub trait LlmBackend: Send + Sync {
    /// Human-readable backend identifier.
    fn backend_id(&self) -> &str;

    /// Sends a prompt and returns the raw answer text.
    ///
    /// # Errors
    ///
    /// Returns an [`ExternalError`] describing the transport or service failure.
    fn complete(&self, prompt: &str) -> Result<String, ExternalError>;
}

/// Enforces a minimum interval between calls across threads.
///
/// Each caller reserves the next free slot under the lock and then sleeps
/// outside it, so waiting callers queue in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// The configured minimum interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Blocks until the caller may make a call. Returns the time waited.
    pub fn acquire(&self) -> Duration {
        if self.min_interval.is_zero() {
            return Duration::ZERO;
        }
        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.min_interval);
            slot
        };
        let wait = slot.saturating_duration_since(now);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        wait
    }
}

/// Builds the classification prompt.
#[must_use]
pub fn build_prompt(name: &str, context: &TypeContext) -> String {
    let mut prompt = String::from(
        "Classify the named entity below as exactly one of: person, organization, location.\n\
         Answer with that single word and nothing else.\n\n",
    );
    prompt.push_str("Name: ");
    prompt.push_str(name.trim());
    prompt.push('\n');

    if !context.source_tags.is_empty() {
        prompt.push_str("Tags: ");
        prompt.push_str(&context.source_tags.join(", "));
        prompt.push('\n');
    }
    if !context.document_types.is_empty() {
        let mut kinds: Vec<&str> = Vec::new();
        for kind in &context.document_types {
            if !kinds.contains(&kind.as_str()) {
                kinds.push(kind);
            }
        }
        prompt.push_str("Seen in: ");
        prompt.push_str(&kinds.join(", "));
        prompt.push('\n');
    }
    for snippet in context.snippets.iter().take(PROMPT_SNIPPETS) {
        prompt.push_str("Context: ");
        prompt.push_str(snippet.trim());
        prompt.push('\n');
    }
    if let Some(bio) = context.biography.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        let excerpt: String = bio.chars().take(PROMPT_BIOGRAPHY_CHARS).collect();
        prompt.push_str("Description: ");
        prompt.push_str(&excerpt);
        if excerpt.len() < bio.len() {
            prompt.push_str("...");
        }
        prompt.push('\n');
    }
    prompt
}

/// Parses a single-token type answer.
///
/// Surrounding whitespace, quotes and trailing punctuation are ignored;
/// anything longer than one word is rejected.
#[must_use]
pub fn parse_answer(answer: &str) -> Option<EntityType> {
    let mut words = answer.split_whitespace();
    let word = words.next()?;
    if words.next().is_some() {
        return None;
    }
    EntityType::from_token(word.trim_matches(|c: char| !c.is_alphanumeric()))
}

/// Type classification through an [`LlmBackend`].
pub struct LlmTier {
    backend: Arc<dyn LlmBackend>,
    limiter: Arc<RateLimiter>,
    taxonomy: Arc<Taxonomy>,
}

impl LlmTier {
    /// Creates the tier.
    #[must_use]
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        limiter: Arc<RateLimiter>,
        taxonomy: Arc<Taxonomy>,
    ) -> Self {
        Self {
            backend,
            limiter,
            taxonomy,
        }
    }
}

impl TypeStrategy for LlmTier {
    fn source(&self) -> TypeSource {
        TypeSource::Llm
    }

    fn classify(&self, name: &str, context: &TypeContext) -> Option<TypeVerdict> {
        // Keyword evidence outranks the model's answer, so a hit skips the call.
        if let Some(verdict) = keyword_step(&self.taxonomy, name, context) {
            return Some(verdict);
        }

        let waited = self.limiter.acquire();
        let prompt = build_prompt(name, context);

        let answer = match self.backend.complete(&prompt) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(
                    backend = self.backend.backend_id(),
                    name,
                    retryable = e.is_retryable(),
                    error = %e,
                    "LLM call failed, falling back"
                );
                return None;
            }
        };

        let Some(entity_type) = parse_answer(&answer) else {
            let answer = answer.trim();
            warn!(backend = self.backend.backend_id(), name, answer, "unparseable LLM answer");
            return None;
        };
        debug!(name, %entity_type, waited_ms = waited.as_millis(), "LLM answered");
        Some(TypeVerdict::new(entity_type, LLM_CONFIDENCE))
    }
}
