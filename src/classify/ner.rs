//! Named-entity recognition backends for the NLP tier.
//!
//! The tier talks to a [`NerBackend`]; the built-in [`RegexNerBackend`]
//! recognises well-known agency acronyms, a gazetteer of places that recur
//! in the corpus, and personal-name shapes. Statistical models can be
//! plugged in behind the same trait.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::name_format::looks_like_personal_name;
use crate::error::ExternalError;

/// Span label produced by a NER backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NerLabel {
    /// A person
    Person,
    /// Company or agency
    #[serde(rename = "ORG")]
    Organization,
    /// Place
    #[serde(rename = "LOC")]
    Location,
    /// Anything else
    Misc,
}

impl fmt::Display for NerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Person => write!(f, "PERSON"),
            Self::Organization => write!(f, "ORG"),
            Self::Location => write!(f, "LOC"),
            Self::Misc => write!(f, "MISC"),
        }
    }
}

/// A tagged span, with byte offsets into the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NerSpan {
    /// Span text
    pub text: String,
    /// Entity class
    pub label: NerLabel,
    /// Start byte offset
    pub start: usize,
    /// End byte offset, exclusive
    pub end: usize,
}

/// Trait for pluggable NER backends.
pub trait NerBackend: Send + Sync {
    /// Human-readable backend identifier (e.g. "regex", "bert").
    fn backend_id(&self) -> &str;

    /// Returns false when the backend cannot serve requests (model missing,
    /// service down). The NLP tier then declines without calling [`tag`].
    ///
    /// [`tag`]: NerBackend::tag
    fn is_available(&self) -> bool {
        true
    }

    /// Tags entities in `text`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExternalError`] if a remote or model-backed tagger fails.
    fn tag(&self, text: &str) -> Result<Vec<NerSpan>, ExternalError>;
}

static KNOWN_AGENCIES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "CIA", "FBI", "NSA", "DOJ", "DOS", "DEA", "ATF", "ICE", "CBP", "TSA", "FAA", "IRS",
        "SEC", "NYPD", "LAPD", "PBPD", "USVI", "NATO", "INTERPOL", "MIT", "NYU", "UN", "CNN",
        "BBC", "JPMORGAN", "HSBC", "UBS",
    ]
    .into_iter()
    .collect()
});

static ACRONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2,10}\b").expect("acronym pattern is valid"));

static PLACES: LazyLock<Regex> = LazyLock::new(|| {
    let places = [
        "New York", "Manhattan", "Palm Beach", "West Palm Beach", "New Mexico", "Santa Fe",
        "Stanley", "Virgin Islands", "St. Thomas", "Paris", "London", "Florida", "Teterboro",
        "Little St. James", "Great St. James", "Zorro Ranch", "Columbus", "Washington",
        "Los Angeles", "Miami", "Ohio", "Morocco", "Monaco",
    ];
    let mut alternation: Vec<String> = places
        .iter()
        .map(|p| p.split_whitespace().map(regex::escape).collect::<Vec<_>>().join(r"\s+"))
        .collect();
    alternation.sort_by(|a, b| b.len().cmp(&a.len()));
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation.join("|"))).expect("place pattern is valid")
});

static TITLED_PERSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:Mr|Mrs|Ms|Dr|Prof|Prince|Princess|Sir|Lady|Lord|Senator|Governor|President)\.?\s+\p{Lu}[\p{L}'\-]+(?:\s+\p{Lu}[\p{L}'\-]+)?",
    )
    .expect("titled person pattern is valid")
});

/// Pattern and gazetteer NER backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexNerBackend;

impl RegexNerBackend {
    /// Creates the backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl NerBackend for RegexNerBackend {
    fn backend_id(&self) -> &str {
        "regex"
    }

    fn tag(&self, text: &str) -> Result<Vec<NerSpan>, ExternalError> {
        let mut spans = Vec::new();

        for m in ACRONYM.find_iter(text) {
            if KNOWN_AGENCIES.contains(m.as_str()) {
                spans.push(span(m, NerLabel::Organization));
            }
        }
        for m in PLACES.find_iter(text) {
            spans.push(span(m, NerLabel::Location));
        }
        for m in TITLED_PERSON.find_iter(text) {
            spans.push(span(m, NerLabel::Person));
        }

        let trimmed = text.trim();
        let covered = spans
            .iter()
            .any(|s| s.label != NerLabel::Person && s.text.trim() == trimmed);
        let has_person = spans.iter().any(|s| s.label == NerLabel::Person);
        if !covered && !has_person && looks_like_personal_name(trimmed) {
            let start = text.len() - text.trim_start().len();
            spans.push(NerSpan {
                text: trimmed.to_string(),
                label: NerLabel::Person,
                start,
                end: start + trimmed.len(),
            });
        }

        spans.sort_by_key(|s| (s.start, s.end));
        Ok(spans)
    }
}

fn span(m: regex::Match<'_>, label: NerLabel) -> NerSpan {
    NerSpan {
        text: m.as_str().to_string(),
        label,
        start: m.start(),
        end: m.end(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(text: &str) -> Vec<NerLabel> {
        RegexNerBackend.tag(text).unwrap().into_iter().map(|s| s.label).collect()
    }

    #[test]
    fn tags_known_agencies() {
        assert_eq!(labels("FBI"), vec![NerLabel::Organization]);
        assert!(labels("XYZ").is_empty());
    }

    #[test]
    fn tags_gazetteer_places_without_person_shadow() {
        assert_eq!(labels("New York"), vec![NerLabel::Location]);
        assert_eq!(labels("palm beach"), vec![NerLabel::Location]);
    }

    #[test]
    fn tags_person_shapes() {
        assert_eq!(labels("Epstein, Jeffrey"), vec![NerLabel::Person]);
        assert_eq!(labels("Prince Andrew"), vec![NerLabel::Person]);
        let spans = RegexNerBackend.tag("  Doug Band ").unwrap();
        assert_eq!(spans[0].text, "Doug Band");
        assert_eq!((spans[0].start, spans[0].end), (2, 11));
    }

    #[test]
    fn label_wire_names() {
        assert_eq!(serde_json::to_string(&NerLabel::Organization).unwrap(), "\"ORG\"");
        assert_eq!(serde_json::to_string(&NerLabel::Person).unwrap(), "\"PERSON\"");
        assert_eq!(NerLabel::Location.to_string(), "LOC");
    }
}
