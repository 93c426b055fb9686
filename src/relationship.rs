//! Relationship classification.
//!
//! Labels come from two independent evidence sources: keyword matching over
//! biography text, and co-occurrence with document types. Each source emits
//! its own records; [`crate::evidence::EvidenceAggregator`] merges them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId};
use crate::taxonomy::{LabelRule, Taxonomy};

pub use crate::taxonomy::RelationshipLabel;

/// Target width of an evidence snippet, in characters.
pub const SNIPPET_WINDOW: usize = 200;

/// Confidence of the synthetic `peripheral` label.
pub const PERIPHERAL_CONFIDENCE: f32 = 0.1;

/// Ceiling for document-context scores.
pub const DOCUMENT_SCORE_CAP: f32 = 0.8;

/// Bonus when more than one distinct document type supports a label.
pub const DOCUMENT_DIVERSITY_BOOST: f32 = 0.1;

/// Where a classification's evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// Keyword hits in biography text
    Biography,
    /// Appearance in documents of a supporting type
    DocumentContext,
    /// Combined from more than one source
    Merged,
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Biography => write!(f, "biography"),
            Self::DocumentContext => write!(f, "document_context"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// One relationship label assigned to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// Labelled entity
    pub entity_id: EntityId,
    /// Assigned label
    pub label: RelationshipLabel,
    /// In `[0, 1]`
    pub confidence: f32,
    /// Where the evidence came from
    pub evidence_source: EvidenceSource,
    /// Supporting text; snippets from merged sources are joined
    pub evidence_snippet: String,
}

impl ClassificationRecord {
    /// Creates a record, clamping the confidence into `[0, 1]`.
    #[must_use]
    pub fn new(
        entity_id: EntityId,
        label: RelationshipLabel,
        confidence: f32,
        evidence_source: EvidenceSource,
        evidence_snippet: impl Into<String>,
    ) -> Self {
        Self {
            entity_id,
            label,
            confidence: clamp_unit(confidence),
            evidence_source,
            evidence_snippet: evidence_snippet.into(),
        }
    }

    /// The default record for an entity with no other evidence.
    #[must_use]
    pub fn peripheral(entity_id: EntityId) -> Self {
        Self::new(
            entity_id,
            RelationshipLabel::Peripheral,
            PERIPHERAL_CONFIDENCE,
            EvidenceSource::DocumentContext,
            String::new(),
        )
    }

    /// Returns true for the synthetic fallback label.
    #[must_use]
    pub fn is_peripheral(&self) -> bool {
        self.label == RelationshipLabel::Peripheral
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Cuts a window of about [`SNIPPET_WINDOW`] characters centred on the byte
/// range `start..end` of `text`, marking truncated sides with `...`.
#[must_use]
pub fn snippet_around(text: &str, start: usize, end: usize) -> String {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let total = chars.len();
    if total <= SNIPPET_WINDOW {
        return text.trim().to_string();
    }

    let start_char = chars.partition_point(|(i, _)| *i < start);
    let end_char = chars.partition_point(|(i, _)| *i < end).max(start_char);
    let pad = SNIPPET_WINDOW.saturating_sub(end_char - start_char) / 2;

    let mut from = start_char.saturating_sub(pad);
    let mut to = (end_char + pad).min(total);
    // Give the slack from a clipped side to the other side.
    let width = to - from;
    if width < SNIPPET_WINDOW {
        if from == 0 {
            to = SNIPPET_WINDOW.min(total);
        } else if to == total {
            from = total.saturating_sub(SNIPPET_WINDOW);
        }
    }

    let byte_from = chars[from].0;
    let byte_to = chars.get(to).map_or(text.len(), |(i, _)| *i);
    let body = text[byte_from..byte_to].trim();

    let mut out = String::with_capacity(body.len() + 6);
    if from > 0 {
        out.push_str("...");
    }
    out.push_str(body);
    if to < total {
        out.push_str("...");
    }
    out
}

/// Assigns relationship labels from biography text and document context.
#[derive(Debug, Clone)]
pub struct RelationshipClassifier {
    taxonomy: Arc<Taxonomy>,
}

impl RelationshipClassifier {
    /// Creates a classifier over a taxonomy.
    #[must_use]
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self { taxonomy }
    }

    /// The taxonomy in use.
    #[must_use]
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Labels an entity.
    ///
    /// Returns the raw per-source records, so one label may appear once per
    /// source. When neither source produces a label the result is a single
    /// `peripheral` record; it is never empty.
    #[must_use]
    pub fn classify_relationships(
        &self,
        entity: &Entity,
        biography: Option<&str>,
        document_types: Option<&[String]>,
    ) -> Vec<ClassificationRecord> {
        let mut records = Vec::new();

        if let Some(bio) = biography.filter(|b| !b.trim().is_empty()) {
            records.extend(self.from_biography(entity, bio));
        }
        if let Some(types) = document_types.filter(|t| !t.is_empty()) {
            records.extend(self.from_documents(entity, types));
        }

        if records.is_empty() {
            records.push(ClassificationRecord::peripheral(entity.entity_id));
        }
        records
    }

    /// Biography evidence.
    ///
    /// `score = primary_hits / primary_total + 0.5 * context_hits / context_total`,
    /// clamped to `[0, 1]`. A label needs at least one primary hit and a score
    /// at or above its threshold, and any exclusion keyword rejects it.
    #[must_use]
    pub fn from_biography(&self, entity: &Entity, biography: &str) -> Vec<ClassificationRecord> {
        self.taxonomy
            .labels
            .iter()
            .filter(|rule| rule.applies_to(entity.entity_type))
            .filter_map(|rule| {
                let score = biography_score(rule, biography)?;
                let (start, end) = rule.primary_keywords.first_match(biography)?;
                Some(ClassificationRecord::new(
                    entity.entity_id,
                    rule.label,
                    score,
                    EvidenceSource::Biography,
                    snippet_around(biography, start, end),
                ))
            })
            .collect()
    }

    /// Document-context evidence.
    ///
    /// For every label supported by at least one of the entity's document
    /// types: `score = min(supporting_docs / total_docs, 0.8)`, plus `0.1`
    /// when more than one distinct document type supports it, capped at
    /// `0.8`.
    #[must_use]
    pub fn from_documents(
        &self,
        entity: &Entity,
        document_types: &[String],
    ) -> Vec<ClassificationRecord> {
        let total = document_types.len();
        if total == 0 {
            return Vec::new();
        }

        let mut support: BTreeMap<RelationshipLabel, (usize, BTreeSet<String>)> = BTreeMap::new();
        for doc_type in document_types {
            let key = doc_type.trim().to_ascii_lowercase();
            for label in self.taxonomy.labels_for_document(&key) {
                let entry = support.entry(*label).or_default();
                entry.0 += 1;
                entry.1.insert(key.clone());
            }
        }

        support
            .into_iter()
            .filter(|(label, _)| {
                self.taxonomy
                    .rule(*label)
                    .map_or(true, |rule| rule.applies_to(entity.entity_type))
            })
            .map(|(label, (count, kinds))| {
                #[allow(clippy::cast_precision_loss)]
                let ratio = count as f32 / total as f32;
                let mut score = ratio.min(DOCUMENT_SCORE_CAP);
                if kinds.len() > 1 {
                    score += DOCUMENT_DIVERSITY_BOOST;
                }
                let score = score.min(DOCUMENT_SCORE_CAP);
                let kinds: Vec<&str> = kinds.iter().map(String::as_str).collect();
                ClassificationRecord::new(
                    entity.entity_id,
                    label,
                    score,
                    EvidenceSource::DocumentContext,
                    format!("appears in {count} of {total} documents ({})", kinds.join(", ")),
                )
            })
            .collect()
    }
}

fn biography_score(rule: &LabelRule, biography: &str) -> Option<f32> {
    if rule.exclusion_keywords.is_match(biography) {
        return None;
    }
    let primary_total = rule.primary_keywords.len();
    let primary_hits = rule.primary_keywords.matched(biography).len();
    if primary_total == 0 || primary_hits == 0 {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let mut score = primary_hits as f32 / primary_total as f32;
    let context_total = rule.context_keywords.len();
    if context_total > 0 {
        #[allow(clippy::cast_precision_loss)]
        let context_hits = rule.context_keywords.matched(biography).len() as f32;
        #[allow(clippy::cast_precision_loss)]
        let context_total = context_total as f32;
        score += 0.5 * context_hits / context_total;
    }

    let score = clamp_unit(score);
    (score >= rule.min_confidence).then_some(score)
}
