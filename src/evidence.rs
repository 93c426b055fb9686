//! Merging relationship evidence from several sources.

use std::collections::HashMap;

use crate::entity::EntityId;
use crate::relationship::{ClassificationRecord, EvidenceSource, RelationshipLabel};

/// Separator between snippets from different sources.
pub const SNIPPET_SEPARATOR: &str = " | ";

/// Folds per-source classification records into one ranked set.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvidenceAggregator;

impl EvidenceAggregator {
    /// Creates an aggregator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Merges records.
    ///
    /// Records sharing `(entity_id, label)` collapse into one: the highest
    /// confidence wins, distinct snippets are joined in first-seen order, and
    /// the source becomes `merged` when records from more than one distinct
    /// evidence source contributed.
    /// A `peripheral` record is dropped for any entity that has a real label.
    /// The output is sorted by descending confidence, ties broken by label
    /// display priority.
    #[must_use]
    pub fn merge(&self, records: Vec<ClassificationRecord>) -> Vec<ClassificationRecord> {
        struct Acc {
            record: ClassificationRecord,
            snippets: Vec<String>,
            sources: Vec<EvidenceSource>,
        }

        let mut order: Vec<(EntityId, RelationshipLabel)> = Vec::new();
        let mut merged: HashMap<(EntityId, RelationshipLabel), Acc> = HashMap::new();

        for record in records {
            let key = (record.entity_id, record.label);
            match merged.get_mut(&key) {
                Some(acc) => {
                    if !acc.sources.contains(&record.evidence_source) {
                        acc.sources.push(record.evidence_source);
                    }
                    if record.confidence > acc.record.confidence {
                        acc.record.confidence = record.confidence;
                    }
                    if !record.evidence_snippet.is_empty()
                        && !acc.snippets.contains(&record.evidence_snippet)
                    {
                        acc.snippets.push(record.evidence_snippet);
                    }
                }
                None => {
                    order.push(key);
                    let snippets = if record.evidence_snippet.is_empty() {
                        Vec::new()
                    } else {
                        vec![record.evidence_snippet.clone()]
                    };
                    let sources = vec![record.evidence_source];
                    merged.insert(
                        key,
                        Acc {
                            record,
                            snippets,
                            sources,
                        },
                    );
                }
            }
        }

        let mut out: Vec<ClassificationRecord> = order
            .into_iter()
            .filter_map(|key| merged.remove(&key))
            .map(|acc| {
                let mut record = acc.record;
                if acc.sources.len() > 1 {
                    record.evidence_source = EvidenceSource::Merged;
                }
                record.evidence_snippet = acc.snippets.join(SNIPPET_SEPARATOR);
                record
            })
            .collect();

        let labelled: Vec<EntityId> = out
            .iter()
            .filter(|r| !r.is_peripheral())
            .map(|r| r.entity_id)
            .collect();
        out.retain(|r| !r.is_peripheral() || !labelled.contains(&r.entity_id));

        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.label.cmp(&b.label))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        id: EntityId,
        label: RelationshipLabel,
        confidence: f32,
        source: EvidenceSource,
        snippet: &str,
    ) -> ClassificationRecord {
        ClassificationRecord::new(id, label, confidence, source, snippet)
    }

    #[test]
    fn same_label_from_two_sources_merges() {
        let id = EntityId::from_normalized("jane roe");
        let merged = EvidenceAggregator::new().merge(vec![
            record(id, RelationshipLabel::Witness, 0.4, EvidenceSource::Biography, "testified"),
            record(id, RelationshipLabel::Witness, 0.6, EvidenceSource::DocumentContext, "2 of 4"),
            record(id, RelationshipLabel::Witness, 0.1, EvidenceSource::Biography, "testified"),
        ]);

        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.6).abs() < f32::EPSILON);
        assert_eq!(merged[0].evidence_source, EvidenceSource::Merged);
        assert_eq!(merged[0].evidence_snippet, "testified | 2 of 4");
    }

    #[test]
    fn single_source_keeps_its_provenance() {
        let id = EntityId::from_normalized("jane roe");
        let merged = EvidenceAggregator::new().merge(vec![record(
            id,
            RelationshipLabel::Employee,
            0.3,
            EvidenceSource::Biography,
            "assistant",
        )]);
        assert_eq!(merged[0].evidence_source, EvidenceSource::Biography);
    }

    #[test]
    fn repeated_source_is_not_merged() {
        let id = EntityId::from_normalized("jane roe");
        let merged = EvidenceAggregator::new().merge(vec![
            record(id, RelationshipLabel::Victim, 0.5, EvidenceSource::Biography, "trafficked"),
            record(id, RelationshipLabel::Victim, 0.7, EvidenceSource::Biography, "victim"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].evidence_source, EvidenceSource::Biography);
        assert!((merged[0].confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(merged[0].evidence_snippet, "trafficked | victim");
    }

    #[test]
    fn sorted_by_confidence_then_priority() {
        let id = EntityId::from_normalized("jane roe");
        let merged = EvidenceAggregator::new().merge(vec![
            record(id, RelationshipLabel::Associate, 0.5, EvidenceSource::Biography, ""),
            record(id, RelationshipLabel::Witness, 0.5, EvidenceSource::Biography, ""),
            record(id, RelationshipLabel::Employee, 0.7, EvidenceSource::Biography, ""),
        ]);
        let labels: Vec<_> = merged.iter().map(|r| r.label).collect();
        assert_eq!(
            labels,
            vec![
                RelationshipLabel::Employee,
                RelationshipLabel::Witness,
                RelationshipLabel::Associate
            ]
        );
    }

    #[test]
    fn peripheral_dropped_only_when_real_labels_exist() {
        let a = EntityId::from_normalized("a");
        let b = EntityId::from_normalized("b");
        let merged = EvidenceAggregator::new().merge(vec![
            ClassificationRecord::peripheral(a),
            record(a, RelationshipLabel::Associate, 0.2, EvidenceSource::Biography, ""),
            ClassificationRecord::peripheral(b),
        ]);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|r| r.entity_id == b && r.is_peripheral()));
        assert!(!merged.iter().any(|r| r.entity_id == a && r.is_peripheral()));
    }
}
