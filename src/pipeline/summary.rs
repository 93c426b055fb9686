//! Batch outcome reporting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entity::TypeSource;
use crate::error::InputError;
use crate::mention::MentionId;
use crate::relationship::RelationshipLabel;

/// A mention the batch could not use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMention {
    /// Position in the input stream (0-based), or the input line for
    /// mentions that never parsed
    pub ordinal: u64,
    /// Id of the mention, when it parsed far enough to have one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention_id: Option<MentionId>,
    /// Name as given; empty for lines that never parsed
    pub raw_name: String,
    /// Why the mention was rejected
    pub reason: String,
}

impl SkippedMention {
    /// Describes an input line rejected before it became a mention.
    #[must_use]
    pub fn rejected(error: &InputError) -> Self {
        let ordinal = match error {
            InputError::UnparseableMention { line, .. } => {
                u64::try_from(*line).unwrap_or(u64::MAX)
            }
            _ => 0,
        };
        Self {
            ordinal,
            mention_id: None,
            raw_name: String::new(),
            reason: error.to_string(),
        }
    }
}

/// Counts and lists describing one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Mentions read from the input
    pub mentions_seen: u64,
    /// Mentions folded into an entity
    pub mentions_resolved: u64,
    /// Mentions skipped because a checkpoint already covered them
    pub mentions_already_processed: u64,
    /// Entities first seen in this batch
    pub entities_created: u64,
    /// Mentions rejected as malformed, in input order
    pub malformed: Vec<SkippedMention>,
    /// Entities typed and labelled in this batch
    pub entities_classified: u64,
    /// Entities left alone because they were already classified
    pub classification_skipped: u64,
    /// Classified entities per answering tier
    pub by_tier: BTreeMap<TypeSource, u64>,
    /// Entities carrying each label
    pub by_label: BTreeMap<RelationshipLabel, u64>,
    /// Entities typed by the no-evidence default
    pub low_signal: u64,
    /// Checkpoint files written during the run
    pub checkpoints_written: u64,
    /// True if a stop request cut the batch short
    pub stopped: bool,
}

impl BatchSummary {
    /// Records a malformed mention.
    pub fn record_malformed(&mut self, skipped: SkippedMention) {
        warn!(
            ordinal = skipped.ordinal,
            raw_name = %skipped.raw_name,
            reason = %skipped.reason,
            "mention skipped"
        );
        self.malformed.push(skipped);
    }

    /// Records one classified entity.
    pub fn record_classification(
        &mut self,
        source: TypeSource,
        low_signal: bool,
        labels: &[RelationshipLabel],
    ) {
        self.entities_classified += 1;
        *self.by_tier.entry(source).or_default() += 1;
        if low_signal {
            self.low_signal += 1;
        }
        for label in labels {
            *self.by_label.entry(*label).or_default() += 1;
        }
    }

    /// Emits the summary as one structured log event.
    pub fn log(&self) {
        info!(
            mentions_seen = self.mentions_seen,
            mentions_resolved = self.mentions_resolved,
            already_processed = self.mentions_already_processed,
            entities_created = self.entities_created,
            malformed = self.malformed.len(),
            entities_classified = self.entities_classified,
            classification_skipped = self.classification_skipped,
            by_tier = ?self.by_tier,
            low_signal = self.low_signal,
            checkpoints = self.checkpoints_written,
            stopped = self.stopped,
            "batch finished"
        );
    }
}
