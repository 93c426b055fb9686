//! Entity types and identity management.
//!
//! An entity is the canonical record for every mention of the same
//! real-world person, organization or location. Its identifier is derived
//! from the normalized name alone, so two runs over the same corpus always
//! agree on ids and downstream consumers can join on them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::TypeAssignment;

/// Namespace for name-derived entity ids, version 1.
///
/// Changing the namespace re-keys every entity; bump the version suffix in
/// the constant name when doing so.
pub const ENTITY_ID_NAMESPACE_V1: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b7_5d80_a1e2_7c4b_90d3_1f65);

/// Context snippets kept per entity.
pub const MAX_CONTEXT_SNIPPETS: usize = 5;

/// Characters kept from each context snippet.
pub const MAX_SNIPPET_CHARS: usize = 200;

/// Stable entity identifier.
///
/// A UUID v5 over the normalized name in [`ENTITY_ID_NAMESPACE_V1`]. There
/// is no random component.
///
/// # Examples
///
/// ```
/// use entity_registry::EntityId;
///
/// let a = EntityId::from_normalized("jeffrey epstein");
/// let b = EntityId::from_normalized("jeffrey epstein");
/// assert_eq!(a, b);
/// assert!(!a.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Derives the id for a normalized name.
    #[must_use]
    pub fn from_normalized(normalized_name: &str) -> Self {
        Self(Uuid::new_v5(&ENTITY_ID_NAMESPACE_V1, normalized_name.as_bytes()))
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EntityId> for Uuid {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Classification of entity types.
///
/// Exactly one type per entity. `Unknown` is only held by entities that
/// have not been classified yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A human person
    Person,
    /// A company, institution, or group
    Organization,
    /// A geographic location or property
    Location,
    /// Not yet classified
    #[default]
    Unknown,
}

impl EntityType {
    /// Parses a single-token type answer (`"person"`, `"org"`, ...).
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "person" | "people" | "per" | "individual" => Some(Self::Person),
            "organization" | "organisation" | "org" | "company" => Some(Self::Organization),
            "location" | "loc" | "place" | "gpe" => Some(Self::Location),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Person => write!(f, "person"),
            Self::Organization => write!(f, "organization"),
            Self::Location => write!(f, "location"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which classification tier produced an entity's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSource {
    /// External language model
    Llm,
    /// Named-entity recognition
    Nlp,
    /// Keyword and name-format rules
    Procedural,
}

impl fmt::Display for TypeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm => write!(f, "llm"),
            Self::Nlp => write!(f, "nlp"),
            Self::Procedural => write!(f, "procedural"),
        }
    }
}

/// The canonical record for one real-world entity.
///
/// Created on the first sighting of a normalized name and mutated by every
/// later sighting. Entities are never deleted, only reclassified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Name-derived identifier
    pub entity_id: EntityId,

    /// Display form (first observed raw name, trimmed)
    pub canonical_name: String,

    /// Comparison key
    pub normalized_name: String,

    /// Every raw form observed; always contains `normalized_name`
    pub aliases: BTreeSet<String>,

    /// Assigned type; `Unknown` until classified
    pub entity_type: EntityType,

    /// In `[0, 1]`; zero while `Unknown` or when `low_signal`
    pub type_confidence: f32,

    /// Tier that assigned the type; absent until classified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_source: Option<TypeSource>,

    /// Set when the type is the procedural default with no evidence behind it
    #[serde(default)]
    pub low_signal: bool,

    /// Total mentions merged into this entity
    pub mention_count: u64,

    /// Ids of every document that mentions the entity
    pub source_refs: BTreeSet<String>,

    /// Document id to document type, for document-context evidence
    #[serde(default)]
    pub document_types: BTreeMap<String, String>,

    /// Text around the mentions, first seen first; at most
    /// [`MAX_CONTEXT_SNIPPETS`] entries of [`MAX_SNIPPET_CHARS`] each
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_snippets: Vec<String>,

    /// Time of the last classification pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classified_at: Option<DateTime<Utc>>,

    /// First sighting
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Creates an entity from its first mention.
    ///
    /// `normalized_name` must be the normalization of `raw_name`; the
    /// resolver guarantees this.
    #[must_use]
    pub fn from_first_mention(
        raw_name: &str,
        normalized_name: impl Into<String>,
        document_id: impl Into<String>,
        document_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let normalized_name = normalized_name.into();
        let raw = raw_name.trim().to_string();
        let document_id = document_id.into();

        let mut aliases = BTreeSet::new();
        aliases.insert(normalized_name.clone());
        aliases.insert(raw.clone());

        let mut document_types = BTreeMap::new();
        document_types.insert(document_id.clone(), document_type.into());

        Self {
            entity_id: EntityId::from_normalized(&normalized_name),
            canonical_name: raw,
            normalized_name,
            aliases,
            entity_type: EntityType::Unknown,
            type_confidence: 0.0,
            type_source: None,
            low_signal: false,
            mention_count: 1,
            source_refs: BTreeSet::from([document_id]),
            document_types,
            context_snippets: Vec::new(),
            classified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a further sighting of this entity.
    pub fn record_mention(
        &mut self,
        raw_name: &str,
        document_id: impl Into<String>,
        document_type: impl Into<String>,
    ) {
        let document_id = document_id.into();
        self.aliases.insert(raw_name.trim().to_string());
        self.document_types
            .entry(document_id.clone())
            .or_insert_with(|| document_type.into());
        self.source_refs.insert(document_id);
        self.mention_count = self.mention_count.saturating_add(1);
        self.touch();
    }

    /// Keeps a mention's context snippet.
    ///
    /// Blank and repeated snippets are ignored, long ones are cut to
    /// [`MAX_SNIPPET_CHARS`], and nothing is added once
    /// [`MAX_CONTEXT_SNIPPETS`] are held.
    pub fn record_snippet(&mut self, snippet: &str) {
        if self.context_snippets.len() >= MAX_CONTEXT_SNIPPETS {
            return;
        }
        let snippet: String = snippet.trim().chars().take(MAX_SNIPPET_CHARS).collect();
        if snippet.is_empty() || self.context_snippets.contains(&snippet) {
            return;
        }
        self.context_snippets.push(snippet);
        self.touch();
    }

    /// Folds another record of the same entity into this one.
    ///
    /// Aliases and source refs are unioned and mention counts summed, so
    /// absorbing is associative and commutative on those fields. The
    /// receiver keeps its canonical name and classification.
    pub fn absorb(&mut self, other: &Self) {
        debug_assert_eq!(self.entity_id, other.entity_id);
        self.aliases.extend(other.aliases.iter().cloned());
        self.source_refs.extend(other.source_refs.iter().cloned());
        for (doc, doc_type) in &other.document_types {
            self.document_types
                .entry(doc.clone())
                .or_insert_with(|| doc_type.clone());
        }
        for snippet in &other.context_snippets {
            self.record_snippet(snippet);
        }
        self.mention_count = self.mention_count.saturating_add(other.mention_count);
        self.created_at = self.created_at.min(other.created_at);
        self.touch();
    }

    /// Overwrites the type fields with a classification result.
    pub fn apply_type(&mut self, assignment: &TypeAssignment) {
        self.entity_type = assignment.entity_type;
        self.type_confidence = if assignment.entity_type == EntityType::Unknown {
            0.0
        } else {
            assignment.confidence.clamp(0.0, 1.0)
        };
        self.type_source = Some(assignment.source);
        self.low_signal = assignment.low_signal;
        let now = Utc::now();
        self.classified_at = Some(now);
        self.updated_at = now;
    }

    /// Returns true once a classification pass has run for this entity.
    #[must_use]
    pub const fn is_classified(&self) -> bool {
        self.classified_at.is_some()
    }

    /// Document types of every source document, one entry per document.
    #[must_use]
    pub fn document_type_list(&self) -> Vec<String> {
        self.document_types.values().cloned().collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.entity_id.hash(state);
    }
}
