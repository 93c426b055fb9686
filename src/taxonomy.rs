//! The versioned classification taxonomy.
//!
//! One data structure holds every keyword table the classifiers use: the
//! organization and location lexicons for entity typing, and the rule set of
//! each relationship label. All tiers of the type classifier and the
//! biography matcher read from the same instance, so keyword priority is
//! applied identically wherever it matters.
//!
//! The built-in table is compiled once on first use. A JSON document with
//! the same shape can replace it (see [`Taxonomy::from_json_str`]).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::error::ConfigError;

/// Version tag of the built-in taxonomy.
pub const BUILTIN_TAXONOMY_VERSION: &str = "2024.2";

/// Closed set of relationship labels.
///
/// Declaration order is the display priority used to break confidence ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipLabel {
    /// Harmed by the conduct under investigation
    Victim,
    /// Alleged participant in the conduct
    CoConspirator,
    /// Charged or sued
    Defendant,
    /// Brought a claim
    Plaintiff,
    /// Testified or gave a statement
    Witness,
    /// Attorney or judge
    LegalProfessional,
    /// Police or investigating agent
    LawEnforcement,
    /// Recurring passenger on flight records
    FrequentTraveler,
    /// Worked for a principal
    Employee,
    /// Banker or business partner
    FinancialAssociate,
    /// Social or professional contact
    Associate,
    /// Synthetic default for entities with no matching evidence
    Peripheral,
}

impl RelationshipLabel {
    /// Every label, in display-priority order.
    pub const ALL: [Self; 12] = [
        Self::Victim,
        Self::CoConspirator,
        Self::Defendant,
        Self::Plaintiff,
        Self::Witness,
        Self::LegalProfessional,
        Self::LawEnforcement,
        Self::FrequentTraveler,
        Self::Employee,
        Self::FinancialAssociate,
        Self::Associate,
        Self::Peripheral,
    ];

    /// Snake-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Victim => "victim",
            Self::CoConspirator => "co_conspirator",
            Self::Defendant => "defendant",
            Self::Plaintiff => "plaintiff",
            Self::Witness => "witness",
            Self::LegalProfessional => "legal_professional",
            Self::LawEnforcement => "law_enforcement",
            Self::FrequentTraveler => "frequent_traveler",
            Self::Employee => "employee",
            Self::FinancialAssociate => "financial_associate",
            Self::Associate => "associate",
            Self::Peripheral => "peripheral",
        }
    }
}

impl fmt::Display for RelationshipLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled, case-insensitive, word-boundary keyword list.
///
/// Serializes as a plain list of keywords. Multi-word keywords match across
/// any run of whitespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct KeywordSet {
    keywords: Vec<String>,
    any: Option<Regex>,
    each: Vec<Regex>,
}

fn keyword_pattern(keyword: &str) -> String {
    keyword
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}

impl KeywordSet {
    /// Compiles a keyword list.
    ///
    /// # Errors
    ///
    /// Returns the regex error if a pattern fails to compile (only possible
    /// for pathological input, since keywords are escaped).
    pub fn new<I, S>(keywords: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let mut keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .collect();
        // Longest first so leftmost-first alternation prefers "law firm" over "law".
        keywords.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        if keywords.is_empty() {
            return Ok(Self::default());
        }

        let alternation = keywords
            .iter()
            .map(|k| keyword_pattern(k))
            .collect::<Vec<_>>()
            .join("|");
        let any = Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))?;
        let each = keywords
            .iter()
            .map(|k| Regex::new(&format!(r"(?i)\b{}\b", keyword_pattern(k))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            keywords,
            any: Some(any),
            each,
        })
    }

    /// Number of distinct keywords.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// Returns true if the set has no keywords.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Returns true if any keyword occurs in `text`.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.any.as_ref().is_some_and(|re| re.is_match(text))
    }

    /// Byte range of the leftmost keyword occurrence in `text`.
    #[must_use]
    pub fn first_match(&self, text: &str) -> Option<(usize, usize)> {
        self.any
            .as_ref()
            .and_then(|re| re.find(text))
            .map(|m| (m.start(), m.end()))
    }

    /// Distinct keywords occurring in `text`.
    #[must_use]
    pub fn matched<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.keywords
            .iter()
            .zip(&self.each)
            .filter(|(_, re)| re.is_match(text))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// The keywords, longest first.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl TryFrom<Vec<String>> for KeywordSet {
    type Error = regex::Error;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeywordSet> for Vec<String> {
    fn from(set: KeywordSet) -> Self {
        set.keywords
    }
}

/// Indicator words that decide an entity's type before any name-format rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeLexicon {
    /// Organization indicators
    pub organization: KeywordSet,
    /// Location indicators
    pub location: KeywordSet,
}

/// A keyword hit that decided an entity's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordVerdict {
    /// Decided type
    pub entity_type: EntityType,
    /// The keyword that matched
    pub keyword: String,
    /// True if the hit came from a context tag rather than the name itself
    pub from_context: bool,
}

/// Matching rules for one relationship label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRule {
    /// Label the rule assigns
    pub label: RelationshipLabel,
    /// Required evidence; at least one must hit
    pub primary_keywords: KeywordSet,
    /// Supporting evidence, weighted at half
    #[serde(default)]
    pub context_keywords: KeywordSet,
    /// Any hit rejects the label outright
    #[serde(default)]
    pub exclusion_keywords: KeywordSet,
    /// Empty means every entity type
    #[serde(default)]
    pub applicable_entity_types: Vec<EntityType>,
    /// Minimum biography score for the label to be reported
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

const fn default_min_confidence() -> f32 {
    0.1
}

impl LabelRule {
    /// Returns true if the label may be given to an entity of this type.
    ///
    /// Unclassified entities accept every label.
    #[must_use]
    pub fn applies_to(&self, entity_type: EntityType) -> bool {
        entity_type == EntityType::Unknown
            || self.applicable_entity_types.is_empty()
            || self.applicable_entity_types.contains(&entity_type)
    }
}

/// The full taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    /// Reported with every registry output
    pub version: String,
    /// Type indicator words
    pub type_lexicon: TypeLexicon,
    /// Biography rules, one per label
    pub labels: Vec<LabelRule>,
    /// Document type (lowercase) to the labels its appearance supports
    #[serde(default)]
    pub document_labels: BTreeMap<String, Vec<RelationshipLabel>>,
}

static BUILTIN: OnceLock<Arc<Taxonomy>> = OnceLock::new();

fn kw(words: &[&str]) -> KeywordSet {
    KeywordSet::new(words).expect("built-in keywords are escaped and must compile")
}

fn rule(
    label: RelationshipLabel,
    primary: &[&str],
    context: &[&str],
    exclusion: &[&str],
    types: &[EntityType],
    min_confidence: f32,
) -> LabelRule {
    LabelRule {
        label,
        primary_keywords: kw(primary),
        context_keywords: kw(context),
        exclusion_keywords: kw(exclusion),
        applicable_entity_types: types.to_vec(),
        min_confidence,
    }
}

impl Taxonomy {
    /// The built-in taxonomy, compiled once and shared.
    #[must_use]
    pub fn builtin() -> Arc<Self> {
        Arc::clone(BUILTIN.get_or_init(|| Arc::new(Self::build_builtin())))
    }

    fn build_builtin() -> Self {
        use EntityType::{Location, Organization, Person};
        use RelationshipLabel as L;

        let type_lexicon = TypeLexicon {
            organization: kw(&[
                "organization", "organisation", "foundation", "institute", "institution",
                "university", "college", "school", "academy", "company", "corporation", "corp",
                "inc", "incorporated", "llc", "llp", "ltd", "limited", "plc", "gmbh", "group",
                "holdings", "partners", "partnership", "associates", "association", "society",
                "trust", "fund", "capital", "ventures", "investments", "bank", "bancorp",
                "securities", "agency", "bureau", "department", "ministry", "committee",
                "council", "commission", "administration", "service", "church", "hospital",
                "clinic", "airlines", "airways", "aviation", "media", "news", "times",
                "magazine", "club", "enterprises", "industries", "international", "systems",
                "technologies", "laboratories", "labs", "law firm", "firm", "police", "court",
                "campaign", "initiative",
            ]),
            location: kw(&[
                "island", "islands", "isle", "beach", "harbor", "harbour", "street", "avenue",
                "road", "boulevard", "highway", "plaza", "square", "ranch", "estate", "estates",
                "mansion", "residence", "compound", "apartment", "apartments", "building",
                "tower", "towers", "hotel", "airport", "airfield", "hangar", "county", "city",
                "township", "village", "state", "province", "district", "territory", "kingdom",
                "republic", "mountain", "valley", "canyon", "desert", "coast", "peninsula",
            ]),
        };

        let labels = vec![
            rule(
                L::Victim,
                &["victim", "abused", "minor", "underage", "trafficked", "survivor", "exploited", "molested"],
                &["massage", "testified", "lawsuit", "young", "girl", "recruited", "school"],
                &["attorney", "lawyer", "counsel", "prosecutor", "judge", "detective", "agent", "recruiter"],
                &[Person],
                0.1,
            ),
            rule(
                L::CoConspirator,
                &["co-conspirator", "conspirator", "conspiracy", "accomplice", "facilitated", "procured", "recruiter"],
                &["indicted", "charged", "immunity", "non-prosecution", "plea", "assistant", "scheduled"],
                &["victim", "prosecutor", "judge"],
                &[Person, Organization],
                0.1,
            ),
            rule(
                L::Defendant,
                &["defendant", "accused", "indicted", "convicted", "charged"],
                &["trial", "sentenced", "plea", "prison", "jury", "guilty"],
                &["prosecutor", "judge"],
                &[Person, Organization],
                0.1,
            ),
            rule(
                L::Plaintiff,
                &["plaintiff", "sued", "claimant", "complainant"],
                &["lawsuit", "damages", "complaint", "filed", "settlement"],
                &[],
                &[Person, Organization],
                0.1,
            ),
            rule(
                L::Witness,
                &["witness", "testified", "testimony", "deposed"],
                &["court", "trial", "hearing", "subpoena", "statement", "deposition"],
                &[],
                &[Person],
                0.1,
            ),
            rule(
                L::LegalProfessional,
                &["attorney", "lawyer", "counsel", "prosecutor", "judge", "paralegal", "barrister"],
                &["represented", "defense", "court", "motion", "filed", "deposition", "settlement"],
                &[],
                &[Person, Organization],
                0.1,
            ),
            rule(
                L::LawEnforcement,
                &["detective", "officer", "agent", "investigator", "police", "sheriff"],
                &["investigation", "arrested", "interviewed", "search warrant", "case"],
                &[],
                &[Person, Organization],
                0.1,
            ),
            rule(
                L::FrequentTraveler,
                &["flight", "flew", "passenger", "traveled", "travelled", "jet", "aircraft", "trips"],
                &["island", "new mexico", "paris", "palm beach", "manifest", "ranch"],
                &["pilot"],
                &[Person],
                0.1,
            ),
            rule(
                L::Employee,
                &["employee", "employed", "assistant", "housekeeper", "butler", "pilot", "chef", "driver", "staff", "secretary"],
                &["worked", "hired", "payroll", "salary", "household"],
                &[],
                &[Person],
                0.1,
            ),
            rule(
                L::FinancialAssociate,
                &["donor", "donated", "investor", "banker", "financier", "funded", "client"],
                &["money", "million", "account", "transfer", "foundation", "fund"],
                &[],
                &[Person, Organization],
                0.1,
            ),
            rule(
                L::Associate,
                &["friend", "associate", "acquaintance", "socialite", "companion", "guest"],
                &["dinner", "party", "visited", "introduced", "relationship", "social"],
                &[],
                &[Person, Organization, Location],
                0.1,
            ),
        ];

        let mut document_labels = BTreeMap::new();
        document_labels.insert(
            "court_record".to_string(),
            vec![L::Witness, L::LegalProfessional, L::Plaintiff, L::Defendant],
        );
        document_labels.insert("deposition".to_string(), vec![L::Witness, L::LegalProfessional]);
        document_labels.insert("indictment".to_string(), vec![L::Defendant, L::CoConspirator]);
        document_labels.insert("flight_log".to_string(), vec![L::FrequentTraveler]);
        document_labels.insert("police_report".to_string(), vec![L::LawEnforcement, L::Witness]);
        document_labels.insert("victim_statement".to_string(), vec![L::Victim]);
        document_labels.insert("address_book".to_string(), vec![L::Associate]);
        document_labels.insert("contact_list".to_string(), vec![L::Associate]);
        document_labels.insert("email".to_string(), vec![L::Associate]);
        document_labels.insert("employment_record".to_string(), vec![L::Employee]);
        document_labels.insert("payroll".to_string(), vec![L::Employee]);
        document_labels.insert("financial_record".to_string(), vec![L::FinancialAssociate]);
        document_labels.insert("bank_statement".to_string(), vec![L::FinancialAssociate]);

        Self {
            version: BUILTIN_TAXONOMY_VERSION.to_string(),
            type_lexicon,
            labels,
            document_labels,
        }
    }

    /// Parses a taxonomy from JSON.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Taxonomy` if the document is not valid JSON,
    /// does not match the schema, a keyword fails to compile, or a label is
    /// defined twice.
    pub fn from_json_str(json: &str, origin: &Path) -> Result<Self, ConfigError> {
        let taxonomy: Self = serde_json::from_str(json).map_err(|e| ConfigError::Taxonomy {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        taxonomy.validate(origin)?;
        Ok(taxonomy)
    }

    /// Loads a taxonomy from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Taxonomy` if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Taxonomy {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&json, path)
    }

    fn validate(&self, origin: &Path) -> Result<(), ConfigError> {
        let fail = |message: String| ConfigError::Taxonomy {
            path: origin.to_path_buf(),
            message,
        };

        let mut seen = BTreeSet::new();
        for rule in &self.labels {
            if !seen.insert(rule.label) {
                return Err(fail(format!("label {} is defined twice", rule.label)));
            }
            if rule.label == RelationshipLabel::Peripheral {
                return Err(fail("peripheral is synthetic and cannot carry rules".to_string()));
            }
            if !(0.0..=1.0).contains(&rule.min_confidence) {
                return Err(fail(format!(
                    "label {} has min_confidence {} outside [0, 1]",
                    rule.label, rule.min_confidence
                )));
            }
        }
        Ok(())
    }

    /// The keyword-priority step shared by every type-classification tier.
    ///
    /// Organization keywords are checked before location keywords, and both
    /// before any name-format rule runs. The name is checked first, then the
    /// context tags. Tags should describe the entity itself; document kinds
    /// such as "police report" are not tags.
    #[must_use]
    pub fn keyword_type(&self, name: &str, context_tags: &[String]) -> Option<KeywordVerdict> {
        let lexicon = &self.type_lexicon;
        let candidates = [
            (EntityType::Organization, &lexicon.organization),
            (EntityType::Location, &lexicon.location),
        ];

        for (entity_type, set) in candidates {
            if let Some(keyword) = set.matched(name).first() {
                return Some(KeywordVerdict {
                    entity_type,
                    keyword: (*keyword).to_string(),
                    from_context: false,
                });
            }
            for tag in context_tags {
                if let Some(keyword) = set.matched(tag).first() {
                    return Some(KeywordVerdict {
                        entity_type,
                        keyword: (*keyword).to_string(),
                        from_context: true,
                    });
                }
            }
        }
        None
    }

    /// Rule for a label, if the taxonomy defines one.
    #[must_use]
    pub fn rule(&self, label: RelationshipLabel) -> Option<&LabelRule> {
        self.labels.iter().find(|r| r.label == label)
    }

    /// Labels supported by a document type (case-insensitive).
    #[must_use]
    pub fn labels_for_document(&self, document_type: &str) -> &[RelationshipLabel] {
        self.document_labels
            .get(&document_type.trim().to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_set_matches_whole_words_only() {
        let set = KeywordSet::new(["inc", "law firm"]).unwrap();
        assert!(set.is_match("Acme Inc."));
        assert!(!set.is_match("Incandescent Lights"));
        assert!(set.is_match("a LAW   FIRM in town"));
        assert_eq!(set.matched("law firm inc"), vec!["law firm", "inc"]);
    }

    #[test]
    fn keyword_set_dedupes_and_normalizes() {
        let set = KeywordSet::new(["Bank", "bank", "  ", "law  firm"]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.keywords(), &["law firm".to_string(), "bank".to_string()]);
    }

    #[test]
    fn empty_keyword_set_never_matches() {
        let set = KeywordSet::default();
        assert!(set.is_empty());
        assert!(!set.is_match("anything"));
        assert_eq!(set.first_match("anything"), None);
    }

    #[test]
    fn first_match_reports_leftmost_range() {
        let set = KeywordSet::new(["flight", "island"]).unwrap();
        let text = "went to the island by flight";
        let (start, end) = set.first_match(text).unwrap();
        assert_eq!(&text[start..end], "island");
    }

    #[test]
    fn organization_beats_location_and_format() {
        let taxonomy = Taxonomy::builtin();
        let verdict = taxonomy.keyword_type("trump organization", &[]).unwrap();
        assert_eq!(verdict.entity_type, EntityType::Organization);
        assert_eq!(verdict.keyword, "organization");

        // Both lexicons hit: organization wins.
        let verdict = taxonomy.keyword_type("palm beach country club", &[]).unwrap();
        assert_eq!(verdict.entity_type, EntityType::Organization);
    }

    #[test]
    fn location_keyword_detected() {
        let verdict = Taxonomy::builtin()
            .keyword_type("little st james island", &[])
            .unwrap();
        assert_eq!(verdict.entity_type, EntityType::Location);
        assert!(!verdict.from_context);
    }

    #[test]
    fn context_tags_are_consulted_after_name() {
        let tags = vec!["foundation donor list".to_string()];
        let verdict = Taxonomy::builtin().keyword_type("gates", &tags).unwrap();
        assert_eq!(verdict.entity_type, EntityType::Organization);
        assert!(verdict.from_context);
    }

    #[test]
    fn plain_person_names_have_no_keyword() {
        let taxonomy = Taxonomy::builtin();
        assert!(taxonomy.keyword_type("doug band", &[]).is_none());
        assert!(taxonomy.keyword_type("epstein jeffrey", &[]).is_none());
        assert!(taxonomy.keyword_type("fbi", &[]).is_none());
    }

    #[test]
    fn document_labels_are_case_insensitive() {
        let taxonomy = Taxonomy::builtin();
        assert_eq!(
            taxonomy.labels_for_document("Flight_Log"),
            &[RelationshipLabel::FrequentTraveler]
        );
        assert!(taxonomy.labels_for_document("unknown_type").is_empty());
    }

    #[test]
    fn builtin_has_no_peripheral_rule() {
        assert!(Taxonomy::builtin().rule(RelationshipLabel::Peripheral).is_none());
        assert!(Taxonomy::builtin().rule(RelationshipLabel::Victim).is_some());
    }

    #[test]
    fn json_round_trip_preserves_rules() {
        let json = serde_json::to_string(&*Taxonomy::builtin()).unwrap();
        let parsed = Taxonomy::from_json_str(&json, Path::new("inline")).unwrap();
        assert_eq!(parsed.version, BUILTIN_TAXONOMY_VERSION);
        assert_eq!(parsed.labels.len(), Taxonomy::builtin().labels.len());
        assert!(parsed.keyword_type("clinton foundation", &[]).is_some());
    }

    #[test]
    fn duplicate_label_rejected() {
        let json = r#"{
            "version": "test",
            "type_lexicon": {"organization": ["inc"], "location": ["island"]},
            "labels": [
                {"label": "victim", "primary_keywords": ["victim"]},
                {"label": "victim", "primary_keywords": ["abused"]}
            ]
        }"#;
        let err = Taxonomy::from_json_str(json, Path::new("dup.json")).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn label_order_is_display_priority() {
        assert!(RelationshipLabel::Victim < RelationshipLabel::Associate);
        assert!(RelationshipLabel::Associate < RelationshipLabel::Peripheral);
        assert_eq!(RelationshipLabel::CoConspirator.to_string(), "co_conspirator");
    }
}
