//! Candidate spans and reconciled entities.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::text::{fold_diacritics, normalize_whitespace};

/// Kind of real-world referent a span denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    /// National identity number (personnummer / samordningsnummer)
    Ssn,
    Phone,
    Email,
    Address,
    Organization,
    Location,
    Date,
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 9] = [
        Self::Person,
        Self::Ssn,
        Self::Phone,
        Self::Email,
        Self::Address,
        Self::Organization,
        Self::Location,
        Self::Date,
        Self::Other,
    ];

    /// Identifying-number types are masked regardless of who they belong to.
    pub fn is_identifying_number(&self) -> bool {
        matches!(self, Self::Ssn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "PERSON",
            Self::Ssn => "SSN",
            Self::Phone => "PHONE",
            Self::Email => "EMAIL",
            Self::Address => "ADDRESS",
            Self::Organization => "ORGANIZATION",
            Self::Location => "LOCATION",
            Self::Date => "DATE",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a person plays in the case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityRole {
    Requester,
    CaseSubject,
    ThirdParty,
    Official,
    Unknown,
}

impl EntityRole {
    /// Rank used when mentions of one entity carry conflicting roles.
    ///
    /// Higher rank means less gets disclosed about the entity.
    pub fn protection_rank(&self) -> u8 {
        match self {
            Self::Official => 0,
            Self::Requester => 1,
            Self::CaseSubject => 2,
            Self::Unknown => 3,
            Self::ThirdParty => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requester => "REQUESTER",
            Self::CaseSubject => "CASE_SUBJECT",
            Self::ThirdParty => "THIRD_PARTY",
            Self::Official => "OFFICIAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Subject categories that warrant mandatory severity escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectedClass {
    Minor,
    DomesticViolenceSubject,
}

/// Detector family, used for the default source precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorKind {
    Pattern,
    Dictionary,
    Model,
    Llm,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "PATTERN",
            Self::Dictionary => "DICTIONARY",
            Self::Model => "MODEL",
            Self::Llm => "LLM",
        }
    }
}

/// A character-offset interval produced by one detector.
///
/// Offsets are UTF-8 byte offsets, half-open, on char boundaries.
/// `text` is kept for validation only and never used to recompute offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// Id of the detector that produced the span
    pub source: String,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Entity type asserted by the detector
    pub entity_type: EntityType,
    /// Role asserted by the detector, if it can tell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<EntityRole>,
    /// Coreference cluster id asserted by the detector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coref: Option<String>,
}

impl Span {
    /// Build a span from a slice of `document`.
    ///
    /// Returns `None` when the range is empty, out of bounds or not on char
    /// boundaries.
    pub fn from_document(
        document: &str,
        start: usize,
        end: usize,
        source: impl Into<String>,
        confidence: f64,
        entity_type: EntityType,
    ) -> Option<Self> {
        let text = document.get(start..end)?;
        if start >= end {
            return None;
        }
        Some(Self {
            start,
            end,
            text: text.to_string(),
            source: source.into(),
            confidence,
            entity_type,
            role: None,
            coref: None,
        })
    }

    pub fn with_role(mut self, role: EntityRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_coref(mut self, coref: impl Into<String>) -> Self {
        self.coref = Some(coref.into());
        self
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Half-open interval overlap
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely inside this span
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Stable identifier linking repeated mentions of one real-world entity.
///
/// Derived from the normalized mention text, so a caller can compute the id
/// of a known person (e.g. for consent lists) before analysis runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Id for the cluster whose canonical normalized key is `key`
    pub fn from_key(key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        Self(format!("ent-{}", hex::encode(&digest[..6])))
    }

    /// Id a mention of `text` with the given type links to
    pub fn for_mention(text: &str, entity_type: EntityType) -> Self {
        Self::from_key(&mention_key(text, entity_type))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a mention for linking.
///
/// Identifier types keep only their significant characters so formatting
/// differences ("19850615-1234" / "198506151234") link together. Names are
/// case- and diacritic-folded with explicit genitive markers removed.
pub fn normalize_mention(text: &str, entity_type: EntityType) -> String {
    match entity_type {
        EntityType::Ssn | EntityType::Phone => {
            let digits: String = text.chars().filter(char::is_ascii_digit).collect();
            // +46 7x... and 07x... are the same number
            match digits.strip_prefix("46") {
                Some(rest) if text.trim_start().starts_with('+') => format!("0{}", rest),
                _ => digits,
            }
        }
        EntityType::Email => text.trim().to_lowercase(),
        _ => {
            let folded = fold_diacritics(&normalize_whitespace(text));
            let trimmed = folded.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '’' && c != ':');
            let stripped = ["'s", "’s", ":s"]
                .iter()
                .find_map(|marker| trimmed.strip_suffix(marker))
                .unwrap_or(trimmed);
            stripped
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string()
        }
    }
}

/// Linking key: entity type plus normalized mention
pub fn mention_key(text: &str, entity_type: EntityType) -> String {
    format!("{}:{}", entity_type.as_str(), normalize_mention(text, entity_type))
}

/// A reconciled, typed and linked span.
///
/// Within one reconciled set no two entities overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Winning span; its type and role are the detector's, not the reconciled ones
    pub span: Span,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<EntityRole>,
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub protected: BTreeSet<ProtectedClass>,
    /// Other detectors whose spans were contained in this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supporting_sources: Vec<String>,
}

impl Entity {
    pub fn start(&self) -> usize {
        self.span.start
    }

    pub fn end(&self) -> usize {
        self.span.end
    }

    pub fn text(&self) -> &str {
        &self.span.text
    }

    pub fn overlaps_range(&self, start: usize, end: usize) -> bool {
        self.span.start < end && start < self.span.end
    }

    pub fn is_protected(&self) -> bool {
        !self.protected.is_empty()
    }
}

/// Two detectors claimed partially overlapping ranges; the lower-ranked one lost.
///
/// Contained spans are not conflicts, they count as support for the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanConflict {
    pub kept_start: usize,
    pub kept_end: usize,
    pub kept_source: String,
    pub dropped_start: usize,
    pub dropped_end: usize,
    pub dropped_source: String,
    pub dropped_type: EntityType,
}
