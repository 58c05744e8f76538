//! Sensitivity sections and their classification.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::span::{EntityId, ProtectedClass};

/// Subject-matter category of a passage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityCategory {
    Health,
    MentalHealth,
    Addiction,
    Violence,
    Family,
    Economy,
    Housing,
    Sexual,
    Criminal,
    ChildProtection,
    Disability,
    Neutral,
}

impl SensitivityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Health => "HEALTH",
            Self::MentalHealth => "MENTAL_HEALTH",
            Self::Addiction => "ADDICTION",
            Self::Violence => "VIOLENCE",
            Self::Family => "FAMILY",
            Self::Economy => "ECONOMY",
            Self::Housing => "HOUSING",
            Self::Sexual => "SEXUAL",
            Self::Criminal => "CRIMINAL",
            Self::ChildProtection => "CHILD_PROTECTION",
            Self::Disability => "DISABILITY",
            Self::Neutral => "NEUTRAL",
        }
    }

    /// Parse the wire name (as produced by `as_str`), case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Some(match upper.as_str() {
            "HEALTH" => Self::Health,
            "MENTAL_HEALTH" => Self::MentalHealth,
            "ADDICTION" => Self::Addiction,
            "VIOLENCE" => Self::Violence,
            "FAMILY" => Self::Family,
            "ECONOMY" => Self::Economy,
            "HOUSING" => Self::Housing,
            "SEXUAL" => Self::Sexual,
            "CRIMINAL" => Self::Criminal,
            "CHILD_PROTECTION" => Self::ChildProtection,
            "DISABILITY" => Self::Disability,
            "NEUTRAL" => Self::Neutral,
            _ => return None,
        })
    }
}

impl fmt::Display for SensitivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity, ordered LOW < MEDIUM < HIGH < CRITICAL
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl SensitivityLevel {
    /// One step more severe, saturating at CRITICAL
    pub fn step_up(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for SensitivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable section identifier ("sec-<index>")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(String);

impl SectionId {
    pub fn from_index(index: usize) -> Self {
        Self(format!("sec-{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A classified contiguous region of the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivitySection {
    pub id: SectionId,
    pub start: usize,
    pub end: usize,
    /// Primary category
    pub category: SensitivityCategory,
    #[serde(default)]
    pub secondary_categories: BTreeSet<SensitivityCategory>,
    pub level: SensitivityLevel,
    #[serde(default)]
    pub affected_entity_ids: BTreeSet<EntityId>,
    /// Human-readable justification, in the order it was gathered
    #[serde(default)]
    pub evidence: Vec<String>,
    pub confidence: f64,
    /// Protected classes of entities mentioned in the section
    #[serde(default)]
    pub protected_classes: BTreeSet<ProtectedClass>,
    /// Whether disclosing the section risks harm to a third party
    #[serde(default)]
    pub third_party_risk: bool,
}

impl SensitivitySection {
    pub fn contains_range(&self, start: usize, end: usize) -> bool {
        self.start <= start && end <= self.end
    }

    pub fn overlaps_range(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }

    /// All asserted categories, primary first
    pub fn categories(&self) -> impl Iterator<Item = SensitivityCategory> + '_ {
        std::iter::once(self.category).chain(
            self.secondary_categories
                .iter()
                .copied()
                .filter(move |c| *c != self.category),
        )
    }
}
