//! Disclosure decisions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::section::{SectionId, SensitivityCategory, SensitivityLevel};
use super::span::{EntityId, EntityType};

/// Legal basis recorded when the rule set has no entry for a decision
pub const UNSPECIFIED_LEGAL_BASIS: &str = "UNSPECIFIED";

/// What happens to a span on disclosure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisclosureAction {
    Release,
    MaskPartial,
    MaskComplete,
}

impl DisclosureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release => "RELEASE",
            Self::MaskPartial => "MASK_PARTIAL",
            Self::MaskComplete => "MASK_COMPLETE",
        }
    }

    pub fn is_masking(&self) -> bool {
        !matches!(self, Self::Release)
    }
}

impl fmt::Display for DisclosureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy rules, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyRule {
    /// Requester's own data
    OwnData,
    /// Own data in a CRITICAL passage that puts a third party at risk
    OwnDataThirdParty,
    /// Case subject consented to disclosure
    Consent,
    /// Professional names of officials
    Official,
    /// CRITICAL level or identifying number
    CriticalOrIdentifier,
    High,
    Medium,
    /// LOW level; entity-type default action
    LowDefault,
}

impl PolicyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OwnData => "own-data",
            Self::OwnDataThirdParty => "own-data-third-party",
            Self::Consent => "consent",
            Self::Official => "official",
            Self::CriticalOrIdentifier => "critical-or-identifier",
            Self::High => "high",
            Self::Medium => "medium",
            Self::LowDefault => "low-default",
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity or section a decision is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionTarget {
    Entity {
        entity_id: EntityId,
        entity_type: EntityType,
    },
    Section {
        section_id: SectionId,
        category: SensitivityCategory,
    },
}

impl DecisionTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Entity { entity_id, .. } => entity_id.as_str(),
            Self::Section { section_id, .. } => section_id.as_str(),
        }
    }

    pub fn is_section(&self) -> bool {
        matches!(self, Self::Section { .. })
    }
}

/// A sub-range of the target that MASK_PARTIAL replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskTarget {
    pub start: usize,
    pub end: usize,
    pub entity_type: EntityType,
}

/// Which target and which rule produced a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOrigin {
    pub target_id: String,
    pub rule: PolicyRule,
}

/// Decision for one mention of an entity, or one section.
///
/// Decisions are terminal: once produced for a target in a run, nothing
/// downstream changes the action except an explicit reviewer edit before
/// rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisclosureDecision {
    pub target: DecisionTarget,
    pub start: usize,
    pub end: usize,
    pub action: DisclosureAction,
    pub level: SensitivityLevel,
    pub category: SensitivityCategory,
    /// For MASK_PARTIAL: the identifying sub-ranges. `None` means the policy
    /// could not say which part identifies, and the renderer masks it all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifying_spans: Option<Vec<MaskTarget>>,
    pub legal_basis: String,
    pub reasoning: String,
    pub decided_from: DecisionOrigin,
}

impl DisclosureDecision {
    pub fn has_unspecified_basis(&self) -> bool {
        self.legal_basis == UNSPECIFIED_LEGAL_BASIS
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_ids() {
        assert_eq!(PolicyRule::CriticalOrIdentifier.as_str(), "critical-or-identifier");
        let json = serde_json::to_string(&PolicyRule::OwnDataThirdParty).unwrap();
        assert_eq!(json, "\"own-data-third-party\"");
    }

    #[test]
    fn test_target_serialization_is_tagged() {
        let target = DecisionTarget::Section {
            section_id: SectionId::from_index(2),
            category: SensitivityCategory::Health,
        };
        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(value["kind"], "SECTION");
        assert_eq!(value["section_id"], "sec-2");
        assert_eq!(target.id(), "sec-2");
    }
}
