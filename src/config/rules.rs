//! Declarative rule set: legal bases, keyword tables, role keywords,
//! default actions, protected-class escalation and placeholders.
//!
//! The engine only needs lookups from this module. Rule sets are usually
//! loaded from YAML or JSON, but can be built in code as well.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{
    DisclosureAction, EntityRole, EntityType, SensitivityCategory, SensitivityLevel,
};

/// Sample rule set for Swedish social-services records (OSL chapter 26)
const OSL26_YAML: &str = include_str!("../../rules/osl26.yaml");

/// A complete rule set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rule set name (recorded in logs)
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    /// Legal basis per (category, level, action); most specific entry wins
    #[serde(default)]
    pub legal_bases: Vec<LegalBasisEntry>,

    /// Keyword lists grouped by category
    #[serde(default)]
    pub categories: Vec<CategoryRule>,

    /// Stand-alone keywords, possibly without a category
    #[serde(default)]
    pub keywords: Vec<KeywordRule>,

    /// Match keywords on word boundaries only (default: substring)
    #[serde(default)]
    pub whole_word_keywords: bool,

    /// Action for LOW-level entities per type (RELEASE when absent)
    #[serde(default)]
    pub default_actions: BTreeMap<EntityType, DisclosureAction>,

    #[serde(default)]
    pub escalation: EscalationRules,

    #[serde(default)]
    pub placeholders: Placeholders,

    #[serde(default)]
    pub partial_masking: PartialMasking,

    /// Words next to a name that reveal the person's role
    #[serde(default)]
    pub role_keywords: RoleKeywords,
}

/// One row of the legal-basis table. Absent keys match anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalBasisEntry {
    #[serde(default)]
    pub category: Option<SensitivityCategory>,
    #[serde(default)]
    pub level: Option<SensitivityLevel>,
    #[serde(default)]
    pub action: Option<DisclosureAction>,
    pub basis: String,
}

impl LegalBasisEntry {
    fn matches(
        &self,
        category: SensitivityCategory,
        level: SensitivityLevel,
        action: DisclosureAction,
    ) -> bool {
        self.category.map_or(true, |c| c == category)
            && self.level.map_or(true, |l| l == level)
            && self.action.map_or(true, |a| a == action)
    }

    fn specificity(&self) -> usize {
        usize::from(self.category.is_some())
            + usize::from(self.level.is_some())
            + usize::from(self.action.is_some())
    }
}

/// Keywords that indicate a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: SensitivityCategory,
    #[serde(default = "default_category_level")]
    pub default_level: SensitivityLevel,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_category_level() -> SensitivityLevel {
    SensitivityLevel::Medium
}

/// A single keyword entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub term: String,
    /// Missing category is a configuration gap, surfaced as a warning
    #[serde(default)]
    pub category: Option<SensitivityCategory>,
    /// Overrides the category's default level
    #[serde(default)]
    pub level: Option<SensitivityLevel>,
}

/// Severity escalation for protected classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRules {
    /// Raise by one level when a protected-class entity is mentioned
    #[serde(default = "default_step_up")]
    pub step_up_protected: bool,

    /// Categories where a minor forces CRITICAL
    #[serde(default = "default_minor_critical_categories")]
    pub minor_critical_categories: BTreeSet<SensitivityCategory>,
}

fn default_step_up() -> bool {
    true
}

fn default_minor_critical_categories() -> BTreeSet<SensitivityCategory> {
    [
        SensitivityCategory::Health,
        SensitivityCategory::Addiction,
        SensitivityCategory::Violence,
        SensitivityCategory::Sexual,
    ]
    .into_iter()
    .collect()
}

impl Default for EscalationRules {
    fn default() -> Self {
        Self {
            step_up_protected: default_step_up(),
            minor_critical_categories: default_minor_critical_categories(),
        }
    }
}

/// Placeholder text per entity type and for masked sections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Placeholders {
    /// Overrides for entity placeholders
    #[serde(default)]
    pub entities: BTreeMap<EntityType, String>,

    /// Section placeholder template; `{category}` is substituted
    #[serde(default)]
    pub section: Option<String>,
}

impl Placeholders {
    pub fn for_entity(&self, entity_type: EntityType) -> String {
        if let Some(custom) = self.entities.get(&entity_type) {
            return custom.clone();
        }
        let label = match entity_type {
            EntityType::Person => "PERSON",
            EntityType::Ssn => "PERSONNUMMER",
            EntityType::Phone => "TELEFON",
            EntityType::Email => "E-POST",
            EntityType::Address => "ADRESS",
            EntityType::Organization => "ORGANISATION",
            EntityType::Location => "PLATS",
            EntityType::Date => "DATUM",
            EntityType::Other => "UPPGIFT",
        };
        format!("<{}>", label)
    }

    pub fn for_section(&self, category: SensitivityCategory) -> String {
        match &self.section {
            Some(template) => template.replace("{category}", category.as_str()),
            None => format!("<SEKTION: {}>", category.as_str()),
        }
    }
}

/// Role cues for PERSON mentions without a detector-asserted role.
///
/// Terms are matched case-insensitively as word prefixes, so "granne"
/// also covers "grannen". A cue applies when at most `max_gap_words`
/// words and no sentence break separate it from the name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleKeywords {
    /// Titles of staff acting in an official capacity
    #[serde(default)]
    pub official: Vec<String>,

    /// Words for whoever filed a report
    #[serde(default)]
    pub reporter: Vec<String>,

    #[serde(default)]
    pub third_party: Vec<String>,

    /// Family relations of the case subject
    #[serde(default)]
    pub family: Vec<String>,

    #[serde(default = "default_max_gap_words")]
    pub max_gap_words: usize,
}

fn default_max_gap_words() -> usize {
    0
}

impl Default for RoleKeywords {
    fn default() -> Self {
        Self {
            official: Vec::new(),
            reporter: Vec::new(),
            third_party: Vec::new(),
            family: Vec::new(),
            max_gap_words: default_max_gap_words(),
        }
    }
}

impl RoleKeywords {
    /// Term groups with the role each implies. Reporters and relatives
    /// are treated as third parties.
    pub fn groups(&self) -> [(&[String], EntityRole); 4] {
        [
            (self.official.as_slice(), EntityRole::Official),
            (self.reporter.as_slice(), EntityRole::ThirdParty),
            (self.third_party.as_slice(), EntityRole::ThirdParty),
            (self.family.as_slice(), EntityRole::ThirdParty),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.groups().iter().all(|(terms, _)| terms.is_empty())
    }
}

/// How MASK_PARTIAL picks the identifying part of an entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PartialMasking {
    /// Express no sub-span; the renderer masks the whole entity
    #[default]
    Degrade,
    /// Mask capitalised tokens and keep listed relationship words
    IdentifyingTokens {
        #[serde(default)]
        kept_words: Vec<String>,
    },
}

impl RuleSet {
    /// Load a rule set from a YAML or JSON file (by extension)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule set file: {}", path.display()))?;

        let rules = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
        .with_context(|| format!("Failed to load rule set: {}", path.display()))?;

        Ok(rules)
    }

    /// Parse a rule set from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let rules: Self = serde_yaml::from_str(content).context("Failed to parse rule set YAML")?;
        rules.validate()?;
        Ok(rules)
    }

    /// Parse a rule set from JSON content
    pub fn from_json(content: &str) -> Result<Self> {
        let rules: Self = serde_json::from_str(content).context("Failed to parse rule set JSON")?;
        rules.validate()?;
        Ok(rules)
    }

    /// The bundled OSL chapter 26 sample rule set
    pub fn osl26() -> Result<Self> {
        Self::from_yaml(OSL26_YAML)
    }

    /// Validate the rule set definition
    pub fn validate(&self) -> Result<()> {
        for (i, entry) in self.legal_bases.iter().enumerate() {
            if entry.basis.trim().is_empty() {
                anyhow::bail!("Legal basis entry {} has an empty basis", i);
            }
        }

        for rule in &self.categories {
            if let Some(pos) = rule.keywords.iter().position(|k| k.trim().is_empty()) {
                anyhow::bail!(
                    "Category {} has an empty keyword at position {}",
                    rule.category,
                    pos
                );
            }
        }

        if let Some(pos) = self.keywords.iter().position(|k| k.term.trim().is_empty()) {
            anyhow::bail!("Keyword entry {} has an empty term", pos);
        }

        for (terms, role) in self.role_keywords.groups() {
            if let Some(pos) = terms.iter().position(|t| t.trim().is_empty()) {
                anyhow::bail!("Role keywords for {:?} have an empty term at position {}", role, pos);
            }
        }

        Ok(())
    }

    /// Legal basis for a decision, if one is configured
    pub fn legal_basis(
        &self,
        category: SensitivityCategory,
        level: SensitivityLevel,
        action: DisclosureAction,
    ) -> Option<&str> {
        self.legal_bases
            .iter()
            .enumerate()
            .filter(|(_, e)| e.matches(category, level, action))
            // Most specific wins; earlier entries win ties
            .max_by(|(ia, a), (ib, b)| a.specificity().cmp(&b.specificity()).then(ib.cmp(ia)))
            .map(|(_, e)| e.basis.as_str())
    }

    /// Default action for a LOW-level entity of this type
    pub fn default_action(&self, entity_type: EntityType) -> DisclosureAction {
        self.default_actions
            .get(&entity_type)
            .copied()
            .unwrap_or(DisclosureAction::Release)
    }

    /// Default level for a category, if the category is configured
    pub fn category_level(&self, category: SensitivityCategory) -> Option<SensitivityLevel> {
        self.categories
            .iter()
            .filter(|r| r.category == category)
            .map(|r| r.default_level)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_RULES_YAML: &str = r#"
name: test
legal_bases:
  - basis: "OSL 26:1"
  - category: HEALTH
    basis: "OSL 26:1 (hälsa)"
  - category: HEALTH
    level: CRITICAL
    action: MASK_COMPLETE
    basis: "OSL 26:1 första stycket"
categories:
  - category: ADDICTION
    default_level: HIGH
    keywords: [missbruk, alkohol]
keywords:
  - term: orosanmälan
default_actions:
  SSN: MASK_COMPLETE
"#;

    #[test]
    fn test_rules_parsing() {
        let rules = RuleSet::from_yaml(TEST_RULES_YAML).unwrap();

        assert_eq!(rules.name, "test");
        assert_eq!(rules.categories.len(), 1);
        assert_eq!(rules.keywords[0].category, None);
        assert!(!rules.whole_word_keywords);
        assert!(rules.escalation.step_up_protected);
    }

    #[test]
    fn test_most_specific_legal_basis_wins() {
        let rules = RuleSet::from_yaml(TEST_RULES_YAML).unwrap();

        assert_eq!(
            rules.legal_basis(
                SensitivityCategory::Health,
                SensitivityLevel::Critical,
                DisclosureAction::MaskComplete
            ),
            Some("OSL 26:1 första stycket")
        );
        assert_eq!(
            rules.legal_basis(
                SensitivityCategory::Health,
                SensitivityLevel::Medium,
                DisclosureAction::MaskPartial
            ),
            Some("OSL 26:1 (hälsa)")
        );
        assert_eq!(
            rules.legal_basis(
                SensitivityCategory::Economy,
                SensitivityLevel::Low,
                DisclosureAction::Release
            ),
            Some("OSL 26:1")
        );
    }

    #[test]
    fn test_missing_legal_basis() {
        let rules = RuleSet::default();
        assert_eq!(
            rules.legal_basis(
                SensitivityCategory::Neutral,
                SensitivityLevel::Low,
                DisclosureAction::Release
            ),
            None
        );
    }

    #[test]
    fn test_default_actions() {
        let rules = RuleSet::from_yaml(TEST_RULES_YAML).unwrap();
        assert_eq!(rules.default_action(EntityType::Ssn), DisclosureAction::MaskComplete);
        assert_eq!(rules.default_action(EntityType::Date), DisclosureAction::Release);
    }

    #[test]
    fn test_placeholders() {
        let placeholders = Placeholders::default();
        assert_eq!(placeholders.for_entity(EntityType::Phone), "<TELEFON>");
        assert_eq!(placeholders.for_entity(EntityType::Ssn), "<PERSONNUMMER>");
        assert_eq!(
            placeholders.for_section(SensitivityCategory::Addiction),
            "<SEKTION: ADDICTION>"
        );

        let custom = Placeholders {
            section: Some("[{category}]".to_string()),
            ..Default::default()
        };
        assert_eq!(custom.for_section(SensitivityCategory::Health), "[HEALTH]");
    }

    #[test]
    fn test_empty_keyword_rejected() {
        let yaml = r#"
keywords:
  - term: "  "
"#;
        assert!(RuleSet::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_role_keywords_parsing() {
        let yaml = r#"
role_keywords:
  official: [socialsekreterare]
  family: [mamma, pappa]
  max_gap_words: 1
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        let groups = rules.role_keywords.groups();

        assert_eq!(groups[0].0, ["socialsekreterare".to_string()]);
        assert_eq!(groups[0].1, EntityRole::Official);
        assert_eq!(groups[3].0.len(), 2);
        assert_eq!(groups[3].1, EntityRole::ThirdParty);
        assert_eq!(rules.role_keywords.max_gap_words, 1);
        assert!(RuleSet::default().role_keywords.is_empty());
    }

    #[test]
    fn test_empty_role_keyword_rejected() {
        let yaml = r#"
role_keywords:
  reporter: [anmälare, ""]
"#;
        assert!(RuleSet::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_osl26_has_role_keywords() {
        let rules = RuleSet::osl26().unwrap();
        assert!(rules
            .role_keywords
            .official
            .contains(&"socialsekreterare".to_string()));
        assert!(rules.role_keywords.third_party.contains(&"granne".to_string()));
    }

    #[test]
    fn test_partial_masking_strategy() {
        let yaml = r#"
partial_masking:
  strategy: identifying_tokens
  kept_words: [mamma, pappa]
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(
            rules.partial_masking,
            PartialMasking::IdentifyingTokens {
                kept_words: vec!["mamma".to_string(), "pappa".to_string()]
            }
        );
        assert_eq!(RuleSet::default().partial_masking, PartialMasking::Degrade);
    }

    #[test]
    fn test_bundled_rules_load() {
        let rules = RuleSet::osl26().unwrap();
        assert!(!rules.categories.is_empty());
        assert!(rules
            .legal_basis(
                SensitivityCategory::Health,
                SensitivityLevel::High,
                DisclosureAction::MaskComplete
            )
            .is_some());
    }
}
