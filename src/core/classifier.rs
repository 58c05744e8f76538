//! Sensitivity classification of sections.
//!
//! Two evidence channels feed every section: keyword rules from the rule
//! set and optional judgments from `SectionJudge`s. Combination is a
//! conservative ceiling: the section level is the highest level any
//! cleared assertion makes, raised further for protected classes, and
//! never lowered. Sections without evidence are still emitted (LOW,
//! NEUTRAL).

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::retry::{CallBudget, CallFailure};
use crate::adapters::{Judgment, SectionJudge};
use crate::config::rules::{EscalationRules, RuleSet};
use crate::domain::{
    Entity, EntityRole, ProtectedClass, SectionBoundary, SectionId, SensitivityCategory,
    SensitivityLevel, SensitivitySection, Warning,
};

/// Classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Assertions below this confidence are recorded as evidence only (default: 0.5)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Confidence of a keyword match (default: 0.9)
    #[serde(default = "default_keyword_confidence")]
    pub keyword_confidence: f64,

    /// Upper bound for derived sections (default: 2000 bytes)
    #[serde(default = "default_max_section_bytes")]
    pub max_section_bytes: usize,
}

fn default_min_confidence() -> f64 {
    0.5
}
fn default_keyword_confidence() -> f64 {
    0.9
}
fn default_max_section_bytes() -> usize {
    2000
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            keyword_confidence: default_keyword_confidence(),
            max_section_bytes: default_max_section_bytes(),
        }
    }
}

/// One channel's claim about a section
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    /// "keyword:<term>" or the judge id
    pub channel: String,
    pub category: Option<SensitivityCategory>,
    pub secondary_categories: Vec<SensitivityCategory>,
    pub level: SensitivityLevel,
    pub confidence: f64,
    pub from_keyword: bool,
    pub rationale: String,
    pub third_party_risk: bool,
}

impl Assertion {
    /// Assertion made by a judge
    pub fn from_judgment(judge_id: &str, judgment: Judgment) -> Self {
        Self {
            channel: judge_id.to_string(),
            category: judgment.category,
            secondary_categories: judgment.secondary_categories,
            level: judgment.level,
            confidence: judgment.confidence,
            from_keyword: false,
            rationale: judgment.rationale,
            third_party_risk: judgment.third_party_risk,
        }
    }

    fn describe(&self, cleared: bool) -> String {
        let category = self.category.map_or("NONE", |c| c.as_str());
        let mut line = format!(
            "{} asserts {}/{} ({:.2})",
            self.channel, category, self.level, self.confidence
        );
        if !self.rationale.is_empty() {
            line.push_str(": ");
            line.push_str(&self.rationale);
        }
        if !cleared {
            line.push_str(" [below threshold]");
        }
        line
    }
}

struct CompiledKeyword {
    term: String,
    pattern: Regex,
    category: Option<SensitivityCategory>,
    level: SensitivityLevel,
}

pub struct SensitivityClassifier {
    config: ClassifierConfig,
    keywords: Vec<CompiledKeyword>,
    escalation: EscalationRules,
    assume_third_party_risk: bool,
}

impl SensitivityClassifier {
    /// Compile the keyword tables of `rules`
    pub fn new(config: ClassifierConfig, rules: &RuleSet) -> Result<Self> {
        let compile = |term: &str| -> Result<Regex> {
            let escaped = regex::escape(term.trim());
            let source = if rules.whole_word_keywords {
                format!(r"\b{}\b", escaped)
            } else {
                escaped
            };
            RegexBuilder::new(&source)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid keyword: {}", term))
        };

        let mut keywords = Vec::new();
        for rule in &rules.categories {
            for term in &rule.keywords {
                keywords.push(CompiledKeyword {
                    term: term.clone(),
                    pattern: compile(term)?,
                    category: Some(rule.category),
                    level: rule.default_level,
                });
            }
        }
        for rule in &rules.keywords {
            let level = rule
                .level
                .or_else(|| rule.category.and_then(|c| rules.category_level(c)))
                .unwrap_or(SensitivityLevel::Medium);
            keywords.push(CompiledKeyword {
                term: rule.term.clone(),
                pattern: compile(&rule.term)?,
                category: rule.category,
                level,
            });
        }

        Ok(Self {
            config,
            keywords,
            escalation: rules.escalation.clone(),
            assume_third_party_risk: true,
        })
    }

    /// Whether a CRITICAL section mentioning a third party is assumed to
    /// put that third party at risk
    pub fn assume_third_party_risk(mut self, assume: bool) -> Self {
        self.assume_third_party_risk = assume;
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Keyword assertions for one section, plus configuration-gap warnings
    pub fn keyword_assertions(
        &self,
        section_text: &str,
        section_id: &SectionId,
    ) -> (Vec<Assertion>, Vec<Warning>) {
        let mut assertions = Vec::new();
        let mut warnings = Vec::new();

        for keyword in &self.keywords {
            if !keyword.pattern.is_match(section_text) {
                continue;
            }
            if keyword.category.is_none() {
                warnings.push(Warning::UnspecifiedKeywordCategory {
                    keyword: keyword.term.clone(),
                    section_id: section_id.clone(),
                });
            }
            assertions.push(Assertion {
                channel: format!("keyword:{}", keyword.term),
                category: keyword.category,
                secondary_categories: Vec::new(),
                level: keyword.level,
                confidence: self.config.keyword_confidence,
                from_keyword: true,
                rationale: String::new(),
                third_party_risk: false,
            });
        }

        (assertions, warnings)
    }

    /// Classify every section with keyword evidence and judge assertions
    /// gathered elsewhere (`judged[i]` belongs to `boundaries[i]`).
    pub fn combine(
        &self,
        text: &str,
        entities: &[Entity],
        boundaries: &[SectionBoundary],
        mut judged: Vec<Vec<Assertion>>,
    ) -> (Vec<SensitivitySection>, Vec<Warning>) {
        judged.resize_with(boundaries.len(), Vec::new);
        let mut warnings = Vec::new();

        let sections = boundaries
            .iter()
            .zip(judged)
            .enumerate()
            .map(|(index, (boundary, judge_assertions))| {
                let id = SectionId::from_index(index);
                let section_text = text.get(boundary.start..boundary.end).unwrap_or_default();
                let (mut assertions, gaps) = self.keyword_assertions(section_text, &id);
                warnings.extend(gaps);
                assertions.extend(judge_assertions);
                self.combine_section(id, *boundary, entities, assertions)
            })
            .collect();

        (sections, warnings)
    }

    fn combine_section(
        &self,
        id: SectionId,
        boundary: SectionBoundary,
        entities: &[Entity],
        assertions: Vec<Assertion>,
    ) -> SensitivitySection {
        let mentioned: Vec<&Entity> = entities
            .iter()
            .filter(|e| e.overlaps_range(boundary.start, boundary.end))
            .collect();
        let affected_entity_ids = mentioned.iter().map(|e| e.entity_id.clone()).collect();
        let protected_classes: BTreeSet<ProtectedClass> = mentioned
            .iter()
            .flat_map(|e| e.protected.iter().copied())
            .collect();

        let mut evidence = Vec::new();
        let mut cleared = Vec::new();
        for assertion in assertions {
            let passes = assertion.confidence >= self.config.min_confidence;
            evidence.push(assertion.describe(passes));
            if passes {
                cleared.push(assertion);
            }
        }

        if cleared.is_empty() {
            evidence.push("no sensitivity evidence".to_string());
            return SensitivitySection {
                id,
                start: boundary.start,
                end: boundary.end,
                category: SensitivityCategory::Neutral,
                secondary_categories: BTreeSet::new(),
                level: SensitivityLevel::Low,
                affected_entity_ids,
                evidence,
                confidence: 0.0,
                protected_classes,
                third_party_risk: false,
            };
        }

        // Ceiling over cleared assertions
        let mut level = cleared
            .iter()
            .map(|a| a.level)
            .max()
            .unwrap_or(SensitivityLevel::Low);
        let confidence = cleared.iter().map(|a| a.confidence).fold(0.0, f64::max);

        // Primary: highest confidence, then higher level, then keyword channel
        let primary = cleared
            .iter()
            .filter(|a| a.category.is_some())
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| a.level.cmp(&b.level))
                    .then_with(|| a.from_keyword.cmp(&b.from_keyword))
            })
            .and_then(|a| a.category)
            .unwrap_or(SensitivityCategory::Neutral);

        let secondary_categories: BTreeSet<SensitivityCategory> = cleared
            .iter()
            .flat_map(|a| a.category.into_iter().chain(a.secondary_categories.iter().copied()))
            .filter(|c| *c != primary && *c != SensitivityCategory::Neutral)
            .collect();

        if !protected_classes.is_empty() && self.escalation.step_up_protected {
            let raised = level.step_up();
            if raised != level {
                evidence.push(format!("protected class mentioned: {} -> {}", level, raised));
                level = raised;
            }
        }

        let minor_floor = protected_classes.contains(&ProtectedClass::Minor)
            && std::iter::once(primary)
                .chain(secondary_categories.iter().copied())
                .any(|c| self.escalation.minor_critical_categories.contains(&c));
        if minor_floor && level < SensitivityLevel::Critical {
            evidence.push(format!("minor in {} passage: {} -> CRITICAL", primary, level));
            level = SensitivityLevel::Critical;
        }

        let third_party_risk = cleared.iter().any(|a| a.third_party_risk)
            || (self.assume_third_party_risk
                && level == SensitivityLevel::Critical
                && mentioned.iter().any(|e| e.role == Some(EntityRole::ThirdParty)));

        SensitivitySection {
            id,
            start: boundary.start,
            end: boundary.end,
            category: primary,
            secondary_categories,
            level,
            affected_entity_ids,
            evidence,
            confidence,
            protected_classes,
            third_party_risk,
        }
    }

    /// Classify sections, asking every judge about every section
    /// concurrently under `budget`.
    ///
    /// A failed judgment degrades to no judgment and a warning. Cancelled
    /// judgments are dropped silently; the caller checks the token.
    pub async fn classify(
        &self,
        text: &str,
        entities: &[Entity],
        boundaries: &[SectionBoundary],
        judges: &[Arc<dyn SectionJudge>],
        budget: CallBudget<'_>,
    ) -> (Vec<SensitivitySection>, Vec<Warning>) {
        let mut judged: Vec<Vec<Assertion>> = vec![Vec::new(); boundaries.len()];
        let mut warnings = Vec::new();

        if !judges.is_empty() {
            let calls = boundaries.iter().enumerate().flat_map(move |(index, boundary)| {
                let section_text = text.get(boundary.start..boundary.end).unwrap_or_default();
                judges.iter().map(move |judge| async move {
                    let outcome = budget
                        .run(judge.id(), judge.is_remote(), || judge.judge(section_text))
                        .await;
                    (index, judge, outcome)
                })
            });

            for (index, judge, outcome) in join_all(calls).await {
                match outcome {
                    Ok(judgment) => judged[index].push(Assertion::from_judgment(judge.id(), judgment)),
                    Err(CallFailure::Exhausted { attempts, reason }) => {
                        let section_id = SectionId::from_index(index);
                        warn!(judge = judge.id(), section = %section_id, attempts, "Section judge degraded");
                        warnings.push(Warning::DegradedJudge {
                            judge: judge.id().to_string(),
                            section_id,
                            reason: format!("{} attempt(s): {}", attempts, reason),
                        });
                    }
                    Err(CallFailure::Cancelled) => {}
                }
            }
        }

        let (sections, gaps) = self.combine(text, entities, boundaries, judged);
        warnings.extend(gaps);
        debug!(sections = sections.len(), judges = judges.len(), "Sections classified");
        (sections, warnings)
    }
}

/// Highest section level, LOW for a document without sections
pub fn overall_level(sections: &[SensitivitySection]) -> SensitivityLevel {
    sections
        .iter()
        .map(|s| s.level)
        .max()
        .unwrap_or(SensitivityLevel::Low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rules::{CategoryRule, KeywordRule};
    use crate::domain::{EntityId, EntityType, Span};

    fn rules() -> RuleSet {
        RuleSet {
            categories: vec![
                CategoryRule {
                    category: SensitivityCategory::Addiction,
                    default_level: SensitivityLevel::High,
                    keywords: vec!["missbruk".to_string()],
                },
                CategoryRule {
                    category: SensitivityCategory::Health,
                    default_level: SensitivityLevel::Medium,
                    keywords: vec!["sjukhus".to_string()],
                },
            ],
            keywords: vec![KeywordRule {
                term: "orosanmälan".to_string(),
                category: None,
                level: Some(SensitivityLevel::High),
            }],
            ..Default::default()
        }
    }

    fn classifier() -> SensitivityClassifier {
        SensitivityClassifier::new(ClassifierConfig::default(), &rules()).unwrap()
    }

    fn whole(text: &str) -> Vec<SectionBoundary> {
        vec![SectionBoundary {
            start: 0,
            end: text.len(),
        }]
    }

    fn entity(text: &str, needle: &str, role: Option<EntityRole>, minor: bool) -> Entity {
        let start = text.find(needle).unwrap();
        let span =
            Span::from_document(text, start, start + needle.len(), "test", 0.9, EntityType::Person)
                .unwrap();
        let mut protected = BTreeSet::new();
        if minor {
            protected.insert(ProtectedClass::Minor);
        }
        Entity {
            span,
            entity_type: EntityType::Person,
            role,
            entity_id: EntityId::for_mention(needle, EntityType::Person),
            protected,
            supporting_sources: Vec::new(),
        }
    }

    fn judge_assertion(
        category: SensitivityCategory,
        level: SensitivityLevel,
        confidence: f64,
    ) -> Assertion {
        Assertion::from_judgment(
            "judge",
            Judgment {
                category: Some(category),
                secondary_categories: Vec::new(),
                level,
                confidence,
                rationale: String::new(),
                third_party_risk: false,
            },
        )
    }

    #[test]
    fn test_no_evidence_defaults_to_low_neutral() {
        let text = "Mötet hölls på tisdagen.";
        let (sections, warnings) = classifier().combine(text, &[], &whole(text), vec![]);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].level, SensitivityLevel::Low);
        assert_eq!(sections[0].category, SensitivityCategory::Neutral);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_keyword_case_insensitive() {
        let text = "MISSBRUK av alkohol.";
        let (sections, _) = classifier().combine(text, &[], &whole(text), vec![]);
        assert_eq!(sections[0].category, SensitivityCategory::Addiction);
        assert_eq!(sections[0].level, SensitivityLevel::High);
    }

    #[test]
    fn test_keyword_and_judge_combined() {
        let text = "Pappan har ett missbruk och bråkar om vårdnaden.";
        let judged = vec![vec![judge_assertion(
            SensitivityCategory::Family,
            SensitivityLevel::Medium,
            0.7,
        )]];

        let (sections, _) = classifier().combine(text, &[], &whole(text), judged);
        let section = &sections[0];
        assert_eq!(section.category, SensitivityCategory::Addiction);
        assert!(section.secondary_categories.contains(&SensitivityCategory::Family));
        assert_eq!(section.level, SensitivityLevel::High);
    }

    #[test]
    fn test_below_threshold_is_evidence_only() {
        let text = "Vanlig text.";
        let judged = vec![vec![judge_assertion(
            SensitivityCategory::Sexual,
            SensitivityLevel::Critical,
            0.2,
        )]];

        let (sections, _) = classifier().combine(text, &[], &whole(text), judged);
        assert_eq!(sections[0].level, SensitivityLevel::Low);
        assert!(sections[0].evidence[0].contains("below threshold"));
    }

    #[test]
    fn test_minor_health_floor_is_critical() {
        let text = "Emma var på sjukhus i maj.";
        let emma = entity(text, "Emma", Some(EntityRole::CaseSubject), true);

        let (sections, _) = classifier().combine(text, &[emma], &whole(text), vec![]);
        assert_eq!(sections[0].level, SensitivityLevel::Critical);
        assert!(sections[0].protected_classes.contains(&ProtectedClass::Minor));
    }

    #[test]
    fn test_protected_step_up_needs_evidence() {
        let text = "Emma gick till skolan.";
        let emma = entity(text, "Emma", None, true);
        let (sections, _) = classifier().combine(text, &[emma], &whole(text), vec![]);
        assert_eq!(sections[0].level, SensitivityLevel::Low);
    }

    #[test]
    fn test_keyword_without_category_warns() {
        let text = "En orosanmälan kom in.";
        let (sections, warnings) = classifier().combine(text, &[], &whole(text), vec![]);
        assert_eq!(sections[0].level, SensitivityLevel::High);
        assert_eq!(sections[0].category, SensitivityCategory::Neutral);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code(), "UNSPECIFIED_KEYWORD_CATEGORY");
    }

    #[test]
    fn test_third_party_risk_assumed_in_critical_section() {
        let text = "Grannen Kalle berättade om missbruk hos Emma.";
        let kalle = entity(text, "Kalle", Some(EntityRole::ThirdParty), false);
        let emma = entity(text, "Emma", Some(EntityRole::CaseSubject), true);

        let (sections, _) = classifier().combine(text, &[kalle.clone(), emma.clone()], &whole(text), vec![]);
        assert_eq!(sections[0].level, SensitivityLevel::Critical);
        assert!(sections[0].third_party_risk);
        assert_eq!(sections[0].affected_entity_ids.len(), 2);

        let cautious = classifier().assume_third_party_risk(false);
        let (sections, _) = cautious.combine(text, &[kalle, emma], &whole(text), vec![]);
        assert!(!sections[0].third_party_risk);
    }

    #[test]
    fn test_whole_word_keywords() {
        let mut rules = rules();
        rules.whole_word_keywords = true;
        let classifier = SensitivityClassifier::new(ClassifierConfig::default(), &rules).unwrap();

        let text = "Alkoholmissbruket minskade.";
        let (sections, _) = classifier.combine(text, &[], &whole(text), vec![]);
        assert_eq!(sections[0].level, SensitivityLevel::Low);
    }

    #[test]
    fn test_overall_level() {
        assert_eq!(overall_level(&[]), SensitivityLevel::Low);
    }
}
