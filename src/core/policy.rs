//! Disclosure policy: one terminal decision per entity mention and per
//! section.
//!
//! Rules are tried in precedence order and the first match wins:
//!
//! 1. own data of the requester (RELEASE; a CRITICAL own-data section that
//!    puts a third party at risk is MASK_PARTIAL over the third parties)
//! 2. consent (RELEASE)
//! 3. officials, except identifying numbers (RELEASE)
//! 4. CRITICAL or identifying number (MASK_COMPLETE)
//! 5. HIGH (MASK_COMPLETE; MASK_PARTIAL for SELF/PARENT_GUARDIAN without
//!    protected classes)
//! 6. MEDIUM (MASK_PARTIAL)
//! 7. LOW (entity-type default action)

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::rules::{PartialMasking, RuleSet};
use crate::domain::{
    DecisionOrigin, DecisionTarget, DisclosureAction, DisclosureDecision, Entity, EntityRole,
    EntityType, MaskTarget, PolicyRule, RequesterContext, RequesterRelation, SensitivityCategory,
    SensitivityLevel, SensitivitySection, Warning, UNSPECIFIED_LEGAL_BASIS,
};

/// Policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Treat a THIRD_PARTY mention in a CRITICAL section as a third-party
    /// risk even when no judge asserts one (default: true)
    #[serde(default = "default_assume_third_party_risk")]
    pub assume_third_party_risk: bool,
}

fn default_assume_third_party_risk() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            assume_third_party_risk: default_assume_third_party_risk(),
        }
    }
}

/// Decisions plus the configuration gaps found while making them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOutcome {
    /// Entity decisions (by start), then section decisions (by start)
    pub decisions: Vec<DisclosureDecision>,
    pub warnings: Vec<Warning>,
}

/// Decide disclosure for every entity and section.
pub fn decide(
    entities: &[Entity],
    sections: &[SensitivitySection],
    requester: &RequesterContext,
    rules: &RuleSet,
) -> PolicyOutcome {
    PolicyEngine::new(rules, requester).decide(entities, sections)
}

pub struct PolicyEngine<'a> {
    rules: &'a RuleSet,
    requester: &'a RequesterContext,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(rules: &'a RuleSet, requester: &'a RequesterContext) -> Self {
        Self { rules, requester }
    }

    pub fn decide(&self, entities: &[Entity], sections: &[SensitivitySection]) -> PolicyOutcome {
        let mut outcome = PolicyOutcome::default();

        for entity in entities {
            let decision = self.decide_entity(entity, sections);
            self.push(decision, &mut outcome);
        }
        for section in sections {
            let decision = self.decide_section(section, entities);
            self.push(decision, &mut outcome);
        }

        outcome
    }

    fn push(&self, mut decision: DisclosureDecision, outcome: &mut PolicyOutcome) {
        match self
            .rules
            .legal_basis(decision.category, decision.level, decision.action)
        {
            Some(basis) => decision.legal_basis = basis.to_string(),
            None => {
                warn!(
                    target_id = decision.target.id(),
                    category = %decision.category,
                    level = %decision.level,
                    action = %decision.action,
                    "No legal basis configured"
                );
                outcome.warnings.push(Warning::UnspecifiedLegalBasis {
                    target_id: decision.target.id().to_string(),
                    category: decision.category,
                    level: decision.level,
                    action: decision.action,
                });
            }
        }
        outcome.decisions.push(decision);
    }

    /// Requester may see own data: SELF, or party access
    fn has_access(&self) -> bool {
        self.requester.relation == RequesterRelation::SelfSubject
            || self.requester.has_party_access()
    }

    fn is_own(&self, role: Option<EntityRole>) -> bool {
        self.has_access()
            && match role {
                Some(EntityRole::Requester) => true,
                Some(EntityRole::CaseSubject) => self.requester.has_party_access(),
                _ => false,
            }
    }

    /// Rules 1 to 3 for an entity; `Some` means released
    fn release_rule(&self, entity: &Entity) -> Option<(PolicyRule, String)> {
        if self.is_own(entity.role) {
            let whose = match entity.role {
                Some(EntityRole::Requester) => "the requester",
                _ => "the case subject",
            };
            return Some((
                PolicyRule::OwnData,
                format!(
                    "{} mention belongs to {}; requester relation {} has access",
                    entity.entity_type,
                    whose,
                    self.requester.relation.as_str()
                ),
            ));
        }
        if self.requester.consent_entity_ids.contains(&entity.entity_id) {
            return Some((
                PolicyRule::Consent,
                format!("case subject consented to disclosing {}", entity.entity_id),
            ));
        }
        if entity.role == Some(EntityRole::Official) && !entity.entity_type.is_identifying_number() {
            return Some((
                PolicyRule::Official,
                "professional name of an official is public".to_string(),
            ));
        }
        None
    }

    /// Loosened HIGH exception: SELF/PARENT_GUARDIAN and nothing protected.
    /// PUBLIC never qualifies; AUTHORITY uses the table as written.
    fn high_allows_partial(&self, protected: bool) -> bool {
        self.requester.relation.is_close_party() && !protected
    }

    fn decide_entity(&self, entity: &Entity, sections: &[SensitivitySection]) -> DisclosureDecision {
        let context = sections
            .iter()
            .filter(|s| s.overlaps_range(entity.start(), entity.end()))
            .fold(None::<&SensitivitySection>, |best, s| match best {
                Some(b) if b.level >= s.level => Some(b),
                _ => Some(s),
            });
        let level = context.map_or(SensitivityLevel::Low, |s| s.level);
        let category = context.map_or(SensitivityCategory::Neutral, |s| s.category);
        let protected =
            entity.is_protected() || context.map_or(false, |s| !s.protected_classes.is_empty());

        let (rule, action, reason) = if let Some((rule, reason)) = self.release_rule(entity) {
            (rule, DisclosureAction::Release, reason)
        } else if level == SensitivityLevel::Critical || entity.entity_type.is_identifying_number() {
            let reason = if entity.entity_type.is_identifying_number() {
                format!("{} is an identifying number", entity.entity_type)
            } else {
                format!("mention in a CRITICAL {} passage", category)
            };
            (PolicyRule::CriticalOrIdentifier, DisclosureAction::MaskComplete, reason)
        } else if level == SensitivityLevel::High {
            if self.high_allows_partial(protected) {
                (
                    PolicyRule::High,
                    DisclosureAction::MaskPartial,
                    format!(
                        "HIGH {} passage, relation {} without protected class",
                        category,
                        self.requester.relation.as_str()
                    ),
                )
            } else {
                (
                    PolicyRule::High,
                    DisclosureAction::MaskComplete,
                    format!("HIGH {} passage", category),
                )
            }
        } else if level == SensitivityLevel::Medium {
            (
                PolicyRule::Medium,
                DisclosureAction::MaskPartial,
                format!("MEDIUM {} passage", category),
            )
        } else {
            let action = self.rules.default_action(entity.entity_type);
            (
                PolicyRule::LowDefault,
                action,
                format!("LOW level; default for {} is {}", entity.entity_type, action),
            )
        };

        let identifying_spans = (action == DisclosureAction::MaskPartial)
            .then(|| self.identifying_tokens(entity))
            .flatten();

        DisclosureDecision {
            target: DecisionTarget::Entity {
                entity_id: entity.entity_id.clone(),
                entity_type: entity.entity_type,
            },
            start: entity.start(),
            end: entity.end(),
            action,
            level,
            category,
            identifying_spans,
            legal_basis: UNSPECIFIED_LEGAL_BASIS.to_string(),
            reasoning: self.with_purpose(reason),
            decided_from: DecisionOrigin {
                target_id: entity.entity_id.to_string(),
                rule,
            },
        }
    }

    fn decide_section(
        &self,
        section: &SensitivitySection,
        entities: &[Entity],
    ) -> DisclosureDecision {
        let contained: Vec<&Entity> = entities
            .iter()
            .filter(|e| section.contains_range(e.start(), e.end()))
            .collect();
        let mentioned: Vec<&Entity> = entities
            .iter()
            .filter(|e| section.affected_entity_ids.contains(&e.entity_id))
            .collect();
        // Sub-spans for MASK_PARTIAL: everything not released by rules 1-3
        let masked_entities = || -> Vec<MaskTarget> {
            contained
                .iter()
                .filter(|e| self.release_rule(e).is_none())
                .map(|e| MaskTarget {
                    start: e.start(),
                    end: e.end(),
                    entity_type: e.entity_type,
                })
                .collect()
        };

        let own = mentioned.iter().any(|e| self.is_own(e.role));
        let consented = !mentioned.is_empty()
            && mentioned
                .iter()
                .all(|e| self.requester.consent_entity_ids.contains(&e.entity_id));
        let protected = !section.protected_classes.is_empty();
        let level = section.level;
        let category = section.category;

        let (rule, action, reason, spans) = if own {
            if level == SensitivityLevel::Critical && section.third_party_risk {
                (
                    PolicyRule::OwnDataThirdParty,
                    DisclosureAction::MaskPartial,
                    "requester's own data in a CRITICAL passage that puts a third party at risk; \
                     third-party identities masked"
                        .to_string(),
                    Some(masked_entities()),
                )
            } else {
                (
                    PolicyRule::OwnData,
                    DisclosureAction::Release,
                    format!(
                        "passage about the requester's own case; relation {} has access",
                        self.requester.relation.as_str()
                    ),
                    None,
                )
            }
        } else if consented {
            (
                PolicyRule::Consent,
                DisclosureAction::Release,
                "every person mentioned consented to disclosure".to_string(),
                None,
            )
        } else if level == SensitivityLevel::Critical {
            (
                PolicyRule::CriticalOrIdentifier,
                DisclosureAction::MaskComplete,
                format!("CRITICAL {} passage", category),
                None,
            )
        } else if level == SensitivityLevel::High {
            if self.high_allows_partial(protected) {
                (
                    PolicyRule::High,
                    DisclosureAction::MaskPartial,
                    format!(
                        "HIGH {} passage, relation {}; identities masked",
                        category,
                        self.requester.relation.as_str()
                    ),
                    Some(masked_entities()),
                )
            } else {
                (
                    PolicyRule::High,
                    DisclosureAction::MaskComplete,
                    format!("HIGH {} passage", category),
                    None,
                )
            }
        } else if level == SensitivityLevel::Medium {
            (
                PolicyRule::Medium,
                DisclosureAction::MaskPartial,
                format!("MEDIUM {} passage; identities masked", category),
                Some(masked_entities()),
            )
        } else {
            (
                PolicyRule::LowDefault,
                DisclosureAction::Release,
                "no sensitive content found".to_string(),
                None,
            )
        };

        DisclosureDecision {
            target: DecisionTarget::Section {
                section_id: section.id.clone(),
                category,
            },
            start: section.start,
            end: section.end,
            action,
            level,
            category,
            identifying_spans: spans,
            legal_basis: UNSPECIFIED_LEGAL_BASIS.to_string(),
            reasoning: self.with_purpose(reason),
            decided_from: DecisionOrigin {
                target_id: section.id.to_string(),
                rule,
            },
        }
    }

    /// Identifying sub-spans of an entity under the configured strategy.
    ///
    /// `None` means no sub-span can be expressed; the renderer then masks
    /// the whole entity.
    fn identifying_tokens(&self, entity: &Entity) -> Option<Vec<MaskTarget>> {
        let PartialMasking::IdentifyingTokens { kept_words } = &self.rules.partial_masking else {
            return None;
        };
        let text = entity.text();
        let base = entity.start();

        if entity.entity_type == EntityType::Email {
            let at = text.find('@').filter(|&i| i > 0)?;
            return Some(vec![MaskTarget {
                start: base,
                end: base + at,
                entity_type: entity.entity_type,
            }]);
        }

        let mut targets = Vec::new();
        let mut offset = 0;
        for token in text.split_whitespace() {
            let Some(pos) = text[offset..].find(token) else {
                continue;
            };
            let start = offset + pos;
            offset = start + token.len();

            let word = token.trim_matches(|c: char| !c.is_alphanumeric());
            let lowered = word.to_lowercase();
            let kept = kept_words.iter().any(|k| k.to_lowercase() == lowered);
            let identifying = word.chars().next().map_or(false, char::is_uppercase)
                || word.chars().any(|c| c.is_ascii_digit());
            if identifying && !kept {
                targets.push(MaskTarget {
                    start: base + start,
                    end: base + start + token.len(),
                    entity_type: entity.entity_type,
                });
            }
        }

        (!targets.is_empty()).then_some(targets)
    }

    fn with_purpose(&self, reason: String) -> String {
        match &self.requester.stated_purpose {
            Some(purpose) => format!("{} (stated purpose, advisory: {})", reason, purpose),
            None => reason,
        }
    }
}
