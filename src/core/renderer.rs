//! Redaction renderer: apply masking decisions to the original text.
//!
//! Edits are applied right to left so replacements of any length never shift
//! the offsets of edits still to come. Every non-RELEASE decision gets one
//! audit entry; the trail is returned ascending by original offset.

use tracing::warn;

use crate::audit::{compute_entry_id, compute_hash, AuditEntry, Replacement};
use crate::config::rules::Placeholders;
use crate::domain::{
    DecisionTarget, DisclosureAction, DisclosureDecision, Document, MaskTarget, Warning,
};
use crate::error::InvariantViolation;
use crate::text::offset_to_line_col;

/// Redacted text plus its audit trail
#[derive(Debug, Clone, PartialEq)]
pub struct Rendering {
    pub redacted_text: String,
    /// Ascending by original start
    pub audit_trail: Vec<AuditEntry>,
    pub warnings: Vec<Warning>,
}

/// Render `decisions` over `document.text` with the given placeholders.
pub fn render(
    document: &Document,
    decisions: &[DisclosureDecision],
    placeholders: &Placeholders,
) -> Result<Rendering, InvariantViolation> {
    Renderer::new(placeholders).render(document, decisions)
}

/// Which decision an edit came from, and how coarse it is.
///
/// For identical ranges the lower rank wins: an entity's own placeholder is
/// preferred over a section sub-span, which is preferred over a section mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EditRank {
    Entity,
    SectionSubSpan,
    Section,
}

#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    end: usize,
    placeholder: String,
    /// Index into the entry list
    entry: usize,
    rank: EditRank,
    covered_by: Option<usize>,
}

impl Edit {
    fn contains(&self, other: &Edit) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    fn overlaps(&self, other: &Edit) -> bool {
        self.start < other.end && other.start < self.end
    }
}

struct PendingEntry<'d> {
    entry_id: String,
    decision: &'d DisclosureDecision,
    applied_action: DisclosureAction,
    degraded: bool,
}

pub struct Renderer<'a> {
    placeholders: &'a Placeholders,
}

impl<'a> Renderer<'a> {
    pub fn new(placeholders: &'a Placeholders) -> Self {
        Self { placeholders }
    }

    pub fn render(
        &self,
        document: &Document,
        decisions: &[DisclosureDecision],
    ) -> Result<Rendering, InvariantViolation> {
        let text = document.text.as_str();
        let mut entries = Vec::new();
        let mut edits = Vec::new();
        let mut warnings = Vec::new();

        for decision in decisions {
            if decision.action == DisclosureAction::Release {
                continue;
            }
            check_range(text, decision.start, decision.end)?;

            let index = entries.len();
            let entry_id = compute_entry_id(
                &document.id,
                decision.target.id(),
                decision.decided_from.rule.as_str(),
                (decision.start, decision.end),
            );

            let mut degraded = false;
            match (decision.action, &decision.identifying_spans) {
                (DisclosureAction::MaskPartial, Some(targets))
                    if !targets.is_empty() || decision.target.is_section() =>
                {
                    let rank = match decision.target {
                        DecisionTarget::Entity { .. } => EditRank::Entity,
                        DecisionTarget::Section { .. } => EditRank::SectionSubSpan,
                    };
                    for target in targets {
                        check_sub_span(text, decision, target)?;
                        edits.push(Edit {
                            start: target.start,
                            end: target.end,
                            placeholder: self.placeholders.for_entity(target.entity_type),
                            entry: index,
                            rank,
                            covered_by: None,
                        });
                    }
                }
                (action, _) => {
                    if action == DisclosureAction::MaskPartial {
                        degraded = true;
                        warn!(
                            target_id = decision.target.id(),
                            start = decision.start,
                            end = decision.end,
                            "Partial mask has no identifying sub-span, masking completely"
                        );
                        warnings.push(Warning::PartialMaskDegraded {
                            target_id: decision.target.id().to_string(),
                            start: decision.start,
                            end: decision.end,
                        });
                    }
                    if decision.start < decision.end {
                        edits.push(self.full_edit(decision, index));
                    }
                }
            }

            entries.push(PendingEntry {
                entry_id,
                decision,
                applied_action: if degraded {
                    DisclosureAction::MaskComplete
                } else {
                    decision.action
                },
                degraded,
            });
        }

        widen_sections(&mut edits);
        resolve_nesting(&mut edits)?;

        // Right to left over the applied edits; offsets to the left stay valid
        let mut redacted = text.to_string();
        let mut order: Vec<usize> = (0..edits.len())
            .filter(|&i| edits[i].covered_by.is_none())
            .collect();
        order.sort_by(|&a, &b| edits[b].start.cmp(&edits[a].start));
        for &i in &order {
            let edit = &edits[i];
            redacted.replace_range(edit.start..edit.end, &edit.placeholder);
        }

        let mut replacements: Vec<Vec<Replacement>> = vec![Vec::new(); entries.len()];
        for edit in &edits {
            let original = &text[edit.start..edit.end];
            replacements[edit.entry].push(Replacement {
                start: edit.start,
                end: edit.end,
                original: original.to_string(),
                original_sha256: compute_hash(original.as_bytes()),
                placeholder: edit.placeholder.clone(),
                covered_by: edit.covered_by.map(|i| entries[i].entry_id.clone()),
                line_col: offset_to_line_col(text, edit.start),
                page: document.page_for_offset(edit.start),
            });
        }

        let mut audit_trail: Vec<AuditEntry> = entries
            .into_iter()
            .zip(replacements)
            .map(|(pending, mut replacements)| {
                replacements.sort_by_key(|r| (r.start, r.end));
                AuditEntry {
                    entry_id: pending.entry_id,
                    decision: pending.decision.clone(),
                    applied_action: pending.applied_action,
                    degraded: pending.degraded,
                    replacements,
                }
            })
            .collect();
        audit_trail.sort_by_key(|e| (e.start(), e.end()));

        Ok(Rendering {
            redacted_text: redacted,
            audit_trail,
            warnings,
        })
    }

    fn full_edit(&self, decision: &DisclosureDecision, entry: usize) -> Edit {
        let (placeholder, rank) = match &decision.target {
            DecisionTarget::Entity { entity_type, .. } => {
                (self.placeholders.for_entity(*entity_type), EditRank::Entity)
            }
            DecisionTarget::Section { category, .. } => {
                (self.placeholders.for_section(*category), EditRank::Section)
            }
        };
        Edit {
            start: decision.start,
            end: decision.end,
            placeholder,
            entry,
            rank,
            covered_by: None,
        }
    }
}

fn check_range(text: &str, start: usize, end: usize) -> Result<(), InvariantViolation> {
    if start > end || end > text.len() {
        return Err(InvariantViolation::OffsetOutOfBounds {
            start,
            end,
            len: text.len(),
        });
    }
    if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
        return Err(InvariantViolation::NotCharBoundary { start, end });
    }
    Ok(())
}

fn check_sub_span(
    text: &str,
    decision: &DisclosureDecision,
    target: &MaskTarget,
) -> Result<(), InvariantViolation> {
    check_range(text, target.start, target.end)?;
    if target.start >= target.end || target.start < decision.start || target.end > decision.end {
        return Err(InvariantViolation::OffsetOutOfBounds {
            start: target.start,
            end: target.end,
            len: text.len(),
        });
    }
    Ok(())
}

/// Grow whole-section edits over any edit that straddles their boundary.
///
/// Ranges only grow and are bounded by the text, so this terminates.
fn widen_sections(edits: &mut [Edit]) {
    loop {
        let mut changed = false;
        for i in 0..edits.len() {
            if edits[i].rank != EditRank::Section {
                continue;
            }
            for j in 0..edits.len() {
                if i == j {
                    continue;
                }
                let (section, other) = (&edits[i], &edits[j]);
                if section.overlaps(other) && !section.contains(other) && !other.contains(section)
                {
                    let start = section.start.min(other.start);
                    let end = section.end.max(other.end);
                    edits[i].start = start;
                    edits[i].end = end;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Mark edits nested in a coarser applied edit as covered.
///
/// After widening, a partial overlap can only be between two entity-level
/// edits, which means the decisions are inconsistent.
fn resolve_nesting(edits: &mut [Edit]) -> Result<(), InvariantViolation> {
    let mut order: Vec<usize> = (0..edits.len()).collect();
    order.sort_by(|&a, &b| {
        let (ea, eb) = (&edits[a], &edits[b]);
        ea.start
            .cmp(&eb.start)
            .then(eb.end.cmp(&ea.end))
            .then(ea.rank.cmp(&eb.rank))
            .then(ea.entry.cmp(&eb.entry))
    });

    let mut cover: Option<usize> = None;
    for i in order {
        match cover {
            Some(c) if edits[c].contains(&edits[i]) => {
                edits[i].covered_by = Some(edits[c].entry);
            }
            Some(c) if edits[c].overlaps(&edits[i]) => {
                return Err(InvariantViolation::OverlappingEdits {
                    first_start: edits[c].start,
                    first_end: edits[c].end,
                    second_start: edits[i].start,
                    second_end: edits[i].end,
                });
            }
            _ => cover = Some(i),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        DecisionOrigin, EntityId, EntityType, PageRange, PolicyRule, SectionId,
        SensitivityCategory, SensitivityLevel,
    };

    fn entity_decision(
        text: &str,
        needle: &str,
        entity_type: EntityType,
        action: DisclosureAction,
    ) -> DisclosureDecision {
        let start = text.find(needle).unwrap();
        let id = EntityId::for_mention(needle, entity_type);
        DisclosureDecision {
            target: DecisionTarget::Entity {
                entity_id: id.clone(),
                entity_type,
            },
            start,
            end: start + needle.len(),
            action,
            level: SensitivityLevel::Low,
            category: SensitivityCategory::Neutral,
            identifying_spans: None,
            legal_basis: "OSL 26:1".to_string(),
            reasoning: "test".to_string(),
            decided_from: DecisionOrigin {
                target_id: id.to_string(),
                rule: PolicyRule::CriticalOrIdentifier,
            },
        }
    }

    fn section_decision(start: usize, end: usize, action: DisclosureAction) -> DisclosureDecision {
        let id = SectionId::from_index(0);
        DisclosureDecision {
            target: DecisionTarget::Section {
                section_id: id.clone(),
                category: SensitivityCategory::Health,
            },
            start,
            end,
            action,
            level: SensitivityLevel::High,
            category: SensitivityCategory::Health,
            identifying_spans: None,
            legal_basis: "OSL 26:1".to_string(),
            reasoning: "test".to_string(),
            decided_from: DecisionOrigin {
                target_id: id.to_string(),
                rule: PolicyRule::High,
            },
        }
    }

    fn doc(text: &str) -> Document {
        Document::new("doc-1", text)
    }

    #[test]
    fn test_kontakt_scenario() {
        let text = "Kontakt: 070-123 45 67, persnr 19850615-1234.";
        let decisions = vec![
            entity_decision(text, "070-123 45 67", EntityType::Phone, DisclosureAction::MaskComplete),
            entity_decision(text, "19850615-1234", EntityType::Ssn, DisclosureAction::MaskComplete),
        ];

        let rendering = render(&doc(text), &decisions, &Placeholders::default()).unwrap();
        assert_eq!(
            rendering.redacted_text,
            "Kontakt: <TELEFON>, persnr <PERSONNUMMER>."
        );
        assert_eq!(rendering.audit_trail.len(), 2);
        assert!(rendering.audit_trail[0].start() < rendering.audit_trail[1].start());
        assert_eq!(rendering.audit_trail[1].replacements[0].original, "19850615-1234");
    }

    #[test]
    fn test_release_only_is_identity() {
        let text = "Anna ringde.";
        let decisions = vec![entity_decision(text, "Anna", EntityType::Person, DisclosureAction::Release)];
        let rendering = render(&doc(text), &decisions, &Placeholders::default()).unwrap();
        assert_eq!(rendering.redacted_text, text);
        assert!(rendering.audit_trail.is_empty());
    }

    #[test]
    fn test_boundary_positions() {
        let text = "Anna och Kalle";
        let decisions = vec![
            entity_decision(text, "Anna", EntityType::Person, DisclosureAction::MaskComplete),
            entity_decision(text, "Kalle", EntityType::Person, DisclosureAction::MaskComplete),
        ];
        let rendering = render(&doc(text), &decisions, &Placeholders::default()).unwrap();
        assert_eq!(rendering.redacted_text, "<PERSON> och <PERSON>");
        assert_eq!(rendering.audit_trail[1].replacements[0].end, text.len());
    }

    #[test]
    fn test_adjacent_edits() {
        let text = "AnnaKalle";
        let mut first = entity_decision(text, "Anna", EntityType::Person, DisclosureAction::MaskComplete);
        first.end = 4;
        let second = entity_decision(text, "Kalle", EntityType::Person, DisclosureAction::MaskComplete);
        let rendering = render(&doc(text), &[second, first], &Placeholders::default()).unwrap();
        assert_eq!(rendering.redacted_text, "<PERSON><PERSON>");
    }

    #[test]
    fn test_partial_without_sub_span_degrades() {
        let text = "mamma Lisa";
        let decision = entity_decision(text, "mamma Lisa", EntityType::Person, DisclosureAction::MaskPartial);
        let rendering = render(&doc(text), &[decision], &Placeholders::default()).unwrap();

        assert_eq!(rendering.redacted_text, "<PERSON>");
        let entry = &rendering.audit_trail[0];
        assert!(entry.degraded);
        assert_eq!(entry.applied_action, DisclosureAction::MaskComplete);
        assert_eq!(rendering.warnings[0].code(), "PARTIAL_MASK_DEGRADED");
    }

    #[test]
    fn test_partial_with_sub_span() {
        let text = "mamma Lisa";
        let mut decision =
            entity_decision(text, "mamma Lisa", EntityType::Person, DisclosureAction::MaskPartial);
        decision.identifying_spans = Some(vec![MaskTarget {
            start: 6,
            end: 10,
            entity_type: EntityType::Person,
        }]);
        let rendering = render(&doc(text), &[decision], &Placeholders::default()).unwrap();
        assert_eq!(rendering.redacted_text, "mamma <PERSON>");
        assert!(rendering.warnings.is_empty());
    }

    #[test]
    fn test_section_partial_with_nothing_identifying_is_audited() {
        let text = "Hon mår bra.";
        let mut decision = section_decision(0, text.len(), DisclosureAction::MaskPartial);
        decision.identifying_spans = Some(Vec::new());
        let rendering = render(&doc(text), &[decision], &Placeholders::default()).unwrap();
        assert_eq!(rendering.redacted_text, text);
        assert_eq!(rendering.audit_trail.len(), 1);
        assert!(rendering.audit_trail[0].replacements.is_empty());
    }

    #[test]
    fn test_entity_inside_masked_section_is_covered() {
        let text = "Intro. Kalle har diabetes. Slut.";
        let start = text.find("Kalle").unwrap();
        let end = text.find(" Slut").unwrap();
        let decisions = vec![
            entity_decision(text, "Kalle", EntityType::Person, DisclosureAction::MaskComplete),
            section_decision(start, end, DisclosureAction::MaskComplete),
        ];
        let rendering = render(&doc(text), &decisions, &Placeholders::default()).unwrap();
        assert_eq!(rendering.redacted_text, "Intro. <SEKTION: HEALTH> Slut.");

        let section_entry = rendering
            .audit_trail
            .iter()
            .find(|e| e.decision.target.is_section())
            .unwrap();
        let entity_entry = rendering
            .audit_trail
            .iter()
            .find(|e| !e.decision.target.is_section())
            .unwrap();
        assert_eq!(
            entity_entry.replacements[0].covered_by.as_deref(),
            Some(section_entry.entry_id.as_str())
        );
    }

    #[test]
    fn test_straddling_entity_widens_section() {
        let text = "Kalle Berg har diabetes.";
        let section_start = text.find("Berg").unwrap();
        let decisions = vec![
            entity_decision(text, "Kalle Berg", EntityType::Person, DisclosureAction::MaskComplete),
            section_decision(section_start, text.len(), DisclosureAction::MaskComplete),
        ];
        let rendering = render(&doc(text), &decisions, &Placeholders::default()).unwrap();
        assert_eq!(rendering.redacted_text, "<SEKTION: HEALTH>");
        assert!(!rendering.redacted_text.contains("Kalle"));
    }

    #[test]
    fn test_overlapping_entity_edits_fail() {
        let text = "Anna Berg";
        let first = entity_decision(text, "Anna Berg", EntityType::Person, DisclosureAction::MaskComplete);
        let mut second = entity_decision(text, "Berg", EntityType::Person, DisclosureAction::MaskComplete);
        second.start = 2;
        let result = render(&doc(text), &[first.clone(), second], &Placeholders::default());
        // Second is contained in the first, so it is covered, not an error
        assert!(result.is_ok());

        let mut third = entity_decision(text, "Anna", EntityType::Person, DisclosureAction::MaskComplete);
        third.end = 6;
        let mut fourth = entity_decision(text, "Berg", EntityType::Person, DisclosureAction::MaskComplete);
        fourth.start = 3;
        let result = render(&doc(text), &[third, fourth], &Placeholders::default());
        assert!(matches!(result, Err(InvariantViolation::OverlappingEdits { .. })));
    }

    #[test]
    fn test_offsets_validated() {
        let text = "Åsa";
        let mut decision = entity_decision(text, "Åsa", EntityType::Person, DisclosureAction::MaskComplete);
        decision.end = 1;
        let result = render(&doc(text), &[decision.clone()], &Placeholders::default());
        assert!(matches!(result, Err(InvariantViolation::NotCharBoundary { .. })));

        decision.end = 10;
        let result = render(&doc(text), &[decision], &Placeholders::default());
        assert!(matches!(result, Err(InvariantViolation::OffsetOutOfBounds { .. })));
    }

    #[test]
    fn test_pages_and_line_col_recorded() {
        let text = "Rad ett\nAnna";
        let document = doc(text).with_pages(vec![
            PageRange { number: 1, start: 0, end: 8 },
            PageRange { number: 2, start: 8, end: text.len() },
        ]);
        let decision = entity_decision(text, "Anna", EntityType::Person, DisclosureAction::MaskComplete);
        let rendering = render(&document, &[decision], &Placeholders::default()).unwrap();
        let replacement = &rendering.audit_trail[0].replacements[0];
        assert_eq!(replacement.page, Some(2));
        assert_eq!(replacement.line_col.line, 2);
        assert_eq!(replacement.line_col.col, 1);
    }

    #[test]
    fn test_trail_verifies() {
        let text = "Kontakt: 070-123 45 67, persnr 19850615-1234.";
        let decisions = vec![
            entity_decision(text, "070-123 45 67", EntityType::Phone, DisclosureAction::MaskComplete),
            entity_decision(text, "19850615-1234", EntityType::Ssn, DisclosureAction::MaskComplete),
        ];
        let rendering = render(&doc(text), &decisions, &Placeholders::default()).unwrap();
        crate::audit::verify_trail(text, &rendering.redacted_text, &rendering.audit_trail).unwrap();
    }
}
