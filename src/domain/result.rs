//! Analysis and redaction results handed back to the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{self, AuditEntry};
use crate::error::InvariantViolation;

use super::decision::{DisclosureAction, DisclosureDecision};
use super::section::{SensitivityLevel, SensitivitySection};
use super::span::{Entity, EntityType, SpanConflict};
use super::warning::Warning;

/// Everything decided about a document, before rendering.
///
/// A review UI may edit `decisions` and hand the analysis back for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub document_id: String,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub entities: Vec<Entity>,
    pub sections: Vec<SensitivitySection>,
    pub decisions: Vec<DisclosureDecision>,
    #[serde(default)]
    pub conflicts: Vec<SpanConflict>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    pub overall_level: SensitivityLevel,
    /// Digest of the text the offsets refer to
    pub source_sha256: String,
}

impl Analysis {
    /// Decisions for one target, in document order
    pub fn decisions_for<'a>(
        &'a self,
        target_id: &'a str,
    ) -> impl Iterator<Item = &'a DisclosureDecision> + 'a {
        self.decisions
            .iter()
            .filter(move |d| d.target.id() == target_id)
    }
}

/// Counts gathered over one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub entities_by_type: BTreeMap<EntityType, usize>,
    pub sections_by_level: BTreeMap<SensitivityLevel, usize>,
    pub decisions_by_action: BTreeMap<DisclosureAction, usize>,
    /// Bytes of original text replaced by placeholders
    pub masked_bytes: usize,
    /// `masked_bytes` over the original text length
    pub masking_ratio: f64,
}

impl RunStats {
    pub fn compute(
        text_len: usize,
        entities: &[Entity],
        sections: &[SensitivitySection],
        decisions: &[DisclosureDecision],
        trail: &[AuditEntry],
    ) -> Self {
        let mut stats = Self::default();
        for entity in entities {
            *stats.entities_by_type.entry(entity.entity_type).or_default() += 1;
        }
        for section in sections {
            *stats.sections_by_level.entry(section.level).or_default() += 1;
        }
        for decision in decisions {
            *stats.decisions_by_action.entry(decision.action).or_default() += 1;
        }
        stats.masked_bytes = trail
            .iter()
            .flat_map(|e| e.replacements.iter())
            .filter(|r| r.is_applied())
            .map(|r| r.end - r.start)
            .sum();
        stats.masking_ratio = if text_len == 0 {
            0.0
        } else {
            stats.masked_bytes as f64 / text_len as f64
        };
        stats
    }

    pub fn masked_count(&self) -> usize {
        self.decisions_by_action
            .iter()
            .filter(|(action, _)| action.is_masking())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn released_count(&self) -> usize {
        self.decisions_by_action
            .get(&DisclosureAction::Release)
            .copied()
            .unwrap_or(0)
    }
}

/// Final artifact for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionResult {
    pub document_id: String,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub redacted_text: String,
    /// Ascending by original start offset
    pub audit_trail: Vec<AuditEntry>,
    pub decisions: Vec<DisclosureDecision>,
    pub entities: Vec<Entity>,
    pub sections: Vec<SensitivitySection>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    pub overall_level: SensitivityLevel,
    pub stats: RunStats,
    pub source_sha256: String,
    pub redacted_sha256: String,
}

impl RedactionResult {
    /// True when nothing degraded and no configuration gap was hit.
    ///
    /// A result with warnings is best-effort and needs human review.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Re-derive the redacted text from `original` and the audit trail.
    pub fn verify(&self, original: &str) -> Result<(), InvariantViolation> {
        if audit::compute_hash(original.as_bytes()) != self.source_sha256 {
            return Err(InvariantViolation::AuditMismatch(
                "source digest does not match the supplied original".to_string(),
            ));
        }
        audit::verify_trail(original, &self.redacted_text, &self.audit_trail)?;
        if audit::compute_hash(self.redacted_text.as_bytes()) != self.redacted_sha256 {
            return Err(InvariantViolation::AuditMismatch(
                "redacted digest does not match the redacted text".to_string(),
            ));
        }
        Ok(())
    }
}
