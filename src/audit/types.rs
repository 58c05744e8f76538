//! Audit trail record types.

use serde::{Deserialize, Serialize};

use crate::domain::{DisclosureAction, DisclosureDecision};
use crate::text::LineCol;

/// One literal substitution in the original text.
///
/// `original` is the only place masked text survives; the redacted text
/// never contains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replacement {
    pub start: usize,
    pub end: usize,
    pub original: String,
    /// "sha256:<hex>" of `original`
    pub original_sha256: String,
    pub placeholder: String,
    /// Entry id of the coarser edit that already masks this range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covered_by: Option<String>,
    pub line_col: LineCol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl Replacement {
    /// Whether this replacement was written to the redacted text itself
    pub fn is_applied(&self) -> bool {
        self.covered_by.is_none()
    }
}

/// Audit record for one non-RELEASE decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Deterministic id (see `digest::compute_entry_id`)
    pub entry_id: String,
    pub decision: DisclosureDecision,
    /// Action as rendered; differs from the decision when a partial mask degraded
    pub applied_action: DisclosureAction,
    #[serde(default)]
    pub degraded: bool,
    /// Ascending by start; empty for a partial mask with nothing identifying
    pub replacements: Vec<Replacement>,
}

impl AuditEntry {
    pub fn start(&self) -> usize {
        self.decision.start
    }

    pub fn end(&self) -> usize {
        self.decision.end
    }
}
