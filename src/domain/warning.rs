//! Warnings attached to a result for human-review triage.
//!
//! A warning never stops a document; fatal conditions are `EngineError`s.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::section::{SectionId, SensitivityCategory, SensitivityLevel};
use super::decision::DisclosureAction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Warning {
    /// Detector produced nothing usable (timeout, unavailable, failed)
    DegradedDetector {
        detector: String,
        attempts: u32,
        reason: String,
    },
    /// Detector output contained spans that failed validation
    MalformedDetectorOutput { detector: String, dropped: usize },
    /// Section judge gave no judgment for a section
    DegradedJudge {
        judge: String,
        section_id: SectionId,
        reason: String,
    },
    /// No legal basis configured for a decision
    UnspecifiedLegalBasis {
        target_id: String,
        category: SensitivityCategory,
        level: SensitivityLevel,
        action: DisclosureAction,
    },
    /// A keyword matched but has no category configured
    UnspecifiedKeywordCategory {
        keyword: String,
        section_id: SectionId,
    },
    /// MASK_PARTIAL had no expressible sub-span and was rendered as MASK_COMPLETE
    PartialMaskDegraded { target_id: String, start: usize, end: usize },
}

impl Warning {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DegradedDetector { .. } => "DEGRADED_DETECTOR",
            Self::MalformedDetectorOutput { .. } => "MALFORMED_DETECTOR_OUTPUT",
            Self::DegradedJudge { .. } => "DEGRADED_JUDGE",
            Self::UnspecifiedLegalBasis { .. } => "UNSPECIFIED_LEGAL_BASIS",
            Self::UnspecifiedKeywordCategory { .. } => "UNSPECIFIED_KEYWORD_CATEGORY",
            Self::PartialMaskDegraded { .. } => "PARTIAL_MASK_DEGRADED",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegradedDetector {
                detector,
                attempts,
                reason,
            } => write!(
                f,
                "detector '{}' degraded after {} attempt(s): {}",
                detector, attempts, reason
            ),
            Self::MalformedDetectorOutput { detector, dropped } => {
                write!(f, "detector '{}' produced {} invalid span(s)", detector, dropped)
            }
            Self::DegradedJudge {
                judge,
                section_id,
                reason,
            } => write!(f, "judge '{}' gave no judgment for {}: {}", judge, section_id, reason),
            Self::UnspecifiedLegalBasis {
                target_id,
                category,
                level,
                action,
            } => write!(
                f,
                "no legal basis configured for {} ({}/{}/{})",
                target_id, category, level, action
            ),
            Self::UnspecifiedKeywordCategory {
                keyword,
                section_id,
            } => write!(f, "keyword '{}' in {} has no category", keyword, section_id),
            Self::PartialMaskDegraded {
                target_id,
                start,
                end,
            } => write!(
                f,
                "partial mask of {} at {}..{} degraded to complete mask",
                target_id, start, end
            ),
        }
    }
}
