//! Resource limits and input validation at the orchestrator boundary.
//!
//! Rejects malformed input before any detector runs:
//! - Empty or oversized text
//! - Page and section ranges outside the text or off char boundaries
//! - Overlapping ranges and excessive section counts
//!
//! Also carries the timeouts and the external-call concurrency cap.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Document, SectionBoundary};

/// Limits applied to every document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum canonical text size in bytes (default: 10MB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Maximum number of sections per document (default: 5000)
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,

    /// Per-attempt timeout for detectors and judges in seconds (default: 60)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// Whole-document timeout in seconds (default: 600 = 10 min)
    #[serde(default = "default_document_timeout")]
    pub document_timeout_seconds: u64,

    /// Simultaneous external model calls across all documents (default: 4)
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_external_calls: usize,
}

fn default_max_input_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB
fn default_max_sections() -> usize {
    5000
}
fn default_call_timeout() -> u64 {
    60
}
fn default_document_timeout() -> u64 {
    600
} // 10 min
fn default_max_concurrent_calls() -> usize {
    4
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            max_sections: default_max_sections(),
            call_timeout_seconds: default_call_timeout(),
            document_timeout_seconds: default_document_timeout(),
            max_concurrent_external_calls: default_max_concurrent_calls(),
        }
    }
}

impl SafetyLimits {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_seconds)
    }

    /// Validate a document against size limits and its own range maps
    pub fn validate_document(&self, document: &Document) -> Result<(), InputViolation> {
        if document.id.trim().is_empty() {
            return Err(InputViolation::EmptyDocumentId);
        }

        if document.text.trim().is_empty() {
            return Err(InputViolation::EmptyText);
        }

        let size = document.text.len() as u64;
        if size > self.max_input_bytes {
            return Err(InputViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }

        let text = &document.text;
        let mut previous_end = 0;
        for page in &document.pages {
            if page.start > page.end || page.end > text.len() {
                return Err(InputViolation::PageOutOfBounds {
                    page: page.number,
                    start: page.start,
                    end: page.end,
                    len: text.len(),
                });
            }
            if !text.is_char_boundary(page.start) || !text.is_char_boundary(page.end) {
                return Err(InputViolation::PageNotCharBoundary { page: page.number });
            }
            if page.start < previous_end {
                return Err(InputViolation::OverlappingPages { page: page.number });
            }
            previous_end = page.end;
        }

        if let Some(sections) = &document.sections {
            self.validate_sections(text, sections)?;
        }

        Ok(())
    }

    /// Validate caller-supplied section boundaries
    pub fn validate_sections(
        &self,
        text: &str,
        sections: &[SectionBoundary],
    ) -> Result<(), InputViolation> {
        self.check_section_count(sections.len())?;

        let mut sorted: Vec<&SectionBoundary> = sections.iter().collect();
        sorted.sort_by_key(|s| (s.start, s.end));

        let mut previous_end = 0;
        for section in sorted {
            if section.start >= section.end || section.end > text.len() {
                return Err(InputViolation::SectionOutOfBounds {
                    start: section.start,
                    end: section.end,
                    len: text.len(),
                });
            }
            if !text.is_char_boundary(section.start) || !text.is_char_boundary(section.end) {
                return Err(InputViolation::SectionNotCharBoundary {
                    start: section.start,
                    end: section.end,
                });
            }
            if section.start < previous_end {
                return Err(InputViolation::OverlappingSections {
                    start: section.start,
                    end: section.end,
                });
            }
            previous_end = section.end;
        }
        Ok(())
    }

    /// Check a section count against the limit
    pub fn check_section_count(&self, count: usize) -> Result<(), InputViolation> {
        if count > self.max_sections {
            return Err(InputViolation::MaxSections {
                actual: count,
                limit: self.max_sections,
            });
        }
        Ok(())
    }
}

/// Malformed input, rejected before any detector runs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputViolation {
    #[error("Document id is empty")]
    EmptyDocumentId,

    #[error("Document text is empty")]
    EmptyText,

    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: u64, limit: u64 },

    #[error("Maximum sections exceeded: {actual} > {limit}")]
    MaxSections { actual: usize, limit: usize },

    #[error("Page {page} range {start}..{end} outside text of {len} bytes")]
    PageOutOfBounds {
        page: u32,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("Page {page} does not start and end on character boundaries")]
    PageNotCharBoundary { page: u32 },

    #[error("Page {page} overlaps the previous page")]
    OverlappingPages { page: u32 },

    #[error("Section range {start}..{end} outside text of {len} bytes")]
    SectionOutOfBounds { start: usize, end: usize, len: usize },

    #[error("Section range {start}..{end} is not on character boundaries")]
    SectionNotCharBoundary { start: usize, end: usize },

    #[error("Section range {start}..{end} overlaps another section")]
    OverlappingSections { start: usize, end: usize },
}
