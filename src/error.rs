//! Typed failures for a document.
//!
//! Only conditions that make a redaction untrustworthy end up here. Detector
//! and judge failures become warnings on the result instead.

use thiserror::Error;

use crate::core::safety::InputViolation;

/// An internal consistency check failed; the document must not be released
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("Reconciled entities overlap: {first_start}..{first_end} and {second_start}..{second_end}")]
    OverlappingEntities {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },

    #[error("Edit {start}..{end} out of bounds for text of {len} bytes")]
    OffsetOutOfBounds { start: usize, end: usize, len: usize },

    #[error("Edit {start}..{end} is not on a character boundary")]
    NotCharBoundary { start: usize, end: usize },

    #[error("Entity edits overlap: {first_start}..{first_end} and {second_start}..{second_end}")]
    OverlappingEdits {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },

    #[error("Audit verification failed: {0}")]
    AuditMismatch(String),
}

/// Fatal failure for one document
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InputViolation),

    #[error("Invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Document {document_id} was cancelled")]
    Cancelled { document_id: String },

    #[error("Document {document_id} timed out after {limit_seconds}s")]
    DocumentTimeout {
        document_id: String,
        limit_seconds: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document {document_id} task failed: {reason}")]
    TaskFailed { document_id: String, reason: String },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
