//! Domain types for the redaction engine.
//!
//! This module contains the core data structures:
//! - Span/Entity: Detector output and reconciled, linked mentions
//! - Section: Classified text regions
//! - Requester: Who asks for the document
//! - Decision: Per-target disclosure decisions
//! - Result: Analysis and redaction results, warnings

pub mod decision;
pub mod document;
pub mod requester;
pub mod result;
pub mod section;
pub mod span;
pub mod warning;

// Re-export commonly used types
pub use decision::{
    DecisionOrigin, DecisionTarget, DisclosureAction, DisclosureDecision, MaskTarget, PolicyRule,
    UNSPECIFIED_LEGAL_BASIS,
};
pub use document::{Document, PageRange, PartyHint, SectionBoundary};
pub use requester::{RequesterContext, RequesterRelation};
pub use result::{Analysis, RedactionResult, RunStats};
pub use section::{SectionId, SensitivityCategory, SensitivityLevel, SensitivitySection};
pub use span::{
    mention_key, normalize_mention, DetectorKind, Entity, EntityId, EntityRole, EntityType,
    ProtectedClass, Span, SpanConflict,
};
pub use warning::Warning;
