//! menprov - Redaction engine for case documents
//!
//! Finds personal data and sensitive passages in a document, decides per
//! mention and per passage what a given requester may see, and renders a
//! redacted text with a verifiable audit trail.
//!
//! # Architecture
//!
//! The pipeline for one document:
//! - Detectors (patterns, name dictionary, NER model, LLM) propose spans
//! - The reconciler resolves overlaps and links mentions into entities
//! - The classifier grades sections by keyword and judge evidence
//! - The policy engine decides RELEASE / MASK_PARTIAL / MASK_COMPLETE
//! - The renderer rewrites the text right to left and records every edit
//!
//! # Modules
//!
//! - `adapters`: Detector and section-judge contracts plus implementations
//! - `core`: Pipeline stages and the orchestrator
//! - `domain`: Data structures (Span, Entity, Section, Decision, Result)
//! - `audit`: Digests, entry ids and audit-trail verification
//! - `config`: Engine configuration and the declarative rule set
//!
//! # Usage
//!
//! ```no_run
//! use menprov::{Document, Orchestrator, RequesterContext, RequesterRelation};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let orchestrator = Orchestrator::builder().with_default_detectors()?.build()?;
//! let document = Document::new("case-17", "Kontakt: 070-123 45 67.");
//! let requester = RequesterContext::new(RequesterRelation::Public);
//! let result = orchestrator.redact(&document, &requester).await?;
//! println!("{}", result.redacted_text);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod audit;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod text;

// Re-export main types at crate root for convenience
pub use crate::adapters::{Detector, SectionJudge, SpanSource};
pub use crate::config::rules::RuleSet;
pub use crate::config::EngineConfig;
pub use crate::core::{Orchestrator, OrchestratorBuilder};
pub use crate::domain::{
    Analysis, DisclosureAction, DisclosureDecision, Document, Entity, EntityId, EntityRole,
    EntityType, RedactionResult, RequesterContext, RequesterRelation, SensitivityCategory,
    SensitivityLevel, SensitivitySection, Span, Warning,
};
pub use crate::error::{EngineError, EngineResult, InvariantViolation};
