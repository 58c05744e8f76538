//! Redaction pipeline.
//!
//! This module contains:
//! - Reconciler: Overlap resolution and entity linking
//! - Classifier: Section sensitivity from keyword and judge evidence
//! - Policy: Per-entity and per-section disclosure decisions
//! - Renderer: Offset-safe rewriting and the audit trail
//! - Orchestrator: Sequencing, concurrency, cancellation
//! - Safety, retry, limiter: Input limits and external-call discipline

pub mod classifier;
pub mod limiter;
pub mod orchestrator;
pub mod policy;
pub mod reconciler;
pub mod renderer;
pub mod retry;
pub mod safety;
pub mod sections;

// Re-export commonly used types
pub use classifier::{overall_level, Assertion, ClassifierConfig, SensitivityClassifier};
pub use limiter::ExternalCallLimiter;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use policy::{decide, PolicyConfig, PolicyEngine, PolicyOutcome};
pub use reconciler::{check_no_overlap, Reconciler, ReconcilerConfig, Reconciliation};
pub use renderer::{render, Renderer, Rendering};
pub use retry::{run_with_retry, CallBudget, CallFailure, RetryPolicy};
pub use safety::{InputViolation, SafetyLimits};
pub use sections::split_sections;
