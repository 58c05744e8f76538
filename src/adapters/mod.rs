//! Detector interfaces and concrete detectors.
//!
//! Every detector, whether pattern, dictionary, statistical model or LLM,
//! is wrapped behind the same `Detector` contract. The reconciler only ever
//! sees validated `Span`s and never branches on detector identity.

pub mod dictionary;
pub mod llm;
pub mod model;
pub mod pattern;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{DetectorKind, SensitivityCategory, SensitivityLevel, Span};
use crate::text::is_valid_range;

// Re-export the concrete detectors
pub use dictionary::NameDictionaryDetector;
pub use llm::{LlmClient, LlmConfig, LlmMentionDetector, LlmSectionJudge};
pub use model::{NerModelConfig, NerModelDetector};
pub use pattern::{
    AddressDetector, DateDetector, EmailDetector, IpAddressDetector, NationalIdDetector,
    PhoneDetector,
};

/// Trait for entity/phrase detectors
#[async_trait]
pub trait Detector: Send + Sync {
    /// Native output of the detector, before adaptation
    type Raw: Send;

    /// Source id recorded on every span (e.g. "pattern:phone")
    fn id(&self) -> &str;

    /// Detector family
    fn kind(&self) -> DetectorKind;

    /// Whether detection calls an external service
    fn is_remote(&self) -> bool {
        matches!(self.kind(), DetectorKind::Model | DetectorKind::Llm)
    }

    /// Run the detector over the canonical text
    async fn detect(&self, text: &str) -> Result<Self::Raw>;

    /// Turn raw output into spans over `text`
    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span>;
}

/// Validated spans from one detector run
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub spans: Vec<Span>,
    /// Spans dropped by validation
    pub malformed: usize,
}

/// Object-safe view of any `Detector`, used by the orchestrator
#[async_trait]
pub trait SpanSource: Send + Sync {
    fn source_id(&self) -> &str;

    fn source_kind(&self) -> DetectorKind;

    fn remote(&self) -> bool;

    /// Detect, adapt and validate
    async fn spans(&self, text: &str) -> Result<Detection>;
}

#[async_trait]
impl<D> SpanSource for D
where
    D: Detector,
{
    fn source_id(&self) -> &str {
        Detector::id(self)
    }

    fn source_kind(&self) -> DetectorKind {
        Detector::kind(self)
    }

    fn remote(&self) -> bool {
        Detector::is_remote(self)
    }

    async fn spans(&self, text: &str) -> Result<Detection> {
        let raw = self.detect(text).await?;
        let adapted = self.adapt(raw, text);
        Ok(validate_spans(Detector::id(self), text, adapted))
    }
}

/// Drop spans that do not describe a real slice of `text`.
///
/// A valid span lies inside the text on char boundaries, its `text` equals
/// the slice, and its confidence is finite (clamped to [0, 1]). The source is
/// forced to `source_id`.
pub fn validate_spans(source_id: &str, text: &str, spans: Vec<Span>) -> Detection {
    let mut detection = Detection::default();

    for mut span in spans {
        let valid = is_valid_range(text, span.start, span.end)
            && text[span.start..span.end] == span.text
            && span.confidence.is_finite();

        if !valid {
            detection.malformed += 1;
            continue;
        }

        span.confidence = span.confidence.clamp(0.0, 1.0);
        if span.source != source_id {
            span.source = source_id.to_string();
        }
        detection.spans.push(span);
    }

    detection
}

/// A section-level opinion from a model or LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    /// Primary category; `None` when the judge sees nothing sensitive
    #[serde(default)]
    pub category: Option<SensitivityCategory>,
    #[serde(default)]
    pub secondary_categories: Vec<SensitivityCategory>,
    pub level: SensitivityLevel,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    /// Disclosure would put a third party at risk
    #[serde(default)]
    pub third_party_risk: bool,
}

/// Trait for section judges (the optional evidence channel)
#[async_trait]
pub trait SectionJudge: Send + Sync {
    fn id(&self) -> &str;

    /// Whether judging calls an external service
    fn is_remote(&self) -> bool {
        true
    }

    /// Judge one section's text
    async fn judge(&self, section_text: &str) -> Result<Judgment>;
}
