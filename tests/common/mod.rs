//! Shared helpers for integration tests: tracing, mock detectors and judges,
//! and a small deterministic generator for property-style tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use menprov::adapters::{Detector, Judgment, SectionJudge};
use menprov::domain::{DetectorKind, Entity, EntityId, EntityRole, EntityType, Span};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test subscriber once; filter with RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Byte range of the first occurrence of `needle`
pub fn find(text: &str, needle: &str) -> (usize, usize) {
    let start = text
        .find(needle)
        .unwrap_or_else(|| panic!("{:?} not in {:?}", needle, text));
    (start, start + needle.len())
}

pub fn span(text: &str, needle: &str, source: &str, confidence: f64, t: EntityType) -> Span {
    let (start, end) = find(text, needle);
    Span::from_document(text, start, end, source, confidence, t).unwrap()
}

pub fn entity(text: &str, needle: &str, t: EntityType, role: Option<EntityRole>) -> Entity {
    let span = span(text, needle, "test", 0.9, t);
    Entity {
        entity_id: EntityId::for_mention(needle, t),
        span,
        entity_type: t,
        role,
        protected: Default::default(),
        supporting_sources: Vec::new(),
    }
}

/// Detector that finds fixed literal mentions
pub struct LiteralDetector {
    pub id: &'static str,
    pub kind: DetectorKind,
    pub mentions: Vec<(&'static str, EntityType, Option<EntityRole>)>,
}

#[async_trait]
impl Detector for LiteralDetector {
    type Raw = Vec<Span>;

    fn id(&self) -> &str {
        self.id
    }

    fn kind(&self) -> DetectorKind {
        self.kind
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        let mut spans = Vec::new();
        for (mention, t, role) in &self.mentions {
            for (start, _) in text.match_indices(mention) {
                let mut span =
                    Span::from_document(text, start, start + mention.len(), self.id, 0.8, *t)
                        .unwrap();
                span.role = *role;
                spans.push(span);
            }
        }
        Ok(spans)
    }

    fn adapt(&self, raw: Self::Raw, _text: &str) -> Vec<Span> {
        raw
    }
}

/// Remote detector that always fails
pub struct FailingDetector;

#[async_trait]
impl Detector for FailingDetector {
    type Raw = ();

    fn id(&self) -> &str {
        "model:down"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Model
    }

    async fn detect(&self, _text: &str) -> Result<Self::Raw> {
        anyhow::bail!("connection refused")
    }

    fn adapt(&self, _raw: Self::Raw, _text: &str) -> Vec<Span> {
        Vec::new()
    }
}

/// Detector that hangs on texts containing `trigger`
pub struct HangingDetector {
    pub trigger: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl Detector for HangingDetector {
    type Raw = ();

    fn id(&self) -> &str {
        "test:hanging"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        if text.contains(self.trigger) {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }

    fn adapt(&self, _raw: Self::Raw, _text: &str) -> Vec<Span> {
        Vec::new()
    }
}

/// Remote detector that records the highest number of simultaneous calls
#[derive(Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Detector for ConcurrencyProbe {
    type Raw = ();

    fn id(&self) -> &str {
        "llm:probe"
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Llm
    }

    async fn detect(&self, _text: &str) -> Result<Self::Raw> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn adapt(&self, _raw: Self::Raw, _text: &str) -> Vec<Span> {
        Vec::new()
    }
}

/// Judge that returns the same judgment for every section
pub struct FixedJudge(pub Judgment);

#[async_trait]
impl SectionJudge for FixedJudge {
    fn id(&self) -> &str {
        "test:judge"
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn judge(&self, _section_text: &str) -> Result<Judgment> {
        Ok(self.0.clone())
    }
}

/// Linear congruential generator; deterministic across runs
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    /// Uniform in `0..bound` (bound > 0)
    pub fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }

    pub fn unit(&mut self) -> f64 {
        (self.next_u64() % 10_000) as f64 / 10_000.0
    }
}
