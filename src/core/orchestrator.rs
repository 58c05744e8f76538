//! Main orchestrator for document redaction.
//!
//! Sequences detectors, reconciliation, classification, policy and
//! rendering for one document, and runs batches of documents in parallel.
//!
//! Detectors of one document run concurrently; the reconciler waits for all
//! of them. Remote calls share one limiter across every document. Each
//! document has its own cancellation token, so cancelling one leaves its
//! siblings in a batch untouched.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    AddressDetector, DateDetector, Detector, EmailDetector, IpAddressDetector, LlmClient,
    LlmMentionDetector, LlmSectionJudge, NameDictionaryDetector, NationalIdDetector,
    NerModelDetector, PhoneDetector, SectionJudge, SpanSource,
};
use crate::audit::compute_hash;
use crate::config::rules::RuleSet;
use crate::config::EngineConfig;
use crate::domain::{
    Analysis, Document, RedactionResult, RequesterContext, RunStats, SectionBoundary, Span,
    Warning,
};
use crate::error::{EngineError, EngineResult, InvariantViolation};

use super::classifier::{overall_level, ClassifierConfig, SensitivityClassifier};
use super::limiter::ExternalCallLimiter;
use super::policy::{self, PolicyConfig};
use super::reconciler::{Reconciler, ReconcilerConfig};
use super::renderer;
use super::retry::{CallBudget, CallFailure, RetryPolicy};
use super::safety::SafetyLimits;
use super::sections::split_sections;

/// Redaction engine.
///
/// Cloning is cheap; clones share detectors, rules and the call limiter.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    detectors: Vec<Arc<dyn SpanSource>>,
    judges: Vec<Arc<dyn SectionJudge>>,
    reconciler: Reconciler,
    classifier: SensitivityClassifier,
    rules: RuleSet,
    limits: SafetyLimits,
    retry: RetryPolicy,
    limiter: ExternalCallLimiter,
}

/// Builder for an [`Orchestrator`]
pub struct OrchestratorBuilder {
    detectors: Vec<Arc<dyn SpanSource>>,
    judges: Vec<Arc<dyn SectionJudge>>,
    rules: Option<RuleSet>,
    limits: SafetyLimits,
    retry: RetryPolicy,
    reconciler: ReconcilerConfig,
    classifier: ClassifierConfig,
    policy: PolicyConfig,
    limiter: Option<ExternalCallLimiter>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            detectors: Vec::new(),
            judges: Vec::new(),
            rules: None,
            limits: SafetyLimits::default(),
            retry: RetryPolicy::default(),
            reconciler: ReconcilerConfig::default(),
            classifier: ClassifierConfig::default(),
            policy: PolicyConfig::default(),
            limiter: None,
        }
    }
}

impl OrchestratorBuilder {
    /// Register a detector
    pub fn detector<D: Detector + 'static>(self, detector: D) -> Self {
        self.source(Arc::new(detector))
    }

    /// Register an already type-erased detector
    pub fn source(mut self, source: Arc<dyn SpanSource>) -> Self {
        self.detectors.push(source);
        self
    }

    /// Register a section judge
    pub fn judge(mut self, judge: Arc<dyn SectionJudge>) -> Self {
        self.judges.push(judge);
        self
    }

    /// Register the pattern and name-dictionary detectors
    pub fn with_default_detectors(self) -> Result<Self> {
        Ok(self
            .detector(NationalIdDetector::new()?)
            .detector(PhoneDetector::new()?)
            .detector(EmailDetector::new()?)
            .detector(AddressDetector::new()?)
            .detector(DateDetector::new()?)
            .detector(IpAddressDetector::new()?)
            .detector(NameDictionaryDetector::new()?))
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn limits(mut self, limits: SafetyLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn reconciler(mut self, config: ReconcilerConfig) -> Self {
        self.reconciler = config;
        self
    }

    pub fn classifier(mut self, config: ClassifierConfig) -> Self {
        self.classifier = config;
        self
    }

    pub fn policy(mut self, config: PolicyConfig) -> Self {
        self.policy = config;
        self
    }

    /// Share a limiter with other orchestrators in the process
    pub fn limiter(mut self, limiter: ExternalCallLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn build(self) -> EngineResult<Orchestrator> {
        let rules = match self.rules {
            Some(rules) => rules,
            None => RuleSet::osl26().map_err(|e| EngineError::Config(format!("{:#}", e)))?,
        };
        rules
            .validate()
            .map_err(|e| EngineError::Config(format!("{:#}", e)))?;

        let mut reconciler = Reconciler::new(self.reconciler)
            .and_then(|r| r.with_role_keywords(&rules.role_keywords))
            .map_err(|e| EngineError::Config(format!("{:#}", e)))?;
        for source in &self.detectors {
            reconciler.register_source(source.source_id(), source.source_kind());
        }

        let classifier = SensitivityClassifier::new(self.classifier, &rules)
            .map_err(|e| EngineError::Config(format!("{:#}", e)))?
            .assume_third_party_risk(self.policy.assume_third_party_risk);

        let limiter = self
            .limiter
            .unwrap_or_else(|| ExternalCallLimiter::new(self.limits.max_concurrent_external_calls));

        info!(
            rules = %rules.name,
            detectors = self.detectors.len(),
            judges = self.judges.len(),
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                detectors: self.detectors,
                judges: self.judges,
                reconciler,
                classifier,
                rules,
                limits: self.limits,
                retry: self.retry,
                limiter,
            }),
        })
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Build an orchestrator from configuration: the default detectors, plus
    /// the NER model and LLM when they are configured
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .with_default_detectors()?
            .rules(config.rule_set()?)
            .limits(config.limits.clone())
            .retry(config.retry.clone())
            .reconciler(config.reconciler.clone())
            .classifier(config.classifier.clone())
            .policy(config.policy.clone());

        if let Some(model) = &config.model {
            builder = builder.detector(NerModelDetector::new(model.clone()));
        }
        if let Some(llm) = &config.llm {
            builder = builder
                .detector(LlmMentionDetector::new(LlmClient::new(llm.clone())))
                .judge(Arc::new(LlmSectionJudge::new(LlmClient::new(llm.clone()))));
        }

        Ok(builder.build()?)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.inner.rules
    }

    pub fn limiter(&self) -> &ExternalCallLimiter {
        &self.inner.limiter
    }

    /// Source ids of the registered detectors
    pub fn detector_ids(&self) -> Vec<&str> {
        self.inner.detectors.iter().map(|d| d.source_id()).collect()
    }

    /// Decide everything about a document without rendering it
    pub async fn analyze(
        &self,
        document: &Document,
        requester: &RequesterContext,
    ) -> EngineResult<Analysis> {
        self.analyze_with_cancel(document, requester, &CancellationToken::new())
            .await
    }

    #[instrument(skip_all, fields(document_id = %document.id))]
    pub async fn analyze_with_cancel(
        &self,
        document: &Document,
        requester: &RequesterContext,
        cancel: &CancellationToken,
    ) -> EngineResult<Analysis> {
        self.bounded(&document.id, cancel, self.run_analysis(document, requester, cancel))
            .await
    }

    /// Render a (possibly reviewer-edited) analysis
    #[instrument(skip_all, fields(document_id = %document.id))]
    pub fn render(&self, document: &Document, analysis: &Analysis) -> EngineResult<RedactionResult> {
        let text = document.text.as_str();
        let source_sha256 = compute_hash(text.as_bytes());
        if source_sha256 != analysis.source_sha256 || analysis.document_id != document.id {
            error!("Analysis does not belong to this document text");
            return Err(InvariantViolation::AuditMismatch(
                "analysis was produced for a different document text".to_string(),
            )
            .into());
        }

        let rendering =
            renderer::render(document, &analysis.decisions, &self.inner.rules.placeholders)
                .map_err(|e| {
                    error!(error = %e, "Rendering failed");
                    e
                })?;

        let mut warnings = analysis.warnings.clone();
        warnings.extend(rendering.warnings);

        let stats = RunStats::compute(
            text.len(),
            &analysis.entities,
            &analysis.sections,
            &analysis.decisions,
            &rendering.audit_trail,
        );
        let redacted_sha256 = compute_hash(rendering.redacted_text.as_bytes());

        let result = RedactionResult {
            document_id: document.id.clone(),
            run_id: analysis.run_id,
            generated_at: Utc::now(),
            redacted_text: rendering.redacted_text,
            audit_trail: rendering.audit_trail,
            decisions: analysis.decisions.clone(),
            entities: analysis.entities.clone(),
            sections: analysis.sections.clone(),
            warnings,
            overall_level: analysis.overall_level,
            stats,
            source_sha256,
            redacted_sha256,
        };

        if let Err(e) = result.verify(text) {
            error!(error = %e, "Rendered result failed verification");
            return Err(e.into());
        }

        info!(
            masked = result.stats.masked_count(),
            released = result.stats.released_count(),
            masking_ratio = result.stats.masking_ratio,
            warnings = result.warnings.len(),
            "Document redacted"
        );
        Ok(result)
    }

    /// Analyze and render one document
    pub async fn redact(
        &self,
        document: &Document,
        requester: &RequesterContext,
    ) -> EngineResult<RedactionResult> {
        self.redact_with_cancel(document, requester, &CancellationToken::new())
            .await
    }

    #[instrument(skip_all, fields(document_id = %document.id))]
    pub async fn redact_with_cancel(
        &self,
        document: &Document,
        requester: &RequesterContext,
        cancel: &CancellationToken,
    ) -> EngineResult<RedactionResult> {
        let analysis = self
            .bounded(&document.id, cancel, self.run_analysis(document, requester, cancel))
            .await?;
        self.render(document, &analysis)
    }

    /// Redact documents in parallel tasks.
    ///
    /// Each document gets a child of `cancel`; results are in input order.
    #[instrument(skip_all, fields(documents = requests.len()))]
    pub async fn redact_batch(
        &self,
        requests: Vec<(Document, RequesterContext)>,
        cancel: &CancellationToken,
    ) -> Vec<EngineResult<RedactionResult>> {
        info!("Starting batch");

        let handles: Vec<_> = requests
            .into_iter()
            .map(|(document, requester)| {
                let orchestrator = self.clone();
                let token = cancel.child_token();
                let document_id = document.id.clone();
                let handle = tokio::spawn(async move {
                    orchestrator
                        .redact_with_cancel(&document, &requester, &token)
                        .await
                });
                (document_id, handle)
            })
            .collect();

        let (ids, handles): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        let results: Vec<EngineResult<RedactionResult>> = join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, document_id)| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(%document_id, error = %e, "Document task failed");
                    Err(EngineError::TaskFailed {
                        document_id,
                        reason: e.to_string(),
                    })
                }
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(succeeded = results.len() - failed, failed, "Batch finished");
        results
    }

    /// Run `work` under the document timeout and cancellation token
    async fn bounded<T>(
        &self,
        document_id: &str,
        cancel: &CancellationToken,
        work: impl Future<Output = EngineResult<T>>,
    ) -> EngineResult<T> {
        let limit = self.inner.limits.document_timeout();
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(document_id, "Document cancelled");
                Err(EngineError::Cancelled { document_id: document_id.to_string() })
            }
            outcome = tokio::time::timeout(limit, work) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    warn!(document_id, limit_seconds = limit.as_secs(), "Document timed out");
                    Err(EngineError::DocumentTimeout {
                        document_id: document_id.to_string(),
                        limit_seconds: limit.as_secs(),
                    })
                }
            }
        }
    }

    async fn run_analysis(
        &self,
        document: &Document,
        requester: &RequesterContext,
        cancel: &CancellationToken,
    ) -> EngineResult<Analysis> {
        let inner = &self.inner;
        inner.limits.validate_document(document)?;

        let text = document.text.as_str();
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            bytes = text.len(),
            relation = requester.relation.as_str(),
            detectors = inner.detectors.len(),
            judges = inner.judges.len(),
            "Starting analysis"
        );

        let budget = CallBudget {
            policy: &inner.retry,
            timeout: inner.limits.call_timeout(),
            limiter: &inner.limiter,
            cancel,
        };

        let (candidates, mut warnings) = self.detect(text, budget).await;
        ensure_live(document, cancel)?;

        let reconciliation = inner
            .reconciler
            .reconcile(text, candidates, &document.party_hints)?;
        debug!(
            entities = reconciliation.entities.len(),
            conflicts = reconciliation.conflicts.len(),
            filtered = reconciliation.filtered,
            "Spans reconciled"
        );

        let boundaries = section_boundaries(document, inner.classifier.config().max_section_bytes);
        inner.limits.check_section_count(boundaries.len())?;

        let (sections, classifier_warnings) = inner
            .classifier
            .classify(
                text,
                &reconciliation.entities,
                &boundaries,
                &inner.judges,
                budget,
            )
            .await;
        warnings.extend(classifier_warnings);
        ensure_live(document, cancel)?;

        let outcome = policy::decide(&reconciliation.entities, &sections, requester, &inner.rules);
        warnings.extend(outcome.warnings);

        let overall = overall_level(&sections);
        info!(
            %run_id,
            entities = reconciliation.entities.len(),
            sections = sections.len(),
            decisions = outcome.decisions.len(),
            overall_level = %overall,
            warnings = warnings.len(),
            "Analysis complete"
        );

        Ok(Analysis {
            document_id: document.id.clone(),
            run_id,
            generated_at: Utc::now(),
            entities: reconciliation.entities,
            sections,
            decisions: outcome.decisions,
            conflicts: reconciliation.conflicts,
            warnings,
            overall_level: overall,
            source_sha256: compute_hash(text.as_bytes()),
        })
    }

    /// Run every detector concurrently; failures become warnings
    async fn detect(&self, text: &str, budget: CallBudget<'_>) -> (Vec<Span>, Vec<Warning>) {
        let calls = self.inner.detectors.iter().map(|source| async move {
            let outcome = budget
                .run(source.source_id(), source.remote(), || source.spans(text))
                .await;
            (source, outcome)
        });

        let mut spans = Vec::new();
        let mut warnings = Vec::new();
        for (source, outcome) in join_all(calls).await {
            match outcome {
                Ok(detection) => {
                    if detection.malformed > 0 {
                        warn!(
                            detector = source.source_id(),
                            dropped = detection.malformed,
                            "Detector produced malformed spans"
                        );
                        warnings.push(Warning::MalformedDetectorOutput {
                            detector: source.source_id().to_string(),
                            dropped: detection.malformed,
                        });
                    }
                    debug!(
                        detector = source.source_id(),
                        spans = detection.spans.len(),
                        "Detector finished"
                    );
                    spans.extend(detection.spans);
                }
                Err(CallFailure::Exhausted { attempts, reason }) => {
                    warn!(detector = source.source_id(), attempts, "Detector degraded");
                    warnings.push(Warning::DegradedDetector {
                        detector: source.source_id().to_string(),
                        attempts,
                        reason,
                    });
                }
                Err(CallFailure::Cancelled) => {}
            }
        }

        (spans, warnings)
    }
}

fn ensure_live(document: &Document, cancel: &CancellationToken) -> EngineResult<()> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled {
            document_id: document.id.clone(),
        });
    }
    Ok(())
}

/// Caller-supplied boundaries in document order, else derived paragraphs
fn section_boundaries(document: &Document, max_section_bytes: usize) -> Vec<SectionBoundary> {
    match &document.sections {
        Some(sections) => {
            let mut sorted = sections.clone();
            sorted.sort_by_key(|s| s.start);
            sorted
        }
        None => split_sections(&document.text, max_section_bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DisclosureAction, RequesterRelation};

    fn orchestrator() -> Orchestrator {
        Orchestrator::builder()
            .with_default_detectors()
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_text_rejected_before_detection() {
        let document = Document::new("doc-1", "   ");
        let requester = RequesterContext::new(RequesterRelation::Public);
        let result = orchestrator().redact(&document, &requester).await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_identifiers_masked_end_to_end() {
        let document = Document::new("doc-1", "Kontakt: 070-123 45 67, persnr 19850615-1234.");
        let requester = RequesterContext::new(RequesterRelation::Public);
        let result = orchestrator().redact(&document, &requester).await.unwrap();

        assert!(!result.redacted_text.contains("19850615-1234"));
        assert!(result.redacted_text.contains("<PERSONNUMMER>"));
        result.verify(&document.text).unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_document() {
        let document = Document::new("doc-1", "Text utan namn.");
        let requester = RequesterContext::new(RequesterRelation::Public);
        let token = CancellationToken::new();
        token.cancel();

        let result = orchestrator()
            .redact_with_cancel(&document, &requester, &token)
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_render_rejects_foreign_analysis() {
        let orchestrator = orchestrator();
        let requester = RequesterContext::new(RequesterRelation::Public);
        let document = Document::new("doc-1", "Ring 070-123 45 67.");
        let analysis = orchestrator.analyze(&document, &requester).await.unwrap();

        let other = Document::new("doc-1", "Ring 070-765 43 21.");
        let result = orchestrator.render(&other, &analysis);
        assert!(matches!(result, Err(EngineError::Invariant(_))));
    }

    #[tokio::test]
    async fn test_reviewer_edit_is_rendered() {
        let orchestrator = orchestrator();
        let requester = RequesterContext::new(RequesterRelation::Public);
        let document = Document::new("doc-1", "Ring 070-123 45 67.");
        let mut analysis = orchestrator.analyze(&document, &requester).await.unwrap();

        for decision in &mut analysis.decisions {
            decision.action = DisclosureAction::Release;
        }
        let result = orchestrator.render(&document, &analysis).unwrap();
        assert_eq!(result.redacted_text, document.text);
    }
}
