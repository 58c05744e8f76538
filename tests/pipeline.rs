//! Pipeline Integration Tests
//!
//! End-to-end redaction through the orchestrator: detection, reconciliation,
//! classification, policy and rendering, plus batch behaviour under
//! cancellation, timeouts and the shared external-call limit.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{ConcurrencyProbe, FailingDetector, FixedJudge, HangingDetector};
use menprov::adapters::Judgment;
use menprov::core::{RetryPolicy, SafetyLimits};
use menprov::domain::{
    DisclosureAction, Document, EntityRole, EntityType, PartyHint, PolicyRule, RequesterContext,
    RequesterRelation, SensitivityCategory, SensitivityLevel, Warning,
};
use menprov::{EngineError, Orchestrator, OrchestratorBuilder};
use tokio_util::sync::CancellationToken;

const KONTAKT: &str = "Kontakt: 070-123 45 67, persnr 19850615-1234.";

fn defaults() -> OrchestratorBuilder {
    common::init_tracing();
    Orchestrator::builder().with_default_detectors().unwrap()
}

fn public() -> RequesterContext {
    RequesterContext::new(RequesterRelation::Public)
}

#[tokio::test]
async fn test_identifiers_masked_with_audit() {
    let orchestrator = defaults().build().unwrap();
    let document = Document::new("doc-1", KONTAKT);

    let result = orchestrator.redact(&document, &public()).await.unwrap();

    assert_eq!(
        result.redacted_text,
        "Kontakt: <TELEFON>, persnr <PERSONNUMMER>."
    );
    assert_eq!(result.audit_trail.len(), 2);
    assert_eq!(result.audit_trail[0].replacements[0].original, "070-123 45 67");
    assert_eq!(result.audit_trail[1].replacements[0].original, "19850615-1234");
    assert_eq!(result.stats.entities_by_type.get(&EntityType::Ssn), Some(&1));
    assert_eq!(result.overall_level, SensitivityLevel::Low);
    assert!(result.is_clean());
    result.verify(&document.text).unwrap();
}

#[tokio::test]
async fn test_case_subject_released_to_self() {
    let orchestrator = defaults().build().unwrap();
    let text = "Anna har skulder hos kronofogden.";
    let document =
        Document::new("doc-2", text).with_party(PartyHint::new("Anna", EntityRole::CaseSubject));

    let own = RequesterContext::new(RequesterRelation::SelfSubject);
    let result = orchestrator.redact(&document, &own).await.unwrap();
    assert_eq!(result.redacted_text, text);
    assert!(result.audit_trail.is_empty());
    assert!(result
        .decisions
        .iter()
        .all(|d| d.action == DisclosureAction::Release));

    // Same document, requester without party access
    let result = orchestrator.redact(&document, &public()).await.unwrap();
    assert_eq!(result.redacted_text, "<PERSON> har skulder hos kronofogden.");
    assert_eq!(result.overall_level, SensitivityLevel::Medium);
    assert_eq!(result.sections[0].category, SensitivityCategory::Economy);
    result.verify(&document.text).unwrap();
}

#[tokio::test]
async fn test_official_named_by_title_released() {
    let orchestrator = defaults().build().unwrap();
    let text = "Socialsekreterare Berit har pratat med mamman om skulder.";
    let document = Document::new("doc-official", text);

    let result = orchestrator.redact(&document, &public()).await.unwrap();
    assert_eq!(result.redacted_text, text);
    assert_eq!(result.entities.len(), 1);
    assert_eq!(result.entities[0].role, Some(EntityRole::Official));
    let berit = result
        .decisions
        .iter()
        .find(|d| !d.target.is_section())
        .unwrap();
    assert_eq!(berit.action, DisclosureAction::Release);
    assert_eq!(berit.decided_from.rule, PolicyRule::Official);
    result.verify(&document.text).unwrap();
}

#[tokio::test]
async fn test_neighbour_named_by_relation_masked() {
    let orchestrator = defaults().build().unwrap();
    let text = "Grannen Kalle har skulder hos kronofogden.";
    let document = Document::new("doc-neighbour", text);

    let result = orchestrator.redact(&document, &public()).await.unwrap();
    assert_eq!(result.entities[0].role, Some(EntityRole::ThirdParty));
    assert_eq!(
        result.redacted_text,
        "Grannen <PERSON> har skulder hos kronofogden."
    );
    result.verify(&document.text).unwrap();
}

#[tokio::test]
async fn test_judge_escalates_section() {
    let judge = FixedJudge(Judgment {
        category: Some(SensitivityCategory::MentalHealth),
        secondary_categories: Vec::new(),
        level: SensitivityLevel::Critical,
        confidence: 0.9,
        rationale: "beskriver psykisk ohälsa".to_string(),
        third_party_risk: false,
    });
    let orchestrator = defaults().judge(Arc::new(judge)).build().unwrap();
    let document = Document::new("doc-3", "Neutral text utan nyckelord.");

    let result = orchestrator.redact(&document, &public()).await.unwrap();

    assert_eq!(result.redacted_text, "<SEKTION: MENTAL_HEALTH>");
    assert_eq!(result.overall_level, SensitivityLevel::Critical);
    assert_eq!(result.audit_trail.len(), 1);
    assert_eq!(
        result.audit_trail[0].decision.legal_basis,
        "OSL 26:1 (psykisk hälsa)"
    );
}

#[tokio::test]
async fn test_failed_remote_detector_degrades() {
    let orchestrator = defaults()
        .detector(FailingDetector)
        .retry(RetryPolicy::no_retry())
        .build()
        .unwrap();
    let document = Document::new("doc-4", KONTAKT);

    let result = orchestrator.redact(&document, &public()).await.unwrap();

    assert!(!result.is_clean());
    assert!(result.warnings.iter().any(|w| matches!(
        w,
        Warning::DegradedDetector { detector, attempts: 1, .. } if detector == "model:down"
    )));
    // The other detectors still ran
    assert_eq!(
        result.redacted_text,
        "Kontakt: <TELEFON>, persnr <PERSONNUMMER>."
    );
    assert_eq!(orchestrator.limiter().available(), orchestrator.limiter().capacity());
}

#[tokio::test]
async fn test_batch_keeps_input_order() {
    let orchestrator = defaults().build().unwrap();
    let requests = vec![
        (Document::new("a", KONTAKT), public()),
        (Document::new("b", "   "), public()),
        (Document::new("c", "Anna kom till mötet."), public()),
    ];

    let results = orchestrator
        .redact_batch(requests, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().document_id, "a");
    assert!(matches!(results[1], Err(EngineError::InvalidInput(_))));
    let third = results[2].as_ref().unwrap();
    assert_eq!(third.document_id, "c");
    assert_eq!(third.redacted_text, "Anna kom till mötet.");
}

#[tokio::test]
async fn test_cancelling_one_document_spares_its_sibling() {
    let orchestrator = defaults()
        .detector(HangingDetector {
            trigger: "VÄNTA",
            delay: Duration::from_secs(30),
        })
        .build()
        .unwrap();

    let slow = Document::new("slow", "VÄNTA på svar.");
    let fast = Document::new("fast", KONTAKT);
    let slow_token = CancellationToken::new();
    let fast_token = CancellationToken::new();
    let requester = public();

    let (slow_result, fast_result, _) = tokio::join!(
        orchestrator.redact_with_cancel(&slow, &requester, &slow_token),
        orchestrator.redact_with_cancel(&fast, &requester, &fast_token),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slow_token.cancel();
        }
    );

    assert!(matches!(
        slow_result,
        Err(EngineError::Cancelled { ref document_id }) if document_id == "slow"
    ));
    assert!(fast_result.unwrap().redacted_text.contains("<TELEFON>"));
}

#[tokio::test]
async fn test_batch_cancellation_reaches_every_document() {
    let orchestrator = defaults()
        .detector(HangingDetector {
            trigger: "VÄNTA",
            delay: Duration::from_secs(30),
        })
        .build()
        .unwrap();
    let requests = vec![
        (Document::new("a", "VÄNTA ett."), public()),
        (Document::new("b", "VÄNTA två."), public()),
    ];

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let results = orchestrator.redact_batch(requests, &cancel).await;
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(EngineError::Cancelled { .. }))));
}

#[tokio::test]
async fn test_document_timeout() {
    let orchestrator = defaults()
        .detector(HangingDetector {
            trigger: "VÄNTA",
            delay: Duration::from_secs(30),
        })
        .limits(SafetyLimits {
            document_timeout_seconds: 1,
            ..Default::default()
        })
        .build()
        .unwrap();

    let result = orchestrator
        .redact(&Document::new("slow", "VÄNTA på svar."), &public())
        .await;

    assert!(matches!(
        result,
        Err(EngineError::DocumentTimeout { limit_seconds: 1, .. })
    ));
}

#[tokio::test]
async fn test_external_calls_share_one_limit() {
    let probe = ConcurrencyProbe::default();
    let orchestrator = defaults()
        .detector(probe.clone())
        .limits(SafetyLimits {
            max_concurrent_external_calls: 1,
            ..Default::default()
        })
        .build()
        .unwrap();

    let requests = (0..4)
        .map(|i| (Document::new(format!("doc-{}", i), KONTAKT), public()))
        .collect();
    let results = orchestrator
        .redact_batch(requests, &CancellationToken::new())
        .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.limiter().available(), 1);
}
