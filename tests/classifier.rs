//! Sensitivity Classifier Integration Tests
//!
//! Conservative ceiling, category combination, protected-class escalation
//! and judge degradation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{entity, init_tracing, FixedJudge, Lcg};
use menprov::adapters::{Judgment, SectionJudge};
use menprov::config::rules::RuleSet;
use menprov::core::{
    Assertion, CallBudget, ClassifierConfig, ExternalCallLimiter, RetryPolicy,
    SensitivityClassifier,
};
use menprov::domain::{
    EntityRole, EntityType, ProtectedClass, SectionBoundary, SensitivityCategory,
    SensitivityLevel,
};
use tokio_util::sync::CancellationToken;

fn classifier() -> SensitivityClassifier {
    SensitivityClassifier::new(ClassifierConfig::default(), &RuleSet::osl26().unwrap()).unwrap()
}

fn whole(text: &str) -> Vec<SectionBoundary> {
    vec![SectionBoundary {
        start: 0,
        end: text.len(),
    }]
}

fn judgment(category: SensitivityCategory, level: SensitivityLevel, confidence: f64) -> Judgment {
    Judgment {
        category: Some(category),
        secondary_categories: Vec::new(),
        level,
        confidence,
        rationale: "test".to_string(),
        third_party_risk: false,
    }
}

struct BrokenJudge;

#[async_trait]
impl SectionJudge for BrokenJudge {
    fn id(&self) -> &str {
        "llm:broken"
    }

    async fn judge(&self, _section_text: &str) -> anyhow::Result<Judgment> {
        anyhow::bail!("model returned garbage")
    }
}

#[tokio::test]
async fn test_keyword_and_judge_combined() {
    init_tracing();
    let text = "Mamman har problem med alkohol.";
    let judges: Vec<Arc<dyn SectionJudge>> = vec![Arc::new(FixedJudge(judgment(
        SensitivityCategory::Family,
        SensitivityLevel::Medium,
        0.8,
    )))];

    let policy = RetryPolicy::no_retry();
    let limiter = ExternalCallLimiter::new(2);
    let cancel = CancellationToken::new();
    let budget = CallBudget {
        policy: &policy,
        timeout: Duration::from_secs(5),
        limiter: &limiter,
        cancel: &cancel,
    };

    let (sections, warnings) = classifier()
        .classify(text, &[], &whole(text), &judges, budget)
        .await;

    assert!(warnings.is_empty());
    let section = &sections[0];
    assert_eq!(section.category, SensitivityCategory::Addiction);
    assert!(section.secondary_categories.contains(&SensitivityCategory::Family));
    assert_eq!(section.level, SensitivityLevel::High);
}

#[tokio::test]
async fn test_failed_judge_degrades_to_keywords() {
    let text = "Han har skulder hos kronofogden.";
    let judges: Vec<Arc<dyn SectionJudge>> = vec![Arc::new(BrokenJudge)];

    let policy = RetryPolicy {
        max_attempts: 2,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        backoff_multiplier: 2.0,
    };
    let limiter = ExternalCallLimiter::new(1);
    let cancel = CancellationToken::new();
    let budget = CallBudget {
        policy: &policy,
        timeout: Duration::from_secs(5),
        limiter: &limiter,
        cancel: &cancel,
    };

    let (sections, warnings) = classifier()
        .classify(text, &[], &whole(text), &judges, budget)
        .await;

    assert_eq!(sections[0].category, SensitivityCategory::Economy);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code(), "DEGRADED_JUDGE");
    assert_eq!(limiter.available(), 1);
}

#[test]
fn test_minor_health_escalated_to_critical() {
    let text = "Emma har fått en ny medicin.";
    let mut rules = RuleSet::osl26().unwrap();
    for rule in &mut rules.categories {
        if rule.category == SensitivityCategory::Health {
            rule.default_level = SensitivityLevel::Medium;
        }
    }
    let classifier = SensitivityClassifier::new(ClassifierConfig::default(), &rules).unwrap();

    let mut emma = entity(text, "Emma", EntityType::Person, Some(EntityRole::CaseSubject));
    emma.protected.insert(ProtectedClass::Minor);

    let (sections, _) = classifier.combine(text, &[emma], &whole(text), Vec::new());
    assert_eq!(sections[0].category, SensitivityCategory::Health);
    assert_eq!(sections[0].level, SensitivityLevel::Critical);
}

#[test]
fn test_no_evidence_section_kept_at_low() {
    let text = "Mötet hölls på förmiddagen.\n\nAlla var närvarande.";
    let boundaries = vec![
        SectionBoundary { start: 0, end: 31 },
        SectionBoundary {
            start: 33,
            end: text.len(),
        },
    ];
    let (sections, _) = classifier().combine(text, &[], &boundaries, Vec::new());

    assert_eq!(sections.len(), 2);
    for section in &sections {
        assert_eq!(section.level, SensitivityLevel::Low);
        assert_eq!(section.category, SensitivityCategory::Neutral);
    }
}

#[test]
fn test_uncategorised_keyword_raises_warning() {
    let text = "Det kom in en orosanmälan.";
    let (sections, warnings) = classifier().combine(text, &[], &whole(text), Vec::new());
    assert_eq!(sections[0].level, SensitivityLevel::High);
    assert_eq!(warnings[0].code(), "UNSPECIFIED_KEYWORD_CATEGORY");
}

#[test]
fn test_level_never_below_cleared_assertion() {
    let levels = [
        SensitivityLevel::Low,
        SensitivityLevel::Medium,
        SensitivityLevel::High,
        SensitivityLevel::Critical,
    ];
    let categories = [
        SensitivityCategory::Health,
        SensitivityCategory::Family,
        SensitivityCategory::Economy,
        SensitivityCategory::Violence,
    ];
    let classifier =
        SensitivityClassifier::new(ClassifierConfig::default(), &RuleSet::default()).unwrap();
    let text = "Neutral text utan nyckelord.";
    let mut rng = Lcg::new(42);

    for _ in 0..500 {
        let assertions: Vec<Assertion> = (0..rng.below(5))
            .map(|i| Assertion {
                channel: format!("judge-{}", i),
                category: Some(categories[rng.below(categories.len())]),
                secondary_categories: Vec::new(),
                level: levels[rng.below(levels.len())],
                confidence: rng.unit(),
                from_keyword: false,
                rationale: String::new(),
                third_party_risk: false,
            })
            .collect();
        let ceiling = assertions
            .iter()
            .filter(|a| a.confidence >= classifier.config().min_confidence)
            .map(|a| a.level)
            .max()
            .unwrap_or(SensitivityLevel::Low);

        let (sections, _) = classifier.combine(text, &[], &whole(text), vec![assertions]);
        assert!(sections[0].level >= ceiling);
    }
}
