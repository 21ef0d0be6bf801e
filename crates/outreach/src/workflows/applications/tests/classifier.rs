use std::sync::Arc;
use std::time::Duration;

use super::common::*;
use crate::workflows::applications::classifier::{Classifier, ClassifierConfig};
use crate::workflows::applications::clock::{Clock, ManualClock};
use crate::workflows::applications::collaborators::CollaboratorError;
use crate::workflows::applications::domain::RoleLabel;
use crate::workflows::applications::retry::RetryPolicy;

fn classifier(scoring: ScriptedScoring) -> (Classifier, Arc<ScriptedScoring>, Arc<ManualClock>) {
    let scoring = Arc::new(scoring);
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let shared: Arc<dyn Clock> = clock.clone();
    let classifier = Classifier::new(
        ClassifierConfig::default(),
        scoring.clone(),
        RetryPolicy::default(),
        shared,
    );
    (classifier, scoring, clock)
}

#[tokio::test]
async fn classify_blends_service_verdict_with_rules() {
    let (classifier, _, _) = classifier(
        ScriptedScoring::default().respond("Machine Learning", verdict("ai_engineer", 0.9)),
    );

    let classification = classifier.classify(&ml_engineer("hf", "hf-1")).await;

    assert_eq!(classification.posting_id, "hf-1");
    assert_eq!(classification.role, RoleLabel::AiEngineer);
    assert!((classification.confidence - 0.86).abs() < 1e-9);
}

#[tokio::test]
async fn identical_inputs_classify_identically() {
    let (classifier, scoring, _) = classifier(
        ScriptedScoring::default().respond("Machine Learning", verdict("AI_ENGINEER", 0.7)),
    );
    let posting = ml_engineer("hf", "hf-1");

    let first = classifier.classify(&posting).await;
    let second = classifier.classify(&posting).await;

    assert_eq!(first, second);
    assert_eq!(scoring.calls(), 2);
}

#[tokio::test]
async fn outage_degrades_to_rule_score_after_retries() {
    let (classifier, scoring, clock) = classifier(ScriptedScoring::default());

    let classification = classifier.classify(&ml_engineer("hf", "hf-1")).await;

    assert_eq!(classification.model_score, None);
    assert!((classification.confidence - 0.8).abs() < 1e-9);
    assert_eq!(classification.role, RoleLabel::AiEngineer);
    assert_eq!(scoring.calls(), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test]
async fn malformed_verdict_is_not_retried_and_falls_back() {
    let (classifier, scoring, clock) = classifier(
        ScriptedScoring::default()
            .respond("Machine Learning", verdict("ASTRONAUT", 0.99))
            .respond("Kubernetes", verdict("CLOUD_ENGINEER", f64::NAN))
            .respond(
                "Data",
                Err(CollaboratorError::Malformed("no label field".to_string())),
            ),
    );

    for posting in [
        ml_engineer("hf", "hf-1"),
        posting("hf", "hf-2", "Kubernetes operator", "docker and terraform"),
        posting("hf", "hf-3", "Data Scientist", "analytics"),
    ] {
        let classification = classifier.classify(&posting).await;
        assert_eq!(classification.model_score, None, "{}", posting.external_id);
    }
    assert_eq!(scoring.calls(), 3);
    assert!(clock.sleeps().is_empty());
}

#[test]
fn rule_view_is_available_without_the_service() {
    let (classifier, scoring, _) = classifier(ScriptedScoring::default());

    let assessment = classifier.assess_rules(&posting(
        "hf",
        "hf-9",
        "Security Analyst",
        "SOC work with splunk and siem tooling",
    ));

    assert_eq!(assessment.winner, RoleLabel::SecurityAnalyst);
    assert_eq!(assessment.score_for(RoleLabel::SecurityAnalyst), 0.8);
    assert_eq!(scoring.calls(), 0);
}
