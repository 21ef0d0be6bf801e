mod blend;
mod config;
mod rules;

pub use blend::{combined_confidence, ModelOpinion};
pub use config::ClassifierConfig;
pub use rules::{RoleRuleScore, RuleAssessment};

use std::sync::Arc;

use tracing::{debug, warn};

use super::clock::Clock;
use super::collaborators::RoleScoringService;
use super::domain::{Classification, Posting};
use super::retry::{with_retry, RetryPolicy};

/// Keyword scores for free text under `config`.
pub fn assess_text(text: &str, config: &ClassifierConfig) -> RuleAssessment {
    rules::assess(text, config)
}

/// Combines keyword rules with the classification service into one role decision.
pub struct Classifier {
    config: ClassifierConfig,
    scoring: Arc<dyn RoleScoringService>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Classifier {
    pub fn new(
        config: ClassifierConfig,
        scoring: Arc<dyn RoleScoringService>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            scoring,
            retry,
            clock,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Keyword-only view of a posting; no collaborator involved.
    pub fn assess_rules(&self, posting: &Posting) -> RuleAssessment {
        assess_text(&posting.classification_text(), &self.config)
    }

    /// Classifies a posting. A failing or malformed classification service degrades the
    /// result to the rule score; it never fails the call.
    pub async fn classify(&self, posting: &Posting) -> Classification {
        let text = posting.classification_text();
        let rules = rules::assess(&text, &self.config);
        let opinion = self.model_opinion(&posting.external_id, &text).await;

        let classification =
            blend::decide(&posting.external_id, &rules, opinion.as_ref(), &self.config);

        debug!(
            posting = %posting.external_id,
            role = %classification.role,
            rule_score = classification.rule_score,
            model_score = ?classification.model_score,
            confidence = classification.confidence,
            "posting classified"
        );

        classification
    }

    async fn model_opinion(&self, posting_id: &str, text: &str) -> Option<ModelOpinion> {
        let scoring = self.scoring.as_ref();
        let verdict = with_retry(&self.retry, self.clock.as_ref(), "score_role", || {
            scoring.score_role(text)
        })
        .await;

        match verdict {
            Ok(verdict) => {
                let opinion = ModelOpinion::from_verdict(&verdict);
                if opinion.is_none() {
                    warn!(
                        posting = posting_id,
                        label = %verdict.label,
                        score = verdict.score,
                        "classification service returned an unusable verdict, using rule score"
                    );
                }
                opinion
            }
            Err(err) => {
                warn!(
                    posting = posting_id,
                    error = %err,
                    "classification service unavailable, using rule score"
                );
                None
            }
        }
    }
}
