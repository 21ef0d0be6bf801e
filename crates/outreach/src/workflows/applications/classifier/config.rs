use serde::{Deserialize, Serialize};

/// Weights and thresholds for turning keyword hits and model verdicts into a confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub acceptance_threshold: f64,
    pub rule_weight: f64,
    pub model_weight: f64,
    pub primary_keyword_weight: f64,
    pub secondary_keyword_weight: f64,
    pub anti_keyword_penalty: f64,
    /// Raw keyword weight at which the rule score saturates at 1.0.
    pub saturation_weight: f64,
    /// Rule winners below this score fall back to `Unclassified`.
    pub minimum_rule_score: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.6,
            rule_weight: 0.4,
            model_weight: 0.6,
            primary_keyword_weight: 2.0,
            secondary_keyword_weight: 1.0,
            anti_keyword_penalty: 3.0,
            saturation_weight: 5.0,
            minimum_rule_score: 0.15,
        }
    }
}
