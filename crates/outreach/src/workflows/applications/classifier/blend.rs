use super::super::collaborators::ModelVerdict;
use super::super::domain::{Classification, RoleLabel};
use super::config::ClassifierConfig;
use super::rules::RuleAssessment;

/// A classification-service verdict that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOpinion {
    pub role: RoleLabel,
    pub score: f64,
}

impl ModelOpinion {
    /// Rejects unknown labels and scores outside `[0, 1]`.
    pub fn from_verdict(verdict: &ModelVerdict) -> Option<Self> {
        let role = RoleLabel::parse(&verdict.label)?;
        if !verdict.score.is_finite() || !(0.0..=1.0).contains(&verdict.score) {
            return None;
        }
        Some(Self {
            role,
            score: verdict.score,
        })
    }
}

/// Blend of the rule and model scores. With no model score the rule score stands alone.
pub fn combined_confidence(
    rule_score: f64,
    model_score: Option<f64>,
    config: &ClassifierConfig,
) -> f64 {
    match model_score {
        Some(model) => {
            (config.rule_weight * rule_score + config.model_weight * model).clamp(0.0, 1.0)
        }
        None => rule_score,
    }
}

pub(crate) fn decide(
    posting_id: &str,
    rules: &RuleAssessment,
    model: Option<&ModelOpinion>,
    config: &ClassifierConfig,
) -> Classification {
    let (role, rule_score, model_score) = match model {
        None => (rules.winner, rules.winner_score, None),
        Some(opinion) => pick_blended_winner(rules, opinion, config),
    };

    let confidence = combined_confidence(rule_score, model_score, config);
    let role = if role != RoleLabel::Unclassified && confidence >= config.acceptance_threshold {
        role
    } else {
        RoleLabel::Unclassified
    };

    Classification {
        posting_id: posting_id.to_string(),
        role,
        rule_score,
        model_score,
        confidence,
    }
}

/// Highest blended track wins. Equal blends prefer the model's label, then the rule
/// winner, then track declaration order.
fn pick_blended_winner(
    rules: &RuleAssessment,
    opinion: &ModelOpinion,
    config: &ClassifierConfig,
) -> (RoleLabel, f64, Option<f64>) {
    let preference = |role: RoleLabel| -> u8 {
        if role == opinion.role {
            0
        } else if role == rules.winner {
            1
        } else {
            2
        }
    };

    let mut best: Option<(RoleLabel, f64, f64, f64)> = None;
    for role in RoleLabel::tracks() {
        let rule_score = rules.score_for(role);
        let model_score = if role == opinion.role { opinion.score } else { 0.0 };
        let blended = combined_confidence(rule_score, Some(model_score), config);

        let replace = match best {
            None => true,
            Some((current, current_blend, _, _)) => {
                blended > current_blend
                    || (blended == current_blend && preference(role) < preference(current))
            }
        };
        if replace {
            best = Some((role, blended, rule_score, model_score));
        }
    }

    match best {
        Some((role, blended, rule_score, model_score)) if blended > 0.0 => {
            (role, rule_score, Some(model_score))
        }
        _ => (
            RoleLabel::Unclassified,
            rules.winner_score,
            Some(if opinion.role == RoleLabel::Unclassified {
                opinion.score
            } else {
                0.0
            }),
        ),
    }
}
