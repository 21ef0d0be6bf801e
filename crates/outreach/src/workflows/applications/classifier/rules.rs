use super::super::domain::RoleLabel;
use super::config::ClassifierConfig;

struct RoleKeywords {
    role: RoleLabel,
    primary: &'static [&'static str],
    secondary: &'static [&'static str],
    anti: &'static [&'static str],
}

impl RoleKeywords {
    fn keyword_count(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }
}

const ROLE_KEYWORDS: [RoleKeywords; 4] = [
    RoleKeywords {
        role: RoleLabel::AiEngineer,
        primary: &[
            "ai engineer",
            "artificial intelligence",
            "machine learning engineer",
            "ml engineer",
            "deep learning",
            "neural networks",
            "llm",
            "nlp",
            "computer vision",
            "pytorch",
            "tensorflow",
            "transformers",
            "ai research",
            "applied scientist",
            "ml platform",
            "mlops",
        ],
        secondary: &[
            "python",
            "keras",
            "scikit learn",
            "model deployment",
            "model training",
            "feature engineering",
            "recommender systems",
            "reinforcement learning",
            "gpt",
            "bert",
        ],
        anti: &["purely frontend", "marketing", "sales", "business development"],
    },
    RoleKeywords {
        role: RoleLabel::CloudEngineer,
        primary: &[
            "cloud engineer",
            "devops",
            "sre",
            "site reliability",
            "infrastructure",
            "kubernetes",
            "docker",
            "aws",
            "gcp",
            "azure",
            "terraform",
            "ansible",
            "jenkins",
            "ci cd",
            "platform engineer",
        ],
        secondary: &[
            "monitoring",
            "prometheus",
            "grafana",
            "microservices",
            "containerization",
            "orchestration",
            "automation",
            "scaling",
            "load balancing",
            "networking",
        ],
        anti: &["frontend only", "marketing", "sales", "business development"],
    },
    RoleKeywords {
        role: RoleLabel::DataScientist,
        primary: &[
            "data scientist",
            "data science",
            "analytics",
            "statistical analysis",
            "predictive modeling",
            "data mining",
            "business intelligence",
            "data analyst",
            "quantitative analyst",
            "research scientist",
        ],
        secondary: &[
            "r",
            "sql",
            "tableau",
            "pandas",
            "numpy",
            "scipy",
            "statistics",
            "hypothesis testing",
            "a b testing",
            "visualization",
            "dashboard",
            "experimentation",
        ],
        anti: &["purely engineering", "infrastructure only", "marketing", "sales"],
    },
    RoleKeywords {
        role: RoleLabel::SecurityAnalyst,
        primary: &[
            "security analyst",
            "cybersecurity analyst",
            "soc analyst",
            "information security",
            "cyber security",
            "security engineer",
            "incident response",
            "threat analysis",
            "vulnerability assessment",
            "security operations",
            "infosec",
        ],
        secondary: &[
            "siem",
            "splunk",
            "wireshark",
            "nessus",
            "metasploit",
            "penetration testing",
            "malware analysis",
            "forensics",
            "risk assessment",
            "firewall",
            "threat hunting",
            "cissp",
            "nist",
            "iso 27001",
        ],
        anti: &["purely sales", "marketing only", "business development only"],
    },
];

/// Keyword evidence for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRuleScore {
    pub role: RoleLabel,
    pub score: f64,
    /// Matched keywords over the size of the track's keyword set.
    pub density: f64,
    pub matched: Vec<&'static str>,
}

/// Rule-based view of a posting across all tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleAssessment {
    pub scores: Vec<RoleRuleScore>,
    pub winner: RoleLabel,
    pub winner_score: f64,
}

impl RuleAssessment {
    pub fn score_for(&self, role: RoleLabel) -> f64 {
        self.scores
            .iter()
            .find(|entry| entry.role == role)
            .map(|entry| entry.score)
            .unwrap_or(0.0)
    }
}

/// Lower-cases the text and reduces it to space-delimited alphanumeric words so that
/// keywords only match on word boundaries ("r" must not match inside "engineer").
fn normalize(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len() + 2);
    normalized.push(' ');
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space {
                normalized.push(' ');
                pending_space = false;
            }
            normalized.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    normalized.push(' ');
    normalized
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    normalized.contains(&format!(" {phrase} "))
}

pub(crate) fn assess(text: &str, config: &ClassifierConfig) -> RuleAssessment {
    let normalized = normalize(text);

    let scores: Vec<RoleRuleScore> = ROLE_KEYWORDS
        .iter()
        .map(|keywords| score_role(&normalized, keywords, config))
        .collect();

    let best = scores.iter().fold(None::<&RoleRuleScore>, |best, candidate| match best {
        Some(current)
            if current.score > candidate.score
                || (current.score == candidate.score && current.density >= candidate.density) =>
        {
            Some(current)
        }
        _ => Some(candidate),
    });

    let (winner, winner_score) = match best {
        Some(entry) if entry.score >= config.minimum_rule_score && entry.score > 0.0 => {
            (entry.role, entry.score)
        }
        Some(entry) => (RoleLabel::Unclassified, entry.score),
        None => (RoleLabel::Unclassified, 0.0),
    };

    RuleAssessment {
        scores,
        winner,
        winner_score,
    }
}

fn score_role(
    normalized: &str,
    keywords: &RoleKeywords,
    config: &ClassifierConfig,
) -> RoleRuleScore {
    let mut raw = 0.0;
    let mut matched = Vec::new();

    for keyword in keywords.primary {
        if contains_phrase(normalized, keyword) {
            raw += config.primary_keyword_weight;
            matched.push(*keyword);
        }
    }

    for keyword in keywords.secondary {
        if contains_phrase(normalized, keyword) {
            raw += config.secondary_keyword_weight;
            matched.push(*keyword);
        }
    }

    for keyword in keywords.anti {
        if contains_phrase(normalized, keyword) {
            raw -= config.anti_keyword_penalty;
        }
    }

    let score = if config.saturation_weight > 0.0 {
        (raw / config.saturation_weight).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let density = matched.len() as f64 / keywords.keyword_count().max(1) as f64;

    RoleRuleScore {
        role: keywords.role,
        score,
        density,
        matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_word_boundaries() {
        assert_eq!(normalize("CI/CD & Kubernetes!"), " ci cd kubernetes ");
        assert!(!contains_phrase(&normalize("Senior engineer"), "r"));
        assert!(contains_phrase(&normalize("Fluent in R and SQL"), "r"));
    }

    #[test]
    fn cloud_keywords_pull_towards_cloud_engineer() {
        let assessment = assess(
            "Infrastructure role running kubernetes and terraform",
            &ClassifierConfig::default(),
        );

        assert_eq!(assessment.winner, RoleLabel::CloudEngineer);
        assert!((assessment.winner_score - 1.0).abs() < 1e-9);
        let cloud = &assessment.scores[1];
        assert_eq!(cloud.matched, vec!["infrastructure", "kubernetes", "terraform"]);
    }

    #[test]
    fn anti_keywords_cancel_matches() {
        let assessment = assess(
            "Kubernetes sales engineer for marketing campaigns",
            &ClassifierConfig::default(),
        );

        assert_eq!(assessment.score_for(RoleLabel::CloudEngineer), 0.0);
        assert_eq!(assessment.winner, RoleLabel::Unclassified);
    }

    #[test]
    fn equal_scores_resolve_to_denser_keyword_set() {
        // One primary hit each (2.0): "analytics" in a 22-keyword set beats "llm"
        // in a 26-keyword set.
        let assessment = assess("llm analytics", &ClassifierConfig::default());

        assert_eq!(
            assessment.score_for(RoleLabel::AiEngineer),
            assessment.score_for(RoleLabel::DataScientist)
        );
        assert_eq!(assessment.winner, RoleLabel::DataScientist);
    }

    #[test]
    fn weak_evidence_falls_back_to_unclassified() {
        let config = ClassifierConfig {
            minimum_rule_score: 0.3,
            ..ClassifierConfig::default()
        };
        let assessment = assess("Looking for strong python skills", &config);

        assert_eq!(assessment.winner, RoleLabel::Unclassified);
        assert!((assessment.winner_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn no_matches_are_unclassified() {
        let assessment = assess("Barista wanted", &ClassifierConfig::default());
        assert_eq!(assessment.winner, RoleLabel::Unclassified);
        assert_eq!(assessment.winner_score, 0.0);
    }
}
