use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for companies in the target registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Identifier wrapper for tracked applications.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Reference data for a company the outreach run may visit. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub careers_url: String,
    #[serde(default)]
    pub role_affinity: Vec<RoleLabel>,
    #[serde(default = "default_priority")]
    pub priority: f32,
    #[serde(default)]
    pub preferred_locations: Vec<String>,
    /// Inactive companies stay in the list but are never visited.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_priority() -> f32 {
    1.0
}

fn default_active() -> bool {
    true
}

/// A single discovered opening, produced fresh by discovery on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub company: CompanyId,
    pub external_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl Posting {
    /// Text handed to both the keyword rules and the classification service.
    pub fn classification_text(&self) -> String {
        format!("{}\n{}", self.title, self.description)
    }
}

/// Career tracks a posting can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleLabel {
    AiEngineer,
    CloudEngineer,
    DataScientist,
    SecurityAnalyst,
    Unclassified,
}

impl RoleLabel {
    /// Classifiable tracks in tie-break order. `Unclassified` is never a candidate.
    pub const fn tracks() -> [Self; 4] {
        [
            Self::AiEngineer,
            Self::CloudEngineer,
            Self::DataScientist,
            Self::SecurityAnalyst,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::AiEngineer => "AI_ENGINEER",
            Self::CloudEngineer => "CLOUD_ENGINEER",
            Self::DataScientist => "DATA_SCIENTIST",
            Self::SecurityAnalyst => "SECURITY_ANALYST",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }

    /// Parses labels as returned by the classification service. Accepts both the
    /// canonical upper-case form and lower snake case; "other" maps to `Unclassified`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ai_engineer" => Some(Self::AiEngineer),
            "cloud_engineer" => Some(Self::CloudEngineer),
            "data_scientist" => Some(Self::DataScientist),
            "security_analyst" => Some(Self::SecurityAnalyst),
            "unclassified" | "other" => Some(Self::Unclassified),
            _ => None,
        }
    }
}

impl fmt::Display for RoleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Outcome of classifying one posting. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub posting_id: String,
    pub role: RoleLabel,
    pub rule_score: f64,
    #[serde(default)]
    pub model_score: Option<f64>,
    pub confidence: f64,
}

impl Classification {
    pub fn accepted(&self) -> bool {
        self.role != RoleLabel::Unclassified
    }
}

/// Opaque handle to a generated artifact (file path, object key, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle(pub String);

/// Resume and cover letter produced for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRefs {
    pub resume: ArtifactHandle,
    pub cover_letter: ArtifactHandle,
}

/// Lifecycle of an application. Declaration order is the forward order of the main path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationState {
    Discovered,
    Classified,
    MaterialsReady,
    PendingReview,
    Approved,
    Submitted,
    Rejected,
    Withdrawn,
    Failed,
}

impl ApplicationState {
    pub const fn ordered() -> [Self; 9] {
        [
            Self::Discovered,
            Self::Classified,
            Self::MaterialsReady,
            Self::PendingReview,
            Self::Approved,
            Self::Submitted,
            Self::Rejected,
            Self::Withdrawn,
            Self::Failed,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Discovered => "DISCOVERED",
            Self::Classified => "CLASSIFIED",
            Self::MaterialsReady => "MATERIALS_READY",
            Self::PendingReview => "PENDING_REVIEW",
            Self::Approved => "APPROVED",
            Self::Submitted => "SUBMITTED",
            Self::Rejected => "REJECTED",
            Self::Withdrawn => "WITHDRAWN",
            Self::Failed => "FAILED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::Rejected | Self::Withdrawn | Self::Failed
        )
    }

    /// Withdrawn and failed applications free the company's slot for the day.
    pub const fn holds_daily_slot(self) -> bool {
        !matches!(self, Self::Withdrawn | Self::Failed)
    }

    /// Position on the main path; alternate terminals share the terminal rank.
    const fn rank(self) -> u8 {
        match self {
            Self::Discovered => 0,
            Self::Classified => 1,
            Self::MaterialsReady => 2,
            Self::PendingReview => 3,
            Self::Approved => 4,
            Self::Submitted | Self::Rejected | Self::Withdrawn | Self::Failed => 5,
        }
    }

    /// Whether `self -> next` is a legal forward move.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }

        match next {
            Self::Withdrawn | Self::Failed => true,
            Self::Rejected => self == Self::PendingReview,
            Self::Approved => matches!(self, Self::MaterialsReady | Self::PendingReview),
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// One appended entry in an application's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: ApplicationState,
    pub at: DateTime<Utc>,
    pub note: String,
}

/// Tracked unit of work from acceptance through submission or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub company: CompanyId,
    pub posting: Posting,
    pub classification: Classification,
    pub day: NaiveDate,
    #[serde(default)]
    pub materials: Option<MaterialRefs>,
    #[serde(default)]
    pub external_reference: Option<String>,
    pub history: Vec<StateRecord>,
    /// Set once a follow-up has been sent for a submitted application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_sent_at: Option<DateTime<Utc>>,
}

impl Application {
    /// Current state, derived from the latest history record.
    pub fn state(&self) -> ApplicationState {
        self.history
            .last()
            .map(|record| record.state)
            .unwrap_or(ApplicationState::Discovered)
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|record| record.at)
    }

    pub fn outcome_note(&self) -> &str {
        self.history
            .last()
            .map(|record| record.note.as_str())
            .unwrap_or("")
    }

    pub fn entered_at(&self, state: ApplicationState) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .find(|record| record.state == state)
            .map(|record| record.at)
    }
}

/// Input to `ApplicationTracker::create`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewApplication {
    pub posting: Posting,
    pub classification: Classification,
    pub created_at: DateTime<Utc>,
}
