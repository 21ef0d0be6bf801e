use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::super::domain::{ApplicationId, CompanyId, RoleLabel};

/// What happened to one company during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompanyOutcome {
    Submitted {
        application: ApplicationId,
        role: RoleLabel,
        #[serde(skip_serializing_if = "Option::is_none")]
        external_reference: Option<String>,
    },
    AwaitingReview {
        application: ApplicationId,
    },
    Rejected {
        application: ApplicationId,
        reason: String,
    },
    /// Quota or cooldown denial; picked up again on a later run.
    Deferred {
        #[serde(skip_serializing_if = "Option::is_none")]
        application: Option<ApplicationId>,
        reason: String,
    },
    /// A live application already exists for today.
    AlreadyHandled,
    Duplicate {
        reason: String,
    },
    NoEligiblePostings {
        discovered: usize,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        application: Option<ApplicationId>,
        reason: String,
    },
}

impl CompanyOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            CompanyOutcome::Submitted { .. } => "submitted",
            CompanyOutcome::AwaitingReview { .. } => "awaiting_review",
            CompanyOutcome::Rejected { .. } => "rejected",
            CompanyOutcome::Deferred { .. } => "deferred",
            CompanyOutcome::AlreadyHandled => "already_handled",
            CompanyOutcome::Duplicate { .. } => "duplicate",
            CompanyOutcome::NoEligiblePostings { .. } => "no_eligible_postings",
            CompanyOutcome::Failed { .. } => "failed",
        }
    }

    pub fn application(&self) -> Option<&ApplicationId> {
        match self {
            CompanyOutcome::Submitted { application, .. }
            | CompanyOutcome::AwaitingReview { application }
            | CompanyOutcome::Rejected { application, .. } => Some(application),
            CompanyOutcome::Deferred { application, .. }
            | CompanyOutcome::Failed { application, .. } => application.as_ref(),
            CompanyOutcome::AlreadyHandled
            | CompanyOutcome::Duplicate { .. }
            | CompanyOutcome::NoEligiblePostings { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyReport {
    pub company: CompanyId,
    pub name: String,
    #[serde(flatten)]
    pub outcome: CompanyOutcome,
}

/// Summary of one engine run, written out as the daily JSON summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub day: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub companies: Vec<CompanyReport>,
    pub postings_discovered: usize,
    pub postings_screened_out: usize,
    pub postings_below_threshold: usize,
    pub applications_created: usize,
    /// Accepted classifications by role, counted across every company this run.
    pub role_distribution: BTreeMap<RoleLabel, usize>,
}

impl RunReport {
    pub fn new(day: NaiveDate, started_at: DateTime<Utc>) -> Self {
        Self {
            day,
            started_at,
            finished_at: started_at,
            companies: Vec::new(),
            postings_discovered: 0,
            postings_screened_out: 0,
            postings_below_threshold: 0,
            applications_created: 0,
            role_distribution: BTreeMap::new(),
        }
    }

    pub fn count(&self, label: &str) -> usize {
        self.companies
            .iter()
            .filter(|report| report.outcome.label() == label)
            .count()
    }

    pub fn submitted(&self) -> usize {
        self.count("submitted")
    }

    pub fn outcome_for(&self, company: &CompanyId) -> Option<&CompanyOutcome> {
        self.companies
            .iter()
            .find(|report| &report.company == company)
            .map(|report| &report.outcome)
    }

    pub(crate) fn note_accepted(&mut self, role: RoleLabel) {
        *self.role_distribution.entry(role).or_default() += 1;
    }
}
