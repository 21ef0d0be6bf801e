use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::super::domain::{Application, ApplicationState, CompanyId, RoleLabel};

/// Submitted applications quiet for this long are due a follow-up.
pub const FOLLOW_UP_AFTER_DAYS: i64 = 14;

const RECENT_WINDOW_DAYS: i64 = 7;

/// Aggregates computed by scanning the ledger; nothing here is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub by_state: BTreeMap<ApplicationState, usize>,
    pub by_role: BTreeMap<RoleLabel, usize>,
    pub by_company: BTreeMap<CompanyId, usize>,
    pub average_confidence: Option<f64>,
    /// Submitted over every decided outcome (submitted, rejected, failed).
    pub success_rate: Option<f64>,
    pub created_last_7_days: usize,
}

impl LedgerStats {
    pub fn collect(applications: &[Application], now: DateTime<Utc>) -> Self {
        let mut by_state = BTreeMap::new();
        let mut by_role = BTreeMap::new();
        let mut by_company = BTreeMap::new();
        let mut confidence_sum = 0.0;
        let recent_cutoff = now - Duration::days(RECENT_WINDOW_DAYS);
        let mut created_last_7_days = 0;

        for application in applications {
            *by_state.entry(application.state()).or_insert(0) += 1;
            *by_role
                .entry(application.classification.role)
                .or_insert(0) += 1;
            *by_company.entry(application.company.clone()).or_insert(0) += 1;
            confidence_sum += application.classification.confidence;

            if application
                .history
                .first()
                .is_some_and(|created| created.at >= recent_cutoff)
            {
                created_last_7_days += 1;
            }
        }

        let count = |state| by_state.get(&state).copied().unwrap_or(0);
        let submitted = count(ApplicationState::Submitted);
        let decided =
            submitted + count(ApplicationState::Rejected) + count(ApplicationState::Failed);

        Self {
            total: applications.len(),
            average_confidence: (!applications.is_empty())
                .then(|| confidence_sum / applications.len() as f64),
            success_rate: (decided > 0).then(|| submitted as f64 / decided as f64),
            by_state,
            by_role,
            by_company,
            created_last_7_days,
        }
    }
}

/// Submitted applications whose last activity is at least `FOLLOW_UP_AFTER_DAYS` old and
/// that have not been followed up yet.
pub fn follow_ups(applications: &[Application], now: DateTime<Utc>) -> Vec<&Application> {
    let cutoff = now - Duration::days(FOLLOW_UP_AFTER_DAYS);
    applications
        .iter()
        .filter(|application| application.state() == ApplicationState::Submitted)
        .filter(|application| application.follow_up_sent_at.is_none())
        .filter(|application| {
            application
                .last_activity()
                .is_some_and(|last| last <= cutoff)
        })
        .collect()
}
