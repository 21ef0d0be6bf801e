use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::CompanyId;
use super::storage::{BudgetStore, StorageError};

/// Ceilings and spacing enforced across a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    pub max_applications_per_day: u32,
    pub max_companies_per_day: u32,
    pub max_applications_per_run: Option<u32>,
    pub application_delay: Duration,
    pub company_visit_delay: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_applications_per_day: 25,
            max_companies_per_day: 40,
            max_applications_per_run: None,
            application_delay: Duration::from_secs(90),
            company_visit_delay: Duration::from_secs(180),
        }
    }
}

/// Per-day counters gating every quota-limited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyBudget {
    pub date: NaiveDate,
    pub applications_submitted: u32,
    pub companies_visited: u32,
    #[serde(default)]
    pub visited_companies: BTreeSet<CompanyId>,
    #[serde(default)]
    pub applied_companies: BTreeSet<CompanyId>,
    #[serde(default)]
    pub company_last_action: BTreeMap<CompanyId, DateTime<Utc>>,
    #[serde(default)]
    pub last_submission_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_visit_at: Option<DateTime<Utc>>,
}

impl DailyBudget {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            applications_submitted: 0,
            companies_visited: 0,
            visited_companies: BTreeSet::new(),
            applied_companies: BTreeSet::new(),
            company_last_action: BTreeMap::new(),
            last_submission_at: None,
            last_visit_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CompanyVisit,
    ApplicationSubmission,
}

impl ActionKind {
    pub const fn label(self) -> &'static str {
        match self {
            ActionKind::CompanyVisit => "company visit",
            ActionKind::ApplicationSubmission => "application submission",
        }
    }
}

/// Why a quota-limited action may not happen now. Never an error for the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaDenied {
    #[error("daily application limit of {limit} reached")]
    DailyApplicationLimit { limit: u32 },
    #[error("per-run application limit of {limit} reached")]
    RunApplicationLimit { limit: u32 },
    #[error("daily company visit limit of {limit} reached")]
    DailyCompanyLimit { limit: u32 },
    #[error("already applied to {company} today")]
    CompanyAlreadyApplied { company: CompanyId },
    #[error("{} cooldown: {}s remaining", .kind.label(), .remaining.as_secs())]
    Cooldown { kind: ActionKind, remaining: Duration },
}

impl QuotaDenied {
    /// Only spacing denials clear up by waiting within the same run.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            QuotaDenied::Cooldown { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied(QuotaDenied),
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }

    pub fn reason(&self) -> Option<&QuotaDenied> {
        match self {
            RateDecision::Allowed => None,
            RateDecision::Denied(reason) => Some(reason),
        }
    }
}

/// Sole reader and writer of the persisted `DailyBudget`.
pub struct RateLimitController {
    limits: RateLimits,
    store: Arc<dyn BudgetStore>,
    budget: DailyBudget,
    run_submissions: u32,
}

impl RateLimitController {
    pub fn open(
        limits: RateLimits,
        store: Arc<dyn BudgetStore>,
        today: NaiveDate,
    ) -> Result<Self, StorageError> {
        let budget = store.load(today)?.unwrap_or_else(|| DailyBudget::new(today));
        Ok(Self {
            limits,
            store,
            budget,
            run_submissions: 0,
        })
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    pub fn budget(&self) -> &DailyBudget {
        &self.budget
    }

    /// Resets per-run counters and reloads the budget for `today`.
    pub fn begin_run(&mut self, today: NaiveDate) -> Result<(), StorageError> {
        self.budget = self
            .store
            .load(today)?
            .unwrap_or_else(|| DailyBudget::new(today));
        self.run_submissions = 0;
        Ok(())
    }

    fn roll_to(&mut self, day: NaiveDate) -> Result<(), StorageError> {
        if self.budget.date != day {
            debug!(from = %self.budget.date, to = %day, "daily budget rolled over");
            self.budget = self
                .store
                .load(day)?
                .unwrap_or_else(|| DailyBudget::new(day));
        }
        Ok(())
    }

    /// Visit gate and one-application-per-company guard.
    pub fn may_act_on_company(
        &mut self,
        company: &CompanyId,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StorageError> {
        self.roll_to(now.date_naive())?;
        let budget = &self.budget;

        if budget.applied_companies.contains(company) {
            return Ok(RateDecision::Denied(QuotaDenied::CompanyAlreadyApplied {
                company: company.clone(),
            }));
        }

        if !budget.visited_companies.contains(company) {
            if budget.companies_visited >= self.limits.max_companies_per_day {
                return Ok(RateDecision::Denied(QuotaDenied::DailyCompanyLimit {
                    limit: self.limits.max_companies_per_day,
                }));
            }
            if let Some(remaining) =
                remaining_cooldown(budget.last_visit_at, self.limits.company_visit_delay, now)
            {
                return Ok(RateDecision::Denied(QuotaDenied::Cooldown {
                    kind: ActionKind::CompanyVisit,
                    remaining,
                }));
            }
        }

        Ok(RateDecision::Allowed)
    }

    /// Daily and per-run application ceilings plus submission spacing.
    pub fn may_consume_daily_application_slot(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StorageError> {
        self.roll_to(now.date_naive())?;

        if self.budget.applications_submitted >= self.limits.max_applications_per_day {
            return Ok(RateDecision::Denied(QuotaDenied::DailyApplicationLimit {
                limit: self.limits.max_applications_per_day,
            }));
        }

        if let Some(limit) = self.limits.max_applications_per_run {
            if self.run_submissions >= limit {
                return Ok(RateDecision::Denied(QuotaDenied::RunApplicationLimit { limit }));
            }
        }

        if let Some(remaining) = remaining_cooldown(
            self.budget.last_submission_at,
            self.limits.application_delay,
            now,
        ) {
            return Ok(RateDecision::Denied(QuotaDenied::Cooldown {
                kind: ActionKind::ApplicationSubmission,
                remaining,
            }));
        }

        Ok(RateDecision::Allowed)
    }

    /// Records one completed action and persists the budget. Call exactly once per action.
    pub fn record_action(
        &mut self,
        kind: ActionKind,
        company: &CompanyId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.roll_to(now.date_naive())?;
        // Memory only changes once the new snapshot is on disk.
        let mut budget = self.budget.clone();

        match kind {
            ActionKind::CompanyVisit => {
                if budget.visited_companies.insert(company.clone()) {
                    budget.companies_visited += 1;
                }
                budget.last_visit_at = Some(now);
            }
            ActionKind::ApplicationSubmission => {
                budget.applications_submitted += 1;
                budget.applied_companies.insert(company.clone());
                budget.last_submission_at = Some(now);
            }
        }
        budget.company_last_action.insert(company.clone(), now);

        self.store.save(&budget)?;
        if kind == ActionKind::ApplicationSubmission {
            self.run_submissions += 1;
        }
        self.budget = budget;
        Ok(())
    }
}

fn remaining_cooldown(
    last: Option<DateTime<Utc>>,
    delay: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let last = last?;
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    if elapsed >= delay {
        None
    } else {
        Some(delay - elapsed)
    }
}
