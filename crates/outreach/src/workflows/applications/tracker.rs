use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::domain::{
    Application, ApplicationId, ApplicationState, CompanyId, MaterialRefs, NewApplication,
    RoleLabel, StateRecord,
};
use super::storage::{LedgerEntry, LedgerStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("an application for {company} on {day} already exists")]
    DuplicateApplication { company: CompanyId, day: NaiveDate },
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error("application {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ApplicationId,
        from: ApplicationState,
        to: ApplicationState,
    },
    #[error("application {id} is {state}; only submitted applications take follow-ups")]
    NotSubmitted {
        id: ApplicationId,
        state: ApplicationState,
    },
    #[error("posting {posting} was not accepted by the classifier")]
    NotAccepted { posting: String },
    #[error("ledger replay failed: {0}")]
    CorruptLedger(String),
    #[error(transparent)]
    Store(#[from] StorageError),
}

/// Selection criteria for `ApplicationTracker::query`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationFilter {
    pub company: Option<CompanyId>,
    pub day: Option<NaiveDate>,
    pub states: Vec<ApplicationState>,
    pub role: Option<RoleLabel>,
    pub created_since: Option<DateTime<Utc>>,
}

impl ApplicationFilter {
    pub fn for_company(company: CompanyId) -> Self {
        Self {
            company: Some(company),
            ..Self::default()
        }
    }

    pub fn in_states(states: &[ApplicationState]) -> Self {
        Self {
            states: states.to_vec(),
            ..Self::default()
        }
    }

    fn matches(&self, application: &Application) -> bool {
        if let Some(company) = &self.company {
            if &application.company != company {
                return false;
            }
        }
        if let Some(day) = self.day {
            if application.day != day {
                return false;
            }
        }
        if !self.states.is_empty() && !self.states.contains(&application.state()) {
            return false;
        }
        if let Some(role) = self.role {
            if application.classification.role != role {
                return false;
            }
        }
        if let Some(since) = self.created_since {
            match application.history.first() {
                Some(first) if first.at >= since => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct Ledger {
    applications: Vec<Application>,
    index: HashMap<ApplicationId, usize>,
}

impl Ledger {
    fn apply(&mut self, entry: LedgerEntry) -> Result<(), TrackerError> {
        match entry {
            LedgerEntry::Created { application } => {
                if self.index.contains_key(&application.id) {
                    return Err(TrackerError::CorruptLedger(format!(
                        "application {} created twice",
                        application.id
                    )));
                }
                self.index
                    .insert(application.id.clone(), self.applications.len());
                self.applications.push(application);
            }
            LedgerEntry::Transitioned {
                id,
                record,
                external_reference,
            } => {
                let application = self.get_mut(&id)?;
                let from = application.state();
                if !from.can_transition_to(record.state) {
                    return Err(TrackerError::InvalidTransition {
                        id,
                        from,
                        to: record.state,
                    });
                }
                application.history.push(record);
                if external_reference.is_some() {
                    application.external_reference = external_reference;
                }
            }
            LedgerEntry::MaterialsAttached { id, materials } => {
                self.get_mut(&id)?.materials = Some(materials);
            }
            LedgerEntry::FollowUpSent { id, at } => {
                let application = self.get_mut(&id)?;
                let state = application.state();
                if state != ApplicationState::Submitted {
                    return Err(TrackerError::NotSubmitted { id, state });
                }
                application.follow_up_sent_at = Some(at);
            }
        }
        Ok(())
    }

    fn get(&self, id: &ApplicationId) -> Result<&Application, TrackerError> {
        self.index
            .get(id)
            .map(|&slot| &self.applications[slot])
            .ok_or_else(|| TrackerError::NotFound(id.clone()))
    }

    fn get_mut(&mut self, id: &ApplicationId) -> Result<&mut Application, TrackerError> {
        match self.index.get(id) {
            Some(&slot) => Ok(&mut self.applications[slot]),
            None => Err(TrackerError::NotFound(id.clone())),
        }
    }

    fn holds_slot(&self, company: &CompanyId, day: NaiveDate) -> bool {
        self.applications.iter().any(|application| {
            &application.company == company
                && application.day == day
                && application.state().holds_daily_slot()
        })
    }

    fn next_id(&self) -> ApplicationId {
        ApplicationId(format!("app-{:06}", self.applications.len() + 1))
    }
}

/// Durable ledger of applications. Every mutation is written to the store before it is
/// visible in memory, so a crash never leaves the two out of step.
pub struct ApplicationTracker {
    store: Arc<dyn LedgerStore>,
    ledger: Mutex<Ledger>,
}

impl ApplicationTracker {
    /// Replays the store into memory.
    pub fn open(store: Arc<dyn LedgerStore>) -> Result<Self, TrackerError> {
        let mut ledger = Ledger::default();
        let entries = store.load()?;
        let replayed = entries.len();
        let mut skipped = 0usize;
        for entry in entries {
            match ledger.apply(entry) {
                Ok(()) => {}
                // Written by a process working from a stale view; the earlier entry stands.
                Err(err @ TrackerError::InvalidTransition { .. })
                | Err(err @ TrackerError::NotSubmitted { .. }) => {
                    warn!(error = %err, "skipping illegal ledger entry");
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        debug!(
            entries = replayed,
            skipped,
            applications = ledger.applications.len(),
            "application ledger replayed"
        );

        Ok(Self {
            store,
            ledger: Mutex::new(ledger),
        })
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().expect("tracker mutex poisoned")
    }

    fn commit(&self, ledger: &mut Ledger, entry: LedgerEntry) -> Result<(), TrackerError> {
        self.store.append(&entry)?;
        ledger.apply(entry)
    }

    /// Whether `company` already has a live (not withdrawn, not failed) application for `day`.
    pub fn exists(&self, company: &CompanyId, day: NaiveDate) -> bool {
        self.ledger().holds_slot(company, day)
    }

    /// Creates an application in `CLASSIFIED`, dated by `created_at`'s UTC day.
    pub fn create(&self, new: NewApplication) -> Result<ApplicationId, TrackerError> {
        if !new.classification.accepted() {
            return Err(TrackerError::NotAccepted {
                posting: new.posting.external_id,
            });
        }

        let mut ledger = self.ledger();
        let company = new.posting.company.clone();
        let day = new.created_at.date_naive();
        if ledger.holds_slot(&company, day) {
            return Err(TrackerError::DuplicateApplication { company, day });
        }

        let id = ledger.next_id();
        let history = vec![
            StateRecord {
                state: ApplicationState::Discovered,
                at: new.posting.discovered_at.min(new.created_at),
                note: format!("posting {} discovered", new.posting.external_id),
            },
            StateRecord {
                state: ApplicationState::Classified,
                at: new.created_at,
                note: format!(
                    "classified as {} with confidence {:.2}",
                    new.classification.role, new.classification.confidence
                ),
            },
        ];
        let application = Application {
            id: id.clone(),
            company,
            posting: new.posting,
            classification: new.classification,
            day,
            materials: None,
            external_reference: None,
            history,
            follow_up_sent_at: None,
        };

        self.commit(&mut ledger, LedgerEntry::Created { application })?;
        info!(application = %id, "application created");
        Ok(id)
    }

    /// Appends a forward transition. Backward or otherwise illegal moves are rejected.
    pub fn transition(
        &self,
        id: &ApplicationId,
        state: ApplicationState,
        note: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Application, TrackerError> {
        self.apply_transition(id, state, note.into(), at, None)
    }

    /// Moves an approved application to `SUBMITTED`, keeping the portal's reference.
    pub fn record_submission(
        &self,
        id: &ApplicationId,
        external_reference: Option<String>,
        note: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Application, TrackerError> {
        self.apply_transition(
            id,
            ApplicationState::Submitted,
            note.into(),
            at,
            external_reference,
        )
    }

    fn apply_transition(
        &self,
        id: &ApplicationId,
        state: ApplicationState,
        note: String,
        at: DateTime<Utc>,
        external_reference: Option<String>,
    ) -> Result<Application, TrackerError> {
        let mut ledger = self.ledger();
        let from = ledger.get(id)?.state();
        if !from.can_transition_to(state) {
            return Err(TrackerError::InvalidTransition {
                id: id.clone(),
                from,
                to: state,
            });
        }

        self.commit(
            &mut ledger,
            LedgerEntry::Transitioned {
                id: id.clone(),
                record: StateRecord { state, at, note },
                external_reference,
            },
        )?;
        debug!(application = %id, %from, to = %state, "application transitioned");
        ledger.get(id).cloned()
    }

    pub fn attach_materials(
        &self,
        id: &ApplicationId,
        materials: MaterialRefs,
    ) -> Result<(), TrackerError> {
        let mut ledger = self.ledger();
        let state = ledger.get(id)?.state();
        if state.is_terminal() {
            return Err(TrackerError::InvalidTransition {
                id: id.clone(),
                from: state,
                to: ApplicationState::MaterialsReady,
            });
        }
        self.commit(
            &mut ledger,
            LedgerEntry::MaterialsAttached {
                id: id.clone(),
                materials,
            },
        )
    }

    /// Marks a submitted application as followed up, taking it off the follow-up list.
    pub fn mark_follow_up_sent(
        &self,
        id: &ApplicationId,
        at: DateTime<Utc>,
    ) -> Result<Application, TrackerError> {
        let mut ledger = self.ledger();
        let state = ledger.get(id)?.state();
        if state != ApplicationState::Submitted {
            return Err(TrackerError::NotSubmitted {
                id: id.clone(),
                state,
            });
        }
        self.commit(
            &mut ledger,
            LedgerEntry::FollowUpSent { id: id.clone(), at },
        )?;
        info!(application = %id, "follow-up recorded");
        ledger.get(id).cloned()
    }

    pub fn get(&self, id: &ApplicationId) -> Result<Application, TrackerError> {
        self.ledger().get(id).cloned()
    }

    pub fn timeline(&self, id: &ApplicationId) -> Result<Vec<StateRecord>, TrackerError> {
        Ok(self.ledger().get(id)?.history.clone())
    }

    /// Matching applications in creation order.
    pub fn query(&self, filter: &ApplicationFilter) -> Vec<Application> {
        self.ledger()
            .applications
            .iter()
            .filter(|application| filter.matches(application))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Application> {
        self.ledger().applications.clone()
    }

    /// Whether a live application was ever made from this posting.
    pub fn has_posting(&self, company: &CompanyId, external_id: &str) -> bool {
        self.ledger().applications.iter().any(|application| {
            &application.company == company
                && application.posting.external_id == external_id
                && application.state().holds_daily_slot()
        })
    }

    /// Non-terminal applications for `company`, oldest first.
    pub fn open_for_company(&self, company: &CompanyId) -> Vec<Application> {
        self.ledger()
            .applications
            .iter()
            .filter(|application| {
                &application.company == company && !application.state().is_terminal()
            })
            .cloned()
            .collect()
    }
}
