use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::classifier::Classifier;
use super::clock::Clock;
use super::collaborators::{
    MaterialsGenerator, PostingDiscovery, ReviewDecision, ReviewDesk, SubmissionGateway,
    SubmissionPacket,
};
use super::domain::{
    Application, ApplicationId, ApplicationState, Classification, Company, CompanyId,
    MaterialRefs, NewApplication, Posting,
};
use super::rate_limit::{ActionKind, QuotaDenied, RateDecision, RateLimitController};
use super::report::{CompanyOutcome, CompanyReport, RunReport};
use super::retry::{with_retry, RetryPolicy};
use super::screening::ScreeningPolicy;
use super::storage::{RunLockError, RunLocks, StorageError};
use super::tracker::{ApplicationTracker, TrackerError};

/// Behavioural switches for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub require_manual_review: bool,
    /// Sleep out a pure cooldown denial once instead of deferring.
    pub wait_for_cooldown: bool,
    pub screening: ScreeningPolicy,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            require_manual_review: true,
            wait_for_cooldown: true,
            screening: ScreeningPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Side-effecting services the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub discovery: Arc<dyn PostingDiscovery>,
    pub materials: Arc<dyn MaterialsGenerator>,
    pub submission: Arc<dyn SubmissionGateway>,
    pub review: Arc<dyn ReviewDesk>,
}

/// Errors that abort a whole run. Everything company-scoped ends up in the report instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Lock(#[from] RunLockError),
    #[error("daily budget unavailable: {0}")]
    Budget(#[from] StorageError),
}

#[derive(Clone, Copy)]
enum Gate<'a> {
    Company(&'a CompanyId),
    ApplicationSlot,
}

enum Blocked {
    Denied(QuotaDenied),
    Budget(StorageError),
}

/// A step either yields the application in its new state or ends the company's turn.
type Step = Result<Application, CompanyOutcome>;

pub struct OrchestrationEngine {
    settings: EngineSettings,
    classifier: Classifier,
    tracker: Arc<ApplicationTracker>,
    limiter: RateLimitController,
    collaborators: Collaborators,
    locks: Arc<dyn RunLocks>,
    clock: Arc<dyn Clock>,
}

impl OrchestrationEngine {
    pub fn new(
        settings: EngineSettings,
        classifier: Classifier,
        tracker: Arc<ApplicationTracker>,
        limiter: RateLimitController,
        collaborators: Collaborators,
        locks: Arc<dyn RunLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            classifier,
            tracker,
            limiter,
            collaborators,
            locks,
            clock,
        }
    }

    pub fn tracker(&self) -> &ApplicationTracker {
        &self.tracker
    }

    pub fn limiter(&self) -> &RateLimitController {
        &self.limiter
    }

    /// Runs one pass over `companies`. Only a held run lock or an unreadable budget aborts;
    /// every other problem is reported per company.
    pub async fn run(&mut self, companies: &[Company]) -> Result<RunReport, EngineError> {
        let started_at = self.clock.now();
        let day = started_at.date_naive();
        let _lease = self.locks.acquire(day)?;
        self.limiter.begin_run(day)?;

        info!(%day, companies = companies.len(), "outreach run started");
        let mut report = RunReport::new(day, started_at);

        for company in by_priority(companies) {
            let outcome = self.process_company(company, &mut report).await;
            match &outcome {
                CompanyOutcome::Failed { reason, .. } => {
                    warn!(company = %company.id, reason = %reason, "company failed")
                }
                CompanyOutcome::Deferred { reason, .. } => {
                    warn!(company = %company.id, reason = %reason, "company deferred")
                }
                other => info!(company = %company.id, outcome = other.label(), "company processed"),
            }
            report.companies.push(CompanyReport {
                company: company.id.clone(),
                name: company.name.clone(),
                outcome,
            });
        }

        report.finished_at = self.clock.now();
        info!(
            %day,
            submitted = report.submitted(),
            created = report.applications_created,
            discovered = report.postings_discovered,
            "outreach run finished"
        );
        Ok(report)
    }

    /// Records an out-of-band review verdict for an application parked at the gate.
    pub fn record_review(
        &self,
        id: &ApplicationId,
        decision: &ReviewDecision,
    ) -> Result<Application, TrackerError> {
        apply_review(&self.tracker, id, decision, self.clock.now())
    }

    async fn process_company(
        &mut self,
        company: &Company,
        report: &mut RunReport,
    ) -> CompanyOutcome {
        // Unfinished work from earlier runs takes the company's turn.
        if let Some(open) = self.tracker.open_for_company(&company.id).into_iter().next() {
            debug!(
                company = %company.id,
                application = %open.id,
                state = %open.state(),
                "resuming application"
            );
            return self.advance(company, open).await;
        }

        let today = self.clock.now().date_naive();
        if self.tracker.exists(&company.id, today) {
            return CompanyOutcome::AlreadyHandled;
        }

        if let Err(outcome) = self.ensure_daily_capacity() {
            return outcome;
        }
        if let Err(blocked) = self.permit(Gate::Company(&company.id)).await {
            return blocked.into_outcome(None);
        }

        let postings = match self.discover(company).await {
            Ok(postings) => postings,
            Err(outcome) => return outcome,
        };
        let discovered = postings.len();
        report.postings_discovered += discovered;

        let Some((posting, classification)) = self.select_posting(company, postings, report).await
        else {
            return CompanyOutcome::NoEligiblePostings { discovered };
        };

        let created = self.tracker.create(NewApplication {
            posting,
            classification,
            created_at: self.clock.now(),
        });
        let id = match created {
            Ok(id) => id,
            Err(err @ TrackerError::DuplicateApplication { .. }) => {
                return CompanyOutcome::Duplicate {
                    reason: err.to_string(),
                }
            }
            Err(err) => return tracker_failure(None, err),
        };
        report.applications_created += 1;

        match self.tracker.get(&id) {
            Ok(application) => self.advance(company, application).await,
            Err(err) => tracker_failure(Some(id), err),
        }
    }

    /// A full daily budget means nothing can be submitted today, so skip the visit.
    fn ensure_daily_capacity(&mut self) -> Result<(), CompanyOutcome> {
        match self
            .limiter
            .may_consume_daily_application_slot(self.clock.now())
        {
            Ok(RateDecision::Denied(reason)) if reason.retry_after().is_none() => {
                Err(Blocked::Denied(reason).into_outcome(None))
            }
            Ok(_) => Ok(()),
            Err(err) => Err(Blocked::Budget(err).into_outcome(None)),
        }
    }

    async fn discover(&mut self, company: &Company) -> Result<Vec<Posting>, CompanyOutcome> {
        let discovery = self.collaborators.discovery.as_ref();
        let result = with_retry(
            &self.settings.retry,
            self.clock.as_ref(),
            "discover_postings",
            || discovery.discover_postings(company),
        )
        .await;

        let postings = result.map_err(|err| CompanyOutcome::Failed {
            application: None,
            reason: format!("discovery failed: {err}"),
        })?;

        // Only a completed visit counts against the budget.
        self.limiter
            .record_action(ActionKind::CompanyVisit, &company.id, self.clock.now())
            .map_err(|err| Blocked::Budget(err).into_outcome(None))?;

        debug!(company = %company.id, postings = postings.len(), "postings discovered");
        Ok(postings)
    }

    /// Screens and classifies every posting, returning the most confident accepted one.
    async fn select_posting(
        &self,
        company: &Company,
        postings: Vec<Posting>,
        report: &mut RunReport,
    ) -> Option<(Posting, Classification)> {
        let screening = &self.settings.screening;
        let mut best: Option<(Posting, Classification)> = None;

        for posting in postings {
            let tracked = self.tracker.has_posting(&company.id, &posting.external_id);
            if let Err(rejection) = screening.before_classification(company, &posting, tracked) {
                debug!(posting = %posting.external_id, %rejection, "posting screened out");
                report.postings_screened_out += 1;
                continue;
            }

            let classification = self.classifier.classify(&posting).await;
            if !classification.accepted() {
                debug!(
                    posting = %posting.external_id,
                    confidence = classification.confidence,
                    "posting below acceptance threshold"
                );
                report.postings_below_threshold += 1;
                continue;
            }
            report.note_accepted(classification.role);

            if let Err(rejection) = screening.after_classification(company, &classification) {
                debug!(posting = %posting.external_id, %rejection, "posting screened out");
                report.postings_screened_out += 1;
                continue;
            }

            let better = match &best {
                None => true,
                Some((current, current_classification)) => {
                    match classification
                        .confidence
                        .total_cmp(&current_classification.confidence)
                    {
                        Ordering::Greater => true,
                        Ordering::Equal => posting.external_id < current.external_id,
                        Ordering::Less => false,
                    }
                }
            };
            if better {
                best = Some((posting, classification));
            }
        }

        best
    }

    /// Drives one application forward until it submits, parks or ends.
    async fn advance(&mut self, company: &Company, mut application: Application) -> CompanyOutcome {
        loop {
            let step = match application.state() {
                ApplicationState::Classified => self.prepare_materials(company, &application).await,
                ApplicationState::MaterialsReady => self.enter_review_gate(&application),
                ApplicationState::PendingReview => self.await_review(&application).await,
                ApplicationState::Approved => return self.submit(company, &application).await,
                ApplicationState::Discovered => Err(self.fail(
                    &application,
                    "application was never classified".to_string(),
                )),
                ApplicationState::Submitted => {
                    return CompanyOutcome::Submitted {
                        role: application.classification.role,
                        external_reference: application.external_reference.clone(),
                        application: application.id,
                    }
                }
                ApplicationState::Rejected => {
                    return CompanyOutcome::Rejected {
                        reason: application.outcome_note().to_string(),
                        application: application.id,
                    }
                }
                ApplicationState::Withdrawn | ApplicationState::Failed => {
                    return CompanyOutcome::Failed {
                        reason: application.outcome_note().to_string(),
                        application: Some(application.id),
                    }
                }
            };

            match step {
                Ok(next) => application = next,
                Err(outcome) => return outcome,
            }
        }
    }

    async fn prepare_materials(&self, company: &Company, application: &Application) -> Step {
        // Materials attached before an interrupted run are reused.
        if application.materials.is_none() {
            let materials = self.generate_materials(company, &application.classification).await;
            let materials = materials.map_err(|reason| self.fail(application, reason))?;
            self.tracker
                .attach_materials(&application.id, materials)
                .map_err(|err| tracker_failure(Some(application.id.clone()), err))?;
        }

        self.transition(
            application,
            ApplicationState::MaterialsReady,
            "resume and cover letter ready",
        )
    }

    async fn generate_materials(
        &self,
        company: &Company,
        classification: &Classification,
    ) -> Result<MaterialRefs, String> {
        let materials = self.collaborators.materials.as_ref();
        let retry = &self.settings.retry;
        let clock = self.clock.as_ref();

        let resume = with_retry(retry, clock, "generate_resume", || {
            materials.generate_resume(company, classification)
        })
        .await
        .map_err(|err| format!("resume generation failed: {err}"))?;

        let cover_letter = with_retry(retry, clock, "generate_cover_letter", || {
            materials.generate_cover_letter(company, classification)
        })
        .await
        .map_err(|err| format!("cover letter generation failed: {err}"))?;

        Ok(MaterialRefs {
            resume,
            cover_letter,
        })
    }

    fn enter_review_gate(&self, application: &Application) -> Step {
        if self.settings.require_manual_review {
            self.transition(
                application,
                ApplicationState::PendingReview,
                "awaiting manual review",
            )
        } else {
            self.transition(
                application,
                ApplicationState::Approved,
                "manual review disabled",
            )
        }
    }

    async fn await_review(&self, application: &Application) -> Step {
        let review = self.collaborators.review.as_ref();
        let decision = with_retry(
            &self.settings.retry,
            self.clock.as_ref(),
            "request_decision",
            || review.request_decision(application),
        )
        .await
        .map_err(|err| self.fail(application, format!("review request failed: {err}")))?;

        match decision {
            ReviewDecision::Pending => Err(CompanyOutcome::AwaitingReview {
                application: application.id.clone(),
            }),
            decided => apply_review(&self.tracker, &application.id, &decided, self.clock.now())
                .map_err(|err| tracker_failure(Some(application.id.clone()), err)),
        }
    }

    async fn submit(&mut self, company: &Company, application: &Application) -> CompanyOutcome {
        let deferred = |blocked: Blocked| blocked.into_outcome(Some(application.id.clone()));
        if let Err(blocked) = self.permit(Gate::Company(&company.id)).await {
            return deferred(blocked);
        }
        if let Err(blocked) = self.permit(Gate::ApplicationSlot).await {
            return deferred(blocked);
        }

        let Some(materials) = application.materials.clone() else {
            return self.fail(application, "materials missing at submission".to_string());
        };
        let packet = SubmissionPacket {
            application_id: application.id.clone(),
            posting: application.posting.clone(),
            classification: application.classification.clone(),
            materials,
        };

        let gateway = self.collaborators.submission.as_ref();
        let receipt = with_retry(&self.settings.retry, self.clock.as_ref(), "submit", || {
            gateway.submit(company, &packet)
        })
        .await;

        let receipt = match receipt {
            Ok(receipt) if receipt.success => receipt,
            Ok(_) => return self.fail(application, "submission rejected by portal".to_string()),
            Err(err) => return self.fail(application, format!("submission failed: {err}")),
        };

        let now = self.clock.now();
        if let Err(err) =
            self.limiter
                .record_action(ActionKind::ApplicationSubmission, &company.id, now)
        {
            error!(
                application = %application.id,
                error = %err,
                "submitted but budget write failed"
            );
        }

        match self.tracker.record_submission(
            &application.id,
            receipt.external_reference.clone(),
            "submitted",
            now,
        ) {
            Ok(_) => CompanyOutcome::Submitted {
                application: application.id.clone(),
                role: application.classification.role,
                external_reference: receipt.external_reference,
            },
            Err(err) => tracker_failure(Some(application.id.clone()), err),
        }
    }

    /// Consults the rate limiter, sleeping out one cooldown when configured.
    async fn permit(&mut self, gate: Gate<'_>) -> Result<(), Blocked> {
        let mut waited = false;
        loop {
            let now = self.clock.now();
            let decision = match gate {
                Gate::Company(company) => self.limiter.may_act_on_company(company, now),
                Gate::ApplicationSlot => self.limiter.may_consume_daily_application_slot(now),
            }
            .map_err(Blocked::Budget)?;

            let reason = match decision {
                RateDecision::Allowed => return Ok(()),
                RateDecision::Denied(reason) => reason,
            };

            match reason.retry_after() {
                Some(wait) if self.settings.wait_for_cooldown && !waited => {
                    info!(reason = %reason, "waiting out cooldown");
                    self.clock.sleep(wait).await;
                    waited = true;
                }
                _ => return Err(Blocked::Denied(reason)),
            }
        }
    }

    fn transition(
        &self,
        application: &Application,
        state: ApplicationState,
        note: &str,
    ) -> Step {
        self.tracker
            .transition(&application.id, state, note, self.clock.now())
            .map_err(|err| tracker_failure(Some(application.id.clone()), err))
    }

    fn fail(&self, application: &Application, reason: String) -> CompanyOutcome {
        warn!(application = %application.id, reason = %reason, "application failed");
        if let Err(err) = self.tracker.transition(
            &application.id,
            ApplicationState::Failed,
            reason.clone(),
            self.clock.now(),
        ) {
            return tracker_failure(Some(application.id.clone()), err);
        }
        CompanyOutcome::Failed {
            application: Some(application.id.clone()),
            reason,
        }
    }
}

impl Blocked {
    fn into_outcome(self, application: Option<ApplicationId>) -> CompanyOutcome {
        match self {
            Blocked::Denied(reason) => CompanyOutcome::Deferred {
                application,
                reason: reason.to_string(),
            },
            Blocked::Budget(err) => CompanyOutcome::Failed {
                application,
                reason: format!("daily budget unavailable: {err}"),
            },
        }
    }
}

/// Applies a review verdict. `Pending` leaves the application untouched.
pub fn apply_review(
    tracker: &ApplicationTracker,
    id: &ApplicationId,
    decision: &ReviewDecision,
    at: DateTime<Utc>,
) -> Result<Application, TrackerError> {
    match decision {
        ReviewDecision::Approved => {
            tracker.transition(id, ApplicationState::Approved, "approved at review", at)
        }
        ReviewDecision::Rejected { reason } => {
            tracker.transition(id, ApplicationState::Rejected, reason.clone(), at)
        }
        ReviewDecision::Pending => tracker.get(id),
    }
}

fn tracker_failure(application: Option<ApplicationId>, err: TrackerError) -> CompanyOutcome {
    error!(application = ?application, error = %err, "application ledger update failed");
    CompanyOutcome::Failed {
        application,
        reason: err.to_string(),
    }
}

/// Highest priority first; equal priorities by identifier.
/// Active companies, highest priority first, then by id.
fn by_priority(companies: &[Company]) -> Vec<&Company> {
    let mut ordered: Vec<&Company> = companies
        .iter()
        .filter(|company| {
            if !company.active {
                debug!(company = %company.id, "skipping inactive company");
            }
            company.active
        })
        .collect();
    ordered.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| a.id.cmp(&b.id))
    });
    ordered
}
