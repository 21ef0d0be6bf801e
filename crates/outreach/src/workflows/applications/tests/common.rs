use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::workflows::applications::classifier::{Classifier, ClassifierConfig};
use crate::workflows::applications::clock::{Clock, ManualClock};
use crate::workflows::applications::collaborators::{
    CollaboratorError, MaterialsGenerator, ModelVerdict, PostingDiscovery, ReviewDecision,
    ReviewDesk, RoleScoringService, SubmissionGateway, SubmissionPacket, SubmissionReceipt,
};
use crate::workflows::applications::domain::{
    Application, ArtifactHandle, Classification, Company, CompanyId, Posting, RoleLabel,
};
use crate::workflows::applications::engine::{Collaborators, EngineSettings, OrchestrationEngine};
use crate::workflows::applications::rate_limit::{RateLimitController, RateLimits};
use crate::workflows::applications::storage::{
    MemoryBudgetStore, MemoryLedgerStore, MemoryRunLocks,
};
use crate::workflows::applications::tracker::ApplicationTracker;

pub(super) fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

pub(super) fn company(id: &str, priority: f32) -> Company {
    Company {
        id: CompanyId(id.to_string()),
        name: id.to_uppercase(),
        careers_url: format!("https://{id}.example/careers"),
        role_affinity: Vec::new(),
        priority,
        preferred_locations: Vec::new(),
        active: true,
    }
}

pub(super) fn posting(company: &str, external_id: &str, title: &str, description: &str) -> Posting {
    Posting {
        company: CompanyId(company.to_string()),
        external_id: external_id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        location: None,
        discovered_at: monday_morning(),
    }
}

/// "Machine Learning Engineer" with a pytorch mention: rule score 0.8 for AI_ENGINEER.
pub(super) fn ml_engineer(company: &str, external_id: &str) -> Posting {
    posting(
        company,
        external_id,
        "Machine Learning Engineer",
        "Train and ship models with pytorch.",
    )
}

pub(super) fn accepted(posting: &Posting, role: RoleLabel, confidence: f64) -> Classification {
    Classification {
        posting_id: posting.external_id.clone(),
        role,
        rule_score: confidence,
        model_score: None,
        confidence,
    }
}

pub(super) fn verdict(label: &str, score: f64) -> Result<ModelVerdict, CollaboratorError> {
    Ok(ModelVerdict {
        label: label.to_string(),
        score,
    })
}

/// Answers by the first fragment found in the posting text; unknown text is an outage.
#[derive(Default)]
pub(super) struct ScriptedScoring {
    responses: Vec<(String, Result<ModelVerdict, CollaboratorError>)>,
    calls: AtomicU32,
}

impl ScriptedScoring {
    pub(super) fn respond(
        mut self,
        fragment: &str,
        response: Result<ModelVerdict, CollaboratorError>,
    ) -> Self {
        self.responses.push((fragment.to_string(), response));
        self
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleScoringService for ScriptedScoring {
    async fn score_role(&self, posting_text: &str) -> Result<ModelVerdict, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .iter()
            .find(|(fragment, _)| posting_text.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Err(CollaboratorError::Transient("scoring offline".to_string())))
    }
}

#[derive(Default)]
pub(super) struct StaticDiscovery {
    postings: Mutex<HashMap<CompanyId, Vec<Posting>>>,
    failures: Mutex<HashMap<CompanyId, VecDeque<CollaboratorError>>>,
    visits: Mutex<Vec<CompanyId>>,
}

impl StaticDiscovery {
    pub(super) fn publish(&self, company: &str, postings: Vec<Posting>) {
        self.postings
            .lock()
            .expect("discovery mutex poisoned")
            .insert(CompanyId(company.to_string()), postings);
    }

    /// Queued errors are returned, one per call, before the postings.
    pub(super) fn fail_next(&self, company: &str, errors: Vec<CollaboratorError>) {
        self.failures
            .lock()
            .expect("discovery mutex poisoned")
            .insert(CompanyId(company.to_string()), errors.into());
    }

    pub(super) fn visits(&self) -> Vec<CompanyId> {
        self.visits.lock().expect("discovery mutex poisoned").clone()
    }
}

#[async_trait]
impl PostingDiscovery for StaticDiscovery {
    async fn discover_postings(
        &self,
        company: &Company,
    ) -> Result<Vec<Posting>, CollaboratorError> {
        self.visits
            .lock()
            .expect("discovery mutex poisoned")
            .push(company.id.clone());

        let queued = self
            .failures
            .lock()
            .expect("discovery mutex poisoned")
            .get_mut(&company.id)
            .and_then(VecDeque::pop_front);
        if let Some(err) = queued {
            return Err(err);
        }

        Ok(self
            .postings
            .lock()
            .expect("discovery mutex poisoned")
            .get(&company.id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub(super) struct StubMaterials {
    failure: Mutex<Option<CollaboratorError>>,
    calls: AtomicU32,
}

impl StubMaterials {
    pub(super) fn always_fail(&self, err: CollaboratorError) {
        *self.failure.lock().expect("materials mutex poisoned") = Some(err);
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn produce(
        &self,
        kind: &str,
        company: &Company,
        classification: &Classification,
    ) -> Result<ArtifactHandle, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().expect("materials mutex poisoned").clone() {
            return Err(err);
        }
        Ok(ArtifactHandle(format!(
            "{kind}/{}/{}",
            company.id, classification.role
        )))
    }
}

#[async_trait]
impl MaterialsGenerator for StubMaterials {
    async fn generate_resume(
        &self,
        company: &Company,
        classification: &Classification,
    ) -> Result<ArtifactHandle, CollaboratorError> {
        self.produce("resume", company, classification)
    }

    async fn generate_cover_letter(
        &self,
        company: &Company,
        classification: &Classification,
    ) -> Result<ArtifactHandle, CollaboratorError> {
        self.produce("cover-letter", company, classification)
    }
}

/// Succeeds with `ref-<application>` unless an outcome was scripted.
#[derive(Default)]
pub(super) struct RecordingSubmission {
    scripted: Mutex<VecDeque<Result<SubmissionReceipt, CollaboratorError>>>,
    packets: Mutex<Vec<SubmissionPacket>>,
    attempts: AtomicU32,
}

impl RecordingSubmission {
    pub(super) fn script(&self, outcomes: Vec<Result<SubmissionReceipt, CollaboratorError>>) {
        self.scripted
            .lock()
            .expect("submission mutex poisoned")
            .extend(outcomes);
    }

    pub(super) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(super) fn packets(&self) -> Vec<SubmissionPacket> {
        self.packets.lock().expect("submission mutex poisoned").clone()
    }
}

#[async_trait]
impl SubmissionGateway for RecordingSubmission {
    async fn submit(
        &self,
        _company: &Company,
        packet: &SubmissionPacket,
    ) -> Result<SubmissionReceipt, CollaboratorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .scripted
            .lock()
            .expect("submission mutex poisoned")
            .pop_front();
        let outcome = scripted.unwrap_or_else(|| {
            Ok(SubmissionReceipt {
                success: true,
                external_reference: Some(format!("ref-{}", packet.application_id)),
            })
        });
        if matches!(&outcome, Ok(receipt) if receipt.success) {
            self.packets
                .lock()
                .expect("submission mutex poisoned")
                .push(packet.clone());
        }
        outcome
    }
}

pub(super) struct FixedReview {
    decision: Mutex<ReviewDecision>,
    requests: AtomicU32,
}

impl Default for FixedReview {
    fn default() -> Self {
        Self {
            decision: Mutex::new(ReviewDecision::Pending),
            requests: AtomicU32::new(0),
        }
    }
}

impl FixedReview {
    pub(super) fn decide(&self, decision: ReviewDecision) {
        *self.decision.lock().expect("review mutex poisoned") = decision;
    }

    pub(super) fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReviewDesk for FixedReview {
    async fn request_decision(
        &self,
        _application: &Application,
    ) -> Result<ReviewDecision, CollaboratorError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.decision.lock().expect("review mutex poisoned").clone())
    }
}

/// Shared stores and fakes; every `engine()` call behaves like a fresh process on them.
pub(super) struct Harness {
    pub(super) clock: Arc<ManualClock>,
    pub(super) ledger: Arc<MemoryLedgerStore>,
    pub(super) budgets: Arc<MemoryBudgetStore>,
    pub(super) locks: MemoryRunLocks,
    pub(super) discovery: Arc<StaticDiscovery>,
    pub(super) scoring: Arc<ScriptedScoring>,
    pub(super) materials: Arc<StubMaterials>,
    pub(super) submission: Arc<RecordingSubmission>,
    pub(super) review: Arc<FixedReview>,
    pub(super) settings: EngineSettings,
    pub(super) limits: RateLimits,
    pub(super) classifier: ClassifierConfig,
}

impl Harness {
    pub(super) fn new(scoring: ScriptedScoring) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(monday_morning())),
            ledger: Arc::new(MemoryLedgerStore::default()),
            budgets: Arc::new(MemoryBudgetStore::default()),
            locks: MemoryRunLocks::default(),
            discovery: Arc::new(StaticDiscovery::default()),
            scoring: Arc::new(scoring),
            materials: Arc::new(StubMaterials::default()),
            submission: Arc::new(RecordingSubmission::default()),
            review: Arc::new(FixedReview::default()),
            settings: EngineSettings {
                require_manual_review: false,
                ..EngineSettings::default()
            },
            limits: RateLimits::default(),
            classifier: ClassifierConfig::default(),
        }
    }

    pub(super) fn engine(&self) -> OrchestrationEngine {
        let clock: Arc<dyn Clock> = self.clock.clone();
        let tracker =
            Arc::new(ApplicationTracker::open(self.ledger.clone()).expect("ledger replays"));
        let limiter = RateLimitController::open(
            self.limits.clone(),
            self.budgets.clone(),
            clock.now().date_naive(),
        )
        .expect("budget loads");
        let classifier = Classifier::new(
            self.classifier.clone(),
            self.scoring.clone(),
            self.settings.retry.clone(),
            clock.clone(),
        );

        OrchestrationEngine::new(
            self.settings.clone(),
            classifier,
            tracker,
            limiter,
            Collaborators {
                discovery: self.discovery.clone(),
                materials: self.materials.clone(),
                submission: self.submission.clone(),
                review: self.review.clone(),
            },
            Arc::new(self.locks.clone()),
            clock,
        )
    }

    pub(super) fn applications(&self) -> Vec<Application> {
        ApplicationTracker::open(self.ledger.clone())
            .expect("ledger replays")
            .all()
    }
}
