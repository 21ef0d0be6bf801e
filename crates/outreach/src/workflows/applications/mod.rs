//! Job application outreach: classification, rate limiting, the application ledger and the
//! engine that drives postings through to submission.

pub mod classifier;
pub mod clock;
pub mod collaborators;
pub mod domain;
pub mod engine;
pub mod rate_limit;
pub mod report;
pub(crate) mod retry;
pub mod screening;
pub mod storage;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use classifier::{assess_text, Classifier, ClassifierConfig, ModelOpinion, RuleAssessment};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    CollaboratorError, MaterialsGenerator, ModelVerdict, PostingDiscovery, ReviewDecision,
    ReviewDesk, RoleScoringService, SubmissionGateway, SubmissionPacket, SubmissionReceipt,
};
pub use domain::{
    Application, ApplicationId, ApplicationState, ArtifactHandle, Classification, Company,
    CompanyId, MaterialRefs, NewApplication, Posting, RoleLabel, StateRecord,
};
pub use engine::{apply_review, Collaborators, EngineError, EngineSettings, OrchestrationEngine};
pub use rate_limit::{
    ActionKind, DailyBudget, QuotaDenied, RateDecision, RateLimitController, RateLimits,
};
pub use report::{
    export_csv, follow_ups, CompanyOutcome, CompanyReport, LedgerRow, LedgerStats, RunReport,
    FOLLOW_UP_AFTER_DAYS,
};
pub use retry::RetryPolicy;
pub use screening::{ScreenRejection, ScreeningPolicy};
pub use storage::{
    BudgetStore, DataLayout, FileRunLocks, JsonBudgetStore, JsonlLedgerStore, LedgerEntry,
    LedgerStore, MemoryBudgetStore, MemoryLedgerStore, MemoryRunLocks, RunLease, RunLockError,
    RunLocks, StorageError,
};
pub use tracker::{ApplicationFilter, ApplicationTracker, TrackerError};
