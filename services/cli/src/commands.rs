use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use outreach::config::OutreachConfig;
use outreach::error::AppError;
use outreach::workflows::applications::{
    apply_review, export_csv, follow_ups, Application, ApplicationFilter, ApplicationId,
    ApplicationTracker, Classifier, Clock, Collaborators, CompanyId, DataLayout, FileRunLocks,
    JsonBudgetStore, JsonlLedgerStore, LedgerStats, OrchestrationEngine, RateLimitController,
    ReviewDecision, ReviewDesk, RunLease, RunLocks, RunReport, SystemClock, FOLLOW_UP_AFTER_DAYS,
};
use tracing::info;

use crate::cli::{FollowUpArgs, ListArgs, ReportArgs, ReviewArgs, RunArgs, TimelineArgs};
use crate::infra::{
    load_companies, AutoApproveDesk, ConsoleReviewDesk, FileDiscovery, OutboxSubmission,
    RuleOnlyScoring, TemplateMaterials,
};

fn open_tracker(layout: &DataLayout) -> Result<ApplicationTracker, AppError> {
    let store = Arc::new(JsonlLedgerStore::new(layout.ledger()));
    Ok(ApplicationTracker::open(store)?)
}

/// Out-of-band ledger writes share today's run lock, so they never race a run.
fn lock_ledger(layout: &DataLayout) -> Result<RunLease, AppError> {
    Ok(FileRunLocks::new(layout.locks()).acquire(Utc::now().date_naive())?)
}

pub(crate) async fn run_outreach(config: &OutreachConfig, args: RunArgs) -> Result<(), AppError> {
    let report = execute_run(config, &args).await?;
    let layout = DataLayout::new(&config.data_dir);
    let summary = write_summary(&layout, &report)?;

    println!(
        "Outreach run for {}: {} companies, {} submitted",
        report.day,
        report.companies.len(),
        report.submitted()
    );
    println!(
        "Postings: {} discovered, {} screened out, {} below threshold, {} applications created",
        report.postings_discovered,
        report.postings_screened_out,
        report.postings_below_threshold,
        report.applications_created
    );
    for entry in &report.companies {
        let application = entry
            .outcome
            .application()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<20} {:<20} {}",
            entry.company,
            entry.outcome.label(),
            application
        );
    }
    println!("Summary written to {}", summary.display());
    Ok(())
}

async fn execute_run(config: &OutreachConfig, args: &RunArgs) -> Result<RunReport, AppError> {
    let layout = DataLayout::new(&config.data_dir);
    let companies = load_companies(&args.companies)?;
    let discovery = FileDiscovery::load(&args.postings)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut settings = config.engine_settings();
    let review: Arc<dyn ReviewDesk> = if args.auto_approve {
        settings.require_manual_review = false;
        Arc::new(AutoApproveDesk)
    } else {
        Arc::new(ConsoleReviewDesk)
    };

    let classifier = Classifier::new(
        config.classifier(),
        Arc::new(RuleOnlyScoring::new(config.classifier())),
        settings.retry.clone(),
        clock.clone(),
    );
    let limiter = RateLimitController::open(
        config.rate_limits.clone(),
        Arc::new(JsonBudgetStore::new(layout.budgets())),
        clock.now().date_naive(),
    )?;
    let collaborators = Collaborators {
        discovery: Arc::new(discovery),
        materials: Arc::new(TemplateMaterials::new(layout.root())),
        submission: Arc::new(OutboxSubmission::new(layout.root())),
        review,
    };

    let mut engine = OrchestrationEngine::new(
        settings,
        classifier,
        Arc::new(open_tracker(&layout)?),
        limiter,
        collaborators,
        Arc::new(FileRunLocks::new(layout.locks())),
        clock,
    );
    info!(companies = companies.len(), data_dir = %layout.root().display(), "starting run");
    Ok(engine.run(&companies).await?)
}

fn write_summary(layout: &DataLayout, report: &RunReport) -> Result<PathBuf, AppError> {
    fs::create_dir_all(layout.summaries())?;
    let path = layout
        .summaries()
        .join(format!("summary-{}.json", report.day.format("%Y-%m-%d")));
    serde_json::to_writer_pretty(File::create(&path)?, report)?;
    Ok(path)
}

pub(crate) fn record_review(config: &OutreachConfig, args: ReviewArgs) -> Result<(), AppError> {
    let layout = DataLayout::new(&config.data_dir);
    let _lease = lock_ledger(&layout)?;
    let tracker = open_tracker(&layout)?;
    let ReviewArgs {
        id, approve, note, ..
    } = args;
    let decision = if approve {
        ReviewDecision::Approved
    } else {
        ReviewDecision::Rejected {
            reason: note.unwrap_or_else(|| "rejected at review".to_string()),
        }
    };

    let application = apply_review(&tracker, &ApplicationId(id), &decision, Utc::now())?;
    println!("{} is now {}", application.id, application.state());
    Ok(())
}

pub(crate) fn record_follow_up(
    config: &OutreachConfig,
    args: FollowUpArgs,
) -> Result<(), AppError> {
    let layout = DataLayout::new(&config.data_dir);
    let _lease = lock_ledger(&layout)?;
    let tracker = open_tracker(&layout)?;

    let application = tracker.mark_follow_up_sent(&ApplicationId(args.id), Utc::now())?;
    println!(
        "Follow-up recorded for {} ({})",
        application.id, application.company
    );
    Ok(())
}

pub(crate) fn list_applications(config: &OutreachConfig, args: ListArgs) -> Result<(), AppError> {
    let tracker = open_tracker(&DataLayout::new(&config.data_dir))?;
    let ListArgs { company, state } = args;
    let filter = ApplicationFilter {
        company: company.map(CompanyId),
        states: state.into_iter().collect(),
        ..ApplicationFilter::default()
    };

    let applications = tracker.query(&filter);
    if applications.is_empty() {
        println!("No matching applications.");
    }
    for application in applications {
        println!(
            "{}  {:<14} {:<16} {:<16} {:.2}  {}",
            application.id,
            application.company,
            application.classification.role,
            application.state(),
            application.classification.confidence,
            application.posting.title
        );
    }
    Ok(())
}

pub(crate) fn show_timeline(config: &OutreachConfig, args: TimelineArgs) -> Result<(), AppError> {
    let tracker = open_tracker(&DataLayout::new(&config.data_dir))?;
    for record in tracker.timeline(&ApplicationId(args.id))? {
        println!(
            "{}  {:<16} {}",
            record.at.format("%Y-%m-%d %H:%M:%S"),
            record.state,
            record.note
        );
    }
    Ok(())
}

pub(crate) fn ledger_report(config: &OutreachConfig, args: ReportArgs) -> Result<(), AppError> {
    let tracker = open_tracker(&DataLayout::new(&config.data_dir))?;
    let applications = tracker.all();
    let now = Utc::now();
    let stats = LedgerStats::collect(&applications, now);

    println!("Applications tracked: {}", stats.total);
    print!("{}", breakdown("By state", &stats.by_state));
    print!("{}", breakdown("By role", &stats.by_role));
    print!("{}", breakdown("By company", &stats.by_company));
    if let Some(confidence) = stats.average_confidence {
        println!("Average confidence: {confidence:.2}");
    }
    if let Some(rate) = stats.success_rate {
        println!("Submission success rate: {:.0}%", rate * 100.0);
    }
    println!("Created in the last 7 days: {}", stats.created_last_7_days);

    let due = follow_ups(&applications, now);
    if !due.is_empty() {
        println!("Follow-ups due (quiet for {FOLLOW_UP_AFTER_DAYS}+ days):");
        for application in due {
            println!(
                "  {}  {}  {}",
                application.id,
                application.company,
                application.external_reference.as_deref().unwrap_or("-")
            );
        }
    }

    if let Some(path) = args.csv {
        export_ledger(&applications, &path)?;
        println!("CSV written to {}", path.display());
    }
    Ok(())
}

fn breakdown<K: Display>(title: &str, counts: &BTreeMap<K, usize>) -> String {
    let mut out = format!("{title}:\n");
    for (key, count) in counts {
        out.push_str(&format!("  {:<16} {}\n", key, count));
    }
    out
}

fn export_ledger(applications: &[Application], path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    export_csv(applications, File::create(path)?)?;
    Ok(())
}

pub(crate) fn show_budget(config: &OutreachConfig) -> Result<(), AppError> {
    let layout = DataLayout::new(&config.data_dir);
    let limiter = RateLimitController::open(
        config.rate_limits.clone(),
        Arc::new(JsonBudgetStore::new(layout.budgets())),
        Utc::now().date_naive(),
    )?;
    let limits = limiter.limits();
    let budget = limiter.budget();

    println!("Budget for {}", budget.date);
    println!(
        "  applications {}/{}",
        budget.applications_submitted, limits.max_applications_per_day
    );
    println!(
        "  companies    {}/{}",
        budget.companies_visited, limits.max_companies_per_day
    );
    if let Some(at) = budget.last_submission_at {
        println!("  last submission {}", at.format("%H:%M:%S"));
    }
    if let Some(at) = budget.last_visit_at {
        println!("  last visit      {}", at.format("%H:%M:%S"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach::workflows::applications::{
        ApplicationState, CompanyOutcome, RateLimits, RunLockError,
    };

    fn config(root: &Path) -> OutreachConfig {
        OutreachConfig {
            data_dir: root.join("data"),
            rate_limits: RateLimits::default(),
            classification_threshold: 0.6,
            require_manual_review: true,
            wait_for_cooldown: false,
            retry: Default::default(),
        }
    }

    fn inputs(root: &Path) -> RunArgs {
        let companies = root.join("companies.json");
        let postings = root.join("postings.json");
        fs::write(
            &companies,
            r#"[{"id": "acme", "name": "Acme", "careers_url": "https://acme.example/jobs"}]"#,
        )
        .expect("write companies");
        fs::write(
            &postings,
            r#"{"acme": [{
                "external_id": "acme-7",
                "title": "Cloud Engineer",
                "description": "Operate kubernetes, terraform and docker on aws."
            }]}"#,
        )
        .expect("write postings");
        RunArgs {
            companies,
            postings,
            auto_approve: false,
        }
    }

    #[tokio::test]
    async fn review_from_the_command_line_releases_a_parked_application() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let args = inputs(dir.path());

        let first = execute_run(&config, &args).await.expect("first run");
        let parked = match first.outcome_for(&CompanyId("acme".to_string())) {
            Some(CompanyOutcome::AwaitingReview { application }) => application.clone(),
            other => panic!("expected review gate, got {other:?}"),
        };
        write_summary(&DataLayout::new(&config.data_dir), &first).expect("summary");

        record_review(
            &config,
            ReviewArgs {
                id: parked.0.clone(),
                approve: true,
                reject: false,
                note: None,
            },
        )
        .expect("approve");

        let second = execute_run(&config, &args).await.expect("second run");
        assert_eq!(second.submitted(), 1);

        let layout = DataLayout::new(&config.data_dir);
        let tracker = open_tracker(&layout).expect("ledger");
        let application = tracker.get(&parked).expect("tracked");
        assert_eq!(application.state(), ApplicationState::Submitted);
        assert_eq!(
            application.external_reference.as_deref(),
            Some(format!("outbox-{parked}").as_str())
        );
        assert!(layout
            .root()
            .join("outbox")
            .join(format!("outbox-{parked}.json"))
            .exists());
        assert!(layout
            .summaries()
            .join(format!("summary-{}.json", first.day.format("%Y-%m-%d")))
            .exists());
    }

    #[tokio::test]
    async fn csv_export_creates_missing_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.require_manual_review = false;
        let mut args = inputs(dir.path());
        args.auto_approve = true;
        execute_run(&config, &args).await.expect("run");

        let csv = dir.path().join("exports").join("ledger.csv");
        ledger_report(&config, ReportArgs { csv: Some(csv.clone()) }).expect("report");

        let text = fs::read_to_string(csv).expect("csv written");
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("CLOUD_ENGINEER"));
    }

    #[tokio::test]
    async fn report_breaks_the_ledger_down_by_company() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.require_manual_review = false;
        let mut args = inputs(dir.path());
        args.auto_approve = true;
        execute_run(&config, &args).await.expect("run");

        let tracker = open_tracker(&DataLayout::new(&config.data_dir)).expect("ledger");
        let stats = LedgerStats::collect(&tracker.all(), Utc::now());
        let text = breakdown("By company", &stats.by_company);

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("By company:"));
        assert_eq!(lines.next(), Some(format!("  {:<16} 1", "acme").as_str()));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn review_waits_for_a_running_pass_to_finish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let first = execute_run(&config, &inputs(dir.path()))
            .await
            .expect("first run");
        let parked = first
            .companies
            .iter()
            .find_map(|entry| entry.outcome.application().cloned())
            .expect("parked application");

        let layout = DataLayout::new(&config.data_dir);
        let running = lock_ledger(&layout).expect("run holds the lock");
        let review = ReviewArgs {
            id: parked.0.clone(),
            approve: true,
            reject: false,
            note: None,
        };
        assert!(matches!(
            record_review(&config, review),
            Err(AppError::Lock(RunLockError::AlreadyRunning { .. }))
        ));
        assert_eq!(
            open_tracker(&layout).expect("ledger").get(&parked).expect("tracked").state(),
            ApplicationState::PendingReview
        );
        drop(running);
    }

    #[tokio::test]
    async fn follow_up_takes_a_submission_off_the_due_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.require_manual_review = false;
        let mut args = inputs(dir.path());
        args.auto_approve = true;
        let report = execute_run(&config, &args).await.expect("run");
        let submitted = report
            .companies
            .iter()
            .find_map(|entry| entry.outcome.application().cloned())
            .expect("submitted application");

        record_follow_up(
            &config,
            FollowUpArgs {
                id: submitted.0.clone(),
            },
        )
        .expect("follow up");

        let tracker = open_tracker(&DataLayout::new(&config.data_dir)).expect("ledger");
        let applications = tracker.all();
        assert!(applications[0].follow_up_sent_at.is_some());
        let far_future = Utc::now() + chrono::Duration::days(60);
        assert!(follow_ups(&applications, far_future).is_empty());
    }
}
