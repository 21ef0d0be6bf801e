use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use outreach::config::AppConfig;
use outreach::error::AppError;
use outreach::telemetry;
use outreach::workflows::applications::ApplicationState;

use crate::commands;

#[derive(Parser, Debug)]
#[command(
    name = "outreach",
    about = "Discover postings, classify them, and shepherd applications through review",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one outreach pass over a company list
    Run(RunArgs),
    /// Record a reviewer's verdict for an application parked at the review gate
    Review(ReviewArgs),
    /// List tracked applications, optionally filtered
    List(ListArgs),
    /// Print the state history of one application
    Timeline(TimelineArgs),
    /// Summarise the ledger and flag submissions due a follow-up
    Report(ReportArgs),
    /// Record that a follow-up was sent for a submitted application
    FollowUp(FollowUpArgs),
    /// Show today's quota usage against the configured limits
    Budget,
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// JSON array of companies to visit
    #[arg(long)]
    pub(crate) companies: PathBuf,
    /// JSON object mapping company ids to their current postings
    #[arg(long)]
    pub(crate) postings: PathBuf,
    /// Skip the manual review gate and approve applications as they become ready
    #[arg(long)]
    pub(crate) auto_approve: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("verdict").required(true).args(["approve", "reject"])))]
pub(crate) struct ReviewArgs {
    /// Application id, e.g. app-000001
    pub(crate) id: String,
    #[arg(long)]
    pub(crate) approve: bool,
    #[arg(long)]
    pub(crate) reject: bool,
    /// Reason recorded with a rejection
    #[arg(long)]
    pub(crate) note: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ListArgs {
    #[arg(long)]
    pub(crate) company: Option<String>,
    /// Only applications currently in this state (e.g. pending_review)
    #[arg(long, value_parser = crate::infra::parse_state)]
    pub(crate) state: Option<ApplicationState>,
}

#[derive(Args, Debug)]
pub(crate) struct TimelineArgs {
    pub(crate) id: String,
}

#[derive(Args, Debug)]
pub(crate) struct FollowUpArgs {
    pub(crate) id: String,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ReportArgs {
    /// Also write every application as a CSV row to this file
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let outreach = &config.outreach;

    match cli.command {
        Command::Run(args) => commands::run_outreach(outreach, args).await,
        Command::Review(args) => commands::record_review(outreach, args),
        Command::List(args) => commands::list_applications(outreach, args),
        Command::Timeline(args) => commands::show_timeline(outreach, args),
        Command::Report(args) => commands::ledger_report(outreach, args),
        Command::FollowUp(args) => commands::record_follow_up(outreach, args),
        Command::Budget => commands::show_budget(outreach),
    }
}
