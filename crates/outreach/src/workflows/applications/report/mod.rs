mod export;
mod run;
mod stats;

pub use export::{export_csv, LedgerRow};
pub use run::{CompanyOutcome, CompanyReport, RunReport};
pub use stats::{follow_ups, LedgerStats, FOLLOW_UP_AFTER_DAYS};
