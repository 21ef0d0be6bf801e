use std::io::Write;

use serde::Serialize;

use super::super::domain::Application;

/// One CSV row per application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    pub application_id: String,
    pub company: String,
    pub posting_id: String,
    pub title: String,
    pub role: &'static str,
    pub rule_score: f64,
    pub model_score: Option<f64>,
    pub confidence: f64,
    pub state: &'static str,
    pub day: String,
    pub created_at: String,
    pub last_activity: String,
    pub external_reference: Option<String>,
    pub follow_up_sent_at: String,
    pub note: String,
}

impl LedgerRow {
    pub fn from_application(application: &Application) -> Self {
        let stamp = |at: Option<chrono::DateTime<chrono::Utc>>| {
            at.map(|at| at.to_rfc3339()).unwrap_or_default()
        };

        Self {
            application_id: application.id.to_string(),
            company: application.company.to_string(),
            posting_id: application.posting.external_id.clone(),
            title: application.posting.title.clone(),
            role: application.classification.role.label(),
            rule_score: application.classification.rule_score,
            model_score: application.classification.model_score,
            confidence: application.classification.confidence,
            state: application.state().label(),
            day: application.day.format("%Y-%m-%d").to_string(),
            created_at: stamp(application.history.first().map(|record| record.at)),
            last_activity: stamp(application.last_activity()),
            external_reference: application.external_reference.clone(),
            follow_up_sent_at: stamp(application.follow_up_sent_at),
            note: application.outcome_note().to_string(),
        }
    }
}

pub fn export_csv<W: Write>(applications: &[Application], writer: W) -> Result<(), csv::Error> {
    let mut csv = csv::Writer::from_writer(writer);
    for application in applications {
        csv.serialize(LedgerRow::from_application(application))?;
    }
    csv.flush()?;
    Ok(())
}
