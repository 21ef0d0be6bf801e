use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use outreach::error::AppError;
use outreach::workflows::applications::{
    assess_text, Application, ApplicationState, ArtifactHandle, Classification, ClassifierConfig,
    CollaboratorError, Company, CompanyId, MaterialsGenerator, ModelVerdict, Posting,
    PostingDiscovery, ReviewDecision, ReviewDesk, RoleLabel, RoleScoringService,
    SubmissionGateway, SubmissionPacket, SubmissionReceipt,
};
use serde::Deserialize;
use tracing::info;

pub(crate) fn load_companies(path: &Path) -> Result<Vec<Company>, AppError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub(crate) fn parse_state(raw: &str) -> Result<ApplicationState, String> {
    let wanted = raw.trim().to_ascii_uppercase().replace('-', "_");
    ApplicationState::ordered()
        .into_iter()
        .find(|state| state.label() == wanted)
        .ok_or_else(|| format!("unknown application state `{raw}`"))
}

#[derive(Debug, Clone, Deserialize)]
struct PostingRecord {
    external_id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: Option<String>,
}

/// Serves postings from an export keyed by company id. Companies missing from the
/// export simply have no openings.
#[derive(Debug, Default)]
pub(crate) struct FileDiscovery {
    postings: HashMap<CompanyId, Vec<PostingRecord>>,
}

impl FileDiscovery {
    pub(crate) fn load(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path)?;
        Ok(Self {
            postings: serde_json::from_str(&raw)?,
        })
    }
}

#[async_trait]
impl PostingDiscovery for FileDiscovery {
    async fn discover_postings(
        &self,
        company: &Company,
    ) -> Result<Vec<Posting>, CollaboratorError> {
        let discovered_at = Utc::now();
        Ok(self
            .postings
            .get(&company.id)
            .map(|records| {
                records
                    .iter()
                    .map(|record| Posting {
                        company: company.id.clone(),
                        external_id: record.external_id.clone(),
                        title: record.title.clone(),
                        description: record.description.clone(),
                        location: record.location.clone(),
                        discovered_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Stands in for the hosted classification service by answering with the keyword
/// winner, so blended confidence equals the rule score.
pub(crate) struct RuleOnlyScoring {
    config: ClassifierConfig,
}

impl RuleOnlyScoring {
    pub(crate) fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RoleScoringService for RuleOnlyScoring {
    async fn score_role(&self, posting_text: &str) -> Result<ModelVerdict, CollaboratorError> {
        let assessment = assess_text(posting_text, &self.config);
        Ok(ModelVerdict {
            label: assessment.winner.label().to_string(),
            score: assessment.winner_score,
        })
    }
}

/// Picks the résumé template for the role and writes a cover letter next to it.
pub(crate) struct TemplateMaterials {
    templates: PathBuf,
    letters: PathBuf,
}

impl TemplateMaterials {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            templates: root.join("templates"),
            letters: root.join("cover_letters"),
        }
    }

    fn template_for(&self, role: RoleLabel) -> PathBuf {
        let specific = self
            .templates
            .join(format!("{}_resume.json", role.label().to_ascii_lowercase()));
        if specific.exists() {
            specific
        } else {
            self.templates.join("base_resume.json")
        }
    }
}

fn letter_body(company: &Company, classification: &Classification) -> String {
    let focus = match classification.role {
        RoleLabel::AiEngineer => "building and shipping machine learning systems",
        RoleLabel::CloudEngineer => "running reliable cloud infrastructure",
        RoleLabel::DataScientist => "turning data into decisions",
        RoleLabel::SecurityAnalyst => "detecting and responding to threats",
        RoleLabel::Unclassified => "solving hard engineering problems",
    };
    format!(
        "Dear {name} hiring team,\n\n\
         I am applying for posting {posting}. My recent work has centred on {focus}, \
         and I would welcome the chance to bring that experience to {name}.\n\n\
         Kind regards\n",
        name = company.name,
        posting = classification.posting_id,
    )
}

#[async_trait]
impl MaterialsGenerator for TemplateMaterials {
    async fn generate_resume(
        &self,
        _company: &Company,
        classification: &Classification,
    ) -> Result<ArtifactHandle, CollaboratorError> {
        let template = self.template_for(classification.role);
        Ok(ArtifactHandle(template.display().to_string()))
    }

    async fn generate_cover_letter(
        &self,
        company: &Company,
        classification: &Classification,
    ) -> Result<ArtifactHandle, CollaboratorError> {
        let path = self
            .letters
            .join(format!("{}-{}.txt", company.id, classification.posting_id));
        tokio::fs::create_dir_all(&self.letters)
            .await
            .map_err(|err| CollaboratorError::Fatal(err.to_string()))?;
        tokio::fs::write(&path, letter_body(company, classification))
            .await
            .map_err(|err| CollaboratorError::Fatal(err.to_string()))?;
        Ok(ArtifactHandle(path.display().to_string()))
    }
}

/// Drops each packet into an outbox directory for whatever performs the actual
/// portal submission. The file name doubles as the external reference.
pub(crate) struct OutboxSubmission {
    outbox: PathBuf,
}

impl OutboxSubmission {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            outbox: root.join("outbox"),
        }
    }
}

#[async_trait]
impl SubmissionGateway for OutboxSubmission {
    async fn submit(
        &self,
        company: &Company,
        packet: &SubmissionPacket,
    ) -> Result<SubmissionReceipt, CollaboratorError> {
        let reference = format!("outbox-{}", packet.application_id);
        let body = serde_json::json!({
            "application_id": packet.application_id,
            "company": company.id,
            "careers_url": company.careers_url,
            "posting": packet.posting,
            "role": packet.classification.role,
            "confidence": packet.classification.confidence,
            "materials": packet.materials,
        });
        let encoded = serde_json::to_vec_pretty(&body)
            .map_err(|err| CollaboratorError::Malformed(err.to_string()))?;

        tokio::fs::create_dir_all(&self.outbox)
            .await
            .map_err(|err| CollaboratorError::Transient(err.to_string()))?;
        tokio::fs::write(self.outbox.join(format!("{reference}.json")), encoded)
            .await
            .map_err(|err| CollaboratorError::Transient(err.to_string()))?;

        info!(application = %packet.application_id, %reference, "packet queued in outbox");
        Ok(SubmissionReceipt {
            success: true,
            external_reference: Some(reference),
        })
    }
}

/// Leaves every application parked; verdicts arrive later through `outreach review`.
pub(crate) struct ConsoleReviewDesk;

#[async_trait]
impl ReviewDesk for ConsoleReviewDesk {
    async fn request_decision(
        &self,
        application: &Application,
    ) -> Result<ReviewDecision, CollaboratorError> {
        info!(
            application = %application.id,
            company = %application.company,
            role = %application.classification.role,
            "awaiting review; record a verdict with `outreach review`"
        );
        Ok(ReviewDecision::Pending)
    }
}

pub(crate) struct AutoApproveDesk;

#[async_trait]
impl ReviewDesk for AutoApproveDesk {
    async fn request_decision(
        &self,
        _application: &Application,
    ) -> Result<ReviewDecision, CollaboratorError> {
        Ok(ReviewDecision::Approved)
    }
}
