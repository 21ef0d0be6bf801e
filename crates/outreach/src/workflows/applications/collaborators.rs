//! Capability traits for the services the engine drives but does not implement.
//!
//! Each trait is deliberately narrow so runs can be exercised with in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::domain::{
    Application, ApplicationId, ArtifactHandle, Classification, Company, MaterialRefs, Posting,
};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// Network hiccups, timeouts, throttling. Safe to retry.
    #[error("transient collaborator failure: {0}")]
    Transient(String),
    /// The collaborator answered with something the engine cannot use.
    #[error("malformed collaborator response: {0}")]
    Malformed(String),
    #[error("collaborator failure: {0}")]
    Fatal(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }
}

/// Raw answer from the classification service, validated by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub label: String,
    pub score: f64,
}

/// Everything the submission collaborator needs for one application.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPacket {
    pub application_id: ApplicationId,
    pub posting: Posting,
    pub classification: Classification,
    pub materials: MaterialRefs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub success: bool,
    #[serde(default)]
    pub external_reference: Option<String>,
}

/// Human verdict at the review gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approved,
    Rejected { reason: String },
    /// No decision yet; the application stays parked at the gate.
    Pending,
}

#[async_trait]
pub trait PostingDiscovery: Send + Sync {
    async fn discover_postings(&self, company: &Company) -> Result<Vec<Posting>, CollaboratorError>;
}

#[async_trait]
pub trait RoleScoringService: Send + Sync {
    async fn score_role(&self, posting_text: &str) -> Result<ModelVerdict, CollaboratorError>;
}

#[async_trait]
pub trait MaterialsGenerator: Send + Sync {
    async fn generate_resume(
        &self,
        company: &Company,
        classification: &Classification,
    ) -> Result<ArtifactHandle, CollaboratorError>;

    async fn generate_cover_letter(
        &self,
        company: &Company,
        classification: &Classification,
    ) -> Result<ArtifactHandle, CollaboratorError>;
}

#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn submit(
        &self,
        company: &Company,
        packet: &SubmissionPacket,
    ) -> Result<SubmissionReceipt, CollaboratorError>;
}

#[async_trait]
pub trait ReviewDesk: Send + Sync {
    async fn request_decision(
        &self,
        application: &Application,
    ) -> Result<ReviewDecision, CollaboratorError>;
}
