use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CsaResult<T> = Result<T, CsaError>;

/// The full taxonomy of errors a CSA pipeline run can surface.
///
/// Agents never let these escape their own `normalize()` call (a failure
/// becomes an `AgentResult` error entry with `confidence = 0` instead);
/// only the pipeline orchestrator translates a terminal condition into a
/// job status transition.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum CsaError {
    /// Caller-facing 4xx: malformed or out-of-domain input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 404-class: a referenced artifact id was never persisted.
    #[error("missing artifact: {kind} {id} (run: {remedy})")]
    MissingArtifact {
        kind: String,
        id: String,
        remedy: String,
    },

    /// 400-class: an operation was attempted before its prerequisite stage ran.
    #[error("precondition unmet: {what} (remedy: {remedy})")]
    PreconditionUnmet { what: String, remedy: String },

    /// Parse/extract/LLM call failed. The orchestrator retries idempotent
    /// stages at most once before surfacing this as job FAILED.
    #[error("external service error calling {service}: {message}")]
    ExternalServiceError { service: String, message: String },

    /// The validation agent reported a blocking error; the job completes
    /// but `requires_human_review = true` and no `CSATerms` is emitted.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// Programming bugs and invariant violations that survived earlier checks.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl CsaError {
    pub fn missing_artifact(
        kind: impl Into<String>,
        id: impl Into<String>,
        remedy: impl Into<String>,
    ) -> Self {
        CsaError::MissingArtifact {
            kind: kind.into(),
            id: id.into(),
            remedy: remedy.into(),
        }
    }

    pub fn precondition(what: impl Into<String>, remedy: impl Into<String>) -> Self {
        CsaError::PreconditionUnmet {
            what: what.into(),
            remedy: remedy.into(),
        }
    }
}

impl From<anyhow::Error> for CsaError {
    fn from(err: anyhow::Error) -> Self {
        CsaError::InternalError(err.to_string())
    }
}

/// One entry in a job's ordered `errors[]` list (spec.md §7 "user-visible behavior").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorEntry {
    pub step: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
