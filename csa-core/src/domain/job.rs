use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::JobErrorEntry;

/// Job execution status (spec.md §4.10 "Job state machine":
/// `PENDING → PROCESSING → {COMPLETED | FAILED | CANCELLED}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Cancellation is only permitted from these two states (spec.md
    /// §4.10: "mark CANCELLED if currently PENDING or PROCESSING").
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

/// Pipeline processing step (spec.md §4.10 "A JobStep traverses
/// PARSE → EXTRACT → NORMALIZE → MAP → [CALCULATE] → DONE").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    Parse,
    Extract,
    Normalize,
    Map,
    Calculate,
    Done,
}

impl JobStep {
    /// Fixed progress checkpoints a completed step advances `progress` to.
    /// `Calculate` has no checkpoint of its own — `progress` stays at 90
    /// until `run()` marks the job `Done` and jumps straight to 100,
    /// matching the five fixed values 20/40/70/90/100.
    pub fn progress_checkpoint(&self) -> u8 {
        match self {
            JobStep::Parse => 20,
            JobStep::Extract => 40,
            JobStep::Normalize => 70,
            JobStep::Map => 90,
            JobStep::Calculate => 90,
            JobStep::Done => 100,
        }
    }
}

/// Options a caller passes to `/documents/process/{document_id}` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub normalize_method: NormalizeMethod,
    pub save_intermediate_steps: bool,
    pub calculate_margin: bool,
    pub portfolio_value: Option<rust_decimal::Decimal>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        ProcessingOptions {
            normalize_method: NormalizeMethod::MultiAgent,
            save_intermediate_steps: false,
            calculate_margin: false,
            portfolio_value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMethod {
    Simple,
    MultiAgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub document_id: String,
    pub status: JobStatus,
    pub current_step: Option<JobStep>,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub options: ProcessingOptions,
    /// Stage-name -> persisted artifact id, merged on every update.
    pub results: HashMap<String, String>,
    pub errors: Vec<JobErrorEntry>,
    pub step_timings: HashMap<String, f64>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, document_id: impl Into<String>, options: ProcessingOptions, now: DateTime<Utc>) -> Self {
        Job {
            job_id: job_id.into(),
            document_id: document_id.into(),
            status: JobStatus::Pending,
            current_step: None,
            progress: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            options,
            results: HashMap::new(),
            errors: Vec::new(),
            step_timings: HashMap::new(),
        }
    }
}
