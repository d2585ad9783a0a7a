use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::agent::{AgentKind, AgentResult};
use super::validation::ValidationReport;

/// Totals emitted by the Normalization Orchestrator after aggregation
/// (spec.md §4.7 step 5 "Summarize").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_time_seconds: f64,
    pub total_reasoning_steps: u32,
    pub total_self_corrections: u32,
    pub models_used: Vec<String>,
    pub document_context_accessed: bool,
    pub items_requiring_review: u32,
}

/// The Normalization Orchestrator's unified result: every agent's raw
/// output plus validation and scoring (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub normalized_data_id: String,
    pub document_id: String,
    pub extraction_id: String,
    pub agent_results: HashMap<AgentKind, AgentResult>,
    pub validation_report: ValidationReport,
    pub processing_summary: ProcessingSummary,
    pub overall_confidence: f64,
    pub requires_human_review: bool,
}
