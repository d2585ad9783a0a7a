use serde::{Deserialize, Serialize};

/// Only these two categories block `CSATerms` emission (spec.md §4.6,
/// §7 "ValidationFailure").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BusinessRules,
    Date,
    Other,
}

impl ErrorCategory {
    pub fn is_blocking(&self) -> bool {
        matches!(self, ErrorCategory::BusinessRules | ErrorCategory::Date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedCheck {
    pub check_name: String,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
    pub blocking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub checks_performed: u32,
    pub checks_passed: u32,
    pub checks_failed: u32,
    pub warnings: Vec<String>,
    pub errors: Vec<ValidationError>,
    pub recommendations: Vec<String>,
    pub detailed_checks: Vec<DetailedCheck>,
}

impl ValidationReport {
    pub fn has_blocking_error(&self) -> bool {
        self.errors.iter().any(|e| e.blocking)
    }
}
