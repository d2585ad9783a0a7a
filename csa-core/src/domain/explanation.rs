use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::calculation::MarginCallAction;

/// One annotated line of a `MarginCall`'s `calculation_steps`, re-expressed
/// for a human reader (spec.md §2 "Explanation / Script Generator").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationBreakdownStep {
    pub explanation: String,
    pub csa_clause_reference: Option<String>,
    pub source_page: Option<u32>,
    pub calculation: String,
    pub result: String,
}

/// A single chronological entry in a `MarginCall`'s audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrailEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub details: String,
}

/// LLM-generated narrative explanation of a margin call, with citations
/// (spec.md §2 component table, 4% of the system; terminal/append-only per
/// spec.md §3 "Lifecycle").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub narrative: String,
    pub key_factors: Vec<String>,
    pub calculation_breakdown: Vec<CalculationBreakdownStep>,
    pub audit_trail: Vec<AuditTrailEvent>,
    /// CSA clause name to page number, `None` when the page is unknown.
    pub citations: BTreeMap<String, Option<u32>>,
    pub risk_assessment: Option<String>,
    pub next_steps: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub llm_model: String,
    pub document_id: String,
    pub margin_call_action: MarginCallAction,
    pub margin_call_amount: rust_decimal::Decimal,
    pub counterparty_name: Option<String>,
}

/// Coarse classification of how a CSA aggregates its delivery/return amount
/// across rating agencies (spec.md §6 "formula_patterns" artifact
/// directory). Derived deterministically from `CsaTerms`, not from a
/// separate LLM call — the source CSA fields already carry this signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    GreatestOf,
    SumOf,
    SingleRating,
    Conditional,
    Other,
}

/// One named calculation pattern identified in a CSA (e.g.
/// `delivery_amount`, `return_amount`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaPattern {
    pub pattern_name: String,
    pub pattern_type: PatternType,
    pub components: Vec<String>,
    pub clause_text: String,
    pub source_page: Option<u32>,
    pub confidence: f64,
    pub variations_detected: Vec<String>,
    pub reasoning: Option<String>,
}

/// Aggregate pattern analysis for one CSA, persisted under the
/// `formula_patterns/` artifact directory (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaPatternResult {
    pub document_id: String,
    pub extraction_timestamp: DateTime<Utc>,
    pub patterns: BTreeMap<String, FormulaPattern>,
    pub complexity_score: f64,
    pub overall_confidence: f64,
    pub variations_summary: Vec<String>,
}

impl FormulaPatternResult {
    /// Coarse complexity label used in the audit script header.
    pub fn csa_type_label(&self) -> &'static str {
        if self.complexity_score >= 0.7 {
            "complex"
        } else if self.complexity_score >= 0.35 {
            "moderate"
        } else {
            "standard"
        }
    }
}

/// An annotated, non-executable audit script documenting a margin
/// calculation's logic (spec.md §6 "generated_scripts" artifact
/// directory). The teacher's Python original validated generated code with
/// `ast.parse`; there is no Rust equivalent for validating arbitrary
/// generated text as a foreign language's syntax, so `GeneratedScript`
/// instead records a structural check (`section_headers_present`) that the
/// expected documentation sections actually appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedScript {
    pub document_id: String,
    pub script: String,
    pub line_count: u32,
    pub generated_at: DateTime<Utc>,
    pub llm_model: String,
    pub section_headers_present: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csa_type_label_reflects_complexity_band() {
        let mut result = FormulaPatternResult {
            document_id: "doc-1".to_string(),
            extraction_timestamp: Utc::now(),
            patterns: BTreeMap::new(),
            complexity_score: 0.1,
            overall_confidence: 0.9,
            variations_summary: Vec::new(),
        };
        assert_eq!(result.csa_type_label(), "standard");
        result.complexity_score = 0.5;
        assert_eq!(result.csa_type_label(), "moderate");
        result.complexity_score = 0.9;
        assert_eq!(result.csa_type_label(), "complex");
    }
}
