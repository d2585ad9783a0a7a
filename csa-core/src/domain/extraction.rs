use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::parsed_doc::BoundingBox;

/// Hierarchical mapping produced by the external document-AI field
/// extraction stage (spec.md §3 "Extraction (external input)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub extraction_id: String,
    pub document_id: String,
    pub parse_id: String,
    pub agreement_info: AgreementInfo,
    pub core_margin_terms: CoreMarginTerms,
    pub valuation_timing: ValuationTiming,
    pub eligible_collateral_table: Vec<CollateralTableRow>,
    pub column_info: ColumnInfo,
    pub clauses_to_collect: IndexMap<String, String>,
    pub provenance: BTreeMap<String, FieldProvenance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementInfo {
    pub party_a_name: String,
    pub party_b_name: String,
    pub agreement_date: Option<String>,
    pub signature_date: Option<String>,
}

/// Per-party raw (un-normalized) figures, still string-typed as extracted
/// from prose — the Currency Agent is responsible for parsing these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreMarginTerms {
    pub party_a_threshold: String,
    pub party_b_threshold: String,
    pub party_a_mta: String,
    pub party_b_mta: String,
    pub party_a_independent_amount: String,
    pub party_b_independent_amount: String,
    pub rounding: Option<String>,
    pub base_currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationTiming {
    pub notification_time: Option<String>,
    pub valuation_time: Option<String>,
    pub valuation_agent: Option<String>,
}

/// One row of the eligible-collateral table: a type description plus a
/// positional array of valuation strings, one per rating-scenario column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralTableRow {
    pub collateral_type_text: String,
    pub valuation_by_column: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub valuation_column_count: usize,
    pub valuation_column_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub page: u32,
    pub bounding_box: Option<BoundingBox>,
    pub chunk_ids: Vec<String>,
}
