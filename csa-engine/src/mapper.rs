use std::collections::BTreeMap;

use rust_decimal::Decimal;

use csa_core::domain::collateral::NormalizedCollateralTable;
use csa_core::domain::csa_terms::{CsaTerms, PartyTerms, Threshold};
use csa_core::domain::extraction::Extraction;
use csa_core::error::{CsaError, CsaResult};

use crate::agents::currency::{extract_plain_decimal, standardize_to_iso, INFINITY_TOKENS, NOT_APPLICABLE_TOKENS};

/// Maps a raw `Extraction` plus its already-normalized collateral table into
/// `CSATerms` (spec.md §4.8). Independent of whether normalization ran via
/// the multi-agent pipeline or the rule-based `Simple` path — both produce
/// a `NormalizedCollateralTable`, which is this function's only collateral
/// input.
pub fn map_to_csa_terms(
    extraction: &Extraction,
    collateral_table: &NormalizedCollateralTable,
    normalized_collateral_id: &str,
) -> CsaResult<(CsaTerms, Vec<String>)> {
    if collateral_table.collateral_items.is_empty() {
        return Err(CsaError::precondition(
            "normalized collateral table must exist and be non-empty",
            "run the Normalization Orchestrator against this document's extraction first",
        ));
    }

    let terms = &extraction.core_margin_terms;
    let party_a = PartyTerms {
        name: extraction.agreement_info.party_a_name.clone(),
        threshold: parse_threshold(&terms.party_a_threshold)?,
        minimum_transfer_amount: parse_amount(&terms.party_a_mta)?,
        independent_amount: parse_amount(&terms.party_a_independent_amount)?,
    };
    let party_b = PartyTerms {
        name: extraction.agreement_info.party_b_name.clone(),
        threshold: parse_threshold(&terms.party_b_threshold)?,
        minimum_transfer_amount: parse_amount(&terms.party_b_mta)?,
        independent_amount: parse_amount(&terms.party_b_independent_amount)?,
    };

    let rounding_raw = terms
        .rounding
        .as_deref()
        .ok_or_else(|| CsaError::InvalidInput("rounding could not be extracted from the document".to_string()))?;
    let rounding = extract_plain_decimal(rounding_raw)
        .ok_or_else(|| CsaError::InvalidInput(format!("rounding value \"{rounding_raw}\" is not numeric")))?;

    let currency = canonicalize_currency(&terms.base_currency);

    let mut source_pages = BTreeMap::new();
    for (field, provenance) in &extraction.provenance {
        source_pages.insert(field.clone(), provenance.page);
    }

    let (csa_terms, warnings) = CsaTerms::new(
        extraction.document_id.clone(),
        party_a,
        party_b,
        rounding,
        currency,
        normalized_collateral_id,
        collateral_table.collateral_items.clone(),
        extraction.valuation_timing.valuation_agent.clone(),
        None,
        source_pages,
    )?;

    Ok((csa_terms, warnings))
}

/// Parses a raw threshold string into a `Threshold`, applying the
/// infinity-extraction safeguard (spec.md §4.8): if the raw string starts
/// with an infinity token but the ordinary numeric parse would have
/// produced something finite (e.g. a permissive parser latching onto a
/// number inside "Infinity; provided that 5 Business Days notice..."), the
/// explicit infinity detector wins.
fn parse_threshold(raw: &str) -> CsaResult<Threshold> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Threshold::Finite(Decimal::ZERO));
    }
    let lower = trimmed.to_lowercase();
    if INFINITY_TOKENS.iter().any(|tok| lower.starts_with(tok)) {
        return Ok(Threshold::Infinite);
    }
    if NOT_APPLICABLE_TOKENS.iter().any(|tok| lower == *tok) {
        return Ok(Threshold::Finite(Decimal::ZERO));
    }
    match extract_plain_decimal(trimmed) {
        Some(value) => Ok(Threshold::Finite(value)),
        None => Err(CsaError::InvalidInput(format!("threshold value \"{raw}\" is not numeric"))),
    }
}

fn parse_amount(raw: &str) -> CsaResult<Decimal> {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    if NOT_APPLICABLE_TOKENS.iter().any(|tok| lower == *tok) {
        return Ok(Decimal::ZERO);
    }
    extract_plain_decimal(trimmed).ok_or_else(|| CsaError::InvalidInput(format!("amount value \"{raw}\" is not numeric")))
}

fn canonicalize_currency(raw: &str) -> String {
    standardize_to_iso(raw).unwrap_or_else(|| raw.trim().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use csa_core::domain::collateral::{CollateralValuation, NormalizedCollateral, StandardizedCollateralType};
    use csa_core::domain::extraction::{AgreementInfo, ColumnInfo, CoreMarginTerms, ValuationTiming};
    use indexmap::IndexMap;
    use rust_decimal_macros::dec;

    fn extraction(party_a_threshold: &str) -> Extraction {
        Extraction {
            extraction_id: "extraction-1".to_string(),
            document_id: "doc-1".to_string(),
            parse_id: "parse-1".to_string(),
            agreement_info: AgreementInfo {
                party_a_name: "Alpha Bank".to_string(),
                party_b_name: "Beta Fund".to_string(),
                agreement_date: None,
                signature_date: None,
            },
            core_margin_terms: CoreMarginTerms {
                party_a_threshold: party_a_threshold.to_string(),
                party_b_threshold: "0".to_string(),
                party_a_mta: "250,000".to_string(),
                party_b_mta: "250,000".to_string(),
                party_a_independent_amount: "0".to_string(),
                party_b_independent_amount: "0".to_string(),
                rounding: Some("10,000".to_string()),
                base_currency: "US Dollar".to_string(),
            },
            valuation_timing: ValuationTiming { notification_time: None, valuation_time: None, valuation_agent: None },
            eligible_collateral_table: Vec::new(),
            column_info: ColumnInfo { valuation_column_count: 1, valuation_column_names: Vec::new() },
            clauses_to_collect: IndexMap::new(),
            provenance: BTreeMap::new(),
        }
    }

    fn collateral_table() -> NormalizedCollateralTable {
        NormalizedCollateralTable {
            document_id: "doc-1".to_string(),
            extraction_id: "extraction-1".to_string(),
            rating_events: vec!["Base Valuation Percentage".to_string()],
            collateral_items: vec![NormalizedCollateral {
                standardized_type: StandardizedCollateralType::UsTreasury,
                base_description: "US Treasury".to_string(),
                rating_event: "Base Valuation Percentage".to_string(),
                maturity_from_collateral_type: None,
                valuation: CollateralValuation::flat(dec!(0.99)),
                confidence: 0.95,
                notes: None,
            }],
            normalized_at: Utc::now(),
            normalization_model: "rule-based".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn infinity_with_trailing_prose_resolves_to_infinite_threshold() {
        let extraction = extraction("Infinity; provided that 5 Business Days notice is given");
        let (terms, _warnings) = map_to_csa_terms(&extraction, &collateral_table(), "normalized-1").unwrap();
        assert_eq!(terms.party_a.threshold, Threshold::Infinite);
    }

    #[test]
    fn finite_threshold_parses_as_decimal() {
        let extraction = extraction("2,000,000");
        let (terms, _warnings) = map_to_csa_terms(&extraction, &collateral_table(), "normalized-1").unwrap();
        assert_eq!(terms.party_a.threshold, Threshold::Finite(dec!(2000000)));
    }

    #[test]
    fn empty_threshold_maps_to_zero() {
        assert_eq!(parse_threshold("").unwrap(), Threshold::Finite(Decimal::ZERO));
        assert_eq!(parse_threshold("   ").unwrap(), Threshold::Finite(Decimal::ZERO));
    }

    #[test]
    fn empty_collateral_table_is_rejected() {
        let extraction = extraction("0");
        let mut table = collateral_table();
        table.collateral_items.clear();
        assert!(map_to_csa_terms(&extraction, &table, "normalized-1").is_err());
    }

    #[test]
    fn us_dollar_canonicalizes_to_usd() {
        assert_eq!(canonicalize_currency("US Dollar"), "USD");
    }
}
