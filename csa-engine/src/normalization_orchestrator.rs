use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;

use csa_core::domain::agent::{AgentKind, AgentResult};
use csa_core::domain::collateral::NormalizedCollateral;
use csa_core::domain::csa_terms::{PartyTerms, Threshold};
use csa_core::domain::extraction::Extraction;
use csa_core::domain::ids::chained_id;
use csa_core::domain::normalization::{NormalizedResult, ProcessingSummary};
use csa_core::domain::parsed_doc::ParsedDoc;

use crate::agents::currency::NormalizedAmount;
use crate::agents::{CollateralAgent, CurrencyAgent, TemporalAgent, ValidationAgent};
use crate::agents::collateral::CollateralFieldInput;
use crate::agents::currency::CurrencyFieldInput;
use crate::agents::temporal::{NormalizedDateField, TemporalFieldInput};

/// Routes an `Extraction`'s fields through the three reasoning agents, then
/// through the Validation Agent, and scores the aggregate result (spec.md
/// §4.7).
pub struct NormalizationOrchestrator {
    collateral: CollateralAgent,
    temporal: TemporalAgent,
    currency: CurrencyAgent,
    validation: ValidationAgent,
}

impl NormalizationOrchestrator {
    pub fn new(collateral: CollateralAgent, temporal: TemporalAgent, currency: CurrencyAgent) -> Self {
        NormalizationOrchestrator { collateral, temporal, currency, validation: ValidationAgent::new() }
    }

    pub async fn normalize(&self, extraction: &Extraction, document: Option<&ParsedDoc>) -> NormalizedResult {
        // Step 1: route fields.
        let collateral_input = explode_collateral_table(extraction);
        let temporal_input = TemporalFieldInput {
            notification_time: extraction.valuation_timing.notification_time.clone(),
            valuation_time: extraction.valuation_timing.valuation_time.clone(),
            agreement_date: extraction.agreement_info.agreement_date.clone(),
            signature_date: extraction.agreement_info.signature_date.clone(),
        };
        let currency_input = CurrencyFieldInput {
            base_currency: extraction.core_margin_terms.base_currency.clone(),
            party_a_threshold: extraction.core_margin_terms.party_a_threshold.clone(),
            party_b_threshold: extraction.core_margin_terms.party_b_threshold.clone(),
            party_a_mta: extraction.core_margin_terms.party_a_mta.clone(),
            party_b_mta: extraction.core_margin_terms.party_b_mta.clone(),
            party_a_independent_amount: extraction.core_margin_terms.party_a_independent_amount.clone(),
            party_b_independent_amount: extraction.core_margin_terms.party_b_independent_amount.clone(),
            rounding: extraction.core_margin_terms.rounding.clone(),
        };

        // Step 2: parallel dispatch. Each agent already converts its own
        // internal failures into a soft `AgentResult.error`, so a plain
        // `tokio::join!` is enough — no agent panic can abort the others.
        let (collateral_result, temporal_result, currency_result) = tokio::join!(
            self.collateral.normalize(collateral_input),
            self.temporal.normalize(temporal_input, document),
            self.currency.normalize(currency_input),
        );

        let collateral_items: Vec<NormalizedCollateral> = collateral_result
            .data
            .get("collateral_items")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        // Step 3: validate.
        let currencies = extract_currency_values(&currency_result.data);
        let timezones = extract_timezone_values(&temporal_result.data);
        let party_a = party_terms_from_currency(&currency_result.data, "party_a", &extraction.agreement_info.party_a_name);
        let party_b = party_terms_from_currency(&currency_result.data, "party_b", &extraction.agreement_info.party_b_name);
        let agreement_date = date_field(&temporal_result.data, "agreement_date");
        let signature_date = date_field(&temporal_result.data, "signature_date");
        let validation_report = self.validation.validate(
            &collateral_items,
            &currencies,
            &timezones,
            &party_a,
            &party_b,
            agreement_date,
            signature_date,
        );

        // Step 4: score. Weight is redistributed when an agent had nothing
        // to normalize (an empty reasoning chain signals absence, since
        // every routed field produces at least one reasoning step).
        let weighted_agents: Vec<(f64, &AgentResult)> = [
            (0.5, &collateral_result),
            (0.25, &temporal_result),
            (0.25, &currency_result),
        ]
        .into_iter()
        .filter(|(_, result)| !result.reasoning_chain.is_empty())
        .collect();
        let weight_total: f64 = weighted_agents.iter().map(|(w, _)| w).sum();
        let overall_confidence = if weight_total > 0.0 {
            weighted_agents.iter().map(|(w, r)| w * r.confidence).sum::<f64>() / weight_total
        } else {
            0.0
        };
        let requires_human_review = collateral_result.requires_human_review
            || temporal_result.requires_human_review
            || currency_result.requires_human_review
            || !validation_report.passed
            || overall_confidence < 0.85;

        // Step 5: summarize.
        let total_time_seconds = collateral_result.processing_time_seconds
            + temporal_result.processing_time_seconds
            + currency_result.processing_time_seconds;
        let total_reasoning_steps = (collateral_result.reasoning_chain.len()
            + temporal_result.reasoning_chain.len()
            + currency_result.reasoning_chain.len()) as u32;
        let total_self_corrections =
            collateral_result.self_corrections_count + temporal_result.self_corrections_count + currency_result.self_corrections_count;
        let mut models_used: Vec<String> = [&collateral_result, &temporal_result, &currency_result]
            .iter()
            .flat_map(|r| r.reasoning_chain.iter().map(|s| format!("{:?}", s.model_used)))
            .collect();
        models_used.sort();
        models_used.dedup();
        let document_context_accessed = temporal_result
            .reasoning_chain
            .iter()
            .any(|s| s.step_name == "access_document_context");
        let items_requiring_review = {
            let collateral_item_errors = collateral_result
                .data
                .get("item_errors")
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            (collateral_item_errors
                + usize::from(temporal_result.requires_human_review)
                + usize::from(currency_result.requires_human_review)) as u32
        };

        let mut agent_results = HashMap::new();
        agent_results.insert(AgentKind::Collateral, collateral_result);
        agent_results.insert(AgentKind::Temporal, temporal_result);
        agent_results.insert(AgentKind::Currency, currency_result);

        let now = Utc::now();
        NormalizedResult {
            normalized_data_id: chained_id("normalized", &extraction.extraction_id, now),
            document_id: extraction.document_id.clone(),
            extraction_id: extraction.extraction_id.clone(),
            agent_results,
            validation_report,
            processing_summary: ProcessingSummary {
                total_time_seconds,
                total_reasoning_steps,
                total_self_corrections,
                models_used,
                document_context_accessed,
                items_requiring_review,
            },
            overall_confidence,
            requires_human_review,
        }
    }
}

/// Explodes the eligible-collateral table × rating-event columns into one
/// `(collateral_type_text, valuation_string, rating_event)` tuple per cell
/// (spec.md §4.7 step 1).
pub(crate) fn explode_collateral_table(extraction: &Extraction) -> Vec<CollateralFieldInput> {
    let column_names = &extraction.column_info.valuation_column_names;
    let mut items = Vec::new();
    for row in &extraction.eligible_collateral_table {
        if extraction.column_info.valuation_column_count <= 1 {
            let valuation = row.valuation_by_column.first().cloned().unwrap_or_default();
            items.push(CollateralFieldInput {
                collateral_type_text: row.collateral_type_text.clone(),
                valuation_string: valuation,
                rating_event: "Base Valuation Percentage".to_string(),
            });
        } else {
            for (col_index, valuation) in row.valuation_by_column.iter().enumerate() {
                let rating_event = column_names
                    .get(col_index)
                    .cloned()
                    .unwrap_or_else(|| format!("Column {col_index}"));
                items.push(CollateralFieldInput {
                    collateral_type_text: row.collateral_type_text.clone(),
                    valuation_string: valuation.clone(),
                    rating_event,
                });
            }
        }
    }
    items
}

fn extract_currency_values(data: &Value) -> Vec<String> {
    ["party_a_threshold", "party_b_threshold", "party_a_mta", "party_b_mta"]
        .iter()
        .filter_map(|field| data.get(*field))
        .filter_map(|v| serde_json::from_value::<NormalizedAmount>(v.clone()).ok())
        .filter_map(|amount| match amount {
            NormalizedAmount::Finite { currency, .. } => Some(currency),
            _ => None,
        })
        .collect()
}

fn date_field(data: &Value, field: &str) -> Option<chrono::NaiveDate> {
    data.get(field)
        .and_then(|v| serde_json::from_value::<NormalizedDateField>(v.clone()).ok())
        .and_then(|normalized| normalized.date)
}

fn extract_timezone_values(data: &Value) -> Vec<Option<String>> {
    ["notification_time", "valuation_time"]
        .iter()
        .filter_map(|field| data.get(*field))
        .map(|v| v.get("timezone_iana").and_then(|tz| tz.as_str()).map(|s| s.to_string()))
        .collect()
}

/// Builds the `PartyTerms` the Validation Agent needs for its MTA-vs-threshold
/// check directly from the Currency Agent's normalized amounts — this runs
/// before the Mapper, so it cannot rely on `CsaTerms` existing yet.
fn party_terms_from_currency(data: &Value, prefix: &str, name: &str) -> PartyTerms {
    let threshold = data
        .get(format!("{prefix}_threshold"))
        .and_then(|v| serde_json::from_value::<NormalizedAmount>(v.clone()).ok())
        .map(|amount| match amount {
            NormalizedAmount::Infinity => Threshold::Infinite,
            NormalizedAmount::NotApplicable => Threshold::Finite(Decimal::ZERO),
            NormalizedAmount::Finite { amount, .. } => Threshold::Finite(amount),
        })
        .unwrap_or(Threshold::Infinite);
    let mta = decimal_field(data, &format!("{prefix}_mta"));
    let independent_amount = decimal_field(data, &format!("{prefix}_independent_amount"));
    PartyTerms { name: name.to_string(), threshold, minimum_transfer_amount: mta, independent_amount }
}

fn decimal_field(data: &Value, field: &str) -> Decimal {
    data.get(field)
        .and_then(|v| serde_json::from_value::<NormalizedAmount>(v.clone()).ok())
        .map(|amount| match amount {
            NormalizedAmount::Finite { amount, .. } => amount,
            _ => Decimal::ZERO,
        })
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use csa_core::domain::extraction::{ColumnInfo, CollateralTableRow};

    fn extraction_with_table(column_count: usize, names: Vec<&str>) -> Extraction {
        use csa_core::domain::extraction::{AgreementInfo, CoreMarginTerms, ValuationTiming};
        use indexmap::IndexMap;
        use std::collections::BTreeMap;

        Extraction {
            extraction_id: "extraction-1".to_string(),
            document_id: "doc-1".to_string(),
            parse_id: "parse-1".to_string(),
            agreement_info: AgreementInfo {
                party_a_name: "Alpha".to_string(),
                party_b_name: "Beta".to_string(),
                agreement_date: None,
                signature_date: None,
            },
            core_margin_terms: CoreMarginTerms {
                party_a_threshold: "0".to_string(),
                party_b_threshold: "0".to_string(),
                party_a_mta: "0".to_string(),
                party_b_mta: "0".to_string(),
                party_a_independent_amount: "0".to_string(),
                party_b_independent_amount: "0".to_string(),
                rounding: Some("10000".to_string()),
                base_currency: "USD".to_string(),
            },
            valuation_timing: ValuationTiming { notification_time: None, valuation_time: None, valuation_agent: None },
            eligible_collateral_table: vec![CollateralTableRow {
                collateral_type_text: "US Treasury".to_string(),
                valuation_by_column: (0..column_count).map(|i| format!("9{i}%")).collect(),
            }],
            column_info: ColumnInfo {
                valuation_column_count: column_count,
                valuation_column_names: names.into_iter().map(String::from).collect(),
            },
            clauses_to_collect: IndexMap::new(),
            provenance: BTreeMap::new(),
        }
    }

    #[test]
    fn single_column_table_explodes_to_one_tuple_per_row() {
        let extraction = extraction_with_table(1, vec![]);
        let items = explode_collateral_table(&extraction);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].rating_event, "Base Valuation Percentage");
    }

    #[test]
    fn multi_column_table_explodes_rows_times_columns() {
        let extraction = extraction_with_table(2, vec!["Moody's First Trigger", "S&P Second Trigger"]);
        let items = explode_collateral_table(&extraction);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].rating_event, "Moody's First Trigger");
        assert_eq!(items[1].rating_event, "S&P Second Trigger");
    }
}
