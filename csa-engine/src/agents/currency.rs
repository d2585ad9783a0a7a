use std::sync::Arc;
use std::time::Instant;

use csa_core::domain::agent::{aggregate_confidence, requires_human_review, AgentResult, ModelUsed, ReasoningStep};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;

use super::base::{LlmClient, LlmRequest};

pub(crate) const INFINITY_TOKENS: &[&str] = &["infinity", "inf", "∞", "unlimited"];
pub(crate) const NOT_APPLICABLE_TOKENS: &[&str] = &["n/a", "na", "not applicable", "0", "zero", ""];

pub(crate) const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("$", "USD"),
    ("usd", "USD"),
    ("us dollars", "USD"),
    ("us dollar", "USD"),
    ("dollars", "USD"),
    ("dollar", "USD"),
    ("€", "EUR"),
    ("eur", "EUR"),
    ("euro", "EUR"),
    ("euros", "EUR"),
    ("£", "GBP"),
    ("gbp", "GBP"),
    ("pounds", "GBP"),
    ("pound", "GBP"),
    ("¥", "JPY"),
    ("jpy", "JPY"),
    ("yen", "JPY"),
    ("chf", "CHF"),
    ("swiss francs", "CHF"),
    ("swiss franc", "CHF"),
    ("cad", "CAD"),
    ("aud", "AUD"),
];

pub(crate) const VALID_ISO_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "HKD", "SGD", "SEK", "NOK", "DKK",
    "ZAR", "BRL", "MXN",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingDirection {
    Up,
    Down,
    Nearest,
}

/// Either a finite ISO-priced amount, or one of the two special values the
/// short-circuit in step 1 recognizes (spec.md §4.5 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedAmount {
    Finite { amount: Decimal, currency: String, confidence: f64 },
    Infinity,
    NotApplicable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRounding {
    pub delivery_amount: Decimal,
    pub delivery_direction: RoundingDirection,
    pub return_amount: Decimal,
    pub return_direction: RoundingDirection,
    pub currency: Option<String>,
}

/// `{base_currency, party_a_threshold, party_b_threshold, party_a_mta,
/// party_b_mta, independent_amount, rounding}` routed by the Normalization
/// Orchestrator (spec.md §4.7 step 1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrencyFieldInput {
    pub base_currency: String,
    pub party_a_threshold: String,
    pub party_b_threshold: String,
    pub party_a_mta: String,
    pub party_b_mta: String,
    pub party_a_independent_amount: String,
    pub party_b_independent_amount: String,
    pub rounding: Option<String>,
}

/// 3-step reasoning over amount/currency fields (spec.md §4.5).
#[derive(Clone)]
pub struct CurrencyAgent {
    llm: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
}

impl CurrencyAgent {
    pub fn new(llm: Arc<dyn LlmClient>, semaphore: Arc<Semaphore>) -> Self {
        CurrencyAgent { llm, semaphore }
    }

    pub async fn normalize(&self, input: CurrencyFieldInput) -> AgentResult {
        let start = Instant::now();
        let mut reasoning_chain = Vec::new();
        let mut fields = serde_json::Map::new();

        for (name, raw) in [
            ("base_currency", Some(&input.base_currency)),
            ("party_a_threshold", Some(&input.party_a_threshold)),
            ("party_b_threshold", Some(&input.party_b_threshold)),
            ("party_a_mta", Some(&input.party_a_mta)),
            ("party_b_mta", Some(&input.party_b_mta)),
            ("party_a_independent_amount", Some(&input.party_a_independent_amount)),
            ("party_b_independent_amount", Some(&input.party_b_independent_amount)),
        ] {
            if let Some(raw) = raw {
                let (normalized, steps) = self.normalize_amount_field(name, raw).await;
                reasoning_chain.extend(steps);
                fields.insert(name.to_string(), serde_json::to_value(normalized).unwrap());
            }
        }

        if let Some(raw_rounding) = &input.rounding {
            let (rounding, steps) = self.normalize_rounding_field(raw_rounding).await;
            reasoning_chain.extend(steps);
            fields.insert("rounding".to_string(), serde_json::to_value(rounding).unwrap());
        }

        let confidence = aggregate_confidence(&reasoning_chain);
        let needs_review = requires_human_review(confidence);

        AgentResult {
            agent_name: "CurrencyAgent".to_string(),
            data: serde_json::Value::Object(fields),
            confidence,
            reasoning_chain,
            corrections: Vec::new(),
            self_corrections_count: 0,
            requires_human_review: needs_review,
            human_review_reason: needs_review.then(|| "low-confidence currency parse".to_string()),
            processing_time_seconds: start.elapsed().as_secs_f64(),
            error: None,
        }
    }

    async fn normalize_amount_field(
        &self,
        field_name: &str,
        raw_value: &str,
    ) -> (NormalizedAmount, Vec<ReasoningStep>) {
        let mut steps = Vec::new();
        let lower = raw_value.trim().to_lowercase();

        // Step 1: pre-LLM short-circuits (spec.md §4.5 step 1 — this
        // ordering is required so "Infinity; provided that..." resolves
        // regardless of trailing prose).
        if INFINITY_TOKENS.iter().any(|tok| lower.starts_with(tok)) {
            steps.push(extract_step(field_name, raw_value, "infinity", ModelUsed::RuleBased));
            return (NormalizedAmount::Infinity, steps);
        }
        if NOT_APPLICABLE_TOKENS.iter().any(|tok| lower == *tok) {
            steps.push(extract_step(field_name, raw_value, "not_applicable", ModelUsed::RuleBased));
            return (NormalizedAmount::NotApplicable, steps);
        }

        let (amount, currency_hint, model_used) = self.extract_amount_and_currency(field_name, raw_value).await;
        steps.push(ReasoningStep {
            step_number: 1,
            step_name: "extract_amount_and_currency".to_string(),
            input: json!({ "field": field_name, "raw_value": raw_value }),
            output: json!({ "amount": amount, "currency_hint": currency_hint }),
            model_used,
            reasoning_text: "extracted a numeric amount and currency hint".to_string(),
            confidence: Some(0.9),
            duration_seconds: None,
        });

        // Step 2: Standardize to ISO.
        let iso = currency_hint.as_deref().and_then(standardize_to_iso);
        steps.push(ReasoningStep {
            step_number: 2,
            step_name: "standardize_to_iso".to_string(),
            input: json!({ "currency_hint": currency_hint }),
            output: json!({ "iso_code": iso }),
            model_used: ModelUsed::RuleBased,
            reasoning_text: "mapped symbol/name to an ISO 4217 code via the fixed table".to_string(),
            confidence: Some(0.9),
            duration_seconds: None,
        });

        // Step 3: Validate.
        let amount_value = amount.unwrap_or(Decimal::ZERO);
        let valid = iso.as_deref().map(|c| VALID_ISO_CODES.contains(&c)).unwrap_or(false) && amount_value >= Decimal::ZERO;
        let confidence = if valid { 1.0 } else { 0.7 };
        steps.push(ReasoningStep {
            step_number: 3,
            step_name: "validate".to_string(),
            input: json!({ "iso_code": iso, "amount": amount_value }),
            output: json!({ "valid": valid }),
            model_used: ModelUsed::RuleBased,
            reasoning_text: "checked ISO code membership and non-negative amount".to_string(),
            confidence: Some(confidence),
            duration_seconds: None,
        });

        (
            NormalizedAmount::Finite {
                amount: amount_value,
                currency: iso.unwrap_or_else(|| "USD".to_string()),
                confidence,
            },
            steps,
        )
    }

    async fn extract_amount_and_currency(
        &self,
        field_name: &str,
        raw_value: &str,
    ) -> (Option<Decimal>, Option<String>, ModelUsed) {
        if let Some(amount) = extract_plain_decimal(raw_value) {
            let hint = CURRENCY_SYMBOLS
                .iter()
                .find(|(sym, _)| raw_value.to_lowercase().contains(sym))
                .map(|(sym, _)| sym.to_string());
            return (Some(amount), hint, ModelUsed::RuleBased);
        }

        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        let prompt = format!(
            "Extract the numeric amount and currency symbol or name from the {field_name} \
             field value: \"{raw_value}\". Reply as JSON with keys amount and currency."
        );
        match self.llm.complete(LlmRequest::new("haiku", prompt)).await {
            Ok(response) => {
                let amount = response
                    .get("amount")
                    .and_then(|v| v.as_f64())
                    .and_then(|v| Decimal::try_from(v).ok());
                let currency = response.get("currency").and_then(|v| v.as_str()).map(|s| s.to_string());
                (amount, currency, ModelUsed::Haiku)
            }
            Err(_) => (None, None, ModelUsed::Haiku),
        }
    }

    async fn normalize_rounding_field(&self, raw_value: &str) -> (NormalizedRounding, Vec<ReasoningStep>) {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        let prompt = format!(
            "Extract separate delivery and return rounding rules (amount, direction in \
             up/down/nearest, currency) from: \"{raw_value}\". If only one value is given, \
             apply it symmetrically to both delivery and return. Reply as JSON."
        );
        let response = self
            .llm
            .complete(LlmRequest::new("haiku", prompt))
            .await
            .unwrap_or_else(|_| json!({}));

        let symmetric_amount = extract_plain_decimal(raw_value).unwrap_or(Decimal::ONE);
        let delivery_amount = response
            .get("delivery_amount")
            .and_then(|v| v.as_f64())
            .and_then(|v| Decimal::try_from(v).ok())
            .unwrap_or(symmetric_amount);
        let return_amount = response
            .get("return_amount")
            .and_then(|v| v.as_f64())
            .and_then(|v| Decimal::try_from(v).ok())
            .unwrap_or(symmetric_amount);
        let delivery_direction = parse_direction(response.get("delivery_direction"));
        let return_direction = parse_direction(response.get("return_direction"));
        let currency = response.get("currency").and_then(|v| v.as_str()).map(|s| s.to_string());

        let step = ReasoningStep {
            step_number: 1,
            step_name: "extract_rounding".to_string(),
            input: json!({ "raw_value": raw_value }),
            output: json!({
                "delivery_amount": delivery_amount,
                "return_amount": return_amount,
            }),
            model_used: ModelUsed::Haiku,
            reasoning_text: "extracted delivery/return rounding with symmetric fallback".to_string(),
            confidence: Some(0.85),
            duration_seconds: None,
        };

        (
            NormalizedRounding { delivery_amount, delivery_direction, return_amount, return_direction, currency },
            vec![step],
        )
    }
}

fn parse_direction(value: Option<&serde_json::Value>) -> RoundingDirection {
    match value.and_then(|v| v.as_str()) {
        Some("up") => RoundingDirection::Up,
        Some("down") => RoundingDirection::Down,
        _ => RoundingDirection::Nearest,
    }
}

fn extract_step(field_name: &str, raw_value: &str, special_value: &str, model_used: ModelUsed) -> ReasoningStep {
    ReasoningStep {
        step_number: 1,
        step_name: "extract_amount_and_currency".to_string(),
        input: json!({ "field": field_name, "raw_value": raw_value }),
        output: json!({ "special_value": special_value }),
        model_used,
        reasoning_text: format!("matched the {special_value} short-circuit before any model call"),
        confidence: Some(1.0),
        duration_seconds: None,
    }
}

pub(crate) fn extract_plain_decimal(raw_value: &str) -> Option<Decimal> {
    let cleaned: String = raw_value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        cleaned.parse::<Decimal>().ok()
    }
}

pub(crate) fn standardize_to_iso(hint: &str) -> Option<String> {
    let lower = hint.to_lowercase();
    CURRENCY_SYMBOLS
        .iter()
        .find(|(sym, _)| lower == *sym || lower.contains(sym))
        .map(|(_, iso)| iso.to_string())
        .or_else(|| {
            let upper = hint.to_uppercase();
            VALID_ISO_CODES.iter().find(|code| **code == upper).map(|c| c.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinity_short_circuit_ignores_trailing_prose() {
        let lower = "infinity; provided that the party consents".to_lowercase();
        assert!(INFINITY_TOKENS.iter().any(|tok| lower.starts_with(tok)));
    }

    #[test]
    fn dollar_sign_standardizes_to_usd() {
        assert_eq!(standardize_to_iso("$"), Some("USD".to_string()));
    }

    #[test]
    fn euro_word_standardizes_to_eur() {
        assert_eq!(standardize_to_iso("euro"), Some("EUR".to_string()));
    }

    #[test]
    fn plain_decimal_strips_currency_symbol_and_separators() {
        assert_eq!(extract_plain_decimal("$1,000,000").unwrap().to_string(), "1000000");
    }

    #[test]
    fn not_applicable_tokens_match_na() {
        assert!(NOT_APPLICABLE_TOKENS.contains(&"n/a"));
    }
}
