use std::sync::Arc;
use std::time::Instant;

use csa_core::domain::agent::{
    aggregate_confidence, requires_human_review, AgentResult, Correction, ModelUsed, ReasoningStep,
};
use csa_core::domain::collateral::{
    CollateralValuation, MaturityBucket, MaturityRange, NormalizedCollateral,
    StandardizedCollateralType,
};
use futures::stream::{self, StreamExt};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;

use super::base::{LlmClient, LlmRequest};

/// One `(collateral_type_text, valuation_string, rating_event)` tuple routed
/// to the agent by the Normalization Orchestrator (spec.md §4.7 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralFieldInput {
    pub collateral_type_text: String,
    pub valuation_string: String,
    pub rating_event: String,
}

struct ItemOutcome {
    index: usize,
    normalized: Option<NormalizedCollateral>,
    steps: Vec<ReasoningStep>,
    corrections: Vec<Correction>,
    error: Option<String>,
}

/// 6-step reasoning over the eligible-collateral table (spec.md §4.3).
#[derive(Clone)]
pub struct CollateralAgent {
    llm: Arc<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
    auto_batch_threshold: usize,
    parallel_batch_size: usize,
}

impl CollateralAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        semaphore: Arc<Semaphore>,
        auto_batch_threshold: usize,
        parallel_batch_size: usize,
    ) -> Self {
        CollateralAgent { llm, semaphore, auto_batch_threshold, parallel_batch_size }
    }

    pub async fn normalize(&self, items: Vec<CollateralFieldInput>) -> AgentResult {
        let start = Instant::now();
        let item_count = items.len();

        let mut outcomes: Vec<ItemOutcome> = if item_count > self.auto_batch_threshold {
            stream::iter(items.into_iter().enumerate())
                .map(|(index, item)| {
                    let this = self.clone();
                    async move { this.process_one(index, item).await }
                })
                .buffer_unordered(self.parallel_batch_size)
                .collect()
                .await
        } else {
            let mut out = Vec::with_capacity(item_count);
            for (index, item) in items.into_iter().enumerate() {
                out.push(self.process_one(index, item).await);
            }
            out
        };
        outcomes.sort_by_key(|o| o.index);

        let mut normalized_items = Vec::new();
        let mut reasoning_chain = Vec::new();
        let mut corrections = Vec::new();
        let mut self_corrections_count = 0u32;
        let mut item_errors = Vec::new();

        for outcome in outcomes {
            reasoning_chain.extend(outcome.steps);
            self_corrections_count += outcome.corrections.len() as u32;
            corrections.extend(outcome.corrections);
            match outcome.normalized {
                Some(item) => normalized_items.push(item),
                None => {
                    item_errors.push(format!(
                        "item {}: {}",
                        outcome.index,
                        outcome.error.unwrap_or_else(|| "unknown error".to_string())
                    ));
                }
            }
        }

        let confidence = aggregate_confidence(&reasoning_chain);
        let mut human_review_reason = None;
        let mut needs_review = requires_human_review(confidence);
        if !item_errors.is_empty() {
            needs_review = true;
            human_review_reason = Some(format!("{} item(s) failed normalization", item_errors.len()));
        }

        AgentResult {
            agent_name: "CollateralAgent".to_string(),
            data: json!({ "collateral_items": normalized_items, "item_errors": item_errors }),
            confidence,
            reasoning_chain,
            corrections,
            self_corrections_count,
            requires_human_review: needs_review,
            human_review_reason,
            processing_time_seconds: start.elapsed().as_secs_f64(),
            error: None,
        }
    }

    async fn process_one(&self, index: usize, item: CollateralFieldInput) -> ItemOutcome {
        let handle = {
            let this = self.clone();
            tokio::spawn(async move { this.run_six_steps(item).await })
        };
        match handle.await {
            Ok((normalized, steps, corrections)) => {
                ItemOutcome { index, normalized: Some(normalized), steps, corrections, error: None }
            }
            Err(join_error) => ItemOutcome {
                index,
                normalized: None,
                steps: Vec::new(),
                corrections: Vec::new(),
                error: Some(join_error.to_string()),
            },
        }
    }

    async fn run_six_steps(
        &self,
        item: CollateralFieldInput,
    ) -> (NormalizedCollateral, Vec<ReasoningStep>, Vec<Correction>) {
        let mut steps = Vec::new();
        let mut corrections = Vec::new();

        // Step 1: Initial Parse — structural draft from both the type text
        // and the valuation string (spec.md §4.3 step 1).
        let type_maturity = maturity_from_type_text(&item.collateral_type_text);
        let mut buckets = buckets_from_valuation_string(&item.valuation_string);
        if buckets.is_empty() {
            if let Some(range) = type_maturity {
                buckets.push(MaturityBucket::new(
                    range.min_years,
                    range.max_years,
                    flat_percentage_from_text(&item.valuation_string),
                    item.valuation_string.clone(),
                ));
            } else {
                buckets.push(MaturityBucket::new(
                    None,
                    None,
                    flat_percentage_from_text(&item.valuation_string),
                    item.valuation_string.clone(),
                ));
            }
        }
        let draft_type = classify_from_text(&item.collateral_type_text);
        steps.push(ReasoningStep {
            step_number: 1,
            step_name: "initial_parse".to_string(),
            input: json!({ "collateral_type_text": item.collateral_type_text, "valuation_string": item.valuation_string }),
            output: json!({ "draft_type": draft_type.label(), "bucket_count": buckets.len() }),
            model_used: ModelUsed::RuleBased,
            reasoning_text: "extracted maturity phrases and valuation buckets from source text"
                .to_string(),
            confidence: Some(0.9),
            duration_seconds: None,
        });

        // Step 2: Detect Ambiguities.
        let mut issues = Vec::new();
        let has_overlap = buckets
            .iter()
            .enumerate()
            .any(|(i, a)| buckets[i + 1..].iter().any(|b| a.overlaps(b)));
        if has_overlap {
            issues.push("overlapping buckets".to_string());
        }
        if let (Some(range), false) = (type_maturity, buckets.is_empty()) {
            if !buckets.iter().all(|b| range.contains(b)) {
                issues.push("type/bucket maturity conflict".to_string());
            }
        }
        let needs_resolution = !issues.is_empty();
        steps.push(ReasoningStep {
            step_number: 2,
            step_name: "detect_ambiguities".to_string(),
            input: json!({ "bucket_count": buckets.len() }),
            output: json!({ "issues": issues, "needs_resolution": needs_resolution }),
            model_used: ModelUsed::RuleBased,
            reasoning_text: "checked for bucket overlap and type/bucket maturity conflicts"
                .to_string(),
            confidence: Some(0.9),
            duration_seconds: None,
        });

        // Step 3: Resolve Ambiguities (deep model, conditional).
        if needs_resolution {
            let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
            let prompt = format!(
                "Resolve maturity bucket ambiguities for collateral \"{}\" valuation \"{}\". \
                 Issues: {:?}. Upper bounds are exclusive; haircuts must be non-decreasing with \
                 maturity; prefer the valuation string's buckets over the type description's \
                 range when they disagree.",
                item.collateral_type_text, item.valuation_string, issues
            );
            let response = self
                .llm
                .complete(LlmRequest::new("sonnet", prompt))
                .await
                .unwrap_or_else(|_| json!({ "resolved": false }));
            steps.push(ReasoningStep {
                step_number: 3,
                step_name: "resolve_ambiguities".to_string(),
                input: json!({ "issues": issues }),
                output: response,
                model_used: ModelUsed::Sonnet,
                reasoning_text: "applied CSA bucket-boundary and haircut-monotonicity conventions"
                    .to_string(),
                confidence: Some(0.85),
                duration_seconds: None,
            });
        }

        // Step 4: Validate Taxonomy (rule-based nearest-match).
        let mut final_type = draft_type;
        let mut type_confidence_cap = None;
        if draft_type == StandardizedCollateralType::Unknown {
            if let Some((matched, score)) = nearest_taxonomy_match(&item.collateral_type_text) {
                if score > 0.6 {
                    corrections.push(Correction {
                        field: "standardized_type".to_string(),
                        from: "UNKNOWN".to_string(),
                        to: matched.label().to_string(),
                        reason: format!("nearest-match similarity {score:.2} against canonical labels"),
                    });
                    final_type = matched;
                } else {
                    type_confidence_cap = Some(0.5);
                }
            } else {
                type_confidence_cap = Some(0.5);
            }
        }
        steps.push(ReasoningStep {
            step_number: 4,
            step_name: "validate_taxonomy".to_string(),
            input: json!({ "draft_type": draft_type.label() }),
            output: json!({ "final_type": final_type.label() }),
            model_used: ModelUsed::RuleBased,
            reasoning_text: "nearest-match against the closed standardized-type enum".to_string(),
            confidence: Some(type_confidence_cap.unwrap_or(0.9)),
            duration_seconds: None,
        });

        // Step 5: Validate Logic.
        let mut logic_issues = Vec::new();
        for bucket in &buckets {
            if bucket.valuation_percentage < Decimal::ZERO || bucket.valuation_percentage > Decimal::ONE {
                logic_issues.push("valuation percentage out of [0,1]".to_string());
            }
            if let (Some(min), Some(max)) = (bucket.min_years, bucket.max_years) {
                if min >= max {
                    logic_issues.push("min >= max in bucket".to_string());
                }
                if max < 0.1 {
                    logic_issues.push("unusually short maturity bucket (< 0.1yr)".to_string());
                }
            }
            if bucket.min_years.map(fractional_digit_count).unwrap_or(0) > 2 {
                logic_issues.push("suspiciously precise min_years (> 2 decimal places)".to_string());
            }
            if bucket.max_years.map(fractional_digit_count).unwrap_or(0) > 2 {
                logic_issues.push("suspiciously precise max_years (> 2 decimal places)".to_string());
            }
        }
        buckets.sort_by(|a, b| {
            a.min_years
                .unwrap_or(f64::NEG_INFINITY)
                .partial_cmp(&b.min_years.unwrap_or(f64::NEG_INFINITY))
                .unwrap()
        });
        for pair in buckets.windows(2) {
            if let (Some(prev_max), Some(next_min)) = (pair[0].max_years, pair[1].min_years) {
                if next_min - prev_max > 0.01 {
                    logic_issues.push("gap between consecutive buckets".to_string());
                }
            }
        }
        steps.push(ReasoningStep {
            step_number: 5,
            step_name: "validate_logic".to_string(),
            input: json!({ "bucket_count": buckets.len() }),
            output: json!({ "issues": logic_issues }),
            model_used: ModelUsed::RuleBased,
            reasoning_text: "checked bucket ordering, percentage bounds, and gaps".to_string(),
            confidence: Some(0.9),
            duration_seconds: None,
        });

        // Step 6: Synthesize.
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        let prompt = format!(
            "Summarize the normalization of collateral \"{}\" ({}) into a single-paragraph note.",
            item.collateral_type_text, final_type.label()
        );
        let response = self
            .llm
            .complete(LlmRequest::new("sonnet", prompt))
            .await
            .unwrap_or_else(|_| json!({ "summary": "" }));
        let notes = response.get("summary").and_then(|s| s.as_str()).map(|s| s.to_string());
        let synth_confidence = type_confidence_cap.unwrap_or(if logic_issues.is_empty() { 0.92 } else { 0.75 });
        steps.push(ReasoningStep {
            step_number: 6,
            step_name: "synthesize".to_string(),
            input: json!({ "final_type": final_type.label() }),
            output: response,
            model_used: ModelUsed::Sonnet,
            reasoning_text: "reviewed the full trace and emitted final confidence".to_string(),
            confidence: Some(synth_confidence),
            duration_seconds: None,
        });

        let valuation = if buckets.len() == 1 && buckets[0].min_years.is_none() && buckets[0].max_years.is_none() {
            CollateralValuation::flat(buckets[0].valuation_percentage)
        } else {
            CollateralValuation::Stratified { maturity_buckets: buckets }
        };

        let normalized = NormalizedCollateral {
            standardized_type: final_type,
            base_description: item.collateral_type_text,
            rating_event: item.rating_event,
            maturity_from_collateral_type: type_maturity,
            valuation,
            confidence: synth_confidence,
            notes,
        };

        (normalized, steps, corrections)
    }
}

/// `"not more than 30 days"` converts to years by `/365`; `"remaining
/// maturity of 1 to 5 years"` gives an explicit range (spec.md §4.3 step 1).
pub(crate) fn maturity_from_type_text(text: &str) -> Option<MaturityRange> {
    let days_re = Regex::new(r"(?i)not more than\s+(\d+)\s*days?").expect("valid regex");
    if let Some(caps) = days_re.captures(text) {
        let days: f64 = caps[1].parse().ok()?;
        return Some(MaturityRange { min_years: None, max_years: Some(days / 365.0) });
    }
    let range_re =
        Regex::new(r"(?i)remaining maturity of\s+(\d+(?:\.\d+)?)\s*to\s*(\d+(?:\.\d+)?)\s*years?")
            .expect("valid regex");
    if let Some(caps) = range_re.captures(text) {
        let min: f64 = caps[1].parse().ok()?;
        let max: f64 = caps[2].parse().ok()?;
        return Some(MaturityRange { min_years: Some(min), max_years: Some(max) });
    }
    None
}

/// Parses valuation strings like `"99% (1-2yr), 98% (2-3yr), 97%(3-5yr)"`,
/// `">20yr"`, `"<1yr"` into ordered buckets (spec.md §4.3 step 1, §8
/// "Normalization scenarios").
pub(crate) fn buckets_from_valuation_string(text: &str) -> Vec<MaturityBucket> {
    let bucket_re =
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*\(?\s*(\d+(?:\.\d+)?)\s*-\s*(\d+(?:\.\d+)?)\s*yr\)?")
            .expect("valid regex");
    let mut buckets: Vec<MaturityBucket> = bucket_re
        .captures_iter(text)
        .filter_map(|caps| {
            let pct: f64 = caps[1].parse().ok()?;
            let min: f64 = caps[2].parse().ok()?;
            let max: f64 = caps[3].parse().ok()?;
            Some(MaturityBucket::new(
                Some(min),
                Some(max),
                Decimal::try_from(pct / 100.0).ok()?,
                caps[0].to_string(),
            ))
        })
        .collect();

    if buckets.is_empty() {
        let gt_re = Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%.*?>\s*(\d+(?:\.\d+)?)\s*yr").expect("valid regex");
        if let Some(caps) = gt_re.captures(text) {
            if let (Ok(pct), Ok(min)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) {
                if let Ok(dec) = Decimal::try_from(pct / 100.0) {
                    buckets.push(MaturityBucket::new(Some(min), None, dec, caps[0].to_string()));
                }
            }
        }
        let lt_re = Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%.*?<\s*(\d+(?:\.\d+)?)\s*yr").expect("valid regex");
        if let Some(caps) = lt_re.captures(text) {
            if let (Ok(pct), Ok(max)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) {
                if let Ok(dec) = Decimal::try_from(pct / 100.0) {
                    buckets.push(MaturityBucket::new(None, Some(max), dec, caps[0].to_string()));
                }
            }
        }
    }
    buckets
}

/// Number of significant fractional digits in `val`, formatting at 10
/// decimal places and stripping trailing zeros first so e.g. `1.5` reads
/// as 1 digit rather than 10 (spec.md §4.3 step 5 "flag decimal precision
/// > 2 as suspiciously precise").
fn fractional_digit_count(val: f64) -> usize {
    let formatted = format!("{val:.10}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed.split_once('.') {
        Some((_, frac)) => frac.len(),
        None => 0,
    }
}

/// A bare `"99%"` with no bucket markers, used as the flat fallback.
pub(crate) fn flat_percentage_from_text(text: &str) -> Decimal {
    let re = Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid regex");
    re.captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .and_then(|pct| Decimal::try_from(pct / 100.0).ok())
        .unwrap_or(Decimal::ONE)
}

pub(crate) fn classify_from_text(text: &str) -> StandardizedCollateralType {
    let lower = text.to_lowercase();
    let rules: &[(&str, StandardizedCollateralType)] = &[
        ("us treasury", StandardizedCollateralType::UsTreasury),
        ("treasury", StandardizedCollateralType::UsTreasury),
        ("agency mortgage", StandardizedCollateralType::AgencyMbs),
        ("agency mbs", StandardizedCollateralType::AgencyMbs),
        ("agency", StandardizedCollateralType::Agency),
        ("government bond", StandardizedCollateralType::GovernmentBonds),
        ("sovereign", StandardizedCollateralType::GovernmentBonds),
        ("corporate bond", StandardizedCollateralType::CorporateBonds),
        ("commercial paper", StandardizedCollateralType::CommercialPaper),
        ("equit", StandardizedCollateralType::Equities),
        ("money market", StandardizedCollateralType::MoneyMarket),
        ("mutual fund", StandardizedCollateralType::MutualFunds),
        ("gold", StandardizedCollateralType::GoldSilver),
        ("silver", StandardizedCollateralType::GoldSilver),
        ("cash (usd)", StandardizedCollateralType::CashUsd),
        ("usd cash", StandardizedCollateralType::CashUsd),
        ("cash (eur)", StandardizedCollateralType::CashEur),
        ("eur cash", StandardizedCollateralType::CashEur),
        ("cash (gbp)", StandardizedCollateralType::CashGbp),
        ("gbp cash", StandardizedCollateralType::CashGbp),
        ("cash", StandardizedCollateralType::CashUsd),
    ];
    rules
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, t)| *t)
        .unwrap_or(StandardizedCollateralType::Unknown)
}

/// Nearest-match against the closed enum's canonical labels via a
/// hand-rolled Jaro similarity (spec.md §4.3 step 4). The teacher's
/// dependency stack carries no fuzzy-string crate, so this stays a small
/// self-contained function rather than pulling one in for a single call site.
fn nearest_taxonomy_match(text: &str) -> Option<(StandardizedCollateralType, f64)> {
    let upper = text.to_uppercase().replace([' ', '-'], "_");
    StandardizedCollateralType::ALL
        .iter()
        .map(|(t, label)| (*t, jaro_similarity(&upper, label)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
}

fn jaro_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let match_distance = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut a_matches = vec![false; a.len()];
    let mut b_matches = vec![false; b.len()];
    let mut matches = 0;

    for (i, ac) in a.iter().enumerate() {
        let start = i.saturating_sub(match_distance);
        let end = (i + match_distance + 1).min(b.len());
        for j in start..end {
            if b_matches[j] || *ac != b[j] {
                continue;
            }
            a_matches[i] = true;
            b_matches[j] = true;
            matches += 1;
            break;
        }
    }
    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0;
    let mut k = 0;
    for i in 0..a.len() {
        if !a_matches[i] {
            continue;
        }
        while !b_matches[k] {
            k += 1;
        }
        if a[i] != b[k] {
            transpositions += 1;
        }
        k += 1;
    }
    let matches = matches as f64;
    (matches / a.len() as f64 + matches / b.len() as f64 + (matches - (transpositions as f64 / 2.0)) / matches) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_bucket_valuation_string() {
        let buckets = buckets_from_valuation_string("99% (1-2yr), 98% (2-3yr), 97%(3-5yr)");
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[2].min_years, Some(3.0));
        assert_eq!(buckets[2].max_years, Some(5.0));
    }

    #[test]
    fn parses_open_ended_greater_than() {
        let buckets = buckets_from_valuation_string("95% >20yr");
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].min_years, Some(20.0));
        assert_eq!(buckets[0].max_years, None);
    }

    #[test]
    fn maturity_from_type_text_converts_days_to_years() {
        let range = maturity_from_type_text("not more than 30 days").unwrap();
        assert!((range.max_years.unwrap() - 30.0 / 365.0).abs() < 1e-9);
    }

    #[test]
    fn maturity_from_type_text_parses_explicit_year_range() {
        let range = maturity_from_type_text("remaining maturity of 1 to 5 years").unwrap();
        assert_eq!(range.min_years, Some(1.0));
        assert_eq!(range.max_years, Some(5.0));
    }

    #[test]
    fn fractional_digit_count_ignores_trailing_zeros() {
        assert_eq!(fractional_digit_count(1.5), 1);
        assert_eq!(fractional_digit_count(2.0), 0);
    }

    #[test]
    fn fractional_digit_count_flags_more_than_two_places() {
        assert_eq!(fractional_digit_count(1.23456), 5);
    }

    #[test]
    fn classify_recognizes_us_treasury() {
        assert_eq!(classify_from_text("US Treasury Bills"), StandardizedCollateralType::UsTreasury);
    }

    #[test]
    fn unclassified_text_is_unknown() {
        assert_eq!(classify_from_text("some exotic instrument"), StandardizedCollateralType::Unknown);
    }

    #[test]
    fn jaro_similarity_is_high_for_near_identical_strings() {
        assert!(jaro_similarity("US_TREASURY", "US_TREASURY") > 0.99);
        assert!(jaro_similarity("US_TREASURY", "GOVERNMENT_BONDS") < 0.6);
    }
}
