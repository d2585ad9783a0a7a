use std::collections::HashSet;

use chrono::NaiveDate;

use csa_core::domain::collateral::NormalizedCollateral;
use csa_core::domain::csa_terms::PartyTerms;
use csa_core::domain::validation::{DetailedCheck, ErrorCategory, Severity, ValidationError, ValidationReport};

/// Cross-field checks the Validation Agent performs (spec.md §4.6). No LLM
/// involved: every check is a pure function over already-normalized data.
pub struct ValidationAgent;

impl ValidationAgent {
    pub fn new() -> Self {
        ValidationAgent
    }

    pub fn validate(
        &self,
        collateral_items: &[NormalizedCollateral],
        currencies: &[String],
        timezones: &[Option<String>],
        party_a: &PartyTerms,
        party_b: &PartyTerms,
        agreement_date: Option<NaiveDate>,
        signature_date: Option<NaiveDate>,
    ) -> ValidationReport {
        let mut checks = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();

        // Currency consistency.
        let distinct_currencies: HashSet<&String> = currencies.iter().collect();
        let currency_ok = distinct_currencies.len() <= 1;
        checks.push(DetailedCheck {
            check_name: "currency_consistency".to_string(),
            passed: currency_ok,
            severity: Severity::Medium,
            message: if currency_ok {
                "all currency-valued fields agree".to_string()
            } else {
                format!("currency fields disagree: {distinct_currencies:?}")
            },
        });
        if !currency_ok {
            warnings.push("currency fields are inconsistent across the document".to_string());
        }

        // Timezone consistency.
        let distinct_timezones: HashSet<&Option<String>> = timezones.iter().collect();
        let timezone_ok = distinct_timezones.len() <= 1;
        checks.push(DetailedCheck {
            check_name: "timezone_consistency".to_string(),
            passed: timezone_ok,
            severity: Severity::Low,
            message: if timezone_ok {
                "all time fields resolved to the same timezone".to_string()
            } else {
                "time fields resolved to different timezones".to_string()
            },
        });
        if !timezone_ok {
            warnings.push("timezone fields are inconsistent across the document".to_string());
        }

        // MTA <= threshold, per party (blocking business-rule check).
        for (label, party) in [("party_a", party_a), ("party_b", party_b)] {
            let ok = party.mta_within_threshold();
            checks.push(DetailedCheck {
                check_name: format!("{label}_mta_within_threshold"),
                passed: ok,
                severity: Severity::High,
                message: if ok {
                    format!("{label}: MTA does not exceed threshold")
                } else {
                    format!("{label}: MTA exceeds finite threshold")
                },
            });
            if !ok {
                errors.push(ValidationError {
                    category: ErrorCategory::BusinessRules,
                    message: format!(
                        "{label}: minimum_transfer_amount ({}) exceeds threshold ({})",
                        party.minimum_transfer_amount,
                        party.threshold.finite_value().map(|v| v.to_string()).unwrap_or_default()
                    ),
                    blocking: true,
                });
                recommendations.push(format!(
                    "review {label}'s threshold and minimum transfer amount extraction for a transcription error"
                ));
            }
        }
        // Date consistency: agreement date must not be after signature date
        // (blocking, spec.md §4.6 "Errors categorized business_rules or date
        // are blocking").
        if let (Some(agreement), Some(signature)) = (agreement_date, signature_date) {
            let ok = agreement <= signature;
            checks.push(DetailedCheck {
                check_name: "date_consistency".to_string(),
                passed: ok,
                severity: Severity::High,
                message: if ok {
                    "agreement date is not after signature date".to_string()
                } else {
                    "agreement date is after signature date".to_string()
                },
            });
            if !ok {
                errors.push(ValidationError {
                    category: ErrorCategory::Date,
                    message: "Agreement date is after signature date".to_string(),
                    blocking: true,
                });
                recommendations
                    .push("review the agreement and signature dates for a transcription error".to_string());
            }
        }

        // Duplicate (standardized_type, rating_event) rows.
        let mut seen = HashSet::new();
        let mut duplicates = 0;
        for item in collateral_items {
            let key = (item.standardized_type, item.rating_event.clone());
            if !seen.insert(key) {
                duplicates += 1;
            }
        }
        checks.push(DetailedCheck {
            check_name: "duplicate_collateral_detection".to_string(),
            passed: duplicates == 0,
            severity: Severity::High,
            message: format!("{duplicates} duplicate (standardized_type, rating_event) row(s) detected"),
        });
        if duplicates > 0 {
            warnings.push(format!(
                "duplicate_collateral_detection: {duplicates} row(s) share the same type and rating event"
            ));
            recommendations.push(
                "review the source document to determine if duplicate rows should be merged".to_string(),
            );
        }

        // Potential split rows: same (type, rating_event), similar description.
        let mut potential_splits = 0;
        for i in 0..collateral_items.len() {
            for j in (i + 1)..collateral_items.len() {
                let a = &collateral_items[i];
                let b = &collateral_items[j];
                if a.standardized_type == b.standardized_type
                    && a.rating_event == b.rating_event
                    && jaccard_similarity(&a.base_description, &b.base_description) > 0.8
                {
                    potential_splits += 1;
                }
            }
        }
        checks.push(DetailedCheck {
            check_name: "potential_split_rows".to_string(),
            passed: potential_splits == 0,
            severity: Severity::Medium,
            message: format!("{potential_splits} potential split-row pair(s) detected"),
        });
        if potential_splits > 0 {
            warnings.push(format!("potential_split_rows: {potential_splits} pair(s) look like they should be merged"));
            recommendations.push(
                "check if similar rows were incorrectly split during extraction".to_string(),
            );
        }

        // Cross-item unusual maturity.
        let unusual_maturity = collateral_items.iter().any(|item| {
            if let csa_core::domain::collateral::CollateralValuation::Stratified { maturity_buckets } = &item.valuation {
                maturity_buckets.iter().any(|b| b.max_years.map(|m| m < 0.1).unwrap_or(false))
            } else {
                false
            }
        });
        checks.push(DetailedCheck {
            check_name: "unusual_maturity".to_string(),
            passed: !unusual_maturity,
            severity: Severity::Low,
            message: if unusual_maturity {
                "at least one maturity bucket under 0.1 years (~36 days)".to_string()
            } else {
                "no unusually short maturity buckets".to_string()
            },
        });
        if unusual_maturity {
            warnings.push("one or more maturity buckets are unusually short (< 0.1yr)".to_string());
        }

        let checks_performed = checks.len() as u32;
        let checks_failed = checks.iter().filter(|c| !c.passed).count() as u32;
        let checks_passed = checks_performed - checks_failed;
        let passed = !errors.iter().any(|e: &ValidationError| e.blocking);

        ValidationReport {
            passed,
            checks_performed,
            checks_passed,
            checks_failed,
            warnings,
            errors,
            recommendations,
            detailed_checks: checks,
        }
    }
}

impl Default for ValidationAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized token-overlap similarity used for the split-row check
/// (spec.md §4.6 "potential split rows"); the teacher stack carries no
/// fuzzy-string crate beyond what taxonomy nearest-match already needs.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens = |s: &str| -> HashSet<String> {
        s.to_lowercase().split_whitespace().map(|t| t.to_string()).collect()
    };
    let a_tokens = tokens(a);
    let b_tokens = tokens(b);
    if a_tokens.is_empty() && b_tokens.is_empty() {
        return 1.0;
    }
    let intersection = a_tokens.intersection(&b_tokens).count();
    let union = a_tokens.union(&b_tokens).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csa_core::domain::collateral::{CollateralValuation, StandardizedCollateralType};
    use csa_core::domain::csa_terms::Threshold;
    use rust_decimal_macros::dec;

    fn collateral(std_type: StandardizedCollateralType, rating_event: &str, desc: &str) -> NormalizedCollateral {
        NormalizedCollateral {
            standardized_type: std_type,
            base_description: desc.to_string(),
            rating_event: rating_event.to_string(),
            maturity_from_collateral_type: None,
            valuation: CollateralValuation::flat(dec!(0.99)),
            confidence: 0.9,
            notes: None,
        }
    }

    fn party(threshold: Threshold, mta: rust_decimal::Decimal) -> PartyTerms {
        PartyTerms { name: "Party".to_string(), threshold, minimum_transfer_amount: mta, independent_amount: rust_decimal::Decimal::ZERO }
    }

    #[test]
    fn mta_above_finite_threshold_is_blocking() {
        let agent = ValidationAgent::new();
        let a = party(Threshold::Finite(dec!(100_000)), dec!(250_000));
        let b = party(Threshold::Infinite, dec!(0));
        let report = agent.validate(&[], &[], &[], &a, &b, None, None);
        assert!(!report.passed);
        assert!(report.has_blocking_error());
    }

    #[test]
    fn duplicate_rows_produce_a_warning() {
        let agent = ValidationAgent::new();
        let items = vec![
            collateral(StandardizedCollateralType::CommercialPaper, "Moody's First Trigger", "commercial paper"),
            collateral(StandardizedCollateralType::CommercialPaper, "Moody's First Trigger", "commercial paper (2)"),
        ];
        let a = party(Threshold::Infinite, dec!(0));
        let b = party(Threshold::Infinite, dec!(0));
        let report = agent.validate(&items, &[], &[], &a, &b, None, None);
        assert!(report.warnings.iter().any(|w| w.contains("duplicate_collateral_detection")));
    }

    #[test]
    fn agreement_date_after_signature_date_is_blocking() {
        use chrono::NaiveDate;
        let agent = ValidationAgent::new();
        let a = party(Threshold::Infinite, dec!(0));
        let b = party(Threshold::Infinite, dec!(0));
        let agreement = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let signature = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let report = agent.validate(&[], &[], &[], &a, &b, Some(agreement), Some(signature));
        assert!(!report.passed);
        assert!(report.errors.iter().any(|e| e.category == ErrorCategory::Date));
    }

    #[test]
    fn agreement_date_on_or_before_signature_date_passes() {
        use chrono::NaiveDate;
        let agent = ValidationAgent::new();
        let a = party(Threshold::Infinite, dec!(0));
        let b = party(Threshold::Infinite, dec!(0));
        let agreement = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let signature = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let report = agent.validate(&[], &[], &[], &a, &b, Some(agreement), Some(signature));
        assert!(!report.errors.iter().any(|e| e.category == ErrorCategory::Date));
    }

    #[test]
    fn jaccard_similarity_is_one_for_identical_descriptions() {
        assert_eq!(jaccard_similarity("us treasury bonds", "us treasury bonds"), 1.0);
    }

    #[test]
    fn jaccard_similarity_is_low_for_unrelated_descriptions() {
        assert!(jaccard_similarity("us treasury bonds", "gold bullion reserve") < 0.3);
    }
}
