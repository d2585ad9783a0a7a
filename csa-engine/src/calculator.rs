use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use csa_core::domain::calculation::{CalculationStep, CollateralItem, MarginCall, MarginCallAction};
use csa_core::error::{CsaError, CsaResult};

/// Inputs to one calculator run (spec.md §4.9). A party-perspective
/// selection (which side's threshold/MTA/IA apply) has already been made
/// by the caller — the calculator itself is perspective-agnostic.
pub struct CalculatorInput {
    pub net_exposure: Decimal,
    pub threshold: Option<Decimal>,
    pub minimum_transfer_amount: Decimal,
    pub rounding: Decimal,
    pub independent_amount: Decimal,
    pub posted_collateral: Vec<CollateralItem>,
    pub currency: String,
    pub counterparty_name: Option<String>,
    pub csa_terms_id: Option<String>,
}

/// The five-step deterministic margin calculation (spec.md §4.9). Pure:
/// same inputs always produce the same `action`/`amount`; the only
/// non-deterministic field is `calculation_date`, which the caller may
/// override for reproducible tests.
pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Calculator
    }

    pub fn calculate(&self, input: CalculatorInput, calculation_date: NaiveDate) -> CsaResult<MarginCall> {
        if let Some(t) = input.threshold {
            if t < Decimal::ZERO {
                return Err(CsaError::InvalidInput("threshold must be non-negative when finite".to_string()));
            }
        }
        if input.minimum_transfer_amount < Decimal::ZERO {
            return Err(CsaError::InvalidInput("minimum_transfer_amount must be non-negative".to_string()));
        }
        if input.rounding <= Decimal::ZERO {
            return Err(CsaError::InvalidInput("rounding must be strictly positive".to_string()));
        }
        if input.independent_amount < Decimal::ZERO {
            return Err(CsaError::InvalidInput("independent_amount must be non-negative".to_string()));
        }

        let mut steps = Vec::new();

        // S1: infinite threshold short-circuits everything.
        if input.threshold.is_none() {
            steps.push(CalculationStep {
                step_number: 1,
                description: "infinite threshold — no collateral is ever called or returned".to_string(),
                formula: "threshold == +infinity => NO_ACTION".to_string(),
                inputs: [("net_exposure".to_string(), json!(input.net_exposure.to_string()))].into(),
                result: Decimal::ZERO,
                source_clause: "CSA threshold clause".to_string(),
            });
            return Ok(MarginCall {
                action: MarginCallAction::NoAction,
                amount: Decimal::ZERO,
                currency: input.currency,
                calculation_date,
                net_exposure: input.net_exposure,
                threshold: None,
                posted_collateral_items: input.posted_collateral,
                effective_collateral: Decimal::ZERO,
                exposure_above_threshold: Decimal::ZERO,
                calculation_steps: steps,
                counterparty_name: input.counterparty_name,
                csa_terms_id: input.csa_terms_id,
            });
        }
        let threshold = input.threshold.unwrap();
        let exposure_above_threshold = (input.net_exposure - threshold).max(Decimal::ZERO);
        steps.push(CalculationStep {
            step_number: 1,
            description: "exposure above threshold".to_string(),
            formula: "max(net_exposure - threshold, 0)".to_string(),
            inputs: [
                ("net_exposure".to_string(), json!(input.net_exposure.to_string())),
                ("threshold".to_string(), json!(threshold.to_string())),
            ]
            .into(),
            result: exposure_above_threshold,
            source_clause: "CSA threshold clause".to_string(),
        });

        // S2: effective collateral.
        let effective_collateral: Decimal = input
            .posted_collateral
            .iter()
            .map(|item| item.effective_value())
            .sum();
        steps.push(CalculationStep {
            step_number: 2,
            description: "effective collateral across all posted items".to_string(),
            formula: "sum(market_value * (1 - haircut_rate))".to_string(),
            inputs: [("posted_item_count".to_string(), json!(input.posted_collateral.len()))].into(),
            result: effective_collateral,
            source_clause: "CSA valuation percentage clause".to_string(),
        });

        // S2.5: independent amount, only when present.
        let mut total_required = exposure_above_threshold;
        if input.independent_amount > Decimal::ZERO {
            total_required += input.independent_amount;
            steps.push(CalculationStep {
                step_number: 3,
                description: "independent amount added pre-comparison".to_string(),
                formula: "exposure_above_threshold + independent_amount".to_string(),
                inputs: [("independent_amount".to_string(), json!(input.independent_amount.to_string()))].into(),
                result: total_required,
                source_clause: "CSA independent amount clause".to_string(),
            });
        }

        // S3: signed raw transfer amount.
        let raw = total_required - effective_collateral;
        steps.push(CalculationStep {
            step_number: steps.len() as u32 + 1,
            description: "signed required transfer before MTA/rounding".to_string(),
            formula: "total_required - effective_collateral".to_string(),
            inputs: [
                ("total_required".to_string(), json!(total_required.to_string())),
                ("effective_collateral".to_string(), json!(effective_collateral.to_string())),
            ]
            .into(),
            result: raw,
            source_clause: "CSA margin call clause".to_string(),
        });

        // S4: MTA filter.
        if raw.abs() < input.minimum_transfer_amount {
            steps.push(CalculationStep {
                step_number: steps.len() as u32 + 1,
                description: "below minimum transfer amount — no action taken".to_string(),
                formula: "|raw| < minimum_transfer_amount => NO_ACTION".to_string(),
                inputs: [("minimum_transfer_amount".to_string(), json!(input.minimum_transfer_amount.to_string()))].into(),
                result: Decimal::ZERO,
                source_clause: "CSA minimum transfer amount clause".to_string(),
            });
            return Ok(MarginCall {
                action: MarginCallAction::NoAction,
                amount: Decimal::ZERO,
                currency: input.currency,
                calculation_date,
                net_exposure: input.net_exposure,
                threshold: Some(threshold),
                posted_collateral_items: input.posted_collateral,
                effective_collateral,
                exposure_above_threshold,
                calculation_steps: steps,
                counterparty_name: input.counterparty_name,
                csa_terms_id: input.csa_terms_id,
            });
        }

        // S5: round to the nearest increment, direction depending on sign.
        let (amount, action) = if raw > Decimal::ZERO {
            (round_up_to_increment(raw, input.rounding), MarginCallAction::Call)
        } else {
            (round_down_to_increment(raw.abs(), input.rounding), MarginCallAction::Return)
        };
        steps.push(CalculationStep {
            step_number: steps.len() as u32 + 1,
            description: format!("rounded to the nearest {} increment", input.rounding),
            formula: if action == MarginCallAction::Call {
                "ceil(raw / rounding) * rounding".to_string()
            } else {
                "floor(|raw| / rounding) * rounding".to_string()
            },
            inputs: [("rounding".to_string(), json!(input.rounding.to_string()))].into(),
            result: amount,
            source_clause: "CSA rounding clause".to_string(),
        });

        Ok(MarginCall {
            action,
            amount,
            currency: input.currency,
            calculation_date,
            net_exposure: input.net_exposure,
            threshold: Some(threshold),
            posted_collateral_items: input.posted_collateral,
            effective_collateral,
            exposure_above_threshold,
            calculation_steps: steps,
            counterparty_name: input.counterparty_name,
            csa_terms_id: input.csa_terms_id,
        })
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// `ceil(value / increment) * increment`, entirely in `Decimal` to avoid a
/// float round-trip (spec.md §4.9 S5).
fn round_up_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    let quotient = value / increment;
    let truncated = quotient.trunc();
    let steps = if quotient > truncated { truncated + Decimal::ONE } else { truncated };
    steps * increment
}

/// `floor(value / increment) * increment`.
fn round_down_to_increment(value: Decimal, increment: Decimal) -> Decimal {
    (value / increment).trunc() * increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use csa_core::domain::collateral::StandardizedCollateralType;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    fn item(mv: Decimal, haircut: Decimal) -> CollateralItem {
        CollateralItem {
            collateral_type: StandardizedCollateralType::UsTreasury,
            market_value: mv,
            haircut_rate: haircut,
            currency: "USD".to_string(),
            maturity_years: None,
        }
    }

    fn base_input() -> CalculatorInput {
        CalculatorInput {
            net_exposure: Decimal::ZERO,
            threshold: Some(Decimal::ZERO),
            minimum_transfer_amount: Decimal::ZERO,
            rounding: dec!(10_000),
            independent_amount: Decimal::ZERO,
            posted_collateral: Vec::new(),
            currency: "USD".to_string(),
            counterparty_name: None,
            csa_terms_id: None,
        }
    }

    #[test]
    fn scenario_1_exposure_below_threshold_is_no_action() {
        let calc = Calculator::new();
        let input = CalculatorInput {
            net_exposure: dec!(1_800_000),
            threshold: Some(dec!(2_000_000)),
            minimum_transfer_amount: dec!(250_000),
            ..base_input()
        };
        let result = calc.calculate(input, date()).unwrap();
        assert_eq!(result.action, MarginCallAction::NoAction);
        assert_eq!(result.amount, Decimal::ZERO);
        assert_eq!(result.exposure_above_threshold, Decimal::ZERO);
    }

    #[test]
    fn scenario_2_raw_below_mta_is_no_action() {
        let calc = Calculator::new();
        let input = CalculatorInput {
            net_exposure: dec!(2_200_000),
            threshold: Some(dec!(2_000_000)),
            minimum_transfer_amount: dec!(250_000),
            ..base_input()
        };
        let result = calc.calculate(input, date()).unwrap();
        assert_eq!(result.action, MarginCallAction::NoAction);
        assert_eq!(result.amount, Decimal::ZERO);
    }

    #[test]
    fn scenario_3_single_treasury_item_produces_a_call() {
        let calc = Calculator::new();
        let input = CalculatorInput {
            net_exposure: dec!(5_000_000),
            threshold: Some(dec!(2_000_000)),
            minimum_transfer_amount: dec!(250_000),
            posted_collateral: vec![item(dec!(1_000_000), dec!(0.01))],
            ..base_input()
        };
        let result = calc.calculate(input, date()).unwrap();
        assert_eq!(result.action, MarginCallAction::Call);
        assert_eq!(result.amount, dec!(2_010_000));
        assert_eq!(result.effective_collateral, dec!(990_000));
    }

    #[test]
    fn scenario_4_multi_item_basket_produces_a_call() {
        let calc = Calculator::new();
        let input = CalculatorInput {
            net_exposure: dec!(8_000_000),
            threshold: Some(dec!(1_000_000)),
            minimum_transfer_amount: dec!(100_000),
            posted_collateral: vec![
                item(dec!(1_000_000), dec!(0)),
                item(dec!(2_000_000), dec!(0.01)),
                item(dec!(1_000_000), dec!(0.03)),
                item(dec!(500_000), dec!(0.08)),
            ],
            ..base_input()
        };
        let result = calc.calculate(input, date()).unwrap();
        assert_eq!(result.action, MarginCallAction::Call);
        assert_eq!(result.amount, dec!(2_590_000));
        assert_eq!(result.effective_collateral, dec!(4_410_000));
    }

    #[test]
    fn scenario_5_negative_exposure_produces_a_return() {
        let calc = Calculator::new();
        let input = CalculatorInput {
            net_exposure: dec!(-500_000),
            threshold: Some(dec!(1_000_000)),
            minimum_transfer_amount: dec!(100_000),
            posted_collateral: vec![item(dec!(1_000_000), dec!(0))],
            ..base_input()
        };
        let result = calc.calculate(input, date()).unwrap();
        assert_eq!(result.action, MarginCallAction::Return);
        assert_eq!(result.amount, dec!(1_000_000));
    }

    #[test]
    fn scenario_6_independent_amount_is_added_pre_comparison() {
        let calc = Calculator::new();
        let input = CalculatorInput {
            net_exposure: dec!(3_000_000),
            threshold: Some(dec!(2_000_000)),
            minimum_transfer_amount: dec!(100_000),
            independent_amount: dec!(500_000),
            ..base_input()
        };
        let result = calc.calculate(input, date()).unwrap();
        assert_eq!(result.action, MarginCallAction::Call);
        assert_eq!(result.amount, dec!(1_500_000));
    }

    #[test]
    fn scenario_7_infinite_threshold_is_always_no_action() {
        let calc = Calculator::new();
        let input = CalculatorInput {
            net_exposure: dec!(999_999_999),
            threshold: None,
            minimum_transfer_amount: dec!(0),
            posted_collateral: vec![item(dec!(1_000_000), dec!(0))],
            ..base_input()
        };
        let result = calc.calculate(input, date()).unwrap();
        assert_eq!(result.action, MarginCallAction::NoAction);
        assert_eq!(result.amount, Decimal::ZERO);
        assert!(result.calculation_steps[0].description.contains("infinite threshold"));
    }

    #[test]
    fn negative_finite_threshold_is_rejected() {
        let calc = Calculator::new();
        let input = CalculatorInput { threshold: Some(dec!(-1)), ..base_input() };
        assert!(calc.calculate(input, date()).is_err());
    }

    #[test]
    fn non_positive_rounding_is_rejected() {
        let calc = Calculator::new();
        let input = CalculatorInput { rounding: Decimal::ZERO, ..base_input() };
        assert!(calc.calculate(input, date()).is_err());
    }
}
