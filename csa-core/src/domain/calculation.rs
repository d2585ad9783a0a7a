use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::collateral::StandardizedCollateralType;

/// A unit of posted collateral fed into the calculator (spec.md §3
/// "CollateralItem").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralItem {
    pub collateral_type: StandardizedCollateralType,
    pub market_value: Decimal,
    pub haircut_rate: Decimal,
    pub currency: String,
    pub maturity_years: Option<f64>,
}

impl CollateralItem {
    /// `effective_value = market_value × (1 − haircut_rate)`.
    pub fn effective_value(&self) -> Decimal {
        self.market_value * (Decimal::ONE - self.haircut_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginCallAction {
    Call,
    Return,
    NoAction,
}

/// One logged step of the five-step calculator algorithm (spec.md §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationStep {
    pub step_number: u32,
    pub description: String,
    pub formula: String,
    pub inputs: HashMap<String, serde_json::Value>,
    pub result: Decimal,
    pub source_clause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginCall {
    pub action: MarginCallAction,
    pub amount: Decimal,
    pub currency: String,
    pub calculation_date: NaiveDate,
    pub net_exposure: Decimal,
    /// `None` when the governing threshold was infinite.
    pub threshold: Option<Decimal>,
    pub posted_collateral_items: Vec<CollateralItem>,
    pub effective_collateral: Decimal,
    pub exposure_above_threshold: Decimal,
    pub calculation_steps: Vec<CalculationStep>,
    pub counterparty_name: Option<String>,
    pub csa_terms_id: Option<String>,
}
