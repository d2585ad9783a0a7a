use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Closed set of standardized collateral types (spec.md §3
/// "NormalizedCollateral (core entity)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StandardizedCollateralType {
    CashUsd,
    CashEur,
    CashGbp,
    CashOther,
    UsTreasury,
    Agency,
    AgencyMbs,
    GovernmentBonds,
    CorporateBonds,
    CommercialPaper,
    Equities,
    MoneyMarket,
    MutualFunds,
    GoldSilver,
    Other,
    Unknown,
}

impl StandardizedCollateralType {
    /// Canonical label table used both for display and as the candidate
    /// set for the Validate Taxonomy step's nearest-match resolution
    /// (spec.md §4.3 step 4).
    pub const ALL: &'static [(StandardizedCollateralType, &'static str)] = &[
        (StandardizedCollateralType::CashUsd, "CASH_USD"),
        (StandardizedCollateralType::CashEur, "CASH_EUR"),
        (StandardizedCollateralType::CashGbp, "CASH_GBP"),
        (StandardizedCollateralType::CashOther, "CASH_OTHER"),
        (StandardizedCollateralType::UsTreasury, "US_TREASURY"),
        (StandardizedCollateralType::Agency, "AGENCY"),
        (StandardizedCollateralType::AgencyMbs, "AGENCY_MBS"),
        (StandardizedCollateralType::GovernmentBonds, "GOVERNMENT_BONDS"),
        (StandardizedCollateralType::CorporateBonds, "CORPORATE_BONDS"),
        (StandardizedCollateralType::CommercialPaper, "COMMERCIAL_PAPER"),
        (StandardizedCollateralType::Equities, "EQUITIES"),
        (StandardizedCollateralType::MoneyMarket, "MONEY_MARKET"),
        (StandardizedCollateralType::MutualFunds, "MUTUAL_FUNDS"),
        (StandardizedCollateralType::GoldSilver, "GOLD_SILVER"),
        (StandardizedCollateralType::Other, "OTHER"),
        (StandardizedCollateralType::Unknown, "UNKNOWN"),
    ];

    pub fn label(&self) -> &'static str {
        Self::ALL.iter().find(|(t, _)| t == self).unwrap().1
    }
}

/// A `[min_years, max_years)` maturity interval with its associated
/// valuation percentage and the haircut derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaturityBucket {
    pub min_years: Option<f64>,
    pub max_years: Option<f64>,
    pub valuation_percentage: Decimal,
    pub haircut: Decimal,
    pub original_text: String,
}

impl MaturityBucket {
    /// `haircut = 1 - valuation_percentage`, enforced exactly rather than
    /// trusted from extraction (spec.md §3 invariant).
    pub fn new(
        min_years: Option<f64>,
        max_years: Option<f64>,
        valuation_percentage: Decimal,
        original_text: impl Into<String>,
    ) -> Self {
        Self {
            min_years,
            max_years,
            haircut: Decimal::ONE - valuation_percentage,
            valuation_percentage,
            original_text: original_text.into(),
        }
    }

    /// Boundary-exclusive on the upper end: `[min, max)` by CSA convention.
    /// `None` denotes an open-ended bound.
    pub fn overlaps(&self, other: &MaturityBucket) -> bool {
        let a_min = self.min_years.unwrap_or(f64::NEG_INFINITY);
        let a_max = self.max_years.unwrap_or(f64::INFINITY);
        let b_min = other.min_years.unwrap_or(f64::NEG_INFINITY);
        let b_max = other.max_years.unwrap_or(f64::INFINITY);
        a_min < b_max && b_min < a_max
    }

    pub fn contains_years(&self, years: f64) -> bool {
        let min = self.min_years.unwrap_or(f64::NEG_INFINITY);
        let max = self.max_years.unwrap_or(f64::INFINITY);
        years >= min && years < max
    }
}

/// The open-ended interval type extracted directly from collateral-type
/// prose (e.g. "remaining maturity of 1 to 5 years"), distinct from the
/// per-bucket valuation-string maturity, used by Validate Logic (step 5)
/// to check bucket ranges are contained within it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaturityRange {
    pub min_years: Option<f64>,
    pub max_years: Option<f64>,
}

impl MaturityRange {
    pub fn contains(&self, bucket: &MaturityBucket) -> bool {
        let self_min = self.min_years.unwrap_or(f64::NEG_INFINITY);
        let self_max = self.max_years.unwrap_or(f64::INFINITY);
        let b_min = bucket.min_years.unwrap_or(f64::NEG_INFINITY);
        let b_max = bucket.max_years.unwrap_or(f64::INFINITY);
        b_min >= self_min && b_max <= self_max
    }
}

/// A single normalized collateral row: one `(standardized_type, rating_event)`
/// combination, either maturity-stratified or flat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedCollateral {
    pub standardized_type: StandardizedCollateralType,
    pub base_description: String,
    /// The scenario column this row applies to, or
    /// `"Base Valuation Percentage"` when only one column exists.
    pub rating_event: String,
    pub maturity_from_collateral_type: Option<MaturityRange>,
    pub valuation: CollateralValuation,
    pub confidence: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CollateralValuation {
    Stratified { maturity_buckets: Vec<MaturityBucket> },
    Flat { valuation_percentage: Decimal, haircut: Decimal },
}

impl CollateralValuation {
    pub fn flat(valuation_percentage: Decimal) -> Self {
        CollateralValuation::Flat {
            haircut: Decimal::ONE - valuation_percentage,
            valuation_percentage,
        }
    }
}

impl NormalizedCollateral {
    /// Within one `(standardized_type, rating_event)` group, maturity
    /// intervals must not overlap (spec.md §3 invariant, §8 testable
    /// property "No bucket overlap").
    pub fn has_overlapping_buckets(&self) -> bool {
        let buckets = match &self.valuation {
            CollateralValuation::Stratified { maturity_buckets } => maturity_buckets,
            CollateralValuation::Flat { .. } => return false,
        };
        for i in 0..buckets.len() {
            for j in (i + 1)..buckets.len() {
                if buckets[i].overlaps(&buckets[j]) {
                    return true;
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedCollateralTable {
    pub document_id: String,
    pub extraction_id: String,
    pub rating_events: Vec<String>,
    pub collateral_items: Vec<NormalizedCollateral>,
    pub normalized_at: DateTime<Utc>,
    pub normalization_model: String,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn haircut_is_one_minus_valuation() {
        let b = MaturityBucket::new(Some(1.0), Some(5.0), dec!(0.99), "99% (1-5yr)");
        assert_eq!(b.haircut, dec!(0.01));
    }

    #[test]
    fn adjacent_buckets_do_not_overlap() {
        let a = MaturityBucket::new(Some(1.0), Some(2.0), dec!(0.99), "a");
        let b = MaturityBucket::new(Some(2.0), Some(3.0), dec!(0.98), "b");
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn identical_ranges_overlap() {
        let a = MaturityBucket::new(Some(1.0), Some(5.0), dec!(0.99), "a");
        let b = MaturityBucket::new(Some(2.0), Some(3.0), dec!(0.98), "b");
        assert!(a.overlaps(&b));
    }

    #[test]
    fn open_ended_bucket_overlaps_everything_above_its_min() {
        let open = MaturityBucket::new(Some(5.0), None, dec!(0.95), "open");
        let finite = MaturityBucket::new(Some(10.0), Some(20.0), dec!(0.9), "finite");
        assert!(open.overlaps(&finite));
    }
}
