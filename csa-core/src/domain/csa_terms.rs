use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CsaError, CsaResult};

use super::collateral::NormalizedCollateral;

/// `+∞` for a threshold is a first-class business value meaning "never post
/// collateral" — modeled as a sum type rather than a float sentinel so
/// "missing" and "infinite" can never be confused (spec.md §9 Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Threshold {
    Finite(Decimal),
    Infinite,
}

impl Threshold {
    pub fn is_infinite(&self) -> bool {
        matches!(self, Threshold::Infinite)
    }

    pub fn finite_value(&self) -> Option<Decimal> {
        match self {
            Threshold::Finite(d) => Some(*d),
            Threshold::Infinite => None,
        }
    }
}

/// Per-party economic terms (spec.md §3 "CSATerms").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyTerms {
    pub name: String,
    pub threshold: Threshold,
    pub minimum_transfer_amount: Decimal,
    pub independent_amount: Decimal,
}

impl PartyTerms {
    /// `minimum_transfer_amount ≤ threshold` unless threshold is infinite.
    pub fn mta_within_threshold(&self) -> bool {
        match self.threshold {
            Threshold::Infinite => true,
            Threshold::Finite(t) => self.minimum_transfer_amount <= t,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsaTerms {
    pub document_id: String,
    pub party_a: PartyTerms,
    pub party_b: PartyTerms,
    pub rounding: Decimal,
    pub currency: String,
    pub normalized_collateral_id: String,
    pub eligible_collateral: Vec<NormalizedCollateral>,
    pub valuation_agent: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub source_pages: BTreeMap<String, u32>,
}

impl CsaTerms {
    /// Constructing a `CsaTerms` requires normalized collateral to already
    /// exist (spec.md §3 hard precondition) and requires a strictly
    /// positive rounding increment. Violations of the "rounding <
    /// minimum_transfer_amount" convention are not fatal — return them as
    /// warnings for the caller to log, not as a constructor failure.
    pub fn new(
        document_id: impl Into<String>,
        party_a: PartyTerms,
        party_b: PartyTerms,
        rounding: Decimal,
        currency: impl Into<String>,
        normalized_collateral_id: impl Into<String>,
        eligible_collateral: Vec<NormalizedCollateral>,
        valuation_agent: Option<String>,
        effective_date: Option<NaiveDate>,
        source_pages: BTreeMap<String, u32>,
    ) -> CsaResult<(Self, Vec<String>)> {
        if eligible_collateral.is_empty() {
            return Err(CsaError::precondition(
                "CSATerms construction requires a non-empty normalized collateral table",
                "run the Normalization Orchestrator against this document's extraction first",
            ));
        }
        if rounding <= Decimal::ZERO {
            return Err(CsaError::InvalidInput(
                "rounding must be strictly positive".to_string(),
            ));
        }

        let mut warnings = Vec::new();
        for (label, party) in [("party_a", &party_a), ("party_b", &party_b)] {
            if !party.mta_within_threshold() {
                return Err(CsaError::ValidationFailure(format!(
                    "{label}: minimum_transfer_amount exceeds finite threshold"
                )));
            }
            if party.minimum_transfer_amount > Decimal::ZERO && rounding >= party.minimum_transfer_amount
            {
                warnings.push(format!(
                    "{label}: rounding ({rounding}) is not smaller than minimum_transfer_amount \
                     ({}) — calls may land exactly on MTA boundaries more often than intended",
                    party.minimum_transfer_amount
                ));
            }
        }

        Ok((
            CsaTerms {
                document_id: document_id.into(),
                party_a,
                party_b,
                rounding,
                currency: currency.into(),
                normalized_collateral_id: normalized_collateral_id.into(),
                eligible_collateral,
                valuation_agent,
                effective_date,
                source_pages,
            },
            warnings,
        ))
    }
}
