//! Valuation Calculator
//!
//! ```text
//! base        = weight * price_per_unit
//! workmanship = fixed ? weight * rate : base * rate / 100
//! tax         = fixed ? weight * rate : (base + workmanship) * rate / 100
//! total       = base + workmanship + tax
//! ```
//! Percentage tax is levied on base plus workmanship, never on base alone.

use crate::error::{PriceError, Result, ensure_non_negative};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeMode {
    /// `rate` per unit of weight
    Fixed,
    /// `rate` percent of the running amount
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRule {
    pub mode: FeeMode,
    pub rate: Decimal,
}

impl FeeRule {
    pub fn fixed(rate: Decimal) -> Self {
        Self { mode: FeeMode::Fixed, rate }
    }

    pub fn percent(rate: Decimal) -> Self {
        Self { mode: FeeMode::Percent, rate }
    }

    pub fn none() -> Self {
        Self::fixed(Decimal::ZERO)
    }

    fn apply(&self, weight: Decimal, amount: Decimal) -> Option<Decimal> {
        match self.mode {
            FeeMode::Fixed => weight.checked_mul(self.rate),
            FeeMode::Percent => amount
                .checked_mul(self.rate)?
                .checked_div(Decimal::ONE_HUNDRED),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub base: Decimal,
    pub workmanship_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
}

pub fn valuate(
    weight: Decimal,
    price_per_unit: Decimal,
    workmanship: FeeRule,
    tax: FeeRule,
) -> Result<Valuation> {
    ensure_non_negative("weight", weight)?;
    ensure_non_negative("price per unit", price_per_unit)?;
    ensure_non_negative("workmanship rate", workmanship.rate)?;
    ensure_non_negative("tax rate", tax.rate)?;

    let overflow = || PriceError::Overflow(format!("valuation of {weight} at {price_per_unit}"));

    let base = weight.checked_mul(price_per_unit).ok_or_else(overflow)?;
    let workmanship_total = workmanship.apply(weight, base).ok_or_else(overflow)?;
    let taxable = base.checked_add(workmanship_total).ok_or_else(overflow)?;
    let tax_total = tax.apply(weight, taxable).ok_or_else(overflow)?;
    let total = taxable.checked_add(tax_total).ok_or_else(overflow)?;

    Ok(Valuation {
        base,
        workmanship_total,
        tax_total,
        total,
    })
}
