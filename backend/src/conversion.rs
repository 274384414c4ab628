//! Conversion Calculator
//!
//! Converts an amount between two currencies by routing through the base
//! currency every bank quotes against.
//!
//! # Direction
//! Direction is expressed from the customer's side of the counter:
//! ```text
//! customer buys USD   -> bank sells USD -> bank SELL leg
//! customer sells USD  -> bank buys USD  -> bank BUY leg
//! ```
//!
//! # Algorithm
//! ```text
//! base_amount = from == base ? amount : amount * rate(from)
//! result      = to == base   ? base_amount : base_amount / rate(to)
//! ```
//! A missing, expired or zero rate yields `0`. Rate gaps are expected while
//! banks are between updates, so callers treat `0` for a non-zero amount as
//! "unavailable".
//!
//! Each rate in a [`RateBook`] carries the instant it stops being fresh, so a
//! book carried across snapshots of other classes still ages out.

use crate::{
    error::{PriceError, Result, ensure_non_negative},
    types::{BankRate, BankSelector, CurrencyCode, SourceId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Transaction side from the customer's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// The bank leg a customer transacting in this direction pays or receives
    pub fn bank_leg(&self, rate: &BankRate) -> Decimal {
        match self {
            Direction::Buy => rate.sell,
            Direction::Sell => rate.buy,
        }
    }
}

/// A bank rate and the last instant it may be used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRate {
    #[serde(flatten)]
    pub rate: BankRate,
    pub fresh_until: DateTime<Utc>,
}

/// Fresh bank rates against one base currency, captured with a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBook {
    pub base: CurrencyCode,
    pub rates: BTreeMap<CurrencyCode, Vec<BookRate>>,
    /// Banks allowed into market averages
    pub enabled_banks: BTreeSet<SourceId>,
}

impl RateBook {
    pub fn new(base: CurrencyCode) -> Self {
        Self {
            base,
            rates: BTreeMap::new(),
            enabled_banks: BTreeSet::new(),
        }
    }

    /// Add a rate usable until `fresh_until`; rates quoted against another
    /// base are ignored.
    pub fn insert(&mut self, rate: BankRate, fresh_until: DateTime<Utc>) {
        if rate.currency_pair.base != self.base {
            return;
        }
        self.rates
            .entry(rate.currency_pair.foreign)
            .or_default()
            .push(BookRate { rate, fresh_until });
    }

    pub fn enable_bank(&mut self, bank: SourceId) {
        self.enabled_banks.insert(bank);
    }

    /// Units of base currency per unit of `currency` for a direction at
    /// `now`. `None` when no usable rate exists.
    pub fn rate(
        &self,
        currency: CurrencyCode,
        direction: Direction,
        selector: &BankSelector,
        now: DateTime<Utc>,
    ) -> Option<Decimal> {
        if currency == self.base {
            return Some(Decimal::ONE);
        }

        let mut live = self
            .rates
            .get(&currency)?
            .iter()
            .filter(|r| r.fresh_until >= now)
            .map(|r| &r.rate);
        match selector {
            BankSelector::Bank(bank) => live
                .find(|r| &r.bank_name == bank)
                .map(|r| direction.bank_leg(r)),
            BankSelector::MarketAverage => {
                let legs: Vec<Decimal> = live
                    .filter(|r| self.enabled_banks.contains(&r.bank_name))
                    .map(|r| direction.bank_leg(r))
                    .collect();
                average(&legs)
            }
        }
    }
}

pub(crate) fn average(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sum = Decimal::ZERO;
    for value in values {
        sum = sum.checked_add(*value)?;
    }
    sum.checked_div(Decimal::from(values.len()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub amount: Decimal,
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub direction: Direction,
    pub bank: BankSelector,
}

/// Convert `request.amount` from one currency to another through the
/// book's base currency, using the rates still fresh at `now`.
pub fn convert(book: &RateBook, request: &ConversionRequest, now: DateTime<Utc>) -> Result<Decimal> {
    let amount = ensure_non_negative("amount", request.amount)?;

    let base_amount = if request.from == book.base {
        amount
    } else {
        match usable_rate(book, request.from, request, now) {
            Some(rate) => amount.checked_mul(rate).ok_or_else(|| {
                PriceError::Overflow(format!("{} {} in {}", amount, request.from, book.base))
            })?,
            None => return Ok(Decimal::ZERO),
        }
    };

    if request.to == book.base {
        return Ok(base_amount);
    }

    match usable_rate(book, request.to, request, now) {
        Some(rate) => base_amount.checked_div(rate).ok_or_else(|| {
            PriceError::Overflow(format!("{} {} in {}", base_amount, book.base, request.to))
        }),
        None => Ok(Decimal::ZERO),
    }
}

fn usable_rate(
    book: &RateBook,
    currency: CurrencyCode,
    request: &ConversionRequest,
    now: DateTime<Utc>,
) -> Option<Decimal> {
    book.rate(currency, request.direction, &request.bank, now)
        .filter(|rate| !rate.is_zero())
}
