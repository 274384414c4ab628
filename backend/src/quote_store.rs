//! Quote Store
//!
//! Keeps the most recent quote per (source, instrument). Bank rates are the
//! currency specialisation of a quote: a bank is a `currency` source and its
//! rate for `USD/EGP` is stored as the quote of `currency:USD`.

use crate::types::{BankRate, CurrencyCode, CurrencyPair, InstrumentKey, PriceQuote, SourceId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct QuoteStore {
    quotes: RwLock<HashMap<(SourceId, InstrumentKey), PriceQuote>>,
}

impl QuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a quote unless a newer one for the same pair is already held.
    /// Returns whether the quote was stored.
    pub fn submit(&self, quote: PriceQuote) -> bool {
        let key = (quote.source_id.clone(), quote.instrument);
        let mut quotes = self.quotes.write();

        if let Some(existing) = quotes.get(&key) {
            if existing.observed_at > quote.observed_at {
                debug!(
                    "Ignoring out-of-order quote for {} from {} ({} < {})",
                    quote.instrument, quote.source_id, quote.observed_at, existing.observed_at
                );
                return false;
            }
        }

        quotes.insert(key, quote);
        true
    }

    pub fn latest(&self, source_id: &SourceId, instrument: InstrumentKey) -> Option<PriceQuote> {
        self.quotes
            .read()
            .get(&(source_id.clone(), instrument))
            .cloned()
    }

    /// Latest quote of every source for one instrument
    pub fn quotes_for(&self, instrument: InstrumentKey) -> HashMap<SourceId, PriceQuote> {
        self.quotes
            .read()
            .values()
            .filter(|q| q.instrument == instrument)
            .map(|q| (q.source_id.clone(), q.clone()))
            .collect()
    }

    /// Latest rate of every bank for `currency` against `base`
    pub fn bank_rates(&self, currency: CurrencyCode, base: CurrencyCode) -> Vec<BankRate> {
        let pair = CurrencyPair {
            foreign: currency,
            base,
        };
        let mut rates: Vec<BankRate> = self
            .quotes_for(InstrumentKey::Currency(currency))
            .into_values()
            .map(|q| BankRate {
                bank_name: q.source_id,
                currency_pair: pair,
                buy: q.buy,
                sell: q.sell,
                observed_at: q.observed_at,
            })
            .collect();
        rates.sort_by(|a, b| a.bank_name.cmp(&b.bank_name));
        rates
    }

    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Karat;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    const K21: InstrumentKey = InstrumentKey::Gold(Karat::K21);

    fn quote(source: &str, buy: rust_decimal::Decimal, age_secs: i64) -> PriceQuote {
        PriceQuote {
            source_id: SourceId::from(source),
            instrument: K21,
            buy,
            sell: buy + dec!(20),
            observed_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_newer_quote_supersedes() {
        let store = QuoteStore::new();
        assert!(store.submit(quote("a", dec!(3000), 60)));
        assert!(store.submit(quote("a", dec!(3010), 10)));

        let latest = store.latest(&SourceId::from("a"), K21).unwrap();
        assert_eq!(latest.buy, dec!(3010));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_late_older_quote_is_ignored() {
        let store = QuoteStore::new();
        store.submit(quote("a", dec!(3010), 10));

        assert!(!store.submit(quote("a", dec!(2990), 120)));
        assert_eq!(store.latest(&SourceId::from("a"), K21).unwrap().buy, dec!(3010));
    }

    #[test]
    fn test_quotes_for_instrument() {
        let store = QuoteStore::new();
        store.submit(quote("a", dec!(3000), 5));
        store.submit(quote("b", dec!(3005), 5));
        store.submit(PriceQuote {
            instrument: InstrumentKey::Gold(Karat::K24),
            ..quote("a", dec!(3400), 5)
        });

        let quotes = store.quotes_for(K21);
        assert_eq!(quotes.len(), 2);
        assert!(quotes.contains_key(&SourceId::from("b")));
        assert!(store.latest(&SourceId::from("c"), K21).is_none());
    }

    #[test]
    fn test_bank_rates_view() {
        let store = QuoteStore::new();
        for (bank, buy, sell) in [("nbe", dec!(49.50), dec!(50.00)), ("cib", dec!(49.60), dec!(50.10))] {
            store.submit(PriceQuote {
                source_id: SourceId::from(bank),
                instrument: InstrumentKey::Currency(CurrencyCode::USD),
                buy,
                sell,
                observed_at: Utc::now(),
            });
        }

        let rates = store.bank_rates(CurrencyCode::USD, CurrencyCode::EGP);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].bank_name, SourceId::from("cib"));
        assert_eq!(rates[1].currency_pair.to_string(), "USD/EGP");
        assert_eq!(rates[1].sell, dec!(50.00));
        assert!(store.bank_rates(CurrencyCode::EUR, CurrencyCode::EGP).is_empty());
    }
}
