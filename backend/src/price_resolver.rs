//! Price Resolver
//!
//! Turns the quotes of several sources into one authoritative price per
//! instrument, honouring administrator trust ordering, manual overrides and
//! flat per-class offsets.
//!
//! # Architecture
//! ```text
//! override set?  ── yes ──> price = override              (active: "manual")
//!      │ no
//!      ▼
//! sources by priority ─> skip disabled ─> skip missing/stale ─> first wins
//!      │                                                    (active: source id)
//!      ▼
//! buy + offset, sell + offset
//! ```
//!
//! No qualifying source is not an error: the instrument resolves to the
//! unknown state and every numeric field is `None`.

use crate::{
    conversion::average,
    error::{PriceError, Result},
    types::{
        ActiveSource, BankSelector, CurrencyResolution, InstrumentClass, InstrumentKey,
        PriceQuote, ResolvedPrice, Source, SourceId,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Used for a class with neither a configured window nor a refresh interval
const DEFAULT_FRESHNESS: Duration = Duration::from_secs(90);

/// Without a configured window, a quote stays fresh for this many refresh
/// intervals of its class
pub const FRESHNESS_FACTOR: u32 = 3;

/// Maximum quote age per instrument class. Classes without a configured
/// window follow their current refresh interval.
#[derive(Debug, Clone, Default)]
pub struct FreshnessPolicy {
    windows: BTreeMap<InstrumentClass, Duration>,
}

impl FreshnessPolicy {
    pub fn new(windows: BTreeMap<InstrumentClass, Duration>) -> Self {
        Self { windows }
    }

    pub fn window(&self, class: InstrumentClass, refresh_interval: Option<Duration>) -> Duration {
        self.windows
            .get(&class)
            .copied()
            .or_else(|| refresh_interval.map(|interval| interval * FRESHNESS_FACTOR))
            .unwrap_or(DEFAULT_FRESHNESS)
    }

    /// `now - observed_at <= window`
    pub fn is_fresh(
        &self,
        class: InstrumentClass,
        refresh_interval: Option<Duration>,
        observed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        now.signed_duration_since(observed_at) <= self.deadline_offset(class, refresh_interval)
    }

    /// Last instant a quote observed at `observed_at` is still fresh
    pub fn fresh_until(
        &self,
        class: InstrumentClass,
        refresh_interval: Option<Duration>,
        observed_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        observed_at
            .checked_add_signed(self.deadline_offset(class, refresh_interval))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn deadline_offset(&self, class: InstrumentClass, refresh_interval: Option<Duration>) -> chrono::Duration {
        chrono::Duration::from_std(self.window(class, refresh_interval)).unwrap_or(chrono::Duration::MAX)
    }
}

/// Everything needed to resolve one instrument
#[derive(Debug, Clone, Copy)]
pub struct ResolutionInput<'a> {
    pub instrument: InstrumentKey,
    /// Sources of the instrument's class, sorted by priority
    pub sources: &'a [Source],
    /// Latest quote per source for this instrument
    pub quotes: &'a HashMap<SourceId, PriceQuote>,
    pub manual_override: Option<Decimal>,
    pub offset: Decimal,
    /// Current refresh interval of the class, for the default window
    pub refresh_interval: Option<Duration>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PriceResolver {
    freshness: FreshnessPolicy,
}

impl PriceResolver {
    pub fn new(freshness: FreshnessPolicy) -> Self {
        Self { freshness }
    }

    pub fn freshness(&self) -> &FreshnessPolicy {
        &self.freshness
    }

    /// Resolve an instrument, choosing the currency mode for `currency:*`
    /// instruments and the priority walk for everything else.
    pub fn resolve_with(
        &self,
        input: &ResolutionInput<'_>,
        currency_mode: &CurrencyResolution,
    ) -> Result<ResolvedPrice> {
        match (input.instrument.class(), currency_mode) {
            (InstrumentClass::Currency, CurrencyResolution::Selector(selector)) => {
                self.resolve_currency(input, selector)
            }
            _ => self.resolve(input),
        }
    }

    /// Priority resolution
    ///
    /// # Algorithm
    /// 1. A manual override wins outright; offsets are not applied to it
    /// 2. Otherwise the most trusted enabled source with a fresh quote is
    ///    active; equal priorities go to the more recent quote
    /// 3. The class offset is added to both legs
    pub fn resolve(&self, input: &ResolutionInput<'_>) -> Result<ResolvedPrice> {
        if let Some(manual) = self.manual(input) {
            return Ok(manual);
        }

        let Some((source, quote)) = self.active_quote(input) else {
            debug!("No enabled source with a fresh quote for {}", input.instrument);
            return Ok(ResolvedPrice::unknown(input.instrument));
        };

        debug!(
            "{} resolved from {} (priority {})",
            input.instrument, source.id, source.priority
        );
        self.with_offset(
            input,
            quote.buy,
            quote.sell,
            ActiveSource::Source(source.id.clone()),
            quote.observed_at,
        )
    }

    /// Currency resolution over bank quotes
    ///
    /// * `market-average`: mean of each leg across enabled banks with a
    ///   fresh quote
    /// * a bank id: that bank's fresh quote, whatever its enable flag
    pub fn resolve_currency(
        &self,
        input: &ResolutionInput<'_>,
        selector: &BankSelector,
    ) -> Result<ResolvedPrice> {
        if let Some(manual) = self.manual(input) {
            return Ok(manual);
        }

        match selector {
            BankSelector::Bank(bank) => {
                let Some(quote) = input.quotes.get(bank).filter(|q| self.usable(input, q)) else {
                    debug!("No fresh quote from {} for {}", bank, input.instrument);
                    return Ok(ResolvedPrice::unknown(input.instrument));
                };
                self.with_offset(
                    input,
                    quote.buy,
                    quote.sell,
                    ActiveSource::Source(bank.clone()),
                    quote.observed_at,
                )
            }
            BankSelector::MarketAverage => {
                let fresh: Vec<&PriceQuote> = input
                    .sources
                    .iter()
                    .filter(|s| s.enabled)
                    .filter_map(|s| input.quotes.get(&s.id))
                    .filter(|q| self.usable(input, q))
                    .collect();

                let Some(latest) = fresh.iter().map(|q| q.observed_at).max() else {
                    debug!("No enabled bank with a fresh quote for {}", input.instrument);
                    return Ok(ResolvedPrice::unknown(input.instrument));
                };

                let buys: Vec<Decimal> = fresh.iter().map(|q| q.buy).collect();
                let sells: Vec<Decimal> = fresh.iter().map(|q| q.sell).collect();
                let overflow = || PriceError::Overflow(format!("average of {}", input.instrument));
                let buy = average(&buys).ok_or_else(overflow)?;
                let sell = average(&sells).ok_or_else(overflow)?;

                debug!(
                    "{} averaged over {} banks: buy {} sell {}",
                    input.instrument,
                    fresh.len(),
                    buy,
                    sell
                );
                self.with_offset(input, buy, sell, ActiveSource::MarketAverage, latest)
            }
        }
    }

    fn manual(&self, input: &ResolutionInput<'_>) -> Option<ResolvedPrice> {
        input.manual_override.map(|price| {
            debug!("{} pinned by manual override {}", input.instrument, price);
            ResolvedPrice {
                instrument: input.instrument,
                price: Some(price),
                buy: Some(price),
                sell: Some(price),
                active_source: Some(ActiveSource::Manual),
                observed_at: None,
            }
        })
    }

    fn usable(&self, input: &ResolutionInput<'_>, quote: &PriceQuote) -> bool {
        quote.instrument == input.instrument
            && self
                .freshness
                .is_fresh(
                    input.instrument.class(),
                    input.refresh_interval,
                    quote.observed_at,
                    input.now,
                )
    }

    fn active_quote<'a>(&self, input: &ResolutionInput<'a>) -> Option<(&'a Source, &'a PriceQuote)> {
        input
            .sources
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| input.quotes.get(&s.id).map(|q| (s, q)))
            .filter(|(_, q)| self.usable(input, q))
            .min_by(|(a, qa), (b, qb)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| qb.observed_at.cmp(&qa.observed_at))
            })
    }

    fn with_offset(
        &self,
        input: &ResolutionInput<'_>,
        buy: Decimal,
        sell: Decimal,
        active_source: ActiveSource,
        observed_at: DateTime<Utc>,
    ) -> Result<ResolvedPrice> {
        let shift = |leg: Decimal| {
            leg.checked_add(input.offset).ok_or_else(|| {
                PriceError::Overflow(format!("{} + offset {}", input.instrument, input.offset))
            })
        };
        let buy = shift(buy)?;
        let sell = shift(sell)?;

        Ok(ResolvedPrice {
            instrument: input.instrument,
            price: Some(sell),
            buy: Some(buy),
            sell: Some(sell),
            active_source: Some(active_source),
            observed_at: Some(observed_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CurrencyCode, Karat};
    use rust_decimal_macros::dec;

    const K21: InstrumentKey = InstrumentKey::Gold(Karat::K21);
    const USD: InstrumentKey = InstrumentKey::Currency(CurrencyCode::USD);

    fn now() -> DateTime<Utc> {
        "2026-10-18T12:00:00Z".parse().unwrap()
    }

    fn source(id: &str, class: InstrumentClass, priority: u32, enabled: bool) -> Source {
        Source {
            id: SourceId::from(id),
            instrument_class: class,
            name: id.to_string(),
            display_name: id.to_string(),
            enabled,
            priority,
            last_updated: None,
        }
    }

    fn quote(id: &str, instrument: InstrumentKey, buy: Decimal, sell: Decimal, age_secs: i64) -> (SourceId, PriceQuote) {
        (
            SourceId::from(id),
            PriceQuote {
                source_id: SourceId::from(id),
                instrument,
                buy,
                sell,
                observed_at: now() - chrono::Duration::seconds(age_secs),
            },
        )
    }

    fn resolver() -> PriceResolver {
        PriceResolver::new(FreshnessPolicy::new(BTreeMap::from([
            (InstrumentClass::Gold, Duration::from_secs(60)),
            (InstrumentClass::Currency, Duration::from_secs(60)),
        ])))
    }

    fn input<'a>(
        instrument: InstrumentKey,
        sources: &'a [Source],
        quotes: &'a HashMap<SourceId, PriceQuote>,
    ) -> ResolutionInput<'a> {
        ResolutionInput {
            instrument,
            sources,
            quotes,
            manual_override: None,
            offset: Decimal::ZERO,
            refresh_interval: None,
            now: now(),
        }
    }

    fn gold_fixture() -> (Vec<Source>, HashMap<SourceId, PriceQuote>) {
        let sources = vec![
            source("a", InstrumentClass::Gold, 0, true),
            source("b", InstrumentClass::Gold, 1, true),
            source("c", InstrumentClass::Gold, 2, true),
        ];
        let quotes = HashMap::from([
            quote("a", K21, dec!(3000), dec!(3020), 10),
            quote("b", K21, dec!(3005), dec!(3025), 10),
            quote("c", K21, dec!(3010), dec!(3030), 10),
        ]);
        (sources, quotes)
    }

    #[test]
    fn test_highest_priority_source_wins() {
        let (sources, quotes) = gold_fixture();
        let resolved = resolver().resolve(&input(K21, &sources, &quotes)).unwrap();

        assert_eq!(resolved.price, Some(dec!(3020)));
        assert_eq!(resolved.buy, Some(dec!(3000)));
        assert_eq!(resolved.active_source, Some(ActiveSource::Source(SourceId::from("a"))));
    }

    #[test]
    fn test_disabled_top_source_falls_back_to_next() {
        let (mut sources, quotes) = gold_fixture();
        sources[0].enabled = false;

        let resolved = resolver().resolve(&input(K21, &sources, &quotes)).unwrap();
        assert_eq!(resolved.active_source, Some(ActiveSource::Source(SourceId::from("b"))));
        assert_eq!(resolved.sell, Some(dec!(3025)));
    }

    #[test]
    fn test_stale_and_missing_quotes_are_skipped() {
        let (sources, mut quotes) = gold_fixture();
        quotes.insert(SourceId::from("a"), quote("a", K21, dec!(2900), dec!(2920), 61).1);
        quotes.remove(&SourceId::from("b"));

        let resolved = resolver().resolve(&input(K21, &sources, &quotes)).unwrap();
        assert_eq!(resolved.active_source, Some(ActiveSource::Source(SourceId::from("c"))));
    }

    #[test]
    fn test_quote_exactly_at_window_is_fresh() {
        let sources = vec![source("a", InstrumentClass::Gold, 0, true)];
        let quotes = HashMap::from([quote("a", K21, dec!(1), dec!(2), 60)]);

        assert!(resolver().resolve(&input(K21, &sources, &quotes)).unwrap().is_known());
    }

    #[test]
    fn test_default_window_follows_refresh_interval() {
        let policy = FreshnessPolicy::new(BTreeMap::from([(InstrumentClass::Gold, Duration::from_secs(60))]));

        assert_eq!(policy.window(InstrumentClass::Gold, Some(Duration::from_secs(300))), Duration::from_secs(60));
        assert_eq!(policy.window(InstrumentClass::Silver, Some(Duration::from_secs(300))), Duration::from_secs(900));
        assert_eq!(policy.window(InstrumentClass::Silver, None), DEFAULT_FRESHNESS);

        let silver = InstrumentKey::Silver(crate::types::SilverPurity::P925);
        let sources = vec![source("a", InstrumentClass::Silver, 0, true)];
        let quotes = HashMap::from([quote("a", silver, dec!(40), dec!(42), 120)]);
        let resolver = PriceResolver::new(policy);

        let mut slow = input(silver, &sources, &quotes);
        assert!(!resolver.resolve(&slow).unwrap().is_known());
        slow.refresh_interval = Some(Duration::from_secs(300));
        assert!(resolver.resolve(&slow).unwrap().is_known());
    }

    #[test]
    fn test_no_qualifying_source_is_unknown_not_error() {
        let (mut sources, quotes) = gold_fixture();
        for s in &mut sources {
            s.enabled = false;
        }

        let resolved = resolver().resolve(&input(K21, &sources, &quotes)).unwrap();
        assert_eq!(resolved, ResolvedPrice::unknown(K21));
    }

    #[test]
    fn test_manual_override_beats_sources_and_ignores_offset() {
        let (sources, quotes) = gold_fixture();
        let mut pinned = input(K21, &sources, &quotes);
        pinned.manual_override = Some(dec!(3333));
        pinned.offset = dec!(50);

        let resolved = resolver().resolve(&pinned).unwrap();
        assert_eq!(resolved.price, Some(dec!(3333)));
        assert_eq!(resolved.active_source, Some(ActiveSource::Manual));

        // stale and disabled data do not matter either
        let no_sources: Vec<Source> = Vec::new();
        let empty = HashMap::new();
        let mut bare = input(K21, &no_sources, &empty);
        bare.manual_override = Some(dec!(3333));
        assert_eq!(resolver().resolve(&bare).unwrap().price, Some(dec!(3333)));

        pinned.manual_override = None;
        let reverted = resolver().resolve(&pinned).unwrap();
        assert_eq!(reverted.active_source, Some(ActiveSource::Source(SourceId::from("a"))));
    }

    #[test]
    fn test_offset_applies_to_both_legs() {
        let (sources, quotes) = gold_fixture();
        let mut shifted = input(K21, &sources, &quotes);
        shifted.offset = dec!(-25.5);

        let resolved = resolver().resolve(&shifted).unwrap();
        assert_eq!(resolved.buy, Some(dec!(2974.5)));
        assert_eq!(resolved.sell, Some(dec!(2994.5)));
        assert_eq!(resolved.price, resolved.sell);
    }

    #[test]
    fn test_equal_priority_prefers_more_recent_quote() {
        let sources = vec![
            source("old", InstrumentClass::Gold, 0, true),
            source("new", InstrumentClass::Gold, 0, true),
            source("other", InstrumentClass::Gold, 1, true),
        ];
        let quotes = HashMap::from([
            quote("old", K21, dec!(3000), dec!(3020), 40),
            quote("new", K21, dec!(3001), dec!(3021), 5),
            quote("other", K21, dec!(3002), dec!(3022), 1),
        ]);

        let resolved = resolver().resolve(&input(K21, &sources, &quotes)).unwrap();
        assert_eq!(resolved.active_source, Some(ActiveSource::Source(SourceId::from("new"))));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let (sources, quotes) = gold_fixture();
        let first = resolver().resolve(&input(K21, &sources, &quotes)).unwrap();
        let second = resolver().resolve(&input(K21, &sources, &quotes)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_offset_overflow_is_an_error() {
        let (sources, mut quotes) = gold_fixture();
        quotes.insert(SourceId::from("a"), quote("a", K21, Decimal::MAX, Decimal::MAX, 1).1);
        let mut shifted = input(K21, &sources, &quotes);
        shifted.offset = dec!(1);

        assert!(matches!(resolver().resolve(&shifted), Err(PriceError::Overflow(_))));
    }

    fn bank_fixture() -> (Vec<Source>, HashMap<SourceId, PriceQuote>) {
        let sources = vec![
            source("nbe", InstrumentClass::Currency, 0, true),
            source("cib", InstrumentClass::Currency, 1, true),
            source("alex", InstrumentClass::Currency, 2, false),
        ];
        let quotes = HashMap::from([
            quote("nbe", USD, dec!(49.50), dec!(50.00), 5),
            quote("cib", USD, dec!(50.50), dec!(51.00), 20),
            quote("alex", USD, dec!(48.00), dec!(49.00), 5),
        ]);
        (sources, quotes)
    }

    #[test]
    fn test_market_average_over_enabled_banks() {
        let (sources, quotes) = bank_fixture();
        let resolved = resolver()
            .resolve_currency(&input(USD, &sources, &quotes), &BankSelector::MarketAverage)
            .unwrap();

        assert_eq!(resolved.buy, Some(dec!(50.00)));
        assert_eq!(resolved.sell, Some(dec!(50.50)));
        assert_eq!(resolved.active_source, Some(ActiveSource::MarketAverage));
        assert_eq!(resolved.observed_at, Some(now() - chrono::Duration::seconds(5)));
    }

    #[test]
    fn test_specific_bank_resolution() {
        let (sources, quotes) = bank_fixture();
        let selector = BankSelector::Bank(SourceId::from("alex"));
        let resolved = resolver()
            .resolve_currency(&input(USD, &sources, &quotes), &selector)
            .unwrap();
        assert_eq!(resolved.sell, Some(dec!(49.00)));

        let missing = BankSelector::Bank(SourceId::from("hsbc"));
        let resolved = resolver()
            .resolve_currency(&input(USD, &sources, &quotes), &missing)
            .unwrap();
        assert!(!resolved.is_known());
    }

    #[test]
    fn test_currency_mode_dispatch() {
        let (sources, quotes) = bank_fixture();
        let by_priority = resolver()
            .resolve_with(&input(USD, &sources, &quotes), &CurrencyResolution::Priority)
            .unwrap();
        assert_eq!(by_priority.active_source, Some(ActiveSource::Source(SourceId::from("nbe"))));

        // gold never goes through the bank path
        let (gold_sources, gold_quotes) = gold_fixture();
        let gold = resolver()
            .resolve_with(&input(K21, &gold_sources, &gold_quotes), &CurrencyResolution::default())
            .unwrap();
        assert_eq!(gold.active_source, Some(ActiveSource::Source(SourceId::from("a"))));
    }
}
