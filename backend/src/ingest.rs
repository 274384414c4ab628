//! Quote ingestion
//!
//! Entry points for the scraping collaborators. Collectors either push
//! observations through the HTTP adapter or are polled by the snapshot
//! aggregator through [`QuoteCollector`].

use crate::{
    error::{PriceError, Result, ensure_non_negative},
    quote_store::QuoteStore,
    source_registry::SourceRegistry,
    types::{CurrencyCode, CurrencyPair, InstrumentClass, InstrumentKey, PriceQuote, SourceId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How far ahead of the local clock an `observed_at` may be
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Upper bound on one collector poll
const COLLECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSubmission {
    pub source_id: SourceId,
    pub instrument: InstrumentKey,
    pub buy: Decimal,
    pub sell: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankRateSubmission {
    pub bank_name: SourceId,
    pub currency_pair: CurrencyPair,
    pub buy: Decimal,
    pub sell: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// One fetched observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Quote(QuoteSubmission),
    BankRate(BankRateSubmission),
}

/// A scraping job the aggregator polls before each refresh of a class.
/// Fetching happens entirely inside the implementation.
#[async_trait]
pub trait QuoteCollector: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self, class: InstrumentClass) -> anyhow::Result<Vec<Observation>>;
}

#[derive(Debug, Clone)]
pub struct Ingestor {
    registry: Arc<SourceRegistry>,
    quotes: Arc<QuoteStore>,
    base_currency: CurrencyCode,
}

impl Ingestor {
    pub fn new(
        registry: Arc<SourceRegistry>,
        quotes: Arc<QuoteStore>,
        base_currency: CurrencyCode,
    ) -> Self {
        Self {
            registry,
            quotes,
            base_currency,
        }
    }

    /// Record a quote from a registered source. Returns `false` when a newer
    /// quote for the same source and instrument is already held.
    ///
    /// Quotes timestamped more than a minute ahead of the local clock are
    /// rejected; held as latest they would never go stale or be replaced.
    pub fn submit_quote(&self, submission: QuoteSubmission) -> Result<bool> {
        ensure_non_negative("buy", submission.buy)?;
        ensure_non_negative("sell", submission.sell)?;

        let latest_allowed = Utc::now() + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS);
        if submission.observed_at > latest_allowed {
            return Err(PriceError::InvalidValue(format!(
                "observed_at {} is in the future",
                submission.observed_at
            )));
        }

        let source = self
            .registry
            .get(&submission.source_id)
            .ok_or_else(|| PriceError::UnknownSource(submission.source_id.clone()))?;
        let class = submission.instrument.class();
        if source.instrument_class != class {
            return Err(PriceError::ClassMismatch {
                source_id: source.id,
                expected: class,
                actual: source.instrument_class,
            });
        }
        if submission.instrument == InstrumentKey::Currency(self.base_currency) {
            return Err(PriceError::InvalidInstrument(format!(
                "{} is the base currency",
                submission.instrument
            )));
        }

        let observed_at = submission.observed_at;
        let stored = self.quotes.submit(PriceQuote {
            source_id: submission.source_id.clone(),
            instrument: submission.instrument,
            buy: submission.buy,
            sell: submission.sell,
            observed_at,
        });
        if stored {
            self.registry.touch(&submission.source_id, observed_at)?;
            debug!(
                "Quote for {} from {}: buy {} sell {}",
                submission.instrument, submission.source_id, submission.buy, submission.sell
            );
        }
        Ok(stored)
    }

    /// Record a bank rate. The pair must be quoted against the base currency
    /// and the bank must be a registered currency source.
    pub fn submit_bank_rate(&self, submission: BankRateSubmission) -> Result<bool> {
        let pair = submission.currency_pair;
        if pair.base != self.base_currency {
            return Err(PriceError::InvalidCurrency(format!(
                "{pair} is not quoted against {}",
                self.base_currency
            )));
        }

        self.submit_quote(QuoteSubmission {
            source_id: submission.bank_name,
            instrument: InstrumentKey::Currency(pair.foreign),
            buy: submission.buy,
            sell: submission.sell,
            observed_at: submission.observed_at,
        })
    }

    pub fn ingest(&self, observation: Observation) -> Result<bool> {
        match observation {
            Observation::Quote(q) => self.submit_quote(q),
            Observation::BankRate(r) => self.submit_bank_rate(r),
        }
    }

    /// Poll every collector for a class. Failures and polls running past
    /// [`COLLECT_TIMEOUT`] are logged and skipped so one broken scraper never
    /// stalls the others.
    pub async fn collect_from(&self, collectors: &[Arc<dyn QuoteCollector>], class: InstrumentClass) -> usize {
        let mut stored = 0;
        for collector in collectors {
            let Ok(collected) = tokio::time::timeout(COLLECT_TIMEOUT, collector.collect(class)).await else {
                warn!(
                    "Collector {} timed out after {:?} for {}",
                    collector.name(),
                    COLLECT_TIMEOUT,
                    class
                );
                continue;
            };
            match collected {
                Ok(observations) => {
                    for observation in observations {
                        match self.ingest(observation) {
                            Ok(true) => stored += 1,
                            Ok(false) => {}
                            Err(e) => warn!("Rejected observation from {}: {}", collector.name(), e),
                        }
                    }
                }
                Err(e) => warn!("Collector {} failed for {}: {}", collector.name(), class, e),
            }
        }
        stored
    }
}
