//! Snapshot Aggregator
//!
//! Owns the refresh schedule. On each cycle it polls the quote collectors of
//! the due classes, re-runs the Price Resolver over every tracked instrument
//! of those classes and publishes a complete new [`Snapshot`].
//!
//! # Architecture
//! ```text
//! Registry ─┐
//! Quotes  ──┼─> [Price Resolver] ─> [Snapshot Aggregator] ─> Arc<Snapshot>
//! Settings ─┘                              │                    │
//!                                  refresh task (per-class     readers, calculators
//!                                  deadlines, cancellable)
//! ```
//!
//! Only the aggregator replaces the current snapshot, and it does so by
//! swapping an `Arc`: readers see the previous complete snapshot or the next
//! one, never a mix.

use crate::{
    conversion::RateBook,
    error::{PriceError, Result},
    ingest::{Ingestor, QuoteCollector},
    price_resolver::{PriceResolver, ResolutionInput},
    quote_store::QuoteStore,
    settings::{PricingSettings, SettingsStore},
    source_registry::{RegistrySnapshot, SourceRegistry},
    types::{CurrencyCode, InstrumentClass, InstrumentKey, ResolvedPrice, Snapshot},
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Used for a class with no configured refresh interval
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct SnapshotAggregator {
    registry: Arc<SourceRegistry>,
    quotes: Arc<QuoteStore>,
    settings: Arc<SettingsStore>,
    resolver: PriceResolver,
    ingestor: Ingestor,
    collectors: Vec<Arc<dyn QuoteCollector>>,
    base_currency: CurrencyCode,

    /// Latest published snapshot
    current: RwLock<Option<Arc<Snapshot>>>,

    /// Serializes publishers (refresh task and forced refreshes)
    publish: Mutex<()>,
}

impl SnapshotAggregator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        quotes: Arc<QuoteStore>,
        settings: Arc<SettingsStore>,
        resolver: PriceResolver,
        base_currency: CurrencyCode,
    ) -> Self {
        let ingestor = Ingestor::new(Arc::clone(&registry), Arc::clone(&quotes), base_currency);
        Self {
            registry,
            quotes,
            settings,
            resolver,
            ingestor,
            collectors: Vec::new(),
            base_currency,
            current: RwLock::new(None),
            publish: Mutex::new(()),
        }
    }

    /// Scrapers polled before each refresh of their class
    pub fn with_collectors(mut self, collectors: Vec<Arc<dyn QuoteCollector>>) -> Self {
        self.collectors = collectors;
        self
    }

    pub fn base_currency(&self) -> CurrencyCode {
        self.base_currency
    }

    /// `None` until the first refresh has completed
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Instruments tracked for a class; the base currency is the identity
    /// and is never resolved.
    pub fn tracked(&self, class: InstrumentClass) -> Vec<InstrumentKey> {
        InstrumentKey::all(class)
            .into_iter()
            .filter(|k| *k != InstrumentKey::Currency(self.base_currency))
            .collect()
    }

    /// Resolve one instrument against live state
    pub fn resolve(&self, instrument: InstrumentKey) -> Result<ResolvedPrice> {
        self.resolve_at(instrument, Utc::now())
    }

    pub fn resolve_at(&self, instrument: InstrumentKey, now: DateTime<Utc>) -> Result<ResolvedPrice> {
        if instrument == InstrumentKey::Currency(self.base_currency) {
            return Err(PriceError::InvalidInstrument(format!(
                "{instrument} is the base currency"
            )));
        }
        let registry = self.registry.snapshot();
        let settings = self.settings.current();
        self.resolve_from(&registry, &settings, instrument, now)
    }

    fn resolve_from(
        &self,
        registry: &RegistrySnapshot,
        settings: &PricingSettings,
        instrument: InstrumentKey,
        now: DateTime<Utc>,
    ) -> Result<ResolvedPrice> {
        let class = instrument.class();
        let quotes = self.quotes.quotes_for(instrument);
        let input = ResolutionInput {
            instrument,
            sources: registry.sources(class),
            quotes: &quotes,
            manual_override: settings.override_for(&instrument),
            offset: settings.offset_for(class),
            refresh_interval: settings.refresh_interval(class),
            now,
        };
        self.resolver.resolve_with(&input, &settings.currency_resolution)
    }

    /// Rebuild every class now
    pub async fn force_refresh(&self) -> Arc<Snapshot> {
        info!("Forced snapshot refresh");
        self.refresh_classes(&InstrumentClass::ALL).await
    }

    /// Poll collectors, rebuild the given classes and publish. Entries of
    /// other classes are carried over from the previous snapshot.
    pub async fn refresh_classes(&self, classes: &[InstrumentClass]) -> Arc<Snapshot> {
        let _writer = self.publish.lock().await;

        if !self.collectors.is_empty() {
            for class in classes {
                let stored = self.ingestor.collect_from(&self.collectors, *class).await;
                debug!("Collected {} new {} quotes", stored, class);
            }
        }

        let previous = self.current_snapshot();
        let snapshot = Arc::new(self.build(previous.as_deref(), classes, Utc::now()));
        *self.current.write() = Some(Arc::clone(&snapshot));

        info!(
            "Published snapshot v{} ({} instruments, refreshed {:?})",
            snapshot.version,
            snapshot.instruments.len(),
            classes
        );
        snapshot
    }

    fn build(
        &self,
        previous: Option<&Snapshot>,
        classes: &[InstrumentClass],
        now: DateTime<Utc>,
    ) -> Snapshot {
        let registry = self.registry.snapshot();
        let settings = self.settings.current();

        let mut instruments = previous
            .map(|p| p.instruments.clone())
            .unwrap_or_default();

        for class in classes {
            for instrument in self.tracked(*class) {
                let resolved = match self.resolve_from(&registry, &settings, instrument, now) {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        warn!("Resolution failed for {}: {}", instrument, e);
                        ResolvedPrice::unknown(instrument)
                    }
                };
                instruments.insert(instrument, resolved);
            }
        }

        for class in InstrumentClass::ALL {
            for instrument in self.tracked(class) {
                instruments
                    .entry(instrument)
                    .or_insert_with(|| ResolvedPrice::unknown(instrument));
            }
        }

        let rate_book = match previous {
            Some(p) if !classes.contains(&InstrumentClass::Currency) => p.rate_book.clone(),
            _ => self.rate_book(&registry, &settings, now),
        };

        Snapshot {
            version: previous.map_or(1, |p| p.version + 1),
            timestamp: now,
            instruments,
            rate_book,
        }
    }

    /// Fresh bank rates, each with its expiry, plus the banks allowed into
    /// market averages
    fn rate_book(
        &self,
        registry: &RegistrySnapshot,
        settings: &PricingSettings,
        now: DateTime<Utc>,
    ) -> RateBook {
        let mut book = RateBook::new(self.base_currency);
        for bank in registry.sources(InstrumentClass::Currency) {
            if bank.enabled {
                book.enable_bank(bank.id.clone());
            }
        }

        let freshness = self.resolver.freshness();
        let interval = settings.refresh_interval(InstrumentClass::Currency);
        for instrument in self.tracked(InstrumentClass::Currency) {
            let InstrumentKey::Currency(currency) = instrument else {
                continue;
            };
            for rate in self.quotes.bank_rates(currency, self.base_currency) {
                if freshness.is_fresh(InstrumentClass::Currency, interval, rate.observed_at, now) {
                    let fresh_until =
                        freshness.fresh_until(InstrumentClass::Currency, interval, rate.observed_at);
                    book.insert(rate, fresh_until);
                }
            }
        }
        book
    }

    fn interval(&self, settings: &PricingSettings, class: InstrumentClass) -> Duration {
        settings
            .refresh_interval(class)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }

    /// Spawn the background refresh task. Every class is due immediately,
    /// then again after its own interval; intervals are re-read from the
    /// settings after each cycle.
    pub fn start(self: &Arc<Self>) -> RefreshHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let aggregator = Arc::clone(self);

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let mut next_due: BTreeMap<InstrumentClass, Instant> =
                InstrumentClass::ALL.iter().map(|c| (*c, start)).collect();

            info!("Snapshot refresh task started");
            loop {
                let earliest = next_due.values().min().copied().unwrap_or(start);

                tokio::select! {
                    _ = tokio::time::sleep_until(earliest) => {
                        let now = Instant::now();
                        let due: Vec<InstrumentClass> = next_due
                            .iter()
                            .filter(|(_, at)| **at <= now)
                            .map(|(class, _)| *class)
                            .collect();

                        aggregator.refresh_classes(&due).await;

                        let settings = aggregator.settings.current();
                        let finished = Instant::now();
                        for class in due {
                            next_due.insert(class, finished + aggregator.interval(&settings, class));
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Snapshot refresh task stopping");
                        break;
                    }
                }
            }
        });

        RefreshHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to the background refresh task. Dropping it also ends the task
/// after any in-flight cycle.
pub struct RefreshHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the task and wait for it to finish its current cycle
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Snapshot refresh task ended abnormally: {}", e);
        }
    }
}
