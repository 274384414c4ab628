//! Administrator pricing settings: manual overrides, per-class offsets,
//! refresh intervals and the currency resolution mode.

use crate::{
    error::{PriceError, Result, ensure_non_negative},
    types::{CurrencyResolution, InstrumentClass, InstrumentKey},
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PricingSettings {
    pub version: u64,
    pub overrides: BTreeMap<InstrumentKey, Decimal>,
    pub offsets: BTreeMap<InstrumentClass, Decimal>,
    pub refresh_intervals: BTreeMap<InstrumentClass, Duration>,
    pub currency_resolution: CurrencyResolution,
}

impl PricingSettings {
    pub fn override_for(&self, instrument: &InstrumentKey) -> Option<Decimal> {
        self.overrides.get(instrument).copied()
    }

    /// Flat offset of a class, zero when unset
    pub fn offset_for(&self, class: InstrumentClass) -> Decimal {
        self.offsets.get(&class).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn refresh_interval(&self, class: InstrumentClass) -> Option<Duration> {
        self.refresh_intervals.get(&class).copied()
    }
}

#[derive(Debug, Default)]
pub struct SettingsStore {
    state: RwLock<Arc<PricingSettings>>,
}

impl SettingsStore {
    pub fn new(refresh_intervals: BTreeMap<InstrumentClass, Duration>) -> Self {
        Self {
            state: RwLock::new(Arc::new(PricingSettings {
                refresh_intervals,
                ..PricingSettings::default()
            })),
        }
    }

    pub fn current(&self) -> Arc<PricingSettings> {
        Arc::clone(&self.state.read())
    }

    /// Set (`Some`) or clear (`None`) the manual price of an instrument
    pub fn set_override(&self, instrument: InstrumentKey, price: Option<Decimal>) -> Result<()> {
        if let Some(price) = price {
            ensure_non_negative("override price", price)?;
        }

        self.update(|next| {
            match price {
                Some(price) => {
                    next.overrides.insert(instrument, price);
                    info!("Manual override for {} set to {}", instrument, price);
                }
                None => {
                    next.overrides.remove(&instrument);
                    info!("Manual override for {} cleared", instrument);
                }
            }
            Ok(())
        })
    }

    pub fn set_offset(&self, class: InstrumentClass, amount: Decimal) -> Result<()> {
        self.update(|next| {
            if amount.is_zero() {
                next.offsets.remove(&class);
            } else {
                next.offsets.insert(class, amount);
            }
            info!("Global offset for {} set to {}", class, amount);
            Ok(())
        })
    }

    pub fn set_refresh_interval(&self, class: InstrumentClass, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(PriceError::InvalidValue(format!(
                "refresh interval for {class} must be positive"
            )));
        }

        self.update(|next| {
            next.refresh_intervals.insert(class, interval);
            info!("Refresh interval for {} set to {:?}", class, interval);
            Ok(())
        })
    }

    pub fn set_currency_resolution(&self, mode: CurrencyResolution) -> Result<()> {
        self.update(|next| {
            info!("Currency resolution set to {}", String::from(mode.clone()));
            next.currency_resolution = mode;
            Ok(())
        })
    }

    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut PricingSettings) -> Result<()>,
    {
        let mut guard = self.state.write();
        let mut next = PricingSettings::clone(&guard);
        change(&mut next)?;
        next.version = guard.version + 1;
        *guard = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BankSelector, Karat, SourceId};
    use rust_decimal_macros::dec;

    const K21: InstrumentKey = InstrumentKey::Gold(Karat::K21);

    #[test]
    fn test_override_set_and_clear() {
        let store = SettingsStore::default();
        store.set_override(K21, Some(dec!(3100))).unwrap();
        assert_eq!(store.current().override_for(&K21), Some(dec!(3100)));

        store.set_override(K21, None).unwrap();
        assert_eq!(store.current().override_for(&K21), None);
        assert_eq!(store.current().version, 2);
    }

    #[test]
    fn test_negative_override_is_rejected() {
        let store = SettingsStore::default();
        assert!(store.set_override(K21, Some(dec!(-1))).unwrap_err().is_validation());
        assert_eq!(store.current().version, 0);
    }

    #[test]
    fn test_offsets_may_be_negative() {
        let store = SettingsStore::default();
        store.set_offset(InstrumentClass::Gold, dec!(-15)).unwrap();

        let settings = store.current();
        assert_eq!(settings.offset_for(InstrumentClass::Gold), dec!(-15));
        assert_eq!(settings.offset_for(InstrumentClass::Silver), Decimal::ZERO);
    }

    #[test]
    fn test_refresh_interval_must_be_positive() {
        let store = SettingsStore::new(BTreeMap::from([(
            InstrumentClass::Gold,
            Duration::from_secs(30),
        )]));
        assert!(store.set_refresh_interval(InstrumentClass::Gold, Duration::ZERO).is_err());

        store
            .set_refresh_interval(InstrumentClass::Gold, Duration::from_secs(5))
            .unwrap();
        assert_eq!(
            store.current().refresh_interval(InstrumentClass::Gold),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_currency_resolution_mode() {
        let store = SettingsStore::default();
        let mode = CurrencyResolution::Selector(BankSelector::Bank(SourceId::from("nbe")));
        store.set_currency_resolution(mode.clone()).unwrap();
        assert_eq!(store.current().currency_resolution, mode);
    }
}
