use crate::types::{CurrencyCode, InstrumentClass};
use anyhow::Context;
use std::collections::BTreeMap;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub server_host: String,

    /// Server port
    pub server_port: u16,

    /// Pricing settings
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Currency every bank rate is quoted against
    pub base_currency: CurrencyCode,

    /// Per-class settings, one entry for each instrument class
    pub classes: BTreeMap<InstrumentClass, ClassConfig>,
}

#[derive(Debug, Clone)]
pub struct ClassConfig {
    /// How often the snapshot for this class is rebuilt
    pub refresh_interval: Duration,

    /// Maximum quote age still considered fresh. When unset the window
    /// follows the class refresh interval, including runtime changes.
    pub freshness_window: Option<Duration>,

    /// Initial sources, most trusted first
    pub sources: Vec<String>,

    /// Sources seeded as disabled
    pub disabled_sources: Vec<String>,
}

impl ClassConfig {
    fn with_interval(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            freshness_window: None,
            sources: Vec::new(),
            disabled_sources: Vec::new(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        let classes = InstrumentClass::ALL
            .iter()
            .map(|class| {
                (
                    *class,
                    ClassConfig::with_interval(Duration::from_secs(default_refresh_secs(*class))),
                )
            })
            .collect();

        Self {
            base_currency: CurrencyCode::EGP,
            classes,
        }
    }
}

impl PricingConfig {
    pub fn class(&self, class: InstrumentClass) -> ClassConfig {
        self.classes
            .get(&class)
            .cloned()
            .unwrap_or_else(|| {
                ClassConfig::with_interval(Duration::from_secs(default_refresh_secs(class)))
            })
    }

    /// Explicitly configured freshness windows
    pub fn freshness_windows(&self) -> BTreeMap<InstrumentClass, Duration> {
        InstrumentClass::ALL
            .iter()
            .filter_map(|class| self.class(*class).freshness_window.map(|w| (*class, w)))
            .collect()
    }

    /// Refresh interval per class
    pub fn refresh_intervals(&self) -> BTreeMap<InstrumentClass, Duration> {
        InstrumentClass::ALL
            .iter()
            .map(|class| (*class, self.class(*class).refresh_interval))
            .collect()
    }
}

fn default_refresh_secs(class: InstrumentClass) -> u64 {
    match class {
        InstrumentClass::Gold | InstrumentClass::Currency => 30,
        InstrumentClass::Silver => 120,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_currency = lookup("BASE_CURRENCY")
            .unwrap_or_else(|| "EGP".to_string())
            .parse::<CurrencyCode>()
            .context("BASE_CURRENCY")?;

        let mut classes = BTreeMap::new();
        for class in InstrumentClass::ALL {
            let prefix = class.as_str().to_uppercase();

            let refresh_secs: u64 = match lookup(&format!("{prefix}_REFRESH_SECS")) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("{prefix}_REFRESH_SECS must be an integer"))?,
                None => default_refresh_secs(class),
            };
            anyhow::ensure!(refresh_secs > 0, "{prefix}_REFRESH_SECS must be positive");

            let refresh_interval = Duration::from_secs(refresh_secs);
            let freshness_window = match lookup(&format!("{prefix}_FRESHNESS_SECS")) {
                Some(raw) => Some(Duration::from_secs(
                    raw.parse()
                        .with_context(|| format!("{prefix}_FRESHNESS_SECS must be an integer"))?,
                )),
                None => None,
            };

            classes.insert(
                class,
                ClassConfig {
                    refresh_interval,
                    freshness_window,
                    sources: split_list(lookup(&format!("{prefix}_SOURCES"))),
                    disabled_sources: split_list(lookup(&format!("{prefix}_DISABLED_SOURCES"))),
                },
            );
        }

        Ok(Config {
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: lookup("SERVER_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            pricing: PricingConfig {
                base_currency,
                classes,
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.pricing.base_currency, CurrencyCode::EGP);

        let gold = config.pricing.class(InstrumentClass::Gold);
        assert_eq!(gold.refresh_interval, Duration::from_secs(30));
        assert_eq!(gold.freshness_window, None);
        assert!(config.pricing.freshness_windows().is_empty());

        let silver = config.pricing.class(InstrumentClass::Silver);
        assert_eq!(silver.refresh_interval, Duration::from_secs(120));
        assert!(silver.sources.is_empty());
    }

    #[test]
    fn test_only_explicit_freshness_windows_are_pinned() {
        let config = Config::from_lookup(lookup_from(&[
            ("GOLD_REFRESH_SECS", "10"),
            ("CURRENCY_REFRESH_SECS", "20"),
            ("CURRENCY_FRESHNESS_SECS", "45"),
        ]))
        .unwrap();

        let windows = config.pricing.freshness_windows();
        assert!(!windows.contains_key(&InstrumentClass::Gold));
        assert_eq!(windows[&InstrumentClass::Currency], Duration::from_secs(45));
        assert_eq!(
            config.pricing.refresh_intervals()[&InstrumentClass::Gold],
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_source_lists() {
        let config = Config::from_lookup(lookup_from(&[
            ("GOLD_SOURCES", "egypt-gold, gold-era ,,isagha"),
            ("GOLD_DISABLED_SOURCES", "isagha"),
            ("CURRENCY_SOURCES", "nbe,cib"),
        ]))
        .unwrap();

        let gold = config.pricing.class(InstrumentClass::Gold);
        assert_eq!(gold.sources, vec!["egypt-gold", "gold-era", "isagha"]);
        assert_eq!(gold.disabled_sources, vec!["isagha"]);
        assert_eq!(
            config.pricing.class(InstrumentClass::Currency).sources,
            vec!["nbe", "cib"]
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("SERVER_PORT", "http")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("BASE_CURRENCY", "E£")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("SILVER_REFRESH_SECS", "0")])).is_err());
    }
}
