//! Source Registry
//!
//! Holds, per instrument class, the ordered list of quote sources with their
//! enable flag and trust priority.
//!
//! The registry is a versioned value: every administrator action builds a
//! complete new [`RegistrySnapshot`], validates it and swaps it in. Readers
//! clone an `Arc` and never observe a half-applied change.

use crate::{
    config::PricingConfig,
    error::{PriceError, Result},
    types::{InstrumentClass, RESERVED_SOURCE_IDS, Source, SourceId},
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable registry state at one version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub version: u64,
    classes: BTreeMap<InstrumentClass, Vec<Source>>,
}

impl RegistrySnapshot {
    /// Sources of a class, most trusted first
    pub fn sources(&self, class: InstrumentClass) -> &[Source] {
        self.classes.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, id: &SourceId) -> Option<&Source> {
        self.classes.values().flatten().find(|s| &s.id == id)
    }

    fn find_mut(&mut self, id: &SourceId) -> Option<&mut Source> {
        self.classes.values_mut().flatten().find(|s| &s.id == id)
    }
}

/// Details supplied when an administrator adds a source
#[derive(Debug, Clone)]
pub struct NewSource {
    pub id: SourceId,
    pub instrument_class: InstrumentClass,
    pub name: String,
    pub display_name: String,
    pub enabled: bool,
}

impl NewSource {
    pub fn new(id: impl Into<SourceId>, instrument_class: InstrumentClass) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            display_name: id.to_string(),
            id,
            instrument_class,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Default)]
pub struct SourceRegistry {
    state: RwLock<Arc<RegistrySnapshot>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every class with the sources listed in the configuration, in
    /// the configured trust order.
    pub fn from_config(config: &PricingConfig) -> Result<Self> {
        let registry = Self::new();
        for (class, class_config) in &config.classes {
            for id in &class_config.sources {
                let new = NewSource::new(id.as_str(), *class);
                if class_config.disabled_sources.contains(id) {
                    registry.register(new.disabled())?;
                } else {
                    registry.register(new)?;
                }
            }
        }
        Ok(registry)
    }

    /// Current immutable state
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.state.read())
    }

    /// Sources of a class ordered by priority
    pub fn list(&self, class: InstrumentClass) -> Vec<Source> {
        self.snapshot().sources(class).to_vec()
    }

    pub fn get(&self, id: &SourceId) -> Option<Source> {
        self.snapshot().find(id).cloned()
    }

    /// Append a source at the lowest priority of its class
    pub fn register(&self, new: NewSource) -> Result<Source> {
        if new.id.as_str().trim().is_empty() || RESERVED_SOURCE_IDS.contains(&new.id.as_str()) {
            return Err(PriceError::InvalidValue(format!(
                "'{}' cannot be used as a source id",
                new.id
            )));
        }

        self.commit(|next| {
            if next.find(&new.id).is_some() {
                return Err(PriceError::DuplicateSource(new.id.clone()));
            }

            let sources = next.classes.entry(new.instrument_class).or_default();
            let source = Source {
                id: new.id.clone(),
                instrument_class: new.instrument_class,
                name: new.name.clone(),
                display_name: new.display_name.clone(),
                enabled: new.enabled,
                priority: sources.len() as u32,
                last_updated: None,
            };
            sources.push(source.clone());

            info!(
                "Registered {} source {} at priority {}",
                source.instrument_class, source.id, source.priority
            );
            Ok(source)
        })
    }

    pub fn set_enabled(&self, id: &SourceId, enabled: bool) -> Result<Source> {
        self.commit(|next| {
            let source = next
                .find_mut(id)
                .ok_or_else(|| PriceError::UnknownSource(id.clone()))?;
            source.enabled = enabled;

            info!("Source {} {}", id, if enabled { "enabled" } else { "disabled" });
            Ok(source.clone())
        })
    }

    /// Replace the order of a class. `order` must name every source of the
    /// class exactly once; priorities become `0..n` in that order.
    pub fn reorder(&self, class: InstrumentClass, order: &[SourceId]) -> Result<Vec<Source>> {
        self.commit(|next| {
            let current = next.sources(class);

            let mut seen = HashSet::new();
            for id in order {
                if !seen.insert(id) {
                    return Err(PriceError::InvalidOrdering {
                        class,
                        reason: format!("{id} appears more than once"),
                    });
                }
                match next.find(id) {
                    None => return Err(PriceError::UnknownSource(id.clone())),
                    Some(source) if source.instrument_class != class => {
                        return Err(PriceError::ClassMismatch {
                            source_id: id.clone(),
                            expected: class,
                            actual: source.instrument_class,
                        });
                    }
                    Some(_) => {}
                }
            }

            let missing: Vec<String> = current
                .iter()
                .filter(|s| !seen.contains(&s.id))
                .map(|s| s.id.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(PriceError::InvalidOrdering {
                    class,
                    reason: format!("missing {}", missing.join(", ")),
                });
            }

            let mut reordered = Vec::with_capacity(order.len());
            for (priority, id) in order.iter().enumerate() {
                if let Some(source) = current.iter().find(|s| &s.id == id) {
                    let mut source = source.clone();
                    source.priority = priority as u32;
                    reordered.push(source);
                }
            }
            next.classes.insert(class, reordered.clone());

            info!("Reordered {} sources: {:?}", class, order);
            Ok(reordered)
        })
    }

    /// Advance a source's `last_updated`; older timestamps are ignored.
    pub fn touch(&self, id: &SourceId, observed_at: DateTime<Utc>) -> Result<()> {
        let current = self.snapshot();
        let source = current
            .find(id)
            .ok_or_else(|| PriceError::UnknownSource(id.clone()))?;
        if source.last_updated.is_some_and(|last| last >= observed_at) {
            return Ok(());
        }

        self.commit(|next| {
            if let Some(source) = next.find_mut(id) {
                if source.last_updated.is_none_or(|last| last < observed_at) {
                    source.last_updated = Some(observed_at);
                }
            }
            Ok(())
        })
    }

    /// Apply `change` to a copy of the current state and publish it as the
    /// next version. Nothing is published when `change` fails.
    fn commit<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut RegistrySnapshot) -> Result<T>,
    {
        let mut guard = self.state.write();
        let mut next = RegistrySnapshot::clone(&guard);
        let out = change(&mut next)?;
        next.version = guard.version + 1;
        debug!("Registry version {} published", next.version);
        *guard = Arc::new(next);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(sources: &[Source]) -> Vec<&str> {
        sources.iter().map(|s| s.id.as_str()).collect()
    }

    fn registry_with_gold(names: &[&str]) -> SourceRegistry {
        let registry = SourceRegistry::new();
        for name in names {
            registry
                .register(NewSource::new(*name, InstrumentClass::Gold))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_register_appends_in_priority_order() {
        let registry = registry_with_gold(&["a", "b", "c"]);
        let gold = registry.list(InstrumentClass::Gold);

        assert_eq!(ids(&gold), vec!["a", "b", "c"]);
        assert_eq!(gold.iter().map(|s| s.priority).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(registry.list(InstrumentClass::Silver).is_empty());
    }

    #[test]
    fn test_register_rejects_duplicates_and_reserved_ids() {
        let registry = registry_with_gold(&["a"]);

        let err = registry
            .register(NewSource::new("a", InstrumentClass::Silver))
            .unwrap_err();
        assert_eq!(err, PriceError::DuplicateSource(SourceId::from("a")));

        assert!(registry.register(NewSource::new("manual", InstrumentClass::Gold)).is_err());
        assert!(registry.register(NewSource::new("  ", InstrumentClass::Gold)).is_err());
    }

    #[test]
    fn test_reorder_rewrites_contiguous_priorities() {
        let registry = registry_with_gold(&["a", "b", "c"]);
        let before = registry.snapshot().version;

        let order = vec![SourceId::from("c"), SourceId::from("a"), SourceId::from("b")];
        registry.reorder(InstrumentClass::Gold, &order).unwrap();

        let gold = registry.list(InstrumentClass::Gold);
        assert_eq!(ids(&gold), vec!["c", "a", "b"]);
        assert_eq!(gold.iter().map(|s| s.priority).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(registry.snapshot().version, before + 1);
    }

    #[test]
    fn test_invalid_reorder_leaves_registry_untouched() {
        let registry = registry_with_gold(&["a", "b", "c"]);
        registry
            .register(NewSource::new("nbe", InstrumentClass::Currency))
            .unwrap();
        let before = registry.snapshot();

        let attempts: Vec<Vec<SourceId>> = vec![
            vec!["a".into(), "b".into()],
            vec!["a".into(), "a".into(), "b".into()],
            vec!["a".into(), "b".into(), "zzz".into()],
            vec!["a".into(), "b".into(), "c".into(), "nbe".into()],
        ];
        for order in attempts {
            let err = registry.reorder(InstrumentClass::Gold, &order).unwrap_err();
            assert!(err.is_configuration(), "{err}");
        }

        assert_eq!(*registry.snapshot(), *before);
    }

    #[test]
    fn test_seeded_from_config() {
        let mut config = PricingConfig::default();
        if let Some(gold) = config.classes.get_mut(&InstrumentClass::Gold) {
            gold.sources = vec!["egypt-gold".to_string(), "gold-era".to_string()];
            gold.disabled_sources = vec!["gold-era".to_string()];
        }

        let registry = SourceRegistry::from_config(&config).unwrap();
        let gold = registry.list(InstrumentClass::Gold);
        assert_eq!(ids(&gold), vec!["egypt-gold", "gold-era"]);
        assert!(gold[0].enabled);
        assert!(!gold[1].enabled);
        assert!(registry.list(InstrumentClass::Silver).is_empty());

        config.classes.get_mut(&InstrumentClass::Silver).unwrap().sources = vec!["egypt-gold".to_string()];
        assert!(matches!(
            SourceRegistry::from_config(&config),
            Err(PriceError::DuplicateSource(_))
        ));
    }

    #[test]
    fn test_set_enabled_keeps_priority() {
        let registry = registry_with_gold(&["a", "b"]);
        let source = registry.set_enabled(&SourceId::from("a"), false).unwrap();

        assert!(!source.enabled);
        assert_eq!(source.priority, 0);
        assert!(matches!(
            registry.set_enabled(&SourceId::from("x"), true),
            Err(PriceError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_touch_only_moves_forward() {
        let registry = registry_with_gold(&["a"]);
        let id = SourceId::from("a");
        let newer = Utc::now();
        let older = newer - chrono::Duration::minutes(5);

        registry.touch(&id, newer).unwrap();
        let version = registry.snapshot().version;
        registry.touch(&id, older).unwrap();

        assert_eq!(registry.get(&id).unwrap().last_updated, Some(newer));
        assert_eq!(registry.snapshot().version, version);
    }

    #[test]
    fn test_readers_keep_their_version() {
        let registry = registry_with_gold(&["a", "b"]);
        let held = registry.snapshot();

        registry.set_enabled(&SourceId::from("a"), false).unwrap();

        assert!(held.sources(InstrumentClass::Gold)[0].enabled);
        assert!(!registry.snapshot().sources(InstrumentClass::Gold)[0].enabled);
    }
}
