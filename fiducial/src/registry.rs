use std::sync::{Arc, PoisonError, RwLock};

use crate::detect::image::ImageU8;
use crate::detect::region::Region;
use crate::error::ConfigError;
use crate::family::{ConfigMap, FamilyId, FamilySet, PluginConfig};
use crate::plugins;
use crate::types::Fiducial;

/// One registered plugin.
#[derive(Debug, Clone)]
pub struct PluginEntry {
    pub config: Arc<PluginConfig>,
    pub enabled: bool,
    /// Fallback plugins only run on regions no primary plugin decoded.
    pub fallback: bool,
}

impl PluginEntry {
    pub fn family(&self) -> FamilyId {
        self.config.family()
    }
}

/// An immutable view of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    entries: Vec<PluginEntry>,
    priority: Vec<FamilyId>,
}

impl RegistryState {
    /// Entries in registration order.
    pub fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    pub fn entry(&self, family: FamilyId) -> Option<&PluginEntry> {
        self.entries.iter().find(|e| e.family() == family)
    }

    pub fn config(&self, family: FamilyId) -> Option<&PluginConfig> {
        self.entry(family).map(|e| e.config.as_ref())
    }

    /// Tie-break rank of a family, lower wins. Families without an explicit
    /// priority rank after those with one, in registration order.
    pub fn rank(&self, family: FamilyId) -> usize {
        if let Some(i) = self.priority.iter().position(|&f| f == family) {
            return i;
        }
        let registered = self.entries.iter().position(|e| e.family() == family);
        self.priority.len() + registered.unwrap_or(self.entries.len())
    }

    fn runnable(&self, active: FamilySet, fallback: bool) -> impl Iterator<Item = &PluginEntry> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.enabled && e.fallback == fallback && active.contains(e.family()))
    }

    /// Decode one region with every enabled plugin whose family is active.
    ///
    /// Primary plugins run in registration order; fallback plugins only run
    /// when none of them succeeded.
    pub fn dispatch(&self, region: &Region, frame: &ImageU8, active: FamilySet) -> Vec<Fiducial> {
        let mut found: Vec<Fiducial> = self
            .runnable(active, false)
            .filter_map(|e| plugins::try_decode(region, frame, &e.config))
            .collect();
        if found.is_empty() {
            found = self
                .runnable(active, true)
                .filter_map(|e| plugins::try_decode(region, frame, &e.config))
                .take(1)
                .collect();
        }
        for f in &found {
            log::trace!("{} id {} decoded at {:?}", f.family, f.id, f.center);
        }
        found
    }
}

/// Thread-safe, copy-on-write plugin registry.
///
/// Every detection call takes one snapshot up front and updates swap in a
/// modified copy, so a call in flight never sees a half-applied change.
#[derive(Debug)]
pub struct PluginRegistry {
    state: RwLock<Arc<RegistryState>>,
}

impl Default for PluginRegistry {
    /// All six families with default parameters; ICL1 is the fallback.
    fn default() -> Self {
        let entries = FamilyId::ALL
            .into_iter()
            .map(|family| PluginEntry {
                config: Arc::new(PluginConfig::default_for(family)),
                enabled: true,
                fallback: family == FamilyId::Icl1,
            })
            .collect();
        Self::from_state(RegistryState {
            entries,
            priority: Vec::new(),
        })
    }
}

impl PluginRegistry {
    /// A registry with no plugins.
    pub fn empty() -> Self {
        Self::from_state(RegistryState::default())
    }

    fn from_state(state: RegistryState) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// The current configuration. Later updates do not affect it.
    pub fn snapshot(&self) -> Arc<RegistryState> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to a private copy of the state and publish it if `f` succeeds.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut RegistryState) -> Result<T, ConfigError>,
    ) -> Result<T, ConfigError> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RegistryState::clone(&guard);
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    fn entry_mut(state: &mut RegistryState, family: FamilyId) -> Result<&mut PluginEntry, ConfigError> {
        state
            .entries
            .iter_mut()
            .find(|e| e.family() == family)
            .ok_or(ConfigError::NotRegistered(family))
    }

    /// Add a plugin after the existing ones, or replace the configuration
    /// of an already registered family in place.
    pub fn register(&self, config: PluginConfig) -> Result<(), ConfigError> {
        self.register_entry(config, false)
    }

    /// Like [`register`](Self::register), as a fallback plugin.
    pub fn register_fallback(&self, config: PluginConfig) -> Result<(), ConfigError> {
        self.register_entry(config, true)
    }

    fn register_entry(&self, config: PluginConfig, fallback: bool) -> Result<(), ConfigError> {
        config.validate()?;
        let family = config.family();
        self.update(|state| {
            let entry = PluginEntry {
                config: Arc::new(config),
                enabled: true,
                fallback,
            };
            match state.entries.iter_mut().find(|e| e.family() == family) {
                Some(existing) => *existing = entry,
                None => state.entries.push(entry),
            }
            Ok(())
        })
    }

    /// Parse, validate and install a family's parameters. Keys not present
    /// keep their defaults. On error the active configuration is unchanged.
    pub fn configure(&self, family: FamilyId, map: &ConfigMap) -> Result<(), ConfigError> {
        let config = PluginConfig::from_map(family, map).inspect_err(|e| {
            log::warn!("rejected {family} configuration: {e}");
        })?;
        self.configure_with(config)
    }

    /// Install already-built parameters for a registered family.
    pub fn configure_with(&self, config: PluginConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let family = config.family();
        self.update(|state| {
            Self::entry_mut(state, family)?.config = Arc::new(config);
            Ok(())
        })?;
        log::debug!("configured {family}");
        Ok(())
    }

    pub fn set_enabled(&self, family: FamilyId, enabled: bool) -> Result<(), ConfigError> {
        self.update(|state| {
            Self::entry_mut(state, family)?.enabled = enabled;
            Ok(())
        })
    }

    /// Families that win ties during deduplication, highest priority first.
    /// Unlisted families follow in registration order.
    pub fn set_priority(&self, order: &[FamilyId]) -> Result<(), ConfigError> {
        self.update(|state| {
            if let Some(&missing) = order.iter().find(|&&f| state.entry(f).is_none()) {
                return Err(ConfigError::NotRegistered(missing));
            }
            let mut priority = Vec::with_capacity(order.len());
            for &f in order {
                if !priority.contains(&f) {
                    priority.push(f);
                }
            }
            state.priority = priority;
            Ok(())
        })
    }

    /// Decode one region with the current configuration and all families active.
    pub fn dispatch(&self, region: &Region, frame: &ImageU8) -> Vec<Fiducial> {
        self.snapshot().dispatch(region, frame, FamilySet::all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::bch::BchConfig;
    use crate::render::{paint, MarkerPattern};

    const CORNERS: [[f64; 2]; 4] = [[20.0, 20.0], [140.0, 20.0], [140.0, 140.0], [20.0, 140.0]];

    fn scene(pattern: MarkerPattern) -> ImageU8 {
        let mut frame = ImageU8::filled(160, 160, 255);
        paint(&mut frame, &pattern, &CORNERS);
        frame
    }

    fn bch_max_errors(state: &RegistryState) -> u32 {
        match state.config(FamilyId::Bch) {
            Some(PluginConfig::Bch(c)) => c.max_errors,
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn default_registers_all_families_with_icl1_fallback() {
        let snap = PluginRegistry::default().snapshot();
        let families: Vec<_> = snap.entries().iter().map(PluginEntry::family).collect();
        assert_eq!(families, FamilyId::ALL.to_vec());
        assert!(snap.entry(FamilyId::Icl1).unwrap().fallback);
        assert!(!snap.entry(FamilyId::Bch).unwrap().fallback);
    }

    #[test]
    fn configure_replaces_and_snapshots_are_isolated() {
        let registry = PluginRegistry::default();
        let before = registry.snapshot();
        let map: ConfigMap = toml::from_str("max_errors = 1").unwrap();
        registry.configure(FamilyId::Bch, &map).unwrap();

        assert_eq!(bch_max_errors(&before), 4);
        assert_eq!(bch_max_errors(&registry.snapshot()), 1);
    }

    #[test]
    fn malformed_configuration_keeps_previous() {
        let registry = PluginRegistry::default();
        registry
            .configure(FamilyId::Bch, &toml::from_str("max_errors = 2").unwrap())
            .unwrap();

        for bad in ["max_errors = 9", "max_errors = \"two\"", "colour = 3", "ids = \"[5,1]\""] {
            let map: ConfigMap = toml::from_str(bad).unwrap();
            let err = registry.configure(FamilyId::Bch, &map).unwrap_err();
            assert!(matches!(err, ConfigError::Malformed { family: FamilyId::Bch, .. }), "{bad}: {err}");
        }
        assert_eq!(bch_max_errors(&registry.snapshot()), 2);
    }

    #[test]
    fn unregistered_family_is_an_error() {
        let registry = PluginRegistry::empty();
        let err = registry
            .configure_with(PluginConfig::Bch(BchConfig::default()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotRegistered(FamilyId::Bch)));
        assert!(registry.set_enabled(FamilyId::Art, false).is_err());

        registry.register(PluginConfig::Bch(BchConfig::default())).unwrap();
        assert_eq!(registry.snapshot().entries().len(), 1);
    }

    #[test]
    fn priority_overrides_registration_order() {
        let registry = PluginRegistry::default();
        let snap = registry.snapshot();
        assert!(snap.rank(FamilyId::ForQuads) < snap.rank(FamilyId::Bch));

        registry.set_priority(&[FamilyId::Icl1, FamilyId::Bch]).unwrap();
        let snap = registry.snapshot();
        assert_eq!(snap.rank(FamilyId::Icl1), 0);
        assert_eq!(snap.rank(FamilyId::Bch), 1);
        assert!(snap.rank(FamilyId::Bch) < snap.rank(FamilyId::ForQuads));
        assert!(snap.rank(FamilyId::ForQuads) < snap.rank(FamilyId::Hierarchical));

        let empty = PluginRegistry::empty();
        assert!(empty.set_priority(&[FamilyId::Art]).is_err());
    }

    #[test]
    fn dispatch_runs_enabled_active_plugins() {
        let registry = PluginRegistry::default();
        let frame = scene(MarkerPattern::bch(42).unwrap());
        let region = Region::from_corners(&CORNERS);

        let found = registry.dispatch(&region, &frame);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].family, found[0].id), (FamilyId::Bch, 42));

        let no_bch = FamilySet::all().iter().filter(|&f| f != FamilyId::Bch).collect();
        assert!(registry.snapshot().dispatch(&region, &frame, no_bch).is_empty());

        registry.set_enabled(FamilyId::Bch, false).unwrap();
        assert!(registry.dispatch(&region, &frame).is_empty());
    }

    #[test]
    fn fallback_decodes_only_when_primaries_fail() {
        let registry = PluginRegistry::default();
        let frame = scene(MarkerPattern::icl1(1294).unwrap());
        let region = Region::from_corners(&CORNERS);

        let found = registry.dispatch(&region, &frame);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].family, found[0].id), (FamilyId::Icl1, 1294));

        let only_icl1 = FamilySet::from(FamilyId::Icl1);
        assert_eq!(registry.snapshot().dispatch(&region, &frame, only_icl1).len(), 1);
    }
}
