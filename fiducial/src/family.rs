use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::plugins::amoeba::AmoebaConfig;
use crate::plugins::art::ArtConfig;
use crate::plugins::bch::BchConfig;
use crate::plugins::forquads::ForQuadsConfig;
use crate::plugins::hierarchical::HierarchicalConfig;
use crate::plugins::icl1::Icl1Config;

/// Key-value parameters for one family, as handed over by a configuration loader.
pub type ConfigMap = toml::Table;

/// Marker family identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyId {
    ForQuads,
    Bch,
    Hierarchical,
    Art,
    Amoeba,
    Icl1,
}

impl FamilyId {
    /// All families in default registration order.
    pub const ALL: [FamilyId; 6] = [
        FamilyId::ForQuads,
        FamilyId::Bch,
        FamilyId::Hierarchical,
        FamilyId::Art,
        FamilyId::Amoeba,
        FamilyId::Icl1,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FamilyId::ForQuads => "forquads",
            FamilyId::Bch => "bch",
            FamilyId::Hierarchical => "hierarchical",
            FamilyId::Art => "art",
            FamilyId::Amoeba => "amoeba",
            FamilyId::Icl1 => "icl1",
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FamilyId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        FamilyId::ALL
            .into_iter()
            .find(|f| f.name() == lower)
            .ok_or_else(|| ConfigError::UnknownFamily(s.to_string()))
    }
}

/// A set of families, e.g. the families active for one `detect()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FamilySet(u8);

impl FamilySet {
    pub const fn empty() -> Self {
        FamilySet(0)
    }

    pub fn all() -> Self {
        FamilyId::ALL.into_iter().collect()
    }

    pub fn with(mut self, family: FamilyId) -> Self {
        self.insert(family);
        self
    }

    pub fn insert(&mut self, family: FamilyId) {
        self.0 |= family.bit();
    }

    pub fn remove(&mut self, family: FamilyId) {
        self.0 &= !family.bit();
    }

    pub fn contains(self, family: FamilyId) -> bool {
        self.0 & family.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = FamilyId> {
        FamilyId::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl From<FamilyId> for FamilySet {
    fn from(family: FamilyId) -> Self {
        FamilySet::empty().with(family)
    }
}

impl FromIterator<FamilyId> for FamilySet {
    fn from_iter<I: IntoIterator<Item = FamilyId>>(iter: I) -> Self {
        iter.into_iter().fold(FamilySet::empty(), FamilySet::with)
    }
}

impl FromStr for FamilySet {
    type Err = ConfigError;

    /// Comma-separated family names, or `all`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(FamilySet::all());
        }
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(FamilyId::from_str)
            .collect()
    }
}

/// Decoder parameters of one family.
#[derive(Debug, Clone)]
pub enum PluginConfig {
    ForQuads(ForQuadsConfig),
    Bch(BchConfig),
    Hierarchical(HierarchicalConfig),
    Art(ArtConfig),
    Amoeba(AmoebaConfig),
    Icl1(Icl1Config),
}

impl PluginConfig {
    /// Built-in defaults for a family.
    pub fn default_for(family: FamilyId) -> Self {
        match family {
            FamilyId::ForQuads => PluginConfig::ForQuads(ForQuadsConfig::default()),
            FamilyId::Bch => PluginConfig::Bch(BchConfig::default()),
            FamilyId::Hierarchical => PluginConfig::Hierarchical(HierarchicalConfig::default()),
            FamilyId::Art => PluginConfig::Art(ArtConfig::default()),
            FamilyId::Amoeba => PluginConfig::Amoeba(AmoebaConfig::default()),
            FamilyId::Icl1 => PluginConfig::Icl1(Icl1Config::default()),
        }
    }

    pub fn family(&self) -> FamilyId {
        match self {
            PluginConfig::ForQuads(_) => FamilyId::ForQuads,
            PluginConfig::Bch(_) => FamilyId::Bch,
            PluginConfig::Hierarchical(_) => FamilyId::Hierarchical,
            PluginConfig::Art(_) => FamilyId::Art,
            PluginConfig::Amoeba(_) => FamilyId::Amoeba,
            PluginConfig::Icl1(_) => FamilyId::Icl1,
        }
    }

    /// Parse and validate a family's parameters. Keys not given keep their defaults.
    pub fn from_map(family: FamilyId, map: &ConfigMap) -> Result<Self, ConfigError> {
        let value = toml::Value::Table(map.clone());
        let malformed = |e: toml::de::Error| ConfigError::Malformed {
            family,
            message: e.message().to_string(),
        };
        let config = match family {
            FamilyId::ForQuads => PluginConfig::ForQuads(value.try_into().map_err(malformed)?),
            FamilyId::Bch => PluginConfig::Bch(value.try_into().map_err(malformed)?),
            FamilyId::Hierarchical => {
                PluginConfig::Hierarchical(value.try_into().map_err(malformed)?)
            }
            FamilyId::Art => PluginConfig::Art(value.try_into().map_err(malformed)?),
            FamilyId::Amoeba => PluginConfig::Amoeba(value.try_into().map_err(malformed)?),
            FamilyId::Icl1 => PluginConfig::Icl1(value.try_into().map_err(malformed)?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let result = match self {
            PluginConfig::ForQuads(c) => c.validate(),
            PluginConfig::Bch(c) => c.validate(),
            PluginConfig::Hierarchical(c) => c.validate(),
            PluginConfig::Art(c) => c.validate(),
            PluginConfig::Amoeba(c) => c.validate(),
            PluginConfig::Icl1(c) => c.validate(),
        };
        result.map_err(|message| ConfigError::Malformed {
            family: self.family(),
            message,
        })
    }
}
