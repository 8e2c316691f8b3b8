use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Name of the store serving every unmapped course.
pub const DEFAULT_STORE: &str = "default";

/// Configuration of a mixed store.
///
/// ```toml
/// [mappings]
/// "MITx/6002x/2012_Fall" = "xml"
///
/// [[stores]]
/// name = "default"
/// engine = "split"
///
/// [[stores]]
/// name = "xml"
/// engine = "legacy-flat"
/// options = { bundle_file = "courses.json" }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixedConfig {
    /// Course id (legacy `org/course/run` or package id) to store name.
    pub mappings: BTreeMap<String, String>,
    /// Stores in precedence order for ties.
    pub stores: Vec<StoreConfig>,
    pub translation: TranslationPolicy,
}

impl Default for MixedConfig {
    fn default() -> Self {
        Self {
            mappings: BTreeMap::new(),
            stores: vec![StoreConfig::new(DEFAULT_STORE, "draft")],
            translation: TranslationPolicy::default(),
        }
    }
}

impl MixedConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check that a `default` store exists, store names are unique and
    /// every mapping names a configured store.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for store in &self.stores {
            if !names.insert(store.name.as_str()) {
                return Err(ConfigError::DuplicateStore(store.name.clone()));
            }
        }
        if !names.contains(DEFAULT_STORE) {
            return Err(ConfigError::MissingDefault);
        }
        for (course, store) in &self.mappings {
            if !names.contains(store.as_str()) {
                return Err(ConfigError::UnknownStore {
                    course: course.clone(),
                    store: store.clone(),
                });
            }
        }
        Ok(())
    }

    /// Course ids mapped to `store`.
    pub fn courses_for(&self, store: &str) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|(_, name)| name.as_str() == store)
            .map(|(course, _)| course.clone())
            .collect()
    }
}

/// One backend of a mixed store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    /// Engine name looked up in the engine registry.
    pub engine: String,
    /// Reject every write even if the engine supports them.
    #[serde(default)]
    pub read_only: bool,
    /// Engine-specific options.
    #[serde(default)]
    pub options: toml::Table,
}

impl StoreConfig {
    pub fn new(name: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: engine.into(),
            read_only: false,
            options: toml::Table::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// A string option, if set.
    pub fn str_option(&self, key: &str) -> ConfigResult<Option<&str>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(ConfigError::InvalidOption {
                store: self.name.clone(),
                option: key.to_string(),
                reason: format!("expected a string, found {}", other.type_str()),
            }),
        }
    }
}

/// How legacy locations are translated for locator-addressed stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationPolicy {
    /// Create translation entries on first use instead of failing.
    pub add_entry_if_missing: bool,
    /// Translate onto the published branch rather than the draft one.
    pub published: bool,
}

impl Default for TranslationPolicy {
    fn default() -> Self {
        Self {
            add_entry_if_missing: true,
            published: false,
        }
    }
}
