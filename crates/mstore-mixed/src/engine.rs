//! Backends and the store-engine registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use mstore_keys::CourseLocation;
use mstore_store::{
    CourseBundle, DraftStore, LegacyFlatStore, ModuleStoreRead, ModuleStoreWrite, SplitStore,
    StoreError, StoreResult,
};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{ConfigError, ConfigResult};

/// A configured backend: read-only, or with its write tier exposed.
#[derive(Clone)]
pub enum Backend {
    ReadOnly(Arc<dyn ModuleStoreRead>),
    ReadWrite {
        read: Arc<dyn ModuleStoreRead>,
        write: Arc<dyn ModuleStoreWrite>,
    },
}

impl Backend {
    pub fn read_only<S: ModuleStoreRead + 'static>(store: Arc<S>) -> Self {
        Self::ReadOnly(store)
    }

    pub fn read_write<S: ModuleStoreWrite + 'static>(store: Arc<S>) -> Self {
        Self::ReadWrite {
            read: store.clone(),
            write: store,
        }
    }

    /// The same store with its write tier hidden.
    pub fn into_read_only(self) -> Self {
        match self {
            Self::ReadWrite { read, .. } => Self::ReadOnly(read),
            read_only => read_only,
        }
    }

    pub fn reader(&self) -> &dyn ModuleStoreRead {
        match self {
            Self::ReadOnly(read) | Self::ReadWrite { read, .. } => read.as_ref(),
        }
    }

    /// The write tier, or [`StoreError::NotImplemented`] naming `operation`.
    pub fn writer(&self, operation: &str) -> StoreResult<&dyn ModuleStoreWrite> {
        match self {
            Self::ReadWrite { write, .. } => Ok(write.as_ref()),
            Self::ReadOnly(read) => Err(StoreError::NotImplemented(format!(
                "{operation} on read-only {} store",
                read.kind()
            ))),
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly(_))
    }

    /// Identity of the underlying store, shared by clones.
    pub(crate) fn store_ptr(&self) -> *const () {
        Arc::as_ptr(match self {
            Self::ReadOnly(read) | Self::ReadWrite { read, .. } => read,
        }) as *const ()
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.reader().kind())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// Builds a backend from its config and the course ids mapped to it.
pub type EngineFactory =
    Box<dyn Fn(&StoreConfig, &[CourseLocation]) -> ConfigResult<Backend> + Send + Sync>;

/// Store engines by name.
pub struct EngineRegistry {
    factories: BTreeMap<String, EngineFactory>,
}

impl EngineRegistry {
    /// A registry with no engines.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the built-in `legacy-flat`, `draft` and `split`
    /// engines.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        let builtins: [(&str, EngineFactory); 3] = [
            ("legacy-flat", Box::new(legacy_flat_engine)),
            ("draft", Box::new(|_: &StoreConfig, _: &[CourseLocation]| {
                Ok(Backend::read_write(Arc::new(DraftStore::new())))
            })),
            ("split", Box::new(|_: &StoreConfig, _: &[CourseLocation]| {
                Ok(Backend::read_write(Arc::new(SplitStore::new())))
            })),
        ];
        for (name, factory) in builtins {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: EngineFactory) -> ConfigResult<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(ConfigError::DuplicateEngine(name));
        }
        info!(engine = %name, "registered store engine");
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn engines(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the backend `config` describes, hiding writes if it is
    /// configured read-only.
    pub fn build(&self, config: &StoreConfig, course_ids: &[CourseLocation]) -> ConfigResult<Backend> {
        let factory = self
            .factories
            .get(&config.engine)
            .ok_or_else(|| ConfigError::UnknownEngine(config.engine.clone()))?;
        let backend = factory(config, course_ids)?;
        debug!(store = %config.name, engine = %config.engine, read_only = config.read_only, "built store");
        Ok(if config.read_only {
            backend.into_read_only()
        } else {
            backend
        })
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}

/// Loads course bundles from the JSON file named by the `bundle_file`
/// option, keeping only `course_ids`.
fn legacy_flat_engine(config: &StoreConfig, course_ids: &[CourseLocation]) -> ConfigResult<Backend> {
    let bundles: Vec<CourseBundle> = match config.str_option("bundle_file")? {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(|e| ConfigError::InvalidOption {
                store: config.name.clone(),
                option: "bundle_file".into(),
                reason: e.to_string(),
            })?
        }
        None => Vec::new(),
    };
    Ok(Backend::read_only(Arc::new(LegacyFlatStore::load(bundles, Some(course_ids)))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mstore_store::{DeleteOptions, Item, ItemKey, StoreKind};

    fn bundle() -> CourseBundle {
        let course = CourseLocation::new("MITx", "6002x", "2012_Fall").unwrap();
        let root = Item::at_location(course.location().unwrap()).unwrap();
        CourseBundle {
            course_dir: "6002x".into(),
            course_id: course,
            items: vec![root],
        }
    }

    #[test]
    fn builtin_engines() {
        let registry = EngineRegistry::new();
        assert_eq!(registry.engines(), vec!["draft", "legacy-flat", "split"]);
        let split = registry.build(&StoreConfig::new("default", "split"), &[]).unwrap();
        assert_eq!(split.reader().kind(), StoreKind::SplitVersioned);
        assert!(!split.is_read_only());
    }

    #[test]
    fn unknown_and_duplicate_engines() {
        let mut registry = EngineRegistry::new();
        assert_eq!(
            registry.build(&StoreConfig::new("default", "mongo"), &[]).unwrap_err(),
            ConfigError::UnknownEngine("mongo".into())
        );
        let again: EngineFactory = Box::new(|_: &StoreConfig, _: &[CourseLocation]| {
            Ok(Backend::read_write(Arc::new(DraftStore::new())))
        });
        assert!(matches!(
            registry.register("draft", again),
            Err(ConfigError::DuplicateEngine(_))
        ));
    }

    #[test]
    fn read_only_flag_hides_writes() {
        let registry = EngineRegistry::new();
        let backend = registry
            .build(&StoreConfig::new("direct", "draft").read_only(), &[])
            .unwrap();
        assert!(backend.is_read_only());
        let key: ItemKey = CourseLocation::new("MITx", "6002x", "2012_Fall")
            .unwrap()
            .location()
            .unwrap()
            .into();
        let err = backend
            .writer("delete_item")
            .and_then(|w| w.delete_item(&key, "alice", DeleteOptions::default()))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotImplemented(_)));
    }

    #[test]
    fn legacy_flat_loads_bundle_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courses.json");
        std::fs::write(&path, serde_json::to_string(&vec![bundle()]).unwrap()).unwrap();
        let config = StoreConfig::new("xml", "legacy-flat")
            .with_option("bundle_file", path.to_string_lossy().into_owned());

        let registry = EngineRegistry::new();
        let course = bundle().course_id;
        let mapped = registry.build(&config, std::slice::from_ref(&course)).unwrap();
        assert!(mapped.is_read_only());
        assert_eq!(mapped.reader().get_courses().unwrap().len(), 1);

        let unmapped = registry.build(&config, &[]).unwrap();
        assert!(unmapped.reader().get_courses().unwrap().is_empty());
    }
}
