//! Namespace → parser registries, one per key type.
//!
//! Resolution is two-tier: a serialized key whose namespace is registered is
//! handed straight to that parser; a key without a namespace, or with one
//! that isn't registered, is offered in full to every registered parser in
//! registration order and the first one to accept it wins.

use std::fmt;
use std::sync::LazyLock;

use tracing::debug;

use crate::error::{KeyError, KeyResult};
use crate::keys::CourseId;
use crate::location::CourseLocation;
use crate::locator::{BlockUsageLocator, CourseLocator, DefinitionLocator};
use crate::opaque::{separate_namespace, OpaqueKey};

type Parser<T> = Box<dyn Fn(&str) -> KeyResult<T> + Send + Sync>;

/// Ordered registry of key parsers for one key type.
pub struct KeyRegistry<T> {
    key_type: &'static str,
    drivers: Vec<(String, Parser<T>)>,
}

impl<T> KeyRegistry<T> {
    /// Create an empty registry for the `key_type` slot.
    pub fn new(key_type: &'static str) -> Self {
        Self {
            key_type,
            drivers: Vec::new(),
        }
    }

    pub fn key_type(&self) -> &'static str {
        self.key_type
    }

    /// Register `parser` under `namespace`. Fails if the namespace is taken.
    pub fn register<F>(&mut self, namespace: impl Into<String>, parser: F) -> KeyResult<()>
    where
        F: Fn(&str) -> KeyResult<T> + Send + Sync + 'static,
    {
        let namespace = namespace.into();
        if self.drivers.iter().any(|(ns, _)| *ns == namespace) {
            return Err(KeyError::DuplicateNamespace {
                key_type: self.key_type,
                namespace,
            });
        }
        self.drivers.push((namespace, Box::new(parser)));
        Ok(())
    }

    /// Register `K` under its canonical namespace, wrapping parsed keys with
    /// `wrap`.
    pub fn register_key<K>(&mut self, wrap: fn(K) -> T) -> KeyResult<()>
    where
        K: OpaqueKey + 'static,
        T: 'static,
    {
        self.register(K::CANONICAL_NAMESPACE, move |body| K::from_body(body).map(wrap))
    }

    /// Registered namespaces in registration order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.drivers.iter().map(|(ns, _)| ns.as_str())
    }

    /// Parse a serialized key.
    pub fn from_string(&self, serialized: &str) -> KeyResult<T> {
        if serialized.is_empty() {
            return Err(KeyError::InvalidKey(String::new()));
        }
        let Ok((namespace, rest)) = separate_namespace(serialized) else {
            return self.from_string_fallback(serialized);
        };
        match self.drivers.iter().find(|(ns, _)| ns == namespace) {
            Some((_, parser)) => parser(rest),
            None => self.from_string_fallback(serialized),
        }
    }

    fn from_string_fallback(&self, serialized: &str) -> KeyResult<T> {
        for (namespace, parser) in &self.drivers {
            if let Ok(key) = parser(serialized) {
                debug!(key_type = self.key_type, %namespace, serialized, "resolved key by trial parsing");
                return Ok(key);
            }
        }
        Err(KeyError::InvalidKey(serialized.to_string()))
    }
}

impl<T> fmt::Debug for KeyRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("key_type", &self.key_type)
            .field("namespaces", &self.namespaces().collect::<Vec<_>>())
            .finish()
    }
}

static COURSE_KEYS: LazyLock<KeyRegistry<CourseId>> = LazyLock::new(|| {
    let mut registry = KeyRegistry::new(CourseLocator::KEY_TYPE);
    registry
        .register_key::<CourseLocator>(CourseId::Locator)
        .and_then(|()| registry.register_key::<CourseLocation>(CourseId::Location))
        .expect("static course key namespaces are distinct");
    registry
});

static USAGE_KEYS: LazyLock<KeyRegistry<BlockUsageLocator>> = LazyLock::new(|| {
    let mut registry = KeyRegistry::new(BlockUsageLocator::KEY_TYPE);
    registry
        .register_key::<BlockUsageLocator>(|key| key)
        .expect("static usage key namespaces are distinct");
    registry
});

static DEFINITION_KEYS: LazyLock<KeyRegistry<DefinitionLocator>> = LazyLock::new(|| {
    let mut registry = KeyRegistry::new(DefinitionLocator::KEY_TYPE);
    registry
        .register_key::<DefinitionLocator>(|key| key)
        .expect("static definition key namespaces are distinct");
    registry
});

/// The `course_key` registry: `course-locator`, then `course-location`.
pub fn course_keys() -> &'static KeyRegistry<CourseId> {
    &COURSE_KEYS
}

/// The `usage_key` registry: `edx`.
pub fn usage_keys() -> &'static KeyRegistry<BlockUsageLocator> {
    &USAGE_KEYS
}

/// The `definition_key` registry: `defx`.
pub fn definition_keys() -> &'static KeyRegistry<DefinitionLocator> {
    &DEFINITION_KEYS
}
