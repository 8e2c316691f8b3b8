//! Mixed module store for course content.
//!
//! A [`MixedStore`] presents one module store over several named backends.
//! Each course is served by exactly one backend, chosen from a course-to-store
//! mapping with a `default` fallback. Legacy locations are translated to
//! locators (and back) through a persistent [`TranslationTable`] whenever a
//! call crosses addressing schemes.
//!
//! # Key Types
//!
//! - [`MixedStore`] -- the router
//! - [`MixedConfig`] -- stores, mappings and translation policy, loaded from TOML
//! - [`EngineRegistry`] -- builds backends from their configured engine name
//! - [`LocMapper`] -- legacy location to locator translation
//! - [`Backend`] -- a store handle, read-only or read-write

pub mod config;
pub mod engine;
pub mod error;
pub mod mixed;
pub mod translation;

pub use config::{MixedConfig, StoreConfig, TranslationPolicy, DEFAULT_STORE};
pub use engine::{Backend, EngineFactory, EngineRegistry};
pub use error::{ConfigError, ConfigResult};
pub use mixed::MixedStore;
pub use translation::{CourseMapEntry, InMemoryTranslationTable, LocMapper, TranslationTable};
