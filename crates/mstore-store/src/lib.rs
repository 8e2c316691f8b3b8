//! Module store contract and backends for course content.
//!
//! A module store holds the content blocks ("items") of courses, addressed by
//! either legacy [`Location`](mstore_keys::Location)s or
//! [`BlockUsageLocator`](mstore_keys::BlockUsageLocator)s.
//!
//! # Contract
//!
//! - [`ModuleStoreRead`] -- item lookup, child traversal, queries, orphans and error logs
//! - [`ModuleStoreWrite`] -- course and item creation, update and deletion
//!
//! # Backends
//!
//! - [`LegacyFlatStore`] -- read-only, location-addressed, loaded from course bundles
//! - [`DraftStore`] -- location-addressed, draft revisions overlaying published ones
//! - [`SplitStore`] -- locator-addressed, one version tree per course
//!
//! Static assets live beside the module store behind [`ContentStore`].
//!
//! # Design Rules
//!
//! 1. Backends are `Send + Sync`; each write either fully applies or fails.
//! 2. A wildcard key is never accepted where a concrete key is required.
//! 3. Non-fatal load problems are recorded per course, never dropped.

pub mod content;
pub mod draft;
pub mod error;
pub mod errortracker;
pub mod item;
pub mod legacy;
pub mod split;
pub mod traits;

pub use content::{ContentStore, InMemoryContentStore, StaticContent};
pub use draft::DraftStore;
pub use error::{StoreError, StoreResult};
pub use errortracker::{ErrorTracker, LoadError};
pub use item::{DeleteOptions, Fields, Item, ItemKey, ItemQuery, NewItem};
pub use legacy::{CourseBundle, LegacyFlatStore};
pub use split::{Definition, SplitStore};
pub use traits::{ModuleStoreRead, ModuleStoreWrite, ReferenceType, StoreKind, PARENTLESS_CATEGORIES};
