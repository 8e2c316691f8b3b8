//! Opaque keys for course content.
//!
//! This crate provides the immutable, namespaced identifiers used to address
//! courses, course versions and content blocks, together with the string
//! grammar they serialize to and the registries that parse them back.
//!
//! # Key Types
//!
//! - [`CourseLocator`] -- a course offering, optionally narrowed to a branch and pinned to a version
//! - [`BlockUsageLocator`] -- one content block inside a course
//! - [`DefinitionLocator`] -- a course-independent content body
//! - [`CourseLocation`] -- the legacy `org/course/run` course id
//! - [`Location`] -- the legacy six-part module address
//! - [`VersionGuid`] -- 12-byte version identifier
//!
//! Serialized keys have the form `<namespace>:<body>` and are parsed through
//! the per-key-type registries in [`registry`].

pub mod error;
pub mod guid;
pub mod keys;
pub mod location;
pub mod locator;
pub mod opaque;
pub mod parsers;
pub mod registry;
pub mod version_tree;

pub use error::{KeyError, KeyResult};
pub use guid::VersionGuid;
pub use keys::{CourseId, CourseKey, DefinitionKey, UsageKey};
pub use location::{CourseLocation, Location};
pub use locator::{
    BlockUsageLocator, CourseLocator, DefinitionId, DefinitionLocator, LocalId, Locator,
    LocatorSpec,
};
pub use opaque::{KeyArgs, OpaqueKey};
pub use registry::{course_keys, definition_keys, usage_keys, KeyRegistry};
pub use version_tree::VersionTree;
