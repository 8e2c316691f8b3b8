//! Key roles and the course id sum type.
//!
//! A concrete key is one data type implementing [`OpaqueKey`] plus one of the
//! narrow role traits below.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{KeyError, KeyResult};
use crate::location::{CourseLocation, Location};
use crate::locator::{BlockUsageLocator, CourseLocator, DefinitionId, DefinitionLocator};
use crate::opaque::OpaqueKey;
use crate::registry::course_keys;

/// Something that names a course.
pub trait CourseKey {
    /// The key type naming blocks in this course.
    type Usage;

    fn org(&self) -> Option<&str>;

    /// The offering (locators) or run (legacy ids).
    fn run(&self) -> Option<&str>;

    fn make_usage_key(&self, block_type: &str, block_id: &str) -> KeyResult<Self::Usage>;
}

/// Something that names a block inside a course.
pub trait UsageKey: Sized {
    type Course: CourseKey;

    fn course_key(&self) -> Self::Course;

    fn block_id(&self) -> &str;

    fn map_into_course(&self, course: &Self::Course) -> Self;

    fn definition_key(&self) -> KeyResult<DefinitionLocator>;
}

/// Something that names a definition body.
pub trait DefinitionKey {
    fn definition_id(&self) -> &DefinitionId;
}

impl CourseKey for CourseLocator {
    type Usage = BlockUsageLocator;

    fn org(&self) -> Option<&str> {
        CourseLocator::org(self)
    }

    fn run(&self) -> Option<&str> {
        self.offering()
    }

    fn make_usage_key(&self, block_type: &str, block_id: &str) -> KeyResult<BlockUsageLocator> {
        CourseLocator::make_usage_key(self, block_type, block_id)
    }
}

impl CourseKey for CourseLocation {
    type Usage = Location;

    fn org(&self) -> Option<&str> {
        Some(CourseLocation::org(self))
    }

    fn run(&self) -> Option<&str> {
        Some(CourseLocation::run(self))
    }

    fn make_usage_key(&self, block_type: &str, block_id: &str) -> KeyResult<Location> {
        CourseLocation::make_usage_key(self, block_type, block_id)
    }
}

impl UsageKey for BlockUsageLocator {
    type Course = CourseLocator;

    fn course_key(&self) -> CourseLocator {
        BlockUsageLocator::course_key(self)
    }

    fn block_id(&self) -> &str {
        BlockUsageLocator::block_id(self)
    }

    fn map_into_course(&self, course: &CourseLocator) -> Self {
        BlockUsageLocator::map_into_course(self, course)
    }

    fn definition_key(&self) -> KeyResult<DefinitionLocator> {
        BlockUsageLocator::definition_key(self)
    }
}

impl DefinitionKey for DefinitionLocator {
    fn definition_id(&self) -> &DefinitionId {
        DefinitionLocator::definition_id(self)
    }
}

/// A course named either by a locator or by a legacy `org/course/run` id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CourseId {
    Locator(CourseLocator),
    Location(CourseLocation),
}

impl CourseId {
    /// Parse through the `course_key` registry.
    pub fn from_string(serialized: &str) -> KeyResult<Self> {
        course_keys().from_string(serialized)
    }

    pub fn serialized(&self) -> String {
        match self {
            Self::Locator(key) => key.serialized(),
            Self::Location(key) => key.serialized(),
        }
    }

    /// The id used for routing: the package id (or version) of a locator,
    /// `org/course/run` of a legacy id.
    pub fn identity(&self) -> String {
        match self {
            Self::Locator(key) => key
                .package_id()
                .or_else(|| key.version_guid().map(|g| g.to_hex()))
                .unwrap_or_default(),
            Self::Location(key) => key.course_id(),
        }
    }

    pub fn as_locator(&self) -> Option<&CourseLocator> {
        match self {
            Self::Locator(key) => Some(key),
            Self::Location(_) => None,
        }
    }

    pub fn as_location(&self) -> Option<&CourseLocation> {
        match self {
            Self::Location(key) => Some(key),
            Self::Locator(_) => None,
        }
    }

    pub fn org(&self) -> Option<&str> {
        match self {
            Self::Locator(key) => CourseKey::org(key),
            Self::Location(key) => CourseKey::org(key),
        }
    }

    pub fn run(&self) -> Option<&str> {
        match self {
            Self::Locator(key) => CourseKey::run(key),
            Self::Location(key) => CourseKey::run(key),
        }
    }
}

impl From<CourseLocator> for CourseId {
    fn from(key: CourseLocator) -> Self {
        Self::Locator(key)
    }
}

impl From<CourseLocation> for CourseId {
    fn from(key: CourseLocation) -> Self {
        Self::Location(key)
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized())
    }
}

impl FromStr for CourseId {
    type Err = KeyError;

    fn from_str(s: &str) -> KeyResult<Self> {
        Self::from_string(s)
    }
}

impl Serialize for CourseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.serialized())
    }
}

impl<'de> Deserialize<'de> for CourseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_string(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_namespaces_take_fast_path() {
        let id = CourseId::from_string("course-locator:mit+eecs/branch/draft").unwrap();
        assert_eq!(id.identity(), "mit+eecs");
        let id = CourseId::from_string("course-location:MITx/6002x/2012_Fall").unwrap();
        assert_eq!(id.identity(), "MITx/6002x/2012_Fall");
    }

    #[test]
    fn bare_strings_resolve_by_trial() {
        let id = CourseId::from_string("MITx/6002x/2012_Fall").unwrap();
        assert!(matches!(id, CourseId::Location(_)));
        let id = CourseId::from_string("mit+eecs/branch/draft").unwrap();
        assert!(matches!(id, CourseId::Locator(_)));
    }

    #[test]
    fn url_form_resolves_through_fallback() {
        let id = CourseId::from_string("edx://version/519665f6223ebd6980884f2b").unwrap();
        let locator = id.as_locator().unwrap();
        assert!(locator.org().is_none());
        assert_eq!(id.identity(), "519665f6223ebd6980884f2b");
    }

    #[test]
    fn registered_namespace_errors_propagate() {
        assert!(matches!(
            CourseId::from_string("course-locator:branch/draft"),
            Err(KeyError::InvalidValue(_))
        ));
        assert!(matches!(
            CourseId::from_string("nothing here"),
            Err(KeyError::InvalidKey(_))
        ));
    }

    #[test]
    fn roles_are_uniform() {
        let locator = CourseLocator::from_package_id("mit+eecs", None).unwrap();
        let legacy = CourseLocation::new("MITx", "6002x", "2012_Fall").unwrap();
        assert_eq!(CourseKey::run(&locator), Some("eecs"));
        assert_eq!(CourseKey::run(&legacy), Some("2012_Fall"));

        let usage = CourseKey::make_usage_key(&locator, "problem", "HW3").unwrap();
        assert_eq!(UsageKey::course_key(&usage), locator);
        assert_eq!(UsageKey::block_id(&usage), "HW3");
        let location = CourseKey::make_usage_key(&legacy, "problem", "HW3").unwrap();
        assert_eq!(location.category(), Some("problem"));
    }

    #[test]
    fn serde_round_trips_through_registry() {
        let id: CourseId = CourseLocation::new("MITx", "6002x", "2012_Fall").unwrap().into();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"course-location:MITx/6002x/2012_Fall\"");
        assert_eq!(serde_json::from_str::<CourseId>(&json).unwrap(), id);
    }
}
