use std::collections::HashMap;

use serde::Serialize;

use crate::error::{KeyError, KeyResult};
use crate::guid::VersionGuid;
use crate::locator::CourseLocator;

/// A version of a course and every version derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VersionTree {
    locator: CourseLocator,
    children: Vec<VersionTree>,
}

impl VersionTree {
    /// Build the tree rooted at `locator` from a successor map
    /// (`version -> versions whose previous version it is`).
    ///
    /// The root must pin a version, and no version may succeed itself.
    pub fn new(
        locator: CourseLocator,
        successors: &HashMap<VersionGuid, Vec<VersionGuid>>,
    ) -> KeyResult<Self> {
        let version = locator.version_guid().ok_or_else(|| {
            KeyError::InsufficientSpecification(format!(
                "{locator} does not pin a version"
            ))
        })?;
        Self::grow(locator, version, successors, &mut Vec::new())
    }

    fn grow(
        locator: CourseLocator,
        version: VersionGuid,
        successors: &HashMap<VersionGuid, Vec<VersionGuid>>,
        path: &mut Vec<VersionGuid>,
    ) -> KeyResult<Self> {
        if path.contains(&version) {
            return Err(KeyError::InvalidValue(format!(
                "version {version} is its own successor"
            )));
        }
        path.push(version);
        let children = successors
            .get(&version)
            .into_iter()
            .flatten()
            .map(|child| Self::grow(locator.for_version(*child), *child, successors, path))
            .collect::<KeyResult<Vec<_>>>();
        path.pop();
        Ok(Self {
            locator,
            children: children?,
        })
    }

    pub fn locator(&self) -> &CourseLocator {
        &self.locator
    }

    pub fn children(&self) -> &[VersionTree] {
        &self.children
    }

    /// Every version in the tree, root first.
    pub fn versions(&self) -> Vec<VersionGuid> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<VersionGuid>) {
        out.extend(self.locator.version_guid());
        for child in &self.children {
            child.collect(out);
        }
    }
}
