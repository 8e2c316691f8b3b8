//! Read-only store over courses loaded from flat bundles.

use std::collections::{BTreeMap, HashMap};

use mstore_keys::{CourseId, CourseLocation, Location};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::errortracker::{ErrorTracker, LoadError};
use crate::item::{Item, ItemKey, ItemQuery};
use crate::traits::{ModuleStoreRead, ReferenceType, StoreKind};

/// One course as exported to the flat layout: its id and every item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CourseBundle {
    /// Directory the course was read from, used to report load failures.
    pub course_dir: String,
    pub course_id: CourseLocation,
    pub items: Vec<Item>,
}

#[derive(Debug)]
struct FlatCourse {
    id: CourseLocation,
    root: Location,
    items: HashMap<Location, Item>,
}

/// Location-addressed, read-only store. It has no write tier.
#[derive(Debug)]
pub struct LegacyFlatStore {
    courses: BTreeMap<String, FlatCourse>,
    tracker: ErrorTracker,
}

impl LegacyFlatStore {
    /// Load `bundles`, keeping only `course_ids` when given.
    ///
    /// Problems are recorded rather than returned: items outside the course
    /// or at a wildcard location are skipped, duplicates keep the first copy,
    /// dangling children are kept but reported, and a course without its root
    /// item is dropped entirely.
    pub fn load(bundles: Vec<CourseBundle>, course_ids: Option<&[CourseLocation]>) -> Self {
        let mut tracker = ErrorTracker::new();
        let mut courses = BTreeMap::new();
        for bundle in bundles {
            if course_ids.is_some_and(|ids| !ids.contains(&bundle.course_id)) {
                debug!(course = %bundle.course_id, "skipping course not in filter");
                continue;
            }
            if let Some(course) = load_course(bundle, &mut tracker) {
                courses.insert(course.id.course_id(), course);
            }
        }
        info!(courses = courses.len(), "loaded legacy flat store");
        Self { courses, tracker }
    }

    /// Ids of the loaded courses.
    pub fn course_ids(&self) -> Vec<CourseLocation> {
        self.courses.values().map(|c| c.id.clone()).collect()
    }

    fn course(&self, course: &CourseId) -> StoreResult<&FlatCourse> {
        let id = location_course(course)?;
        self.courses
            .get(&id.course_id())
            .ok_or_else(|| StoreError::ItemNotFound(id.course_id()))
    }

    fn courses_holding<'a>(&'a self, loc: &'a Location) -> impl Iterator<Item = &'a FlatCourse> {
        self.courses
            .values()
            .filter(move |c| loc.org() == Some(c.id.org()) && loc.course() == Some(c.id.course()))
    }
}

fn load_course(bundle: CourseBundle, tracker: &mut ErrorTracker) -> Option<FlatCourse> {
    let course_id = bundle.course_id.course_id();
    let root = match bundle.course_id.location() {
        Ok(root) => root,
        Err(e) => {
            tracker.record_failed_course(&bundle.course_dir, LoadError::new("invalid course id", e.to_string()));
            return None;
        }
    };

    let mut items: HashMap<Location, Item> = HashMap::new();
    for mut item in bundle.items {
        let loc = match &item.location {
            ItemKey::Location(loc)
                if loc.is_fully_specified()
                    && loc.org() == Some(bundle.course_id.org())
                    && loc.course() == Some(bundle.course_id.course()) =>
            {
                loc.clone()
            }
            other => {
                tracker.record(&course_id, LoadError::new("item outside course", other.to_string()));
                continue;
            }
        };
        let Ok(loc) = loc.with_revision(None) else {
            continue;
        };
        if items.contains_key(&loc) {
            tracker.record(&course_id, LoadError::new("duplicate location", loc.url()));
            continue;
        }
        item.location = ItemKey::Location(loc.clone());
        items.insert(loc, item);
    }

    if !items.contains_key(&root) {
        tracker.record_failed_course(
            &bundle.course_dir,
            LoadError::new("course root missing", root.url()),
        );
        return None;
    }

    for item in items.values() {
        for child in &item.children {
            let found = child.as_location().is_some_and(|c| items.contains_key(c));
            if !found {
                tracker.record(
                    &course_id,
                    LoadError::new("missing child", format!("{} -> {child}", item.location)),
                );
            }
        }
    }

    Some(FlatCourse {
        id: bundle.course_id,
        root,
        items,
    })
}

fn location_course(course: &CourseId) -> StoreResult<&CourseLocation> {
    course.as_location().ok_or_else(|| {
        StoreError::InvalidOperation(format!("{course} is not a location-addressed course"))
    })
}

impl ModuleStoreRead for LegacyFlatStore {
    fn kind(&self) -> StoreKind {
        StoreKind::LegacyFlat
    }

    fn reference_type(&self) -> ReferenceType {
        ReferenceType::Location
    }

    fn fetch_item(&self, key: &ItemKey) -> StoreResult<Item> {
        let loc = key.concrete_location()?.with_revision(None)?;
        let item = self
            .courses_holding(&loc)
            .find_map(|c| c.items.get(&loc))
            .cloned();
        item.ok_or_else(|| StoreError::ItemNotFound(loc.url()))
    }

    fn get_items(&self, course: &CourseId, query: &ItemQuery) -> StoreResult<Vec<Item>> {
        let course = self.course(course)?;
        let mut items: Vec<Item> = course
            .items
            .values()
            .filter(|item| query.matches(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(items)
    }

    fn get_courses(&self) -> StoreResult<Vec<Item>> {
        Ok(self
            .courses
            .values()
            .filter_map(|c| c.items.get(&c.root).cloned())
            .collect())
    }

    fn get_course(&self, course: &CourseId) -> StoreResult<Item> {
        let course = self.course(course)?;
        course
            .items
            .get(&course.root)
            .cloned()
            .ok_or_else(|| StoreError::ItemNotFound(course.root.url()))
    }

    fn get_parent_locations(&self, key: &ItemKey) -> StoreResult<Vec<ItemKey>> {
        let loc = key.concrete_location()?.with_revision(None)?;
        let target = ItemKey::Location(loc.clone());
        let mut parents: Vec<ItemKey> = self
            .courses_holding(&loc)
            .flat_map(|c| c.items.values())
            .filter(|item| item.children.contains(&target))
            .map(|item| item.location.clone())
            .collect();
        parents.sort();
        Ok(parents)
    }

    fn get_course_errors(&self, course: &CourseId) -> StoreResult<Vec<LoadError>> {
        let id = location_course(course)?;
        Ok(self.tracker.course_errors(&id.course_id()))
    }

    fn get_errored_courses(&self) -> StoreResult<BTreeMap<String, Vec<LoadError>>> {
        Ok(self.tracker.errored_courses().clone())
    }
}
