//! Translation between legacy locations and locators.
//!
//! Each legacy course gets one [`CourseMapEntry`], created on first use and
//! never replaced: it fixes the course's package id and branch names, and
//! accumulates a block map assigning a block id to every `(name, category)`
//! pair that has been translated. Both the entry and each block-map slot are
//! written insert-if-absent, so concurrent first translations agree.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use mstore_keys::{BlockUsageLocator, CourseLocation, CourseLocator, Location};
use mstore_store::error::poisoned;
use mstore_store::split::{DEFAULT_BRANCH, PUBLISHED_BRANCH, ROOT_BLOCK};
use mstore_store::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// `name -> category -> block_id`.
pub type BlockMap = BTreeMap<String, BTreeMap<String, String>>;

/// The persisted translation of one legacy course.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseMapEntry {
    pub course_id: CourseLocation,
    pub org: String,
    pub offering: String,
    pub draft_branch: String,
    pub prod_branch: String,
    #[serde(default)]
    pub block_map: BlockMap,
}

impl CourseMapEntry {
    /// A fresh entry with package id `org+course.run`.
    ///
    /// The course root location (`course` category, named after the run) is
    /// mapped to the root block of a locator-addressed course.
    pub fn for_course(course_id: &CourseLocation) -> Self {
        let mut block_map = BlockMap::new();
        block_map
            .entry(course_id.run().to_string())
            .or_default()
            .insert("course".to_string(), ROOT_BLOCK.to_string());
        Self {
            course_id: course_id.clone(),
            org: course_id.org().to_string(),
            offering: format!("{}.{}", course_id.course(), course_id.run()),
            draft_branch: DEFAULT_BRANCH.to_string(),
            prod_branch: PUBLISHED_BRANCH.to_string(),
            block_map,
        }
    }

    pub fn package_id(&self) -> String {
        format!("{}+{}", self.org, self.offering)
    }

    pub fn branch(&self, published: bool) -> &str {
        if published {
            &self.prod_branch
        } else {
            &self.draft_branch
        }
    }

    /// The course locator on the draft or published branch.
    pub fn course_locator(&self, published: bool) -> StoreResult<CourseLocator> {
        Ok(CourseLocator::from_parts(
            Some(&self.org),
            Some(&self.offering),
            Some(self.branch(published)),
            None,
        )?)
    }

    /// `(name, category)` of the block assigned `block_id`.
    pub fn find_block(&self, block_id: &str) -> Option<(&str, &str)> {
        self.block_map.iter().find_map(|(name, categories)| {
            categories
                .iter()
                .find(|(_, id)| id.as_str() == block_id)
                .map(|(category, _)| (name.as_str(), category.as_str()))
        })
    }

    fn block_id_taken(&self, block_id: &str) -> bool {
        self.block_map
            .values()
            .any(|categories| categories.values().any(|id| id == block_id))
    }

    /// The block id for `(name, category)`, assigning one if absent.
    ///
    /// The name itself is used unless another block already holds it, then
    /// `name_category`, then `name_category_N`.
    pub fn assign_block_id(&mut self, name: &str, category: &str) -> String {
        if let Some(id) = self.block_map.get(name).and_then(|c| c.get(category)) {
            return id.clone();
        }
        let mut candidate = name.to_string();
        if self.block_id_taken(&candidate) {
            candidate = format!("{name}_{category}");
            let base = candidate.clone();
            let mut n = 1;
            while self.block_id_taken(&candidate) {
                candidate = format!("{base}_{n}");
                n += 1;
            }
        }
        self.block_map
            .entry(name.to_string())
            .or_default()
            .insert(category.to_string(), candidate.clone());
        candidate
    }
}

/// Storage for translation entries.
///
/// Implementations must make [`insert_if_absent`](Self::insert_if_absent) and
/// [`block_id`](Self::block_id) atomic: the first writer wins.
pub trait TranslationTable: Send + Sync {
    /// The entry for a legacy course id (`org/course/run`).
    fn get(&self, course_id: &str) -> StoreResult<Option<CourseMapEntry>>;

    /// The entry whose package id is `package_id`.
    fn find_by_package_id(&self, package_id: &str) -> StoreResult<Option<CourseMapEntry>>;

    /// Every entry for courses with this org and course number.
    fn find_by_org_course(&self, org: &str, course: &str) -> StoreResult<Vec<CourseMapEntry>>;

    /// Store `entry` unless one exists for its course id; returns the stored
    /// entry. A package id already used by another course is made unique.
    fn insert_if_absent(&self, entry: CourseMapEntry) -> StoreResult<CourseMapEntry>;

    /// The block id of `(name, category)` in `course_id`'s entry, assigning
    /// one when `create` is set.
    fn block_id(
        &self,
        course_id: &str,
        name: &str,
        category: &str,
        create: bool,
    ) -> StoreResult<Option<String>>;
}

/// In-memory [`TranslationTable`].
#[derive(Debug, Default)]
pub struct InMemoryTranslationTable {
    entries: RwLock<BTreeMap<String, CourseMapEntry>>,
}

impl InMemoryTranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl TranslationTable for InMemoryTranslationTable {
    fn get(&self, course_id: &str) -> StoreResult<Option<CourseMapEntry>> {
        Ok(self.entries.read().map_err(poisoned)?.get(course_id).cloned())
    }

    fn find_by_package_id(&self, package_id: &str) -> StoreResult<Option<CourseMapEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.values().find(|e| e.package_id() == package_id).cloned())
    }

    fn find_by_org_course(&self, org: &str, course: &str) -> StoreResult<Vec<CourseMapEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .values()
            .filter(|e| e.course_id.org() == org && e.course_id.course() == course)
            .cloned()
            .collect())
    }

    fn insert_if_absent(&self, mut entry: CourseMapEntry) -> StoreResult<CourseMapEntry> {
        let key = entry.course_id.course_id();
        let mut entries = self.entries.write().map_err(poisoned)?;
        if let Some(existing) = entries.get(&key) {
            return Ok(existing.clone());
        }
        let base = entry.offering.clone();
        let mut n = 1;
        while entries.values().any(|e| e.package_id() == entry.package_id()) {
            entry.offering = format!("{base}_{n}");
            n += 1;
        }
        debug!(course = %key, package_id = %entry.package_id(), "created translation entry");
        entries.insert(key, entry.clone());
        Ok(entry)
    }

    fn block_id(
        &self,
        course_id: &str,
        name: &str,
        category: &str,
        create: bool,
    ) -> StoreResult<Option<String>> {
        if !create {
            let entries = self.entries.read().map_err(poisoned)?;
            return Ok(entries
                .get(course_id)
                .and_then(|e| e.block_map.get(name))
                .and_then(|c| c.get(category))
                .cloned());
        }
        let mut entries = self.entries.write().map_err(poisoned)?;
        let entry = entries
            .get_mut(course_id)
            .ok_or_else(|| StoreError::ItemNotFound(course_id.to_string()))?;
        Ok(Some(entry.assign_block_id(name, category)))
    }
}

/// Translates keys through a shared [`TranslationTable`].
#[derive(Clone)]
pub struct LocMapper {
    table: Arc<dyn TranslationTable>,
}

impl LocMapper {
    pub fn new(table: Arc<dyn TranslationTable>) -> Self {
        Self { table }
    }

    /// A mapper over a fresh in-memory table.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryTranslationTable::new()))
    }

    pub fn table(&self) -> &dyn TranslationTable {
        self.table.as_ref()
    }

    /// The usage locator for a legacy location.
    ///
    /// `course_id` may be omitted when it can be inferred: a `course`
    /// location names its own run, otherwise the entry must be the only one
    /// for the location's org and course. Missing entries and block ids are
    /// created when `add_entry_if_missing` is set, else the call fails with
    /// [`StoreError::ItemNotFound`].
    pub fn translate_location(
        &self,
        course_id: Option<&CourseLocation>,
        location: &Location,
        published: bool,
        add_entry_if_missing: bool,
    ) -> StoreResult<BlockUsageLocator> {
        let (name, category) = match (location.name(), location.category()) {
            (Some(name), Some(category)) if location.is_fully_specified() => (name, category),
            _ => return Err(StoreError::InsufficientSpecification(location.to_string())),
        };
        let entry = match self.find_entry(course_id, location)? {
            Some(entry) => entry,
            None if add_entry_if_missing => {
                let course_id = match course_id {
                    Some(id) => id.clone(),
                    None => location.course_id().map_err(|_| {
                        StoreError::InsufficientSpecification(format!(
                            "cannot infer the course of {location}"
                        ))
                    })?,
                };
                self.table.insert_if_absent(CourseMapEntry::for_course(&course_id))?
            }
            None => return Err(StoreError::ItemNotFound(location.url())),
        };
        let block_id = self
            .table
            .block_id(&entry.course_id.course_id(), name, category, add_entry_if_missing)?
            .ok_or_else(|| StoreError::ItemNotFound(location.url()))?;
        let locator = BlockUsageLocator::make_relative(&entry.course_locator(published)?, &block_id)?;
        debug!(location = %location, locator = %locator, "translated location");
        Ok(locator)
    }

    /// The course locator for a legacy course id, or for the course of
    /// `location` when no id is given. Never creates entries.
    pub fn translate_location_to_course_locator(
        &self,
        course_id: Option<&CourseLocation>,
        location: Option<&Location>,
        published: bool,
    ) -> StoreResult<CourseLocator> {
        let entry = match (course_id, location) {
            (Some(id), _) => self.table.get(&id.course_id())?,
            (None, Some(location)) => self.find_entry(None, location)?,
            (None, None) => {
                return Err(StoreError::InsufficientSpecification(
                    "a course id or location is required".into(),
                ))
            }
        };
        let entry = entry.ok_or_else(|| {
            let what = course_id
                .map(CourseLocation::course_id)
                .or_else(|| location.map(Location::url))
                .unwrap_or_default();
            StoreError::ItemNotFound(what)
        })?;
        entry.course_locator(published)
    }

    /// The legacy location a usage locator was translated from, if any.
    pub fn translate_locator_to_location(
        &self,
        locator: &BlockUsageLocator,
    ) -> StoreResult<Option<Location>> {
        let Some(package_id) = locator.package_id() else {
            return Ok(None);
        };
        let Some(entry) = self.table.find_by_package_id(&package_id)? else {
            return Ok(None);
        };
        let Some((name, category)) = entry.find_block(locator.block_id()) else {
            return Ok(None);
        };
        Ok(Some(entry.course_id.make_usage_key(category, name)?))
    }

    /// The legacy course id a course locator was translated from, if any.
    pub fn translate_locator_to_course_id(
        &self,
        locator: &CourseLocator,
    ) -> StoreResult<Option<CourseLocation>> {
        let Some(package_id) = locator.package_id() else {
            return Ok(None);
        };
        Ok(self
            .table
            .find_by_package_id(&package_id)?
            .map(|entry| entry.course_id))
    }

    fn find_entry(
        &self,
        course_id: Option<&CourseLocation>,
        location: &Location,
    ) -> StoreResult<Option<CourseMapEntry>> {
        if let Some(id) = course_id {
            return self.table.get(&id.course_id());
        }
        if let Ok(id) = location.course_id() {
            return self.table.get(&id.course_id());
        }
        let (Some(org), Some(course)) = (location.org(), location.course()) else {
            return Ok(None);
        };
        let mut candidates = self.table.find_by_org_course(org, course)?;
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.pop()),
            _ => Err(StoreError::InsufficientSpecification(format!(
                "{location} matches several courses; a course id is required"
            ))),
        }
    }
}

impl std::fmt::Debug for LocMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocMapper").finish_non_exhaustive()
    }
}
