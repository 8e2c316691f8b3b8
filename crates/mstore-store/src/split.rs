//! Locator-addressed store keeping a version tree per course.
//!
//! A course index maps branch names to head versions. Each version is an
//! immutable structure (the block graph plus per-block settings) stored under
//! a content-addressed [`VersionGuid`]; block content lives in definitions,
//! also content-addressed, so unchanged content is shared between versions.
//!
//! Every write produces a new structure whose `previous_version` is the
//! version it was based on. A write pinned to a version that is no longer the
//! branch head fails with [`StoreError::VersionConflict`] unless forced; a
//! forced write forks, storing the new structure without moving the head.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use mstore_keys::{
    BlockUsageLocator, CourseId, CourseLocator, DefinitionLocator, VersionGuid, VersionTree,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{poisoned, StoreError, StoreResult};
use crate::item::{DeleteOptions, Fields, Item, ItemKey, ItemQuery, NewItem};
use crate::traits::{ModuleStoreRead, ModuleStoreWrite, ReferenceType, StoreKind};

/// Branch used when a locator names none.
pub const DEFAULT_BRANCH: &str = "draft";
/// Branch holding the published version.
pub const PUBLISHED_BRANCH: &str = "published";
/// Block id of every course root.
pub const ROOT_BLOCK: &str = "course";
/// Field stored in the definition rather than the structure.
pub const CONTENT_FIELD: &str = "data";

/// A course-independent content body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub category: String,
    pub data: Value,
}

impl Definition {
    fn guid(&self) -> StoreResult<VersionGuid> {
        Ok(VersionGuid::derive("definition", &serde_json::to_vec(self)?))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct BlockEntry {
    category: String,
    definition: VersionGuid,
    fields: Fields,
    children: Vec<String>,
    edited_by: Option<String>,
    edited_on: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Structure {
    package_id: String,
    root: String,
    previous_version: Option<VersionGuid>,
    blocks: BTreeMap<String, BlockEntry>,
    edited_by: String,
    edited_on: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct CourseIndex {
    org: String,
    offering: String,
    heads: BTreeMap<String, VersionGuid>,
}

type Blocks = BTreeMap<String, BlockEntry>;
type Definitions = HashMap<VersionGuid, Definition>;

/// In-memory version-tree store.
///
/// Locks are always taken in the order indexes, structures, definitions.
#[derive(Debug, Default)]
pub struct SplitStore {
    indexes: RwLock<HashMap<String, CourseIndex>>,
    structures: RwLock<HashMap<VersionGuid, Structure>>,
    definitions: RwLock<Definitions>,
}

impl SplitStore {
    pub fn new() -> Self {
        info!("created split store");
        Self::default()
    }

    /// Move `dest_branch`'s head to the head of `source`'s branch.
    ///
    /// Returns the destination locator pinned to the published version.
    pub fn publish(&self, source: &CourseLocator, dest_branch: &str) -> StoreResult<CourseLocator> {
        let package_id = require_package_id(source)?;
        let branch = source.branch().unwrap_or(DEFAULT_BRANCH);
        let mut indexes = self.indexes.write().map_err(poisoned)?;
        let index = indexes
            .get_mut(&package_id)
            .ok_or_else(|| StoreError::ItemNotFound(package_id.clone()))?;
        let head = *index
            .heads
            .get(branch)
            .ok_or_else(|| StoreError::ItemNotFound(format!("{package_id} branch {branch}")))?;
        index.heads.insert(dest_branch.to_string(), head);
        debug!(course = %package_id, from = branch, to = dest_branch, version = %head, "published branch");
        Ok(CourseLocator::from_parts(
            Some(&index.org),
            Some(&index.offering),
            Some(dest_branch),
            Some(head),
        )?)
    }

    /// Versions of the course from the current (or pinned) version back to
    /// the first, newest first.
    pub fn version_history(&self, course: &CourseLocator) -> StoreResult<Vec<CourseLocator>> {
        let (pinned, mut version) = self.resolve(course)?;
        let structures = self.structures.read().map_err(poisoned)?;
        let mut history = Vec::new();
        loop {
            history.push(pinned.for_version(version));
            match structures.get(&version).and_then(|s| s.previous_version) {
                Some(previous) => version = previous,
                None => break,
            }
        }
        Ok(history)
    }

    /// Every version derived from the course's current (or pinned) version.
    pub fn version_tree(&self, course: &CourseLocator) -> StoreResult<VersionTree> {
        let (pinned, version) = self.resolve(course)?;
        let structures = self.structures.read().map_err(poisoned)?;
        let package_id = structures
            .get(&version)
            .map(|s| s.package_id.clone())
            .ok_or_else(|| StoreError::ItemNotFound(version.to_hex()))?;
        let mut successors: HashMap<VersionGuid, Vec<VersionGuid>> = HashMap::new();
        for (guid, structure) in structures.iter() {
            if structure.package_id != package_id {
                continue;
            }
            if let Some(previous) = structure.previous_version {
                successors.entry(previous).or_default().push(*guid);
            }
        }
        for children in successors.values_mut() {
            children.sort_by_key(|guid| structures.get(guid).map(|s| s.edited_on));
        }
        Ok(VersionTree::new(pinned.for_version(version), &successors)?)
    }

    /// The content body named by `definition`.
    pub fn get_definition(&self, definition: &DefinitionLocator) -> StoreResult<Definition> {
        let guid = definition
            .version()
            .ok_or_else(|| StoreError::ItemNotFound(definition.to_string()))?;
        let definitions = self.definitions.read().map_err(poisoned)?;
        definitions
            .get(&guid)
            .cloned()
            .ok_or_else(|| StoreError::ItemNotFound(definition.to_string()))
    }

    /// The course pinned to the version a read should see, plus that version.
    fn resolve(&self, course: &CourseLocator) -> StoreResult<(CourseLocator, VersionGuid)> {
        if let Some(version) = course.version_guid() {
            let structures = self.structures.read().map_err(poisoned)?;
            if !structures.contains_key(&version) {
                return Err(StoreError::ItemNotFound(course.to_string()));
            }
            return Ok((course.clone(), version));
        }
        let package_id = require_package_id(course)?;
        let branch = course.branch().unwrap_or(DEFAULT_BRANCH);
        let indexes = self.indexes.read().map_err(poisoned)?;
        let head = indexes
            .get(&package_id)
            .and_then(|index| index.heads.get(branch))
            .copied()
            .ok_or_else(|| StoreError::ItemNotFound(course.to_string()))?;
        let pinned = CourseLocator::from_parts(course.org(), course.offering(), Some(branch), Some(head))?;
        Ok((pinned, head))
    }

    fn read_structure<T>(
        &self,
        course: &CourseLocator,
        f: impl FnOnce(&CourseLocator, &Structure, &Definitions) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let (pinned, version) = self.resolve(course)?;
        let structures = self.structures.read().map_err(poisoned)?;
        let definitions = self.definitions.read().map_err(poisoned)?;
        let structure = structures
            .get(&version)
            .ok_or_else(|| StoreError::Internal(format!("missing structure {version}")))?;
        f(&pinned, structure, &*definitions)
    }

    /// Apply `f` to a copy of the blocks of the version `course` names and
    /// store the result as a new version.
    ///
    /// Returns `f`'s result and the course pinned to the new version.
    fn write<T>(
        &self,
        course: &CourseLocator,
        user: &str,
        force: bool,
        f: impl FnOnce(&CourseLocator, &mut Blocks, &mut Definitions) -> StoreResult<T>,
    ) -> StoreResult<(T, CourseLocator)> {
        let package_id = require_package_id(course)?;
        let branch = course.branch().unwrap_or(DEFAULT_BRANCH).to_string();
        let mut indexes = self.indexes.write().map_err(poisoned)?;
        let mut structures = self.structures.write().map_err(poisoned)?;
        let mut definitions = self.definitions.write().map_err(poisoned)?;

        let index = indexes
            .get_mut(&package_id)
            .ok_or_else(|| StoreError::ItemNotFound(package_id.clone()))?;
        let head = *index
            .heads
            .get(&branch)
            .ok_or_else(|| StoreError::ItemNotFound(format!("{package_id} branch {branch}")))?;
        let base = match course.version_guid() {
            Some(pinned) if pinned != head && !force => {
                return Err(StoreError::VersionConflict {
                    course: package_id,
                    expected: pinned.to_hex(),
                    actual: head.to_hex(),
                });
            }
            Some(pinned) => pinned,
            None => head,
        };
        let old = structures
            .get(&base)
            .ok_or_else(|| StoreError::ItemNotFound(format!("{package_id} version {base}")))?;

        let base_course = CourseLocator::from_parts(
            Some(&index.org),
            Some(&index.offering),
            Some(&branch),
            Some(base),
        )?;
        let mut blocks = old.blocks.clone();
        let root = old.root.clone();
        let result = f(&base_course, &mut blocks, &mut *definitions)?;

        let structure = Structure {
            package_id: package_id.clone(),
            root,
            previous_version: Some(base),
            blocks,
            edited_by: user.to_string(),
            edited_on: Utc::now(),
        };
        let version = VersionGuid::derive("structure", &serde_json::to_vec(&structure)?);
        structures.insert(version, structure);
        if base == head {
            index.heads.insert(branch.clone(), version);
            debug!(course = %package_id, branch = %branch, version = %version, "moved branch head");
        } else {
            debug!(course = %package_id, base = %base, version = %version, "forked version");
        }
        Ok((result, base_course.for_version(version)))
    }
}

fn require_package_id(course: &CourseLocator) -> StoreResult<String> {
    course.package_id().ok_or_else(|| {
        StoreError::InsufficientSpecification(format!("{course} does not name a package id"))
    })
}

fn locator_course(course: &CourseId) -> StoreResult<&CourseLocator> {
    course.as_locator().ok_or_else(|| {
        StoreError::InvalidOperation(format!("{course} is not a locator-addressed course"))
    })
}

fn child_block_ids(children: &[ItemKey]) -> StoreResult<Vec<String>> {
    children
        .iter()
        .map(|child| Ok(child.locator()?.block_id().to_string()))
        .collect()
}

/// Split `fields` into structure settings and a definition.
fn store_entry(
    category: &str,
    mut fields: Fields,
    children: Vec<String>,
    user: &str,
    definitions: &mut Definitions,
) -> StoreResult<BlockEntry> {
    let definition = Definition {
        category: category.to_string(),
        data: fields.remove(CONTENT_FIELD).unwrap_or(Value::Null),
    };
    let guid = definition.guid()?;
    definitions.entry(guid).or_insert(definition);
    Ok(BlockEntry {
        category: category.to_string(),
        definition: guid,
        fields,
        children,
        edited_by: Some(user.to_string()),
        edited_on: Some(Utc::now()),
    })
}

fn to_item(
    course: &CourseLocator,
    block_id: &str,
    entry: &BlockEntry,
    definitions: &Definitions,
) -> StoreResult<Item> {
    let location = BlockUsageLocator::make_relative(course, block_id)?;
    let mut item = Item::new(location, entry.category.clone());
    item.fields = entry.fields.clone();
    if let Some(definition) = definitions.get(&entry.definition) {
        if !definition.data.is_null() {
            item.fields.insert(CONTENT_FIELD.to_string(), definition.data.clone());
        }
    }
    item.children = entry
        .children
        .iter()
        .map(|child| Ok(BlockUsageLocator::make_relative(course, child)?.into()))
        .collect::<StoreResult<Vec<ItemKey>>>()?;
    item.definition = Some(DefinitionLocator::persisted(entry.definition));
    item.edited_by = entry.edited_by.clone();
    item.edited_on = entry.edited_on;
    Ok(item)
}

/// Whether `target` is one of `children` or below them.
fn block_reaches(blocks: &Blocks, children: &[String], target: &str) -> bool {
    let mut seen = HashSet::new();
    let mut pending: Vec<&str> = children.iter().map(String::as_str).collect();
    while let Some(block_id) = pending.pop() {
        if block_id == target {
            return true;
        }
        if !seen.insert(block_id) {
            continue;
        }
        if let Some(entry) = blocks.get(block_id) {
            pending.extend(entry.children.iter().map(String::as_str));
        }
    }
    false
}

/// The branch a course is listed under: the default branch, else the
/// published one, else the first by name.
fn listed_branch(index: &CourseIndex) -> Option<&str> {
    [DEFAULT_BRANCH, PUBLISHED_BRANCH]
        .into_iter()
        .find(|branch| index.heads.contains_key(*branch))
        .or_else(|| index.heads.keys().next().map(String::as_str))
}

fn remove_block(blocks: &mut Blocks, block_id: &str, with_children: bool) {
    let Some(entry) = blocks.remove(block_id) else {
        return;
    };
    for entry in blocks.values_mut() {
        entry.children.retain(|c| c != block_id);
    }
    if with_children {
        for child in entry.children {
            remove_block(blocks, &child, true);
        }
    }
}

impl ModuleStoreRead for SplitStore {
    fn kind(&self) -> StoreKind {
        StoreKind::SplitVersioned
    }

    fn reference_type(&self) -> ReferenceType {
        ReferenceType::Locator
    }

    fn fetch_item(&self, key: &ItemKey) -> StoreResult<Item> {
        let usage = key.locator()?;
        self.read_structure(&usage.course_key(), |course, structure, definitions| {
            let entry = structure
                .blocks
                .get(usage.block_id())
                .ok_or_else(|| StoreError::ItemNotFound(usage.to_string()))?;
            to_item(course, usage.block_id(), entry, definitions)
        })
    }

    fn get_items(&self, course: &CourseId, query: &ItemQuery) -> StoreResult<Vec<Item>> {
        self.read_structure(locator_course(course)?, |course, structure, definitions| {
            let mut items = Vec::new();
            for (block_id, entry) in &structure.blocks {
                let item = to_item(course, block_id, entry, definitions)?;
                if query.matches(&item) {
                    items.push(item);
                }
            }
            Ok(items)
        })
    }

    fn get_courses(&self) -> StoreResult<Vec<Item>> {
        let courses: Vec<CourseLocator> = {
            let indexes = self.indexes.read().map_err(poisoned)?;
            let mut ids: Vec<&CourseIndex> = indexes.values().collect();
            ids.sort_by(|a, b| (&a.org, &a.offering).cmp(&(&b.org, &b.offering)));
            ids.into_iter()
                .filter_map(|index| listed_branch(index).map(|branch| (index, branch)))
                .map(|(index, branch)| {
                    CourseLocator::from_parts(
                        Some(&index.org),
                        Some(&index.offering),
                        Some(branch),
                        None,
                    )
                })
                .collect::<Result<_, _>>()?
        };
        courses
            .iter()
            .map(|course| self.get_course(&CourseId::Locator(course.clone())))
            .collect()
    }

    fn get_course(&self, course: &CourseId) -> StoreResult<Item> {
        self.read_structure(locator_course(course)?, |course, structure, definitions| {
            let entry = structure
                .blocks
                .get(&structure.root)
                .ok_or_else(|| StoreError::Internal(format!("{course} has no root block")))?;
            to_item(course, &structure.root, entry, definitions)
        })
    }

    fn get_parent_locations(&self, key: &ItemKey) -> StoreResult<Vec<ItemKey>> {
        let usage = key.locator()?;
        self.read_structure(&usage.course_key(), |course, structure, _| {
            structure
                .blocks
                .iter()
                .filter(|(_, entry)| entry.children.iter().any(|c| c == usage.block_id()))
                .map(|(block_id, _)| Ok(BlockUsageLocator::make_relative(course, block_id)?.into()))
                .collect()
        })
    }
}

impl ModuleStoreWrite for SplitStore {
    fn create_course(&self, course: &CourseId, user: &str, fields: Fields) -> StoreResult<Item> {
        let course = locator_course(course)?;
        let package_id = require_package_id(course)?;
        let (org, offering) = match (course.org(), course.offering()) {
            (Some(org), Some(offering)) => (org.to_string(), offering.to_string()),
            _ => return Err(StoreError::InsufficientSpecification(course.to_string())),
        };
        let branch = course.branch().unwrap_or(DEFAULT_BRANCH);

        let mut indexes = self.indexes.write().map_err(poisoned)?;
        let mut structures = self.structures.write().map_err(poisoned)?;
        let mut definitions = self.definitions.write().map_err(poisoned)?;
        if indexes.contains_key(&package_id) {
            return Err(StoreError::DuplicateCourse(package_id));
        }

        let root = store_entry("course", fields, Vec::new(), user, &mut definitions)?;
        let mut blocks = Blocks::new();
        blocks.insert(ROOT_BLOCK.to_string(), root.clone());
        let structure = Structure {
            package_id: package_id.clone(),
            root: ROOT_BLOCK.to_string(),
            previous_version: None,
            blocks,
            edited_by: user.to_string(),
            edited_on: Utc::now(),
        };
        let version = VersionGuid::derive("structure", &serde_json::to_vec(&structure)?);
        structures.insert(version, structure);
        let mut heads = BTreeMap::new();
        heads.insert(branch.to_string(), version);
        indexes.insert(
            package_id.clone(),
            CourseIndex {
                org: org.clone(),
                offering: offering.clone(),
                heads,
            },
        );
        info!(course = %package_id, version = %version, "created course");

        let pinned = CourseLocator::from_parts(Some(&org), Some(&offering), Some(branch), Some(version))?;
        to_item(&pinned, ROOT_BLOCK, &root, &definitions)
    }

    fn create_item(
        &self,
        course: &CourseId,
        parent: Option<&ItemKey>,
        new: NewItem,
        user: &str,
    ) -> StoreResult<Item> {
        let course = locator_course(course)?;
        let block_id = new.block_id_or_generate();
        let parent_block = parent
            .map(|p| p.locator().map(|l| l.block_id().to_string()))
            .transpose()?;
        let (entry, new_course) = self.write(course, user, false, |base, blocks, definitions| {
            BlockUsageLocator::make_relative(base, &block_id)?;
            if blocks.contains_key(&block_id) {
                return Err(StoreError::DuplicateItem(format!("{base}/block/{block_id}")));
            }
            if let Some(parent) = &parent_block {
                let parent_entry = blocks
                    .get_mut(parent)
                    .ok_or_else(|| StoreError::ItemNotFound(format!("{base}/block/{parent}")))?;
                parent_entry.children.push(block_id.clone());
            }
            let entry = store_entry(&new.category, new.fields, Vec::new(), user, definitions)?;
            blocks.insert(block_id.clone(), entry.clone());
            Ok(entry)
        })?;
        let definitions = self.definitions.read().map_err(poisoned)?;
        let item = to_item(&new_course, &block_id, &entry, &definitions)?;
        debug!(location = %item.location, "created item");
        Ok(item)
    }

    fn update_item(
        &self,
        item: &Item,
        user: &str,
        allow_not_found: bool,
        force: bool,
    ) -> StoreResult<Item> {
        let usage = item.location.locator()?;
        let block_id = usage.block_id().to_string();
        let children = child_block_ids(&item.children)?;
        let (entry, version_course) = self.write(&usage.course_key(), user, force, |base, blocks, definitions| {
            if !allow_not_found && !blocks.contains_key(&block_id) {
                return Err(StoreError::ItemNotFound(format!("{base}/block/{block_id}")));
            }
            if block_reaches(blocks, &children, &block_id) {
                return Err(StoreError::InvalidOperation(format!(
                    "{base}/block/{block_id} cannot be its own descendant"
                )));
            }
            let entry = store_entry(&item.category, item.fields.clone(), children, user, definitions)?;
            blocks.insert(block_id.clone(), entry.clone());
            Ok(entry)
        })?;
        let definitions = self.definitions.read().map_err(poisoned)?;
        to_item(&version_course, &block_id, &entry, &definitions)
    }

    fn delete_item(&self, key: &ItemKey, user: &str, options: DeleteOptions) -> StoreResult<()> {
        let usage = key.locator()?;
        let block_id = usage.block_id();
        self.write(&usage.course_key(), user, options.force, |base, blocks, _| {
            if block_id == ROOT_BLOCK {
                return Err(StoreError::InvalidOperation(format!(
                    "cannot delete the root of {base}"
                )));
            }
            if !blocks.contains_key(block_id) {
                return Err(StoreError::ItemNotFound(usage.to_string()));
            }
            remove_block(blocks, block_id, options.delete_children);
            Ok(())
        })?;
        debug!(location = %usage, "deleted item");
        Ok(())
    }
}
