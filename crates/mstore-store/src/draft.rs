//! Location-addressed store with a draft revision overlaying the published
//! one.
//!
//! Reads prefer the draft copy of an item and fall back to the published
//! copy. Writes land on the draft (copied from the published item on first
//! edit), except for direct-only categories which are always published.
//! Returned items always carry the published location; `is_draft` tells
//! which copy was read.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use mstore_keys::{CourseId, CourseLocation, Location};
use tracing::{debug, info};

use crate::error::{poisoned, StoreError, StoreResult};
use crate::item::{DeleteOptions, Fields, Item, ItemKey, ItemQuery, NewItem};
use crate::traits::{ModuleStoreRead, ModuleStoreWrite, ReferenceType, StoreKind};

/// Revision marking a draft copy.
pub const DRAFT: &str = "draft";

/// Categories that are never stored as drafts.
pub const DIRECT_ONLY_CATEGORIES: &[&str] = &[
    "course",
    "chapter",
    "sequential",
    "about",
    "static_tab",
    "course_info",
];

type ItemMap = HashMap<Location, Item>;

/// In-memory draft/publish store.
#[derive(Debug, Default)]
pub struct DraftStore {
    items: RwLock<ItemMap>,
}

impl DraftStore {
    pub fn new() -> Self {
        info!("created draft store");
        Self::default()
    }

    /// Copy the current draft over the published item and drop the draft.
    ///
    /// Children present in the old published item but gone from the draft
    /// are deleted when this item was their only parent.
    pub fn publish(&self, key: &ItemKey, user: &str) -> StoreResult<Item> {
        let published = as_published(key.concrete_location()?)?;
        let draft = as_draft(&published)?;
        let mut map = self.items.write().map_err(poisoned)?;

        let mut item = map
            .get(&draft)
            .or_else(|| map.get(&published))
            .cloned()
            .ok_or_else(|| StoreError::ItemNotFound(published.url()))?;

        if let Some(old) = map.get(&published).cloned() {
            let this = ItemKey::Location(published.clone());
            for child in old.children.iter().filter(|c| !item.children.contains(c)) {
                let parents = parents_in_any_copy(&map, child);
                if parents.len() == 1 && parents[0] == this {
                    if let Ok(child_loc) = child.concrete_location() {
                        debug!(child = %child_loc, "deleting child dropped by publish");
                        remove_all(&mut map, &as_published(child_loc)?)?;
                    }
                }
            }
        }

        item.is_draft = false;
        item.stamp(user);
        map.insert(published.clone(), item.clone());
        map.remove(&draft);
        debug!(location = %published, "published");
        Ok(item)
    }

    /// Turn the published item into a draft, removing the published copy.
    pub fn unpublish(&self, key: &ItemKey) -> StoreResult<Item> {
        let published = as_published(key.concrete_location()?)?;
        let mut map = self.items.write().map_err(poisoned)?;
        let item = convert_to_draft_locked(&mut map, &published)?;
        map.remove(&published);
        Ok(item)
    }

    /// Create a draft copy of the published item.
    pub fn convert_to_draft(&self, key: &ItemKey) -> StoreResult<Item> {
        let published = as_published(key.concrete_location()?)?;
        let mut map = self.items.write().map_err(poisoned)?;
        convert_to_draft_locked(&mut map, &published)
    }

    fn effective_items(&self, course: &CourseLocation) -> StoreResult<Vec<Item>> {
        let map = self.items.read().map_err(poisoned)?;
        Ok(effective(&map, |loc| {
            loc.org() == Some(course.org()) && loc.course() == Some(course.course())
        }))
    }
}

fn as_draft(loc: &Location) -> StoreResult<Location> {
    Ok(loc.with_revision(Some(DRAFT))?)
}

fn as_published(loc: &Location) -> StoreResult<Location> {
    Ok(loc.with_revision(None)?)
}

fn is_direct_only(category: &str) -> bool {
    DIRECT_ONLY_CATEGORIES.contains(&category)
}

fn location_course(course: &CourseId) -> StoreResult<&CourseLocation> {
    course.as_location().ok_or_else(|| {
        StoreError::InvalidOperation(format!("{course} is not a location-addressed course"))
    })
}

/// Draft-over-published view of every item whose location satisfies `keep`.
fn effective(map: &ItemMap, keep: impl Fn(&Location) -> bool) -> Vec<Item> {
    let mut view: BTreeMap<Location, Item> = BTreeMap::new();
    for (loc, item) in map.iter().filter(|(loc, _)| keep(loc)) {
        let Ok(base) = loc.with_revision(None) else {
            continue;
        };
        let is_draft = loc.revision() == Some(DRAFT);
        if is_draft || !view.contains_key(&base) {
            view.insert(base, item.clone());
        }
    }
    view.into_values().collect()
}

fn lookup(map: &ItemMap, published: &Location) -> StoreResult<Option<Item>> {
    let draft = as_draft(published)?;
    Ok(map.get(&draft).or_else(|| map.get(published)).cloned())
}

fn parents_of(map: &ItemMap, child: &ItemKey) -> Vec<ItemKey> {
    effective(map, |_| true)
        .into_iter()
        .filter(|item| item.children.contains(child))
        .map(|item| item.location)
        .collect()
}

/// Parents of `child` counting both draft and published copies.
fn parents_in_any_copy(map: &ItemMap, child: &ItemKey) -> Vec<ItemKey> {
    let mut parents: Vec<ItemKey> = map
        .values()
        .filter(|item| item.children.contains(child))
        .map(|item| item.location.clone())
        .collect();
    parents.sort();
    parents.dedup();
    parents
}

/// Whether `target` is `children` or one of their descendants.
fn reaches(map: &ItemMap, children: &[ItemKey], target: &Location) -> StoreResult<bool> {
    let mut seen = HashSet::new();
    let mut pending: Vec<ItemKey> = children.to_vec();
    while let Some(key) = pending.pop() {
        let Ok(location) = key.concrete_location() else {
            continue;
        };
        let location = as_published(location)?;
        if location == *target {
            return Ok(true);
        }
        if !seen.insert(location.clone()) {
            continue;
        }
        if let Some(child) = lookup(map, &location)? {
            pending.extend(child.children);
        }
    }
    Ok(false)
}

/// Write `item` to the copy its category calls for.
fn write_item(map: &mut ItemMap, mut item: Item, user: &str) -> StoreResult<Item> {
    let published = as_published(item.location.concrete_location()?)?;
    item.location = ItemKey::Location(published.clone());
    item.stamp(user);
    if is_direct_only(&item.category) {
        item.is_draft = false;
        map.insert(published, item.clone());
    } else {
        item.is_draft = true;
        map.insert(as_draft(&published)?, item.clone());
    }
    Ok(item)
}

fn remove_all(map: &mut ItemMap, published: &Location) -> StoreResult<()> {
    map.remove(&as_draft(published)?);
    map.remove(published);
    let key = ItemKey::Location(published.clone());
    for item in map.values_mut() {
        item.children.retain(|c| *c != key);
    }
    Ok(())
}

fn convert_to_draft_locked(map: &mut ItemMap, published: &Location) -> StoreResult<Item> {
    let draft = as_draft(published)?;
    let category = published.category().unwrap_or_default();
    if is_direct_only(category) {
        return Err(StoreError::InvalidOperation(format!(
            "{category} items cannot be drafts"
        )));
    }
    let mut item = map
        .get(published)
        .cloned()
        .ok_or_else(|| StoreError::ItemNotFound(published.url()))?;
    if map.contains_key(&draft) {
        return Err(StoreError::DuplicateItem(draft.url()));
    }
    item.is_draft = true;
    map.insert(draft, item.clone());
    Ok(item)
}

impl ModuleStoreRead for DraftStore {
    fn kind(&self) -> StoreKind {
        StoreKind::DraftVersioned
    }

    fn reference_type(&self) -> ReferenceType {
        ReferenceType::Location
    }

    fn fetch_item(&self, key: &ItemKey) -> StoreResult<Item> {
        let published = as_published(key.concrete_location()?)?;
        let map = self.items.read().map_err(poisoned)?;
        lookup(&map, &published)?.ok_or_else(|| StoreError::ItemNotFound(published.url()))
    }

    fn get_items(&self, course: &CourseId, query: &ItemQuery) -> StoreResult<Vec<Item>> {
        let course = location_course(course)?;
        Ok(self
            .effective_items(course)?
            .into_iter()
            .filter(|item| query.matches(item))
            .collect())
    }

    fn get_courses(&self) -> StoreResult<Vec<Item>> {
        let map = self.items.read().map_err(poisoned)?;
        Ok(effective(&map, |loc| loc.category() == Some("course")))
    }

    fn get_course(&self, course: &CourseId) -> StoreResult<Item> {
        let root = location_course(course)?.location()?;
        self.fetch_item(&ItemKey::Location(root))
    }

    fn get_parent_locations(&self, key: &ItemKey) -> StoreResult<Vec<ItemKey>> {
        let published = as_published(key.concrete_location()?)?;
        let map = self.items.read().map_err(poisoned)?;
        Ok(parents_of(&map, &ItemKey::Location(published)))
    }
}

impl ModuleStoreWrite for DraftStore {
    fn create_course(&self, course: &CourseId, user: &str, fields: Fields) -> StoreResult<Item> {
        let course = location_course(course)?;
        let root = course.location()?;
        let mut map = self.items.write().map_err(poisoned)?;
        if lookup(&map, &root)?.is_some() {
            return Err(StoreError::DuplicateCourse(course.course_id()));
        }
        let mut item = Item::at_location(root)?;
        item.fields = fields;
        let item = write_item(&mut map, item, user)?;
        info!(course = %course, "created course");
        Ok(item)
    }

    fn create_item(
        &self,
        course: &CourseId,
        parent: Option<&ItemKey>,
        new: NewItem,
        user: &str,
    ) -> StoreResult<Item> {
        let course = location_course(course)?;
        let location = course.make_usage_key(&new.category, &new.block_id_or_generate())?;
        let mut map = self.items.write().map_err(poisoned)?;
        if lookup(&map, &location)?.is_some() {
            return Err(StoreError::DuplicateItem(location.url()));
        }
        let parent_item = match parent {
            Some(parent) => {
                let parent_loc = as_published(parent.concrete_location()?)?;
                let found = lookup(&map, &parent_loc)?
                    .ok_or_else(|| StoreError::ItemNotFound(parent_loc.url()))?;
                Some(found)
            }
            None => None,
        };

        let mut item = Item::at_location(location.clone())?;
        item.fields = new.fields;
        let item = write_item(&mut map, item, user)?;
        if let Some(mut parent_item) = parent_item {
            parent_item.children.push(ItemKey::Location(location));
            write_item(&mut map, parent_item, user)?;
        }
        debug!(location = %item.location, "created item");
        Ok(item)
    }

    fn update_item(
        &self,
        item: &Item,
        user: &str,
        allow_not_found: bool,
        _force: bool,
    ) -> StoreResult<Item> {
        let published = as_published(item.location.concrete_location()?)?;
        let mut map = self.items.write().map_err(poisoned)?;
        if !allow_not_found && lookup(&map, &published)?.is_none() {
            return Err(StoreError::ItemNotFound(published.url()));
        }
        if reaches(&map, &item.children, &published)? {
            return Err(StoreError::InvalidOperation(format!(
                "{published} cannot be its own descendant"
            )));
        }
        write_item(&mut map, item.clone(), user)
    }

    fn delete_item(&self, key: &ItemKey, _user: &str, options: DeleteOptions) -> StoreResult<()> {
        let published = as_published(key.concrete_location()?)?;
        let mut map = self.items.write().map_err(poisoned)?;
        let item = lookup(&map, &published)?
            .ok_or_else(|| StoreError::ItemNotFound(published.url()))?;
        delete_locked(&mut map, &item, options, &mut HashSet::new())
    }
}

/// `visited` holds every location already deleted in this call.
fn delete_locked(
    map: &mut ItemMap,
    item: &Item,
    options: DeleteOptions,
    visited: &mut HashSet<Location>,
) -> StoreResult<()> {
    let published = as_published(item.location.concrete_location()?)?;
    if !visited.insert(published.clone()) {
        return Ok(());
    }
    if options.delete_children {
        for child in &item.children {
            let Ok(child_loc) = child.concrete_location() else {
                continue;
            };
            if let Some(child_item) = lookup(map, &as_published(child_loc)?)? {
                delete_locked(map, &child_item, options, visited)?;
            }
        }
    }
    if options.delete_all_versions || is_direct_only(&item.category) {
        remove_all(map, &published)?;
    } else {
        map.remove(&as_draft(&published)?);
    }
    debug!(location = %published, all_versions = options.delete_all_versions, "deleted item");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn course() -> CourseLocation {
        CourseLocation::new("MITx", "6002x", "2012_Fall").unwrap()
    }

    fn course_id() -> CourseId {
        CourseId::Location(course())
    }

    fn seeded() -> (DraftStore, ItemKey, ItemKey) {
        let store = DraftStore::new();
        store
            .create_course(&course_id(), "alice", Fields::new())
            .unwrap();
        let root: ItemKey = course().location().unwrap().into();
        let chapter = store
            .create_item(&course_id(), Some(&root), NewItem::new("chapter").with_block_id("week1"), "alice")
            .unwrap();
        let problem = store
            .create_item(
                &course_id(),
                Some(&chapter.location),
                NewItem::new("problem").with_block_id("HW3"),
                "alice",
            )
            .unwrap();
        (store, chapter.location, problem.location)
    }

    #[test]
    fn direct_only_items_are_published() {
        let (store, chapter, problem) = seeded();
        assert!(!store.fetch_item(&chapter).unwrap().is_draft);
        assert!(store.fetch_item(&problem).unwrap().is_draft);
        assert_eq!(store.get_parent_locations(&problem).unwrap(), vec![chapter]);
    }

    #[test]
    fn duplicate_course_and_item_are_rejected() {
        let (store, _, _) = seeded();
        assert!(matches!(
            store.create_course(&course_id(), "bob", Fields::new()),
            Err(StoreError::DuplicateCourse(_))
        ));
        assert!(matches!(
            store.create_item(&course_id(), None, NewItem::new("problem").with_block_id("HW3"), "bob"),
            Err(StoreError::DuplicateItem(_))
        ));
    }

    #[test]
    fn update_requires_existing_unless_allowed() {
        let store = DraftStore::new();
        let loc = course().make_usage_key("html", "intro").unwrap();
        let item = Item::at_location(loc).unwrap().with_field("data", "<p>hi</p>");
        assert!(matches!(
            store.update_item(&item, "alice", false, false),
            Err(StoreError::ItemNotFound(_))
        ));
        let saved = store.update_item(&item, "alice", true, false).unwrap();
        assert!(saved.is_draft);
        assert_eq!(saved.edited_by.as_deref(), Some("alice"));
        assert_eq!(store.fetch_item(&item.location).unwrap().fields["data"], json!("<p>hi</p>"));
    }

    #[test]
    fn publish_promotes_draft() {
        let (store, _, problem) = seeded();
        let mut edited = store.fetch_item(&problem).unwrap();
        edited.fields.insert("weight".into(), json!(2));
        store.update_item(&edited, "alice", false, false).unwrap();

        let published = store.publish(&problem, "bob").unwrap();
        assert!(!published.is_draft);
        let read = store.fetch_item(&problem).unwrap();
        assert!(!read.is_draft);
        assert_eq!(read.fields["weight"], json!(2));
    }

    #[test]
    fn publish_deletes_children_dropped_from_draft() {
        let store = DraftStore::new();
        store.create_course(&course_id(), "alice", Fields::new()).unwrap();
        let vertical = store
            .create_item(&course_id(), None, NewItem::new("vertical").with_block_id("unit"), "alice")
            .unwrap();
        let html = store
            .create_item(&course_id(), Some(&vertical.location), NewItem::new("html").with_block_id("intro"), "alice")
            .unwrap();
        store.publish(&html.location, "alice").unwrap();
        store.publish(&vertical.location, "alice").unwrap();

        let mut draft = store.fetch_item(&vertical.location).unwrap();
        draft.children.clear();
        store.update_item(&draft, "alice", false, false).unwrap();
        store.publish(&vertical.location, "alice").unwrap();
        assert!(!store.has_item(&html.location).unwrap());
    }

    #[test]
    fn unpublish_and_convert_to_draft() {
        let (store, chapter, problem) = seeded();
        store.publish(&problem, "alice").unwrap();
        let draft = store.convert_to_draft(&problem).unwrap();
        assert!(draft.is_draft);
        assert!(matches!(
            store.convert_to_draft(&problem),
            Err(StoreError::DuplicateItem(_))
        ));
        assert!(matches!(
            store.convert_to_draft(&chapter),
            Err(StoreError::InvalidOperation(_))
        ));

        store.publish(&problem, "alice").unwrap();
        let unpublished = store.unpublish(&problem).unwrap();
        assert!(unpublished.is_draft);
        assert!(store.fetch_item(&problem).unwrap().is_draft);
    }

    #[test]
    fn delete_draft_keeps_published() {
        let (store, _, problem) = seeded();
        store.publish(&problem, "alice").unwrap();
        store.convert_to_draft(&problem).unwrap();
        store.delete_item(&problem, "alice", DeleteOptions::default()).unwrap();
        assert!(!store.fetch_item(&problem).unwrap().is_draft);

        let all = DeleteOptions {
            delete_all_versions: true,
            ..DeleteOptions::default()
        };
        store.delete_item(&problem, "alice", all).unwrap();
        assert!(!store.has_item(&problem).unwrap());
    }

    #[test]
    fn delete_with_children_cascades() {
        let (store, chapter, problem) = seeded();
        let options = DeleteOptions {
            delete_children: true,
            delete_all_versions: true,
            force: false,
        };
        store.delete_item(&chapter, "alice", options).unwrap();
        assert!(!store.has_item(&chapter).unwrap());
        assert!(!store.has_item(&problem).unwrap());
        let root = store.get_course(&course_id()).unwrap();
        assert!(root.children.is_empty());
    }

    #[test]
    fn items_and_orphans_use_draft_view() {
        let (store, _, _) = seeded();
        store
            .create_item(&course_id(), None, NewItem::new("html").with_block_id("loose"), "alice")
            .unwrap();
        let all = store.get_items(&course_id(), &ItemQuery::all()).unwrap();
        assert_eq!(all.len(), 4);
        let orphans = store.get_orphans(&course_id()).unwrap();
        assert_eq!(orphans, vec![course().make_usage_key("html", "loose").unwrap().into()]);
        assert_eq!(store.get_courses().unwrap().len(), 1);
    }

    #[test]
    fn update_rejects_child_cycles() {
        let (store, chapter, problem) = seeded();
        let root: ItemKey = course().location().unwrap().into();
        let looping = store
            .get_item(&chapter, Some(0))
            .unwrap()
            .with_children(vec![problem.clone(), root.clone()]);
        assert!(matches!(
            store.update_item(&looping, "alice", false, false),
            Err(StoreError::InvalidOperation(_))
        ));

        let self_parent = store
            .get_item(&problem, Some(0))
            .unwrap()
            .with_children(vec![problem.clone()]);
        assert!(matches!(
            store.update_item(&self_parent, "alice", false, false),
            Err(StoreError::InvalidOperation(_))
        ));

        let tree = store.get_item(&root, None).unwrap();
        assert_eq!(tree.loaded_children.len(), 1);
        assert_eq!(tree.loaded_children[0].children, vec![problem]);
    }

    #[test]
    fn locator_keys_are_rejected() {
        let store = DraftStore::new();
        let locator = mstore_keys::BlockUsageLocator::from_url("edx://mit+eecs/block/a").unwrap();
        assert!(matches!(
            store.fetch_item(&locator.into()),
            Err(StoreError::InvalidOperation(_))
        ));
    }
}
