use std::collections::{BTreeMap, HashSet};
use std::fmt;

use mstore_keys::CourseId;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::errortracker::LoadError;
use crate::item::{DeleteOptions, Item, ItemKey, ItemQuery, NewItem};

/// Categories that are expected to have no parent.
pub const PARENTLESS_CATEGORIES: &[&str] = &["course", "about", "static_tab", "course_info"];

/// Which kind of backend serves a course.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    /// Read-only, location-addressed, loaded from course bundles.
    LegacyFlat,
    /// Location-addressed with a draft revision overlaying the published one.
    DraftVersioned,
    /// Locator-addressed with a version tree per course.
    SplitVersioned,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LegacyFlat => write!(f, "legacy-flat"),
            Self::DraftVersioned => write!(f, "draft-versioned"),
            Self::SplitVersioned => write!(f, "split-versioned"),
        }
    }
}

/// The key family a backend is addressed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceType {
    Location,
    Locator,
}

/// Read tier of the module store contract.
///
/// Implementations must be safe to share across threads.
pub trait ModuleStoreRead: Send + Sync {
    /// The kind of this backend.
    fn kind(&self) -> StoreKind;

    /// The key family this backend is addressed by.
    fn reference_type(&self) -> ReferenceType;

    /// Fetch a single item without its descendants.
    ///
    /// Fails with [`StoreError::InsufficientSpecification`] for a wildcard key
    /// and [`StoreError::ItemNotFound`] when nothing is stored there.
    fn fetch_item(&self, key: &ItemKey) -> StoreResult<Item>;

    /// Every item of `course` matching `query`.
    fn get_items(&self, course: &CourseId, query: &ItemQuery) -> StoreResult<Vec<Item>>;

    /// The root item of every course in this store.
    fn get_courses(&self) -> StoreResult<Vec<Item>>;

    /// The root item of `course`.
    fn get_course(&self, course: &CourseId) -> StoreResult<Item>;

    /// Keys of the items listing `key` among their children.
    fn get_parent_locations(&self, key: &ItemKey) -> StoreResult<Vec<ItemKey>>;

    /// Which kind of backend serves `course`.
    fn get_modulestore_type(&self, _course: Option<&CourseId>) -> StoreKind {
        self.kind()
    }

    fn has_item(&self, key: &ItemKey) -> StoreResult<bool> {
        match self.fetch_item(key) {
            Ok(_) => Ok(true),
            Err(StoreError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn has_course(&self, course: &CourseId) -> StoreResult<bool> {
        match self.get_course(course) {
            Ok(_) => Ok(true),
            Err(StoreError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch an item and load its descendants `depth` levels deep (`None`
    /// loads the whole subtree).
    fn get_item(&self, key: &ItemKey, depth: Option<usize>) -> StoreResult<Item> {
        let mut item = self.fetch_item(key)?;
        load_children(self, &mut item, depth)?;
        Ok(item)
    }

    /// Items with no parent, ignoring categories expected to be parentless.
    fn get_orphans(&self, course: &CourseId) -> StoreResult<Vec<ItemKey>> {
        let items = self.get_items(course, &ItemQuery::all())?;
        let referenced: HashSet<&ItemKey> = items.iter().flat_map(|i| &i.children).collect();
        Ok(items
            .iter()
            .filter(|i| !PARENTLESS_CATEGORIES.contains(&i.category.as_str()))
            .filter(|i| !referenced.contains(&i.location))
            .map(|i| i.location.clone())
            .collect())
    }

    /// Non-fatal errors recorded while loading `course`.
    fn get_course_errors(&self, _course: &CourseId) -> StoreResult<Vec<LoadError>> {
        Ok(Vec::new())
    }

    /// Course dirs that failed to load, with their errors.
    fn get_errored_courses(&self) -> StoreResult<BTreeMap<String, Vec<LoadError>>> {
        Ok(BTreeMap::new())
    }

    /// Course ids of the courses whose wiki root is `wiki_slug`.
    fn get_courses_for_wiki(&self, wiki_slug: &str) -> StoreResult<Vec<CourseId>> {
        self.get_courses()?
            .iter()
            .filter(|course| course.wiki_slug().as_deref() == Some(wiki_slug))
            .map(Item::course_id)
            .collect()
    }
}

/// Write tier of the module store contract.
pub trait ModuleStoreWrite: ModuleStoreRead {
    /// Create an empty course with a root item carrying `fields`.
    fn create_course(
        &self,
        course: &CourseId,
        user: &str,
        fields: crate::item::Fields,
    ) -> StoreResult<Item>;

    /// Create an item in `course`, appending it to `parent`'s children when
    /// a parent is given.
    fn create_item(
        &self,
        course: &CourseId,
        parent: Option<&ItemKey>,
        item: NewItem,
        user: &str,
    ) -> StoreResult<Item>;

    /// Persist `item`. Creates it when absent if `allow_not_found`; `force`
    /// forks instead of failing on a stale version.
    fn update_item(
        &self,
        item: &Item,
        user: &str,
        allow_not_found: bool,
        force: bool,
    ) -> StoreResult<Item>;

    fn delete_item(&self, key: &ItemKey, user: &str, options: DeleteOptions) -> StoreResult<()>;
}

fn load_children<S: ModuleStoreRead + ?Sized>(
    store: &S,
    item: &mut Item,
    depth: Option<usize>,
) -> StoreResult<()> {
    let mut ancestors = vec![item.location.clone()];
    load_children_below(store, item, depth, &mut ancestors)
}

/// `ancestors` is the path from the requested item down to `item`; a child
/// already on it is a cycle and is not descended into.
fn load_children_below<S: ModuleStoreRead + ?Sized>(
    store: &S,
    item: &mut Item,
    depth: Option<usize>,
    ancestors: &mut Vec<ItemKey>,
) -> StoreResult<()> {
    if depth == Some(0) {
        return Ok(());
    }
    let next = depth.map(|d| d - 1);
    for child_key in &item.children {
        if ancestors.contains(child_key) {
            warn!(parent = %item.location, child = %child_key, "child is its own ancestor");
            continue;
        }
        match store.fetch_item(child_key) {
            Ok(mut child) => {
                ancestors.push(child_key.clone());
                let loaded = load_children_below(store, &mut child, next, ancestors);
                ancestors.pop();
                loaded?;
                item.loaded_children.push(child);
            }
            Err(StoreError::ItemNotFound(_)) => {
                warn!(parent = %item.location, child = %child_key, "child not found");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&StoreKind::LegacyFlat).unwrap(),
            "\"legacy-flat\""
        );
        assert_eq!(StoreKind::SplitVersioned.to_string(), "split-versioned");
        let kind: StoreKind = serde_json::from_str("\"draft-versioned\"").unwrap();
        assert_eq!(kind, StoreKind::DraftVersioned);
    }
}
