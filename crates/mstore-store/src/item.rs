use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use mstore_keys::{BlockUsageLocator, CourseId, DefinitionLocator, Location, OpaqueKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Field name → value map of an item.
pub type Fields = BTreeMap<String, Value>;

/// The key an item is stored under: a legacy location or a usage locator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKey {
    Location(Location),
    Locator(BlockUsageLocator),
}

impl ItemKey {
    pub fn as_location(&self) -> Option<&Location> {
        match self {
            Self::Location(loc) => Some(loc),
            Self::Locator(_) => None,
        }
    }

    pub fn as_locator(&self) -> Option<&BlockUsageLocator> {
        match self {
            Self::Locator(loc) => Some(loc),
            Self::Location(_) => None,
        }
    }

    /// Location name or locator block id.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Location(loc) => loc.name(),
            Self::Locator(loc) => Some(loc.block_id()),
        }
    }

    /// The location, failing unless it is fully specified.
    pub fn concrete_location(&self) -> StoreResult<&Location> {
        let loc = self.as_location().ok_or_else(|| {
            StoreError::InvalidOperation(format!("{self} is not a location"))
        })?;
        if !loc.is_fully_specified() {
            return Err(StoreError::InsufficientSpecification(loc.to_string()));
        }
        Ok(loc)
    }

    /// The usage locator, failing for locations.
    pub fn locator(&self) -> StoreResult<&BlockUsageLocator> {
        self.as_locator()
            .ok_or_else(|| StoreError::InvalidOperation(format!("{self} is not a locator")))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location(loc) => write!(f, "{loc}"),
            Self::Locator(loc) => write!(f, "{loc}"),
        }
    }
}

impl From<Location> for ItemKey {
    fn from(loc: Location) -> Self {
        Self::Location(loc)
    }
}

impl From<BlockUsageLocator> for ItemKey {
    fn from(loc: BlockUsageLocator) -> Self {
        Self::Locator(loc)
    }
}

/// A stored content block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub location: ItemKey,
    pub category: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub children: Vec<ItemKey>,
    /// The definition body, for stores that separate definitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<DefinitionLocator>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_on: Option<DateTime<Utc>>,
    /// Descendants loaded by `get_item` up to the requested depth.
    #[serde(skip)]
    pub loaded_children: Vec<Item>,
}

impl Item {
    pub fn new(location: impl Into<ItemKey>, category: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            category: category.into(),
            fields: Fields::new(),
            children: Vec::new(),
            definition: None,
            is_draft: false,
            edited_by: None,
            edited_on: None,
            loaded_children: Vec::new(),
        }
    }

    /// An item at a legacy location, taking its category from the location.
    pub fn at_location(location: Location) -> StoreResult<Self> {
        let category = location
            .category()
            .ok_or_else(|| StoreError::InsufficientSpecification(location.to_string()))?
            .to_string();
        Ok(Self::new(location, category))
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: Vec<ItemKey>) -> Self {
        self.children = children;
        self
    }

    pub fn display_name(&self) -> Option<&str> {
        self.fields.get("display_name").and_then(Value::as_str)
    }

    /// The wiki slug of a course root; defaults to the course number.
    pub fn wiki_slug(&self) -> Option<String> {
        if let Some(slug) = self.fields.get("wiki_slug").and_then(Value::as_str) {
            return Some(slug.to_string());
        }
        match &self.location {
            ItemKey::Location(loc) => loc.course().map(str::to_string),
            ItemKey::Locator(loc) => loc.offering().map(str::to_string),
        }
    }

    /// The course id of a course root item.
    pub fn course_id(&self) -> StoreResult<CourseId> {
        match &self.location {
            ItemKey::Location(loc) => Ok(CourseId::Location(loc.course_id()?)),
            ItemKey::Locator(loc) => Ok(CourseId::Locator(loc.course_key())),
        }
    }

    pub(crate) fn stamp(&mut self, user: &str) {
        self.edited_by = Some(user.to_string());
        self.edited_on = Some(Utc::now());
    }
}

/// Partial match over the items of one course.
///
/// Unset parts match everything; each qualifier must equal the item's field
/// of that name, or be contained in it when the field is a list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemQuery {
    pub category: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub qualifiers: Fields,
}

impl ItemQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_qualifier(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.qualifiers.insert(field.into(), value.into());
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        if self.category.as_ref().is_some_and(|c| *c != item.category) {
            return false;
        }
        if self.name.as_deref().is_some_and(|n| Some(n) != item.location.name()) {
            return false;
        }
        self.qualifiers.iter().all(|(field, wanted)| match item.fields.get(field) {
            Some(Value::Array(values)) if !wanted.is_array() => values.contains(wanted),
            Some(value) => value == wanted,
            None => wanted.is_null(),
        })
    }
}

/// Input to `create_item`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub category: String,
    /// Location name or block id; generated when absent.
    pub block_id: Option<String>,
    #[serde(default)]
    pub fields: Fields,
}

impl NewItem {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Self::default()
        }
    }

    pub fn with_block_id(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = Some(block_id.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// The block id, or a fresh one.
    pub fn block_id_or_generate(&self) -> String {
        self.block_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
    }
}

/// Options for `delete_item`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Also delete every descendant.
    pub delete_children: bool,
    /// Remove published as well as draft versions.
    pub delete_all_versions: bool,
    /// Fork instead of failing on a stale version.
    pub force: bool,
}

/// Serialized form of a key used in error messages.
pub(crate) fn key_string(key: &ItemKey) -> String {
    match key {
        ItemKey::Location(loc) => loc.url(),
        ItemKey::Locator(loc) => loc.serialized(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn problem() -> Item {
        let loc = Location::parse("i4x://MITx/6002x/problem/HW3").unwrap();
        Item::at_location(loc)
            .unwrap()
            .with_field("display_name", "Homework 3")
            .with_field("tags", json!(["graded", "week1"]))
    }

    #[test]
    fn query_matches_category_name_and_qualifiers() {
        let item = problem();
        assert!(ItemQuery::all().matches(&item));
        assert!(ItemQuery::category("problem").with_name("HW3").matches(&item));
        assert!(!ItemQuery::category("html").matches(&item));
        assert!(ItemQuery::all()
            .with_qualifier("display_name", "Homework 3")
            .matches(&item));
        assert!(ItemQuery::all().with_qualifier("tags", "graded").matches(&item));
        assert!(!ItemQuery::all().with_qualifier("tags", "week2").matches(&item));
        assert!(ItemQuery::all().with_qualifier("missing", Value::Null).matches(&item));
    }

    #[test]
    fn at_location_requires_category() {
        let wildcard = Location::new(Some("i4x"), Some("MITx"), None, None, None, None).unwrap();
        assert!(matches!(
            Item::at_location(wildcard),
            Err(StoreError::InsufficientSpecification(_))
        ));
    }

    #[test]
    fn concrete_location_rejects_wildcards() {
        let key = ItemKey::from(Location::new(Some("i4x"), Some("MITx"), None, None, None, None).unwrap());
        assert!(matches!(
            key.concrete_location(),
            Err(StoreError::InsufficientSpecification(_))
        ));
    }

    #[test]
    fn wiki_slug_defaults_to_course_number() {
        let root = Item::at_location(Location::parse("i4x://MITx/6002x/course/2012_Fall").unwrap()).unwrap();
        assert_eq!(root.wiki_slug().as_deref(), Some("6002x"));
        let custom = root.with_field("wiki_slug", "circuits");
        assert_eq!(custom.wiki_slug().as_deref(), Some("circuits"));
    }

    #[test]
    fn generated_block_ids_are_distinct() {
        let new = NewItem::new("html");
        assert_ne!(new.block_id_or_generate(), new.block_id_or_generate());
        assert_eq!(NewItem::new("html").with_block_id("intro").block_id_or_generate(), "intro");
    }
}
