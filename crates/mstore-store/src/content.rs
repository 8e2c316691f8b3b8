//! Static asset storage used when deleting or cloning course content.
//!
//! The store never interprets asset bytes: it is a key-value store keyed by
//! the location-derived asset id `/c4x/{org}/{course}/asset/{name}`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use mstore_keys::{CourseLocation, Location};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{poisoned, StoreError, StoreResult};

/// Tag of asset locations.
pub const ASSET_TAG: &str = "c4x";
/// Category of asset locations.
pub const ASSET_CATEGORY: &str = "asset";
/// Category of thumbnail locations.
pub const THUMBNAIL_CATEGORY: &str = "thumbnail";

/// One uploaded file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticContent {
    pub location: Location,
    pub content_type: String,
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_location: Option<Location>,
}

impl StaticContent {
    pub fn new(
        course: &CourseLocation,
        name: &str,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> StoreResult<Self> {
        Ok(Self {
            location: asset_location(course, ASSET_CATEGORY, name)?,
            content_type: content_type.into(),
            data,
            thumbnail_location: None,
        })
    }

    pub fn name(&self) -> &str {
        self.location.name().unwrap_or_default()
    }

    /// `/c4x/{org}/{course}/{category}/{name}`.
    pub fn id(&self) -> String {
        asset_id(&self.location)
    }

    /// Hex BLAKE3 digest of the asset bytes.
    pub fn content_digest(&self) -> String {
        blake3::hash(&self.data).to_hex().to_string()
    }

    pub fn is_thumbnail(&self) -> bool {
        self.location.category() == Some(THUMBNAIL_CATEGORY)
    }
}

/// Location of an asset (or thumbnail) named `name` in `course`.
pub fn asset_location(course: &CourseLocation, category: &str, name: &str) -> StoreResult<Location> {
    let name = Location::clean_for_url_name(name);
    Ok(Location::new(
        Some(ASSET_TAG),
        Some(course.org()),
        Some(course.course()),
        Some(category),
        Some(name.as_str()),
        None,
    )?)
}

/// The storage id of an asset location.
pub fn asset_id(location: &Location) -> String {
    let parts = [location.org(), location.course(), location.category(), location.name()];
    let mut id = format!("/{ASSET_TAG}");
    for part in parts {
        id.push('/');
        id.push_str(part.unwrap_or_default());
    }
    id
}

/// Asset storage contract.
pub trait ContentStore: Send + Sync {
    /// The asset at `location`; [`StoreError::ItemNotFound`] if absent.
    fn find(&self, location: &Location) -> StoreResult<StaticContent>;

    /// Store `content`, replacing any asset with the same id.
    fn save(&self, content: StaticContent) -> StoreResult<()>;

    /// Delete the asset at `location`. Returns whether it existed.
    fn delete(&self, location: &Location) -> StoreResult<bool>;

    /// Every asset of `course`, thumbnails excluded, ordered by id.
    fn get_all_content_for_course(&self, course: &CourseLocation) -> StoreResult<Vec<StaticContent>>;

    /// Every thumbnail of `course`, ordered by id.
    fn get_all_content_thumbnails_for_course(
        &self,
        course: &CourseLocation,
    ) -> StoreResult<Vec<StaticContent>>;

    /// Copy every asset and thumbnail of `source` into `dest`, rewriting
    /// locations. Returns the number of files copied.
    fn clone_course_content(&self, source: &CourseLocation, dest: &CourseLocation) -> StoreResult<usize> {
        let mut files = self.get_all_content_for_course(source)?;
        files.extend(self.get_all_content_thumbnails_for_course(source)?);
        let count = files.len();
        for mut content in files {
            content.location = content.location.map_into_course(dest)?;
            content.thumbnail_location = content
                .thumbnail_location
                .map(|thumb| thumb.map_into_course(dest))
                .transpose()?;
            self.save(content)?;
        }
        debug!(source = %source, dest = %dest, count, "cloned course content");
        Ok(count)
    }

    /// Delete every asset and thumbnail of `course`. Returns the number of
    /// files removed.
    fn delete_all_course_content(&self, course: &CourseLocation) -> StoreResult<usize> {
        let mut files = self.get_all_content_for_course(course)?;
        files.extend(self.get_all_content_thumbnails_for_course(course)?);
        let mut count = 0;
        for content in files {
            if self.delete(&content.location)? {
                count += 1;
            }
        }
        debug!(course = %course, count, "deleted course content");
        Ok(count)
    }
}

/// In-memory, map-backed asset store.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    assets: RwLock<BTreeMap<String, StaticContent>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        info!("created in-memory content store");
        Self::default()
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.assets.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn list(&self, course: &CourseLocation, thumbnails: bool) -> StoreResult<Vec<StaticContent>> {
        let assets = self.assets.read().map_err(poisoned)?;
        Ok(assets
            .values()
            .filter(|c| {
                c.location.org() == Some(course.org())
                    && c.location.course() == Some(course.course())
                    && c.is_thumbnail() == thumbnails
            })
            .cloned()
            .collect())
    }
}

impl ContentStore for InMemoryContentStore {
    fn find(&self, location: &Location) -> StoreResult<StaticContent> {
        let id = asset_id(location);
        let assets = self.assets.read().map_err(poisoned)?;
        assets.get(&id).cloned().ok_or(StoreError::ItemNotFound(id))
    }

    fn save(&self, content: StaticContent) -> StoreResult<()> {
        if !content.location.is_fully_specified() {
            return Err(StoreError::InsufficientSpecification(content.location.to_string()));
        }
        let id = content.id();
        debug!(id = %id, bytes = content.data.len(), "saved asset");
        self.assets.write().map_err(poisoned)?.insert(id, content);
        Ok(())
    }

    fn delete(&self, location: &Location) -> StoreResult<bool> {
        let id = asset_id(location);
        Ok(self.assets.write().map_err(poisoned)?.remove(&id).is_some())
    }

    fn get_all_content_for_course(&self, course: &CourseLocation) -> StoreResult<Vec<StaticContent>> {
        self.list(course, false)
    }

    fn get_all_content_thumbnails_for_course(
        &self,
        course: &CourseLocation,
    ) -> StoreResult<Vec<StaticContent>> {
        self.list(course, true)
    }
}
