//! The mixed store: one module store contract over several backends.
//!
//! Every operation that names a course is routed to one backend: the course's
//! legacy id and package id (plus the translation of each) are looked up in
//! the mapping table, falling back to the `default` store. Keys are translated
//! into the addressing scheme the chosen backend uses. Callers that address a
//! course by location get locations back wherever a translation exists;
//! otherwise results and errors are returned as the backend produced them.

use std::collections::{BTreeMap, HashSet};

use mstore_keys::{CourseId, CourseLocation};
use mstore_store::{
    DeleteOptions, Fields, Item, ItemKey, ItemQuery, LoadError, NewItem, ReferenceType, StoreError,
    StoreKind, StoreResult,
};
use tracing::{debug, info};

use crate::config::{MixedConfig, TranslationPolicy, DEFAULT_STORE};
use crate::engine::{Backend, EngineRegistry};
use crate::error::{ConfigError, ConfigResult};
use crate::translation::LocMapper;

/// Router over named backends.
#[derive(Debug)]
pub struct MixedStore {
    stores: Vec<(String, Backend)>,
    mappings: BTreeMap<String, String>,
    mapper: LocMapper,
    policy: TranslationPolicy,
}

impl MixedStore {
    /// Build from named backends.
    ///
    /// A store named `default` is required, names must be unique and every
    /// mapping must name a store. Translation entries are created for every
    /// course of a legacy-flat store.
    pub fn new(
        stores: Vec<(String, Backend)>,
        mappings: BTreeMap<String, String>,
        mapper: LocMapper,
        policy: TranslationPolicy,
    ) -> ConfigResult<Self> {
        let mut names = HashSet::new();
        for (name, _) in &stores {
            if !names.insert(name.as_str()) {
                return Err(ConfigError::DuplicateStore(name.clone()));
            }
        }
        if !names.contains(DEFAULT_STORE) {
            return Err(ConfigError::MissingDefault);
        }
        for (course, store) in &mappings {
            if !names.contains(store.as_str()) {
                return Err(ConfigError::UnknownStore {
                    course: course.clone(),
                    store: store.clone(),
                });
            }
        }

        let mixed = Self {
            stores,
            mappings,
            mapper,
            policy,
        };
        for (name, backend) in &mixed.stores {
            if backend.reader().kind() == StoreKind::LegacyFlat {
                mixed.ensure_loc_maps_exist(name)?;
            }
        }
        info!(stores = mixed.stores.len(), mappings = mixed.mappings.len(), "created mixed store");
        Ok(mixed)
    }

    /// Build every configured store through `registry`. Legacy-flat stores
    /// load only the courses mapped to them.
    pub fn from_config(
        config: &MixedConfig,
        registry: &EngineRegistry,
        mapper: LocMapper,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let mut stores = Vec::with_capacity(config.stores.len());
        for store in &config.stores {
            let course_ids: Vec<CourseLocation> = config
                .courses_for(&store.name)
                .iter()
                .filter_map(|id| CourseLocation::parse_course_id(id).ok())
                .collect();
            stores.push((store.name.clone(), registry.build(store, &course_ids)?));
        }
        Self::new(stores, config.mappings.clone(), mapper, config.translation)
    }

    pub fn store(&self, name: &str) -> Option<&Backend> {
        self.stores.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    pub fn mapper(&self) -> &LocMapper {
        &self.mapper
    }

    /// Create translation entries for every course of a location-addressed
    /// store.
    pub fn ensure_loc_maps_exist(&self, store_name: &str) -> StoreResult<()> {
        let backend = self
            .store(store_name)
            .ok_or_else(|| StoreError::ItemNotFound(format!("store {store_name}")))?;
        let reader = backend.reader();
        if reader.reference_type() != ReferenceType::Location {
            return Err(StoreError::InvalidOperation(format!(
                "cannot create translation entries from {} store {store_name}",
                reader.kind()
            )));
        }
        for course in reader.get_courses()? {
            if let (CourseId::Location(course_id), ItemKey::Location(root)) =
                (course.course_id()?, &course.location)
            {
                self.mapper
                    .translate_location(Some(&course_id), root, self.policy.published, true)?;
            }
        }
        Ok(())
    }

    // ---- Routing ----

    /// The backend serving `course`.
    pub fn backend_for(&self, course: &CourseId) -> StoreResult<&Backend> {
        let mut ids = vec![course.identity()];
        match course {
            CourseId::Location(course_id) => {
                match self
                    .mapper
                    .translate_location_to_course_locator(Some(course_id), None, self.policy.published)
                {
                    Ok(locator) => ids.extend(locator.package_id()),
                    Err(StoreError::ItemNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            CourseId::Locator(locator) => {
                if let Some(course_id) = self.mapper.translate_locator_to_course_id(locator)? {
                    ids.push(course_id.course_id());
                }
            }
        }
        let name = ids
            .iter()
            .find_map(|id| self.mappings.get(id))
            .map_or(DEFAULT_STORE, String::as_str);
        debug!(course = %course, store = name, "routed course");
        self.store(name)
            .ok_or_else(|| StoreError::Internal(format!("store {name} is not configured")))
    }

    /// The course an item key belongs to.
    ///
    /// Locators name their course. For a location this tries, in order: a
    /// `course` location's own id, the translation table, and a search of
    /// every location-addressed store.
    pub fn infer_course_id(&self, key: &ItemKey) -> StoreResult<CourseId> {
        let location = match key {
            ItemKey::Locator(usage) => return Ok(usage.course_key().into()),
            ItemKey::Location(location) => location,
        };
        if let Ok(course_id) = location.course_id() {
            return Ok(course_id.into());
        }
        match self
            .mapper
            .translate_location_to_course_locator(None, Some(location), self.policy.published)
        {
            Ok(locator) => {
                if let Some(course_id) = self.mapper.translate_locator_to_course_id(&locator)? {
                    return Ok(course_id.into());
                }
            }
            Err(StoreError::ItemNotFound(_) | StoreError::InsufficientSpecification(_)) => {}
            Err(e) => return Err(e),
        }
        for backend in self.unique_backends() {
            let reader = backend.reader();
            if reader.reference_type() != ReferenceType::Location {
                continue;
            }
            for course in reader.get_courses()? {
                let CourseId::Location(course_id) = course.course_id()? else {
                    continue;
                };
                if location.org() == Some(course_id.org())
                    && location.course() == Some(course_id.course())
                    && reader.has_item(key)?
                {
                    return Ok(course_id.into());
                }
            }
        }
        Err(StoreError::ItemNotFound(format!("cannot find the course of {location}")))
    }

    /// `course` in the addressing scheme of `backend`.
    fn course_for(&self, backend: &Backend, course: &CourseId) -> StoreResult<CourseId> {
        match (backend.reader().reference_type(), course) {
            (ReferenceType::Locator, CourseId::Location(course_id)) => {
                let usage = self.mapper.translate_location(
                    Some(course_id),
                    &course_id.location()?,
                    self.policy.published,
                    self.policy.add_entry_if_missing,
                )?;
                Ok(usage.course_key().into())
            }
            (ReferenceType::Location, CourseId::Locator(locator)) => self
                .mapper
                .translate_locator_to_course_id(locator)?
                .map(CourseId::from)
                .ok_or_else(|| StoreError::ItemNotFound(locator.to_string())),
            _ => Ok(course.clone()),
        }
    }

    /// `key` in the addressing scheme of `backend`.
    fn key_for(&self, backend: &Backend, key: &ItemKey, course: &CourseId) -> StoreResult<ItemKey> {
        match (backend.reader().reference_type(), key) {
            (ReferenceType::Locator, ItemKey::Location(location)) => Ok(self
                .mapper
                .translate_location(
                    course.as_location(),
                    location,
                    self.policy.published,
                    self.policy.add_entry_if_missing,
                )?
                .into()),
            (ReferenceType::Location, ItemKey::Locator(usage)) => self
                .mapper
                .translate_locator_to_location(usage)?
                .map(ItemKey::from)
                .ok_or_else(|| StoreError::ItemNotFound(usage.to_string())),
            _ => Ok(key.clone()),
        }
    }

    /// Map `key` back to a location when the caller addressed by location.
    /// Locators without a translation are kept.
    fn key_for_caller(&self, key: ItemKey, legacy: bool) -> StoreResult<ItemKey> {
        match &key {
            ItemKey::Locator(usage) if legacy => Ok(self
                .mapper
                .translate_locator_to_location(usage)?
                .map_or(key, ItemKey::from)),
            _ => Ok(key),
        }
    }

    /// `item` and its loaded descendants with every key passed through
    /// `key_for_caller`.
    fn item_for_caller(&self, mut item: Item, legacy: bool) -> StoreResult<Item> {
        if !legacy {
            return Ok(item);
        }
        item.location = self.key_for_caller(item.location, true)?;
        item.children = item
            .children
            .into_iter()
            .map(|child| self.key_for_caller(child, true))
            .collect::<StoreResult<_>>()?;
        item.loaded_children = item
            .loaded_children
            .into_iter()
            .map(|child| self.item_for_caller(child, true))
            .collect::<StoreResult<_>>()?;
        Ok(item)
    }

    /// Each configured backend once, in configuration order.
    fn unique_backends(&self) -> Vec<&Backend> {
        let mut seen = HashSet::new();
        self.stores
            .iter()
            .map(|(_, backend)| backend)
            .filter(|backend| seen.insert(backend.store_ptr()))
            .collect()
    }

    // ---- Read tier ----

    pub fn has_item(&self, key: &ItemKey) -> StoreResult<bool> {
        let course = match self.infer_course_id(key) {
            Ok(course) => course,
            Err(StoreError::ItemNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let backend = self.backend_for(&course)?;
        match self.key_for(backend, key, &course) {
            Ok(key) => backend.reader().has_item(&key),
            Err(StoreError::ItemNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get_item(&self, key: &ItemKey, depth: Option<usize>) -> StoreResult<Item> {
        let course = self.infer_course_id(key)?;
        let backend = self.backend_for(&course)?;
        let item = backend.reader().get_item(&self.key_for(backend, key, &course)?, depth)?;
        self.item_for_caller(item, key.as_location().is_some())
    }

    pub fn get_items(&self, course: &CourseId, query: &ItemQuery) -> StoreResult<Vec<Item>> {
        let backend = self.backend_for(course)?;
        let legacy = course.as_location().is_some();
        backend
            .reader()
            .get_items(&self.course_for(backend, course)?, query)?
            .into_iter()
            .map(|item| self.item_for_caller(item, legacy))
            .collect()
    }

    /// Course roots from every backend.
    ///
    /// Legacy-flat stores are asked first, then locator-addressed ones, then
    /// the rest. A course already returned by an earlier store, directly or
    /// through its translation, is skipped.
    pub fn get_courses(&self) -> StoreResult<Vec<Item>> {
        let mut backends = self.unique_backends();
        backends.sort_by_key(|backend| store_rank(backend));
        let has_locators = backends
            .iter()
            .any(|b| b.reader().reference_type() == ReferenceType::Locator);

        let mut seen: HashSet<String> = HashSet::new();
        let mut courses = Vec::new();
        for backend in backends {
            for course in backend.reader().get_courses()? {
                let course_id = course.course_id()?;
                if seen.contains(&course_id.identity()) {
                    continue;
                }
                let translated = if has_locators {
                    self.translated_identity(&course_id)?
                } else {
                    None
                };
                if translated.as_ref().is_some_and(|id| seen.contains(id)) {
                    debug!(course = %course_id, "skipping course shadowed by an earlier store");
                    continue;
                }
                seen.insert(course_id.identity());
                seen.extend(translated);
                courses.push(course);
            }
        }
        Ok(courses)
    }

    /// The identity of `course`'s counterpart in the other addressing
    /// scheme, if a translation entry exists.
    fn translated_identity(&self, course: &CourseId) -> StoreResult<Option<String>> {
        match course {
            CourseId::Location(course_id) => match self.mapper.translate_location_to_course_locator(
                Some(course_id),
                None,
                self.policy.published,
            ) {
                Ok(locator) => Ok(locator.package_id()),
                Err(StoreError::ItemNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            CourseId::Locator(locator) => Ok(self
                .mapper
                .translate_locator_to_course_id(locator)?
                .map(|id| id.course_id())),
        }
    }

    /// The root of `course`, or `None` if its backend does not have it.
    pub fn get_course(&self, course: &CourseId) -> StoreResult<Option<Item>> {
        let backend = self.backend_for(course)?;
        let routed = match self.course_for(backend, course) {
            Ok(course) => course,
            Err(StoreError::ItemNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        match backend.reader().get_course(&routed) {
            Ok(item) => Ok(Some(self.item_for_caller(item, course.as_location().is_some())?)),
            Err(StoreError::ItemNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn has_course(&self, course: &CourseId) -> StoreResult<bool> {
        Ok(self.get_course(course)?.is_some())
    }

    /// Parents of `key`, addressed the way `key` is when a translation
    /// exists.
    pub fn get_parent_locations(&self, key: &ItemKey) -> StoreResult<Vec<ItemKey>> {
        let course = self.infer_course_id(key)?;
        let backend = self.backend_for(&course)?;
        backend
            .reader()
            .get_parent_locations(&self.key_for(backend, key, &course)?)?
            .into_iter()
            .map(|parent| self.key_for_caller(parent, key.as_location().is_some()))
            .collect()
    }

    /// Which kind of backend serves `course`.
    pub fn get_modulestore_type(&self, course: &CourseId) -> StoreResult<StoreKind> {
        Ok(self
            .backend_for(course)?
            .reader()
            .get_modulestore_type(Some(course)))
    }

    pub fn get_orphans(&self, course: &CourseId) -> StoreResult<Vec<ItemKey>> {
        let backend = self.backend_for(course)?;
        let legacy = course.as_location().is_some();
        backend
            .reader()
            .get_orphans(&self.course_for(backend, course)?)?
            .into_iter()
            .map(|key| self.key_for_caller(key, legacy))
            .collect()
    }

    pub fn get_course_errors(&self, course: &CourseId) -> StoreResult<Vec<LoadError>> {
        let backend = self.backend_for(course)?;
        backend.reader().get_course_errors(&self.course_for(backend, course)?)
    }

    /// Failed course dirs from every backend.
    pub fn get_errored_courses(&self) -> StoreResult<BTreeMap<String, Vec<LoadError>>> {
        let mut errors = BTreeMap::new();
        for backend in self.unique_backends() {
            errors.extend(backend.reader().get_errored_courses()?);
        }
        Ok(errors)
    }

    /// Courses using `wiki_slug`, from every backend.
    pub fn get_courses_for_wiki(&self, wiki_slug: &str) -> StoreResult<Vec<CourseId>> {
        let mut courses = Vec::new();
        for backend in self.unique_backends() {
            courses.extend(backend.reader().get_courses_for_wiki(wiki_slug)?);
        }
        Ok(courses)
    }

    // ---- Write tier ----

    /// Create `course` in the store named `store_name`.
    pub fn create_course(
        &self,
        store_name: &str,
        course: &CourseId,
        user: &str,
        fields: Fields,
    ) -> StoreResult<Item> {
        let backend = self
            .store(store_name)
            .ok_or_else(|| StoreError::ItemNotFound(format!("store {store_name}")))?;
        let writer = backend.writer("create_course")?;
        let root = writer.create_course(&self.course_for(backend, course)?, user, fields)?;
        self.item_for_caller(root, course.as_location().is_some())
    }

    /// Create `new` under `parent`.
    ///
    /// When a location-addressed course lives in a locator-addressed store,
    /// the block id is taken from the translation table (recording one for
    /// the given or generated name) so the item is addressable by location.
    pub fn create_item(
        &self,
        course: &CourseId,
        parent: Option<&ItemKey>,
        mut new: NewItem,
        user: &str,
    ) -> StoreResult<Item> {
        let backend = self.backend_for(course)?;
        let writer = backend.writer("create_item")?;
        let routed_course = self.course_for(backend, course)?;
        let parent = parent
            .map(|p| self.key_for(backend, p, course))
            .transpose()?;
        if let (ReferenceType::Locator, CourseId::Location(course_id)) =
            (backend.reader().reference_type(), course)
        {
            let location = course_id.make_usage_key(&new.category, &new.block_id_or_generate())?;
            let usage = self
                .mapper
                .translate_location(Some(course_id), &location, self.policy.published, true)?;
            new.block_id = Some(usage.block_id().to_string());
        }
        let item = writer.create_item(&routed_course, parent.as_ref(), new, user)?;
        self.item_for_caller(item, course.as_location().is_some())
    }

    pub fn update_item(
        &self,
        item: &Item,
        user: &str,
        allow_not_found: bool,
        force: bool,
    ) -> StoreResult<Item> {
        let course = self.infer_course_id(&item.location)?;
        let backend = self.backend_for(&course)?;
        let writer = backend.writer("update_item")?;
        let mut routed = item.clone();
        routed.location = self.key_for(backend, &item.location, &course)?;
        routed.children = item
            .children
            .iter()
            .map(|child| self.key_for(backend, child, &course))
            .collect::<StoreResult<_>>()?;
        let updated = writer.update_item(&routed, user, allow_not_found, force)?;
        self.item_for_caller(updated, item.location.as_location().is_some())
    }

    pub fn delete_item(&self, key: &ItemKey, user: &str, options: DeleteOptions) -> StoreResult<()> {
        let course = self.infer_course_id(key)?;
        let backend = self.backend_for(&course)?;
        let writer = backend.writer("delete_item")?;
        writer.delete_item(&self.key_for(backend, key, &course)?, user, options)
    }
}

/// Legacy-flat stores first, then locator-addressed, then the rest.
fn store_rank(backend: &Backend) -> u8 {
    let reader = backend.reader();
    if reader.kind() == StoreKind::LegacyFlat {
        0
    } else if reader.reference_type() == ReferenceType::Locator {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mstore_keys::{CourseLocator, Location};
    use mstore_store::{CourseBundle, DraftStore, LegacyFlatStore, SplitStore};
    use std::sync::Arc;

    fn fall() -> CourseLocation {
        CourseLocation::new("MITx", "6002x", "2012_Fall").unwrap()
    }

    fn hw3() -> Location {
        Location::parse("i4x://MITx/6002x/problem/HW3").unwrap()
    }

    fn legacy_bundle() -> CourseBundle {
        let course = fall();
        let root = Item::at_location(course.location().unwrap())
            .unwrap()
            .with_field("wiki_slug", "circuits")
            .with_children(vec![hw3().into()]);
        let problem = Item::at_location(hw3()).unwrap().with_field("weight", 1);
        CourseBundle {
            course_dir: "6002x".into(),
            course_id: course,
            items: vec![root, problem],
        }
    }

    /// `xml` (legacy, serving the fall course), `draft` and `default` (split).
    fn mixed() -> MixedStore {
        let legacy = LegacyFlatStore::load(vec![legacy_bundle()], None);
        let stores = vec![
            ("xml".to_string(), Backend::read_only(Arc::new(legacy))),
            ("draft".to_string(), Backend::read_write(Arc::new(DraftStore::new()))),
            (DEFAULT_STORE.to_string(), Backend::read_write(Arc::new(SplitStore::new()))),
        ];
        let mut mappings = BTreeMap::new();
        mappings.insert(fall().course_id(), "xml".to_string());
        mappings.insert("HarvardX/CS50/2014".to_string(), "draft".to_string());
        MixedStore::new(stores, mappings, LocMapper::in_memory(), TranslationPolicy::default()).unwrap()
    }

    fn cs50() -> CourseId {
        CourseLocation::new("HarvardX", "CS50", "2014").unwrap().into()
    }

    fn eecs() -> CourseId {
        CourseLocator::from_package_id("mit+eecs", None).unwrap().into()
    }

    #[test]
    fn routing_is_deterministic() {
        let store = mixed();
        for _ in 0..3 {
            assert_eq!(store.get_modulestore_type(&fall().into()).unwrap(), StoreKind::LegacyFlat);
            assert_eq!(store.get_modulestore_type(&cs50()).unwrap(), StoreKind::DraftVersioned);
            assert_eq!(store.get_modulestore_type(&eecs()).unwrap(), StoreKind::SplitVersioned);
        }
    }

    #[test]
    fn translated_package_id_routes_like_legacy_id() {
        let store = mixed();
        let locator = CourseLocator::from_package_id("MITx+6002x.2012_Fall", None).unwrap();
        assert_eq!(
            store.get_modulestore_type(&locator.into()).unwrap(),
            StoreKind::LegacyFlat
        );
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let store = mixed();
        let key: ItemKey = hw3().into();
        let err = store.delete_item(&key, "alice", DeleteOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::NotImplemented(_)));
        assert_eq!(store.get_item(&key, Some(0)).unwrap().fields["weight"], 1);

        let item = store.get_item(&key, Some(0)).unwrap().with_field("weight", 2);
        assert!(matches!(
            store.update_item(&item, "alice", false, false),
            Err(StoreError::NotImplemented(_))
        ));
        assert!(matches!(
            store.create_item(&fall().into(), None, NewItem::new("html"), "alice"),
            Err(StoreError::NotImplemented(_))
        ));
        assert!(matches!(
            store.create_course("xml", &cs50(), "alice", Fields::new()),
            Err(StoreError::NotImplemented(_))
        ));
        assert_eq!(store.get_item(&key, Some(0)).unwrap().fields["weight"], 1);
    }

    #[test]
    fn legacy_courses_get_translation_entries() {
        let store = mixed();
        let entry = store.mapper().table().get(&fall().course_id()).unwrap().unwrap();
        assert_eq!(entry.package_id(), "MITx+6002x.2012_Fall");
        assert_eq!(store.infer_course_id(&hw3().into()).unwrap(), fall().into());
        assert!(store.has_item(&hw3().into()).unwrap());
    }

    #[test]
    fn legacy_keys_are_translated_for_locator_stores() {
        let store = mixed();
        let spring = CourseLocation::new("MITx", "8.01x", "2013_Spring").unwrap();
        let root = store
            .create_course(DEFAULT_STORE, &spring.clone().into(), "alice", Fields::new())
            .unwrap();
        assert_eq!(root.location, ItemKey::from(spring.location().unwrap()));

        let created = store
            .create_item(
                &spring.clone().into(),
                None,
                NewItem::new("html").with_block_id("intro"),
                "alice",
            )
            .unwrap();
        assert_eq!(created.location.name(), Some("intro"));
        assert_eq!(store.get_modulestore_type(&spring.clone().into()).unwrap(), StoreKind::SplitVersioned);

        let course = store.get_course(&spring.into()).unwrap().unwrap();
        assert_eq!(course.category, "course");
    }

    #[test]
    fn parents_keep_the_callers_addressing_when_translatable() {
        let store = mixed();
        let spring = CourseLocation::new("MITx", "8.01x", "2013_Spring").unwrap();
        let spring_id: CourseId = spring.clone().into();
        store.create_course(DEFAULT_STORE, &spring_id, "alice", Fields::new()).unwrap();

        let root: ItemKey = spring.location().unwrap().into();
        let chapter = spring.make_usage_key("chapter", "week1").unwrap();
        let vertical = spring.make_usage_key("vertical", "unit1").unwrap();
        store
            .create_item(&spring_id, Some(&root), NewItem::new("chapter").with_block_id("week1"), "alice")
            .unwrap();
        store
            .create_item(&spring_id, Some(&chapter.clone().into()), NewItem::new("vertical").with_block_id("unit1"), "alice")
            .unwrap();

        let parents = store.get_parent_locations(&vertical.into()).unwrap();
        assert_eq!(parents, vec![ItemKey::from(chapter.clone())]);

        let parents = store.get_parent_locations(&chapter.clone().into()).unwrap();
        assert_eq!(parents, vec![root.clone()]);

        // Locator callers keep locators.
        let chapter_usage = store
            .mapper()
            .translate_location(Some(&spring), &chapter, false, false)
            .unwrap();
        let parents = store.get_parent_locations(&chapter_usage.into()).unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].as_locator().map(|l| l.block_id()), Some("course"));
    }

    #[test]
    fn legacy_course_root_is_addressable_on_locator_stores() {
        let store = mixed();
        let spring = CourseLocation::new("MITx", "8.01x", "2013_Spring").unwrap();
        let spring_id: CourseId = spring.clone().into();
        store.create_course(DEFAULT_STORE, &spring_id, "alice", Fields::new()).unwrap();

        let root: ItemKey = spring.location().unwrap().into();
        assert!(store.has_item(&root).unwrap());
        let fetched = store.get_item(&root, Some(0)).unwrap();
        assert_eq!(fetched.category, "course");
        assert_eq!(fetched.location, root);

        store
            .create_item(&spring_id, Some(&root), NewItem::new("chapter").with_block_id("week1"), "alice")
            .unwrap();
        let fetched = store.get_item(&root, Some(1)).unwrap();
        assert_eq!(
            fetched.children,
            vec![ItemKey::from(spring.make_usage_key("chapter", "week1").unwrap())]
        );
    }

    #[test]
    fn legacy_callers_get_locations_back() {
        let store = mixed();
        let spring = CourseLocation::new("MITx", "8.01x", "2013_Spring").unwrap();
        let spring_id: CourseId = spring.clone().into();
        store.create_course(DEFAULT_STORE, &spring_id, "alice", Fields::new()).unwrap();
        let root: ItemKey = spring.location().unwrap().into();
        let chapter: ItemKey = spring.make_usage_key("chapter", "week1").unwrap().into();
        let html: ItemKey = spring.make_usage_key("html", "intro").unwrap().into();

        let created = store
            .create_item(&spring_id, Some(&root), NewItem::new("chapter").with_block_id("week1"), "alice")
            .unwrap();
        assert_eq!(created.location, chapter);
        store
            .create_item(&spring_id, Some(&chapter), NewItem::new("html").with_block_id("intro"), "alice")
            .unwrap();

        let fetched = store.get_item(&root, None).unwrap();
        assert_eq!(fetched.children, vec![chapter.clone()]);
        assert_eq!(fetched.loaded_children[0].location, chapter);
        assert_eq!(fetched.loaded_children[0].children, vec![html.clone()]);
        assert_eq!(fetched.loaded_children[0].loaded_children[0].location, html);

        let items = store.get_items(&spring_id, &ItemQuery::category("html")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].location, html);
        assert_eq!(store.get_course(&spring_id).unwrap().unwrap().location, root);

        let updated = store
            .update_item(&items[0].clone().with_field("display_name", "Intro"), "alice", false, false)
            .unwrap();
        assert_eq!(updated.location, html);

        let stray = store
            .create_item(&spring_id, None, NewItem::new("html").with_block_id("stray"), "alice")
            .unwrap();
        assert_eq!(store.get_orphans(&spring_id).unwrap(), vec![stray.location]);
    }

    #[test]
    fn generated_block_ids_are_addressable_by_location() {
        let store = mixed();
        let spring = CourseLocation::new("MITx", "8.01x", "2013_Spring").unwrap();
        let spring_id: CourseId = spring.clone().into();
        store.create_course(DEFAULT_STORE, &spring_id, "alice", Fields::new()).unwrap();
        let root: ItemKey = spring.location().unwrap().into();

        let created = store
            .create_item(&spring_id, Some(&root), NewItem::new("html"), "alice")
            .unwrap();
        let location = created.location.as_location().unwrap().clone();
        assert_eq!(location.category(), Some("html"));
        assert!(store.has_item(&created.location).unwrap());
        assert_eq!(store.get_item(&created.location, Some(0)).unwrap().category, "html");
        assert!(store
            .mapper()
            .translate_location(Some(&spring), &location, false, false)
            .is_ok());
    }

    #[test]
    fn get_course_returns_none_when_missing() {
        let store = mixed();
        assert!(store.get_course(&eecs()).unwrap().is_none());
        assert!(!store.has_course(&cs50()).unwrap());
        assert!(store.has_course(&fall().into()).unwrap());
    }

    #[test]
    fn get_courses_skips_shadowed_courses() {
        let store = mixed();
        store
            .create_course(DEFAULT_STORE, &eecs(), "alice", Fields::new())
            .unwrap();
        let shadow = CourseLocator::from_package_id("MITx+6002x.2012_Fall", None).unwrap();
        store
            .create_course(DEFAULT_STORE, &shadow.into(), "alice", Fields::new())
            .unwrap();

        let courses = store.get_courses().unwrap();
        assert_eq!(courses.len(), 2);
        assert!(courses[0].location.as_location().is_some());
        assert_eq!(courses[1].course_id().unwrap().identity(), "mit+eecs");
    }

    #[test]
    fn fan_out_queries_cover_every_store() {
        let store = mixed();
        assert_eq!(store.get_courses_for_wiki("circuits").unwrap(), vec![fall().into()]);
        assert!(store.get_errored_courses().unwrap().is_empty());
        assert!(store.get_course_errors(&fall().into()).unwrap().is_empty());
    }

    #[test]
    fn duplicate_store_handles_are_visited_once() {
        let split = Arc::new(SplitStore::new());
        let stores = vec![
            (DEFAULT_STORE.to_string(), Backend::read_write(split.clone())),
            ("split".to_string(), Backend::read_write(split)),
        ];
        let store = MixedStore::new(stores, BTreeMap::new(), LocMapper::in_memory(), TranslationPolicy::default())
            .unwrap();
        store.create_course("split", &eecs(), "alice", Fields::new()).unwrap();
        assert_eq!(store.get_courses().unwrap().len(), 1);
    }

    #[test]
    fn construction_validates_names() {
        let only_draft = vec![("draft".to_string(), Backend::read_write(Arc::new(DraftStore::new())))];
        assert_eq!(
            MixedStore::new(only_draft, BTreeMap::new(), LocMapper::in_memory(), TranslationPolicy::default())
                .unwrap_err(),
            ConfigError::MissingDefault
        );
    }

    #[test]
    fn unknown_location_course_is_not_found() {
        let store = mixed();
        let stray = Location::parse("i4x://Nobody/none/problem/x").unwrap();
        assert!(matches!(
            store.infer_course_id(&stray.clone().into()),
            Err(StoreError::ItemNotFound(_))
        ));
        assert!(!store.has_item(&stray.into()).unwrap());
    }
}
