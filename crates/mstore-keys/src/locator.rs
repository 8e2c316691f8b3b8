//! The locator family: course, block-usage and definition locators.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{KeyError, KeyResult};
use crate::guid::VersionGuid;
use crate::opaque::OpaqueKey;
use crate::parsers::{
    self, is_valid_id, parse_block_ref, parse_package_id, ParsedUrl, BLOCK_PREFIX, BRANCH_PREFIX,
    ORG_SEPARATOR, URL_TAG, VERSION_PREFIX,
};

/// Scheme prefix of definition locator urls.
pub const DEFINITION_URL_TAG: &str = "defx://";

/// Prefix of locally scoped definition ids.
pub const LOCAL_ID_PREFIX: &str = "localid_";

static LOCAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Construction input for [`CourseLocator::new`] and
/// [`BlockUsageLocator::new`].
///
/// Exactly one of `url`, `version_guid` and `package_id` must be supplied.
/// Empty strings count as absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocatorSpec<'a> {
    pub url: Option<&'a str>,
    pub version_guid: Option<VersionGuid>,
    pub package_id: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub block_id: Option<&'a str>,
}

impl<'a> LocatorSpec<'a> {
    pub fn url(url: &'a str) -> Self {
        Self {
            url: Some(url),
            ..Self::default()
        }
    }

    pub fn version(version_guid: VersionGuid) -> Self {
        Self {
            version_guid: Some(version_guid),
            ..Self::default()
        }
    }

    pub fn package_id(package_id: &'a str) -> Self {
        Self {
            package_id: Some(package_id),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch: &'a str) -> Self {
        self.branch = Some(branch);
        self
    }

    pub fn with_block(mut self, block_id: &'a str) -> Self {
        self.block_id = Some(block_id);
        self
    }

    /// Resolve the single specification style into parsed segments.
    fn resolve(&self) -> KeyResult<ParsedUrl> {
        let url = self.url.filter(|s| !s.is_empty());
        let package_id = self.package_id.filter(|s| !s.is_empty());
        let branch = self.branch.filter(|s| !s.is_empty());

        let styles = [
            url.is_some(),
            self.version_guid.is_some(),
            package_id.is_some(),
        ]
        .iter()
        .filter(|given| **given)
        .count();
        if styles == 0 {
            return Err(KeyError::InsufficientSpecification(
                "one of url, version_guid or package_id is required".into(),
            ));
        }
        if styles > 1 {
            return Err(KeyError::OverSpecification(
                "only one of url, version_guid or package_id may be given".into(),
            ));
        }

        if let Some(url) = url {
            if branch.is_some() {
                return Err(KeyError::OverSpecification(
                    "branch must be part of the url".into(),
                ));
            }
            return parsers::parse_url(url, true)
                .ok_or_else(|| KeyError::InvalidValue(format!("could not parse {url:?} as a url")));
        }
        if let Some(guid) = self.version_guid {
            if branch.is_some() {
                return Err(KeyError::OverSpecification(
                    "a bare version_guid cannot select a branch".into(),
                ));
            }
            return Ok(ParsedUrl {
                version_guid: Some(guid.to_hex()),
                ..ParsedUrl::default()
            });
        }

        let package_id = package_id.unwrap_or_default();
        let mut parsed = parse_package_id(package_id).ok_or_else(|| {
            KeyError::InvalidValue(format!("could not parse {package_id:?} as a package id"))
        })?;
        match (&parsed.branch, branch) {
            (Some(embedded), Some(explicit)) if embedded != explicit => {
                return Err(KeyError::OverSpecification(format!(
                    "conflicting branches {embedded:?} and {explicit:?}"
                )));
            }
            (None, Some(explicit)) => parsed.branch = Some(explicit.to_string()),
            _ => {}
        }
        Ok(parsed)
    }
}

/// Identifies a course offering, optionally narrowed to a branch and/or
/// pinned to a version.
///
/// Either `version_guid` or both `org` and `offering` are always present.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CourseLocator {
    org: Option<String>,
    offering: Option<String>,
    branch: Option<String>,
    version_guid: Option<VersionGuid>,
}

impl CourseLocator {
    /// Construct from exactly one specification style.
    ///
    /// A block segment in a url or package id is ignored.
    pub fn new(spec: LocatorSpec<'_>) -> KeyResult<Self> {
        if spec.block_id.is_some_and(|b| !b.is_empty()) {
            return Err(KeyError::OverSpecification(
                "a course locator does not take a block_id".into(),
            ));
        }
        Self::from_parsed(&spec.resolve()?)
    }

    /// Construct directly from field values.
    pub fn from_parts(
        org: Option<&str>,
        offering: Option<&str>,
        branch: Option<&str>,
        version_guid: Option<VersionGuid>,
    ) -> KeyResult<Self> {
        for (name, value) in [("org", org), ("offering", offering), ("branch", branch)] {
            if let Some(value) = value {
                if !is_valid_id(value) {
                    return Err(KeyError::InvalidValue(format!("{name} {value:?}")));
                }
            }
        }
        if org.is_some() != offering.is_some() {
            return Err(KeyError::InvalidValue(
                "org and offering must be given together".into(),
            ));
        }
        if version_guid.is_none() && org.is_none() {
            return Err(KeyError::InvalidValue(
                "either version_guid or org and offering must be set".into(),
            ));
        }
        Ok(Self {
            org: org.map(str::to_string),
            offering: offering.map(str::to_string),
            branch: branch.map(str::to_string),
            version_guid,
        })
    }

    pub fn from_url(url: &str) -> KeyResult<Self> {
        Self::new(LocatorSpec::url(url))
    }

    pub fn from_version_guid(version_guid: VersionGuid) -> KeyResult<Self> {
        Self::new(LocatorSpec::version(version_guid))
    }

    pub fn from_package_id(package_id: &str, branch: Option<&str>) -> KeyResult<Self> {
        Self::new(LocatorSpec {
            package_id: Some(package_id),
            branch,
            ..LocatorSpec::default()
        })
    }

    fn from_parsed(parsed: &ParsedUrl) -> KeyResult<Self> {
        let version_guid = parsed
            .version_guid
            .as_deref()
            .map(VersionGuid::from_hex)
            .transpose()?;
        Self::from_parts(
            parsed.org.as_deref(),
            parsed.offering.as_deref(),
            parsed.branch.as_deref(),
            version_guid,
        )
    }

    pub fn org(&self) -> Option<&str> {
        self.org.as_deref()
    }

    pub fn offering(&self) -> Option<&str> {
        self.offering.as_deref()
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn version_guid(&self) -> Option<VersionGuid> {
        self.version_guid
    }

    /// Alias for [`Self::version_guid`].
    pub fn version(&self) -> Option<VersionGuid> {
        self.version_guid
    }

    /// `org+offering`, when set.
    pub fn package_id(&self) -> Option<String> {
        match (&self.org, &self.offering) {
            (Some(org), Some(offering)) => Some(format!("{org}{ORG_SEPARATOR}{offering}")),
            _ => None,
        }
    }

    /// `edx://` followed by the body.
    pub fn url(&self) -> String {
        format!("{URL_TAG}{}", self.to_body())
    }

    /// Both a package id and a version are set.
    pub fn is_fully_specified(&self) -> bool {
        self.package_id().is_some() && self.version_guid.is_some()
    }

    /// An id usable inside an html attribute.
    pub fn html_id(&self) -> String {
        self.to_body().replace(['/', '+', '.', ':'], "-")
    }

    /// Body wrapped as a reversible url path.
    pub fn url_reverse(&self, prefix: &str, postfix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        let postfix = postfix.trim_start_matches('/');
        if postfix.is_empty() {
            format!("{prefix}/{}", self.to_body())
        } else {
            format!("{prefix}/{}/{postfix}", self.to_body())
        }
    }

    pub fn as_course_locator(&self) -> CourseLocator {
        self.clone()
    }

    /// Same course, with another branch and no version pin.
    pub fn for_branch(&self, branch: &str) -> KeyResult<Self> {
        let package_id = self.package_id().ok_or_else(|| {
            KeyError::InsufficientSpecification("for_branch requires a package id".into())
        })?;
        Self::from_package_id(&package_id, Some(branch))
    }

    /// Same course and branch, pinned to `version_guid`.
    pub fn for_version(&self, version_guid: VersionGuid) -> Self {
        Self {
            version_guid: Some(version_guid),
            ..self.clone()
        }
    }

    /// Drop the version pin. Requires a package id.
    pub fn version_agnostic(&self) -> KeyResult<Self> {
        if self.package_id().is_none() {
            return Err(KeyError::InsufficientSpecification(
                "version_agnostic requires a package id".into(),
            ));
        }
        Ok(Self {
            version_guid: None,
            ..self.clone()
        })
    }

    /// Drop org, offering and branch. Requires a version.
    pub fn course_agnostic(&self) -> KeyResult<Self> {
        let version_guid = self.version_guid.ok_or_else(|| {
            KeyError::InsufficientSpecification("course_agnostic requires a version_guid".into())
        })?;
        Ok(Self {
            org: None,
            offering: None,
            branch: None,
            version_guid: Some(version_guid),
        })
    }

    /// A usage locator for `block_id` in this course. The block type is not
    /// part of a locator's identity.
    pub fn make_usage_key(&self, _block_type: &str, block_id: &str) -> KeyResult<BlockUsageLocator> {
        BlockUsageLocator::make_relative(self, block_id)
    }
}

impl OpaqueKey for CourseLocator {
    const KEY_TYPE: &'static str = "course_key";
    const CANONICAL_NAMESPACE: &'static str = "course-locator";
    const KEY_FIELDS: &'static [&'static str] = &["org", "offering", "branch", "version_guid"];

    fn from_body(body: &str) -> KeyResult<Self> {
        let parsed = parse_url_body(body)?;
        if parsed.block.is_some() {
            return Err(KeyError::InvalidKey(body.to_string()));
        }
        Self::from_parsed(&parsed)
    }

    fn to_body(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(package_id) = self.package_id() {
            parts.push(package_id);
        }
        if let Some(branch) = &self.branch {
            parts.push(format!("{BRANCH_PREFIX}/{branch}"));
        }
        if let Some(guid) = &self.version_guid {
            parts.push(format!("{VERSION_PREFIX}/{guid}"));
        }
        parts.join("/")
    }

    fn field_values(&self) -> Vec<Option<String>> {
        vec![
            self.org.clone(),
            self.offering.clone(),
            self.branch.clone(),
            self.version_guid.map(|g| g.to_hex()),
        ]
    }

    fn from_field_values(values: Vec<Option<String>>) -> KeyResult<Self> {
        let [org, offering, branch, version_guid] = fields_array(values)?;
        let version_guid = version_guid.as_deref().map(VersionGuid::from_hex).transpose()?;
        Self::from_parts(
            org.as_deref(),
            offering.as_deref(),
            branch.as_deref(),
            version_guid,
        )
    }
}

impl fmt::Display for CourseLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized())
    }
}

impl fmt::Debug for CourseLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CourseLocator({})", self.to_body())
    }
}

/// Identifies one content block within a course context.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockUsageLocator {
    course: CourseLocator,
    block_id: String,
}

impl BlockUsageLocator {
    /// Construct from exactly one specification style plus a block.
    ///
    /// The block may come from the url, the package id, or `spec.block_id`;
    /// differing values are an over-specification.
    pub fn new(spec: LocatorSpec<'_>) -> KeyResult<Self> {
        let parsed = spec.resolve()?;
        let explicit = spec.block_id.filter(|b| !b.is_empty());
        let block_id = match (parsed.block.as_deref(), explicit) {
            (Some(embedded), Some(explicit)) if embedded != explicit => {
                return Err(KeyError::OverSpecification(format!(
                    "conflicting block ids {embedded:?} and {explicit:?}"
                )));
            }
            (_, Some(block)) | (Some(block), None) => block.to_string(),
            (None, None) => {
                return Err(KeyError::InsufficientSpecification(
                    "a block usage locator requires a block_id".into(),
                ));
            }
        };
        Self::make_relative(&CourseLocator::from_parsed(&parsed)?, &block_id)
    }

    /// Construct directly from field values.
    pub fn from_parts(
        org: Option<&str>,
        offering: Option<&str>,
        branch: Option<&str>,
        version_guid: Option<VersionGuid>,
        block_id: &str,
    ) -> KeyResult<Self> {
        let course = CourseLocator::from_parts(org, offering, branch, version_guid)?;
        Self::make_relative(&course, block_id)
    }

    /// A usage locator for `block_id` inside `course`.
    pub fn make_relative(course: &CourseLocator, block_id: &str) -> KeyResult<Self> {
        let block_id = parse_block_ref(block_id)
            .ok_or_else(|| KeyError::InvalidValue(format!("block_id {block_id:?}")))?;
        Ok(Self {
            course: course.clone(),
            block_id: block_id.to_string(),
        })
    }

    pub fn from_url(url: &str) -> KeyResult<Self> {
        Self::new(LocatorSpec::url(url))
    }

    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    pub fn org(&self) -> Option<&str> {
        self.course.org()
    }

    pub fn offering(&self) -> Option<&str> {
        self.course.offering()
    }

    pub fn branch(&self) -> Option<&str> {
        self.course.branch()
    }

    pub fn version_guid(&self) -> Option<VersionGuid> {
        self.course.version_guid()
    }

    pub fn version(&self) -> Option<VersionGuid> {
        self.course.version_guid()
    }

    pub fn package_id(&self) -> Option<String> {
        self.course.package_id()
    }

    /// The course this block lives in.
    pub fn course_key(&self) -> CourseLocator {
        self.course.clone()
    }

    pub fn as_course_locator(&self) -> CourseLocator {
        self.course.clone()
    }

    /// The same block in another course context.
    pub fn map_into_course(&self, course: &CourseLocator) -> Self {
        Self {
            course: course.clone(),
            block_id: self.block_id.clone(),
        }
    }

    /// A usage locator does not carry its definition.
    pub fn definition_key(&self) -> KeyResult<DefinitionLocator> {
        Err(KeyError::InsufficientSpecification(format!(
            "{} does not name its definition",
            self.serialized()
        )))
    }

    pub fn url(&self) -> String {
        format!("{URL_TAG}{}", self.to_body())
    }

    pub fn is_fully_specified(&self) -> bool {
        self.course.is_fully_specified()
    }

    pub fn html_id(&self) -> String {
        self.to_body().replace(['/', '+', '.', ':'], "-")
    }

    pub fn url_reverse(&self, prefix: &str, postfix: &str) -> String {
        self.course
            .url_reverse(prefix, &format!("{BLOCK_PREFIX}/{}/{postfix}", self.block_id))
            .trim_end_matches('/')
            .to_string()
    }

    pub fn version_agnostic(&self) -> KeyResult<Self> {
        Ok(self.map_into_course(&self.course.version_agnostic()?))
    }

    pub fn course_agnostic(&self) -> KeyResult<Self> {
        Ok(self.map_into_course(&self.course.course_agnostic()?))
    }

    pub fn for_branch(&self, branch: &str) -> KeyResult<Self> {
        Ok(self.map_into_course(&self.course.for_branch(branch)?))
    }

    pub fn for_version(&self, version_guid: VersionGuid) -> Self {
        self.map_into_course(&self.course.for_version(version_guid))
    }
}

impl OpaqueKey for BlockUsageLocator {
    const KEY_TYPE: &'static str = "usage_key";
    const CANONICAL_NAMESPACE: &'static str = "edx";
    const KEY_FIELDS: &'static [&'static str] =
        &["org", "offering", "branch", "version_guid", "block_id"];

    fn from_body(body: &str) -> KeyResult<Self> {
        let parsed = parse_url_body(body)?;
        let block = parsed
            .block
            .clone()
            .ok_or_else(|| KeyError::InvalidKey(body.to_string()))?;
        Self::make_relative(&CourseLocator::from_parsed(&parsed)?, &block)
    }

    fn to_body(&self) -> String {
        let course = self.course.to_body();
        format!("{course}/{BLOCK_PREFIX}/{}", self.block_id)
    }

    fn field_values(&self) -> Vec<Option<String>> {
        let mut values = self.course.field_values();
        values.push(Some(self.block_id.clone()));
        values
    }

    fn from_field_values(mut values: Vec<Option<String>>) -> KeyResult<Self> {
        if values.len() != Self::KEY_FIELDS.len() {
            return Err(arity_error(Self::KEY_FIELDS.len(), values.len()));
        }
        let block_id = values.pop().flatten().ok_or_else(|| {
            KeyError::InsufficientSpecification("a block usage locator requires a block_id".into())
        })?;
        Self::make_relative(&CourseLocator::from_field_values(values)?, &block_id)
    }
}

impl fmt::Display for BlockUsageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized())
    }
}

impl fmt::Debug for BlockUsageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockUsageLocator({})", self.to_body())
    }
}

/// Placeholder id for a definition that has not been persisted yet.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(String);

impl LocalId {
    /// A fresh, process-unique placeholder.
    pub fn generate() -> Self {
        let n = LOCAL_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{n:x}"))
    }

    /// A placeholder with a caller-chosen id.
    pub fn new(id: &str) -> KeyResult<Self> {
        if !is_valid_id(id) {
            return Err(KeyError::InvalidValue(format!("local id {id:?}")));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{LOCAL_ID_PREFIX}{}", self.0)
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", self.0)
    }
}

/// The id of a definition body.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefinitionId {
    Persisted(VersionGuid),
    Local(LocalId),
}

impl DefinitionId {
    fn parse(s: &str) -> KeyResult<Self> {
        match s.strip_prefix(LOCAL_ID_PREFIX) {
            Some(local) => Ok(Self::Local(LocalId::new(local)?)),
            None => Ok(Self::Persisted(VersionGuid::from_hex(s)?)),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(guid) => write!(f, "{guid}"),
            Self::Local(local) => write!(f, "{local}"),
        }
    }
}

/// Names a course-independent content body.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionLocator {
    definition_id: DefinitionId,
}

impl DefinitionLocator {
    pub fn new(definition_id: DefinitionId) -> Self {
        Self { definition_id }
    }

    pub fn persisted(guid: VersionGuid) -> Self {
        Self::new(DefinitionId::Persisted(guid))
    }

    pub fn local(local: LocalId) -> Self {
        Self::new(DefinitionId::Local(local))
    }

    pub fn definition_id(&self) -> &DefinitionId {
        &self.definition_id
    }

    /// The persisted guid. Local placeholders have none.
    pub fn version(&self) -> Option<VersionGuid> {
        match self.definition_id {
            DefinitionId::Persisted(guid) => Some(guid),
            DefinitionId::Local(_) => None,
        }
    }

    pub fn url(&self) -> String {
        format!("{DEFINITION_URL_TAG}{}", self.to_body())
    }
}

impl OpaqueKey for DefinitionLocator {
    const KEY_TYPE: &'static str = "definition_key";
    const CANONICAL_NAMESPACE: &'static str = "defx";
    const KEY_FIELDS: &'static [&'static str] = &["definition_id"];

    /// Accepts `version/<id>` or a bare `<id>`, optionally behind `//`.
    fn from_body(body: &str) -> KeyResult<Self> {
        let rest = body.strip_prefix("//").unwrap_or(body);
        let id = match rest.split_once('/') {
            Some((keyword, id)) if keyword.eq_ignore_ascii_case(VERSION_PREFIX) => id,
            Some(_) => return Err(KeyError::InvalidKey(body.to_string())),
            None => rest,
        };
        DefinitionId::parse(id)
            .map(Self::new)
            .map_err(|_| KeyError::InvalidKey(body.to_string()))
    }

    fn to_body(&self) -> String {
        format!("{VERSION_PREFIX}/{}", self.definition_id)
    }

    fn field_values(&self) -> Vec<Option<String>> {
        vec![Some(self.definition_id.to_string())]
    }

    fn from_field_values(values: Vec<Option<String>>) -> KeyResult<Self> {
        let [definition_id] = fields_array(values)?;
        let definition_id = definition_id.ok_or_else(|| {
            KeyError::InsufficientSpecification("definition_id is required".into())
        })?;
        DefinitionId::parse(&definition_id).map(Self::new)
    }
}

impl fmt::Display for DefinitionLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized())
    }
}

impl fmt::Debug for DefinitionLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DefinitionLocator({})", self.definition_id)
    }
}

/// Any member of the locator family.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Locator {
    Course(CourseLocator),
    Usage(BlockUsageLocator),
    Definition(DefinitionLocator),
}

impl Locator {
    /// Parse an `edx://` or `defx://` url into the matching locator.
    pub fn parse_url(url: &str) -> KeyResult<Self> {
        let head = url.get(..DEFINITION_URL_TAG.len());
        if head.is_some_and(|h| h.eq_ignore_ascii_case(DEFINITION_URL_TAG)) {
            return DefinitionLocator::from_body(&url[DEFINITION_URL_TAG.len()..])
                .map(Self::Definition);
        }
        let parsed =
            parsers::parse_url(url, false).ok_or_else(|| KeyError::InvalidKey(url.to_string()))?;
        let course = CourseLocator::from_parsed(&parsed)?;
        match parsed.block {
            Some(block) => BlockUsageLocator::make_relative(&course, &block).map(Self::Usage),
            None => Ok(Self::Course(course)),
        }
    }

    pub fn url(&self) -> String {
        match self {
            Self::Course(key) => key.url(),
            Self::Usage(key) => key.url(),
            Self::Definition(key) => key.url(),
        }
    }

    pub fn version(&self) -> Option<VersionGuid> {
        match self {
            Self::Course(key) => key.version(),
            Self::Usage(key) => key.version(),
            Self::Definition(key) => key.version(),
        }
    }

    pub fn serialized(&self) -> String {
        match self {
            Self::Course(key) => key.serialized(),
            Self::Usage(key) => key.serialized(),
            Self::Definition(key) => key.serialized(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized())
    }
}

/// Parse a locator body. The url form `edx://…` reaches the parser as the
/// body `//…` of namespace `edx`, so a leading `//` is accepted.
fn parse_url_body(body: &str) -> KeyResult<ParsedUrl> {
    let rest = body.strip_prefix("//").unwrap_or(body);
    parsers::parse_url(rest, true).ok_or_else(|| KeyError::InvalidKey(body.to_string()))
}

fn fields_array<const N: usize>(values: Vec<Option<String>>) -> KeyResult<[Option<String>; N]> {
    let len = values.len();
    values.try_into().map_err(|_| arity_error(N, len))
}

fn arity_error(expected: usize, got: usize) -> KeyError {
    KeyError::Arguments(format!("expected {expected} field values, got {got}"))
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&OpaqueKey::serialized(self))
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                let (namespace, body) =
                    crate::opaque::separate_namespace(&s).map_err(serde::de::Error::custom)?;
                if namespace != <$ty as OpaqueKey>::CANONICAL_NAMESPACE {
                    return Err(serde::de::Error::custom(format!(
                        "expected namespace {:?}, got {namespace:?}",
                        <$ty as OpaqueKey>::CANONICAL_NAMESPACE
                    )));
                }
                <$ty as OpaqueKey>::from_body(body).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(CourseLocator);
string_serde!(BlockUsageLocator);
string_serde!(DefinitionLocator);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opaque::KeyArgs;

    const GUID: &str = "519665f6223ebd6980884f2b";

    fn guid() -> VersionGuid {
        VersionGuid::from_hex(GUID).unwrap()
    }

    // --- CourseLocator construction ---

    #[test]
    fn url_with_version_only() {
        let key = CourseLocator::from_url("edx://version/519665f6223ebd6980884f2b").unwrap();
        assert_eq!(key.version_guid(), Some(guid()));
        assert!(key.org().is_none());
        assert!(key.offering().is_none());
        assert!(key.branch().is_none());
    }

    #[test]
    fn package_id_with_branch() {
        let key = CourseLocator::from_package_id("mit+eecs", Some("draft")).unwrap();
        assert_eq!(key.org(), Some("mit"));
        assert_eq!(key.offering(), Some("eecs"));
        assert_eq!(key.branch(), Some("draft"));
        assert_eq!(key.package_id().as_deref(), Some("mit+eecs"));
    }

    #[test]
    fn url_and_package_id_is_over_specified() {
        let err = CourseLocator::new(LocatorSpec {
            url: Some("edx://mit+eecs"),
            package_id: Some("mit+eecs"),
            ..LocatorSpec::default()
        })
        .unwrap_err();
        assert!(matches!(err, KeyError::OverSpecification(_)));
    }

    #[test]
    fn version_and_package_id_is_over_specified() {
        let err = CourseLocator::new(LocatorSpec {
            version_guid: Some(guid()),
            package_id: Some("mit+eecs"),
            ..LocatorSpec::default()
        })
        .unwrap_err();
        assert!(matches!(err, KeyError::OverSpecification(_)));
    }

    #[test]
    fn nothing_is_under_specified() {
        let err = CourseLocator::new(LocatorSpec::default()).unwrap_err();
        assert!(matches!(err, KeyError::InsufficientSpecification(_)));
        let err = CourseLocator::new(LocatorSpec::url("")).unwrap_err();
        assert!(matches!(err, KeyError::InsufficientSpecification(_)));
    }

    #[test]
    fn conflicting_branches_are_over_specified() {
        let err = CourseLocator::from_package_id("mit+eecs/branch/draft", Some("published"))
            .unwrap_err();
        assert!(matches!(err, KeyError::OverSpecification(_)));
        let same = CourseLocator::from_package_id("mit+eecs/branch/draft", Some("draft")).unwrap();
        assert_eq!(same.branch(), Some("draft"));
    }

    #[test]
    fn branch_beside_url_is_over_specified() {
        let err = CourseLocator::new(LocatorSpec::url("edx://mit+eecs").with_branch("draft"))
            .unwrap_err();
        assert!(matches!(err, KeyError::OverSpecification(_)));
    }

    #[test]
    fn url_without_course_identity_violates_invariant() {
        let err = CourseLocator::from_url("edx://branch/draft").unwrap_err();
        assert!(matches!(err, KeyError::InvalidValue(_)));
    }

    #[test]
    fn short_version_is_rejected() {
        let err = CourseLocator::from_url("edx://version/0123ffff").unwrap_err();
        assert!(matches!(err, KeyError::InvalidVersionGuid(_)));
    }

    #[test]
    fn from_parts_checks_invariant() {
        assert!(CourseLocator::from_parts(None, None, Some("draft"), None).is_err());
        assert!(CourseLocator::from_parts(Some("mit"), None, None, None).is_err());
        assert!(CourseLocator::from_parts(None, None, None, Some(guid())).is_ok());
        assert!(CourseLocator::from_parts(Some("m/t"), Some("eecs"), None, None).is_err());
    }

    #[test]
    fn construction_paths_agree() {
        let from_url = CourseLocator::from_url("edx://mit+eecs/branch/draft").unwrap();
        let from_parts = CourseLocator::from_parts(Some("mit"), Some("eecs"), Some("draft"), None).unwrap();
        let from_args = CourseLocator::from_args(
            KeyArgs::new()
                .arg(Some("mit"))
                .arg(Some("eecs"))
                .named("branch", Some("draft"))
                .named("version_guid", None),
        )
        .unwrap();
        assert_eq!(from_url, from_parts);
        assert_eq!(from_parts, from_args);
    }

    // --- Serialization ---

    #[test]
    fn course_body_and_url() {
        let key = CourseLocator::from_parts(Some("mit"), Some("eecs"), Some("draft"), Some(guid())).unwrap();
        assert_eq!(key.to_body(), format!("mit+eecs/branch/draft/version/{GUID}"));
        assert_eq!(key.url(), format!("edx://mit+eecs/branch/draft/version/{GUID}"));
        assert_eq!(key.serialized(), format!("course-locator:mit+eecs/branch/draft/version/{GUID}"));
        assert!(key.is_fully_specified());
    }

    #[test]
    fn dotted_package_id_normalizes_to_plus() {
        let key = CourseLocator::from_url("edx://mit.eecs.6002x").unwrap();
        assert_eq!(key.url(), "edx://mit+eecs.6002x");
    }

    #[test]
    fn course_from_body_rejects_block() {
        let err = CourseLocator::from_body("mit+eecs/block/HW3").unwrap_err();
        assert!(matches!(err, KeyError::InvalidKey(_)));
    }

    #[test]
    fn serde_uses_serialized_form() {
        let key = CourseLocator::from_package_id("mit+eecs", Some("draft")).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"course-locator:mit+eecs/branch/draft\"");
        let back: CourseLocator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<CourseLocator>("\"edx:mit+eecs/block/a\"").is_err());
    }

    // --- Derived locators ---

    #[test]
    fn replace_leaves_receiver_untouched() {
        let key = CourseLocator::from_package_id("mit+eecs", Some("draft")).unwrap();
        let published = key.replace(&[("branch", Some("published"))]).unwrap();
        assert_eq!(key.branch(), Some("draft"));
        assert_eq!(published.branch(), Some("published"));
        assert!(key.replace(&[("org", None), ("offering", None)]).is_err());
    }

    #[test]
    fn agnostic_views() {
        let key = CourseLocator::from_parts(Some("mit"), Some("eecs"), Some("draft"), Some(guid())).unwrap();
        let va = key.version_agnostic().unwrap();
        assert!(va.version_guid().is_none());
        assert_eq!(va.branch(), Some("draft"));
        let ca = key.course_agnostic().unwrap();
        assert!(ca.package_id().is_none());
        assert!(ca.branch().is_none());
        assert_eq!(ca.version_guid(), Some(guid()));

        assert!(matches!(
            ca.version_agnostic(),
            Err(KeyError::InsufficientSpecification(_))
        ));
        assert!(matches!(
            va.course_agnostic(),
            Err(KeyError::InsufficientSpecification(_))
        ));
    }

    #[test]
    fn html_id_and_url_reverse() {
        let key = CourseLocator::from_package_id("mit+eecs", Some("draft")).unwrap();
        assert_eq!(key.html_id(), "mit-eecs-branch-draft");
        assert_eq!(key.url_reverse("/course/", ""), "/course/mit+eecs/branch/draft");
        assert_eq!(
            key.url_reverse("/course", "settings"),
            "/course/mit+eecs/branch/draft/settings"
        );
    }

    // --- BlockUsageLocator ---

    #[test]
    fn usage_from_url() {
        let key =
            BlockUsageLocator::from_url("edx://mit.eecs.6002x/branch/published/block/HW3").unwrap();
        assert_eq!(key.org(), Some("mit"));
        assert_eq!(key.offering(), Some("eecs.6002x"));
        assert_eq!(key.branch(), Some("published"));
        assert_eq!(key.block_id(), "HW3");
        assert!(key.version_guid().is_none());
    }

    #[test]
    fn usage_requires_block() {
        let err = BlockUsageLocator::from_url("edx://mit+eecs").unwrap_err();
        assert!(matches!(err, KeyError::InsufficientSpecification(_)));
        let ok = BlockUsageLocator::new(LocatorSpec::package_id("mit+eecs").with_block("HW3")).unwrap();
        assert_eq!(ok.block_id(), "HW3");
    }

    #[test]
    fn usage_block_conflict_is_over_specified() {
        let err = BlockUsageLocator::new(LocatorSpec::url("edx://mit+eecs/block/a").with_block("b"))
            .unwrap_err();
        assert!(matches!(err, KeyError::OverSpecification(_)));
    }

    #[test]
    fn make_usage_key_and_course_key() {
        let course = CourseLocator::from_package_id("mit+eecs", Some("draft")).unwrap();
        let usage = course.make_usage_key("problem", "HW3").unwrap();
        assert_eq!(usage.course_key(), course);
        assert_eq!(usage.as_course_locator(), course);
        assert_eq!(usage.serialized(), "edx:mit+eecs/branch/draft/block/HW3");
    }

    #[test]
    fn map_into_course_keeps_block() {
        let usage = BlockUsageLocator::from_url("edx://mit+eecs/branch/draft/block/HW3").unwrap();
        let target = CourseLocator::from_version_guid(guid()).unwrap();
        let moved = usage.map_into_course(&target);
        assert_eq!(moved.block_id(), "HW3");
        assert_eq!(moved.course_key(), target);
        assert_eq!(moved, BlockUsageLocator::make_relative(&target, "HW3").unwrap());
    }

    #[test]
    fn usage_definition_key_is_insufficient() {
        let usage = BlockUsageLocator::from_url("edx://mit+eecs/block/HW3").unwrap();
        assert!(matches!(
            usage.definition_key(),
            Err(KeyError::InsufficientSpecification(_))
        ));
    }

    #[test]
    fn usage_from_field_values_requires_block() {
        let err = BlockUsageLocator::from_field_values(vec![
            Some("mit".into()),
            Some("eecs".into()),
            None,
            None,
            None,
        ])
        .unwrap_err();
        assert!(matches!(err, KeyError::InsufficientSpecification(_)));
    }

    #[test]
    fn usage_url_reverse() {
        let usage = BlockUsageLocator::from_url("edx://mit+eecs/block/HW3").unwrap();
        assert_eq!(usage.url_reverse("/x", ""), "/x/mit+eecs/block/HW3");
    }

    // --- DefinitionLocator ---

    #[test]
    fn definition_forms() {
        let key = DefinitionLocator::from_body(&format!("version/{GUID}")).unwrap();
        assert_eq!(key.version(), Some(guid()));
        assert_eq!(DefinitionLocator::from_body(GUID).unwrap(), key);
        assert_eq!(key.url(), format!("defx://version/{GUID}"));
        assert_eq!(key.serialized(), format!("defx:version/{GUID}"));
        assert!(DefinitionLocator::from_body("block/abc").is_err());
    }

    #[test]
    fn local_definition_ids() {
        let local = DefinitionLocator::local(LocalId::new("abc").unwrap());
        assert_eq!(local.to_body(), "version/localid_abc");
        assert!(local.version().is_none());
        assert!(local.definition_id().is_local());
        assert_eq!(DefinitionLocator::from_body(&local.to_body()).unwrap(), local);
        assert_ne!(LocalId::generate(), LocalId::generate());
    }

    // --- Locator::parse_url ---

    #[test]
    fn parse_url_picks_family_member() {
        let usage = Locator::parse_url("edx://mit.eecs.6002x/branch/published/block/HW3").unwrap();
        assert!(matches!(usage, Locator::Usage(ref k) if k.block_id() == "HW3"));

        let course = Locator::parse_url("edx://version/519665f6223ebd6980884f2b").unwrap();
        match course {
            Locator::Course(key) => {
                assert_eq!(key.version_guid(), Some(guid()));
                assert!(key.org().is_none());
                assert!(key.branch().is_none());
            }
            other => panic!("expected course locator, got {other:?}"),
        }

        let definition = Locator::parse_url(&format!("defx://version/{GUID}")).unwrap();
        assert_eq!(definition.version(), Some(guid()));
        assert!(matches!(definition, Locator::Definition(_)));
    }

    #[test]
    fn parse_url_requires_tag() {
        assert!(matches!(
            Locator::parse_url("mit+eecs"),
            Err(KeyError::InvalidKey(_))
        ));
    }
}
