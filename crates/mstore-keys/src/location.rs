//! The legacy, unversioned addressing scheme.
//!
//! A [`Location`] is a six-part tuple `(tag, org, course, category, name,
//! revision)`; any part may be absent, in which case the location is a
//! pattern matching every value of that part. A [`CourseLocation`] is the
//! slash-separated `org/course/run` id of a legacy course.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KeyError, KeyResult};
use crate::opaque::OpaqueKey;

/// Tag of module locations.
pub const DEFAULT_TAG: &str = "i4x";
/// Category of a course root.
pub const COURSE_CATEGORY: &str = "course";

const ENCODED_SLASH: &str = "%2F";

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<tag>[^:/]+)://(?P<org>[^/]+)/(?P<course>[^/]+)/(?P<category>[^/]+)/(?P<name>[^@/]+)(?:@(?P<revision>[^/]+))?$",
    )
    .expect("static location regex")
});

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w.%-]").expect("static location regex"));

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w.:%-]").expect("static location regex"));

static INVALID_HTML_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w-]").expect("static location regex"));

const FIELDS: [&str; 6] = ["tag", "org", "course", "category", "name", "revision"];

/// A legacy module location. `None` parts are wildcards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "LocationParts")]
pub struct Location {
    tag: Option<String>,
    org: Option<String>,
    course: Option<String>,
    category: Option<String>,
    name: Option<String>,
    revision: Option<String>,
}

/// Unchecked deserialized form of [`Location`].
#[derive(Deserialize)]
struct LocationParts {
    tag: Option<String>,
    org: Option<String>,
    course: Option<String>,
    category: Option<String>,
    name: Option<String>,
    revision: Option<String>,
}

impl TryFrom<LocationParts> for Location {
    type Error = KeyError;

    fn try_from(parts: LocationParts) -> KeyResult<Self> {
        Self::new(
            parts.tag.as_deref(),
            parts.org.as_deref(),
            parts.course.as_deref(),
            parts.category.as_deref(),
            parts.name.as_deref(),
            parts.revision.as_deref(),
        )
    }
}

impl Location {
    /// Build from parts, rejecting characters outside each part's allowed set.
    pub fn new(
        tag: Option<&str>,
        org: Option<&str>,
        course: Option<&str>,
        category: Option<&str>,
        name: Option<&str>,
        revision: Option<&str>,
    ) -> KeyResult<Self> {
        let parts = [tag, org, course, category, name, revision];
        for (field, value) in FIELDS.iter().zip(parts) {
            let Some(value) = value else { continue };
            let re = if *field == "name" {
                &INVALID_NAME_CHARS
            } else {
                &INVALID_CHARS
            };
            if value.is_empty() || re.is_match(value) {
                return Err(KeyError::InvalidLocation(format!("{field} {value:?}")));
            }
        }
        let [tag, org, course, category, name, revision] = parts.map(|p| p.map(str::to_string));
        Ok(Self {
            tag,
            org,
            course,
            category,
            name,
            revision,
        })
    }

    /// Parse `{tag}://{org}/{course}/{category}/{name}[@{revision}]`.
    pub fn parse(url: &str) -> KeyResult<Self> {
        let caps = URL_RE
            .captures(url)
            .ok_or_else(|| KeyError::InvalidLocation(url.to_string()))?;
        let part = |name: &str| caps.name(name).map(|m| m.as_str());
        Self::new(
            part("tag"),
            part("org"),
            part("course"),
            part("category"),
            part("name"),
            part("revision"),
        )
    }

    /// A fully specified `i4x` location inside `course`.
    pub fn in_course(course: &CourseLocation, category: &str, name: &str) -> KeyResult<Self> {
        Self::new(
            Some(DEFAULT_TAG),
            Some(course.org()),
            Some(course.course()),
            Some(category),
            Some(name),
            None,
        )
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn org(&self) -> Option<&str> {
        self.org.as_deref()
    }

    pub fn course(&self) -> Option<&str> {
        self.course.as_deref()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// All six parts in declaration order.
    pub fn parts(&self) -> [Option<&str>; 6] {
        [
            self.tag(),
            self.org(),
            self.course(),
            self.category(),
            self.name(),
            self.revision(),
        ]
    }

    /// A new location with the named parts overridden.
    pub fn replace(&self, overrides: &[(&str, Option<&str>)]) -> KeyResult<Self> {
        let mut parts = self.parts();
        for (field, value) in overrides {
            let idx = FIELDS
                .iter()
                .position(|f| f == field)
                .ok_or_else(|| KeyError::Arguments(format!("unknown location field {field:?}")))?;
            parts[idx] = *value;
        }
        let [tag, org, course, category, name, revision] = parts;
        Self::new(tag, org, course, category, name, revision)
    }

    pub fn with_revision(&self, revision: Option<&str>) -> KeyResult<Self> {
        self.replace(&[("revision", revision)])
    }

    /// `tag`, `org`, `course`, `category` and `name` are all present.
    pub fn is_fully_specified(&self) -> bool {
        self.parts()[..5].iter().all(Option::is_some)
    }

    pub fn ensure_fully_specified(&self) -> KeyResult<()> {
        if self.is_fully_specified() {
            Ok(())
        } else {
            Err(KeyError::InsufficientSpecification(format!(
                "{self} is not fully specified"
            )))
        }
    }

    /// `self` matches `pattern` when every part `pattern` sets is equal.
    pub fn matches(&self, pattern: &Location) -> bool {
        self.parts()
            .iter()
            .zip(pattern.parts())
            .all(|(mine, wanted)| wanted.is_none() || *mine == wanted)
    }

    /// The url form. Wildcard parts render as `*`.
    pub fn url(&self) -> String {
        self.to_string()
    }

    /// The set parts joined with `-`, restricted to word characters.
    pub fn html_id(&self) -> String {
        let joined = self
            .parts()
            .iter()
            .flatten()
            .copied()
            .collect::<Vec<_>>()
            .join("-");
        Self::clean_for_html(&joined)
    }

    /// `org/course/run` of a `course` location.
    pub fn course_id(&self) -> KeyResult<CourseLocation> {
        match (self.category(), self.org(), self.course(), self.name()) {
            (Some(COURSE_CATEGORY), Some(org), Some(course), Some(run)) => {
                CourseLocation::new(org, course, run)
            }
            _ => Err(KeyError::InsufficientSpecification(format!(
                "{self} is not a course location"
            ))),
        }
    }

    /// The same module in another course. A course root also takes the run
    /// as its name.
    pub fn map_into_course(&self, course: &CourseLocation) -> KeyResult<Self> {
        let mut overrides = vec![("org", Some(course.org())), ("course", Some(course.course()))];
        if self.category() == Some(COURSE_CATEGORY) {
            overrides.push(("name", Some(course.run())));
        }
        self.replace(&overrides)
    }

    /// Replace characters not allowed in a location part with `_`.
    pub fn clean(value: &str) -> String {
        INVALID_CHARS.replace_all(value, "_").into_owned()
    }

    /// Replace characters not allowed in a location name with `_`.
    pub fn clean_for_url_name(value: &str) -> String {
        INVALID_NAME_CHARS.replace_all(value, "_").into_owned()
    }

    /// Replace anything but word characters and `-` with `_`.
    pub fn clean_for_html(value: &str) -> String {
        INVALID_HTML_CHARS.replace_all(value, "_").into_owned()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: Option<&str>| p.unwrap_or("*").to_string();
        write!(
            f,
            "{}://{}/{}/{}/{}",
            part(self.tag()),
            part(self.org()),
            part(self.course()),
            part(self.category()),
            part(self.name())
        )?;
        if let Some(revision) = self.revision() {
            write!(f, "@{revision}")?;
        }
        Ok(())
    }
}

/// The `org/course/run` id of a legacy course.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CourseLocation {
    org: String,
    course: String,
    run: String,
}

impl CourseLocation {
    pub fn new(org: &str, course: &str, run: &str) -> KeyResult<Self> {
        for (field, value) in [("org", org), ("course", course), ("run", run)] {
            if value.is_empty() || INVALID_CHARS.is_match(value) || value.contains('%') {
                return Err(KeyError::InvalidValue(format!("{field} {value:?}")));
            }
        }
        Ok(Self {
            org: org.to_string(),
            course: course.to_string(),
            run: run.to_string(),
        })
    }

    /// Parse `org/course/run`, also accepting `%2F` for the slashes.
    pub fn parse_course_id(course_id: &str) -> KeyResult<Self> {
        let decoded = course_id.replace(ENCODED_SLASH, "/").replace("%2f", "/");
        let parts: Vec<&str> = decoded.split('/').collect();
        match parts.as_slice() {
            [org, course, run] => Self::new(org, course, run),
            _ => Err(KeyError::InvalidKey(course_id.to_string())),
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn course(&self) -> &str {
        &self.course
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    /// `org/course/run`.
    pub fn course_id(&self) -> String {
        self.to_body()
    }

    /// The `course` category location of this course's root.
    pub fn location(&self) -> KeyResult<Location> {
        Location::in_course(self, COURSE_CATEGORY, &self.run)
    }

    /// A module location in this course.
    pub fn make_usage_key(&self, category: &str, name: &str) -> KeyResult<Location> {
        Location::in_course(self, category, name)
    }
}

impl OpaqueKey for CourseLocation {
    const KEY_TYPE: &'static str = "course_key";
    const CANONICAL_NAMESPACE: &'static str = "course-location";
    const KEY_FIELDS: &'static [&'static str] = &["org", "course", "run"];

    fn from_body(body: &str) -> KeyResult<Self> {
        Self::parse_course_id(body).map_err(|_| KeyError::InvalidKey(body.to_string()))
    }

    fn to_body(&self) -> String {
        format!("{}/{}/{}", self.org, self.course, self.run)
    }

    fn field_values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.org.clone()),
            Some(self.course.clone()),
            Some(self.run.clone()),
        ]
    }

    fn from_field_values(values: Vec<Option<String>>) -> KeyResult<Self> {
        match values.as_slice() {
            [Some(org), Some(course), Some(run)] => Self::new(org, course, run),
            [_, _, _] => Err(KeyError::InsufficientSpecification(
                "org, course and run are all required".into(),
            )),
            _ => Err(KeyError::Arguments(format!(
                "expected 3 field values, got {}",
                values.len()
            ))),
        }
    }
}

impl fmt::Display for CourseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized())
    }
}

impl fmt::Debug for CourseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CourseLocation({})", self.to_body())
    }
}

impl Serialize for CourseLocation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_body())
    }
}

impl<'de> Deserialize<'de> for CourseLocation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_course_id(&s).map_err(serde::de::Error::custom)
    }
}
