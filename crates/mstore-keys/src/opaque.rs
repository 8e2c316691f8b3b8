//! Cross-cutting mechanics shared by every key type.
//!
//! A key is an immutable value whose identity is the ordered tuple of its
//! declared [`OpaqueKey::KEY_FIELDS`]. Its serialized form is
//! `<CANONICAL_NAMESPACE>:<body>`. Fields are private and there are no
//! setters; [`OpaqueKey::replace`] is the only way to derive a modified key:
//!
//! ```compile_fail
//! use mstore_keys::CourseLocator;
//!
//! let mut key = CourseLocator::from_parts(Some("mit"), Some("eecs"), None, None).unwrap();
//! key.branch = Some("draft".to_string());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

use crate::error::{KeyError, KeyResult};

/// Separator between the namespace and the body of a serialized key.
pub const NAMESPACE_SEPARATOR: char = ':';

/// An immutable, namespaced, serializable identifier.
pub trait OpaqueKey: Sized + Clone + Eq + Hash + fmt::Debug {
    /// The registry slot this key type belongs to.
    const KEY_TYPE: &'static str;
    /// Namespace written in front of the serialized body.
    const CANONICAL_NAMESPACE: &'static str;
    /// Ordered names of the fields that make up the key's identity.
    const KEY_FIELDS: &'static [&'static str];

    /// Parse a body (namespace already removed).
    ///
    /// Implementations must return [`KeyError::InvalidKey`] for input they
    /// don't understand so that trial parsing can move on to the next type.
    fn from_body(body: &str) -> KeyResult<Self>;

    /// Serialize without the namespace prefix.
    fn to_body(&self) -> String;

    /// Values of [`Self::KEY_FIELDS`], in order.
    fn field_values(&self) -> Vec<Option<String>>;

    /// Build a key from values of [`Self::KEY_FIELDS`], in order. Validates
    /// every invariant a direct constructor would.
    fn from_field_values(values: Vec<Option<String>>) -> KeyResult<Self>;

    /// `<namespace>:<body>`.
    fn serialized(&self) -> String {
        format!(
            "{}{NAMESPACE_SEPARATOR}{}",
            Self::CANONICAL_NAMESPACE,
            self.to_body()
        )
    }

    /// Construct from positional and named arguments bound to the key fields.
    fn from_args(args: KeyArgs) -> KeyResult<Self> {
        Self::from_field_values(args.bind(Self::KEY_FIELDS)?)
    }

    /// Return a new key with the named fields overridden. The receiver is
    /// untouched; the result is re-validated through
    /// [`Self::from_field_values`].
    fn replace(&self, overrides: &[(&str, Option<&str>)]) -> KeyResult<Self> {
        let mut values = self.field_values();
        for (name, value) in overrides {
            let idx = field_index(Self::KEY_FIELDS, name)?;
            values[idx] = value.map(str::to_string);
        }
        Self::from_field_values(values)
    }

    /// Named view of the key fields.
    fn fields(&self) -> BTreeMap<&'static str, Option<String>> {
        Self::KEY_FIELDS
            .iter()
            .copied()
            .zip(self.field_values())
            .collect()
    }
}

/// Split `serialized` into namespace and body at the first separator.
pub fn separate_namespace(serialized: &str) -> KeyResult<(&str, &str)> {
    serialized
        .split_once(NAMESPACE_SEPARATOR)
        .ok_or_else(|| KeyError::MissingNamespace(serialized.to_string()))
}

/// Positional and named construction arguments for a key.
#[derive(Clone, Debug, Default)]
pub struct KeyArgs {
    positional: Vec<Option<String>>,
    named: Vec<(String, Option<String>)>,
}

impl KeyArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: Option<&str>) -> Self {
        self.positional.push(value.map(str::to_string));
        self
    }

    /// Append a named argument.
    pub fn named(mut self, name: &str, value: Option<&str>) -> Self {
        self.named.push((name.to_string(), value.map(str::to_string)));
        self
    }

    /// Bind the arguments to `fields`.
    ///
    /// The total number of arguments must equal the field count; names must
    /// be declared fields; a field may be bound only once.
    pub fn bind(self, fields: &[&str]) -> KeyResult<Vec<Option<String>>> {
        let supplied = self.positional.len() + self.named.len();
        if supplied != fields.len() {
            return Err(KeyError::Arguments(format!(
                "expected {} arguments ({}), got {supplied}",
                fields.len(),
                fields.join(", ")
            )));
        }
        let mut slots: Vec<Option<Option<String>>> = vec![None; fields.len()];
        for (idx, value) in self.positional.into_iter().enumerate() {
            slots[idx] = Some(value);
        }
        for (name, value) in self.named {
            let idx = field_index(fields, &name)?;
            if slots[idx].is_some() {
                return Err(KeyError::Arguments(format!(
                    "duplicate values for field {name:?}"
                )));
            }
            slots[idx] = Some(value);
        }
        slots
            .into_iter()
            .zip(fields)
            .map(|(slot, name)| {
                slot.ok_or_else(|| KeyError::Arguments(format!("missing field {name:?}")))
            })
            .collect()
    }
}

fn field_index(fields: &[&str], name: &str) -> KeyResult<usize> {
    fields
        .iter()
        .position(|f| *f == name)
        .ok_or_else(|| KeyError::Arguments(format!("unknown key field {name:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[&str] = &["org", "offering", "branch"];

    #[test]
    fn separate_namespace_splits_at_first_separator() {
        assert_eq!(separate_namespace("edx:a:b").unwrap(), ("edx", "a:b"));
        assert_eq!(
            separate_namespace("no-separator"),
            Err(KeyError::MissingNamespace("no-separator".into()))
        );
    }

    #[test]
    fn binds_positional_then_named() {
        let values = KeyArgs::new()
            .arg(Some("mit"))
            .named("branch", Some("draft"))
            .named("offering", None)
            .bind(FIELDS)
            .unwrap();
        assert_eq!(
            values,
            vec![Some("mit".to_string()), None, Some("draft".to_string())]
        );
    }

    #[test]
    fn argument_count_must_match() {
        let err = KeyArgs::new().arg(Some("mit")).bind(FIELDS).unwrap_err();
        assert!(matches!(err, KeyError::Arguments(_)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = KeyArgs::new()
            .arg(Some("mit"))
            .arg(Some("eecs"))
            .named("revision", None)
            .bind(FIELDS)
            .unwrap_err();
        assert!(err.to_string().contains("revision"));
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let err = KeyArgs::new()
            .arg(Some("mit"))
            .arg(Some("eecs"))
            .named("org", Some("harvard"))
            .bind(FIELDS)
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
