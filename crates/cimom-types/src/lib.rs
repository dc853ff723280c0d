pub mod class;
pub mod datetime;
pub mod path;
pub mod value;

pub use class::{CimClass, CimInstance, CimProperty, CimQualifier, QualifierFlavor};
pub use datetime::CimDateTime;
pub use path::{CimKeyBinding, CimObjectPath, KeyBindingValue};
pub use value::{CimType, CimValue, CimValueArray};

use std::fmt;

/// A CIM element name (class, property, qualifier, method, key).
///
/// CIM names compare ASCII-case-insensitively but preserve the original
/// spelling for display and round-tripping. Equality and hashing fold case so
/// `CimName` can key maps directly.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CimName(String);

impl CimName {
    /// Wrap a name, preserving its spelling.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The original spelling.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is empty (an unset/absent name marker).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Case-insensitive comparison against a raw string.
    #[must_use]
    pub fn equals_ignore_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for CimName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for CimName {}

impl std::hash::Hash for CimName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for CimName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CimName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let a = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let b = other.0.bytes().map(|b| b.to_ascii_lowercase());
        a.cmp(b)
    }
}

impl fmt::Display for CimName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CimName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CimName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A CIM namespace path, e.g. `root/cimv2`.
///
/// Namespaces compare case-insensitively like names; segments are separated
/// by `/`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(ns: impl Into<String>) -> Self {
        Self(ns.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Namespace {}

impl std::hash::Hash for Namespace {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
