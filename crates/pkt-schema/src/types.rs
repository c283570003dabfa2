//! Names, revision ids and locations.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// A package name, normalized to lowercase.
///
/// Doubles as the query alias: the installed registry and the index are
/// both keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name, normalizing the input to lowercase.
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name can name a directory under the data root.
    ///
    /// ```
    /// use pkt_schema::PackageName;
    ///
    /// assert!(PackageName::new("ripgrep").is_valid());
    /// assert!(!PackageName::new("../../etc").is_valid());
    /// ```
    pub fn is_valid(&self) -> bool {
        is_path_component(&self.0)
    }
}

/// Whether `s` is usable as exactly one path component: not empty, not `.`
/// or `..`, and free of separators and NUL.
pub fn is_path_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\', '\0'])
}

impl AsRef<std::path::Path> for PackageName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

/// Identifier of one concrete package revision: `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Build the id for `name` at `version`.
    pub fn new(name: &PackageName, version: &str) -> Self {
        Self(format!("{name}@{}", version.trim()))
    }

    /// Wrap an id that was already formatted (e.g. read back from storage).
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for PackageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Normalized origin of package metadata: host plus path prefix, no scheme.
///
/// The empty location stands for artifacts installed from a local file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    /// Normalize a source or mirror URL.
    ///
    /// ```
    /// use pkt_schema::Location;
    ///
    /// let loc = Location::from_url("https://repo.example.org/pkt/index.json");
    /// assert_eq!(loc.as_str(), "repo.example.org/pkt");
    /// assert_eq!(Location::from_url("http://repo.example.org/pkt/"), loc);
    /// ```
    pub fn from_url(url: &str) -> Self {
        let url = url.trim();
        let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
        let without_query = without_scheme
            .split(['?', '#'])
            .next()
            .unwrap_or(without_scheme);
        let mut trimmed = without_query.trim_end_matches('/');

        // Drop a trailing document name such as `index.json`.
        if let Some((prefix, last)) = trimmed.rsplit_once('/') {
            if last.contains('.') {
                trimmed = prefix;
            }
        }

        Self(trimmed.to_lowercase())
    }

    /// The location of artifacts installed straight from disk.
    pub fn local() -> Self {
        Self(String::new())
    }

    /// Wrap an already-normalized location (e.g. read back from storage).
    pub fn from_raw(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// Whether this is the local (no origin) location.
    pub fn is_local(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the location as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "(local)")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_name_normalizes() {
        let name = PackageName::new("  LibFoo ");
        assert_eq!(name.as_str(), "libfoo");
        assert_eq!(name, "LIBFOO");
    }

    #[test]
    fn test_package_id_format() {
        let id = PackageId::new(&PackageName::new("foo"), "1.2.0");
        assert_eq!(id.as_str(), "foo@1.2.0");
    }

    #[test]
    fn test_location_normalization() {
        assert_eq!(
            Location::from_url("https://Mirror.example.org/a/b/list.json?x=1").as_str(),
            "mirror.example.org/a/b"
        );
        assert_eq!(Location::from_url("mirror.example.org").as_str(), "mirror.example.org");
        assert!(Location::local().is_local());
    }

    #[test]
    fn test_package_name_rejects_traversal() {
        for bad in ["", ".", "..", "../../tmp/x", "a/b", "nul\0byte", "..\\up"] {
            assert!(!PackageName::new(bad).is_valid(), "{bad:?}");
        }
        assert!(PackageName::new("lib.foo-2").is_valid());
        assert!(!is_path_component("1.0/../.."));
    }
}
