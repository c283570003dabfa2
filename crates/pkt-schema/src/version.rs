//! Version triples, constraints and dependency declarations.
//!
//! Parsing here is total: a malformed segment reads as `0` instead of
//! failing, so a broken index entry can never abort resolution.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::types::PackageName;

/// A `(major, minor, patch)` triple compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionTriple {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl VersionTriple {
    /// Build a triple from its components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted version string. Absent or malformed components are `0`.
    ///
    /// ```
    /// use pkt_schema::VersionTriple;
    ///
    /// assert_eq!(VersionTriple::parse("1.2"), VersionTriple::new(1, 2, 0));
    /// assert_eq!(VersionTriple::parse("1.x.3"), VersionTriple::new(1, 0, 3));
    /// ```
    pub fn parse(s: &str) -> Self {
        let mut parts = s.trim().split('.').map(parse_segment);
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

fn parse_segment(segment: &str) -> u64 {
    segment.trim().parse().unwrap_or(0)
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Comparison operator of a [`VersionConstraint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConstraintOp {
    /// No constraint: the highest available version wins.
    #[default]
    Highest,
    /// Exactly this version.
    Exact,
    /// This version or newer (`>=`).
    AtLeast,
    /// This version or older (`<=`).
    AtMost,
}

/// An operator plus a version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VersionConstraint {
    /// How candidates are compared against `version`.
    pub op: ConstraintOp,
    /// The reference version (ignored for [`ConstraintOp::Highest`]).
    pub version: VersionTriple,
}

impl VersionConstraint {
    /// The "highest available" constraint.
    pub const HIGHEST: Self = Self {
        op: ConstraintOp::Highest,
        version: VersionTriple::new(0, 0, 0),
    };

    /// Parse `""`, `V`, `>=V` or `<=V`.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return Self::HIGHEST;
        }
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (ConstraintOp::AtLeast, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (ConstraintOp::AtMost, rest)
        } else {
            (ConstraintOp::Exact, s)
        };
        Self {
            op,
            version: VersionTriple::parse(rest),
        }
    }

    /// Whether `candidate` satisfies this constraint.
    pub fn matches(&self, candidate: VersionTriple) -> bool {
        let ord = candidate.cmp(&self.version);
        match self.op {
            ConstraintOp::Highest => true,
            ConstraintOp::Exact => ord == Ordering::Equal,
            ConstraintOp::AtLeast => ord != Ordering::Less,
            ConstraintOp::AtMost => ord != Ordering::Greater,
        }
    }
}

/// Whether the version string `candidate` satisfies `constraint`.
///
/// Pure and total.
pub fn satisfies(candidate: &str, constraint: &VersionConstraint) -> bool {
    constraint.matches(VersionTriple::parse(candidate))
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            ConstraintOp::Highest => Ok(()),
            ConstraintOp::Exact => write!(f, "{}", self.version),
            ConstraintOp::AtLeast => write!(f, ">={}", self.version),
            ConstraintOp::AtMost => write!(f, "<={}", self.version),
        }
    }
}

/// A dependency as written by package authors and users.
///
/// Accepted forms: `name` (highest), `name@1.2` (exact), `>=name@1.2`,
/// `<=name@1.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DependencySpec {
    /// Target package.
    pub name: PackageName,
    /// Accepted versions.
    pub constraint: VersionConstraint,
}

impl DependencySpec {
    /// Parse a declaration. Total, like [`VersionConstraint::parse`].
    ///
    /// ```
    /// use pkt_schema::{ConstraintOp, DependencySpec};
    ///
    /// let spec = DependencySpec::parse(">=openssl@3.0");
    /// assert_eq!(spec.name.as_str(), "openssl");
    /// assert_eq!(spec.constraint.op, ConstraintOp::AtLeast);
    /// ```
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (ConstraintOp::AtLeast, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (ConstraintOp::AtMost, rest)
        } else {
            (ConstraintOp::Exact, s)
        };

        match rest.split_once('@') {
            Some((name, version)) if !version.trim().is_empty() => Self {
                name: PackageName::new(name),
                constraint: VersionConstraint {
                    op,
                    version: VersionTriple::parse(version),
                },
            },
            Some((name, _)) => Self::highest(PackageName::new(name)),
            None => Self::highest(PackageName::new(rest)),
        }
    }

    /// Any version of `name`, highest preferred.
    pub fn highest(name: PackageName) -> Self {
        Self {
            name,
            constraint: VersionConstraint::HIGHEST,
        }
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = self.constraint.version;
        match self.constraint.op {
            ConstraintOp::Highest => write!(f, "{}", self.name),
            ConstraintOp::Exact => write!(f, "{}@{version}", self.name),
            ConstraintOp::AtLeast => write!(f, ">={}@{version}", self.name),
            ConstraintOp::AtMost => write!(f, "<={}@{version}", self.name),
        }
    }
}

impl From<String> for DependencySpec {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<DependencySpec> for String {
    fn from(spec: DependencySpec) -> Self {
        spec.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triple_ordering() {
        assert!(VersionTriple::parse("1.10") > VersionTriple::parse("1.9.9"));
        assert!(VersionTriple::parse("2") > VersionTriple::parse("1.99.99"));
        assert_eq!(VersionTriple::parse("1.2"), VersionTriple::parse("1.2.0"));
    }

    #[test]
    fn test_malformed_segments_are_zero() {
        assert_eq!(VersionTriple::parse(""), VersionTriple::default());
        assert_eq!(VersionTriple::parse("abc"), VersionTriple::default());
        assert_eq!(VersionTriple::parse("3.beta.1"), VersionTriple::new(3, 0, 1));
    }

    #[test]
    fn test_constraint_parse() {
        assert_eq!(VersionConstraint::parse("").op, ConstraintOp::Highest);
        assert_eq!(VersionConstraint::parse("1.2").op, ConstraintOp::Exact);
        let ge = VersionConstraint::parse(">=1.2.0");
        assert_eq!(ge.op, ConstraintOp::AtLeast);
        assert_eq!(ge.version, VersionTriple::new(1, 2, 0));
        assert_eq!(VersionConstraint::parse("<=0.9").op, ConstraintOp::AtMost);
    }

    #[test]
    fn test_satisfies() {
        let ge = VersionConstraint::parse(">=1.2.0");
        assert!(satisfies("1.2", &ge));
        assert!(satisfies("1.3.0", &ge));
        assert!(!satisfies("1.1.9", &ge));

        let le = VersionConstraint::parse("<=1.2");
        assert!(satisfies("1.2.0", &le));
        assert!(!satisfies("1.2.1", &le));

        let exact = VersionConstraint::parse("2.0");
        assert!(satisfies("2.0.0", &exact));
        assert!(!satisfies("2.0.1", &exact));

        assert!(satisfies("garbage", &VersionConstraint::HIGHEST));
    }

    #[test]
    fn test_constraint_display_round_trips() {
        for raw in ["", "1.2.3", ">=1.0.0", "<=4.5.6"] {
            assert_eq!(VersionConstraint::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_dependency_spec_forms() {
        let bare = DependencySpec::parse("zlib");
        assert_eq!(bare.name.as_str(), "zlib");
        assert_eq!(bare.constraint, VersionConstraint::HIGHEST);

        let exact = DependencySpec::parse("zlib@1.3");
        assert_eq!(exact.constraint.op, ConstraintOp::Exact);
        assert_eq!(exact.constraint.version, VersionTriple::new(1, 3, 0));

        let le = DependencySpec::parse("<=zlib@1.3");
        assert_eq!(le.constraint.op, ConstraintOp::AtMost);

        let empty_version = DependencySpec::parse("zlib@");
        assert_eq!(empty_version.constraint, VersionConstraint::HIGHEST);

        assert_eq!(DependencySpec::parse(">=Zlib@1.3").to_string(), ">=zlib@1.3.0");
    }
}
