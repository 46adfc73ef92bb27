// src/version/mod.rs

//! Version parsing and relation satisfaction for package dependencies
//!
//! Installed-package versions follow the `[epoch:]version[-release]` shape
//! used by most installers. Comparison normalizes through semver where it
//! can and falls back to string ordering where it cannot.

use std::cmp::Ordering;
use std::fmt;

use semver::Version;

use crate::error::{Error, Result};

/// A parsed package version with epoch, version, and release components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl PkgVersion {
    /// Parse a version string.
    ///
    /// Format: `[epoch:]version[-release]`
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1.2.3-4" → epoch=0, version="1.2.3", release=Some("4")
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch_str, rest) = match s.find(':') {
            Some(pos) => (&s[..pos], &s[pos + 1..]),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str.parse::<u64>().map_err(|e| {
                Error::InvalidRecipeFormat(format!("invalid epoch in version '{}': {}", s, e))
            })?
        };

        let (version, release) = match rest.find('-') {
            Some(pos) => (rest[..pos].to_string(), Some(rest[pos + 1..].to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::InvalidRecipeFormat(format!(
                "empty version component in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Normalize to a semver version for comparison.
    ///
    /// Non-semver strings are reduced to the numeric major.minor.patch
    /// prefix they expose.
    fn to_semver(&self) -> Version {
        if let Ok(v) = Version::parse(&self.version) {
            return v;
        }

        let parts: Vec<&str> = self.version.split('.').collect();
        let num = |i: usize| {
            parts
                .get(i)
                .map(|s| {
                    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
                    digits.parse::<u64>().unwrap_or(0)
                })
                .unwrap_or(0)
        };
        Version::new(num(0), num(1), num(2))
    }

    /// Compare two versions: epoch first, then semver-normalized version,
    /// then release lexicographically.
    pub fn compare(&self, other: &PkgVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.to_semver().cmp(&other.to_semver()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Semver collapse can equate distinct strings; break the tie textually
        match self.version.cmp(&other.version) {
            Ordering::Equal => {}
            ord => return ord,
        }

        self.release.cmp(&other.release)
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Relation between a dependency constraint and an installed version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relation {
    /// Any version satisfies the dependency
    #[default]
    None,
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Relation {
    /// Operator spelling, empty for `None`
    pub fn operator(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Eq => "=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }

    /// Does `installed` stand in this relation to `wanted`?
    pub fn holds(&self, installed: &PkgVersion, wanted: &PkgVersion) -> bool {
        let ord = installed.compare(wanted);
        match self {
            Self::None => true,
            Self::Eq => ord == Ordering::Equal,
            Self::Ge => ord != Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Lt => ord == Ordering::Less,
        }
    }
}

/// Check a raw installed-version string against a raw constraint version.
///
/// Unparseable versions satisfy only the `None` relation; a malformed
/// installed version never satisfies a real constraint.
pub fn satisfies(installed: &str, relation: Relation, wanted: Option<&str>) -> bool {
    match (relation, wanted) {
        (Relation::None, _) => true,
        (_, None) => true,
        (rel, Some(want)) => match (PkgVersion::parse(installed), PkgVersion::parse(want)) {
            (Ok(inst), Ok(want)) => rel.holds(&inst, &want),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let v = PkgVersion::parse("1.2.3").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.2.3");
        assert_eq!(v.release, None);
    }

    #[test]
    fn test_parse_epoch_and_release() {
        let v = PkgVersion::parse("2:1.2.3-4").unwrap();
        assert_eq!(v.epoch, 2);
        assert_eq!(v.version, "1.2.3");
        assert_eq!(v.release.as_deref(), Some("4"));
        assert_eq!(v.to_string(), "2:1.2.3-4");
    }

    #[test]
    fn test_parse_empty_version_rejected() {
        assert!(PkgVersion::parse("").is_err());
        assert!(PkgVersion::parse("1:").is_err());
    }

    #[test]
    fn test_compare_epoch_dominates() {
        let low = PkgVersion::parse("9.9.9").unwrap();
        let high = PkgVersion::parse("1:0.1").unwrap();
        assert_eq!(low.compare(&high), Ordering::Less);
    }

    #[test]
    fn test_compare_partial_versions() {
        let a = PkgVersion::parse("4").unwrap();
        let b = PkgVersion::parse("4.7").unwrap();
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
    }

    #[test]
    fn test_relation_holds() {
        let installed = PkgVersion::parse("4.9").unwrap();
        let wanted = PkgVersion::parse("4.7").unwrap();

        assert!(Relation::Ge.holds(&installed, &wanted));
        assert!(Relation::Gt.holds(&installed, &wanted));
        assert!(!Relation::Le.holds(&installed, &wanted));
        assert!(!Relation::Eq.holds(&installed, &wanted));
        assert!(Relation::None.holds(&installed, &wanted));
    }

    #[test]
    fn test_satisfies_strings() {
        assert!(satisfies("15.1.1", Relation::Ge, Some("4.7")));
        assert!(!satisfies("4.6", Relation::Ge, Some("4.7")));
        assert!(satisfies("anything", Relation::None, None));
        // Malformed installed version cannot satisfy a real constraint
        assert!(!satisfies("", Relation::Ge, Some("1.0")));
    }

    #[test]
    fn test_release_breaks_ties() {
        let a = PkgVersion::parse("1.0-1").unwrap();
        let b = PkgVersion::parse("1.0-2").unwrap();
        assert_eq!(a.compare(&b), Ordering::Less);
    }
}
