//! Dependency version strings such as `1.5.0+cu101` or `3.7`.

use crate::error::MatrixError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A dotted numeric release with an optional local build tag.
///
/// `1.5.0+cu101` has release `[1, 5, 0]` and local tag `cu101`. Ordering
/// through [`Version::release_cmp`] looks only at the release components,
/// padding the shorter one with zeros, so `0.5 == 0.5.0` and the local tag
/// never decides which version is newer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    raw: String,
    release: Vec<u64>,
    local: Option<String>,
}

impl Version {
    /// Parse a version string.
    pub fn parse(raw: &str) -> Result<Self, MatrixError> {
        let trimmed = raw.trim();
        let (release_part, local) = match trimmed.split_once('+') {
            Some((release, local)) if !local.is_empty() => (release, Some(local.to_string())),
            Some(_) => return Err(MatrixError::InvalidVersion(raw.to_string())),
            None => (trimmed, None),
        };

        if release_part.is_empty() {
            return Err(MatrixError::InvalidVersion(raw.to_string()));
        }

        let release = release_part
            .split('.')
            .map(|component| component.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| MatrixError::InvalidVersion(raw.to_string()))?;

        Ok(Self {
            raw: trimmed.to_string(),
            release,
            local,
        })
    }

    /// The version exactly as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric release components.
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Local build tag after `+`, if any.
    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// Release part only, e.g. `1.5.0` for `1.5.0+cu101`.
    pub fn base(&self) -> String {
        self.release
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Compare release components numerically.
    pub fn release_cmp(&self, other: &Version) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    pub fn is_older_than(&self, other: &Version) -> bool {
        self.release_cmp(other) == Ordering::Less
    }
}

impl FromStr for Version {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_tag() {
        let v = Version::parse("1.5.0+cu101").unwrap();
        assert_eq!(v.release(), &[1, 5, 0]);
        assert_eq!(v.local(), Some("cu101"));
        assert_eq!(v.base(), "1.5.0");
        assert_eq!(v.to_string(), "1.5.0+cu101");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.x").is_err());
        assert!(Version::parse("1.5.0+").is_err());
        assert!(Version::parse("+cu101").is_err());
    }

    #[test]
    fn test_release_cmp_pads_missing_components() {
        let a = Version::parse("0.5").unwrap();
        let b = Version::parse("0.5.0+cu101").unwrap();
        assert_eq!(a.release_cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_release_cmp_is_numeric() {
        let a = Version::parse("0.10.0").unwrap();
        let b = Version::parse("0.9.0").unwrap();
        assert_eq!(a.release_cmp(&b), Ordering::Greater);
        assert!(b.is_older_than(&a));
    }

    #[test]
    fn test_companion_threshold_boundary() {
        let threshold = Version::parse("0.5").unwrap();
        assert!(!Version::parse("0.6.0+cu101").unwrap().is_older_than(&threshold));
        assert!(!Version::parse("0.5.0").unwrap().is_older_than(&threshold));
        assert!(Version::parse("0.4.2").unwrap().is_older_than(&threshold));
    }
}
