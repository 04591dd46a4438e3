use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::UpdateError;

/// Version string of the running build, in the `V<major>.<minor>.<patch>`
/// grammar used everywhere by the updater.
const CURRENT_VERSION: &str = concat!("V", env!("CARGO_PKG_VERSION"));

/// A release version of the application.
///
/// Parses from and renders to exactly `V<major>.<minor>.<patch>` (digits
/// only). Ordering is lexicographic over (major, minor, patch), which the
/// derived `Ord` gives us from field order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The version of the running build.
    pub fn current() -> Self {
        // The package version is a plain triple; degrade to the zero version
        // rather than panic inside the updater, but say so, since a zero
        // current version changes which manifest entries are eligible.
        CURRENT_VERSION.parse().unwrap_or_else(|err| {
            warn!("package version {CURRENT_VERSION:?} is not a plain triple ({err}), treating the running build as V0.0.0");
            Self::new(0, 0, 0)
        })
    }

    /// Eligibility gate for manifest selection: a candidate qualifies only
    /// if it shares the current major version or is exactly one major ahead.
    /// Jumps of two or more majors are never offered automatically, so the
    /// user cannot skip an intermediate, possibly-breaking upgrade.
    pub fn is_same_major_or_one_greater(candidate: Version, current: Version) -> bool {
        matches!(candidate.major.checked_sub(current.major), Some(0 | 1))
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let bad = || UpdateError::Parse(format!("invalid version string: {text:?}"));

        let rest = text.strip_prefix('V').ok_or_else(bad)?;
        let mut parts = rest.split('.');
        let mut next = || -> Result<u32, UpdateError> {
            let part = parts.next().ok_or_else(bad)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            part.parse().map_err(|_| bad())
        };

        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return Err(bad());
        }

        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(|err| D::Error::custom(format!("{err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_versions() {
        let version: Version = "V1.2.3".parse().unwrap();
        assert_eq!(version, Version::new(1, 2, 3));

        let version: Version = "V10.11.12".parse().unwrap();
        assert_eq!(version, Version::new(10, 11, 12));
    }

    #[test]
    fn rejects_malformed_versions() {
        for text in [
            "1.2.3", "v1.2.3", "V1.2", "V1.2.3.4", "V1..3", "V1.2.x", "V 1.2.3", "V-1.2.3", "V",
            "",
        ] {
            assert!(text.parse::<Version>().is_err(), "accepted {text:?}");
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        let version = Version::new(3, 14, 159);
        let parsed: Version = version.to_string().parse().unwrap();
        assert_eq!(parsed, version);
    }

    #[test]
    fn orders_by_major_then_minor_then_patch() {
        assert!(Version::new(2, 0, 0) > Version::new(1, 9, 9));
        assert!(Version::new(1, 2, 0) > Version::new(1, 1, 9));
        assert!(Version::new(1, 1, 2) > Version::new(1, 1, 1));
        assert_eq!(Version::new(1, 1, 1), Version::new(1, 1, 1));
    }

    #[test]
    fn eligibility_allows_same_or_next_major_only() {
        let current = Version::new(1, 0, 0);
        assert!(Version::is_same_major_or_one_greater(
            Version::new(1, 9, 9),
            current
        ));
        assert!(Version::is_same_major_or_one_greater(
            Version::new(2, 0, 0),
            current
        ));
        // Minor and patch never matter for eligibility.
        assert!(Version::is_same_major_or_one_greater(
            Version::new(2, 99, 99),
            current
        ));
        assert!(!Version::is_same_major_or_one_greater(
            Version::new(3, 0, 0),
            current
        ));
        assert!(!Version::is_same_major_or_one_greater(
            Version::new(0, 9, 9),
            current
        ));
    }

    #[test]
    fn eligibility_holds_at_the_largest_major() {
        let current = Version::new(u32::MAX, 0, 0);
        assert!(Version::is_same_major_or_one_greater(current, current));
        assert!(!Version::is_same_major_or_one_greater(
            Version::new(0, 0, 0),
            current
        ));
        assert!(!Version::is_same_major_or_one_greater(
            Version::new(u32::MAX - 1, 0, 0),
            current
        ));
    }

    #[test]
    fn current_version_parses_from_package_metadata() {
        let current = Version::current();
        assert_eq!(current.to_string(), CURRENT_VERSION);
    }

    #[test]
    fn serde_uses_the_textual_grammar() {
        let version = Version::new(1, 2, 3);
        assert_eq!(serde_json::to_string(&version).unwrap(), "\"V1.2.3\"");
        let back: Version = serde_json::from_str("\"V1.2.3\"").unwrap();
        assert_eq!(back, version);
        assert!(serde_json::from_str::<Version>("\"1.2.3\"").is_err());
    }
}
