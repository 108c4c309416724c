//! Recognized premises locations.
//!
//! A [`LocationSet`] is loaded once at startup. User-supplied names resolve
//! case-insensitively to the canonical spelling, so `"block a"` and
//! `"Block A"` name the same place. Once resolved, [`Location`] values
//! compare exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, TokenError};

/// Default locations of a single-site deployment.
pub const DEFAULT_LOCATIONS: [&str; 7] =
    ["FrontGate", "Block A", "Block B", "Block C", "Block D", "Block E", "Block F"];

/// A canonical location name.
///
/// Values come from [`LocationSet::resolve`] or from records that were
/// written with one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    /// The canonical spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Location {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The ordered set of recognized locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSet {
    locations: Vec<Location>,
}

impl LocationSet {
    /// Builds a set from canonical names, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the set is empty, or if a name is blank,
    /// carries surrounding whitespace, or collides case-insensitively with an
    /// earlier one.
    pub fn new<I, S>(names: I) -> std::result::Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut locations: Vec<Location> = Vec::new();
        for name in names {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(ConfigError::BlankLocation);
            }
            if name.trim() != name {
                return Err(ConfigError::UntrimmedLocation(name));
            }
            if locations.iter().any(|existing| existing.0.eq_ignore_ascii_case(&name)) {
                return Err(ConfigError::DuplicateLocation(name));
            }
            locations.push(Location(name));
        }

        if locations.is_empty() {
            return Err(ConfigError::NoLocations);
        }
        Ok(Self { locations })
    }

    /// Resolves a user-supplied name to its canonical location.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::UnknownLocation`] if nothing matches.
    pub fn resolve(&self, name: &str) -> Result<Location> {
        self.find(name).cloned().ok_or_else(|| TokenError::unknown_location(name))
    }

    /// Whether `location` is a member, compared exactly.
    #[must_use]
    pub fn contains(&self, location: &Location) -> bool {
        self.locations.contains(location)
    }

    /// Locations in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }

    /// Number of recognized locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Always `false`; construction rejects empty sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    fn find(&self, name: &str) -> Option<&Location> {
        self.locations.iter().find(|location| location.0.eq_ignore_ascii_case(name))
    }
}

impl Default for LocationSet {
    fn default() -> Self {
        Self { locations: DEFAULT_LOCATIONS.iter().map(|name| Location((*name).to_owned())).collect() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Block A", "Block A")]
    #[case("block a", "Block A")]
    #[case("BLOCK A", "Block A")]
    #[case("frontgate", "FrontGate")]
    fn test_resolve_is_case_insensitive(#[case] input: &str, #[case] canonical: &str) {
        let set = LocationSet::default();
        assert_eq!(set.resolve(input).unwrap().as_str(), canonical);
    }

    #[rstest]
    #[case("Block G")]
    #[case("")]
    #[case(" Block A")]
    #[case("BlockA")]
    fn test_resolve_rejects_unknown(#[case] input: &str) {
        let set = LocationSet::default();
        assert!(matches!(set.resolve(input), Err(TokenError::UnknownLocation { .. })));
    }

    #[test]
    fn test_default_order() {
        let set = LocationSet::default();
        let names: Vec<&str> = set.iter().map(Location::as_str).collect();
        assert_eq!(names, DEFAULT_LOCATIONS);
    }

    #[test]
    fn test_new_rejects_bad_sets() {
        assert!(matches!(LocationSet::new(Vec::<String>::new()), Err(ConfigError::NoLocations)));
        assert!(matches!(LocationSet::new(["Lab", "  "]), Err(ConfigError::BlankLocation)));
        assert!(matches!(LocationSet::new(["Lab ", "Gym"]), Err(ConfigError::UntrimmedLocation(_))));
        assert!(matches!(LocationSet::new(["Lab", "LAB"]), Err(ConfigError::DuplicateLocation(_))));
    }

    #[test]
    fn test_contains_is_exact() {
        let set = LocationSet::new(["Lab", "Gym"]).unwrap();
        let lab = set.resolve("lab").unwrap();
        assert!(set.contains(&lab));
        assert!(!LocationSet::default().contains(&lab));
    }

    #[test]
    fn test_serde_transparent() {
        let location = LocationSet::default().resolve("block b").unwrap();
        assert_eq!(serde_json::to_string(&location).unwrap(), "\"Block B\"");
    }
}
