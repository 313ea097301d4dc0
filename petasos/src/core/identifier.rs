//! Opaque hierarchical identifiers.
//!
//! Processors, payload types, parcels and episodes are all named by
//! dot-separated hierarchical identifiers such as `acme.ward7.lab-results`.
//! The engine only compares them and walks their hierarchy; it never
//! interprets individual segments.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::InvalidArgumentError;

const SEPARATOR: char = '.';

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_\-:@]+$").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// A non-empty, comparable, hierarchical identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

/// Identifies one execution attempt.
pub type ParcelId = Identifier;
/// Identifies one logical unit-of-work occurrence shared by sibling attempts.
pub type EpisodeId = Identifier;
/// Identifies a running processor instance.
pub type ProcessorInstanceId = Identifier;
/// Identifies a kind of processor (a pipeline step).
pub type ProcessorTypeId = Identifier;

impl Identifier {
    /// Parses an identifier, validating every segment.
    pub fn parse(value: &str) -> Result<Self, InvalidArgumentError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(InvalidArgumentError::missing("Identifier::parse", "value"));
        }
        for segment in trimmed.split(SEPARATOR) {
            Self::check_segment(segment)?;
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Builds an identifier from its segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, InvalidArgumentError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut joined = String::new();
        for segment in segments {
            let segment = segment.as_ref();
            Self::check_segment(segment)?;
            if !joined.is_empty() {
                joined.push(SEPARATOR);
            }
            joined.push_str(segment);
        }
        if joined.is_empty() {
            return Err(InvalidArgumentError::missing("Identifier::from_segments", "segments"));
        }
        Ok(Self(joined))
    }

    /// Generates a fresh instance identifier as a UUID leaf under `prefix`.
    #[must_use]
    pub fn generate(prefix: &Self) -> Self {
        Self(format!("{}{SEPARATOR}{}", prefix.0, uuid::Uuid::new_v4()))
    }

    /// Returns a child identifier with one more segment.
    pub fn child(&self, segment: &str) -> Result<Self, InvalidArgumentError> {
        Self::check_segment(segment)?;
        Ok(Self(format!("{}{SEPARATOR}{segment}", self.0)))
    }

    /// Returns the parent identifier, or `None` for a root identifier.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(SEPARATOR)
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// Returns the last segment.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or(&self.0)
    }

    /// Returns an iterator over the segments, root first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Returns true if `self` lies strictly below `ancestor` in the hierarchy.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0[ancestor.0.len()..].starts_with(SEPARATOR)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn check_segment(segment: &str) -> Result<(), InvalidArgumentError> {
        if segment_pattern().is_match(segment) {
            Ok(())
        } else {
            Err(InvalidArgumentError::missing("Identifier", "segment")
                .with_reason(format!("'{segment}' is not a valid identifier segment")))
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = InvalidArgumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = InvalidArgumentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = InvalidArgumentError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    #[test]
    fn test_parse_valid_identifier() {
        let ident = id("acme.ward7.lab-results");
        assert_eq!(ident.depth(), 3);
        assert_eq!(ident.leaf(), "lab-results");
        assert_eq!(ident.segments().collect::<Vec<_>>(), vec!["acme", "ward7", "lab-results"]);
    }

    #[test]
    fn test_parse_rejects_empty_and_bad_segments() {
        assert!(Identifier::parse("").is_err());
        assert!(Identifier::parse("   ").is_err());
        assert!(Identifier::parse("acme..ward").is_err());
        assert!(Identifier::parse("acme.ward 7").is_err());
    }

    #[test]
    fn test_parent_and_child() {
        let parent = id("acme.ward7");
        let child = parent.child("beds").unwrap();
        assert_eq!(child.as_str(), "acme.ward7.beds");
        assert_eq!(child.parent(), Some(parent));
        assert_eq!(id("acme").parent(), None);
    }

    #[test]
    fn test_is_descendant_of() {
        let root = id("acme.ward");
        assert!(id("acme.ward.beds").is_descendant_of(&root));
        assert!(!id("acme.wardrobe").is_descendant_of(&root));
        assert!(!root.is_descendant_of(&root));
    }

    #[test]
    fn test_generate_is_unique_child() {
        let prefix = id("parcels");
        let a = Identifier::generate(&prefix);
        let b = Identifier::generate(&prefix);
        assert_ne!(a, b);
        assert!(a.is_descendant_of(&prefix));
    }

    #[test]
    fn test_from_segments() {
        let ident = Identifier::from_segments(["acme", "lab"]).unwrap();
        assert_eq!(ident, id("acme.lab"));
        assert!(Identifier::from_segments(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let ident = id("acme.lab");
        let json = serde_json::to_string(&ident).unwrap();
        assert_eq!(json, r#""acme.lab""#);
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ident);
        assert!(serde_json::from_str::<Identifier>(r#""""#).is_err());
    }
}
