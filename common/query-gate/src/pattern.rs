//! Glob-style identifier matching
//!
//! Dataset and table allow-lists use `*` as the only wildcard. Patterns are
//! not regular expressions and matching is case-sensitive.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `*`-wildcard pattern matched against dataset or table identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessPattern(String);

impl AccessPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this pattern admits `candidate`
    pub fn matches(&self, candidate: &str) -> bool {
        matches(&self.0, candidate)
    }
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccessPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

impl From<String> for AccessPattern {
    fn from(pattern: String) -> Self {
        Self(pattern)
    }
}

/// Match `candidate` against a `*`-glob pattern.
///
/// The pattern is split on `*`; the literal segments must occur in order
/// without overlapping. The first segment is anchored to the start of the
/// candidate and the last to its end, unless the pattern begins or ends with
/// `*` (in which case that segment is empty and anchors trivially).
///
/// An empty pattern matches nothing and an empty candidate is never matched.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    if pattern.is_empty() || candidate.is_empty() {
        return false;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == candidate;
    }

    let head = segments[0];
    let tail = segments[segments.len() - 1];

    let Some(mut rest) = candidate.strip_prefix(head) else {
        return false;
    };

    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }

    rest.ends_with(tail)
}
