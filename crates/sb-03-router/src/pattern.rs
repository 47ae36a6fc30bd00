//! Wildcard route patterns.
//!
//! Patterns match against a message's routing key, `"{channel}:{type}"`.
//! A `*` matches any run of characters, including separators, so `api.*`
//! covers every kind on every `api.`-prefixed channel and `*:deleted`
//! covers deletions everywhere. Patterns are parsed once at route
//! registration, not re-interpreted per message.

use serde::{Deserialize, Serialize};

/// A parsed wildcard pattern.
///
/// Internally the pattern is split on `*` into literal runs; matching is an
/// anchored prefix/suffix check plus an ordered scan for the middle runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    literals: Vec<String>,
    anchored_start: bool,
    anchored_end: bool,
}

impl RoutePattern {
    /// Parses a pattern string.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            literals: pattern
                .split('*')
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
            anchored_start: !pattern.starts_with('*'),
            anchored_end: !pattern.ends_with('*'),
        }
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains a wildcard.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        !self.raw.contains('*')
    }

    /// Whether this pattern matches an input string.
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        if self.is_literal() {
            return self.raw == input;
        }
        if self.literals.is_empty() {
            // Pure wildcard ("*", "**", ...).
            return true;
        }

        let mut remaining = input;
        let last = self.literals.len() - 1;

        for (index, literal) in self.literals.iter().enumerate() {
            if index == 0 && self.anchored_start {
                let Some(rest) = remaining.strip_prefix(literal.as_str()) else {
                    return false;
                };
                remaining = rest;
                continue;
            }
            if index == last && self.anchored_end {
                // `remaining` no longer contains text consumed by earlier
                // literals, so a plain suffix check cannot overlap them.
                return remaining.ends_with(literal.as_str());
            }
            match remaining.find(literal.as_str()) {
                Some(at) => remaining = &remaining[at + literal.len()..],
                None => return false,
            }
        }
        true
    }
}

impl Serialize for RoutePattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for RoutePattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(RoutePattern::parse(&raw))
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
