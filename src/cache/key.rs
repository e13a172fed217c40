//! Cache keys.
//!
//! A key is an ordered sequence of string segments, e.g.
//! `["locations", "42"]` or `["sessions", "today", start, end]`. Identity is
//! structural: two keys are equal iff their segments are equal element-wise.
//! Invalidation works on prefixes: the key `["locations"]` covers both
//! `["locations", "42"]` and `["locations", "list"]`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered segments identifying one cached read result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// Build a key from its segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Derive a longer key by appending one segment
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Append one segment in place
    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    /// The segments, in order
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no segments
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this key is a segment-wise prefix of `other`.
    ///
    /// Every key covers itself; the empty key covers everything.
    pub fn covers(&self, other: &CacheKey) -> bool {
        other.0.len() >= self.0.len() && self.0[..] == other.0[..self.0.len()]
    }
}

impl<S: Into<String>> FromIterator<S> for CacheKey {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}
