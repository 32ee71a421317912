//! Canonical, traversal-safe storage paths.
//!
//! Every path that reaches a storage backend or an access token goes through
//! [`normalize`]. Traversal segments are neutralized rather than rejected:
//! `..` at the root is dropped, so a normalized path can never point above the
//! storage root.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The canonical separator used in every normalized path.
pub const SEPARATOR: char = '/';

/// A backend-relative file or directory key.
///
/// Never starts with a separator, contains no `.`/`..`/empty segments, and
/// uses `/` as its only separator. The empty path is the storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// The storage root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalizes `raw` with no prefix.
    pub fn new(raw: &str) -> Self {
        normalize(raw, None)
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the path and returns the inner string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns true for the storage root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Returns the last segment, or an empty string for the root.
    pub fn basename(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or("")
    }

    /// Returns the parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<NormalizedPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Appends a raw child path, normalizing the result.
    pub fn join(&self, child: &str) -> NormalizedPath {
        normalize(child, Some(&self.0))
    }

    /// Returns true if `self` equals `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &NormalizedPath) -> bool {
        if ancestor.is_root() {
            return true;
        }
        self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0)
                && self.0[ancestor.0.len()..].starts_with(SEPARATOR))
    }

    /// Re-expresses this path relative to `prefix`.
    ///
    /// Returns `None` when the path does not lie below the prefix.
    pub fn strip_prefix(&self, prefix: &NormalizedPath) -> Option<NormalizedPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        let rest = self.0[prefix.0.len()..].trim_start_matches(SEPARATOR);
        Some(Self(rest.to_string()))
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NormalizedPath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl Serialize for NormalizedPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NormalizedPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(normalize(&raw, None))
    }
}

/// Converts a user path and optional prefix into a [`NormalizedPath`].
///
/// Both `/` and `\` are treated as separators. `.` segments are dropped, `..`
/// pops the previously retained segment and is discarded at the root. Empty
/// segments from leading, trailing or repeated separators are removed.
pub fn normalize(raw: &str, prefix: Option<&str>) -> NormalizedPath {
    let prefix = prefix.unwrap_or("");
    let mut segments: Vec<&str> = Vec::new();

    let parts = prefix
        .split(is_separator)
        .chain(raw.split(is_separator));

    for part in parts {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    NormalizedPath(segments.join("/"))
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}
