#![forbid(unsafe_code)]

//! Dotted property paths (`user.address.city`, `list.0.name`).
//!
//! A malformed path is not an error: [`Path::parse`] logs a warning and
//! returns `None`, and callers bind a getter that always yields `Null`.

use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::value::Value;

/// A parsed, validated dotted path.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Path {
    raw: Rc<str>,
    segments: Rc<[Rc<str>]>,
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

impl Path {
    /// Parse `expr`. Returns `None` (and warns) on empty or malformed input.
    #[must_use]
    pub fn parse(expr: &str) -> Option<Self> {
        let trimmed = expr.trim();
        let segments: Vec<Rc<str>> = trimmed.split('.').map(Rc::from).collect();
        if trimmed.is_empty() || !segments.iter().all(|s| valid_segment(s)) {
            warn!(path = expr, "invalid path expression; binding reads as null");
            return None;
        }
        Some(Self {
            raw: trimmed.into(),
            segments: segments.into(),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[Rc<str>] {
        &self.segments
    }

    /// First segment: the name looked up on the view-model.
    #[must_use]
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    /// Tracked resolution against `root`.
    #[must_use]
    pub fn resolve(&self, root: &Value) -> Value {
        self.segments
            .iter()
            .fold(root.clone(), |current, segment| current.get(segment))
    }

    /// Tracked resolution where the head is looked up by `lookup` and the
    /// remaining segments are member accesses.
    pub fn resolve_with(&self, lookup: impl FnOnce(&str) -> Value) -> Value {
        self.segments[1..]
            .iter()
            .fold(lookup(self.head()), |current, segment| current.get(segment))
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.raw)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
