//! Path addressing for realized sources.
//!
//! A [`Path`] identifies a value in the loaded map: either a scalar source
//! key, or — for collection members and begets children — an ordered
//! sequence whose first segment names the enclosing parent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single step in a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A named key — source names, begets keys, map entries.
    Key(String),
    /// A positional index — collection members.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{k}"),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        PathSegment::Key(s.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        PathSegment::Key(s)
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        PathSegment::Index(i)
    }
}

/// An ordered sequence of [`PathSegment`]s identifying a realized value.
///
/// A path of length 1 names a top-level source. A path of length > 1 is a
/// nested child: its first segment names the enclosing collection/begets
/// parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// Creates a root-level path from a single segment.
    pub fn new(segment: impl Into<PathSegment>) -> Self {
        Path(vec![segment.into()])
    }

    /// Creates a path from explicit segments. Panics if empty — every
    /// `Path` that identifies a source must be non-empty.
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        assert!(!segments.is_empty(), "Path must have at least one segment");
        Path(segments)
    }

    /// Returns a child path by appending a segment.
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    /// Returns the path's segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A `Path` is never empty by construction; kept for clippy parity.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the first segment — for a nested child, this identifies the
    /// enclosing collection/begets parent.
    pub fn root_segment(&self) -> Option<&PathSegment> {
        self.0.first()
    }

    /// Returns the root-level path of the enclosing source (the first
    /// segment only), or `None` if this path is already root-level.
    pub fn root(&self) -> Option<Path> {
        if self.0.len() <= 1 {
            None
        } else {
            Some(Path(vec![self.0[0].clone()]))
        }
    }

    /// Returns whether `self` is a strict prefix of `other`.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.0.len() < other.0.len() && self.0 == other.0[..self.0.len()]
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::new(s)
    }
}

impl From<String> for Path {
    fn from(s: String) -> Self {
        Path::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_has_len_one() {
        let p = Path::new("A");
        assert_eq!(p.len(), 1);
        assert!(p.root().is_none());
    }

    #[test]
    fn child_path_tracks_root() {
        let parent = Path::new("People");
        let child = parent.child(0usize);
        assert_eq!(child.len(), 2);
        assert_eq!(child.root(), Some(parent.clone()));
        assert_eq!(child.to_string(), "People.0");
    }

    #[test]
    fn prefix_ordering() {
        let parent = Path::new("People");
        let child = parent.child(0usize);
        assert!(parent.is_prefix_of(&child));
        assert!(!child.is_prefix_of(&parent));
        assert!(!parent.is_prefix_of(&parent));
    }
}
