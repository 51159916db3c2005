//! Slash-delimited field paths (`/eVitals.BloodPressureGroup/eVitals.06`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path parse errors.
#[derive(Error, Debug, PartialEq)]
pub enum PathError {
    #[error("Path must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("Path has an empty segment: {0}")]
    EmptySegment(String),
}

/// A path into a nested document. Segments are used verbatim as object
/// keys; no JSON-Pointer escaping is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse `/a/b/c`.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| PathError::MissingLeadingSlash(s.to_string()))?;
        let segments: Vec<String> = rest.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment(s.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The final segment.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Everything but the final segment.
    pub fn parent(&self) -> Option<FieldPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.prefix(self.segments.len() - 1))
    }

    /// The first `depth` segments.
    pub fn prefix(&self, depth: usize) -> FieldPath {
        FieldPath {
            segments: self.segments[..depth.min(self.segments.len())].to_vec(),
        }
    }

    /// Extend by one segment.
    pub fn child(&self, segment: &str) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        FieldPath { segments }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}
