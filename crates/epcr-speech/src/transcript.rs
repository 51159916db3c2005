//! Transcript events from the on-device recognizer.
//!
//! Offsets are byte offsets into `text`. Every range must land on a UTF-8
//! character boundary; [`TranscriptEvent::parse`] rejects events that don't.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transcript errors.
#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Transcript has no source id")]
    MissingSourceId,

    #[error("Segment range {location}+{length} is outside the transcript ({text_len} bytes)")]
    RangeOutOfBounds {
        location: usize,
        length: usize,
        text_len: usize,
    },
}

pub type TranscriptResult<T> = Result<T, TranscriptError>;

/// A half-open text range, `location..location + length`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Span {
    pub location: usize,
    pub length: usize,
}

impl Span {
    pub fn new(location: usize, length: usize) -> Self {
        Self { location, length }
    }

    /// Build a span from a `start..end` byte range.
    pub fn from_bounds(start: usize, end: usize) -> Self {
        Self {
            location: start,
            length: end.saturating_sub(start),
        }
    }

    /// Exclusive end offset, saturating at `usize::MAX`.
    pub fn end(&self) -> usize {
        self.location.saturating_add(self.length)
    }

    /// Exclusive end offset, or `None` when it does not fit in `usize`.
    pub fn checked_end(&self) -> Option<usize> {
        self.location.checked_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// True when the two spans share at least one byte.
    pub fn overlaps(&self, other: &Span) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.location < other.end() && other.location < self.end()
    }

    /// Slice `text` by this span, if it fits.
    pub fn slice<'t>(&self, text: &'t str) -> Option<&'t str> {
        text.get(self.location..self.checked_end()?)
    }
}

/// One recognizer segment (usually a word) with its audio timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub substring_range: Span,
    /// Seconds from the start of the recording
    pub timestamp: f64,
    /// Seconds
    pub duration: f64,
}

/// Recognizer metadata accompanying a transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptMetadata {
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub is_final: bool,
}

/// An interim or final transcript snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub text: String,
    #[serde(default)]
    pub metadata: TranscriptMetadata,
    pub source_id: String,
}

/// Audio timing covering a text range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTiming {
    pub timestamp: f64,
    pub duration: f64,
}

impl TranscriptEvent {
    /// Build an event without segment timing.
    pub fn new(source_id: impl Into<String>, text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            metadata: TranscriptMetadata {
                segments: Vec::new(),
                is_final,
            },
            source_id: source_id.into(),
        }
    }

    /// Parse and validate an event from its JSON wire form.
    pub fn parse(json: &str) -> TranscriptResult<Self> {
        let event: TranscriptEvent = serde_json::from_str(json)?;
        event.validate()?;
        Ok(event)
    }

    /// Check the source id and every segment range.
    pub fn validate(&self) -> TranscriptResult<()> {
        if self.source_id.trim().is_empty() {
            return Err(TranscriptError::MissingSourceId);
        }
        for segment in &self.metadata.segments {
            let range = segment.substring_range;
            if range.slice(&self.text).is_none() {
                return Err(TranscriptError::RangeOutOfBounds {
                    location: range.location,
                    length: range.length,
                    text_len: self.text.len(),
                });
            }
        }
        Ok(())
    }

    pub fn is_final(&self) -> bool {
        self.metadata.is_final
    }

    /// Timing of the segments overlapping `range`: start of the first one,
    /// extent through the end of the last one.
    pub fn timing_for(&self, range: Span) -> Option<SegmentTiming> {
        let mut overlapping = self
            .metadata
            .segments
            .iter()
            .filter(|s| s.substring_range.overlaps(&range));

        let first = overlapping.next()?;
        let last = overlapping.last().unwrap_or(first);
        let end = last.timestamp + last.duration;

        Some(SegmentTiming {
            timestamp: first.timestamp,
            duration: (end - first.timestamp).max(0.0),
        })
    }
}
