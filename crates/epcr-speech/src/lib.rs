//! Transcript payloads and field-matcher tables for speech-driven charting.
//!
//! The speech recognizer on the device delivers interim and final transcripts
//! as [`TranscriptEvent`]s. This crate owns that wire format and the matcher
//! table (a list of [`MatcherSpec`]s) that tells the extraction pipeline in
//! `epcr-core` which patterns to look for and which chart fields they fill.

pub mod matchers;
pub mod transcript;

pub use matchers::*;
pub use transcript::*;
