//! Transcript text to structured field writes.
//!
//! Pipeline: match → map → code (enumeration or lookup) → write → predict
//!
//! Every matcher runs against the full original transcript, in table order,
//! and only its first match is used. When two matchers write the same field
//! the later one wins. On a final transcript the text left after blanking
//! every matched span becomes the patient complaint, and transcript sources
//! that the final pass did not reference are swept.

use std::collections::{BTreeMap, BTreeSet};

use epcr_speech::{
    default_matchers, MatcherError, MatcherSpec, Span, TranscriptError, TranscriptEvent,
};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::document::PatchError;
use crate::lineage::Report;
use crate::lookup::{best_candidate, CodeLookup, LookupError, TermNormalizer};
use crate::models::{Coding, Field, Prediction, PredictionSource, ValueCell};

/// Extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Matcher error: {0}")]
    Matcher(#[from] MatcherError),

    #[error("Matcher '{matcher}' targets unknown field '{field}'")]
    UnknownField { matcher: String, field: String },

    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

#[derive(Debug)]
struct CompiledCapture {
    group: String,
    field: Field,
    mapping: BTreeMap<String, String>,
}

/// A matcher compiled against the field registry.
#[derive(Debug)]
pub struct Matcher {
    name: String,
    regex: Regex,
    captures: Vec<CompiledCapture>,
}

impl Matcher {
    pub fn compile(spec: &MatcherSpec) -> ExtractResult<Self> {
        let regex = spec.compile()?;
        let captures = spec
            .captures
            .iter()
            .map(|capture| {
                let field = capture
                    .field
                    .parse::<Field>()
                    .map_err(|_| ExtractError::UnknownField {
                        matcher: spec.name.clone(),
                        field: capture.field.clone(),
                    })?;
                Ok(CompiledCapture {
                    group: capture.group.clone(),
                    field,
                    mapping: capture.mapping.clone(),
                })
            })
            .collect::<ExtractResult<Vec<_>>>()?;

        Ok(Self {
            name: spec.name.clone(),
            regex,
            captures,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields this matcher can write.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.captures.iter().map(|c| c.field)
    }
}

/// A single field written by a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub matcher: String,
    pub field: Field,
    /// Stored text (code, or raw text for free fields)
    pub value: String,
    /// Where the captured text sits in the transcript
    pub source_range: Span,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    pub writes: Vec<FieldWrite>,
    /// Captures that matched but could not be coded
    pub unresolved: usize,
    /// Transcript sources referenced by this run
    pub matched_sources: BTreeSet<String>,
    /// Complaint text derived on a final pass
    pub remainder: Option<String>,
    /// Sources removed by the final-pass sweep
    pub swept: usize,
}

/// Ordered matcher table plus the code lookup used for terminology fields.
pub struct ExtractionPipeline<'a> {
    matchers: Vec<Matcher>,
    lookup: &'a dyn CodeLookup,
    normalizer: TermNormalizer,
}

impl<'a> ExtractionPipeline<'a> {
    /// Compile `specs` in order.
    pub fn new(specs: &[MatcherSpec], lookup: &'a dyn CodeLookup) -> ExtractResult<Self> {
        let matchers = specs
            .iter()
            .map(Matcher::compile)
            .collect::<ExtractResult<Vec<_>>>()?;
        Ok(Self {
            matchers,
            lookup,
            normalizer: TermNormalizer::new(),
        })
    }

    /// Pipeline over the built-in matcher table.
    pub fn with_defaults(lookup: &'a dyn CodeLookup) -> ExtractResult<Self> {
        Self::new(&default_matchers(), lookup)
    }

    /// Replace the term normalizer used for lookup queries.
    pub fn with_normalizer(mut self, normalizer: TermNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    /// Run every matcher over `event` and write the results into `report`.
    pub fn run(
        &self,
        report: &mut Report,
        event: &TranscriptEvent,
    ) -> ExtractResult<ExtractionOutcome> {
        event.validate()?;

        let source = PredictionSource {
            text: event.text.clone(),
            metadata: event.metadata.clone(),
            is_final: event.is_final(),
        };
        let mut outcome = ExtractionOutcome::default();
        let mut matched_spans = Vec::new();

        for matcher in &self.matchers {
            let Some(captures) = matcher.regex.captures(&event.text) else {
                continue;
            };
            if let Some(whole) = captures.get(0) {
                matched_spans.push(Span::from_bounds(whole.start(), whole.end()));
            }

            for capture in &matcher.captures {
                let Some(m) = captures.name(&capture.group) else {
                    continue;
                };
                let raw = m.as_str().trim();
                if raw.is_empty() {
                    continue;
                }
                let canonical = capture
                    .mapping
                    .get(&raw.to_lowercase())
                    .map(String::as_str)
                    .unwrap_or(raw);

                let Some(value) = self.resolve(capture.field, canonical)? else {
                    tracing::debug!(
                        matcher = %matcher.name,
                        field = %capture.field,
                        text = canonical,
                        "No code for capture; skipping"
                    );
                    outcome.unresolved += 1;
                    continue;
                };

                let source_range = Span::from_bounds(m.start(), m.end());
                self.write(report, event, &source, capture.field, &value, source_range)?;
                outcome.matched_sources.insert(event.source_id.clone());
                outcome.writes.push(FieldWrite {
                    matcher: matcher.name.clone(),
                    field: capture.field,
                    value,
                    source_range,
                });
            }
        }

        if event.is_final() {
            let remainder = remaining_text(&event.text, &matched_spans);
            if !remainder.is_empty() {
                let range = Span::new(0, event.text.len());
                self.write(report, event, &source, Field::SituationComplaint, &remainder, range)?;
                outcome.matched_sources.insert(event.source_id.clone());
                outcome.remainder = Some(remainder);
            }
            outcome.swept = report.sweep_sources(&outcome.matched_sources);
        }

        tracing::debug!(
            source_id = %event.source_id,
            is_final = event.is_final(),
            writes = outcome.writes.len(),
            unresolved = outcome.unresolved,
            swept = outcome.swept,
            "Extraction pass complete"
        );
        Ok(outcome)
    }

    /// Canonical text → stored value, or `None` if it cannot be coded.
    fn resolve(&self, field: Field, canonical: &str) -> ExtractResult<Option<String>> {
        match field.coding() {
            Coding::Free => Ok(Some(canonical.to_string())),
            Coding::Enumerated(values) => Ok(field
                .coding()
                .enumerated_code(canonical)
                .or_else(|| values.iter().map(|(_, code)| *code).find(|code| *code == canonical))
                .map(str::to_string)),
            Coding::Terminology(tag) => {
                let query = self.normalizer.normalize(canonical);
                let candidates = self.lookup.search(tag, &query)?;
                Ok(best_candidate(&query, &candidates).map(|c| c.item.code))
            }
        }
    }

    fn write(
        &self,
        report: &mut Report,
        event: &TranscriptEvent,
        source: &PredictionSource,
        field: Field,
        value: &str,
        source_range: Span,
    ) -> ExtractResult<()> {
        let cell = ValueCell::text(value);
        let wire = if field.is_list() {
            Value::Array(vec![cell.to_wire()])
        } else {
            cell.to_wire()
        };
        report.set_field(field, cell)?;

        let mut prediction = Prediction::unconfirmed(
            event.source_id.clone(),
            wire,
            Span::new(0, value.len()),
            source_range,
        );
        if let Some(timing) = event.timing_for(source_range) {
            prediction.timestamp = Some(timing.timestamp);
            prediction.duration = Some(timing.duration);
        }
        report.record_prediction(field, prediction, source.clone());
        Ok(())
    }
}

/// `text` with every span blanked and whitespace collapsed.
fn remaining_text(text: &str, spans: &[Span]) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for span in spans {
        let end = span.end().min(bytes.len());
        for byte in &mut bytes[span.location.min(end)..end] {
            *byte = b' ';
        }
    }
    // Spans come from regex matches on char boundaries, so this is lossless.
    String::from_utf8_lossy(&bytes)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
