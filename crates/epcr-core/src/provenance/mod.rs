//! Per-field prediction tracking.
//!
//! Each record keeps a side map from field path to the [`Prediction`] that
//! produced its value, plus a `_sources` map holding the transcripts those
//! predictions were drawn from. The JSON shape is:
//!
//! ```text
//! {
//!   "/eVitals.BloodPressureGroup/eVitals.06": {"sourceId": "utt-1", ...},
//!   "_sources": {"utt-1": {"text": "...", "metadata": {...}, "isFinal": true}}
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::document::FieldPath;
use crate::models::{Prediction, PredictionSource, PredictionStatus};

/// Prediction side map for one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceTracker {
    #[serde(rename = "_sources", default, skip_serializing_if = "BTreeMap::is_empty")]
    sources: BTreeMap<String, PredictionSource>,
    #[serde(flatten)]
    predictions: BTreeMap<String, Prediction>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty() && self.sources.is_empty()
    }

    /// Status of the prediction at `path`, if the field is still a guess.
    pub fn status(&self, path: &FieldPath) -> Option<PredictionStatus> {
        self.predictions.get(&path.to_string()).map(|p| p.status)
    }

    /// Update the status at `path`. `None` drops the prediction: the field is
    /// now authoritative. Returns false if there was no prediction to update.
    pub fn set_status(&mut self, status: Option<PredictionStatus>, path: &FieldPath) -> bool {
        let key = path.to_string();
        match status {
            None => self.predictions.remove(&key).is_some(),
            Some(status) => match self.predictions.get_mut(&key) {
                Some(prediction) => {
                    prediction.status = status;
                    true
                }
                None => false,
            },
        }
    }

    /// Record a prediction, replacing any earlier one at `path`, and upsert
    /// its source transcript.
    pub fn record(&mut self, path: &FieldPath, prediction: Prediction, source: PredictionSource) {
        self.sources.insert(prediction.source_id.clone(), source);
        self.predictions.insert(path.to_string(), prediction);
    }

    pub fn prediction(&self, path: &FieldPath) -> Option<&Prediction> {
        self.predictions.get(&path.to_string())
    }

    pub fn predictions(&self) -> impl Iterator<Item = (&str, &Prediction)> {
        self.predictions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn source(&self, source_id: &str) -> Option<&PredictionSource> {
        self.sources.get(source_id)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Drop every source that is not in `keep` or that no remaining
    /// prediction references. Returns the number of sources removed.
    pub fn sweep_stale(&mut self, keep: &BTreeSet<String>) -> usize {
        let referenced: BTreeSet<&str> = self
            .predictions
            .values()
            .map(|p| p.source_id.as_str())
            .collect();

        let before = self.sources.len();
        self.sources
            .retain(|id, _| keep.contains(id) && referenced.contains(id.as_str()));
        let removed = before - self.sources.len();
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.sources.len(),
                "Swept stale prediction sources"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epcr_speech::Span;
    use serde_json::json;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    fn prediction(source_id: &str, text: &str) -> Prediction {
        Prediction::unconfirmed(
            source_id,
            json!({"_text": text}),
            Span::new(0, text.len()),
            Span::new(0, text.len()),
        )
    }

    fn source(text: &str, is_final: bool) -> PredictionSource {
        PredictionSource {
            text: text.into(),
            metadata: Default::default(),
            is_final,
        }
    }

    #[test]
    fn test_record_and_status() {
        let mut tracker = ProvenanceTracker::new();
        let p = path("/eVitals.12");
        assert_eq!(tracker.status(&p), None);

        tracker.record(&p, prediction("a", "98"), source("pulse ox 98", false));
        assert_eq!(tracker.status(&p), Some(PredictionStatus::Unconfirmed));
        assert!(tracker.source("a").is_some());

        assert!(tracker.set_status(Some(PredictionStatus::Confirmed), &p));
        assert_eq!(tracker.status(&p), Some(PredictionStatus::Confirmed));
    }

    #[test]
    fn test_set_status_none_removes() {
        let mut tracker = ProvenanceTracker::new();
        let p = path("/x");
        tracker.record(&p, prediction("a", "1"), source("1", false));
        assert!(tracker.set_status(None, &p));
        assert!(tracker.prediction(&p).is_none());
        assert!(!tracker.set_status(Some(PredictionStatus::Corrected), &p));
    }

    #[test]
    fn test_last_writer_wins() {
        let mut tracker = ProvenanceTracker::new();
        let p = path("/x");
        tracker.record(&p, prediction("a", "1"), source("one", false));
        tracker.record(&p, prediction("b", "2"), source("two", true));
        assert_eq!(tracker.prediction(&p).unwrap().source_id, "b");
        assert_eq!(tracker.predictions().count(), 1);
    }

    #[test]
    fn test_sweep_keeps_only_requested_sources() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record(&path("/x"), prediction("A", "1"), source("one", false));
        tracker.record(&path("/y"), prediction("B", "2"), source("two", true));

        let keep: BTreeSet<String> = ["B".to_string()].into();
        assert_eq!(tracker.sweep_stale(&keep), 1);
        assert_eq!(tracker.source_ids().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_sweep_drops_unreferenced() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record(&path("/x"), prediction("A", "1"), source("one", false));
        tracker.record(&path("/x"), prediction("B", "2"), source("two", true));

        let keep: BTreeSet<String> = ["A".to_string(), "B".to_string()].into();
        tracker.sweep_stale(&keep);
        assert_eq!(tracker.source_ids().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_json_shape() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record(&path("/eVitals.12"), prediction("utt", "98"), source("sats 98", true));

        let wire = serde_json::to_value(&tracker).unwrap();
        assert_eq!(wire["/eVitals.12"]["sourceId"], "utt");
        assert_eq!(wire["_sources"]["utt"]["isFinal"], true);

        let back: ProvenanceTracker = serde_json::from_value(wire).unwrap();
        assert_eq!(back, tracker);
    }
}
