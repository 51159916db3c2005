//! Prediction models: provisional values attributed to a transcript.

use epcr_speech::{Span, TranscriptMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Review status of a prediction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    /// Written by extraction, not yet reviewed
    Unconfirmed,
    /// Reviewed and accepted as-is
    Confirmed,
    /// Reviewed and edited by the clinician
    Corrected,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Unconfirmed => "unconfirmed",
            PredictionStatus::Confirmed => "confirmed",
            PredictionStatus::Corrected => "corrected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unconfirmed" => Some(PredictionStatus::Unconfirmed),
            "confirmed" => Some(PredictionStatus::Confirmed),
            "corrected" => Some(PredictionStatus::Corrected),
            _ => None,
        }
    }
}

/// Why a field holds its current value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    /// Transcript that produced the value
    pub source_id: String,
    /// The value written (cell wire form, or an array of them)
    pub value: Value,
    pub status: PredictionStatus,
    /// Range within the written field text
    pub range: Span,
    /// Range within the transcript text
    pub source_range: Span,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Prediction {
    /// A fresh, unconfirmed prediction.
    pub fn unconfirmed(
        source_id: impl Into<String>,
        value: Value,
        range: Span,
        source_range: Span,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            value,
            status: PredictionStatus::Unconfirmed,
            range,
            source_range,
            timestamp: None,
            duration: None,
        }
    }
}

/// The transcript a prediction was drawn from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSource {
    pub text: String,
    #[serde(default)]
    pub metadata: TranscriptMetadata,
    #[serde(default)]
    pub is_final: bool,
}
