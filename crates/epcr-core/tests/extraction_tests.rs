//! Transcript extraction integration tests.

use std::collections::BTreeSet;

use epcr_core::db::Database;
use epcr_core::document::{FieldPath, FieldValue};
use epcr_core::extract::ExtractionPipeline;
use epcr_core::lineage::Report;
use epcr_core::lookup::InMemoryCodeLookup;
use epcr_core::models::{
    CodeList, Field, Prediction, PredictionSource, PredictionStatus, RecordKind,
};
use epcr_core::provenance::ProvenanceTracker;
use epcr_speech::{MatcherSpec, Span, TranscriptEvent};
use proptest::prelude::*;
use serde_json::json;

fn text_of(report: &Report, field: Field) -> Option<String> {
    match report.field(field)? {
        FieldValue::Scalar(cell) => cell.text_value().map(str::to_string),
        FieldValue::List(cells) => cells.first()?.text_value().map(str::to_string),
    }
}

fn medications() -> CodeList {
    let mut meds = CodeList::new("meds", "Medications", vec!["eMedications.03".into()]);
    meds.add_item("RxNorm", "7242", "Naloxone")
        .add_item("RxNorm", "4850", "Glucose")
        .add_item("RxNorm", "26225", "Ondansetron");
    meds
}

#[test]
fn test_blood_pressure_transcript() {
    let lookup = InMemoryCodeLookup::new();
    let specs = vec![MatcherSpec::new(
        "blood_pressure",
        r"(?i)blood pressure is (?P<systolic>\d+)/(?P<diastolic>\d+)",
    )
    .capture("systolic", "vitals.bp_systolic")
    .capture("diastolic", "vitals.bp_diastolic")];
    let pipeline = ExtractionPipeline::new(&specs, &lookup).unwrap();

    let mut report = Report::new();
    let event = TranscriptEvent::new("utt-1", "blood pressure is 120/80", false);
    let outcome = pipeline.run(&mut report, &event).unwrap();

    assert_eq!(outcome.writes.len(), 2);
    assert_eq!(text_of(&report, Field::VitalsBpSystolic).as_deref(), Some("120"));
    assert_eq!(text_of(&report, Field::VitalsBpDiastolic).as_deref(), Some("80"));

    for field in [Field::VitalsBpSystolic, Field::VitalsBpDiastolic] {
        assert_eq!(report.prediction_status(field), Some(PredictionStatus::Unconfirmed));
    }
    let systolic = report.prediction(Field::VitalsBpSystolic).unwrap();
    assert_eq!(systolic.source_range, Span::new(18, 3));
    assert_eq!(systolic.value, json!({"_text": "120"}));
}

#[test]
fn test_priority_mapping_writes_code() {
    let lookup = InMemoryCodeLookup::new();
    let specs = vec![MatcherSpec::new("priority", r"(?i)(?P<p>red|yellow) priority")
        .capture_mapped("p", "scene.triage_classification", &[("red", "immediate")])];
    let pipeline = ExtractionPipeline::new(&specs, &lookup).unwrap();

    let mut report = Report::new();
    pipeline
        .run(&mut report, &TranscriptEvent::new("utt", "red priority", false))
        .unwrap();

    let stored = text_of(&report, Field::SceneTriageClassification).unwrap();
    assert_eq!(stored, "2708001");
    assert_ne!(stored, "red");

    // Unmapped value that is not a known enumeration is skipped
    let mut other = Report::new();
    let outcome = pipeline
        .run(&mut other, &TranscriptEvent::new("utt", "yellow priority", false))
        .unwrap();
    assert_eq!(outcome.unresolved, 1);
    assert!(other.field(Field::SceneTriageClassification).is_none());
}

#[test]
fn test_segment_timing_attached_to_prediction() {
    let lookup = InMemoryCodeLookup::new();
    let pipeline = ExtractionPipeline::with_defaults(&lookup).unwrap();
    let event = TranscriptEvent::parse(
        r#"{
            "text": "bp 120/80",
            "metadata": {
                "segments": [
                    {"substringRange": {"location": 0, "length": 2}, "timestamp": 1.0, "duration": 0.25},
                    {"substringRange": {"location": 3, "length": 6}, "timestamp": 1.5, "duration": 0.75}
                ],
                "isFinal": true
            },
            "sourceId": "utt-9"
        }"#,
    )
    .unwrap();

    let mut report = Report::new();
    let outcome = pipeline.run(&mut report, &event).unwrap();
    assert_eq!(outcome.remainder, None);

    let prediction = report.prediction(Field::VitalsBpDiastolic).unwrap();
    assert_eq!(prediction.timestamp, Some(1.5));
    assert_eq!(prediction.duration, Some(0.75));

    let vitals = report.section(RecordKind::Vital).unwrap();
    let source = vitals.predictions.source("utt-9").unwrap();
    assert!(source.is_final);
    assert_eq!(source.text, "bp 120/80");
}

#[test]
fn test_database_lookup_resolves_brand_names() {
    let db = Database::open_in_memory().unwrap();
    db.upsert_code_list(&medications()).unwrap();
    let pipeline = ExtractionPipeline::with_defaults(&db).unwrap();

    let mut report = Report::new();
    pipeline
        .run(
            &mut report,
            &TranscriptEvent::new("utt", "gave 4 mg of narcan IV", false),
        )
        .unwrap();

    assert_eq!(text_of(&report, Field::MedicationGiven).as_deref(), Some("7242"));
    assert_eq!(text_of(&report, Field::MedicationRoute).as_deref(), Some("9927023"));
}

#[test]
fn test_preposition_in_is_not_a_route() {
    let lookup = InMemoryCodeLookup::new().with_list(medications());
    let pipeline = ExtractionPipeline::with_defaults(&lookup).unwrap();

    let mut report = Report::new();
    pipeline
        .run(
            &mut report,
            &TranscriptEvent::new("utt", "gave narcan in the ambulance", false),
        )
        .unwrap();

    assert_eq!(text_of(&report, Field::MedicationGiven).as_deref(), Some("7242"));
    assert!(report.field(Field::MedicationRoute).is_none());
}

#[test]
fn test_interim_then_final_pass() {
    let lookup = InMemoryCodeLookup::new().with_list(medications());
    let pipeline = ExtractionPipeline::with_defaults(&lookup).unwrap();
    let mut report = Report::new();

    pipeline
        .run(&mut report, &TranscriptEvent::new("interim-1", "pulse 110", false))
        .unwrap();
    pipeline
        .run(&mut report, &TranscriptEvent::new("interim-2", "pulse 112 resp", false))
        .unwrap();

    let outcome = pipeline
        .run(
            &mut report,
            &TranscriptEvent::new("final", "found down pulse 112 respirations 8", true),
        )
        .unwrap();

    assert_eq!(outcome.remainder.as_deref(), Some("found down"));
    assert_eq!(text_of(&report, Field::SituationComplaint).as_deref(), Some("found down"));
    assert_eq!(text_of(&report, Field::VitalsRespiratoryRate).as_deref(), Some("8"));

    let vitals = report.section(RecordKind::Vital).unwrap();
    let sources: Vec<&str> = vitals.predictions.source_ids().collect();
    assert_eq!(sources, vec!["final"]);
}

#[test]
fn test_extraction_is_deterministic() {
    let lookup = InMemoryCodeLookup::new().with_list(medications());
    let pipeline = ExtractionPipeline::with_defaults(&lookup).unwrap();
    let text = "45 year old male complains of chest pain, bp 160/95 pulse 102 gave 4 mg of zofran IV";

    let run = || {
        let mut report = Report::new();
        let outcome = pipeline
            .run(&mut report, &TranscriptEvent::new("utt", text, true))
            .unwrap();
        let predictions: Vec<Option<Prediction>> = Field::ALL
            .iter()
            .map(|f| report.prediction(*f).cloned())
            .collect();
        (outcome.writes, outcome.remainder, predictions)
    };

    assert_eq!(run(), run());
}

fn source(text: &str) -> PredictionSource {
    PredictionSource {
        text: text.into(),
        metadata: Default::default(),
        is_final: false,
    }
}

proptest! {
    #[test]
    fn sweep_keeps_exactly_requested_sources(
        ids in prop::collection::btree_set("[a-z]{1,4}", 1..6)
    ) {
        let mut tracker = ProvenanceTracker::new();
        for (i, id) in ids.iter().enumerate() {
            let path = FieldPath::parse(&format!("/f{i}")).unwrap();
            let prediction = Prediction::unconfirmed(
                id.clone(),
                json!({"_text": "1"}),
                Span::new(0, 1),
                Span::new(0, 1),
            );
            tracker.record(&path, prediction, source(id));
        }

        let keep: BTreeSet<String> = ids.iter().take(1).cloned().collect();
        let removed = tracker.sweep_stale(&keep);

        prop_assert_eq!(removed, ids.len() - 1);
        let remaining: BTreeSet<String> = tracker.source_ids().map(str::to_string).collect();
        prop_assert_eq!(remaining, keep);
    }
}
