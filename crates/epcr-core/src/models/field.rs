//! Typed registry of the clinical fields the engine knows how to address.
//!
//! Every field maps to exactly one section record kind and one slash path in
//! that record's document. Paths are only ever produced here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::FieldPath;

/// The kind of a versioned clinical record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Report,
    Scene,
    Response,
    Time,
    Patient,
    Situation,
    History,
    Disposition,
    Narrative,
    Vital,
    Procedure,
    Medication,
    Signature,
    File,
}

impl RecordKind {
    pub const ALL: [RecordKind; 14] = [
        RecordKind::Report,
        RecordKind::Scene,
        RecordKind::Response,
        RecordKind::Time,
        RecordKind::Patient,
        RecordKind::Situation,
        RecordKind::History,
        RecordKind::Disposition,
        RecordKind::Narrative,
        RecordKind::Vital,
        RecordKind::Procedure,
        RecordKind::Medication,
        RecordKind::Signature,
        RecordKind::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Report => "report",
            RecordKind::Scene => "scene",
            RecordKind::Response => "response",
            RecordKind::Time => "time",
            RecordKind::Patient => "patient",
            RecordKind::Situation => "situation",
            RecordKind::History => "history",
            RecordKind::Disposition => "disposition",
            RecordKind::Narrative => "narrative",
            RecordKind::Vital => "vital",
            RecordKind::Procedure => "procedure",
            RecordKind::Medication => "medication",
            RecordKind::Signature => "signature",
            RecordKind::File => "file",
        }
    }

    /// Repeating sections can hold many records per report.
    pub fn is_repeating(&self) -> bool {
        matches!(
            self,
            RecordKind::Vital
                | RecordKind::Procedure
                | RecordKind::Medication
                | RecordKind::Signature
                | RecordKind::File
        )
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown record kind: {s}"))
    }
}

/// Scalar or list-of-cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Scalar,
    List,
}

/// How a canonical value becomes the stored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    /// Raw text is stored as-is
    Free,
    /// Canonical names map to fixed enumeration codes
    Enumerated(&'static [(&'static str, &'static str)]),
    /// Resolved through a code list lookup by NEMSIS element tag
    Terminology(&'static str),
}

impl Coding {
    /// Look up an enumeration code by canonical name.
    pub fn enumerated_code(&self, name: &str) -> Option<&'static str> {
        match self {
            Coding::Enumerated(values) => values
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, code)| *code),
            _ => None,
        }
    }
}

const TRIAGE_CODES: &[(&str, &str)] = &[
    ("immediate", "2708001"),
    ("delayed", "2708003"),
    ("minimal", "2708005"),
    ("expectant", "2708007"),
    ("deceased", "2708009"),
];

const GENDER_CODES: &[(&str, &str)] = &[("female", "9906001"), ("male", "9906003")];

const AGE_UNIT_CODES: &[(&str, &str)] = &[
    ("days", "2516001"),
    ("hours", "2516003"),
    ("minutes", "2516005"),
    ("months", "2516007"),
    ("years", "2516009"),
];

const DOSAGE_UNIT_CODES: &[(&str, &str)] = &[
    ("grams", "3706009"),
    ("units", "3706015"),
    ("micrograms", "3706027"),
    ("milligrams", "3706033"),
    ("milliliters", "3706037"),
];

const ROUTE_CODES: &[(&str, &str)] = &[
    ("intramuscular", "9927015"),
    ("intranasal", "9927017"),
    ("intraosseous", "9927021"),
    ("intravenous", "9927023"),
    ("oral", "9927035"),
    ("sublingual", "9927047"),
];

/// A known clinical field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub enum Field {
    SceneTriageClassification,
    ResponseUnitNumber,
    TimeUnitNotified,
    PatientGender,
    PatientAge,
    PatientAgeUnits,
    SituationComplaint,
    SituationPrimarySymptom,
    SituationOtherSymptoms,
    HistoryAllergies,
    DispositionDestination,
    NarrativeText,
    VitalsBpSystolic,
    VitalsBpDiastolic,
    VitalsHeartRate,
    VitalsPulseOximetry,
    VitalsRespiratoryRate,
    VitalsBloodGlucose,
    VitalsGcsTotal,
    VitalsTemperature,
    VitalsPainScale,
    MedicationGiven,
    MedicationRoute,
    MedicationDosage,
    MedicationDosageUnits,
    ProcedurePerformed,
}

struct FieldSpec {
    key: &'static str,
    kind: RecordKind,
    path: &'static str,
    cardinality: Cardinality,
    optional: bool,
    coding: Coding,
}

const fn spec(
    key: &'static str,
    kind: RecordKind,
    path: &'static str,
    cardinality: Cardinality,
    optional: bool,
    coding: Coding,
) -> FieldSpec {
    FieldSpec {
        key,
        kind,
        path,
        cardinality,
        optional,
        coding,
    }
}

impl Field {
    pub const ALL: [Field; 26] = [
        Field::SceneTriageClassification,
        Field::ResponseUnitNumber,
        Field::TimeUnitNotified,
        Field::PatientGender,
        Field::PatientAge,
        Field::PatientAgeUnits,
        Field::SituationComplaint,
        Field::SituationPrimarySymptom,
        Field::SituationOtherSymptoms,
        Field::HistoryAllergies,
        Field::DispositionDestination,
        Field::NarrativeText,
        Field::VitalsBpSystolic,
        Field::VitalsBpDiastolic,
        Field::VitalsHeartRate,
        Field::VitalsPulseOximetry,
        Field::VitalsRespiratoryRate,
        Field::VitalsBloodGlucose,
        Field::VitalsGcsTotal,
        Field::VitalsTemperature,
        Field::VitalsPainScale,
        Field::MedicationGiven,
        Field::MedicationRoute,
        Field::MedicationDosage,
        Field::MedicationDosageUnits,
        Field::ProcedurePerformed,
    ];

    fn spec(&self) -> FieldSpec {
        use Cardinality::*;
        use RecordKind as K;

        match self {
            Field::SceneTriageClassification => spec(
                "scene.triage_classification",
                K::Scene,
                "/eScene.08",
                Scalar,
                true,
                Coding::Enumerated(TRIAGE_CODES),
            ),
            Field::ResponseUnitNumber => spec(
                "response.unit_number",
                K::Response,
                "/eResponse.13",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::TimeUnitNotified => spec(
                "time.unit_notified",
                K::Time,
                "/eTimes.03",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::PatientGender => spec(
                "patient.gender",
                K::Patient,
                "/ePatient.13",
                Scalar,
                false,
                Coding::Enumerated(GENDER_CODES),
            ),
            Field::PatientAge => spec(
                "patient.age",
                K::Patient,
                "/ePatient.AgeGroup/ePatient.15",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::PatientAgeUnits => spec(
                "patient.age_units",
                K::Patient,
                "/ePatient.AgeGroup/ePatient.16",
                Scalar,
                false,
                Coding::Enumerated(AGE_UNIT_CODES),
            ),
            Field::SituationComplaint => spec(
                "situation.complaint",
                K::Situation,
                "/eSituation.PatientComplaintGroup/eSituation.04",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::SituationPrimarySymptom => spec(
                "situation.primary_symptom",
                K::Situation,
                "/eSituation.09",
                Scalar,
                false,
                Coding::Terminology("eSituation.09"),
            ),
            Field::SituationOtherSymptoms => spec(
                "situation.other_symptoms",
                K::Situation,
                "/eSituation.10",
                List,
                true,
                Coding::Terminology("eSituation.10"),
            ),
            Field::HistoryAllergies => spec(
                "history.allergies",
                K::History,
                "/eHistory.06",
                List,
                false,
                Coding::Terminology("eHistory.06"),
            ),
            Field::DispositionDestination => spec(
                "disposition.destination",
                K::Disposition,
                "/eDisposition.DestinationGroup/eDisposition.02",
                Scalar,
                true,
                Coding::Free,
            ),
            Field::NarrativeText => spec(
                "narrative.text",
                K::Narrative,
                "/eNarrative.01",
                Scalar,
                true,
                Coding::Free,
            ),
            Field::VitalsBpSystolic => spec(
                "vitals.bp_systolic",
                K::Vital,
                "/eVitals.BloodPressureGroup/eVitals.06",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::VitalsBpDiastolic => spec(
                "vitals.bp_diastolic",
                K::Vital,
                "/eVitals.BloodPressureGroup/eVitals.07",
                Scalar,
                true,
                Coding::Free,
            ),
            Field::VitalsHeartRate => spec(
                "vitals.heart_rate",
                K::Vital,
                "/eVitals.HeartRateGroup/eVitals.10",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::VitalsPulseOximetry => spec(
                "vitals.pulse_oximetry",
                K::Vital,
                "/eVitals.12",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::VitalsRespiratoryRate => spec(
                "vitals.respiratory_rate",
                K::Vital,
                "/eVitals.14",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::VitalsBloodGlucose => spec(
                "vitals.blood_glucose",
                K::Vital,
                "/eVitals.18",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::VitalsGcsTotal => spec(
                "vitals.gcs_total",
                K::Vital,
                "/eVitals.GlasgowScoreGroup/eVitals.23",
                Scalar,
                true,
                Coding::Free,
            ),
            Field::VitalsTemperature => spec(
                "vitals.temperature",
                K::Vital,
                "/eVitals.TemperatureGroup/eVitals.24",
                Scalar,
                true,
                Coding::Free,
            ),
            Field::VitalsPainScale => spec(
                "vitals.pain_scale",
                K::Vital,
                "/eVitals.PainScaleGroup/eVitals.27",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::MedicationGiven => spec(
                "medication.given",
                K::Medication,
                "/eMedications.03",
                Scalar,
                false,
                Coding::Terminology("eMedications.03"),
            ),
            Field::MedicationRoute => spec(
                "medication.route",
                K::Medication,
                "/eMedications.04",
                Scalar,
                false,
                Coding::Enumerated(ROUTE_CODES),
            ),
            Field::MedicationDosage => spec(
                "medication.dosage",
                K::Medication,
                "/eMedications.DosageGroup/eMedications.05",
                Scalar,
                false,
                Coding::Free,
            ),
            Field::MedicationDosageUnits => spec(
                "medication.dosage_units",
                K::Medication,
                "/eMedications.DosageGroup/eMedications.06",
                Scalar,
                false,
                Coding::Enumerated(DOSAGE_UNIT_CODES),
            ),
            Field::ProcedurePerformed => spec(
                "procedure.performed",
                K::Procedure,
                "/eProcedures.03",
                Scalar,
                false,
                Coding::Terminology("eProcedures.03"),
            ),
        }
    }

    /// Stable key used by matcher tables and the FFI (`vitals.bp_systolic`).
    pub fn key(&self) -> &'static str {
        self.spec().key
    }

    pub fn kind(&self) -> RecordKind {
        self.spec().kind
    }

    pub fn path(&self) -> FieldPath {
        // Registry paths are literals; the unit tests parse every one of them.
        FieldPath::parse(self.spec().path).unwrap_or_default()
    }

    pub fn cardinality(&self) -> Cardinality {
        self.spec().cardinality
    }

    pub fn is_list(&self) -> bool {
        self.cardinality() == Cardinality::List
    }

    /// Optional fields are deleted when unset instead of holding a nil.
    pub fn is_optional(&self) -> bool {
        self.spec().optional
    }

    pub fn coding(&self) -> Coding {
        self.spec().coding
    }

    /// Look a field up by its document path within a record kind.
    pub fn for_path(kind: RecordKind, path: &FieldPath) -> Option<Field> {
        Field::ALL
            .into_iter()
            .find(|f| f.kind() == kind && f.spec().path == path.to_string())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.key() == s)
            .ok_or_else(|| format!("Unknown field: {s}"))
    }
}

impl TryFrom<String> for Field {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.key().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_registry_path_parses() {
        for field in Field::ALL {
            assert!(
                FieldPath::parse(field.spec().path).is_ok(),
                "bad path for {field}"
            );
            assert_eq!(field.path().to_string(), field.spec().path);
        }
    }

    #[test]
    fn test_keys_are_unique_and_roundtrip() {
        let mut seen = HashSet::new();
        for field in Field::ALL {
            assert!(seen.insert(field.key()), "duplicate key {}", field.key());
            assert_eq!(field.key().parse::<Field>().unwrap(), field);
        }
    }

    #[test]
    fn test_paths_unique_within_kind() {
        let mut seen = HashSet::new();
        for field in Field::ALL {
            assert!(seen.insert((field.kind(), field.spec().path)));
        }
    }

    #[test]
    fn test_key_prefix_matches_kind() {
        for field in Field::ALL {
            let prefix = field.key().split('.').next().unwrap();
            let expected = match field.kind() {
                RecordKind::Vital => "vitals",
                other => other.as_str(),
            };
            assert_eq!(prefix, expected, "{field}");
        }
    }

    #[test]
    fn test_enumerated_lookup() {
        let coding = Field::SceneTriageClassification.coding();
        assert_eq!(coding.enumerated_code("immediate"), Some("2708001"));
        assert_eq!(coding.enumerated_code("Expectant"), Some("2708007"));
        assert_eq!(coding.enumerated_code("red"), None);
        assert_eq!(Coding::Free.enumerated_code("immediate"), None);
    }

    #[test]
    fn test_for_path() {
        let path = FieldPath::parse("/eVitals.BloodPressureGroup/eVitals.06").unwrap();
        assert_eq!(
            Field::for_path(RecordKind::Vital, &path),
            Some(Field::VitalsBpSystolic)
        );
        assert_eq!(Field::for_path(RecordKind::Scene, &path), None);
    }

    #[test]
    fn test_record_kind_parse() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
        assert!("ambulance".parse::<RecordKind>().is_err());
        assert!(RecordKind::Vital.is_repeating());
        assert!(!RecordKind::Situation.is_repeating());
    }

    #[test]
    fn test_unknown_field_key() {
        assert!("vitals.blood_type".parse::<Field>().is_err());
    }
}
