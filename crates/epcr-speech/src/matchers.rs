//! Matcher tables: which transcript patterns fill which chart fields.
//!
//! A table is plain data so it can ship as JSON and be swapped in tests.
//! Field keys (`vitals.bp_systolic`, ...) are resolved by `epcr-core`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Matcher table errors.
#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid pattern in matcher '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Matcher '{name}' has no capture group named '{group}'")]
    MissingGroup { name: String, group: String },
}

/// One named capture group and the field it writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureSpec {
    /// Named group in the matcher's pattern
    pub group: String,
    /// Field key, e.g. "vitals.bp_systolic"
    pub field: String,
    /// Lower-cased spoken form → canonical value. Empty means "use the raw text".
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mapping: BTreeMap<String, String>,
}

/// A compiled-on-demand pattern plus its capture rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatcherSpec {
    pub name: String,
    pub pattern: String,
    pub captures: Vec<CaptureSpec>,
}

impl MatcherSpec {
    pub fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            captures: Vec::new(),
        }
    }

    /// Add a capture that writes raw text.
    pub fn capture(mut self, group: &str, field: &str) -> Self {
        self.captures.push(CaptureSpec {
            group: group.to_string(),
            field: field.to_string(),
            mapping: BTreeMap::new(),
        });
        self
    }

    /// Add a capture whose text is mapped through `pairs` first.
    pub fn capture_mapped(mut self, group: &str, field: &str, pairs: &[(&str, &str)]) -> Self {
        self.captures.push(CaptureSpec {
            group: group.to_string(),
            field: field.to_string(),
            mapping: pairs
                .iter()
                .map(|(spoken, canonical)| (spoken.to_lowercase(), canonical.to_string()))
                .collect(),
        });
        self
    }

    /// Compile the pattern and check every capture names a real group.
    pub fn compile(&self) -> Result<Regex, MatcherError> {
        let regex = Regex::new(&self.pattern).map_err(|source| MatcherError::InvalidPattern {
            name: self.name.clone(),
            source,
        })?;

        for capture in &self.captures {
            let known = regex
                .capture_names()
                .flatten()
                .any(|name| name == capture.group);
            if !known {
                return Err(MatcherError::MissingGroup {
                    name: self.name.clone(),
                    group: capture.group.clone(),
                });
            }
        }

        Ok(regex)
    }
}

/// Parse a matcher table from JSON and validate every entry. Mapping keys
/// are lower-cased to match how captures are looked up.
pub fn load_matchers(json: &str) -> Result<Vec<MatcherSpec>, MatcherError> {
    let mut specs: Vec<MatcherSpec> = serde_json::from_str(json)?;
    for spec in &mut specs {
        spec.compile()?;
        for capture in &mut spec.captures {
            capture.mapping = std::mem::take(&mut capture.mapping)
                .into_iter()
                .map(|(spoken, canonical)| (spoken.to_lowercase(), canonical))
                .collect();
        }
    }
    Ok(specs)
}

/// Read a matcher table from a JSON file on disk.
pub fn load_matcher_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<MatcherSpec>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading matcher table {}", path.display()))?;
    let specs = load_matchers(&json)
        .with_context(|| format!("parsing matcher table {}", path.display()))?;
    tracing::debug!(path = %path.display(), count = specs.len(), "Loaded matcher table");
    Ok(specs)
}

/// Optional "is / of / was / :" between a vital's name and its value.
const LINKING: &str = r"\s*(?:is|of|was|at|:)?\s*";

/// The built-in matcher table, in evaluation order.
pub fn default_matchers() -> Vec<MatcherSpec> {
    vec![
        MatcherSpec::new(
            "blood_pressure",
            &format!(
                r"(?i)\b(?:blood pressure|bp){LINKING}(?P<systolic>\d{{2,3}})\s*(?:/|over)\s*(?P<diastolic>\d{{2,3}})\b"
            ),
        )
        .capture("systolic", "vitals.bp_systolic")
        .capture("diastolic", "vitals.bp_diastolic"),
        MatcherSpec::new(
            "heart_rate",
            &format!(r"(?i)\b(?:heart rate|pulse|hr){LINKING}(?P<heart_rate>\d{{2,3}})\b"),
        )
        .capture("heart_rate", "vitals.heart_rate"),
        MatcherSpec::new(
            "respiratory_rate",
            &format!(
                r"(?i)\b(?:respiratory rate|respirations|resp rate|rr){LINKING}(?P<respiratory_rate>\d{{1,2}})\b"
            ),
        )
        .capture("respiratory_rate", "vitals.respiratory_rate"),
        MatcherSpec::new(
            "pulse_oximetry",
            &format!(
                r"(?i)\b(?:pulse ox|o2 sat|oxygen saturation|sats?|spo2){LINKING}(?P<spo2>\d{{2,3}})\s*(?:%|percent)?"
            ),
        )
        .capture("spo2", "vitals.pulse_oximetry"),
        MatcherSpec::new(
            "blood_glucose",
            &format!(
                r"(?i)\b(?:blood sugar|blood glucose|glucose|bgl|cbg){LINKING}(?P<glucose>\d{{2,3}})\b"
            ),
        )
        .capture("glucose", "vitals.blood_glucose"),
        MatcherSpec::new(
            "temperature",
            &format!(r"(?i)\b(?:temperature|temp){LINKING}(?P<temperature>\d{{2,3}}(?:\.\d)?)\b"),
        )
        .capture("temperature", "vitals.temperature"),
        MatcherSpec::new(
            "gcs",
            &format!(r"(?i)\b(?:gcs|glasgow coma scale|glasgow){LINKING}(?P<gcs>\d{{1,2}})\b"),
        )
        .capture("gcs", "vitals.gcs_total"),
        MatcherSpec::new(
            "pain_scale",
            &format!(r"(?i)\bpain{LINKING}(?P<pain>\d{{1,2}})\s*(?:/|out of)\s*10\b"),
        )
        .capture("pain", "vitals.pain_scale"),
        MatcherSpec::new(
            "triage_priority",
            r"(?i)\b(?P<priority>red|yellow|green|gr[ae]y|black|immediate|delayed|minor|minimal|expectant|deceased)\s+(?:priority|tag|triage)\b",
        )
        .capture_mapped(
            "priority",
            "scene.triage_classification",
            &[
                ("red", "immediate"),
                ("immediate", "immediate"),
                ("yellow", "delayed"),
                ("delayed", "delayed"),
                ("green", "minimal"),
                ("minor", "minimal"),
                ("minimal", "minimal"),
                ("gray", "expectant"),
                ("grey", "expectant"),
                ("expectant", "expectant"),
                ("black", "deceased"),
                ("deceased", "deceased"),
            ],
        ),
        MatcherSpec::new(
            "age_gender",
            r"(?i)\b(?P<age>\d{1,3})[\s-]*(?P<age_units>years?|yrs?|months?|days?)[\s-]*old\s+(?P<gender>male|female|man|woman|boy|girl)\b",
        )
        .capture("age", "patient.age")
        .capture_mapped(
            "age_units",
            "patient.age_units",
            &[
                ("year", "years"),
                ("years", "years"),
                ("yr", "years"),
                ("yrs", "years"),
                ("month", "months"),
                ("months", "months"),
                ("day", "days"),
                ("days", "days"),
            ],
        )
        .capture_mapped(
            "gender",
            "patient.gender",
            &[
                ("male", "male"),
                ("man", "male"),
                ("boy", "male"),
                ("female", "female"),
                ("woman", "female"),
                ("girl", "female"),
            ],
        ),
        MatcherSpec::new(
            "medication_given",
            r"(?i)\b(?:gave|given|administered|pushed)\s+(?:(?P<dose>\d+(?:\.\d+)?)\s*(?P<dose_unit>mg|milligrams?|mcg|micrograms?|grams?|g|ml|milliliters?|units?)\s+(?:of\s+)?)?(?P<medication>[a-z][a-z-]+)(?:\s+(?P<route>iv|im|io|po|sl|intravenous(?:ly)?|intramuscular(?:ly)?|intraosseous(?:ly)?|oral(?:ly)?|sublingual(?:ly)?|(?:intra)?nasal(?:ly)?)\b)?",
        )
        .capture("medication", "medication.given")
        .capture("dose", "medication.dosage")
        .capture_mapped(
            "dose_unit",
            "medication.dosage_units",
            &[
                ("mg", "milligrams"),
                ("milligram", "milligrams"),
                ("milligrams", "milligrams"),
                ("mcg", "micrograms"),
                ("microgram", "micrograms"),
                ("micrograms", "micrograms"),
                ("g", "grams"),
                ("gram", "grams"),
                ("grams", "grams"),
                ("ml", "milliliters"),
                ("milliliter", "milliliters"),
                ("milliliters", "milliliters"),
                ("unit", "units"),
                ("units", "units"),
            ],
        )
        .capture_mapped(
            "route",
            "medication.route",
            &[
                ("iv", "intravenous"),
                ("intravenous", "intravenous"),
                ("intravenously", "intravenous"),
                ("im", "intramuscular"),
                ("intramuscular", "intramuscular"),
                ("intramuscularly", "intramuscular"),
                ("io", "intraosseous"),
                ("intraosseous", "intraosseous"),
                ("intraosseously", "intraosseous"),
                ("po", "oral"),
                ("oral", "oral"),
                ("orally", "oral"),
                ("sl", "sublingual"),
                ("sublingual", "sublingual"),
                ("sublingually", "sublingual"),
                ("intranasal", "intranasal"),
                ("intranasally", "intranasal"),
                ("nasal", "intranasal"),
                ("nasally", "intranasal"),
            ],
        ),
        MatcherSpec::new(
            "procedure_performed",
            r"(?i)\b(?:performed|placed|started|established)\s+(?:an?\s+)?(?P<procedure>[a-z][a-z-]+(?:\s+[a-z][a-z-]+){0,2}?)(?:[.,;]|\s+(?:and|on|in|with|at|for)\b|$)",
        )
        .capture("procedure", "procedure.performed"),
        MatcherSpec::new(
            "primary_symptom",
            r"(?i)\bcomplain(?:s|ing|ed)?\s+of\s+(?P<symptom>[a-z][a-z-]*(?:\s+[a-z][a-z-]*){0,3}?)(?:[.,;]|\s+(?:and|since|for|with|that)\b|$)",
        )
        .capture("symptom", "situation.primary_symptom"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(specs: &'a [MatcherSpec], name: &str) -> &'a MatcherSpec {
        specs.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_default_table_compiles() {
        for spec in default_matchers() {
            assert!(spec.compile().is_ok(), "matcher {} failed to compile", spec.name);
        }
    }

    #[test]
    fn test_blood_pressure_pattern() {
        let specs = default_matchers();
        let regex = find(&specs, "blood_pressure").compile().unwrap();

        let caps = regex.captures("blood pressure is 120/80").unwrap();
        assert_eq!(&caps["systolic"], "120");
        assert_eq!(&caps["diastolic"], "80");

        let caps = regex.captures("BP 142 over 96 and rising").unwrap();
        assert_eq!(&caps["systolic"], "142");
        assert_eq!(&caps["diastolic"], "96");
    }

    #[test]
    fn test_pulse_ox_is_not_heart_rate() {
        let specs = default_matchers();
        let heart_rate = find(&specs, "heart_rate").compile().unwrap();
        let spo2 = find(&specs, "pulse_oximetry").compile().unwrap();

        assert!(heart_rate.captures("pulse ox 98 percent").is_none());
        assert_eq!(&spo2.captures("pulse ox 98 percent").unwrap()["spo2"], "98");
    }

    #[test]
    fn test_medication_pattern() {
        let specs = default_matchers();
        let regex = find(&specs, "medication_given").compile().unwrap();

        let caps = regex.captures("gave 4 mg of zofran IV for nausea").unwrap();
        assert_eq!(&caps["dose"], "4");
        assert_eq!(&caps["dose_unit"], "mg");
        assert_eq!(&caps["medication"], "zofran");
        assert_eq!(&caps["route"], "IV");

        let caps = regex.captures("administered aspirin").unwrap();
        assert!(caps.name("dose").is_none());
        assert_eq!(&caps["medication"], "aspirin");
    }

    #[test]
    fn test_route_ignores_preposition_in() {
        let specs = default_matchers();
        let regex = find(&specs, "medication_given").compile().unwrap();

        let caps = regex.captures("gave aspirin in the ambulance").unwrap();
        assert_eq!(&caps["medication"], "aspirin");
        assert!(caps.name("route").is_none());

        let caps = regex.captures("gave 2 mg of narcan nasally").unwrap();
        assert_eq!(&caps["route"], "nasally");
    }

    #[test]
    fn test_symptom_pattern_stops_at_conjunction() {
        let specs = default_matchers();
        let regex = find(&specs, "primary_symptom").compile().unwrap();

        let caps = regex
            .captures("patient complains of chest pain since this morning")
            .unwrap();
        assert_eq!(&caps["symptom"], "chest pain");
    }

    #[test]
    fn test_mapping_keys_are_lowercase() {
        let spec =
            MatcherSpec::new("t", "(?P<x>a)").capture_mapped("x", "f", &[("RED", "immediate")]);
        assert_eq!(spec.captures[0].mapping.get("red"), Some(&"immediate".to_string()));
    }

    #[test]
    fn test_missing_group_rejected() {
        let spec = MatcherSpec::new("broken", r"(?P<a>\d+)").capture("b", "vitals.heart_rate");
        assert!(matches!(spec.compile(), Err(MatcherError::MissingGroup { .. })));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let spec = MatcherSpec::new("broken", r"(?P<a>\d+");
        assert!(matches!(spec.compile(), Err(MatcherError::InvalidPattern { .. })));
    }

    #[test]
    fn test_load_matchers_json() {
        let json = r#"[{"name": "hr", "pattern": "(?i)hr (?P<v>\\d+)", "captures": [{"group": "v", "field": "vitals.heart_rate"}]}]"#;
        let specs = load_matchers(json).unwrap();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].captures[0].mapping.is_empty());
    }

    #[test]
    fn test_load_matchers_lowercases_mapping_keys() {
        let json = r#"[{
            "name": "triage",
            "pattern": "(?i)(?P<p>red) tag",
            "captures": [{
                "group": "p",
                "field": "scene.triage_classification",
                "mapping": {"Red": "immediate"}
            }]
        }]"#;
        let specs = load_matchers(json).unwrap();
        let mapping = &specs[0].captures[0].mapping;
        assert_eq!(mapping.get("red"), Some(&"immediate".to_string()));
        assert!(mapping.get("Red").is_none());
    }

    #[test]
    fn test_load_matcher_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matchers.json");
        std::fs::write(&path, serde_json::to_string(&default_matchers()).unwrap()).unwrap();

        let specs = load_matcher_file(&path).unwrap();
        assert_eq!(specs, default_matchers());

        let missing = load_matcher_file(dir.path().join("nope.json"));
        assert!(missing.unwrap_err().to_string().contains("reading matcher table"));
    }
}
