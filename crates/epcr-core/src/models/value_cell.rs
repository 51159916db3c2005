//! Tri-state clinical values.
//!
//! Every clinical field holds a [`ValueCell`]: recorded text, an explicit
//! not-a-value reason (NV), or a pertinent negative (PN). The wire form
//! follows the NEMSIS XML-as-JSON convention:
//!
//! ```text
//! {"_text": "120"}
//! {"_attributes": {"xsi:nil": "true", "NV": "7701003"}}
//! {"_attributes": {"xsi:nil": "true", "PN": "8801013"}}
//! {"_text": "...", "_attributes": {"PN": "8801019"}}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const TEXT_KEY: &str = "_text";
pub const ATTRIBUTES_KEY: &str = "_attributes";
const NIL_ATTRIBUTE: &str = "xsi:nil";
const NV_ATTRIBUTE: &str = "NV";
const PN_ATTRIBUTE: &str = "PN";

/// Value cell errors.
#[derive(Error, Debug, PartialEq)]
pub enum CellError {
    #[error("Cell must be a JSON object, got: {0}")]
    NotAnObject(String),

    #[error("Unknown NV code: {0}")]
    UnknownNotValue(String),

    #[error("Unknown PN code: {0}")]
    UnknownPertinentNegative(String),

    #[error("Invalid cell attribute '{0}'")]
    InvalidAttribute(String),
}

/// Not-a-value reasons (NV).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotValue {
    NotApplicable,
    NotRecorded,
    NotReporting,
}

impl NotValue {
    pub fn code(&self) -> &'static str {
        match self {
            NotValue::NotApplicable => "7701001",
            NotValue::NotRecorded => "7701003",
            NotValue::NotReporting => "7701005",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "7701001" => Some(NotValue::NotApplicable),
            "7701003" => Some(NotValue::NotRecorded),
            "7701005" => Some(NotValue::NotReporting),
            _ => None,
        }
    }
}

/// Pertinent negatives (PN): a clinically meaningful "no".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PertinentNegative {
    ContraindicationNoted,
    DeniedByOrder,
    ExamFindingNotPresent,
    MedicationAllergy,
    MedicationAlreadyTaken,
    NoKnownDrugAllergy,
    NoneReported,
    NotPerformedByEms,
    Refused,
    Unresponsive,
    UnableToComplete,
    NotImmunized,
    OrderCriteriaNotMet,
    Approximate,
    SymptomNotPresent,
}

impl PertinentNegative {
    const ALL: [(PertinentNegative, &'static str); 15] = [
        (PertinentNegative::ContraindicationNoted, "8801001"),
        (PertinentNegative::DeniedByOrder, "8801003"),
        (PertinentNegative::ExamFindingNotPresent, "8801005"),
        (PertinentNegative::MedicationAllergy, "8801007"),
        (PertinentNegative::MedicationAlreadyTaken, "8801009"),
        (PertinentNegative::NoKnownDrugAllergy, "8801013"),
        (PertinentNegative::NoneReported, "8801015"),
        (PertinentNegative::NotPerformedByEms, "8801017"),
        (PertinentNegative::Refused, "8801019"),
        (PertinentNegative::Unresponsive, "8801021"),
        (PertinentNegative::UnableToComplete, "8801023"),
        (PertinentNegative::NotImmunized, "8801025"),
        (PertinentNegative::OrderCriteriaNotMet, "8801027"),
        (PertinentNegative::Approximate, "8801029"),
        (PertinentNegative::SymptomNotPresent, "8801031"),
    ];

    pub fn code(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(pn, _)| pn == self)
            .map(|(_, code)| *code)
            .unwrap_or_default()
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(pn, _)| *pn)
    }
}

/// Either class of negative marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NegativeCode {
    NotValue(NotValue),
    Pertinent(PertinentNegative),
}

impl NegativeCode {
    pub fn code(&self) -> &'static str {
        match self {
            NegativeCode::NotValue(nv) => nv.code(),
            NegativeCode::Pertinent(pn) => pn.code(),
        }
    }

    /// Parse either an NV (77...) or a PN (88...) code.
    pub fn from_code(code: &str) -> Option<Self> {
        NotValue::from_code(code)
            .map(NegativeCode::NotValue)
            .or_else(|| PertinentNegative::from_code(code).map(NegativeCode::Pertinent))
    }
}

impl From<NotValue> for NegativeCode {
    fn from(nv: NotValue) -> Self {
        NegativeCode::NotValue(nv)
    }
}

impl From<PertinentNegative> for NegativeCode {
    fn from(pn: PertinentNegative) -> Self {
        NegativeCode::Pertinent(pn)
    }
}

/// The three states a clinical value can be in.
///
/// Text and an NV marker can never coexist: there is no variant for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CellState {
    /// Recorded text, optionally flagged with a pertinent negative
    /// (e.g. an approximate value).
    Present {
        text: String,
        pertinent: Option<PertinentNegative>,
    },
    /// No answer, for a coded reason.
    NotValue(NotValue),
    /// No answer, and the absence is clinically meaningful.
    PertinentNegative(PertinentNegative),
}

/// A single clinical field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCell {
    state: CellState,
    /// Additional wire attributes (never NV, PN or xsi:nil)
    attributes: BTreeMap<String, String>,
}

impl Default for ValueCell {
    fn default() -> Self {
        Self::unset()
    }
}

impl ValueCell {
    /// A cell that has not been recorded yet (`NV = not recorded`).
    pub fn unset() -> Self {
        Self {
            state: CellState::NotValue(NotValue::NotRecorded),
            attributes: BTreeMap::new(),
        }
    }

    /// A cell holding `text`. Blank text yields an unset cell.
    pub fn text(text: impl Into<String>) -> Self {
        let mut cell = Self::unset();
        cell.set_text(Some(text.into()));
        cell
    }

    /// A cell carrying only a negative marker.
    pub fn negative(code: impl Into<NegativeCode>) -> Self {
        let state = match code.into() {
            NegativeCode::NotValue(nv) => CellState::NotValue(nv),
            NegativeCode::Pertinent(pn) => CellState::PertinentNegative(pn),
        };
        Self {
            state,
            attributes: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// The recorded text, if any.
    pub fn text_value(&self) -> Option<&str> {
        match &self.state {
            CellState::Present { text, .. } => Some(text),
            _ => None,
        }
    }

    /// True for the default "not recorded" state with nothing else attached.
    pub fn is_unset(&self) -> bool {
        matches!(self.state, CellState::NotValue(NotValue::NotRecorded))
    }

    pub fn is_present(&self) -> bool {
        matches!(self.state, CellState::Present { .. })
    }

    /// The negative marker carried by this cell, if any.
    pub fn negative_value(&self) -> Option<NegativeCode> {
        match &self.state {
            CellState::Present { pertinent, .. } => pertinent.map(NegativeCode::Pertinent),
            CellState::NotValue(nv) => Some(NegativeCode::NotValue(*nv)),
            CellState::PertinentNegative(pn) => Some(NegativeCode::Pertinent(*pn)),
        }
    }

    /// Set or clear the text. Non-blank text clears every negative marker;
    /// blank or missing text falls back to "not recorded".
    pub fn set_text(&mut self, text: Option<String>) {
        self.set_text_or_negative(text, None);
    }

    /// Like [`set_text`](Self::set_text), but a blank value takes `fallback`
    /// instead of "not recorded".
    pub fn set_text_or_negative(&mut self, text: Option<String>, fallback: Option<NegativeCode>) {
        match text.filter(|t| !t.trim().is_empty()) {
            Some(text) => {
                self.state = CellState::Present {
                    text,
                    pertinent: None,
                }
            }
            None => {
                let code = fallback.unwrap_or(NegativeCode::NotValue(NotValue::NotRecorded));
                self.apply_negative(code, false);
            }
        }
    }

    /// Set an NV marker. Clears text and any PN.
    pub fn set_not_value(&mut self, nv: NotValue) {
        self.state = CellState::NotValue(nv);
    }

    /// Set a PN marker. With `keep_text`, recorded text survives and is
    /// flagged; otherwise the cell becomes a bare pertinent negative.
    pub fn set_pertinent_negative(&mut self, pn: PertinentNegative, keep_text: bool) {
        self.apply_negative(NegativeCode::Pertinent(pn), keep_text);
    }

    fn apply_negative(&mut self, code: NegativeCode, keep_text: bool) {
        let previous = std::mem::replace(
            &mut self.state,
            CellState::NotValue(NotValue::NotRecorded),
        );
        self.state = match (code, previous) {
            (NegativeCode::NotValue(nv), _) => CellState::NotValue(nv),
            (NegativeCode::Pertinent(pn), CellState::Present { text, .. }) if keep_text => {
                CellState::Present {
                    text,
                    pertinent: Some(pn),
                }
            }
            (NegativeCode::Pertinent(pn), _) => CellState::PertinentNegative(pn),
        };
    }

    /// Attach an extra wire attribute (e.g. `CorrelationID`).
    pub fn set_attribute(&mut self, name: &str, value: &str) -> Result<(), CellError> {
        if matches!(name, NIL_ATTRIBUTE | NV_ATTRIBUTE | PN_ATTRIBUTE) {
            return Err(CellError::InvalidAttribute(name.to_string()));
        }
        self.attributes.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Render the NEMSIS JSON object for this cell.
    pub fn to_wire(&self) -> Value {
        let mut attributes: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut object = Map::new();

        match &self.state {
            CellState::Present { text, pertinent } => {
                object.insert(TEXT_KEY.into(), Value::String(text.clone()));
                if let Some(pn) = pertinent {
                    attributes.insert(PN_ATTRIBUTE.into(), pn.code().into());
                }
            }
            CellState::NotValue(nv) => {
                attributes.insert(NIL_ATTRIBUTE.into(), "true".into());
                attributes.insert(NV_ATTRIBUTE.into(), nv.code().into());
            }
            CellState::PertinentNegative(pn) => {
                attributes.insert(NIL_ATTRIBUTE.into(), "true".into());
                attributes.insert(PN_ATTRIBUTE.into(), pn.code().into());
            }
        }

        if !attributes.is_empty() {
            object.insert(ATTRIBUTES_KEY.into(), Value::Object(attributes));
        }
        Value::Object(object)
    }

    /// Parse a NEMSIS JSON object.
    ///
    /// A cell carrying both `_text` and an NV marker keeps the text.
    pub fn from_wire(value: &Value) -> Result<Self, CellError> {
        let object = value
            .as_object()
            .ok_or_else(|| CellError::NotAnObject(value.to_string()))?;

        let text = object
            .get(TEXT_KEY)
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string);

        let mut attributes = BTreeMap::new();
        let mut nv = None;
        let mut pn = None;
        if let Some(attrs) = object.get(ATTRIBUTES_KEY).and_then(Value::as_object) {
            for (name, raw) in attrs {
                let raw = match raw {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match name.as_str() {
                    NIL_ATTRIBUTE => {}
                    NV_ATTRIBUTE => {
                        nv = Some(
                            NotValue::from_code(&raw).ok_or(CellError::UnknownNotValue(raw))?,
                        )
                    }
                    PN_ATTRIBUTE => {
                        pn = Some(
                            PertinentNegative::from_code(&raw)
                                .ok_or(CellError::UnknownPertinentNegative(raw))?,
                        )
                    }
                    _ => {
                        attributes.insert(name.clone(), raw);
                    }
                }
            }
        }

        let state = match (text, nv, pn) {
            (Some(text), nv, pertinent) => {
                if let Some(nv) = nv {
                    tracing::warn!(nv = nv.code(), "Cell carried both text and NV; keeping text");
                }
                CellState::Present { text, pertinent }
            }
            (None, _, Some(pn)) => CellState::PertinentNegative(pn),
            (None, Some(nv), None) => CellState::NotValue(nv),
            (None, None, None) => CellState::NotValue(NotValue::NotRecorded),
        };

        Ok(Self { state, attributes })
    }
}

impl fmt::Display for ValueCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            CellState::Present { text, .. } => f.write_str(text),
            CellState::NotValue(nv) => write!(f, "NV:{}", nv.code()),
            CellState::PertinentNegative(pn) => write!(f, "PN:{}", pn.code()),
        }
    }
}

impl Serialize for ValueCell {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ValueCell {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ValueCell::from_wire(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_default_is_not_recorded() {
        let cell = ValueCell::default();
        assert!(cell.is_unset());
        assert_eq!(
            cell.negative_value(),
            Some(NegativeCode::NotValue(NotValue::NotRecorded))
        );
        assert_eq!(
            cell.to_wire(),
            json!({"_attributes": {"xsi:nil": "true", "NV": "7701003"}})
        );
    }

    #[test]
    fn test_text_wire() {
        let cell = ValueCell::text("120");
        assert_eq!(cell.text_value(), Some("120"));
        assert!(cell.negative_value().is_none());
        assert_eq!(cell.to_wire(), json!({"_text": "120"}));
    }

    #[test]
    fn test_blank_text_is_unset() {
        assert!(ValueCell::text("   ").is_unset());
    }

    #[test]
    fn test_blank_text_with_fallback() {
        let mut cell = ValueCell::text("x");
        cell.set_text_or_negative(Some(String::new()), Some(NotValue::NotApplicable.into()));
        assert_eq!(cell.state(), &CellState::NotValue(NotValue::NotApplicable));
    }

    #[test]
    fn test_setting_text_clears_pertinent_negative() {
        let mut cell = ValueCell::negative(PertinentNegative::NoKnownDrugAllergy);
        cell.set_text(Some("penicillin".into()));
        assert_eq!(cell.to_wire(), json!({"_text": "penicillin"}));
    }

    #[test]
    fn test_not_value_clears_text() {
        let mut cell = ValueCell::text("98");
        cell.set_not_value(NotValue::NotApplicable);
        assert!(cell.text_value().is_none());
        assert_eq!(
            cell.to_wire(),
            json!({"_attributes": {"xsi:nil": "true", "NV": "7701001"}})
        );
    }

    #[test]
    fn test_pertinent_negative_keep_text() {
        let mut cell = ValueCell::text("45");
        cell.set_pertinent_negative(PertinentNegative::Approximate, true);
        assert_eq!(
            cell.to_wire(),
            json!({"_text": "45", "_attributes": {"PN": "8801029"}})
        );

        cell.set_pertinent_negative(PertinentNegative::Refused, false);
        assert_eq!(
            cell.to_wire(),
            json!({"_attributes": {"xsi:nil": "true", "PN": "8801019"}})
        );
    }

    #[test]
    fn test_from_wire_prefers_text_over_nv() {
        let cell = ValueCell::from_wire(&json!({
            "_text": "80",
            "_attributes": {"xsi:nil": "true", "NV": "7701003"}
        }))
        .unwrap();
        assert_eq!(cell.text_value(), Some("80"));
        assert!(cell.negative_value().is_none());
    }

    #[test]
    fn test_from_wire_keeps_extra_attributes() {
        let wire = json!({"_text": "x", "_attributes": {"CorrelationID": "abc"}});
        let cell = ValueCell::from_wire(&wire).unwrap();
        assert_eq!(cell.attributes().get("CorrelationID"), Some(&"abc".to_string()));
        assert_eq!(cell.to_wire(), wire);
    }

    #[test]
    fn test_from_wire_rejects_unknown_codes() {
        let result = ValueCell::from_wire(&json!({"_attributes": {"NV": "1234"}}));
        assert_eq!(result, Err(CellError::UnknownNotValue("1234".into())));
        assert!(ValueCell::from_wire(&json!("x")).is_err());
    }

    #[test]
    fn test_reserved_attributes_rejected() {
        let mut cell = ValueCell::text("1");
        assert!(cell.set_attribute("NV", "7701001").is_err());
        assert!(cell.set_attribute("CorrelationID", "1").is_ok());
    }

    #[test]
    fn test_pn_codes_roundtrip_table() {
        for (pn, code) in PertinentNegative::ALL {
            assert_eq!(pn.code(), code);
            assert_eq!(PertinentNegative::from_code(code), Some(pn));
        }
    }

    #[test]
    fn test_serde_uses_wire_form() {
        let cell = ValueCell::negative(NotValue::NotReporting);
        let json = serde_json::to_value(&cell).unwrap();
        assert_eq!(json["_attributes"]["NV"], "7701005");
        let back: ValueCell = serde_json::from_value(json).unwrap();
        assert_eq!(back, cell);
    }

    #[derive(Debug, Clone)]
    enum Mutation {
        Text(String),
        NotValue(NotValue),
        Pertinent(PertinentNegative, bool),
        TextOrNegative(String, NegativeCode),
    }

    fn mutation_strategy() -> impl Strategy<Value = Mutation> {
        let nv = prop_oneof![
            Just(NotValue::NotApplicable),
            Just(NotValue::NotRecorded),
            Just(NotValue::NotReporting)
        ];
        let pn = prop_oneof![
            Just(PertinentNegative::Refused),
            Just(PertinentNegative::Approximate),
            Just(PertinentNegative::NoKnownDrugAllergy)
        ];
        prop_oneof![
            "[ a-z0-9]{0,6}".prop_map(Mutation::Text),
            nv.clone().prop_map(Mutation::NotValue),
            (pn.clone(), any::<bool>()).prop_map(|(p, k)| Mutation::Pertinent(p, k)),
            ("[ a-z]{0,3}", nv).prop_map(|(t, n)| Mutation::TextOrNegative(t, n.into())),
        ]
    }

    proptest! {
        #[test]
        fn text_never_coexists_with_nv(
            mutations in proptest::collection::vec(mutation_strategy(), 0..12)
        ) {
            let mut cell = ValueCell::default();
            for m in mutations {
                match m {
                    Mutation::Text(t) => cell.set_text(Some(t)),
                    Mutation::NotValue(nv) => cell.set_not_value(nv),
                    Mutation::Pertinent(pn, keep) => cell.set_pertinent_negative(pn, keep),
                    Mutation::TextOrNegative(t, code) => {
                        cell.set_text_or_negative(Some(t), Some(code))
                    }
                }
                if cell.text_value().is_some() {
                    prop_assert!(!matches!(cell.negative_value(), Some(NegativeCode::NotValue(_))));
                }
                let wire = cell.to_wire();
                let has_nv = wire["_attributes"].get("NV").is_some();
                prop_assert!(!(wire.get("_text").is_some() && has_nv));
                prop_assert_eq!(ValueCell::from_wire(&wire).unwrap(), cell.clone());
            }
        }
    }
}
