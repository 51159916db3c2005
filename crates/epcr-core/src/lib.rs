//! ePCR Core Library
//!
//! Offline-first engine for prehospital patient care reports encoded as
//! NEMSIS-style clinical documents.
//!
//! # Architecture
//!
//! ```text
//! Transcript ──► ExtractionPipeline ──► CodeLookup (FTS5 code lists)
//!                       │
//!                       ▼
//!        Report (private edit version) ◄── clinician edits via Field
//!          │  records: Document + ProvenanceTracker
//!          ▼
//!   commit: changes() vs. parent version ──► SyncPayload (data / data_patch)
//!          │
//!          ▼
//!   SQLite: immutable record versions, lineage DAG
//! ```
//!
//! # Core Principle
//!
//! **Every field is tri-state.** A value is present, explicitly absent for a
//! coded reason, or not yet recorded; the document never holds a bare null.
//!
//! # Modules
//!
//! - [`models`]: Value cells, the field registry, predictions, code lists
//! - [`document`]: Paths, patches, documents and diffs
//! - [`lineage`]: Record versions, reports, sync payloads, the store trait
//! - [`provenance`]: Per-field prediction tracking
//! - [`lookup`]: Term normalization and code list search
//! - [`extract`]: Transcript extraction pipeline
//! - [`db`]: SQLite persistence with FTS5 search

pub mod db;
pub mod document;
pub mod extract;
pub mod lineage;
pub mod lookup;
pub mod models;
pub mod provenance;

// Re-export commonly used types
pub use db::Database;
pub use document::{Document, FieldPath, FieldValue, Patch, PatchOp};
pub use extract::{ExtractionOutcome, ExtractionPipeline};
pub use lineage::{Lineage, Record, RecordStore, Report, SyncPayload};
pub use lookup::{CodeLookup, InMemoryCodeLookup, TermNormalizer};
pub use models::{
    CodeList, CodeListItem, Field, NegativeCode, NotValue, PertinentNegative, Prediction,
    PredictionStatus, RecordKind, ValueCell,
};
pub use provenance::ProvenanceTracker;

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use epcr_speech::{MatcherSpec, TranscriptEvent};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum EpcrError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Patch error: {0}")]
    PatchError(String),

    #[error("Extraction error: {0}")]
    ExtractionError(String),
}

impl From<db::DbError> for EpcrError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(id) => EpcrError::NotFound(id),
            other => EpcrError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EpcrError {
    fn from(e: serde_json::Error) -> Self {
        EpcrError::SerializationError(e.to_string())
    }
}

impl From<document::PatchError> for EpcrError {
    fn from(e: document::PatchError) -> Self {
        EpcrError::PatchError(e.to_string())
    }
}

impl From<extract::ExtractError> for EpcrError {
    fn from(e: extract::ExtractError) -> Self {
        EpcrError::ExtractionError(e.to_string())
    }
}

impl From<lookup::LookupError> for EpcrError {
    fn from(e: lookup::LookupError) -> Self {
        EpcrError::DatabaseError(e.to_string())
    }
}

impl From<epcr_speech::TranscriptError> for EpcrError {
    fn from(e: epcr_speech::TranscriptError) -> Self {
        EpcrError::InvalidInput(e.to_string())
    }
}

impl From<epcr_speech::MatcherError> for EpcrError {
    fn from(e: epcr_speech::MatcherError) -> Self {
        EpcrError::InvalidInput(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for EpcrError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        EpcrError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<EpcrCore>, EpcrError> {
    let db = Database::open(&path)?;
    Ok(Arc::new(EpcrCore::new(db)))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<EpcrCore>, EpcrError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(EpcrCore::new(db)))
}

// =========================================================================
// Main API Object
// =========================================================================

/// A report version checked out for editing, plus the version it came from.
struct EditSession {
    base: Option<Report>,
    working: Report,
}

/// Thread-safe engine wrapper for FFI.
///
/// Edits happen on private report versions keyed by edit id (the physical
/// id of the working report), so background extraction and foreground edits
/// never touch a stored version.
#[derive(uniffi::Object)]
pub struct EpcrCore {
    db: Arc<Mutex<Database>>,
    sessions: Mutex<BTreeMap<String, EditSession>>,
    matchers: Mutex<Vec<MatcherSpec>>,
}

impl EpcrCore {
    fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            sessions: Mutex::new(BTreeMap::new()),
            matchers: Mutex::new(epcr_speech::default_matchers()),
        }
    }
}

fn parse_field(key: &str) -> Result<Field, EpcrError> {
    key.parse::<Field>().map_err(EpcrError::InvalidInput)
}

/// Counts and offsets cross the FFI as u32, saturating instead of wrapping.
fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[uniffi::export]
impl EpcrCore {
    // =========================================================================
    // Report Operations
    // =========================================================================

    /// Create and store an empty report. Returns the report version id.
    pub fn create_report(&self) -> Result<String, EpcrError> {
        let db = self.db.lock()?;
        let report = Report::new();
        db.save_report(&report)?;
        Ok(report.id().to_string())
    }

    /// Check out a new private version of a stored report. Returns the edit id.
    pub fn begin_edit(&self, report_id: String) -> Result<String, EpcrError> {
        let db = self.db.lock()?;
        let base = db
            .load_report(&report_id)?
            .ok_or_else(|| EpcrError::NotFound(report_id.clone()))?;
        let working = base.new_version();
        let edit_id = working.id().to_string();

        self.sessions.lock()?.insert(
            edit_id.clone(),
            EditSession {
                base: Some(base),
                working,
            },
        );
        Ok(edit_id)
    }

    /// Drop an edit without saving.
    pub fn discard_edit(&self, edit_id: String) -> Result<bool, EpcrError> {
        Ok(self.sessions.lock()?.remove(&edit_id).is_some())
    }

    /// Read a field from an edit. List fields return their first cell.
    pub fn get_field(
        &self,
        edit_id: String,
        field_key: String,
    ) -> Result<Option<FfiCell>, EpcrError> {
        let field = parse_field(&field_key)?;
        let sessions = self.sessions.lock()?;
        let session = sessions
            .get(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;

        Ok(session.working.field(field).and_then(|value| match value {
            FieldValue::Scalar(cell) => Some(cell.into()),
            FieldValue::List(cells) => cells.into_iter().next().map(Into::into),
        }))
    }

    /// Read a list field from an edit.
    pub fn get_field_list(
        &self,
        edit_id: String,
        field_key: String,
    ) -> Result<Vec<FfiCell>, EpcrError> {
        let field = parse_field(&field_key)?;
        let sessions = self.sessions.lock()?;
        let session = sessions
            .get(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;

        Ok(match session.working.field(field) {
            Some(FieldValue::List(cells)) => cells.into_iter().map(Into::into).collect(),
            Some(FieldValue::Scalar(cell)) => vec![cell.into()],
            None => Vec::new(),
        })
    }

    /// Write a field on an edit. A clinician edit over a prediction marks it
    /// corrected.
    pub fn set_field(
        &self,
        edit_id: String,
        field_key: String,
        cell: FfiCell,
    ) -> Result<(), EpcrError> {
        let field = parse_field(&field_key)?;
        let cell = ValueCell::try_from(cell)?;
        let mut sessions = self.sessions.lock()?;
        let session = sessions
            .get_mut(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;

        session.working.set_field(field, cell)?;
        session
            .working
            .set_prediction_status(field, Some(PredictionStatus::Corrected));
        Ok(())
    }

    /// Write a list field on an edit.
    pub fn set_field_list(
        &self,
        edit_id: String,
        field_key: String,
        cells: Vec<FfiCell>,
    ) -> Result<(), EpcrError> {
        let field = parse_field(&field_key)?;
        let cells = cells
            .into_iter()
            .map(ValueCell::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let mut sessions = self.sessions.lock()?;
        let session = sessions
            .get_mut(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;

        session.working.set_field_list(field, cells)?;
        session
            .working
            .set_prediction_status(field, Some(PredictionStatus::Corrected));
        Ok(())
    }

    /// Start a new record for a repeating section (e.g. "vital").
    pub fn add_section(&self, edit_id: String, kind: String) -> Result<String, EpcrError> {
        let kind: RecordKind = kind.parse().map_err(EpcrError::InvalidInput)?;
        if !kind.is_repeating() {
            return Err(EpcrError::InvalidInput(format!("{kind} is not a repeating section")));
        }
        let mut sessions = self.sessions.lock()?;
        let session = sessions
            .get_mut(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;
        Ok(session.working.add_section(kind).id().to_string())
    }

    // =========================================================================
    // Extraction Operations
    // =========================================================================

    /// Run the matcher table over a transcript event (JSON) on an edit.
    pub fn ingest_transcript(
        &self,
        edit_id: String,
        transcript_json: String,
    ) -> Result<FfiExtractionSummary, EpcrError> {
        let event = TranscriptEvent::parse(&transcript_json)?;
        let db = self.db.lock()?;
        let matchers = self.matchers.lock()?.clone();
        let pipeline = ExtractionPipeline::new(&matchers, &*db)?;

        let mut sessions = self.sessions.lock()?;
        let session = sessions
            .get_mut(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;
        let outcome = pipeline.run(&mut session.working, &event)?;
        Ok(outcome.into())
    }

    /// Replace the matcher table with a JSON list of matcher specs.
    pub fn load_matchers(&self, matchers_json: String) -> Result<u32, EpcrError> {
        let specs = epcr_speech::load_matchers(&matchers_json)?;
        // Validate against the field registry before swapping
        ExtractionPipeline::new(&specs, &InMemoryCodeLookup::new())?;
        let count = to_u32(specs.len());
        *self.matchers.lock()? = specs;
        Ok(count)
    }

    /// Prediction status of a field ("unconfirmed", "confirmed", "corrected").
    pub fn prediction_status(
        &self,
        edit_id: String,
        field_key: String,
    ) -> Result<Option<String>, EpcrError> {
        let field = parse_field(&field_key)?;
        let sessions = self.sessions.lock()?;
        let session = sessions
            .get(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;
        Ok(session
            .working
            .prediction_status(field)
            .map(|s| s.as_str().to_string()))
    }

    /// Set or (with `None`) clear a field's prediction status.
    pub fn set_prediction_status(
        &self,
        edit_id: String,
        field_key: String,
        status: Option<String>,
    ) -> Result<bool, EpcrError> {
        let field = parse_field(&field_key)?;
        let status = status
            .map(|s| {
                PredictionStatus::parse(&s)
                    .ok_or_else(|| EpcrError::InvalidInput(format!("Unknown status: {s}")))
            })
            .transpose()?;
        let mut sessions = self.sessions.lock()?;
        let session = sessions
            .get_mut(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;
        Ok(session.working.set_prediction_status(field, status))
    }

    // =========================================================================
    // Save / Sync Operations
    // =========================================================================

    /// Save an edit atomically and return its sync payloads as a JSON array.
    pub fn commit_edit(&self, edit_id: String) -> Result<String, EpcrError> {
        let db = self.db.lock()?;
        let mut sessions = self.sessions.lock()?;
        let session = sessions
            .remove(&edit_id)
            .ok_or_else(|| EpcrError::NotFound(edit_id.clone()))?;

        let payloads = session.working.changes(session.base.as_ref());
        let json = match serde_json::to_string(&payloads) {
            Ok(json) => json,
            Err(e) => {
                sessions.insert(edit_id, session);
                return Err(e.into());
            }
        };
        if let Err(e) = db.save_report(&session.working) {
            tracing::warn!(edit_id = %edit_id, error = %e, "Commit failed; edit kept open");
            sessions.insert(edit_id, session);
            return Err(e.into());
        }
        Ok(json)
    }

    // =========================================================================
    // Code List Operations
    // =========================================================================

    /// Import (or replace) a code list from JSON. Returns the item count.
    pub fn import_code_list(&self, code_list_json: String) -> Result<u32, EpcrError> {
        let list: CodeList = serde_json::from_str(&code_list_json)?;
        let db = self.db.lock()?;
        db.upsert_code_list(&list)?;
        Ok(to_u32(list.items.len()))
    }

    /// Search coded terms for a NEMSIS element tag, best match first.
    pub fn search_codes(
        &self,
        field_tag: String,
        query: String,
    ) -> Result<Vec<FfiCodeItem>, EpcrError> {
        let normalized = lookup::normalize_search_text(&query);
        let db = self.db.lock()?;
        let items = db.search(&field_tag, &normalized)?;

        let mut scored: Vec<FfiCodeItem> = items
            .into_iter()
            .map(|item| FfiCodeItem {
                score: lookup::score_item(&normalized, &item),
                list: item.list,
                system: item.system,
                code: item.code,
                name: item.name,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.code.cmp(&b.code))
        });
        Ok(scored)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe value cell. `negative_code` is an NV (77...) or PN (88...) code.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiCell {
    pub text: Option<String>,
    pub negative_code: Option<String>,
}

impl From<ValueCell> for FfiCell {
    fn from(cell: ValueCell) -> Self {
        Self {
            text: cell.text_value().map(str::to_string),
            negative_code: cell.negative_value().map(|c| c.code().to_string()),
        }
    }
}

impl TryFrom<FfiCell> for ValueCell {
    type Error = EpcrError;

    fn try_from(cell: FfiCell) -> Result<Self, Self::Error> {
        let negative = cell
            .negative_code
            .as_deref()
            .map(|code| {
                NegativeCode::from_code(code).ok_or_else(|| {
                    EpcrError::InvalidInput(format!("Unknown negative code: {code}"))
                })
            })
            .transpose()?;

        let mut value = ValueCell::unset();
        value.set_text_or_negative(cell.text, negative);
        if let (true, Some(NegativeCode::Pertinent(pn))) = (value.is_present(), negative) {
            value.set_pertinent_negative(pn, true);
        }
        Ok(value)
    }
}

/// FFI-safe field write.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFieldWrite {
    pub matcher: String,
    pub field_key: String,
    pub value: String,
    pub location: u32,
    pub length: u32,
}

/// FFI-safe extraction summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiExtractionSummary {
    pub writes: Vec<FfiFieldWrite>,
    pub unresolved: u32,
    pub remainder: Option<String>,
    pub swept: u32,
}

impl From<ExtractionOutcome> for FfiExtractionSummary {
    fn from(outcome: ExtractionOutcome) -> Self {
        Self {
            writes: outcome
                .writes
                .into_iter()
                .map(|w| FfiFieldWrite {
                    matcher: w.matcher,
                    field_key: w.field.key().to_string(),
                    value: w.value,
                    location: to_u32(w.source_range.location),
                    length: to_u32(w.source_range.length),
                })
                .collect(),
            unresolved: to_u32(outcome.unresolved),
            remainder: outcome.remainder,
            swept: to_u32(outcome.swept),
        }
    }
}

/// FFI-safe code search hit.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCodeItem {
    pub list: String,
    pub system: String,
    pub code: String,
    pub name: String,
    pub score: f64,
}
