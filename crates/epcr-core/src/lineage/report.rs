//! Reports: a report record plus its section records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Record, SyncPayload};
use crate::document::{FieldValue, Patch, PatchError};
use crate::models::{
    Field, Prediction, PredictionSource, PredictionStatus, RecordKind, ValueCell,
};

/// One patient care report and every section record belonging to it.
///
/// All field access goes through [`Field`]; there are no implicit writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    record: Record,
    sections: Vec<Record>,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            record: Record::new(RecordKind::Report),
            sections: Vec::new(),
        }
    }

    /// Reassemble a report from stored records.
    pub fn from_parts(record: Record, sections: Vec<Record>) -> Self {
        Self { record, sections }
    }

    pub fn id(&self) -> &str {
        self.record.id()
    }

    pub fn canonical_id(&self) -> &str {
        self.record.canonical_id()
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn sections(&self) -> &[Record] {
        &self.sections
    }

    /// The report record followed by every section.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        std::iter::once(&self.record).chain(self.sections.iter())
    }

    pub fn sections_of(&self, kind: RecordKind) -> impl Iterator<Item = &Record> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }

    /// The most recent section of `kind`.
    pub fn section(&self, kind: RecordKind) -> Option<&Record> {
        self.sections.iter().rev().find(|s| s.kind == kind)
    }

    /// Start another record of a repeating section (e.g. a new set of vitals).
    pub fn add_section(&mut self, kind: RecordKind) -> &mut Record {
        let record = Record::for_report(kind, self.record.canonical_id());
        self.sections.push(record);
        let last = self.sections.len() - 1;
        &mut self.sections[last]
    }

    fn section_mut(&mut self, kind: RecordKind) -> &mut Record {
        if kind == RecordKind::Report {
            return &mut self.record;
        }
        match self.sections.iter().rposition(|s| s.kind == kind) {
            Some(index) => &mut self.sections[index],
            None => self.add_section(kind),
        }
    }

    fn section_for(&self, kind: RecordKind) -> Option<&Record> {
        if kind == RecordKind::Report {
            return Some(&self.record);
        }
        self.section(kind)
    }

    /// Current value of `field` in the most recent section of its kind.
    pub fn field(&self, field: Field) -> Option<FieldValue> {
        self.section_for(field.kind())?.get(&field.path())
    }

    /// Write a cell. List fields receive a one-element list.
    pub fn set_field(&mut self, field: Field, cell: ValueCell) -> Result<Patch, PatchError> {
        if field.is_list() {
            return self.set_field_list(field, vec![cell]);
        }
        let path = field.path();
        self.section_mut(field.kind())
            .set_scalar(&path, &cell, field.is_optional())
    }

    /// Write a list. Scalar fields receive the first cell, or unset.
    pub fn set_field_list(
        &mut self,
        field: Field,
        cells: Vec<ValueCell>,
    ) -> Result<Patch, PatchError> {
        let path = field.path();
        let optional = field.is_optional();
        let section = self.section_mut(field.kind());
        if field.is_list() {
            section.set_list(&path, &cells, optional)
        } else {
            let cell = cells.into_iter().next().unwrap_or_default();
            section.set_scalar(&path, &cell, optional)
        }
    }

    /// Attach a prediction to `field` in its current section.
    pub fn record_prediction(
        &mut self,
        field: Field,
        prediction: Prediction,
        source: PredictionSource,
    ) {
        let path = field.path();
        self.section_mut(field.kind())
            .predictions
            .record(&path, prediction, source);
    }

    pub fn prediction(&self, field: Field) -> Option<&Prediction> {
        self.section_for(field.kind())?
            .predictions
            .prediction(&field.path())
    }

    pub fn prediction_status(&self, field: Field) -> Option<PredictionStatus> {
        self.section_for(field.kind())?
            .predictions
            .status(&field.path())
    }

    /// Update or (with `None`) clear the prediction status on `field`.
    pub fn set_prediction_status(
        &mut self,
        field: Field,
        status: Option<PredictionStatus>,
    ) -> bool {
        let path = field.path();
        let kind = field.kind();
        let index = match kind {
            RecordKind::Report => None,
            _ => match self.sections.iter().rposition(|s| s.kind == kind) {
                Some(index) => Some(index),
                None => return false,
            },
        };
        let record = match index {
            Some(index) => &mut self.sections[index],
            None => &mut self.record,
        };
        let updated = record.predictions.set_status(status, &path);
        if updated {
            record.touch();
        }
        updated
    }

    /// Sweep stale transcript sources from every record.
    pub fn sweep_sources(&mut self, keep: &BTreeSet<String>) -> usize {
        std::iter::once(&mut self.record)
            .chain(self.sections.iter_mut())
            .map(|record| record.predictions.sweep_stale(keep))
            .sum()
    }

    /// Private edit copy: every record becomes a new version.
    pub fn new_version(&self) -> Self {
        Self {
            record: self.record.new_version(),
            sections: self.sections.iter().map(Record::new_version).collect(),
        }
    }

    /// Sync payloads for every record that changed relative to `from`,
    /// report first, then sections ordered by kind and id.
    ///
    /// A section whose parent version is not in `from` is sent as a create.
    pub fn changes(&self, from: Option<&Report>) -> Vec<SyncPayload> {
        let mut payloads = Vec::new();
        payloads.extend(self.record.changes(from.map(|f| &f.record)));

        let mut sections: Vec<&Record> = self.sections.iter().collect();
        sections.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.id().cmp(b.id())));

        for section in sections {
            let parent = from.and_then(|f| {
                let parent_id = section.lineage.parent_id.as_deref()?;
                f.sections.iter().find(|s| s.id() == parent_id)
            });
            payloads.extend(section.changes(parent));
        }
        payloads
    }
}
