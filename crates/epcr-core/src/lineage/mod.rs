//! Versioned records and their lineage DAG.
//!
//! Every edit happens on a new version: a physical copy with a fresh `id`
//! that keeps the `canonical_id` of the logical record and names its source
//! as `parent_id`. Two-parent versions model merges (e.g. a crew handing a
//! record over). This module only represents the DAG; it never decides which
//! version is authoritative or resolves field conflicts.

mod report;
mod store;
mod sync;

pub use report::*;
pub use store::*;
pub use sync::*;

use serde::{Deserialize, Serialize};

use crate::document::{diff, Document, FieldPath, FieldValue, Patch, PatchError};
use crate::models::{RecordKind, ValueCell};
use crate::provenance::ProvenanceTracker;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Identity and ancestry of one record version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lineage {
    /// Physical identity, unique per version
    pub id: String,
    /// Logical identity shared by every version of the record
    pub canonical_id: String,
    /// Authoritative version, as decided by an external resolver
    pub current_id: Option<String>,
    /// Version this one was derived from
    pub parent_id: Option<String>,
    /// Second source of a merge
    pub second_parent_id: Option<String>,
}

impl Default for Lineage {
    fn default() -> Self {
        Self::new()
    }
}

impl Lineage {
    /// A brand-new logical record.
    pub fn new() -> Self {
        Self {
            id: new_id(),
            canonical_id: new_id(),
            current_id: None,
            parent_id: None,
            second_parent_id: None,
        }
    }

    /// A new version of the same logical record.
    pub fn derive(&self) -> Self {
        Self {
            id: new_id(),
            canonical_id: self.canonical_id.clone(),
            current_id: self.current_id.clone(),
            parent_id: Some(self.id.clone()),
            second_parent_id: None,
        }
    }

    /// A fresh logical record continuing from this one (custody change).
    pub fn transfer(&self) -> Self {
        Self {
            id: new_id(),
            canonical_id: new_id(),
            current_id: None,
            parent_id: Some(self.id.clone()),
            second_parent_id: None,
        }
    }

    /// A two-parent version. The result belongs to `primary`'s lineage.
    pub fn merge(primary: &Lineage, secondary: &Lineage) -> Self {
        Self {
            id: new_id(),
            canonical_id: primary.canonical_id.clone(),
            current_id: primary.current_id.clone(),
            parent_id: Some(primary.id.clone()),
            second_parent_id: Some(secondary.id.clone()),
        }
    }

    pub fn is_merge(&self) -> bool {
        self.parent_id.is_some() && self.second_parent_id.is_some()
    }

    /// Ids of the versions this one descends from directly.
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.parent_id
            .iter()
            .chain(self.second_parent_id.iter())
            .map(String::as_str)
    }
}

/// One versioned clinical record: a lineage node plus its document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub lineage: Lineage,
    pub kind: RecordKind,
    /// Canonical id of the owning report (None for the report itself)
    pub report_id: Option<String>,
    pub archived_at: Option<String>,
    pub data: Document,
    #[serde(default)]
    pub predictions: ProvenanceTracker,
    pub created_at: String,
    pub updated_at: String,
}

impl Record {
    /// A new, empty record.
    pub fn new(kind: RecordKind) -> Self {
        let now = now();
        Self {
            lineage: Lineage::new(),
            kind,
            report_id: None,
            archived_at: None,
            data: Document::new(),
            predictions: ProvenanceTracker::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// A new section record owned by a report.
    pub fn for_report(kind: RecordKind, report_canonical_id: &str) -> Self {
        let mut record = Self::new(kind);
        record.report_id = Some(report_canonical_id.to_string());
        record
    }

    pub fn id(&self) -> &str {
        &self.lineage.id
    }

    pub fn canonical_id(&self) -> &str {
        &self.lineage.canonical_id
    }

    /// A private edit copy: same content and canonical id, new physical id,
    /// parent set to this version.
    pub fn new_version(&self) -> Self {
        let mut version = self.clone();
        version.lineage = self.lineage.derive();
        version.created_at = now();
        version.updated_at = version.created_at.clone();
        version
    }

    /// Continue this record under a new canonical identity.
    pub fn transfer(&self) -> Self {
        let mut version = self.new_version();
        version.lineage = self.lineage.transfer();
        version
    }

    /// A version with both `primary` and `secondary` as parents, carrying
    /// `primary`'s content. Field conflicts are left to the caller.
    pub fn merge(primary: &Record, secondary: &Record) -> Self {
        let mut version = primary.new_version();
        version.lineage = Lineage::merge(&primary.lineage, &secondary.lineage);
        version
    }

    pub fn get(&self, path: &FieldPath) -> Option<FieldValue> {
        self.data.get(path)
    }

    /// Write a scalar cell and return the applied patch.
    pub fn set_scalar(
        &mut self,
        path: &FieldPath,
        cell: &ValueCell,
        optional: bool,
    ) -> Result<Patch, PatchError> {
        let patch = self.data.set_scalar(path, cell, optional)?;
        self.touch_if(!patch.is_empty());
        Ok(patch)
    }

    /// Write a list of cells and return the applied patch.
    pub fn set_list(
        &mut self,
        path: &FieldPath,
        cells: &[ValueCell],
        optional: bool,
    ) -> Result<Patch, PatchError> {
        let patch = self.data.set_list(path, cells, optional)?;
        self.touch_if(!patch.is_empty());
        Ok(patch)
    }

    pub fn archive(&mut self) {
        self.archived_at = Some(now());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = now();
    }

    fn touch_if(&mut self, changed: bool) {
        if changed {
            self.touch();
        }
    }

    /// The sync payload for this version relative to `from`.
    ///
    /// Without a parent snapshot the payload is a create carrying the full
    /// document. Otherwise only what changed is included, and `None` means
    /// there is nothing to send.
    pub fn changes(&self, from: Option<&Record>) -> Option<SyncPayload> {
        let mut payload = SyncPayload {
            id: self.lineage.id.clone(),
            canonical_id: self.lineage.canonical_id.clone(),
            kind: self.kind,
            parent_id: self.lineage.parent_id.clone(),
            updated_at: self.updated_at.clone(),
            second_parent_id: None,
            current_id: None,
            report_id: None,
            archived_at: None,
            predictions: None,
            data: None,
            data_patch: None,
            base_digest: None,
        };

        let Some(parent) = from else {
            payload.second_parent_id = self.lineage.second_parent_id.clone().map(Some);
            payload.current_id = self.lineage.current_id.clone().map(Some);
            payload.report_id = self.report_id.clone().map(Some);
            payload.archived_at = self.archived_at.clone().map(Some);
            if !self.predictions.is_empty() {
                payload.predictions = serde_json::to_value(&self.predictions).ok();
            }
            payload.data = Some(self.data.as_value().clone());
            return Some(payload);
        };

        let mut changed = false;
        let mut compare =
            |slot: &mut Option<Option<String>>, mine: &Option<String>, theirs: &Option<String>| {
                if mine != theirs {
                    *slot = Some(mine.clone());
                    changed = true;
                }
            };
        compare(
            &mut payload.second_parent_id,
            &self.lineage.second_parent_id,
            &parent.lineage.second_parent_id,
        );
        compare(
            &mut payload.current_id,
            &self.lineage.current_id,
            &parent.lineage.current_id,
        );
        compare(&mut payload.report_id, &self.report_id, &parent.report_id);
        compare(&mut payload.archived_at, &self.archived_at, &parent.archived_at);

        if self.predictions != parent.predictions {
            payload.predictions = serde_json::to_value(&self.predictions).ok();
            changed = true;
        }

        let patch = diff(&parent.data, &self.data);
        if !patch.is_empty() {
            payload.base_digest = Some(parent.data.digest());
            payload.data_patch = Some(patch);
            changed = true;
        }

        if !changed {
            return None;
        }
        tracing::debug!(
            id = %self.lineage.id,
            kind = %self.kind,
            has_patch = payload.data_patch.is_some(),
            "Computed record changes"
        );
        Some(payload)
    }
}
