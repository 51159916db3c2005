//! Record version storage.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbError, DbResult};
use crate::document::Document;
use crate::lineage::{Lineage, Record, RecordStore, Report};
use crate::models::RecordKind;
use crate::provenance::ProvenanceTracker;

const RECORD_COLUMNS: &str = "r.id, r.canonical_id, r.current_id, r.parent_id, r.second_parent_id, \
     r.kind, r.report_id, r.archived_at, r.data, r.predictions, r.created_at, r.updated_at";

const UPSERT_RECORD: &str = r#"
    INSERT INTO records (
        id, canonical_id, current_id, parent_id, second_parent_id,
        kind, report_id, archived_at, data, predictions, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
    ON CONFLICT(id) DO UPDATE SET
        current_id = excluded.current_id,
        archived_at = excluded.archived_at,
        data = excluded.data,
        predictions = excluded.predictions,
        updated_at = excluded.updated_at
"#;

impl Database {
    fn upsert_record(&self, record: &Record) -> DbResult<()> {
        let data_json = serde_json::to_string(record.data.as_value())?;
        let predictions_json = serde_json::to_string(&record.predictions)?;

        self.conn.execute(
            UPSERT_RECORD,
            params![
                record.lineage.id,
                record.lineage.canonical_id,
                record.lineage.current_id,
                record.lineage.parent_id,
                record.lineage.second_parent_id,
                record.kind.as_str(),
                record.report_id,
                record.archived_at,
                data_json,
                predictions_json,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn query_records(&self, sql: &str, param: &str) -> DbResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([param], RecordRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    /// Every version of a logical record, oldest first.
    pub fn versions_of(&self, canonical_id: &str) -> DbResult<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records r \
                 WHERE r.canonical_id = ?1 ORDER BY r.created_at, r.rowid"
            ),
            canonical_id,
        )
    }

    /// Versions of a logical record that no other version names as a parent.
    ///
    /// More than one head means the lineage has diverged and is waiting on a
    /// merge; choosing between heads is left to the caller.
    pub fn lineage_heads(&self, canonical_id: &str) -> DbResult<Vec<Record>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records r \
                 WHERE r.canonical_id = ?1 \
                 AND NOT EXISTS ( \
                     SELECT 1 FROM records c \
                     WHERE c.parent_id = r.id OR c.second_parent_id = r.id \
                 ) \
                 ORDER BY r.created_at, r.rowid"
            ),
            canonical_id,
        )
    }

    /// Record the authoritative version for a lineage on every stored version.
    pub fn set_current_version(&self, canonical_id: &str, current_id: &str) -> DbResult<()> {
        let updated = self.conn.execute(
            "UPDATE records SET current_id = ?2 WHERE canonical_id = ?1",
            params![canonical_id, current_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(canonical_id.to_string()));
        }
        Ok(())
    }
}

impl RecordStore for Database {
    type Error = DbError;

    fn load(&self, id: &str) -> DbResult<Option<Record>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.id = ?1"),
                [id],
                RecordRow::from_row,
            )
            .optional()?;

        row.map(|row| row.try_into()).transpose()
    }

    fn save(&self, record: &Record) -> DbResult<()> {
        self.upsert_record(record)?;
        tracing::debug!(id = %record.lineage.id, kind = %record.kind, "Saved record");
        Ok(())
    }

    fn save_report(&self, report: &Report) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        for record in report.records() {
            self.upsert_record(record)?;
        }
        tx.execute(
            "DELETE FROM report_sections WHERE report_version_id = ?1",
            [report.id()],
        )?;
        for (position, section) in report.sections().iter().enumerate() {
            tx.execute(
                "INSERT INTO report_sections (report_version_id, record_id, position) VALUES (?1, ?2, ?3)",
                params![report.id(), section.id(), position as i64],
            )?;
        }

        tx.commit()?;
        tracing::debug!(
            id = %report.id(),
            sections = report.sections().len(),
            "Saved report"
        );
        Ok(())
    }

    fn load_report(&self, id: &str) -> DbResult<Option<Report>> {
        let Some(record) = self.load(id)? else {
            return Ok(None);
        };
        if record.kind != RecordKind::Report {
            return Err(DbError::Invalid(format!("{id} is a {} record", record.kind)));
        }

        let sections = self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM report_sections s \
                 JOIN records r ON r.id = s.record_id \
                 WHERE s.report_version_id = ?1 ORDER BY s.position"
            ),
            id,
        )?;
        Ok(Some(Report::from_parts(record, sections)))
    }
}

/// Intermediate struct for database row mapping.
struct RecordRow {
    id: String,
    canonical_id: String,
    current_id: Option<String>,
    parent_id: Option<String>,
    second_parent_id: Option<String>,
    kind: String,
    report_id: Option<String>,
    archived_at: Option<String>,
    data: String,
    predictions: String,
    created_at: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            canonical_id: row.get(1)?,
            current_id: row.get(2)?,
            parent_id: row.get(3)?,
            second_parent_id: row.get(4)?,
            kind: row.get(5)?,
            report_id: row.get(6)?,
            archived_at: row.get(7)?,
            data: row.get(8)?,
            predictions: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let kind: RecordKind = row.kind.parse().map_err(DbError::Invalid)?;
        let data = Document::from_value(serde_json::from_str(&row.data)?)
            .map_err(|e| DbError::Invalid(e.to_string()))?;
        let predictions: ProvenanceTracker = serde_json::from_str(&row.predictions)?;

        Ok(Record {
            lineage: Lineage {
                id: row.id,
                canonical_id: row.canonical_id,
                current_id: row.current_id,
                parent_id: row.parent_id,
                second_parent_id: row.second_parent_id,
            },
            kind,
            report_id: row.report_id,
            archived_at: row.archived_at,
            data,
            predictions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Field, ValueCell};

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_save_and_load_record() {
        let db = setup_db();
        let mut record = Record::new(RecordKind::Vital);
        record
            .set_scalar(&Field::VitalsHeartRate.path(), &ValueCell::text("72"), false)
            .unwrap();

        db.save(&record).unwrap();
        assert_eq!(db.load(record.id()).unwrap(), Some(record));
        assert_eq!(db.load("missing").unwrap(), None);
    }

    #[test]
    fn test_save_report_and_reload() {
        let db = setup_db();
        let mut report = Report::new();
        report.set_field(Field::PatientAge, ValueCell::text("61")).unwrap();
        report.set_field(Field::VitalsPulseOximetry, ValueCell::text("94")).unwrap();

        db.save_report(&report).unwrap();
        let loaded = db.load_report(report.id()).unwrap().unwrap();
        assert_eq!(loaded, report);
    }

    #[test]
    fn test_load_report_rejects_section_id() {
        let db = setup_db();
        let mut report = Report::new();
        report.set_field(Field::PatientAge, ValueCell::text("61")).unwrap();
        db.save_report(&report).unwrap();

        let section_id = report.sections()[0].id().to_string();
        assert!(matches!(db.load_report(&section_id), Err(DbError::Invalid(_))));
    }

    #[test]
    fn test_versions_and_heads() {
        let db = setup_db();
        let v1 = Record::new(RecordKind::Situation);
        let v2 = v1.new_version();
        let v3 = v1.new_version();
        for record in [&v1, &v2, &v3] {
            db.save(record).unwrap();
        }

        let versions = db.versions_of(v1.canonical_id()).unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].id(), v1.id());

        // Diverged: two heads
        let heads: Vec<String> = db
            .lineage_heads(v1.canonical_id())
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(heads.len(), 2);
        assert!(heads.contains(&v2.id().to_string()));
        assert!(heads.contains(&v3.id().to_string()));

        // Merge back to a single head
        let merged = Record::merge(&v2, &v3);
        db.save(&merged).unwrap();
        let heads = db.lineage_heads(v1.canonical_id()).unwrap();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].id(), merged.id());
    }

    #[test]
    fn test_set_current_version() {
        let db = setup_db();
        let v1 = Record::new(RecordKind::Time);
        let v2 = v1.new_version();
        db.save(&v1).unwrap();
        db.save(&v2).unwrap();

        db.set_current_version(v1.canonical_id(), v2.id()).unwrap();
        let loaded = db.load(v1.id()).unwrap().unwrap();
        assert_eq!(loaded.lineage.current_id.as_deref(), Some(v2.id()));

        assert!(matches!(
            db.set_current_version("nope", v2.id()),
            Err(DbError::NotFound(_))
        ));
    }
}
