//! SQLite schema definition.

/// Complete database schema for the ePCR store.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Versioned records
-- ============================================================================

-- One row per record version. Rows are never deleted: the lineage DAG is
-- reconstructed from parent_id / second_parent_id.
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    canonical_id TEXT NOT NULL,
    current_id TEXT,
    parent_id TEXT,
    second_parent_id TEXT,
    kind TEXT NOT NULL,
    report_id TEXT,                              -- canonical id of the owning report
    archived_at TEXT,
    data TEXT NOT NULL DEFAULT '{}',             -- JSON document
    predictions TEXT NOT NULL DEFAULT '{}',      -- JSON prediction side map
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_canonical_id ON records(canonical_id);
CREATE INDEX IF NOT EXISTS idx_records_parent_id ON records(parent_id);
CREATE INDEX IF NOT EXISTS idx_records_second_parent_id ON records(second_parent_id);
CREATE INDEX IF NOT EXISTS idx_records_report_id ON records(report_id);

-- Which section versions make up a report version
CREATE TABLE IF NOT EXISTS report_sections (
    report_version_id TEXT NOT NULL REFERENCES records(id),
    record_id TEXT NOT NULL REFERENCES records(id),
    position INTEGER NOT NULL,
    PRIMARY KEY (report_version_id, record_id)
);

-- ============================================================================
-- Code lists
-- ============================================================================

CREATE TABLE IF NOT EXISTS code_lists (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    fields TEXT NOT NULL DEFAULT '[]',           -- JSON array of element tags
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS code_list_items (
    list_id TEXT NOT NULL REFERENCES code_lists(id) ON DELETE CASCADE,
    code TEXT NOT NULL,
    system TEXT NOT NULL,
    section TEXT,
    name TEXT NOT NULL,
    normalized_search_text TEXT NOT NULL,
    PRIMARY KEY (list_id, code)
);

-- FTS5 virtual table for term search
CREATE VIRTUAL TABLE IF NOT EXISTS code_list_items_fts USING fts5(
    normalized_search_text,
    content='code_list_items',
    content_rowid='rowid'
);

-- Triggers to keep FTS5 in sync with main table
CREATE TRIGGER IF NOT EXISTS code_list_items_ai AFTER INSERT ON code_list_items BEGIN
    INSERT INTO code_list_items_fts(rowid, normalized_search_text)
    VALUES (new.rowid, new.normalized_search_text);
END;

CREATE TRIGGER IF NOT EXISTS code_list_items_ad AFTER DELETE ON code_list_items BEGIN
    INSERT INTO code_list_items_fts(code_list_items_fts, rowid, normalized_search_text)
    VALUES ('delete', old.rowid, old.normalized_search_text);
END;

CREATE TRIGGER IF NOT EXISTS code_list_items_au AFTER UPDATE ON code_list_items BEGIN
    INSERT INTO code_list_items_fts(code_list_items_fts, rowid, normalized_search_text)
    VALUES ('delete', old.rowid, old.normalized_search_text);
    INSERT INTO code_list_items_fts(rowid, normalized_search_text)
    VALUES (new.rowid, new.normalized_search_text);
END;
"#;
