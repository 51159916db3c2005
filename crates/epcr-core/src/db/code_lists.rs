//! Code list storage and term search.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::lookup::{CodeLookup, LookupResult, LOOKUP_CANDIDATE_LIMIT};
use crate::models::{CodeList, CodeListItem};

impl Database {
    /// Insert or replace a code list and all of its items.
    pub fn upsert_code_list(&self, list: &CodeList) -> DbResult<()> {
        let fields_json = serde_json::to_string(&list.fields)?;
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO code_lists (id, name, fields, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                fields = excluded.fields,
                updated_at = datetime('now')
            "#,
            params![list.id, list.name, fields_json],
        )?;
        tx.execute("DELETE FROM code_list_items WHERE list_id = ?1", [&list.id])?;

        // Duplicate codes update in place so the FTS update trigger fires.
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO code_list_items (
                    list_id, code, system, section, name, normalized_search_text
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(list_id, code) DO UPDATE SET
                    system = excluded.system,
                    section = excluded.section,
                    name = excluded.name,
                    normalized_search_text = excluded.normalized_search_text
                "#,
            )?;
            for item in &list.items {
                let mut item = item.clone();
                item.ensure_search_text();
                stmt.execute(params![
                    list.id,
                    item.code,
                    item.system,
                    item.section,
                    item.name,
                    item.normalized_search_text,
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(list = %list.id, items = list.items.len(), "Imported code list");
        Ok(())
    }

    /// Get a code list with its items.
    pub fn get_code_list(&self, id: &str) -> DbResult<Option<CodeList>> {
        let header = self
            .conn
            .query_row(
                "SELECT id, name, fields FROM code_lists WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, fields)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT list_id, section, system, code, name, normalized_search_text
            FROM code_list_items
            WHERE list_id = ?1
            ORDER BY code
            "#,
        )?;
        let items = stmt
            .query_map([&id], |row| {
                Ok(CodeListItem {
                    list: row.get(0)?,
                    section: row.get(1)?,
                    system: row.get(2)?,
                    code: row.get(3)?,
                    name: row.get(4)?,
                    normalized_search_text: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(CodeList {
            id,
            name,
            fields: serde_json::from_str(&fields)?,
            items,
        }))
    }

    /// Search items of lists serving `field_tag` using FTS5 (BM25 ranking).
    pub fn search_code_items(
        &self,
        field_tag: &str,
        normalized_query: &str,
        limit: usize,
    ) -> DbResult<Vec<CodeListItem>> {
        let fts_query = escape_fts_query(normalized_query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT i.list_id, i.section, i.system, i.code, i.name, i.normalized_search_text,
                   bm25(code_list_items_fts) as rank
            FROM code_list_items i
            JOIN code_list_items_fts fts ON i.rowid = fts.rowid
            JOIN code_lists l ON l.id = i.list_id
            WHERE code_list_items_fts MATCH ?1
            AND EXISTS (SELECT 1 FROM json_each(l.fields) WHERE json_each.value = ?2)
            ORDER BY rank, i.code
            LIMIT ?3
            "#,
        )?;

        let items = stmt
            .query_map(params![fts_query, field_tag, limit as i64], |row| {
                Ok(CodeListItem {
                    list: row.get(0)?,
                    section: row.get(1)?,
                    system: row.get(2)?,
                    code: row.get(3)?,
                    name: row.get(4)?,
                    normalized_search_text: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

impl CodeLookup for Database {
    fn search(&self, field_tag: &str, normalized_query: &str) -> LookupResult<Vec<CodeListItem>> {
        Ok(self.search_code_items(field_tag, normalized_query, LOOKUP_CANDIDATE_LIMIT)?)
    }
}

/// Prefix-match any query word. FTS5 operators are stripped.
fn escape_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .map(|word| format!("{}*", word.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" OR ")
}
