//! External code lists (medications, procedures, symptoms, ...).

use serde::{Deserialize, Serialize};

use crate::lookup::normalize_search_text;

/// A named list of coded terms and the fields it applies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeList {
    /// Unique list ID
    pub id: String,
    /// Display name
    pub name: String,
    /// NEMSIS element tags this list serves (e.g. `eMedications.03`)
    pub fields: Vec<String>,
    /// Coded terms
    #[serde(default)]
    pub items: Vec<CodeListItem>,
}

impl CodeList {
    pub fn new(id: impl Into<String>, name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fields,
            items: Vec::new(),
        }
    }

    /// Add a term, computing its normalized search text.
    pub fn add_item(&mut self, system: &str, code: &str, name: &str) -> &mut Self {
        let item = CodeListItem::new(&self.id, system, code, name);
        self.items.push(item);
        self
    }

    pub fn serves(&self, field_tag: &str) -> bool {
        self.fields.iter().any(|f| f == field_tag)
    }
}

/// A coded term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodeListItem {
    /// Owning list ID
    pub list: String,
    /// Optional grouping within the list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Coding system (e.g. RxNorm, SNOMED, ICD-10-CM)
    pub system: String,
    pub code: String,
    pub name: String,
    /// Lower-cased, lemmatized text used for matching
    #[serde(default)]
    pub normalized_search_text: String,
}

impl CodeListItem {
    pub fn new(list: &str, system: &str, code: &str, name: &str) -> Self {
        Self {
            list: list.to_string(),
            section: None,
            system: system.to_string(),
            code: code.to_string(),
            name: name.to_string(),
            normalized_search_text: normalize_search_text(name),
        }
    }

    /// Fill in the search text if an import left it blank.
    pub fn ensure_search_text(&mut self) {
        if self.normalized_search_text.trim().is_empty() {
            self.normalized_search_text = normalize_search_text(&self.name);
        }
    }
}
