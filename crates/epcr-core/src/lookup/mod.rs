//! Free text to coded terminology.
//!
//! Pipeline: normalize query → backend search → score → best candidate

mod normalizer;

pub use normalizer::*;

use std::cmp::Ordering;

use strsim::{jaro_winkler, normalized_levenshtein};
use thiserror::Error;

use crate::models::{CodeList, CodeListItem};

/// Candidates below this score are discarded.
pub const MIN_MATCH_SCORE: f64 = 0.85;

/// Maximum candidates a backend returns per search.
pub const LOOKUP_CANDIDATE_LIMIT: usize = 20;

/// Score for a query found as a whole phrase inside a term.
const PHRASE_MATCH_SCORE: f64 = 0.9;

/// Lookup errors.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),
}

pub type LookupResult<T> = Result<T, LookupError>;

/// A source of coded terms for a clinical field.
pub trait CodeLookup {
    /// Terms from lists serving `field_tag` that plausibly match
    /// `normalized_query`, ordered by relevance then code.
    fn search(&self, field_tag: &str, normalized_query: &str) -> LookupResult<Vec<CodeListItem>>;
}

/// A scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCode {
    pub item: CodeListItem,
    pub score: f64,
}

/// Score a single term against a normalized query (0.0 - 1.0).
pub fn score_item(normalized_query: &str, item: &CodeListItem) -> f64 {
    let text = item.normalized_search_text.as_str();
    if text == normalized_query {
        return 1.0;
    }
    if contains_phrase(text, normalized_query) {
        return PHRASE_MATCH_SCORE;
    }
    fuzzy_match(normalized_query, text)
}

/// Pick the best candidate at or above [`MIN_MATCH_SCORE`]. Ties go to the
/// lexicographically lowest code.
pub fn best_candidate(normalized_query: &str, candidates: &[CodeListItem]) -> Option<ScoredCode> {
    let mut scored: Vec<ScoredCode> = candidates
        .iter()
        .map(|item| ScoredCode {
            score: score_item(normalized_query, item),
            item: item.clone(),
        })
        .filter(|c| c.score >= MIN_MATCH_SCORE)
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.code.cmp(&b.item.code))
    });
    scored.into_iter().next()
}

/// Calculate fuzzy match score between two strings.
fn fuzzy_match(a: &str, b: &str) -> f64 {
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}

/// True if `phrase` occurs in `text` on word boundaries.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    format!(" {text} ").contains(&format!(" {phrase} "))
}

/// True if some query token is a prefix of some term token.
fn shares_token(normalized_query: &str, text: &str) -> bool {
    normalized_query
        .split_whitespace()
        .any(|q| text.split_whitespace().any(|t| t.starts_with(q)))
}

/// Code lists held in memory and searched linearly.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCodeLookup {
    lists: Vec<CodeList>,
}

impl InMemoryCodeLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(mut self, list: CodeList) -> Self {
        self.add_list(list);
        self
    }

    /// Add a list, replacing any list with the same id.
    pub fn add_list(&mut self, mut list: CodeList) {
        list.items.iter_mut().for_each(CodeListItem::ensure_search_text);
        self.lists.retain(|l| l.id != list.id);
        self.lists.push(list);
    }
}

impl CodeLookup for InMemoryCodeLookup {
    fn search(&self, field_tag: &str, normalized_query: &str) -> LookupResult<Vec<CodeListItem>> {
        let mut items: Vec<CodeListItem> = self
            .lists
            .iter()
            .filter(|list| list.serves(field_tag))
            .flat_map(|list| list.items.iter())
            .filter(|item| shares_token(normalized_query, &item.normalized_search_text))
            .cloned()
            .collect();

        items.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.list.cmp(&b.list)));
        items.dedup_by(|a, b| a.code == b.code && a.list == b.list);
        items.truncate(LOOKUP_CANDIDATE_LIMIT);
        Ok(items)
    }
}
