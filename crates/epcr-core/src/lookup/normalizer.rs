//! Term normalizer for code list matching.
//!
//! Handles:
//! - Case folding and punctuation stripping
//! - Spoken alias expansion (zofran→ondansetron, narcan→naloxone)
//! - Light lemmatization of English plurals (pains→pain, allergies→allergy)

use std::collections::HashMap;
use std::sync::LazyLock;

static DEFAULT_NORMALIZER: LazyLock<TermNormalizer> = LazyLock::new(TermNormalizer::new);

/// Normalize `text` with the default alias table.
pub fn normalize_search_text(text: &str) -> String {
    DEFAULT_NORMALIZER.normalize(text)
}

/// Normalizer shared by stored search text and incoming queries.
#[derive(Debug, Clone)]
pub struct TermNormalizer {
    /// Single-token aliases: spoken → canonical
    aliases: HashMap<String, String>,
    /// Whole-phrase aliases, checked before token expansion
    phrases: HashMap<String, String>,
}

impl Default for TermNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TermNormalizer {
    /// Create a normalizer with the default alias tables.
    pub fn new() -> Self {
        Self {
            aliases: Self::default_aliases(),
            phrases: Self::default_phrases(),
        }
    }

    /// Lower-case, strip punctuation, expand aliases, lemmatize.
    pub fn normalize(&self, text: &str) -> String {
        let cleaned = tokenize(text).join(" ");
        let expanded = match self.phrases.get(&cleaned) {
            Some(canonical) => canonical.clone(),
            None => tokenize(&cleaned)
                .into_iter()
                .map(|token| self.aliases.get(&token).cloned().unwrap_or(token))
                .collect::<Vec<_>>()
                .join(" "),
        };

        tokenize(&expanded)
            .iter()
            .map(|token| lemmatize(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Expand a single spoken alias to its canonical name.
    pub fn expand_alias(&self, name: &str) -> String {
        let lower = name.to_lowercase();
        self.aliases.get(&lower).cloned().unwrap_or(lower)
    }

    /// Add a custom token alias.
    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(alias.to_lowercase(), canonical.to_lowercase());
    }

    /// Add a custom phrase alias.
    pub fn add_phrase(&mut self, phrase: &str, canonical: &str) {
        self.phrases
            .insert(tokenize(phrase).join(" "), canonical.to_lowercase());
    }

    /// Default medication and shorthand aliases.
    fn default_aliases() -> HashMap<String, String> {
        let mut map = HashMap::new();

        // Cardiac
        map.insert("nitro".into(), "nitroglycerin".into());
        map.insert("ntg".into(), "nitroglycerin".into());
        map.insert("asa".into(), "aspirin".into());
        map.insert("adenocard".into(), "adenosine".into());
        map.insert("cardizem".into(), "diltiazem".into());
        map.insert("epi".into(), "epinephrine".into());
        map.insert("lasix".into(), "furosemide".into());

        // Respiratory
        map.insert("proventil".into(), "albuterol".into());
        map.insert("ventolin".into(), "albuterol".into());
        map.insert("atrovent".into(), "ipratropium".into());
        map.insert("duoneb".into(), "albuterol ipratropium".into());
        map.insert("o2".into(), "oxygen".into());

        // Overdose, glucose
        map.insert("narcan".into(), "naloxone".into());
        map.insert("d50".into(), "dextrose".into());
        map.insert("d10".into(), "dextrose".into());
        map.insert("glucagen".into(), "glucagon".into());

        // Nausea, pain, allergy
        map.insert("zofran".into(), "ondansetron".into());
        map.insert("toradol".into(), "ketorolac".into());
        map.insert("tylenol".into(), "acetaminophen".into());
        map.insert("motrin".into(), "ibuprofen".into());
        map.insert("advil".into(), "ibuprofen".into());
        map.insert("benadryl".into(), "diphenhydramine".into());
        map.insert("solumedrol".into(), "methylprednisolone".into());

        // Sedation, seizures
        map.insert("versed".into(), "midazolam".into());
        map.insert("ativan".into(), "lorazepam".into());
        map.insert("valium".into(), "diazepam".into());
        map.insert("ketalar".into(), "ketamine".into());

        // Clinical shorthand
        map.insert("sob".into(), "shortness of breath".into());
        map.insert("cp".into(), "chest pain".into());
        map.insert("loc".into(), "loss of consciousness".into());
        map.insert("n/v".into(), "nausea vomiting".into());

        map
    }

    /// Default phrase aliases.
    fn default_phrases() -> HashMap<String, String> {
        let mut map = HashMap::new();

        map.insert("short of breath".into(), "shortness of breath".into());
        map.insert("difficulty breathing".into(), "shortness of breath".into());
        map.insert("passed out".into(), "syncope".into());
        map.insert("fainted".into(), "syncope".into());
        map.insert("throwing up".into(), "vomiting".into());
        map.insert("low blood sugar".into(), "hypoglycemia".into());
        map.insert("bag valve mask".into(), "bvm ventilation".into());

        map
    }
}

/// Lower-cased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '/'))
        .map(|t| t.trim_matches('/'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strip common English plural endings.
fn lemmatize(token: &str) -> String {
    if token.len() > 4 && token.ends_with("ies") {
        return format!("{}y", &token[..token.len() - 3]);
    }
    if token.len() > 4
        && ["sses", "xes", "ches", "shes"]
            .iter()
            .any(|suffix| token.ends_with(suffix))
    {
        return token[..token.len() - 2].to_string();
    }
    if token.len() > 3
        && token.ends_with('s')
        && !["ss", "us", "is"].iter().any(|suffix| token.ends_with(suffix))
    {
        return token[..token.len() - 1].to_string();
    }
    token.to_string()
}
