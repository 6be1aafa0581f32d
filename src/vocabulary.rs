//! Vocabulary Store
//!
//! Domain dictionaries consulted by the schema resolver and the synthesizer:
//! - misspellings and synonyms, each folded onto a canonical term
//! - irregular identifiers (a real table name containing a typo) mapped to a canonical term
//! - compound rules (two nouns that collapse to one table, `student` + `car`)
//! - column phrase aliases (`ssn` -> `social security number`)
//! - the status-word lexicon used to recognise enum text in prompts
//!
//! A store is built once (defaults plus an optional JSON document), extended by
//! `learn_from_schema`, and then shared read-only behind an `Arc`.

use crate::error::{NlSqlError, Result};
use crate::inflection::{singular_key, singularize, split_identifier};
use crate::metadata::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Canonical domain term with its known misspellings and synonyms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VocabularyEntry {
    pub canonical: String,
    #[serde(default)]
    pub misspellings: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// Two nouns that name one table when they appear close together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompoundRule {
    pub first: String,
    pub second: String,
    /// Token emitted in place of the pair, compared by `singular_key`
    pub compound: String,
}

/// JSON document shape accepted by `VocabularyStore::from_json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VocabularyDocument {
    #[serde(default)]
    pub entries: Vec<VocabularyEntry>,
    #[serde(default)]
    pub irregular_identifiers: HashMap<String, String>,
    #[serde(default)]
    pub compounds: Vec<CompoundRule>,
    #[serde(default)]
    pub column_phrases: HashMap<String, String>,
    #[serde(default)]
    pub status_words: Vec<String>,
}

static DEFAULT_ENTRIES: &[(&str, &[&str], &[&str])] = &[
    ("student", &["studnet", "stuent", "sutdent", "studen"], &["pupil", "learner"]),
    ("application", &["applicaton", "aplication", "appliction", "applcation"], &["submission"]),
    ("address", &["adress", "addres", "adresss"], &[]),
    ("vehicle", &["vehical", "vehicel", "vechicle", "vehicule"], &["automobile"]),
    ("customer", &["cusotmer", "custmer", "costumer", "customr"], &["client"]),
    ("employee", &["employe", "emplyee", "empolyee"], &["staff", "worker"]),
    ("teacher", &["teahcer", "techer"], &["instructor", "professor"]),
    ("email", &["emial", "emal", "emaill"], &[]),
    ("payment", &["payement", "paymnet", "paymet"], &[]),
    ("course", &["coruse", "cours", "corse"], &[]),
    ("school", &["scool", "shcool", "schol"], &[]),
    ("municipality", &["muncipality", "municipalty", "municipallity"], &["municipio"]),
    ("registration", &["regsitration", "registraton"], &["enrollment", "enrolment"]),
];

static DEFAULT_COLUMN_PHRASES: &[(&str, &str)] = &[
    ("ssn", "social security number"),
    ("social security", "social security number"),
    ("id number", "identification number"),
    ("dob", "date of birth"),
    ("birthday", "birth date"),
    ("e mail", "email"),
    ("telephone", "phone number"),
    ("phone", "phone number"),
    ("zip", "zip code"),
    ("postal code", "zip code"),
];

static DEFAULT_STATUS_WORDS: &[&str] = &[
    "pending", "approved", "rejected", "denied", "accepted", "active", "inactive", "cancelled",
    "canceled", "completed", "complete", "open", "closed", "draft", "submitted", "expired",
    "suspended", "enrolled", "withdrawn", "graduated", "paid", "unpaid", "overdue",
];

#[derive(Debug, Clone, Default)]
pub struct VocabularyStore {
    /// misspelling -> canonical
    misspellings: HashMap<String, String>,
    /// synonym -> canonical
    synonyms: HashMap<String, String>,
    /// lowercase bare identifier -> canonical
    irregular_identifiers: HashMap<String, String>,
    compounds: Vec<CompoundRule>,
    /// alias phrase -> canonical phrase
    column_phrases: HashMap<String, String>,
    status_words: HashSet<String>,
}

impl VocabularyStore {
    /// An empty store with no dictionaries.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in dictionaries.
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        for (canonical, misspellings, synonyms) in DEFAULT_ENTRIES {
            store.add_entry(&VocabularyEntry {
                canonical: canonical.to_string(),
                misspellings: misspellings.iter().map(|s| s.to_string()).collect(),
                synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            });
        }
        for (alias, phrase) in DEFAULT_COLUMN_PHRASES {
            store.column_phrases.insert(alias.to_string(), phrase.to_string());
        }
        store.status_words = DEFAULT_STATUS_WORDS.iter().map(|s| s.to_string()).collect();
        store
    }

    /// Defaults extended with a JSON vocabulary document.
    pub fn from_json(content: &str) -> Result<Self> {
        let doc: VocabularyDocument = serde_json::from_str(content)
            .map_err(|e| NlSqlError::Vocabulary(format!("Failed to parse vocabulary: {}", e)))?;
        let mut store = Self::with_defaults();
        store.merge(doc);
        Ok(store)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NlSqlError::Vocabulary(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn merge(&mut self, doc: VocabularyDocument) {
        for entry in &doc.entries {
            self.add_entry(entry);
        }
        for (identifier, canonical) in doc.irregular_identifiers {
            self.irregular_identifiers
                .insert(identifier.to_lowercase(), canonical.to_lowercase());
        }
        for rule in doc.compounds {
            self.add_compound(&rule.first, &rule.second, &rule.compound);
        }
        for (alias, phrase) in doc.column_phrases {
            self.column_phrases
                .insert(normalize_phrase(&alias), normalize_phrase(&phrase));
        }
        self.status_words
            .extend(doc.status_words.into_iter().map(|w| w.to_lowercase()));
    }

    pub fn add_entry(&mut self, entry: &VocabularyEntry) {
        let canonical = entry.canonical.to_lowercase();
        for misspelling in &entry.misspellings {
            self.misspellings.insert(misspelling.to_lowercase(), canonical.clone());
        }
        for synonym in &entry.synonyms {
            self.synonyms.insert(synonym.to_lowercase(), canonical.clone());
        }
    }

    pub fn add_compound(&mut self, first: &str, second: &str, compound: &str) {
        let rule = CompoundRule {
            first: singularize(first),
            second: singularize(second),
            compound: compound.to_lowercase(),
        };
        if !self.compounds.contains(&rule) {
            self.compounds.push(rule);
        }
    }

    /// Canonical term for a misspelled or synonymous word, if known.
    ///
    /// Misspellings win over synonyms; the singular form is tried after the literal one.
    pub fn correct(&self, term: &str) -> Option<&str> {
        let lower = term.to_lowercase();
        let singular = singularize(&lower);
        [&self.misspellings, &self.synonyms]
            .into_iter()
            .find_map(|table| table.get(&lower).or_else(|| table.get(&singular)))
            .map(String::as_str)
    }

    /// Canonical term for a schema identifier that carries an irregular spelling.
    pub fn canonical_for_identifier(&self, identifier: &str) -> Option<&str> {
        let key = crate::inflection::bare_identifier(identifier).to_lowercase();
        self.irregular_identifiers.get(&key).map(String::as_str)
    }

    pub fn compounds(&self) -> &[CompoundRule] {
        &self.compounds
    }

    /// Compound token for two nouns, order-sensitive, plural-insensitive.
    pub fn compound_for(&self, first: &str, second: &str) -> Option<&str> {
        let first = singularize(first);
        let second = singularize(second);
        self.compounds
            .iter()
            .find(|rule| rule.first == first && rule.second == second)
            .map(|rule| rule.compound.as_str())
    }

    /// Canonical phrase for a column alias (`ssn` -> `social security number`).
    pub fn expand_phrase(&self, phrase: &str) -> Option<&str> {
        self.column_phrases
            .get(&normalize_phrase(phrase))
            .map(String::as_str)
    }

    pub fn is_status_word(&self, word: &str) -> bool {
        self.status_words.contains(&word.to_lowercase())
    }

    /// Entries grouped by canonical term.
    pub fn entries(&self) -> Vec<VocabularyEntry> {
        let mut grouped: BTreeMap<&str, (BTreeSet<&str>, BTreeSet<&str>)> = BTreeMap::new();
        for (misspelling, canonical) in &self.misspellings {
            grouped.entry(canonical.as_str()).or_default().0.insert(misspelling.as_str());
        }
        for (synonym, canonical) in &self.synonyms {
            grouped.entry(canonical.as_str()).or_default().1.insert(synonym.as_str());
        }
        grouped
            .into_iter()
            .map(|(canonical, (misspellings, synonyms))| VocabularyEntry {
                canonical: canonical.to_string(),
                misspellings: misspellings.into_iter().map(str::to_string).collect(),
                synonyms: synonyms.into_iter().map(str::to_string).collect(),
            })
            .collect()
    }

    /// Extend the dictionaries from a schema snapshot.
    ///
    /// - identifiers whose words are known misspellings become irregular identifiers
    /// - identifiers made of several words become compound rules
    ///
    /// Returns the number of new entries.
    pub fn learn_from_schema(&mut self, schema: &SchemaSnapshot) -> usize {
        let mut learned = 0;
        for table in schema.tables() {
            let words = split_identifier(&table.name);
            if words.is_empty() {
                continue;
            }

            let mut corrected = false;
            let canonical_words: Vec<String> = words
                .iter()
                .map(|w| match self.correct_misspelling(w) {
                    Some(c) => {
                        corrected = true;
                        c.to_string()
                    }
                    None => w.clone(),
                })
                .collect();
            if corrected {
                let key = crate::inflection::bare_identifier(&table.name).to_lowercase();
                let canonical = singular_key(&canonical_words.join("_"));
                if self.irregular_identifiers.insert(key, canonical).is_none() {
                    learned += 1;
                }
            }

            if words.len() >= 2 {
                let compound = singular_key(&table.name);
                for split in 1..words.len() {
                    let first = words[..split].concat();
                    let second = words[split..].concat();
                    if first.len() < 3 || second.len() < 3 {
                        continue;
                    }
                    let before = self.compounds.len();
                    self.add_compound(&first, &second, &compound);
                    learned += self.compounds.len() - before;
                }
            }
        }
        debug!("Learned {} vocabulary entries from schema ({} tables)", learned, schema.len());
        learned
    }

    fn correct_misspelling(&self, word: &str) -> Option<&str> {
        let lower = word.to_lowercase();
        self.misspellings
            .get(&lower)
            .or_else(|| self.misspellings.get(&singularize(&lower)))
            .map(String::as_str)
    }
}

fn normalize_phrase(phrase: &str) -> String {
    phrase
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
