//! Enum Resolver
//!
//! Per data source, maps textual status/category values to the integer codes stored in
//! the database. Definitions come from an external document of shape
//! `{ "Field": [{ "text": "...", "code": 1 }, ...] }`, are cached in memory keyed by
//! data source, and are only replaced by an explicit (re)load. A reload swaps the whole
//! map at once, so readers never see a half-loaded definition.

use crate::error::{NlSqlError, Result};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

lazy_static! {
    /// `<column> = 'text'`, `<column> != 'text'`, `<column> <> N'text'`
    static ref EQUALITY_RE: Regex = Regex::new(
        r#"(?i)(?P<col>(?:[\["]?\w+[\]"]?\.)*[\["]?(?P<field>\w+)[\]"]?)\s*(?P<op>=|!=|<>)\s*N?'(?P<text>(?:[^']|'')*)'"#
    ).unwrap();

    /// `<column> IN (...)` and `<column> NOT IN (...)`
    static ref IN_LIST_RE: Regex = Regex::new(
        r#"(?i)(?P<col>(?:[\["]?\w+[\]"]?\.)*[\["]?(?P<field>\w+)[\]"]?)\s+(?P<not>NOT\s+)?IN\s*\((?P<list>[^()]*)\)"#
    ).unwrap();

    static ref QUOTED_RE: Regex = Regex::new(r"^N?'((?:[^']|'')*)'$").unwrap();
}

/// One text/code pair of an enum field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub text: String,
    pub code: i64,
}

/// External definition: field name -> ordered values
pub type EnumDefinition = BTreeMap<String, Vec<EnumValue>>;

#[derive(Debug, Clone)]
pub struct EnumField {
    /// Field name as written in the definition
    pub name: String,
    pub values: Vec<EnumValue>,
    by_text: HashMap<String, i64>,
}

impl EnumField {
    pub fn code_of(&self, text: &str) -> Option<i64> {
        self.by_text.get(&normalize_text(text)).copied()
    }
}

/// All enum fields of one data source
#[derive(Debug, Clone, Default)]
pub struct EnumMap {
    fields: HashMap<String, EnumField>,
}

impl EnumMap {
    pub fn from_definition(definition: &EnumDefinition) -> Result<Self> {
        let mut fields = HashMap::new();
        for (name, values) in definition {
            let mut by_text = HashMap::new();
            for value in values {
                let key = normalize_text(&value.text);
                if key.is_empty() {
                    return Err(NlSqlError::EnumDefinition(format!(
                        "Empty text for code {} in field '{}'",
                        value.code, name
                    )));
                }
                if let Some(existing) = by_text.insert(key, value.code) {
                    if existing != value.code {
                        return Err(NlSqlError::EnumDefinition(format!(
                            "Field '{}' maps '{}' to both {} and {}",
                            name, value.text, existing, value.code
                        )));
                    }
                }
            }
            fields.insert(
                name.to_lowercase(),
                EnumField {
                    name: name.clone(),
                    values: values.clone(),
                    by_text,
                },
            );
        }
        Ok(Self { fields })
    }

    pub fn field(&self, name: &str) -> Option<&EnumField> {
        self.fields.get(&name.to_lowercase())
    }

    pub fn fields(&self) -> impl Iterator<Item = &EnumField> {
        self.fields.values()
    }

    pub fn value_of(&self, field: &str, text: &str) -> Option<i64> {
        self.field(field)?.code_of(text)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Enum text found in a tokenized prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMention {
    pub field: String,
    pub text: String,
    pub code: i64,
    /// Index of the first token of the mention
    pub position: usize,
    /// Number of tokens covered
    pub span: usize,
}

#[derive(Default)]
pub struct EnumResolver {
    maps: DashMap<String, Arc<EnumMap>>,
}

impl EnumResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or reload) the definition for a data source, replacing any previous map.
    pub fn load(&self, definition: &EnumDefinition, data_source_id: &str) -> Result<()> {
        let map = EnumMap::from_definition(definition)?;
        info!(
            "Loaded {} enum fields for data source '{}'",
            map.len(),
            data_source_id
        );
        self.maps.insert(data_source_id.to_string(), Arc::new(map));
        Ok(())
    }

    pub fn load_json(&self, content: &str, data_source_id: &str) -> Result<()> {
        let definition: EnumDefinition = serde_json::from_str(content)
            .map_err(|e| NlSqlError::EnumDefinition(format!("Failed to parse enum definition: {}", e)))?;
        self.load(&definition, data_source_id)
    }

    pub fn load_file(&self, path: impl AsRef<Path>, data_source_id: &str) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NlSqlError::EnumDefinition(format!("Failed to read {}: {}", path.display(), e)))?;
        self.load_json(&content, data_source_id)
    }

    /// Drop the cached map for a data source.
    pub fn invalidate(&self, data_source_id: &str) -> bool {
        self.maps.remove(data_source_id).is_some()
    }

    pub fn is_loaded(&self, data_source_id: &str) -> bool {
        self.maps.contains_key(data_source_id)
    }

    /// Snapshot of the current map; stays valid across a concurrent reload.
    pub fn map(&self, data_source_id: &str) -> Option<Arc<EnumMap>> {
        self.maps.get(data_source_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Case-insensitive text -> code lookup. Unknown text is `None`, never a default.
    pub fn value_of(&self, data_source_id: &str, field: &str, text: &str) -> Option<i64> {
        self.map(data_source_id)?.value_of(field, text)
    }

    /// Enum texts appearing in `tokens`, longest match first at each position.
    pub fn find_mentions(&self, data_source_id: &str, tokens: &[String]) -> Vec<EnumMention> {
        let Some(map) = self.map(data_source_id) else {
            return Vec::new();
        };

        let mut candidates: Vec<(&EnumField, &EnumValue, Vec<String>)> = Vec::new();
        for field in map.fields() {
            for value in &field.values {
                let words: Vec<String> = normalize_text(&value.text)
                    .split(' ')
                    .map(str::to_string)
                    .collect();
                candidates.push((field, value, words));
            }
        }
        candidates.sort_by(|a, b| b.2.len().cmp(&a.2.len()));

        let mut mentions = Vec::new();
        let mut position = 0;
        while position < tokens.len() {
            let mut matched_span = 0;
            for (field, value, words) in &candidates {
                if words.is_empty() || position + words.len() > tokens.len() {
                    continue;
                }
                if matched_span > 0 && words.len() < matched_span {
                    break;
                }
                let window = &tokens[position..position + words.len()];
                if window.iter().zip(words).all(|(t, w)| t.to_lowercase() == *w) {
                    matched_span = words.len();
                    mentions.push(EnumMention {
                        field: field.name.clone(),
                        text: value.text.clone(),
                        code: value.code,
                        position,
                        span: words.len(),
                    });
                }
            }
            position += matched_span.max(1);
        }
        mentions
    }

    /// Rewrite quoted enum text in `=`, `!=`, `<>` and `IN (...)` predicates against
    /// known enum fields to integer codes. Unknown fields or texts are left untouched,
    /// so the rewrite is idempotent.
    pub fn translate(&self, data_source_id: &str, sql: &str) -> String {
        let Some(map) = self.map(data_source_id) else {
            return sql.to_string();
        };
        let mut replaced = 0usize;

        let sql = EQUALITY_RE.replace_all(sql, |caps: &Captures| {
            let code = map.value_of(&caps["field"], &unescape(&caps["text"]));
            match code {
                Some(code) => {
                    replaced += 1;
                    format!("{} {} {}", &caps["col"], &caps["op"], code)
                }
                None => caps[0].to_string(),
            }
        });

        let sql = IN_LIST_RE.replace_all(&sql, |caps: &Captures| {
            let Some(field) = map.field(&caps["field"]) else {
                return caps[0].to_string();
            };
            let mut changed = false;
            let items: Vec<String> = caps["list"]
                .split(',')
                .map(|item| {
                    let item = item.trim();
                    let code = QUOTED_RE
                        .captures(item)
                        .and_then(|quoted| field.code_of(&unescape(&quoted[1])));
                    match code {
                        Some(code) => {
                            changed = true;
                            code.to_string()
                        }
                        None => item.to_string(),
                    }
                })
                .collect();
            if !changed {
                return caps[0].to_string();
            }
            replaced += 1;
            let not = caps.name("not").map(|_| "NOT ").unwrap_or("");
            format!("{} {}IN ({})", &caps["col"], not, items.join(", "))
        });

        if replaced > 0 {
            debug!("Translated {} enum predicates for '{}'", replaced, data_source_id);
        }
        sql.into_owned()
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn unescape(text: &str) -> String {
    text.replace("''", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> EnumResolver {
        let resolver = EnumResolver::new();
        resolver
            .load_json(
                r#"{
                    "Status": [
                        {"text": "Pending", "code": 1},
                        {"text": "Approved", "code": 2},
                        {"text": "Rejected", "code": 5},
                        {"text": "In Review", "code": 7}
                    ],
                    "Kind": [{"text": "transfer", "code": 3}]
                }"#,
                "sis",
            )
            .unwrap();
        resolver
    }

    #[test]
    fn test_value_of_case_insensitive() {
        let resolver = resolver();
        assert_eq!(resolver.value_of("sis", "status", "REJECTED"), Some(5));
        assert_eq!(resolver.value_of("sis", "Status", "in   review"), Some(7));
        assert_eq!(resolver.value_of("sis", "Status", "archived"), None);
        assert_eq!(resolver.value_of("other", "Status", "rejected"), None);
    }

    #[test]
    fn test_reload_replaces_map() {
        let resolver = resolver();
        let old = resolver.map("sis").unwrap();
        resolver
            .load_json(r#"{"Status": [{"text": "rejected", "code": 9}]}"#, "sis")
            .unwrap();
        assert_eq!(resolver.value_of("sis", "Status", "rejected"), Some(9));
        assert_eq!(resolver.value_of("sis", "Status", "approved"), None);
        assert_eq!(old.value_of("Status", "approved"), Some(2));
    }

    #[test]
    fn test_conflicting_definition_rejected() {
        let resolver = EnumResolver::new();
        let result = resolver.load_json(
            r#"{"Status": [{"text": "open", "code": 1}, {"text": "OPEN", "code": 2}]}"#,
            "x",
        );
        assert!(matches!(result, Err(NlSqlError::EnumDefinition(_))));
        assert!(!resolver.is_loaded("x"));
    }

    #[test]
    fn test_translate_equality_and_in_lists() {
        let resolver = resolver();
        let sql = "SELECT * FROM [Applications] WHERE [Applications].[Status] = 'rejected' \
                   AND a.Kind <> N'Transfer' AND Status IN ('pending', 'approved', 99)";
        let translated = resolver.translate("sis", sql);
        assert_eq!(
            translated,
            "SELECT * FROM [Applications] WHERE [Applications].[Status] = 5 \
             AND a.Kind <> 3 AND Status IN (1, 2, 99)"
        );
    }

    #[test]
    fn test_translate_is_idempotent() {
        let resolver = resolver();
        let sql = "SELECT COUNT(*) FROM Applications WHERE Status != 'approved' AND Notes = 'rejected' \
                   AND Status NOT IN ('in review', 'unknown')";
        let once = resolver.translate("sis", sql);
        let twice = resolver.translate("sis", &once);
        assert_eq!(once, twice);
        assert!(once.contains("Status != 2"));
        assert!(once.contains("Notes = 'rejected'"));
        assert!(once.contains("Status NOT IN (7, 'unknown')"));
    }

    #[test]
    fn test_translate_without_enum_text_is_noop() {
        let resolver = resolver();
        let sql = "SELECT Name FROM Students WHERE Id = 4";
        assert_eq!(resolver.translate("sis", sql), sql);
        assert_eq!(resolver.translate("unknown", "x = 'rejected'"), "x = 'rejected'");
    }

    #[test]
    fn test_find_mentions_multi_word_first() {
        let resolver = resolver();
        let tokens: Vec<String> = ["applications", "in", "review", "or", "rejected"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mentions = resolver.find_mentions("sis", &tokens);
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].code, 7);
        assert_eq!(mentions[0].span, 2);
        assert_eq!(mentions[1].text, "Rejected");
        assert_eq!(mentions[1].position, 4);
    }
}
