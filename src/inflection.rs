//! Identifier inflection helpers
//!
//! Singular/plural folding and identifier word splitting used when comparing prompt
//! nouns against table and column names (`city` vs `Cities`, `StudentCars` vs
//! `student car`).

use inflector::Inflector;

/// Irregular plurals that show up in schemas and that `inflector` gets wrong.
static IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("criterion", "criteria"),
    ("datum", "data"),
    ("medium", "media"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
    ("analysis", "analyses"),
    ("address", "addresses"),
];

/// Words that look plural but are not.
static INVARIANT: &[&str] = &["status", "news", "series", "species", "census", "campus", "bus", "gas"];

pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.is_empty() {
        return lower;
    }
    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *singular || lower == *plural {
            return plural.to_string();
        }
    }
    if INVARIANT.contains(&lower.as_str()) {
        return lower;
    }
    lower.to_plural()
}

pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.is_empty() {
        return lower;
    }
    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *plural || lower == *singular {
            return singular.to_string();
        }
    }
    if INVARIANT.contains(&lower.as_str()) || lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is") {
        return lower;
    }
    lower.to_singular()
}

/// Strip schema qualifiers and quoting: `[dbo].[Students]` -> `Students`.
pub fn bare_identifier(identifier: &str) -> &str {
    let last = identifier.rsplit('.').next().unwrap_or(identifier);
    last.trim_matches(|c| c == '[' || c == ']' || c == '"' || c == '`')
}

/// Split an identifier into lowercase words across snake_case, kebab-case,
/// whitespace and camelCase boundaries.
pub fn split_identifier(identifier: &str) -> Vec<String> {
    bare_identifier(identifier)
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .flat_map(|part| {
            part.to_snake_case()
                .split('_')
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Inflection-insensitive key: words concatenated with the last one singularized.
///
/// `Cities` -> `city`, `StudentCars` -> `studentcar`, `student_car` -> `studentcar`.
pub fn singular_key(identifier: &str) -> String {
    let mut words = split_identifier(identifier);
    if let Some(last) = words.pop() {
        words.push(singularize(&last));
    }
    words.concat()
}
