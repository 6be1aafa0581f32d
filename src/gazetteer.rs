//! Gazetteer
//!
//! Known place names (cities, regions, states) recognised in prompts so that a
//! location becomes a predicate on a location column instead of a table reference.
//! Lookups are accent- and case-insensitive: `bayamon`, `Bayamón` and `BAYAMÓN`
//! name the same place.

use crate::error::{NlSqlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Puerto Rico municipalities, the built-in city list.
static DEFAULT_CITIES: &[&str] = &[
    "Adjuntas", "Aguada", "Aguadilla", "Aguas Buenas", "Aibonito", "Añasco", "Arecibo",
    "Arroyo", "Barceloneta", "Barranquitas", "Bayamón", "Cabo Rojo", "Caguas", "Camuy",
    "Canóvanas", "Carolina", "Cataño", "Cayey", "Ceiba", "Ciales", "Cidra", "Coamo",
    "Comerío", "Corozal", "Culebra", "Dorado", "Fajardo", "Florida", "Guánica", "Guayama",
    "Guayanilla", "Guaynabo", "Gurabo", "Hatillo", "Hormigueros", "Humacao", "Isabela",
    "Jayuya", "Juana Díaz", "Juncos", "Lajas", "Lares", "Las Marías", "Las Piedras", "Loíza",
    "Luquillo", "Manatí", "Maricao", "Maunabo", "Mayagüez", "Moca", "Morovis", "Naguabo",
    "Naranjito", "Orocovis", "Patillas", "Peñuelas", "Ponce", "Quebradillas", "Rincón",
    "Río Grande", "Sabana Grande", "Salinas", "San Germán", "San Juan", "San Lorenzo",
    "San Sebastián", "Santa Isabel", "Toa Alta", "Toa Baja", "Trujillo Alto", "Utuado",
    "Vega Alta", "Vega Baja", "Vieques", "Villalba", "Yabucoa", "Yauco",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    City,
    Region,
    State,
}

impl PlaceKind {
    /// Column words that hold a place of this kind, most specific first.
    pub fn column_words(&self) -> &'static [&'static str] {
        match self {
            PlaceKind::City => &["city", "town", "municipality", "municipio"],
            PlaceKind::Region => &["region", "area", "zone"],
            PlaceKind::State => &["state", "province"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub kind: PlaceKind,
}

/// A place recognised in a tokenized prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceMention {
    pub place: Place,
    pub position: usize,
    pub span: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    /// folded name -> place
    places: HashMap<String, Place>,
    max_words: usize,
}

impl Gazetteer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut gazetteer = Self::new();
        for name in DEFAULT_CITIES {
            gazetteer.add(Place {
                name: name.to_string(),
                kind: PlaceKind::City,
            });
        }
        gazetteer
    }

    /// Defaults extended with a JSON array of `{ "name": ..., "kind": "city" | "region" | "state" }`.
    pub fn from_json(content: &str) -> Result<Self> {
        let places: Vec<Place> = serde_json::from_str(content)
            .map_err(|e| NlSqlError::Config(format!("Failed to parse gazetteer: {}", e)))?;
        let mut gazetteer = Self::with_defaults();
        for place in places {
            gazetteer.add(place);
        }
        Ok(gazetteer)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NlSqlError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Later additions replace an earlier place with the same folded name.
    pub fn add(&mut self, place: Place) {
        let key = fold_accents(&place.name);
        if key.is_empty() {
            return;
        }
        self.max_words = self.max_words.max(key.split(' ').count());
        self.places.insert(key, place);
    }

    pub fn lookup(&self, name: &str) -> Option<&Place> {
        self.places.get(&fold_accents(name))
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// Places named in `tokens`, longest name first at each position.
    pub fn find_mentions(&self, tokens: &[String]) -> Vec<PlaceMention> {
        let mut mentions = Vec::new();
        let mut position = 0;
        while position < tokens.len() {
            let longest = self.max_words.min(tokens.len() - position);
            let found = (1..=longest).rev().find_map(|span| {
                let phrase = tokens[position..position + span].join(" ");
                self.lookup(&phrase).map(|place| (place.clone(), span))
            });
            match found {
                Some((place, span)) => {
                    debug!("Recognised place '{}' ({:?})", place.name, place.kind);
                    mentions.push(PlaceMention { place, position, span });
                    position += span;
                }
                None => position += 1,
            }
        }
        mentions
    }
}

/// Lowercase, accents stripped, whitespace collapsed. `Río  Grande` -> `rio grande`
pub fn fold_accents(text: &str) -> String {
    let stripped: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_fold_accents() {
        assert_eq!(fold_accents("Bayamón"), "bayamon");
        assert_eq!(fold_accents("MAYAGÜEZ"), "mayaguez");
        assert_eq!(fold_accents("Río   Grande"), "rio grande");
    }

    #[test]
    fn test_lookup_ignores_accents_and_case() {
        let gazetteer = Gazetteer::with_defaults();
        let place = gazetteer.lookup("bayamon").unwrap();
        assert_eq!(place.name, "Bayamón");
        assert_eq!(place.kind, PlaceKind::City);
        assert!(gazetteer.lookup("Springfield").is_none());
    }

    #[test]
    fn test_multi_word_mentions() {
        let gazetteer = Gazetteer::with_defaults();
        let mentions = gazetteer.find_mentions(&tokens(&["students", "from", "san", "juan", "or", "ponce"]));
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].place.name, "San Juan");
        assert_eq!(mentions[0].position, 2);
        assert_eq!(mentions[0].span, 2);
        assert_eq!(mentions[1].place.name, "Ponce");
    }

    #[test]
    fn test_from_json_adds_regions_and_states() {
        let gazetteer = Gazetteer::from_json(
            r#"[{"name": "Metro", "kind": "region"}, {"name": "Nueva York", "kind": "state"}]"#,
        )
        .unwrap();
        assert_eq!(gazetteer.lookup("metro").unwrap().kind, PlaceKind::Region);
        assert_eq!(gazetteer.lookup("nueva york").unwrap().kind, PlaceKind::State);
        assert!(gazetteer.lookup("Cataño").is_some());
        assert!(Gazetteer::from_json("{").is_err());
    }
}
