//! Value words: prompt tokens that name a value rather than a table.
//!
//! Enum text and place names are both value references; one dispatch pass over the
//! tokens tags each as one or the other so that later stages handle them uniformly.

use crate::enum_resolver::{EnumMention, EnumResolver};
use crate::gazetteer::{Gazetteer, PlaceMention};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueReference {
    EnumText(EnumMention),
    Location(PlaceMention),
}

impl ValueReference {
    pub fn position(&self) -> usize {
        match self {
            ValueReference::EnumText(m) => m.position,
            ValueReference::Location(m) => m.position,
        }
    }

    pub fn span(&self) -> usize {
        match self {
            ValueReference::EnumText(m) => m.span,
            ValueReference::Location(m) => m.span,
        }
    }

    pub fn covers(&self, position: usize) -> bool {
        position >= self.position() && position < self.position() + self.span()
    }
}

/// Tag every value word in `tokens`. Enum text wins where both lookups match the
/// same tokens, since the data source's own definitions are more specific than the
/// general place list.
pub fn classify_value_words(
    tokens: &[String],
    enums: &EnumResolver,
    gazetteer: &Gazetteer,
    data_source_id: &str,
) -> Vec<ValueReference> {
    let mut references: Vec<ValueReference> = enums
        .find_mentions(data_source_id, tokens)
        .into_iter()
        .map(ValueReference::EnumText)
        .collect();

    for place in gazetteer.find_mentions(tokens) {
        let overlaps = references.iter().any(|r| {
            (place.position..place.position + place.span).any(|p| r.covers(p))
        });
        if !overlaps {
            references.push(ValueReference::Location(place));
        }
    }

    references.sort_by_key(|r| r.position());
    references
}
