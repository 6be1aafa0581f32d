//! Fuzzy Schema Resolver
//!
//! Maps a noisy natural-language noun to a real table or column identifier.
//!
//! Stages, first one that produces a match wins:
//! 1. Exact: case-insensitive, plural-insensitive equality -> confidence 100
//! 2. Corrected: the vocabulary's canonical term for a misspelling/synonym is contained
//!    in the candidate (or names the candidate's irregular identifier) -> confidence 95
//! 3. Fuzzy: best of the `FuzzyMatcher` measures, accepted at or above the threshold
//!
//! Within the winning stage, table candidates scoring within the preference margin of
//! the best are ordered data-bearing first, then by score, then shorter name first.
//! A legacy empty table next to a populated one with a near-identical name would
//! otherwise produce a valid but empty answer.

use crate::config::EngineConfig;
use crate::fuzzy_matcher::FuzzyMatcher;
use crate::inflection::{bare_identifier, singular_key, singularize};
use crate::metadata::{SchemaSnapshot, TableInfo};
use crate::vocabulary::VocabularyStore;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"[\p{L}\p{N}_]+").unwrap();

    /// SQL keywords and query phrasing that never name a table.
    static ref STOP_WORDS: HashSet<&'static str> = [
        "select", "from", "where", "join", "inner", "left", "right", "outer", "full", "group",
        "order", "by", "having", "limit", "top", "distinct", "count", "sum", "avg", "min", "max",
        "and", "or", "not", "null", "is", "in", "like", "between", "as", "on", "asc", "desc",
        "union", "all", "case", "when", "then", "else", "end", "exists", "insert", "update",
        "delete", "into", "values", "set", "with", "without", "show", "list", "display", "get",
        "find", "give", "fetch", "return", "how", "many", "much", "number", "total", "average",
        "mean", "minimum", "maximum", "highest", "lowest", "largest", "smallest", "first", "last",
        "the", "for", "each", "per", "are", "there", "any", "that", "who", "which", "what",
        "their", "have", "has", "had", "them", "those", "these", "whose", "all", "was", "were",
        "been", "being", "does", "did", "more", "less", "than", "least", "most", "fewer",
        "sorted", "ordered", "descending", "ascending", "please", "only", "also", "some",
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    Table,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    Exact,
    Corrected,
    Fuzzy,
    /// Multi-word phrase matched against an identifier's words
    Phrase,
}

/// An identifier the resolver may choose
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub identifier: String,
    pub has_data: bool,
}

impl Candidate {
    pub fn new(identifier: impl Into<String>, has_data: bool) -> Self {
        Self {
            identifier: identifier.into(),
            has_data,
        }
    }
}

/// Result of resolving one term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub identifier: String,
    /// 0-100
    pub confidence: f64,
    pub has_data: bool,
    pub match_kind: MatchKind,
}

pub struct SchemaResolver {
    vocabulary: Arc<VocabularyStore>,
    matcher: FuzzyMatcher,
    preference_margin: f64,
    match_threshold: f64,
    compound_window: usize,
}

impl SchemaResolver {
    pub fn new(vocabulary: Arc<VocabularyStore>, config: &EngineConfig) -> Self {
        Self {
            vocabulary,
            matcher: FuzzyMatcher::default(),
            preference_margin: config.data_preference_margin,
            match_threshold: config.match_threshold,
            compound_window: config.compound_window,
        }
    }

    pub fn vocabulary(&self) -> &VocabularyStore {
        &self.vocabulary
    }

    /// Best candidate for `term`, or `None` when nothing clears `threshold`.
    pub fn resolve(
        &self,
        term: &str,
        candidates: &[Candidate],
        kind: ReferenceKind,
        threshold: f64,
    ) -> Option<ResolvedReference> {
        self.rank(term, candidates, kind, threshold).into_iter().next()
    }

    /// Single best-match lookup at the configured default threshold.
    pub fn resolve_default(&self, term: &str, candidates: &[Candidate], kind: ReferenceKind) -> Option<ResolvedReference> {
        self.resolve(term, candidates, kind, self.match_threshold)
    }

    /// All accepted candidates of the winning stage, best first.
    ///
    /// When every exact or corrected table match is empty, populated fuzzy matches join
    /// the ranking so the preference band can still pick a table with rows.
    pub fn rank(
        &self,
        term: &str,
        candidates: &[Candidate],
        kind: ReferenceKind,
        threshold: f64,
    ) -> Vec<ResolvedReference> {
        let term = term.trim();
        if term.is_empty() || candidates.is_empty() {
            return Vec::new();
        }

        let mut staged = self.exact_matches(term, candidates);
        if staged.is_empty() {
            staged = self.corrected_matches(term, candidates);
        }
        if !staged.is_empty() {
            if kind == ReferenceKind::Table && staged.iter().all(|m| !m.has_data) {
                let populated: Vec<ResolvedReference> = self
                    .fuzzy_matches(term, candidates, threshold)
                    .into_iter()
                    .filter(|f| f.has_data && !staged.iter().any(|m| m.identifier == f.identifier))
                    .collect();
                if !populated.is_empty() {
                    debug!(
                        "'{}' names only empty tables; weighing {} populated fuzzy matches",
                        term,
                        populated.len()
                    );
                    staged.extend(populated);
                }
            }
            return self.order(staged, kind);
        }

        let fuzzy = self.fuzzy_matches(term, candidates, threshold);
        if fuzzy.is_empty() {
            debug!("No {:?} match for '{}' at threshold {}", kind, term, threshold);
        }
        self.order(fuzzy, kind)
    }

    fn fuzzy_matches(&self, term: &str, candidates: &[Candidate], threshold: f64) -> Vec<ResolvedReference> {
        candidates
            .iter()
            .filter_map(|candidate| {
                let score = self.matcher.score(term, bare_identifier(&candidate.identifier));
                (score.effective >= threshold).then(|| ResolvedReference {
                    identifier: candidate.identifier.clone(),
                    confidence: score.effective,
                    has_data: candidate.has_data,
                    match_kind: MatchKind::Fuzzy,
                })
            })
            .collect()
    }

    fn exact_matches(&self, term: &str, candidates: &[Candidate]) -> Vec<ResolvedReference> {
        let term_key = singular_key(term);
        candidates
            .iter()
            .filter(|c| {
                let bare = bare_identifier(&c.identifier);
                bare.eq_ignore_ascii_case(term)
                    || c.identifier.eq_ignore_ascii_case(term)
                    || (!term_key.is_empty() && singular_key(bare) == term_key)
            })
            .map(|c| ResolvedReference {
                identifier: c.identifier.clone(),
                confidence: 100.0,
                has_data: c.has_data,
                match_kind: MatchKind::Exact,
            })
            .collect()
    }

    fn corrected_matches(&self, term: &str, candidates: &[Candidate]) -> Vec<ResolvedReference> {
        let corrected = self.vocabulary.correct(term).map(str::to_string);
        let term_singular = singularize(term);
        candidates
            .iter()
            .filter(|c| {
                let compact = self.matcher.compact(&c.identifier);
                let by_correction = corrected
                    .as_deref()
                    .map(|canonical| compact.contains(&self.matcher.compact(canonical)))
                    .unwrap_or(false);
                let by_irregular = self
                    .vocabulary
                    .canonical_for_identifier(&c.identifier)
                    .map(|canonical| {
                        canonical == term_singular || corrected.as_deref() == Some(canonical)
                    })
                    .unwrap_or(false);
                by_correction || by_irregular
            })
            .map(|c| ResolvedReference {
                identifier: c.identifier.clone(),
                confidence: 95.0,
                has_data: c.has_data,
                match_kind: MatchKind::Corrected,
            })
            .collect()
    }

    /// Order one stage's matches: the preference band first, the rest by score.
    fn order(&self, mut matches: Vec<ResolvedReference>, kind: ReferenceKind) -> Vec<ResolvedReference> {
        let best = matches.iter().map(|m| m.confidence).fold(0.0, f64::max);
        let floor = best - self.preference_margin;

        matches.sort_by(|a, b| {
            let a_band = a.confidence >= floor;
            let b_band = b.confidence >= floor;
            b_band
                .cmp(&a_band)
                .then_with(|| match (kind, a_band && b_band) {
                    (ReferenceKind::Table, true) => b.has_data.cmp(&a.has_data),
                    _ => Ordering::Equal,
                })
                .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
                .then_with(|| a.identifier.len().cmp(&b.identifier.len()))
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        matches
    }

    pub fn table_candidates(schema: &SchemaSnapshot) -> Vec<Candidate> {
        schema
            .tables()
            .map(|t| Candidate::new(t.name.clone(), t.has_data()))
            .collect()
    }

    pub fn column_candidates(table: &TableInfo) -> Vec<Candidate> {
        table
            .columns
            .iter()
            .map(|c| Candidate::new(c.name.clone(), table.has_data()))
            .collect()
    }

    pub fn resolve_table(&self, term: &str, schema: &SchemaSnapshot, threshold: f64) -> Option<ResolvedReference> {
        self.resolve(term, &Self::table_candidates(schema), ReferenceKind::Table, threshold)
    }

    pub fn resolve_column(&self, term: &str, table: &TableInfo, threshold: f64) -> Option<ResolvedReference> {
        self.resolve(term, &Self::column_candidates(table), ReferenceKind::Column, threshold)
    }

    /// Nouns of a prompt that may name tables, in prompt order.
    ///
    /// Stop words, numbers and tokens of two characters or fewer are dropped. When two
    /// nouns of a vocabulary compound appear within the compound window, the compound
    /// token is appended after the plain terms.
    pub fn extract_candidate_terms(&self, prompt: &str) -> Vec<String> {
        let tokens = tokenize(prompt);
        let mut terms: Vec<String> = tokens
            .iter()
            .filter(|t| is_candidate_noun(t))
            .cloned()
            .collect();

        for (i, first) in tokens.iter().enumerate() {
            if !is_candidate_noun(first) {
                continue;
            }
            let end = (i + self.compound_window).min(tokens.len() - 1);
            for second in &tokens[i + 1..=end] {
                if let Some(compound) = self.vocabulary.compound_for(first, second) {
                    terms.push(compound.to_string());
                }
            }
        }

        terms.into_iter().unique().collect()
    }
}

/// Lowercase word tokens, accents and underscores preserved.
pub fn tokenize(prompt: &str) -> Vec<String> {
    WORD_RE
        .find_iter(prompt)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(token)
}

fn is_candidate_noun(token: &str) -> bool {
    token.chars().count() > 2 && !is_stop_word(token) && !token.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SchemaResolver {
        SchemaResolver::new(Arc::new(VocabularyStore::with_defaults()), &EngineConfig::default())
    }

    fn candidates(items: &[(&str, bool)]) -> Vec<Candidate> {
        items.iter().map(|(name, data)| Candidate::new(*name, *data)).collect()
    }

    #[test]
    fn test_exact_match_is_confidence_100() {
        let resolver = resolver();
        let cands = candidates(&[("Students", true), ("Applications", true)]);
        for term in ["students", "STUDENTS", "Students"] {
            let resolved = resolver.resolve(term, &cands, ReferenceKind::Table, 70.0).unwrap();
            assert_eq!(resolved.identifier, "Students");
            assert_eq!(resolved.confidence, 100.0);
            assert_eq!(resolved.match_kind, MatchKind::Exact);
        }
    }

    #[test]
    fn test_populated_table_preferred_over_empty() {
        let resolver = resolver();
        let cands = candidates(&[("city", false), ("cities", true)]);
        let resolved = resolver.resolve("city", &cands, ReferenceKind::Table, 60.0).unwrap();
        assert_eq!(resolved.identifier, "cities");
        assert!(resolved.has_data);
    }

    #[test]
    fn test_empty_exact_match_yields_to_populated_fuzzy_match() {
        let resolver = resolver();
        for (empty, populated, term) in [
            ("customer", "customer_data", "customer"),
            ("student", "student_v2", "student"),
            ("Orders", "OrdersCurrent", "orders"),
        ] {
            let cands = candidates(&[(empty, false), (populated, true)]);
            let resolved = resolver
                .resolve_default(term, &cands, ReferenceKind::Table)
                .unwrap();
            assert_eq!(resolved.identifier, populated, "term '{}'", term);
            assert!(resolved.has_data);
        }

        // a populated exact match keeps its place
        let cands = candidates(&[("customer", true), ("customer_data", true)]);
        let resolved = resolver.resolve_default("customer", &cands, ReferenceKind::Table).unwrap();
        assert_eq!(resolved.identifier, "customer");
        assert_eq!(resolved.match_kind, MatchKind::Exact);

        // columns carry no data signal across stages
        let cands = candidates(&[("customer", false), ("customer_data", true)]);
        let resolved = resolver.resolve_default("customer", &cands, ReferenceKind::Column).unwrap();
        assert_eq!(resolved.identifier, "customer");
    }

    #[test]
    fn test_fuzzy_band_prefers_data_then_shorter() {
        let resolver = resolver();
        let cands = candidates(&[("customer_archive", false), ("customer_archives", true)]);
        let resolved = resolver.resolve("custarchive", &cands, ReferenceKind::Table, 60.0).unwrap();
        assert_eq!(resolved.identifier, "customer_archives");

        let cands = candidates(&[("customer_archive", true), ("customer_archives", true)]);
        let resolved = resolver.resolve("customerarchiv", &cands, ReferenceKind::Table, 60.0).unwrap();
        assert_eq!(resolved.identifier, "customer_archive");
    }

    #[test]
    fn test_misspelling_correction_stage() {
        let resolver = resolver();
        let cands = candidates(&[("Students", true), ("Teachers", true)]);
        let resolved = resolver.resolve("studnets", &cands, ReferenceKind::Table, 70.0).unwrap();
        assert_eq!(resolved.identifier, "Students");
        assert_eq!(resolved.confidence, 95.0);
        assert_eq!(resolved.match_kind, MatchKind::Corrected);
    }

    #[test]
    fn test_irregular_identifier_is_corrected() {
        let schema = SchemaSnapshot::new(vec![
            TableInfo::new("Studnets").with_row_count(4),
            TableInfo::new("Courses").with_row_count(4),
        ])
        .unwrap();
        let mut vocab = VocabularyStore::with_defaults();
        vocab.learn_from_schema(&schema);
        let resolver = SchemaResolver::new(Arc::new(vocab), &EngineConfig::default());

        let resolved = resolver.resolve_table("students", &schema, 60.0).unwrap();
        assert_eq!(resolved.identifier, "Studnets");
        assert_eq!(resolved.confidence, 95.0);
    }

    #[test]
    fn test_below_threshold_is_not_found() {
        let resolver = resolver();
        let cands = candidates(&[("Students", true), ("Applications", true)]);
        assert!(resolver.resolve("asdkjasdj", &cands, ReferenceKind::Table, 60.0).is_none());
        assert!(resolver.resolve("", &cands, ReferenceKind::Table, 60.0).is_none());
    }

    #[test]
    fn test_column_resolution_ignores_data_preference() {
        let resolver = resolver();
        let table = TableInfo::new("Students")
            .with_column("Email", "nvarchar")
            .with_column("EmailVerified", "bit")
            .with_row_count(3);
        let resolved = resolver.resolve_column("email", &table, 70.0).unwrap();
        assert_eq!(resolved.identifier, "Email");
    }

    #[test]
    fn test_extract_candidate_terms() {
        let resolver = resolver();
        let terms = resolver.extract_candidate_terms("How many students have an application in 2024?");
        assert_eq!(terms, vec!["students", "application"]);
    }

    #[test]
    fn test_extract_candidate_terms_emits_compound() {
        let schema = SchemaSnapshot::new(vec![
            TableInfo::new("Students").with_row_count(3),
            TableInfo::new("Cars").with_row_count(3),
            TableInfo::new("StudentCars").with_row_count(3),
        ])
        .unwrap();
        let mut vocab = VocabularyStore::with_defaults();
        vocab.learn_from_schema(&schema);
        let resolver = SchemaResolver::new(Arc::new(vocab), &EngineConfig::default());

        let terms = resolver.extract_candidate_terms("list students with cars");
        assert_eq!(terms, vec!["students", "cars", "studentcar"]);
    }
}
