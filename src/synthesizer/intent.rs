//! Intent classification
//!
//! Keyword rules over the lowercase prompt tokens:
//! - COUNT: "how many", "count", "number of"
//! - EXISTENCE: "is there", "are there", "exist(s)"
//! - AGGREGATE: average/mean, sum/total, min/lowest, max/highest
//! - LIST: show, list, display, get, find, give, fetch, return
//! - otherwise SELECT with the default row limit
//!
//! Modifiers picked up on the same pass: explicit row counts ("top 5", "first ten"),
//! grouping nouns ("by city", "per school"), sort nouns ("sorted by name"),
//! HAVING thresholds ("more than 3"), negation and presence words.

use crate::schema_resolver::is_stop_word;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFn {
    Avg,
    Sum,
    Min,
    Max,
}

impl AggregateFn {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFn::Avg => "AVG",
            AggregateFn::Sum => "SUM",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    Count,
    List,
    Aggregate(AggregateFn),
    Exists,
    Select,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Count => "count",
            Intent::List => "list",
            Intent::Aggregate(_) => "aggregate",
            Intent::Exists => "exists",
            Intent::Select => "select",
        }
    }

    /// Row-returning intents get the default row limit.
    pub fn returns_rows(&self) -> bool {
        matches!(self, Intent::List | Intent::Select)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ordinal {
    Top,
    First,
    Last,
}

/// "top 5", "first ten", "last 3"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitLimit {
    pub count: u32,
    pub ordinal: Ordinal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HavingOp {
    GreaterThan,
    AtLeast,
    LessThan,
    AtMost,
}

impl HavingOp {
    pub fn sql(&self) -> &'static str {
        match self {
            HavingOp::GreaterThan => ">",
            HavingOp::AtLeast => ">=",
            HavingOp::LessThan => "<",
            HavingOp::AtMost => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HavingThreshold {
    pub op: HavingOp,
    pub value: u64,
}

/// A noun following "by", "per" or "each", with its token position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierTerm {
    pub term: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub intent: Intent,
    pub limit: Option<ExplicitLimit>,
    pub group_terms: Vec<ModifierTerm>,
    pub order_term: Option<ModifierTerm>,
    /// Some(true) for descending, Some(false) for ascending, None when unstated
    pub descending: Option<bool>,
    pub having: Option<HavingThreshold>,
    negations: Vec<usize>,
    presences: Vec<usize>,
}

impl IntentAnalysis {
    /// True when a negation word precedes `position` by at most two tokens.
    pub fn is_negated(&self, position: usize) -> bool {
        self.negations
            .iter()
            .any(|&n| n < position && position - n <= 2)
    }

    /// True for "with X", "has X", "have X" (directly or one word apart).
    pub fn is_presence(&self, position: usize) -> bool {
        self.presences
            .iter()
            .any(|&p| p < position && position - p <= 2)
    }

    /// Positions of the modifier nouns, excluded from table resolution.
    pub fn modifier_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.group_terms
            .iter()
            .map(|t| t.position)
            .chain(self.order_term.iter().map(|t| t.position))
    }
}

const LIST_WORDS: &[&str] = &["show", "list", "display", "get", "find", "give", "fetch", "return"];
const NEGATION_WORDS: &[&str] = &["not", "no", "non", "without", "missing", "lacking", "never", "excluding", "except"];
const PRESENCE_WORDS: &[&str] = &["with", "has", "have", "having"];
const GROUP_WORDS: &[&str] = &["by", "per", "each"];
const SORT_WORDS: &[&str] = &["sorted", "ordered", "order", "sort"];

/// Classify tokens produced by `schema_resolver::tokenize`.
pub fn classify(tokens: &[String]) -> IntentAnalysis {
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let has = |w: &str| words.contains(&w);
    let has_pair = |a: &str, b: &str| words.windows(2).any(|pair| pair[0] == a && pair[1] == b);

    let limit = explicit_limit(&words);

    let intent = if has_pair("how", "many") || has("count") || has_pair("number", "of") {
        Intent::Count
    } else if has_pair("is", "there") || has_pair("are", "there") || has("exist") || has("exists") {
        Intent::Exists
    } else if let Some(function) = aggregate_function(&words, limit.is_some()) {
        Intent::Aggregate(function)
    } else if words.iter().any(|w| LIST_WORDS.contains(w)) {
        Intent::List
    } else {
        Intent::Select
    };

    let mut group_terms = Vec::new();
    let mut order_term = None;
    for (i, word) in words.iter().enumerate() {
        if !GROUP_WORDS.contains(word) {
            continue;
        }
        let Some(term) = next_noun(&words, i + 1) else {
            continue;
        };
        let after_sort_word = i > 0 && SORT_WORDS.contains(&words[i - 1]);
        if after_sort_word || !matches!(intent, Intent::Count | Intent::Aggregate(_)) {
            if order_term.is_none() && *word == "by" {
                order_term = Some(term);
            }
        } else if !group_terms.contains(&term) {
            group_terms.push(term);
        }
    }

    let descending = if has("descending") || has("desc") {
        Some(true)
    } else if has("ascending") || has("asc") {
        Some(false)
    } else if has("highest") || has("largest") || has("most") {
        Some(true)
    } else if has("lowest") || has("smallest") || (has("least") && !has_pair("at", "least")) {
        Some(false)
    } else {
        None
    };

    IntentAnalysis {
        intent,
        limit,
        group_terms,
        order_term,
        descending,
        having: having_threshold(&words),
        negations: positions_of(&words, NEGATION_WORDS),
        presences: positions_of(&words, PRESENCE_WORDS),
    }
}

fn aggregate_function(words: &[&str], has_limit: bool) -> Option<AggregateFn> {
    words.iter().find_map(|w| match *w {
        "average" | "avg" | "mean" => Some(AggregateFn::Avg),
        "sum" | "total" => Some(AggregateFn::Sum),
        "min" | "minimum" => Some(AggregateFn::Min),
        "max" | "maximum" => Some(AggregateFn::Max),
        "lowest" | "smallest" if !has_limit => Some(AggregateFn::Min),
        "highest" | "largest" if !has_limit => Some(AggregateFn::Max),
        _ => None,
    })
}

fn explicit_limit(words: &[&str]) -> Option<ExplicitLimit> {
    words.windows(2).find_map(|pair| {
        let ordinal = match pair[0] {
            "top" => Ordinal::Top,
            "first" => Ordinal::First,
            "last" => Ordinal::Last,
            _ => return None,
        };
        let count = parse_count(pair[1])?;
        (count > 0).then(|| ExplicitLimit {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            ordinal,
        })
    })
}

fn having_threshold(words: &[&str]) -> Option<HavingThreshold> {
    words.windows(3).find_map(|w| {
        let op = match (w[0], w[1]) {
            ("more", "than") | ("greater", "than") => HavingOp::GreaterThan,
            ("at", "least") => HavingOp::AtLeast,
            ("fewer", "than") | ("less", "than") => HavingOp::LessThan,
            ("at", "most") => HavingOp::AtMost,
            _ => return None,
        };
        let value = parse_count(w[2])?;
        Some(HavingThreshold { op, value })
    })
}

fn parse_count(word: &str) -> Option<u64> {
    if let Ok(n) = word.parse::<u64>() {
        return Some(n);
    }
    let n = match word {
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "twenty" => 20,
        "fifty" => 50,
        "hundred" => 100,
        _ => return None,
    };
    Some(n)
}

/// First token at or after `start` (within two words) that can name something.
fn next_noun(words: &[&str], start: usize) -> Option<ModifierTerm> {
    words
        .iter()
        .enumerate()
        .skip(start)
        .take(2)
        .find(|(_, w)| w.chars().count() > 2 && !is_stop_word(w) && parse_count(w).is_none())
        .map(|(position, w)| ModifierTerm {
            term: w.to_string(),
            position,
        })
}

fn positions_of(words: &[&str], set: &[&str]) -> Vec<usize> {
    words
        .iter()
        .enumerate()
        .filter(|(_, w)| set.contains(w))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_resolver::tokenize;

    fn analyze(prompt: &str) -> IntentAnalysis {
        classify(&tokenize(prompt))
    }

    #[test]
    fn test_intent_keywords() {
        assert_eq!(analyze("How many students are there?").intent, Intent::Count);
        assert_eq!(analyze("count city").intent, Intent::Count);
        assert_eq!(analyze("number of applications").intent, Intent::Count);
        assert_eq!(analyze("are there any students from Ponce").intent, Intent::Exists);
        assert_eq!(
            analyze("average age of students").intent,
            Intent::Aggregate(AggregateFn::Avg)
        );
        assert_eq!(
            analyze("highest payment amount").intent,
            Intent::Aggregate(AggregateFn::Max)
        );
        assert_eq!(analyze("list students").intent, Intent::List);
        assert_eq!(analyze("students from Bayamón").intent, Intent::Select);
    }

    #[test]
    fn test_explicit_limit_and_ordering() {
        let analysis = analyze("show top 5 students by score");
        assert_eq!(
            analysis.limit,
            Some(ExplicitLimit {
                count: 5,
                ordinal: Ordinal::Top
            })
        );
        assert_eq!(analysis.intent, Intent::List);
        assert_eq!(analysis.order_term.as_ref().map(|t| t.term.as_str()), Some("score"));
        assert!(analysis.group_terms.is_empty());

        let analysis = analyze("last ten applications");
        assert_eq!(analysis.limit.unwrap().count, 10);
        assert_eq!(analysis.limit.unwrap().ordinal, Ordinal::Last);

        let analysis = analyze("top 3 highest payments");
        assert_eq!(analysis.intent, Intent::Select);
        assert_eq!(analysis.descending, Some(true));
    }

    #[test]
    fn test_oversized_limit_saturates() {
        assert_eq!(analyze("top 4294967296 students").limit.unwrap().count, u32::MAX);
        assert_eq!(analyze("top 4294967301 students").limit.unwrap().count, u32::MAX);
        assert_eq!(analyze("top 0 students").limit, None);
    }

    #[test]
    fn test_grouping_and_having() {
        let analysis = analyze("count students per city having more than 3");
        assert_eq!(analysis.group_terms.len(), 1);
        assert_eq!(analysis.group_terms[0].term, "city");
        assert_eq!(analysis.group_terms[0].position, 3);
        assert_eq!(
            analysis.having,
            Some(HavingThreshold {
                op: HavingOp::GreaterThan,
                value: 3
            })
        );

        let analysis = analyze("count students by school with at least 10");
        assert_eq!(analysis.having.unwrap().op, HavingOp::AtLeast);
        assert_eq!(analysis.descending, None);
    }

    #[test]
    fn test_negation_and_presence_positions() {
        let analysis = analyze("students without applications");
        assert!(analysis.is_negated(2));
        assert!(!analysis.is_negated(0));

        let analysis = analyze("applications not yet approved");
        assert!(analysis.is_negated(3));

        let analysis = analyze("students with email");
        assert!(analysis.is_presence(2));
        assert!(!analysis.is_negated(2));
    }
}
