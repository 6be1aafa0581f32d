use crate::inflection::split_identifier;
use std::collections::BTreeSet;
use strsim::normalized_damerau_levenshtein;

/// Fuzzy matcher for schema identifiers
///
/// Scores a natural-language term against an identifier with four similarity
/// measures on a 0-100 scale and keeps the best one:
/// - character ratio
/// - partial (best substring window) ratio, boosted when one string contains the other
/// - token-sort ratio
/// - token-set ratio
///
/// A shared Soundex code counts as a flat phonetic score.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    /// Added to the partial ratio when one string contains the other
    pub containment_bonus: f64,
    /// Score awarded when both strings share a Soundex code
    pub phonetic_score: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            containment_bonus: 20.0,
            phonetic_score: 85.0,
        }
    }
}

/// Individual measures behind an effective score
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyScore {
    pub ratio: f64,
    pub partial_ratio: f64,
    pub token_sort_ratio: f64,
    pub token_set_ratio: f64,
    pub phonetic_match: bool,
    /// Max of the measures including bonuses, capped at 100
    pub effective: f64,
}

impl FuzzyMatcher {
    /// Lowercase alphanumeric form with separators and quoting removed.
    /// `[dbo].[Student_Cars]` -> `studentcars`
    pub fn compact(&self, s: &str) -> String {
        split_identifier(s).concat()
    }

    /// Sorted, space-joined words. `CarsStudent` -> `cars student`
    fn tokens(&self, s: &str) -> Vec<String> {
        split_identifier(s)
    }

    /// Character-level similarity (0-100)
    pub fn ratio(&self, a: &str, b: &str) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        normalized_damerau_levenshtein(a, b) * 100.0
    }

    /// Best ratio of the shorter string against every equal-length window of the longer one
    pub fn partial_ratio(&self, a: &str, b: &str) -> f64 {
        let a_chars: Vec<char> = a.chars().collect();
        let b_chars: Vec<char> = b.chars().collect();
        let (short, long) = if a_chars.len() <= b_chars.len() {
            (a_chars, b_chars)
        } else {
            (b_chars, a_chars)
        };
        if short.is_empty() {
            return 0.0;
        }
        let short: String = short.into_iter().collect();
        let window = short.chars().count();
        (0..=long.len() - window)
            .map(|start| {
                let slice: String = long[start..start + window].iter().collect();
                self.ratio(&short, &slice)
            })
            .fold(0.0, f64::max)
    }

    pub fn token_sort_ratio(&self, a: &str, b: &str) -> f64 {
        let mut ta = self.tokens(a);
        let mut tb = self.tokens(b);
        ta.sort();
        tb.sort();
        self.ratio(&ta.join(" "), &tb.join(" "))
    }

    /// Compares the shared tokens against each side's full token set;
    /// a strict subset scores 100.
    pub fn token_set_ratio(&self, a: &str, b: &str) -> f64 {
        let ta: BTreeSet<String> = self.tokens(a).into_iter().collect();
        let tb: BTreeSet<String> = self.tokens(b).into_iter().collect();
        if ta.is_empty() || tb.is_empty() {
            return 0.0;
        }
        let join = |set: Vec<&String>| set.into_iter().cloned().collect::<Vec<_>>().join(" ");
        let intersection = join(ta.intersection(&tb).collect());
        let only_a = join(ta.difference(&tb).collect());
        let only_b = join(tb.difference(&ta).collect());

        let combined_a = format!("{} {}", intersection, only_a).trim().to_string();
        let combined_b = format!("{} {}", intersection, only_b).trim().to_string();

        let mut best = self.ratio(&combined_a, &combined_b);
        if !intersection.is_empty() {
            best = best
                .max(self.ratio(&intersection, &combined_a))
                .max(self.ratio(&intersection, &combined_b));
        }
        best
    }

    /// Score `term` against `candidate` (both compared case-insensitively).
    pub fn score(&self, term: &str, candidate: &str) -> FuzzyScore {
        let a = self.compact(term);
        let b = self.compact(candidate);

        let ratio = self.ratio(&a, &b);
        let mut partial_ratio = self.partial_ratio(&a, &b);
        if !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a)) {
            partial_ratio += self.containment_bonus;
        }
        let token_sort_ratio = self.token_sort_ratio(term, candidate);
        let token_set_ratio = self.token_set_ratio(term, candidate);
        let phonetic_match = {
            let code = soundex(&a);
            !code.is_empty() && code == soundex(&b)
        };
        let phonetic = if phonetic_match { self.phonetic_score } else { 0.0 };

        let effective = [ratio, partial_ratio, token_sort_ratio, token_set_ratio, phonetic]
            .into_iter()
            .fold(0.0, f64::max)
            .min(100.0);

        FuzzyScore {
            ratio,
            partial_ratio,
            token_sort_ratio,
            token_set_ratio,
            phonetic_match,
            effective,
        }
    }
}

/// American Soundex: first letter kept, consonants mapped to digit classes,
/// adjacent duplicates collapsed (H/W do not separate, vowels do), padded to 4.
pub fn soundex(input: &str) -> String {
    let letters: Vec<char> = input
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let Some(&first) = letters.first() else {
        return String::new();
    };

    let mut code = String::with_capacity(4);
    code.push(first);
    let mut last = soundex_digit(first);
    for &c in &letters[1..] {
        match soundex_digit(c) {
            Some(digit) => {
                if Some(digit) != last {
                    code.push(digit);
                    if code.len() == 4 {
                        break;
                    }
                }
                last = Some(digit);
            }
            None if c == 'H' || c == 'W' => {}
            None => last = None,
        }
    }
    while code.len() < 4 {
        code.push('0');
    }
    code
}

fn soundex_digit(c: char) -> Option<char> {
    match c {
        'B' | 'F' | 'P' | 'V' => Some('1'),
        'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => Some('2'),
        'D' | 'T' => Some('3'),
        'L' => Some('4'),
        'M' | 'N' => Some('5'),
        'R' => Some('6'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soundex() {
        assert_eq!(soundex("Robert"), "R163");
        assert_eq!(soundex("Rupert"), "R163");
        assert_eq!(soundex("Ashcraft"), "A261");
        assert_eq!(soundex("Tymczak"), "T522");
        assert_eq!(soundex("Lee"), "L000");
        assert_eq!(soundex(""), "");
        assert_eq!(soundex("123"), "");
    }

    #[test]
    fn test_ratio_bounds() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.ratio("student", "student"), 100.0);
        assert_eq!(matcher.ratio("", "student"), 0.0);
        assert!(matcher.ratio("studnet", "student") > 80.0);
    }

    #[test]
    fn test_partial_ratio_with_containment_bonus() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.partial_ratio("car", "studentcars"), 100.0);

        let score = matcher.score("archive", "customer_archive");
        assert_eq!(score.effective, 100.0);
        assert!(score.partial_ratio > 100.0);
    }

    #[test]
    fn test_token_ratios_ignore_order() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.token_sort_ratio("car student", "StudentCar"), 100.0);
        assert_eq!(matcher.token_set_ratio("name", "first_name"), 100.0);
    }

    #[test]
    fn test_phonetic_match_scores_flat() {
        let matcher = FuzzyMatcher::default();
        let score = matcher.score("robert", "rupert");
        assert!(score.phonetic_match);
        assert!(score.effective >= 85.0);
    }

    #[test]
    fn test_unrelated_strings_score_low() {
        let matcher = FuzzyMatcher::default();
        let score = matcher.score("asdkjasdj", "Students");
        assert!(!score.phonetic_match);
        assert!(score.effective < 60.0, "score was {}", score.effective);
    }
}
