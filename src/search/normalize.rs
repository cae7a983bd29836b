//! Text canonicalization shared by the index and the query path.
//!
//! `normalize` is pure, total and idempotent:
//! 1. NFD decompose, drop combining marks ("Óleo" → "Oleo")
//! 2. Lowercase
//! 3. Collapse whitespace runs and trim

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

pub fn normalize(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spoken engine sizes in Brazilian Portuguese.
const PT_BR: &[(&str, &str)] = &[
    ("um ponto zero", "1.0"),
    ("um ponto dois", "1.2"),
    ("um ponto tres", "1.3"),
    ("um ponto quatro", "1.4"),
    ("um ponto cinco", "1.5"),
    ("um ponto seis", "1.6"),
    ("um ponto oito", "1.8"),
    ("dois ponto zero", "2.0"),
    ("dois ponto dois", "2.2"),
    ("tres ponto zero", "3.0"),
];

/// Localization table of spoken phrases and the numerals they stand for.
///
/// Phrases are stored normalized, so the table applies to text that already
/// went through [`normalize`] regardless of how the phrases were authored.
#[derive(Debug, Clone, PartialEq)]
pub struct SpokenNumbers {
    entries: Vec<(String, String)>,
}

impl SpokenNumbers {
    pub fn pt_br() -> Self {
        Self::from_pairs(PT_BR.iter().map(|(a, b)| (a.to_string(), b.to_string())))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(spoken, numeral)| (normalize(&spoken), normalize(&numeral)))
            .filter(|(spoken, _)| !spoken.is_empty())
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Literal, in-order substring replacement.
    pub fn expand(&self, text: &str) -> String {
        self.entries
            .iter()
            .fold(text.to_string(), |acc, (spoken, numeral)| {
                acc.replace(spoken.as_str(), numeral)
            })
    }
}

impl Default for SpokenNumbers {
    fn default() -> Self {
        Self::pt_br()
    }
}

pub fn expand_spoken_numbers(text: &str, table: &SpokenNumbers) -> String {
    table.expand(text)
}

/// Canonical query form: normalize, expand spoken numbers, normalize again.
pub fn prepare_query(raw: &str, table: &SpokenNumbers) -> String {
    normalize(&expand_spoken_numbers(&normalize(raw), table))
}
