//! Weighted multi-field fuzzy matching.
//!
//! Each query token is compared with every token of every projection field.
//! A token's distance in a field is `(1 - similarity)` scaled by how far the
//! field's weight is below the heaviest weight, so an exact hit costs 0 in
//! any field while a typo costs more in engine than in an alias. Every query
//! token keeps its best field; the record's distance is the mean over the
//! query tokens.

use strsim::normalized_damerau_levenshtein;

use super::index::Projection;

/// Maximum accepted blended distance.
pub const DEFAULT_THRESHOLD: f64 = 0.35;

/// Prefix matches never score better than this, before length coverage is
/// added back. Keeps "gol" a better hit for "gol" than for "golf".
const PREFIX_BASE: f64 = 0.75;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Brand,
    Model,
    Engine,
    Alias,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldWeights {
    pub brand: f64,
    pub model: f64,
    pub engine: f64,
    pub alias: f64,
}

impl Default for FieldWeights {
    /// Aliases are curated synonyms of what people actually type.
    fn default() -> Self {
        Self {
            brand: 0.4,
            model: 0.4,
            engine: 0.3,
            alias: 0.6,
        }
    }
}

impl FieldWeights {
    pub fn of(&self, field: Field) -> f64 {
        match field {
            Field::Brand => self.brand,
            Field::Model => self.model,
            Field::Engine => self.engine,
            Field::Alias => self.alias,
        }
    }

    fn max(&self) -> f64 {
        self.brand.max(self.model).max(self.engine).max(self.alias)
    }
}

/// A projection that cleared the acceptance threshold for one query.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub projection: &'a Projection,
    /// In [0, 1], lower is better
    pub distance: f64,
}

/// Approximate matching capability used by the search pipeline.
///
/// Implementations return at most one candidate per projection, ordered by
/// ascending distance with catalog order preserved between equal distances.
pub trait Matcher: Send + Sync {
    fn search<'a>(&self, query: &str, projections: &'a [Projection]) -> Vec<Candidate<'a>>;
}

#[derive(Debug, Clone)]
pub struct WeightedMatcher {
    weights: FieldWeights,
    threshold: f64,
}

impl Default for WeightedMatcher {
    fn default() -> Self {
        Self::new(FieldWeights::default(), DEFAULT_THRESHOLD)
    }
}

impl WeightedMatcher {
    pub fn new(weights: FieldWeights, threshold: f64) -> Self {
        Self { weights, threshold }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self::new(FieldWeights::default(), threshold)
    }

    /// Blended distance of a projection for an already tokenized query.
    pub fn distance(&self, query_tokens: &[&str], projection: &Projection) -> f64 {
        if query_tokens.is_empty() {
            return 1.0;
        }

        let fields = [
            (Field::Brand, vec![projection.brand.as_str()]),
            (Field::Model, vec![projection.model.as_str()]),
            (Field::Engine, vec![projection.engine.as_str()]),
            (
                Field::Alias,
                projection.aliases.iter().map(String::as_str).collect(),
            ),
        ];

        let total: f64 = query_tokens
            .iter()
            .map(|token| {
                fields
                    .iter()
                    .map(|(field, values)| self.field_distance(token, *field, values))
                    .fold(1.0, f64::min)
            })
            .sum();

        total / query_tokens.len() as f64
    }

    fn field_distance(&self, query_token: &str, field: Field, values: &[&str]) -> f64 {
        let weight = self.weights.of(field);
        if weight <= 0.0 {
            return 1.0;
        }
        let penalty = self.weights.max() / weight;

        values
            .iter()
            .flat_map(|value| value.split_whitespace())
            .map(|field_token| {
                let similarity = token_similarity(query_token, field_token);
                ((1.0 - similarity) * penalty).clamp(0.0, 1.0)
            })
            .fold(1.0, f64::min)
    }
}

impl Matcher for WeightedMatcher {
    fn search<'a>(&self, query: &str, projections: &'a [Projection]) -> Vec<Candidate<'a>> {
        let query_tokens: Vec<&str> = query.split_whitespace().collect();
        if query_tokens.is_empty() {
            return vec![];
        }

        let mut candidates: Vec<Candidate<'a>> = projections
            .iter()
            .filter_map(|projection| {
                let distance = self.distance(&query_tokens, projection);
                (distance <= self.threshold).then_some(Candidate {
                    projection,
                    distance,
                })
            })
            .collect();

        // stable: equal distances keep catalog order
        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        candidates
    }
}

/// Similarity in [0, 1] of a query token against one field token, taking the
/// better of a whole-token comparison and a prefix comparison (partial input).
fn token_similarity(query_token: &str, field_token: &str) -> f64 {
    let whole = normalized_damerau_levenshtein(query_token, field_token);
    whole.max(prefix_similarity(query_token, field_token))
}

fn prefix_similarity(query_token: &str, field_token: &str) -> f64 {
    let query_len = query_token.chars().count();
    let field_len = field_token.chars().count();
    if query_len == 0 || query_len >= field_len {
        return 0.0;
    }

    let head: String = field_token.chars().take(query_len).collect();
    let coverage = query_len as f64 / field_len as f64;
    normalized_damerau_levenshtein(query_token, &head) * (PREFIX_BASE + (1.0 - PREFIX_BASE) * coverage)
}
