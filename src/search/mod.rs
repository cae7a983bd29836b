//! Query pipeline: normalize → fuzzy match → re-rank.
//!
//! # Architecture
//!
//! - `normalize`: canonical text and spoken-number expansion
//! - `index`: normalized projection of the catalog
//! - `fuzzy`: weighted multi-field matcher behind the `Matcher` trait
//! - `rank`: substring and recency boosts
//! - `recent`: persisted MRU list of selected ids
//!
//! [`SearchEngine`] owns one catalog load worth of state. It is rebuilt, not
//! patched, when the catalog changes.

pub mod fuzzy;
pub mod index;
pub mod normalize;
pub mod rank;
pub mod recent;

use std::sync::Arc;

use crate::catalog::{Catalog, Record};

pub use fuzzy::{Matcher, WeightedMatcher};
pub use index::{build_index, Projection};
pub use normalize::{prepare_query, SpokenNumbers};
pub use rank::{rank_scored, Ranked};
pub use recent::RecencyTracker;

/// Extracts the record id from a `#/<id>` fragment. Accepts the bare
/// fragment or a full link carrying it.
pub fn parse_deep_link(link: &str) -> Option<&str> {
    let fragment = &link[link.find('#')?..];
    let id = fragment.strip_prefix("#/")?.trim();
    (!id.is_empty()).then_some(id)
}

pub struct SearchEngine {
    catalog: Catalog,
    index: Vec<Projection>,
    matcher: Box<dyn Matcher>,
    numbers: SpokenNumbers,
    recency: RecencyTracker,
}

impl SearchEngine {
    #[cfg(test)]
    pub fn new(catalog: Catalog, recency: RecencyTracker) -> Self {
        Self::with_matcher(
            catalog,
            recency,
            Box::new(WeightedMatcher::default()),
            SpokenNumbers::default(),
        )
    }

    pub fn with_matcher(
        catalog: Catalog,
        recency: RecencyTracker,
        matcher: Box<dyn Matcher>,
        numbers: SpokenNumbers,
    ) -> Self {
        let index = build_index(catalog.records());
        log::debug!("search: indexed {} records", index.len());

        Self {
            catalog,
            index,
            matcher,
            numbers,
            recency,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Swaps in a freshly loaded catalog and rebuilds the index.
    pub fn reload(&mut self, catalog: Catalog) {
        self.index = build_index(catalog.records());
        self.catalog = catalog;
        log::debug!("search: reindexed {} records", self.index.len());
    }

    /// Ranked results without side effects.
    pub fn search(&self, raw_query: &str) -> Vec<Ranked> {
        let query = prepare_query(raw_query, &self.numbers);
        if query.is_empty() {
            return vec![];
        }

        let candidates = self.matcher.search(&query, &self.index);
        rank_scored(&query, candidates, &self.recency.list())
    }

    /// Interactive query: like [`search`](Self::search), and the top result
    /// counts as selected.
    pub fn query(&self, raw_query: &str) -> Vec<Ranked> {
        let results = self.search(raw_query);
        if let Some(top) = results.first() {
            self.recency.remember(&top.record.id);
        }
        results
    }

    /// Resolves a record id as if it were a one-result query.
    pub fn open(&self, id: &str) -> Option<Arc<Record>> {
        let record = self.catalog.get(id)?;
        self.recency.remember(&record.id);
        Some(record)
    }

    pub fn open_link(&self, link: &str) -> Option<Arc<Record>> {
        self.open(parse_deep_link(link)?)
    }

    /// Recently selected records that still exist in the catalog.
    pub fn recent(&self) -> Vec<Arc<Record>> {
        self.recency
            .list()
            .iter()
            .filter_map(|id| self.catalog.get(id))
            .collect()
    }
}
