use std::sync::Arc;

use crate::catalog::Record;

use super::normalize::normalize;

/// Normalized, read-only searchable view of one record.
#[derive(Debug, Clone)]
pub struct Projection {
    pub record: Arc<Record>,
    pub brand: String,
    pub model: String,
    pub engine: String,
    pub aliases: Vec<String>,
}

impl Projection {
    pub fn from_record(record: Arc<Record>) -> Self {
        Self {
            brand: normalize(&record.brand),
            model: normalize(&record.model),
            engine: normalize(&record.engine),
            aliases: record.aliases.iter().map(|a| normalize(a)).collect(),
            record,
        }
    }

    /// Unweighted "brand model engine aliases..." text used by the
    /// substring boost.
    pub fn haystack(&self) -> String {
        let mut parts = vec![self.brand.as_str(), self.model.as_str(), self.engine.as_str()];
        parts.extend(self.aliases.iter().map(String::as_str));
        normalize(&parts.join(" "))
    }
}

/// One projection per record, same order as the catalog.
pub fn build_index(records: &[Arc<Record>]) -> Vec<Projection> {
    records
        .iter()
        .map(|record| Projection::from_record(record.clone()))
        .collect()
}
