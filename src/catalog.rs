use std::{collections::HashSet, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::offline::OfflineError;

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("catalog request failed with status {0}")]
    Status(u16),

    #[error("catalog is not valid json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog fetch failed: {0}")]
    Offline(#[from] OfflineError),
}

/// Engine oil block (`oleo_motor`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOil {
    #[serde(rename = "viscosidade", default, skip_serializing_if = "Option::is_none")]
    pub viscosity: Option<String>,

    #[serde(rename = "especificacao", default, skip_serializing_if = "Option::is_none")]
    pub specifications: Option<Vec<String>>,

    #[serde(
        rename = "capacidade_sem_filtro_l",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub capacity_without_filter_l: Option<f64>,

    #[serde(
        rename = "capacidade_com_filtro_l",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub capacity_with_filter_l: Option<f64>,

    #[serde(rename = "obs", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Transmission or differential oil block (`oleo_cambio`, `diferencial`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GearOil {
    /// Viscosity grade or fluid type, e.g. "75W-90" or "ATF Dexron VI"
    #[serde(rename = "tipo", default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,

    #[serde(rename = "capacidade_l", default, skip_serializing_if = "Option::is_none")]
    pub capacity_l: Option<f64>,

    #[serde(rename = "obs", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One catalog entry. Wire names follow the published `data.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,

    #[serde(rename = "marca", default)]
    pub brand: String,

    #[serde(rename = "modelo", default)]
    pub model: String,

    #[serde(rename = "motor", default)]
    pub engine: String,

    #[serde(rename = "anos", default, skip_serializing_if = "Option::is_none")]
    pub years: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(rename = "oleo_motor", default, skip_serializing_if = "Option::is_none")]
    pub engine_oil: Option<EngineOil>,

    #[serde(rename = "oleo_cambio", default, skip_serializing_if = "Option::is_none")]
    pub transmission_oil: Option<GearOil>,

    #[serde(rename = "diferencial", default, skip_serializing_if = "Option::is_none")]
    pub differential_oil: Option<GearOil>,

    #[serde(rename = "notas", default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Record {
    #[cfg(test)]
    pub fn new(id: &str, brand: &str, model: &str, engine: &str) -> Self {
        Self {
            id: id.to_string(),
            brand: brand.to_string(),
            model: model.to_string(),
            engine: engine.to_string(),
            ..Default::default()
        }
    }

    /// "Volkswagen Gol 1.0", as listed by `oilcap recent`
    pub fn label(&self) -> String {
        [&self.brand, &self.model, &self.engine]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Immutable set of records with unique ids, replaced wholesale on reload.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: Vec<Arc<Record>>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Keeps the first record for every id; later duplicates are dropped.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id.clone()) {
                log::warn!("catalog: duplicate id={} dropped", record.id);
                continue;
            }
            kept.push(Arc::new(record));
        }

        Self { records: kept }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CatalogError> {
        let records: Vec<Record> = serde_json::from_slice(bytes)?;
        Ok(Self::from_records(records))
    }

    pub fn read_file(path: &Path) -> Result<Self, CatalogError> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    pub fn records(&self) -> &[Arc<Record>] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<Arc<Record>> {
        self.records.iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
