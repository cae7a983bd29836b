use crate::{catalog::CatalogError, config::ConfigError, offline::OfflineError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("offline layer error: {0}")]
    Offline(#[from] OfflineError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
