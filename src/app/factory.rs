use crate::{app::App, config::Config, offline::HttpFetcher};
use anyhow::{Context, Result};
use homedir::my_home;
use std::{sync::Arc, time::Duration};

/// Builds sessions wired to the real network and the user's data directory
pub struct AppFactory;

impl AppFactory {
    /// `OILCAP_BASE_PATH`, or `~/.local/share/oilcap`
    pub fn get_base_path() -> Result<String> {
        if let Ok(base_path) = std::env::var("OILCAP_BASE_PATH") {
            return Ok(base_path);
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(format!("{}/.local/share/oilcap", home.to_string_lossy()))
    }

    /// Loads (creating on first run) and validates the configuration
    pub fn create_config() -> Result<Config> {
        let base_path = Self::get_base_path()?;
        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Config::load_with(&base_path)
            .with_context(|| format!("Failed to load config from {base_path}"))
    }

    pub async fn create_app(config: Config) -> Result<App<HttpFetcher>> {
        let timeout = Duration::from_secs(config.offline.timeout_secs);
        let fetcher = Arc::new(HttpFetcher::new(timeout)?);
        Ok(App::start(config, fetcher).await?)
    }
}
