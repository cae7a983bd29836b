use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000/";
const DEFAULT_CATALOG_PATH: &str = "data.json";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Maximum accepted blended distance (0.0 = exact, 1.0 = unrelated)
const DEFAULT_SEARCH_THRESHOLD: f64 = 0.35;
const DEFAULT_SEARCH_LIMIT: usize = 20;

const DEFAULT_CACHE_PREFIX: &str = "oilcap";
const DEFAULT_CACHE_VERSION: &str = "v1";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("config file is not valid utf8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid config: {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Fuzzy search tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Acceptance threshold in [0.0, 1.0]
    #[serde(default = "default_search_threshold")]
    pub threshold: f64,

    /// Maximum number of records printed/returned per query
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    /// Spoken engine sizes rewritten into numerals, e.g. `["um ponto zero", "1.0"]`.
    /// Empty means the built-in pt-BR table.
    #[serde(default)]
    pub spoken_numbers: Vec<(String, String)>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SEARCH_THRESHOLD,
            limit: DEFAULT_SEARCH_LIMIT,
            spoken_numbers: vec![],
        }
    }
}

/// Offline layer settings. Changing the cache names, manifest or library
/// hosts changes the coordinator fingerprint and triggers a fresh install;
/// `skip_waiting` and `timeout_secs` only affect the running process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfflineConfig {
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Version tag of the precache generation
    #[serde(default = "default_cache_version")]
    pub version: String,

    /// Version tag of the runtime generation; bumped independently so
    /// runtime entries survive precache upgrades
    #[serde(default = "default_cache_version")]
    pub runtime_version: String,

    /// Assets fetched at install time, relative to `origin` or absolute
    #[serde(default = "default_manifest")]
    pub manifest: Vec<String>,

    /// Foreign hosts served cache-first (pinned libraries)
    #[serde(default = "default_library_hosts")]
    pub library_hosts: Vec<String>,

    /// Activate a freshly installed generation without waiting for clients
    /// of the previous one to disconnect
    #[serde(default = "default_skip_waiting")]
    pub skip_waiting: bool,

    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cache_prefix: default_cache_prefix(),
            version: default_cache_version(),
            runtime_version: default_cache_version(),
            manifest: default_manifest(),
            library_hosts: default_library_hosts(),
            skip_waiting: default_skip_waiting(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_search_threshold() -> f64 {
    DEFAULT_SEARCH_THRESHOLD
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_cache_prefix() -> String {
    DEFAULT_CACHE_PREFIX.to_string()
}

fn default_cache_version() -> String {
    DEFAULT_CACHE_VERSION.to_string()
}

fn default_manifest() -> Vec<String> {
    [
        "./",
        "./index.html",
        "./styles.css",
        "./app.js",
        "./data.json",
        "./manifest.webmanifest",
        "./icons/icon-192.png",
        "./icons/icon-512.png",
        "https://cdn.jsdelivr.net/npm/fuse.js@6.6.2/dist/fuse.min.js",
        "https://cdn.jsdelivr.net/npm/qrcode@1.5.1/build/qrcode.min.js",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_library_hosts() -> Vec<String> {
    vec!["cdn.jsdelivr.net".to_string()]
}

fn default_skip_waiting() -> bool {
    true
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

fn default_catalog_path() -> String {
    DEFAULT_CATALOG_PATH.to_string()
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Where the app shell and catalog are published
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Catalog location relative to `origin`; served network-first
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub offline: OfflineConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            catalog_path: default_catalog_path(),
            listen_addr: default_listen_addr(),
            search: SearchConfig::default(),
            offline: OfflineConfig::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin = url::Url::parse(&self.origin)
            .map_err(|e| ConfigError::invalid("origin", e.to_string()))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(ConfigError::invalid("origin", "must be an http(s) url"));
        }

        if self.catalog_path.trim().is_empty() {
            return Err(ConfigError::invalid("catalog_path", "must not be empty"));
        }

        if !(0.0..=1.0).contains(&self.search.threshold) {
            return Err(ConfigError::invalid(
                "search.threshold",
                format!("must be between 0.0 and 1.0, got {}", self.search.threshold),
            ));
        }

        if self.search.limit == 0 {
            return Err(ConfigError::invalid("search.limit", "must be greater than 0"));
        }

        let offline = &self.offline;
        let tags = [&offline.cache_prefix, &offline.version, &offline.runtime_version];
        if tags.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "offline",
                "cache_prefix, version and runtime_version must not be empty",
            ));
        }

        // generation names double as directory names
        let bad_char = |s: &str| s.contains('/') || s.contains('\\') || s.starts_with('.');
        if tags.iter().any(|s| bad_char(s)) {
            return Err(ConfigError::invalid(
                "offline",
                "cache_prefix and versions must not contain path separators",
            ));
        }

        if offline.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "offline.timeout_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> Result<Self, ConfigError> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(
                CONFIG_FILE,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}
