//! Install / activate lifecycle of the offline layer.
//!
//! ```text
//! Parsed → Installing → Installed ─(no old clients | skip waiting)→ Activating → Activated
//!               └──────→ Redundant (any manifest fetch failed)
//! ```
//!
//! A generation is built in a hidden staging directory and committed under
//! its precache name in one rename, so nobody ever reads a half-populated
//! precache. Activation garbage-collects every other generation name.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use url::Url;

use crate::config::Config;
use crate::storage::{BackendLocal, StorageManager};

use super::strategy::{cache_first, network_first, Source};
use super::{
    CacheStorage, FetchRequest, FetchResponse, Fetcher, Generation, OfflineError, RoutePolicy,
    Strategy,
};

const REGISTRATION_FILE: &str = "registration.json";

/// Staging and trash directories older than this belong to no live install.
const ABANDONED_AFTER_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Parsed,
    Installing,
    /// Installed and waiting for the previous generation's clients
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// Everything that defines the offline layer. Any change produces a new
/// fingerprint and therefore a new install.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorDefinition {
    pub cache_prefix: String,
    pub version: String,
    pub runtime_version: String,
    pub origin: Url,
    pub catalog_path: String,
    pub manifest: Vec<String>,
    pub library_hosts: Vec<String>,
}

impl CoordinatorDefinition {
    pub fn from_config(config: &Config) -> Result<Self, OfflineError> {
        let offline = &config.offline;
        Ok(Self {
            cache_prefix: offline.cache_prefix.clone(),
            version: offline.version.clone(),
            runtime_version: offline.runtime_version.clone(),
            origin: Url::parse(&config.origin)?,
            catalog_path: config.catalog_path.clone(),
            manifest: offline.manifest.clone(),
            library_hosts: offline.library_hosts.clone(),
        })
    }

    pub fn precache_name(&self) -> String {
        format!("{}-precache-{}", self.cache_prefix, self.version)
    }

    pub fn runtime_name(&self) -> String {
        format!("{}-runtime-{}", self.cache_prefix, self.runtime_version)
    }

    pub fn policy(&self) -> RoutePolicy {
        RoutePolicy::new(
            self.origin.clone(),
            &self.catalog_path,
            self.library_hosts.clone(),
        )
    }

    pub fn manifest_urls(&self) -> Result<Vec<Url>, OfflineError> {
        self.manifest
            .iter()
            .map(|entry| Ok(self.origin.join(entry)?))
            .collect()
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let fields = [
            &self.cache_prefix,
            &self.version,
            &self.runtime_version,
            self.origin.as_str(),
            &self.catalog_path,
        ];
        for field in fields {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        for list in [&self.manifest, &self.library_hosts] {
            hasher.update((list.len() as u64).to_le_bytes());
            for entry in list {
                hasher.update(entry.as_bytes());
                hasher.update([0u8]);
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// The generation pair currently serving requests, persisted so a restart
/// keeps serving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub fingerprint: String,
    pub precache: String,
    pub runtime: String,
    pub activated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Served {
        response: FetchResponse,
        source: Source,
    },
    /// Not intercepted; use the network directly
    Passthrough,
}

/// Fetch hook of the active generation. Clones are independent and may
/// serve requests concurrently.
pub struct Interceptor<F> {
    policy: RoutePolicy,
    runtime: Generation,
    fetcher: Arc<F>,
}

impl<F> Clone for Interceptor<F> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            runtime: self.runtime.clone(),
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<F: Fetcher> Interceptor<F> {
    pub async fn handle(&self, request: &FetchRequest) -> Result<FetchOutcome, OfflineError> {
        let served = match self.policy.classify(&request.url) {
            Strategy::NetworkFirst => network_first(self.fetcher.as_ref(), &self.runtime, request).await?,
            Strategy::CacheFirst => cache_first(self.fetcher.as_ref(), &self.runtime, request).await?,
            Strategy::Passthrough => return Ok(FetchOutcome::Passthrough),
        };

        let (response, source) = served;
        Ok(FetchOutcome::Served { response, source })
    }
}

/// Owned work of one install attempt, runnable off the coordinator.
pub struct InstallJob<F> {
    fetcher: Arc<F>,
    storage: CacheStorage,
    precache_name: String,
    urls: Result<Vec<Url>, OfflineError>,
}

impl<F: Fetcher> InstallJob<F> {
    /// Fetches the whole manifest in parallel into a staging generation and
    /// commits it. Nothing is committed unless every fetch succeeded.
    pub async fn run(self) -> Result<Generation, OfflineError> {
        let urls = self.urls?;
        let staged = self.storage.stage()?;

        match Self::populate(self.fetcher, &staged, urls).await {
            Ok(count) => {
                let committed = self.storage.commit(staged, &self.precache_name)?;
                log::info!(
                    "offline: precached {count} assets into {}",
                    committed.name()
                );
                Ok(committed)
            }
            Err(err) => {
                if let Err(e) = self.storage.discard(staged) {
                    log::warn!("offline: failed to discard staging generation: {e}");
                }
                Err(err)
            }
        }
    }

    async fn populate(fetcher: Arc<F>, staged: &Generation, urls: Vec<Url>) -> Result<usize, OfflineError> {
        let mut fetches = JoinSet::new();
        for url in urls {
            let fetcher = fetcher.clone();
            fetches.spawn(async move {
                let request = FetchRequest::get(url);
                let result = fetcher.fetch(&request).await;
                (request, result)
            });
        }

        let mut count = 0;
        while let Some(joined) = fetches.join_next().await {
            let (request, result) = joined.map_err(|e| OfflineError::Install {
                url: "<task>".to_string(),
                reason: e.to_string(),
            })?;

            let response = result.map_err(|e| OfflineError::Install {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;

            if !response.is_success() {
                return Err(OfflineError::Install {
                    url: request.url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }

            staged.store(&request.key(), response).await?;
            count += 1;
        }

        Ok(count)
    }
}

pub struct Coordinator<F> {
    definition: CoordinatorDefinition,
    fingerprint: String,
    storage: CacheStorage,
    registry: BackendLocal,
    fetcher: Arc<F>,
    state: LifecycleState,
    active: Option<Registration>,
}

impl<F: Fetcher> Coordinator<F> {
    pub fn new(
        definition: CoordinatorDefinition,
        storage: CacheStorage,
        fetcher: Arc<F>,
    ) -> Result<Self, OfflineError> {
        let registry = BackendLocal::new(storage.root())?;
        let fingerprint = definition.fingerprint();
        let active = load_registration(&registry, &storage);

        let state = match &active {
            Some(r) if r.fingerprint == fingerprint => LifecycleState::Activated,
            _ => LifecycleState::Parsed,
        };

        Ok(Self {
            definition,
            fingerprint,
            storage,
            registry,
            fetcher,
            state,
            active,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn active(&self) -> Option<&Registration> {
        self.active.as_ref()
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// True on first registration and whenever the definition changed since
    /// the active generation was installed.
    pub fn needs_install(&self) -> bool {
        match &self.active {
            Some(r) => r.fingerprint != self.fingerprint,
            None => true,
        }
    }

    pub fn begin_install(&mut self) -> InstallJob<F> {
        self.state = LifecycleState::Installing;
        log::info!(
            "offline: installing {} fingerprint={}",
            self.definition.precache_name(),
            &self.fingerprint[..12]
        );

        InstallJob {
            fetcher: self.fetcher.clone(),
            storage: self.storage.clone(),
            precache_name: self.definition.precache_name(),
            urls: self.definition.manifest_urls(),
        }
    }

    pub fn finish_install(&mut self, result: Result<Generation, OfflineError>) -> Result<(), OfflineError> {
        match result {
            Ok(_) => {
                self.state = LifecycleState::Installed;
                Ok(())
            }
            Err(err) => {
                self.state = LifecycleState::Redundant;
                log::warn!("offline: install failed, previous generation stays active: {err}");
                Err(err)
            }
        }
    }

    #[cfg(test)]
    pub async fn install(&mut self) -> Result<(), OfflineError> {
        let result = self.begin_install().run().await;
        self.finish_install(result)
    }

    /// Purges every generation other than the current precache/runtime pair
    /// and makes the pair active. Returns the purged names.
    pub fn activate(&mut self) -> Result<Vec<String>, OfflineError> {
        if self.state != LifecycleState::Installed {
            return Err(OfflineError::Lifecycle {
                action: "activate",
                state: self.state,
            });
        }

        self.state = LifecycleState::Activating;
        match self.purge_and_register() {
            Ok(purged) => {
                self.state = LifecycleState::Activated;
                Ok(purged)
            }
            Err(err) => {
                self.state = LifecycleState::Installed;
                Err(err)
            }
        }
    }

    fn purge_and_register(&mut self) -> Result<Vec<String>, OfflineError> {
        let precache = self.definition.precache_name();
        let runtime = self.definition.runtime_name();

        let mut purged = vec![];
        for name in self.storage.keys()? {
            if name != precache && name != runtime && self.storage.delete(&name)? {
                purged.push(name);
            }
        }
        match self
            .storage
            .sweep(chrono::Duration::seconds(ABANDONED_AFTER_SECS))
        {
            Ok(swept) if !swept.is_empty() => log::info!("offline: swept {swept:?}"),
            Ok(_) => {}
            Err(e) => log::warn!("offline: failed to sweep abandoned directories: {e}"),
        }
        self.storage.open(&runtime)?;

        let registration = Registration {
            fingerprint: self.fingerprint.clone(),
            precache,
            runtime,
            activated_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&registration)
            .map_err(|e| OfflineError::Corrupt(format!("registration: {e}")))?;
        self.registry.write(REGISTRATION_FILE, &data)?;

        log::info!(
            "offline: activated precache={} runtime={} purged={:?}",
            registration.precache,
            registration.runtime,
            purged
        );
        self.active = Some(registration);
        Ok(purged)
    }

    /// Fetch hook of the active generation, if any generation ever activated.
    pub fn interceptor(&self) -> Option<Interceptor<F>> {
        let active = self.active.as_ref()?;
        let runtime = match self.storage.open(&active.runtime) {
            Ok(runtime) => runtime,
            Err(e) => {
                log::warn!("offline: runtime generation unavailable: {e}");
                return None;
            }
        };

        Some(Interceptor {
            policy: self.definition.policy(),
            runtime,
            fetcher: self.fetcher.clone(),
        })
    }
}

/// A registration whose precache vanished from disk is not active.
fn load_registration(registry: &BackendLocal, storage: &CacheStorage) -> Option<Registration> {
    if !registry.exists(REGISTRATION_FILE) {
        return None;
    }

    let registration: Registration = match registry
        .read(REGISTRATION_FILE)
        .map_err(|e| e.to_string())
        .and_then(|data| serde_json::from_slice(&data).map_err(|e| e.to_string()))
    {
        Ok(r) => r,
        Err(e) => {
            log::warn!("offline: ignoring unreadable registration: {e}");
            return None;
        }
    };

    storage.has(&registration.precache).then_some(registration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{asset_routes, definition, MockFetcher};

    fn coordinator(
        tmp: &tempfile::TempDir,
        definition: CoordinatorDefinition,
        fetcher: Arc<MockFetcher>,
    ) -> Coordinator<MockFetcher> {
        let storage = CacheStorage::new(tmp.path().join("cache")).unwrap();
        Coordinator::new(definition, storage, fetcher).unwrap()
    }

    #[tokio::test]
    async fn test_first_install_and_activate() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(asset_routes(MockFetcher::new()));
        let mut coordinator = coordinator(&tmp, definition("v1"), fetcher);

        assert!(coordinator.needs_install());
        assert_eq!(coordinator.state(), LifecycleState::Parsed);

        coordinator.install().await.unwrap();
        assert_eq!(coordinator.state(), LifecycleState::Installed);

        coordinator.activate().unwrap();
        assert_eq!(coordinator.state(), LifecycleState::Activated);
        assert!(!coordinator.needs_install());

        let keys = coordinator.storage().keys().unwrap();
        assert_eq!(keys, vec!["oilcap-precache-v1", "oilcap-runtime-v1"]);

        let precache = coordinator.storage().open("oilcap-precache-v1").unwrap();
        assert_eq!(precache.len(), definition("v1").manifest.len());
    }

    #[tokio::test]
    async fn test_failed_install_commits_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(asset_routes(MockFetcher::new()));
        fetcher.fail("https://oil.example/app/styles.css");

        let mut coordinator = coordinator(&tmp, definition("v1"), fetcher);
        let err = coordinator.install().await.unwrap_err();

        assert!(matches!(err, OfflineError::Install { ref url, .. } if url.ends_with("styles.css")));
        assert_eq!(coordinator.state(), LifecycleState::Redundant);
        assert!(coordinator.storage().keys().unwrap().is_empty());
        assert!(coordinator.active().is_none());

        // staging directory is gone too
        let leftovers = std::fs::read_dir(tmp.path().join("cache"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_error_status_fails_install() {
        let tmp = tempfile::tempdir().unwrap();
        // no routes: everything answers 404
        let fetcher = Arc::new(MockFetcher::new());
        let mut coordinator = coordinator(&tmp, definition("v1"), fetcher);

        assert!(coordinator.install().await.is_err());
        assert_eq!(coordinator.state(), LifecycleState::Redundant);
    }

    #[tokio::test]
    async fn test_failed_upgrade_keeps_previous_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(asset_routes(MockFetcher::new()));

        let mut v1 = coordinator(&tmp, definition("v1"), fetcher.clone());
        v1.install().await.unwrap();
        v1.activate().unwrap();

        fetcher.set_online(false);
        let mut v2 = coordinator(&tmp, definition("v2"), fetcher);
        assert!(v2.needs_install());
        assert!(v2.install().await.is_err());

        assert_eq!(v2.active().unwrap().precache, "oilcap-precache-v1");
        assert!(v2.interceptor().is_some());
        assert!(v2.storage().has("oilcap-precache-v1"));
    }

    #[tokio::test]
    async fn test_activation_purges_stale_generations() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(asset_routes(MockFetcher::new()));

        let mut v1 = coordinator(&tmp, definition("v1"), fetcher.clone());
        v1.install().await.unwrap();
        v1.activate().unwrap();
        v1.storage().open("someone-elses-cache").unwrap();

        let mut v2 = coordinator(&tmp, definition("v2"), fetcher);
        v2.install().await.unwrap();
        let purged = v2.activate().unwrap();

        assert_eq!(purged, vec!["oilcap-precache-v1", "someone-elses-cache"]);
        assert_eq!(
            v2.storage().keys().unwrap(),
            vec!["oilcap-precache-v2", "oilcap-runtime-v1"]
        );
    }

    #[tokio::test]
    async fn test_activation_sweeps_crashed_installs() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(asset_routes(MockFetcher::new()));
        let mut coordinator = coordinator(&tmp, definition("v1"), fetcher);

        let root = coordinator.storage().root().to_path_buf();
        let crashed = root.join(".staging-01ARZ3NDEKTSV4RRFFQ69G5FAV");
        std::fs::create_dir(&crashed).unwrap();
        std::fs::write(crashed.join("partial"), "x").unwrap();

        coordinator.install().await.unwrap();
        coordinator.activate().unwrap();

        assert!(!crashed.exists());
        let hidden: Vec<_> = std::fs::read_dir(&root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(hidden.is_empty());
    }

    #[tokio::test]
    async fn test_registration_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(asset_routes(MockFetcher::new()));

        let mut first = coordinator(&tmp, definition("v1"), fetcher.clone());
        first.install().await.unwrap();
        first.activate().unwrap();

        let restarted = coordinator(&tmp, definition("v1"), fetcher);
        assert_eq!(restarted.state(), LifecycleState::Activated);
        assert!(!restarted.needs_install());
    }

    #[test]
    fn test_activate_requires_installed() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let mut coordinator = coordinator(&tmp, definition("v1"), fetcher);

        assert!(matches!(
            coordinator.activate(),
            Err(OfflineError::Lifecycle { state: LifecycleState::Parsed, .. })
        ));
    }

    #[test]
    fn test_fingerprint_tracks_definition() {
        let base = definition("v1");
        assert_eq!(base.fingerprint(), definition("v1").fingerprint());

        let mut changed = definition("v1");
        changed.manifest.push("./extra.js".to_string());
        assert_ne!(base.fingerprint(), changed.fingerprint());

        assert_ne!(base.fingerprint(), definition("v2").fingerprint());
    }

    #[test]
    fn test_process_settings_do_not_change_fingerprint() {
        let tmp = tempfile::tempdir().unwrap();
        let config = crate::tests::test_config(&tmp);
        let base = CoordinatorDefinition::from_config(&config).unwrap();

        let mut tuned = config.clone();
        tuned.offline.skip_waiting = !tuned.offline.skip_waiting;
        tuned.offline.timeout_secs += 30;
        let tuned = CoordinatorDefinition::from_config(&tuned).unwrap();
        assert_eq!(base.fingerprint(), tuned.fingerprint());

        let mut bumped = config;
        bumped.offline.runtime_version = "v2".to_string();
        let bumped = CoordinatorDefinition::from_config(&bumped).unwrap();
        assert_ne!(base.fingerprint(), bumped.fingerprint());
    }

    #[test]
    fn test_manifest_urls_resolve_against_origin() {
        let urls = definition("v1").manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://oil.example/app/");
        assert!(urls
            .iter()
            .any(|u| u.as_str() == "https://cdn.jsdelivr.net/npm/fuse.js@6.6.2/dist/fuse.min.js"));
    }
}
