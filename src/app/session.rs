use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::{broadcast, RwLock};
use url::Url;

use crate::{
    catalog::{Catalog, CatalogError, Record},
    config::Config,
    offline::{
        self, CacheStorage, ClientId, Coordinator, CoordinatorDefinition, CoordinatorHandle,
        CoordinatorStatus, FetchOutcome, FetchRequest, FetchResponse, Fetcher, LifecycleState,
        Notice,
    },
    search::{RecencyTracker, Ranked, SearchEngine, SpokenNumbers, WeightedMatcher},
    storage::BackendLocal,
};

use super::AppError;

const CACHE_DIR: &str = "cache";

/// One front-end session: a search engine over the current catalog plus a
/// client connection to the offline coordinator.
pub struct App<F: Fetcher> {
    config: Config,
    fetcher: Arc<F>,
    coordinator: CoordinatorHandle,
    client: ClientId,
    engine: Arc<RwLock<SearchEngine>>,
    notices: Mutex<broadcast::Receiver<Notice>>,
    updated: AtomicBool,
}

impl<F: Fetcher> App<F> {
    /// Spawns the coordinator and connects to it. Nothing is installed or
    /// fetched yet; see [`register`](Self::register) and
    /// [`refresh`](Self::refresh).
    pub async fn start(config: Config, fetcher: Arc<F>) -> Result<Self, AppError> {
        let base = Path::new(config.base_path());

        let definition = CoordinatorDefinition::from_config(&config)?;
        let storage = CacheStorage::new(base.join(CACHE_DIR))?;
        let coordinator = Coordinator::new(definition, storage, fetcher.clone())?;
        let (handle, _task) = offline::spawn(coordinator, config.offline.skip_waiting);

        let recency = RecencyTracker::new(Arc::new(BackendLocal::new(base)?));
        let numbers = SpokenNumbers::from_pairs(config.search.spoken_numbers.clone());
        let numbers = if numbers.is_empty() {
            SpokenNumbers::default()
        } else {
            numbers
        };
        let engine = SearchEngine::with_matcher(
            Catalog::empty(),
            recency,
            Box::new(WeightedMatcher::with_threshold(config.search.threshold)),
            numbers,
        );

        let notices = handle.subscribe();
        let client = handle.connect().await?;

        Ok(Self {
            config,
            fetcher,
            coordinator: handle,
            client,
            engine: Arc::new(RwLock::new(engine)),
            notices: Mutex::new(notices),
            updated: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Registers the offline layer. An install failure is not fatal: the
    /// session keeps working against the network and whatever generation
    /// was active before.
    pub async fn register(&self) -> Result<LifecycleState, AppError> {
        let state = self.coordinator.register().await?;
        match state {
            LifecycleState::Redundant => {
                log::warn!("offline: install failed, working without a fresh cache")
            }
            LifecycleState::Installed => {
                log::info!("offline: update installed, waiting for other sessions to close")
            }
            _ => log::debug!("offline: registered state={state:?}"),
        }
        Ok(state)
    }

    /// Activates an installed update now instead of waiting for the other
    /// sessions to close. Resolves to the state after the request.
    pub async fn skip_waiting(&self) -> Result<LifecycleState, AppError> {
        self.coordinator.skip_waiting().await?;
        let state = self.coordinator.status().await?.state;
        log::info!("offline: skip waiting requested, state={state:?}");
        Ok(state)
    }

    /// Fetch through the coordinator hook, falling back to the network for
    /// requests it does not intercept.
    pub async fn fetch(&self, url: Url) -> Result<FetchResponse, AppError> {
        let request = FetchRequest::get(url);
        match self.coordinator.fetch(request.clone()).await? {
            FetchOutcome::Served { response, source } => {
                log::debug!("fetch url={} source={source:?}", request.url);
                Ok(response)
            }
            FetchOutcome::Passthrough => Ok(self.fetcher.fetch(&request).await?),
        }
    }

    pub fn catalog_url(&self) -> Result<Url, AppError> {
        let origin = Url::parse(&self.config.origin).map_err(offline::OfflineError::from)?;
        let url = origin
            .join(&self.config.catalog_path)
            .map_err(offline::OfflineError::from)?;
        Ok(url)
    }

    async fn fetch_catalog(&self) -> Result<Catalog, AppError> {
        let response = self.fetch(self.catalog_url()?).await?;
        if !response.is_success() {
            return Err(CatalogError::Status(response.status).into());
        }
        Ok(Catalog::parse(&response.body)?)
    }

    /// Reloads the catalog from the origin. On failure the current catalog
    /// stays in place and the error is returned for the caller to report.
    pub async fn refresh(&self) -> Result<usize, AppError> {
        match self.fetch_catalog().await {
            Ok(catalog) => Ok(self.replace_catalog(catalog).await),
            Err(e) => {
                log::warn!("catalog: load failed, keeping current records: {e}");
                Err(e)
            }
        }
    }

    /// Uses a local catalog file instead of the origin.
    pub async fn load_catalog_file(&self, path: &Path) -> Result<usize, AppError> {
        let catalog = Catalog::read_file(path)?;
        Ok(self.replace_catalog(catalog).await)
    }

    async fn replace_catalog(&self, catalog: Catalog) -> usize {
        let count = catalog.len();
        if catalog.is_empty() {
            log::warn!("catalog: loaded an empty catalog");
        }
        self.engine.write().await.reload(catalog);
        log::info!("catalog: loaded records={count}");
        count
    }

    /// Runs `f` on the blocking pool: matching is CPU bound and recency
    /// updates write to disk.
    async fn with_engine<T, G>(&self, f: G) -> Result<T, AppError>
    where
        T: Send + 'static,
        G: FnOnce(&SearchEngine) -> T + Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || f(&engine.blocking_read()))
            .await
            .map_err(|e| AppError::Other(e.into()))
    }

    pub async fn record_count(&self) -> Result<usize, AppError> {
        self.with_engine(|engine| engine.catalog().len()).await
    }

    /// Interactive query; the top result is remembered as selected.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Ranked>, AppError> {
        let query = query.to_string();
        let mut results = self.with_engine(move |engine| engine.query(&query)).await?;
        results.truncate(limit);
        Ok(results)
    }

    pub async fn open(&self, id: &str) -> Result<Arc<Record>, AppError> {
        let id = id.to_string();
        self.with_engine(move |engine| engine.open(&id).ok_or(AppError::NotFound(id)))
            .await?
    }

    pub async fn open_link(&self, link: &str) -> Result<Arc<Record>, AppError> {
        let link = link.to_string();
        self.with_engine(move |engine| engine.open_link(&link).ok_or(AppError::NotFound(link)))
            .await?
    }

    pub async fn recent(&self) -> Result<Vec<Arc<Record>>, AppError> {
        self.with_engine(|engine| engine.recent()).await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, AppError> {
        Ok(self.coordinator.status().await?)
    }

    /// True once a new generation activated since this session started.
    pub fn update_seen(&self) -> bool {
        if let Ok(mut notices) = self.notices.lock() {
            loop {
                match notices.try_recv() {
                    Ok(Notice::Updated) | Err(broadcast::error::TryRecvError::Lagged(_)) => {
                        self.updated.store(true, Ordering::SeqCst);
                    }
                    Err(_) => break,
                }
            }
        }
        self.updated.load(Ordering::SeqCst)
    }

    /// Disconnects from the coordinator and stops it.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.coordinator.disconnect(self.client).await?;
        self.coordinator.shutdown().await?;
        Ok(())
    }
}
