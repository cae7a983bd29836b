mod web;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::app::App;
use crate::config::{Config, OfflineConfig};
use crate::offline::{CoordinatorDefinition, FetchRequest, FetchResponse, Fetcher, OfflineError};

pub const ORIGIN: &str = "https://oil.example/app/";

pub const CATALOG_JSON: &str = r#"[
    {
        "id": "vw-gol-1.0",
        "marca": "Volkswagen",
        "modelo": "Gol",
        "motor": "1.0",
        "anos": "2008-2016",
        "aliases": ["gol g5", "gol bola"],
        "oleo_motor": { "viscosidade": "5W-40", "capacidade_com_filtro_l": 4.0 }
    },
    {
        "id": "vw-gol-1.6",
        "marca": "Volkswagen",
        "modelo": "Gol",
        "motor": "1.6",
        "anos": "2008-2016"
    },
    {
        "id": "fiat-uno-1.0",
        "marca": "Fiat",
        "modelo": "Uno",
        "motor": "1.0 Fire",
        "aliases": ["uno mille"]
    },
    {
        "id": "chevrolet-onix-1.0",
        "marca": "Chevrolet",
        "modelo": "Onix",
        "motor": "1.0 Turbo"
    }
]"#;

/// In-memory network. Unknown urls answer 404; offline or failing urls are
/// transport errors.
pub struct MockFetcher {
    routes: Mutex<HashMap<String, FetchResponse>>,
    failing: Mutex<HashSet<String>>,
    online: AtomicBool,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            online: AtomicBool::new(true),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn route(self, url: &str, response: FetchResponse) -> Self {
        self.set_route(url, response);
        self
    }

    pub fn set_route(&self, url: &str, response: FetchResponse) {
        let key = Url::parse(url).unwrap().to_string();
        self.routes.lock().unwrap().insert(key, response);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn fail(&self, url: &str) {
        let key = Url::parse(url).unwrap().to_string();
        self.failing.lock().unwrap().insert(key);
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, OfflineError> {
        self.requests.lock().unwrap().push(request.clone());
        let key = request.key();

        if !self.online.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&key) {
            return Err(OfflineError::Network(format!("unreachable: {key}")));
        }

        let response = self.routes.lock().unwrap().get(&key).cloned();
        Ok(response.unwrap_or(FetchResponse {
            status: 404,
            content_type: None,
            body: vec![],
        }))
    }
}

/// Default offline settings published at [`ORIGIN`], with `version` as the
/// precache tag.
pub fn definition(version: &str) -> CoordinatorDefinition {
    let offline = OfflineConfig::default();
    CoordinatorDefinition {
        cache_prefix: offline.cache_prefix,
        version: version.to_string(),
        runtime_version: "v1".to_string(),
        origin: Url::parse(ORIGIN).unwrap(),
        catalog_path: "data.json".to_string(),
        manifest: offline.manifest,
        library_hosts: offline.library_hosts,
    }
}

/// Answers every default manifest url; the catalog serves [`CATALOG_JSON`].
pub fn asset_routes(fetcher: MockFetcher) -> MockFetcher {
    for url in definition("v1").manifest_urls().unwrap() {
        let response = if url.path().ends_with("/data.json") {
            FetchResponse::ok("application/json", CATALOG_JSON)
        } else {
            FetchResponse::ok("text/plain", format!("asset {}", url.path()))
        };
        fetcher.set_route(url.as_str(), response);
    }
    fetcher
}

pub fn test_config(tmp: &tempfile::TempDir) -> Config {
    let mut config = Config::load_with(tmp.path().to_str().unwrap()).unwrap();
    config.origin = ORIGIN.to_string();
    config
}

/// Started app with an activated generation and the catalog loaded.
pub async fn create_app() -> (App<MockFetcher>, Arc<MockFetcher>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(asset_routes(MockFetcher::new()));

    let app = App::start(test_config(&tmp), fetcher.clone()).await.unwrap();
    app.register().await.unwrap();
    app.refresh().await.unwrap();

    (app, fetcher, tmp)
}
