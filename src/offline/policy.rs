use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Mutable catalog: live data preferred, runtime copy as fallback
    NetworkFirst,
    /// Shell assets and pinned libraries: runtime copy preferred
    CacheFirst,
    /// Not intercepted; the caller uses the network directly
    Passthrough,
}

/// Classifies requests by origin and path.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    origin: Url,
    catalog_suffix: String,
    library_hosts: Vec<String>,
}

impl RoutePolicy {
    pub fn new(origin: Url, catalog_path: &str, library_hosts: Vec<String>) -> Self {
        let file = catalog_path.trim_start_matches("./").trim_start_matches('/');
        Self {
            origin,
            catalog_suffix: format!("/{file}"),
            library_hosts: library_hosts
                .into_iter()
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, url: &Url) -> Strategy {
        let same_origin = url.origin() == self.origin.origin();

        if same_origin && url.path().ends_with(&self.catalog_suffix) {
            return Strategy::NetworkFirst;
        }

        if same_origin || self.is_library_host(url) {
            return Strategy::CacheFirst;
        }

        Strategy::Passthrough
    }

    fn is_library_host(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.library_hosts
            .iter()
            .any(|lib| host == *lib || host.ends_with(&format!(".{lib}")))
    }
}
