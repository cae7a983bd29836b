use std::{error::Error, future::Future, time::Duration};

use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use url::Url;

use super::OfflineError;

const USER_AGENT_DEFAULT: &str = concat!("oilcap/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    /// Ask every intermediate cache to stay out of the way
    pub no_store: bool,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            no_store: false,
        }
    }

    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    /// Cache key: the url without its fragment.
    pub fn key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access. Transport failures are errors; any HTTP status,
/// including 4xx/5xx, is a response.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse, OfflineError>> + Send;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, OfflineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT_DEFAULT)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, OfflineError> {
        let mut builder = self.client.get(request.url.clone());
        if request.no_store {
            builder = builder.header(CACHE_CONTROL, "no-store");
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        log::debug!("fetch url={} status={status} bytes={}", request.url, body.len());

        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

fn get_error(error: &reqwest::Error) -> String {
    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}

impl From<reqwest::Error> for OfflineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(get_error(&err))
    }
}
