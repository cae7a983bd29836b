//! Offline layer: a two-tier cache kept consistent by a coordinator that
//! lives outside any single front-end session.
//!
//! # Architecture
//!
//! - `fetcher`: network access behind the `Fetcher` trait (reqwest)
//! - `generation`: named on-disk cache generations with atomic entries
//! - `policy`: which requests are intercepted and how
//! - `strategy`: network-first and cache-first against the runtime generation
//! - `coordinator`: install / activate state machine
//! - `service`: the coordinator as a tokio task reached through
//!   [`CoordinatorHandle`]

mod coordinator;
mod fetcher;
mod generation;
mod policy;
mod service;
mod strategy;

pub use coordinator::{
    Coordinator, CoordinatorDefinition, FetchOutcome, Interceptor, LifecycleState, Registration,
};
pub use fetcher::{FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use generation::{CacheStorage, Generation};
pub use policy::{RoutePolicy, Strategy};
pub use service::{spawn, ClientId, CoordinatorHandle, CoordinatorStatus, Notice};

#[derive(thiserror::Error, Debug)]
pub enum OfflineError {
    #[error("network error: {0}")]
    Network(String),

    #[error("install failed on {url}: {reason}")]
    Install { url: String, reason: String },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("cannot {action} while {state:?}")]
    Lifecycle {
        action: &'static str,
        state: LifecycleState,
    },

    #[error("offline coordinator is not running")]
    Closed,
}
