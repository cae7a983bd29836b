//! Runtime fetch strategies. Both write through to the runtime generation
//! on a successful network response and never retry.

use super::{generation::CachedResponse, FetchRequest, FetchResponse, Fetcher, Generation, OfflineError};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Network,
    Cache,
}

/// Live fetch with `no-store`; falls back to the runtime copy on failure.
pub async fn network_first<F: Fetcher>(
    fetcher: &F,
    runtime: &Generation,
    request: &FetchRequest,
) -> Result<(FetchResponse, Source), OfflineError> {
    let key = request.key();
    let live = request.clone().no_store();

    match fetcher.fetch(&live).await {
        Ok(response) => {
            store(runtime, &key, &response).await;
            Ok((response, Source::Network))
        }
        Err(err) => match lookup(runtime, &key).await {
            Some(cached) => {
                log::info!(
                    "offline: network-first fallback url={key} stored_at={} err={err}",
                    cached.stored_at
                );
                Ok((cached.response, Source::Cache))
            }
            None => Err(err),
        },
    }
}

/// Runtime copy if present, otherwise fetch and store.
pub async fn cache_first<F: Fetcher>(
    fetcher: &F,
    runtime: &Generation,
    request: &FetchRequest,
) -> Result<(FetchResponse, Source), OfflineError> {
    let key = request.key();

    if let Some(cached) = lookup(runtime, &key).await {
        return Ok((cached.response, Source::Cache));
    }

    let response = fetcher.fetch(request).await?;
    store(runtime, &key, &response).await;
    Ok((response, Source::Network))
}

/// A corrupt entry counts as a miss.
async fn lookup(runtime: &Generation, key: &str) -> Option<CachedResponse> {
    match runtime.lookup(key).await {
        Ok(hit) => hit,
        Err(e) => {
            log::warn!("offline: ignoring cache entry url={key} err={e}");
            None
        }
    }
}

/// Write-through; failures are logged and only successful responses are kept.
async fn store(runtime: &Generation, key: &str, response: &FetchResponse) {
    if !response.is_success() {
        return;
    }
    if let Err(e) = runtime.store(key, response.clone()).await {
        log::warn!("offline: failed to store url={key} generation={} err={e}", runtime.name());
    }
}
