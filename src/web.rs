use crate::{
    app::{App, AppError, AppFactory},
    catalog::Record,
    config::Config,
    offline::{CoordinatorStatus, Fetcher, Notice, OfflineError},
    search::Ranked,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::{signal, sync::broadcast::error::RecvError};
use url::Url;

pub fn router<F: Fetcher>(app: Arc<App<F>>) -> Router {
    Router::new()
        .route("/api/search", get(search::<F>))
        .route("/api/records/:id", get(record::<F>))
        .route("/api/recent", get(recent::<F>))
        .route("/api/update", get(update::<F>))
        .route("/api/status", get(status::<F>))
        .route("/api/refresh", post(refresh::<F>))
        .route("/api/skip-waiting", post(skip_waiting::<F>))
        .fallback(proxy::<F>)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(app)
}

async fn start_app(config: Config, listen: Option<String>) -> anyhow::Result<()> {
    let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
    let app = Arc::new(AppFactory::create_app(config).await?);

    app.register().await?;
    if let Err(e) = app.refresh().await {
        log::warn!("starting with an empty catalog: {e}");
    }

    tokio::spawn(reload_on_update(app.clone()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr} records={}", app.record_count().await?);
    axum::serve(listener, router(app.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.shutdown().await?;
    Ok(())
}

/// A new generation may carry a new catalog; pick it up the way a reloaded
/// page would.
async fn reload_on_update<F: Fetcher>(app: Arc<App<F>>) {
    let mut notices = app.coordinator().subscribe();
    loop {
        match notices.recv().await {
            Ok(Notice::Updated) | Err(RecvError::Lagged(_)) => {
                log::info!("offline: new generation active, reloading catalog");
                if let Err(e) = app.refresh().await {
                    log::warn!("catalog reload after update failed: {e}");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                log::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

pub fn start_daemon(config: Config, listen: Option<String>) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(config, listen))
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Catalog(_) | AppError::Offline(OfflineError::Network(_)) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            log::error!("{self:?}");
        }

        (status, json!({"error": self.0.to_string()}).to_string()).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

async fn search<F: Fetcher>(
    State(app): State<Arc<App<F>>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Ranked>>, HttpError> {
    let limit = params.limit.unwrap_or(app.config().search.limit);
    Ok(Json(app.search(&params.q, limit).await?))
}

async fn record<F: Fetcher>(
    State(app): State<Arc<App<F>>>,
    Path(id): Path<String>,
) -> Result<Json<Arc<Record>>, HttpError> {
    Ok(Json(app.open(&id).await?))
}

async fn recent<F: Fetcher>(
    State(app): State<Arc<App<F>>>,
) -> Result<Json<Vec<Arc<Record>>>, HttpError> {
    Ok(Json(app.recent().await?))
}

async fn update<F: Fetcher>(State(app): State<Arc<App<F>>>) -> Json<serde_json::Value> {
    Json(json!({ "updated": app.update_seen() }))
}

async fn status<F: Fetcher>(
    State(app): State<Arc<App<F>>>,
) -> Result<Json<CoordinatorStatus>, HttpError> {
    Ok(Json(app.status().await?))
}

async fn refresh<F: Fetcher>(
    State(app): State<Arc<App<F>>>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let records = app.refresh().await?;
    Ok(Json(json!({ "records": records })))
}

/// Lets a page that wants the new version now promote a waiting update.
async fn skip_waiting<F: Fetcher>(
    State(app): State<Arc<App<F>>>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let state = app.skip_waiting().await?;
    Ok(Json(json!({ "state": state })))
}

/// Serves the app shell from the origin through the offline layer. Only
/// paths under the origin are reachable.
async fn proxy<F: Fetcher>(
    State(app): State<Arc<App<F>>>,
    uri: Uri,
) -> Result<Response, HttpError> {
    let origin = Url::parse(&app.config().origin).map_err(OfflineError::from)?;
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = origin
        .join(path.trim_start_matches('/'))
        .map_err(OfflineError::from)?;

    if url.origin() != origin.origin() || !url.path().starts_with(origin.path()) {
        return Err(AppError::NotFound(path.to_string()).into());
    }

    let response = app.fetch(url).await?;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    if let Some(content_type) = response.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(response.body))
        .map_err(|e| HttpError(AppError::Other(e.into())))
}
