use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::app::App;
use crate::offline::LifecycleState;
use crate::web::router;

use super::{asset_routes, create_app, test_config, MockFetcher};

async fn test_router() -> (Router, Arc<MockFetcher>, tempfile::TempDir) {
    let (app, fetcher, tmp) = create_app().await;
    (router(Arc::new(app)), fetcher, tmp)
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = send(router, Method::GET, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_search_endpoint() {
    let (router, _fetcher, _tmp) = test_router().await;

    let (status, body) = get_json(&router, "/api/search?q=volksvagen%20gol").await;
    assert_eq!(status, StatusCode::OK);

    let results = body.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["record"]["marca"], "Volkswagen");
    assert!(results[0]["score"].as_f64().unwrap() <= results[1]["score"].as_f64().unwrap());

    let (_, body) = get_json(&router, "/api/search?q=xyzxyz").await;
    assert_eq!(body, serde_json::json!([]));

    let (_, body) = get_json(&router, "/api/search?q=gol&limit=1").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_record_endpoint_remembers_selection() {
    let (router, _fetcher, _tmp) = test_router().await;

    let (status, body) = get_json(&router, "/api/records/fiat-uno-1.0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modelo"], "Uno");

    let (_, body) = get_json(&router, "/api/recent").await;
    assert_eq!(body[0]["id"], "fiat-uno-1.0");

    let (status, body) = get_json(&router, "/api/records/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_update_and_status_endpoints() {
    let (router, _fetcher, _tmp) = test_router().await;

    let (_, body) = get_json(&router, "/api/update").await;
    assert_eq!(body["updated"], true);

    let (status, body) = get_json(&router, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "activated");
    assert_eq!(body["active"]["precache"], "oilcap-precache-v1");
}

#[tokio::test]
async fn test_skip_waiting_endpoint_promotes_waiting_update() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(asset_routes(MockFetcher::new()));

    let first = App::start(test_config(&tmp), fetcher.clone()).await.unwrap();
    first.register().await.unwrap();
    first.shutdown().await.unwrap();

    let mut config = test_config(&tmp);
    config.offline.version = "v2".to_string();
    config.offline.skip_waiting = false;
    let app = App::start(config, fetcher).await.unwrap();
    // this session is connected, so the update waits
    assert_eq!(app.register().await.unwrap(), LifecycleState::Installed);
    let router = router(Arc::new(app));

    let (_, body) = get_json(&router, "/api/status").await;
    assert_eq!(body["state"], "installed");
    assert_eq!(body["active"]["precache"], "oilcap-precache-v1");

    let (status, body) = send(&router, Method::POST, "/api/skip-waiting").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&body).unwrap()["state"],
        "activated"
    );

    let (_, body) = get_json(&router, "/api/status").await;
    assert_eq!(body["active"]["precache"], "oilcap-precache-v2");
    let (_, body) = get_json(&router, "/api/update").await;
    assert_eq!(body["updated"], true);
}

#[tokio::test]
async fn test_refresh_endpoint_reports_upstream_failure() {
    let (router, fetcher, _tmp) = test_router().await;

    let (status, body) = send(&router, Method::POST, "/api/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["records"], 4);

    fetcher.set_route(
        "https://oil.example/app/data.json",
        crate::offline::FetchResponse {
            status: 503,
            content_type: None,
            body: vec![],
        },
    );
    let (status, _) = send(&router, Method::POST, "/api/refresh").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_proxy_serves_shell_offline() {
    let (router, fetcher, _tmp) = test_router().await;

    let (status, body) = send(&router, Method::GET, "/styles.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"asset /app/styles.css");

    fetcher.set_online(false);
    let (status, body) = send(&router, Method::GET, "/styles.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"asset /app/styles.css");

    let (status, _) = send(&router, Method::GET, "/never-fetched.js").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_proxy_stays_on_origin() {
    let (router, _fetcher, _tmp) = test_router().await;

    let (status, _) = send(&router, Method::GET, "/missing.css").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, Method::GET, "/https://tracker.example/pixel").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
