//! CORS behaviour of the API router.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use common::TestApp;
use toolrelay_axum::ServerConfig;

async fn allow_origin(app: &TestApp, origin: &str) -> Option<String> {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/servers")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .map(|v| v.to_str().unwrap().to_string())
}

#[tokio::test]
async fn default_allows_any_origin() {
    let app = TestApp::new().await;
    assert_eq!(allow_origin(&app, "http://ui.test").await.as_deref(), Some("*"));
}

#[tokio::test]
async fn configured_origins_are_enforced() {
    let config = ServerConfig::with_defaults()
        .with_allowed_origins(vec!["http://ui.test".to_string()]);
    let app = TestApp::with_config(config).await;

    assert_eq!(
        allow_origin(&app, "http://ui.test").await.as_deref(),
        Some("http://ui.test")
    );
    assert_eq!(allow_origin(&app, "http://evil.test").await, None);
}
