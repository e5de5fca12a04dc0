use admin_backend::{AppState, config::Config, router::create_router};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

// 惰性连接池：请求不触库时永远不会真正连接
fn test_app() -> Router {
    let config = Config {
        db_host: "localhost".into(),
        db_port: 5432,
        db_user: "test".into(),
        db_pass: "test".into(),
        db_name: "test".into(),
        server_host: "localhost".into(),
        server_port: 3000,
    };
    let pool = PgPoolOptions::new()
        .connect_lazy(&config.database_url())
        .expect("lazy pool");
    create_router(AppState { pool, config })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn ping_responds_with_pong() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/ping")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "pong");
}

#[tokio::test]
async fn every_response_carries_a_request_id() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/ping")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn unknown_endpoint_returns_404_with_message() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/no-such-endpoint")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["message"], "The requested endpoint was not found");
}

#[tokio::test]
async fn anonymous_session_read_returns_empty_projection() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .uri("/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["userId"], Value::Null);
    assert_eq!(body["lastToken"], Value::Null);
    assert_eq!(body["permissions"], serde_json::json!([]));
    assert_eq!(body["announcements"], serde_json::json!([]));
}

#[tokio::test]
async fn anonymous_session_delete_is_idempotent() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["userId"], Value::Null);
    assert_eq!(body["lastToken"], Value::Null);
}

#[tokio::test]
async fn protected_endpoints_reject_anonymous_requests() {
    for (method, uri) in [
        ("GET", "/user"),
        ("GET", "/role"),
        ("GET", "/announcement"),
        ("GET", "/audit?modelType=user&modelId=0&offset=0"),
        ("GET", "/dashboard/total-request-count"),
    ] {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        let body = body_json(response).await;
        assert_eq!(body["message"], "Unauthorized");
    }
}

#[tokio::test]
async fn change_theme_requires_a_session() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/session/change-theme")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"theme":"dark"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
