//! HTTP transport: routing, caller authentication and error rendering

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{harness, Harness, ADMIN, MODERATOR};
use gn_moderation::{
    config::{AuthConfig, LoggingConfig, ModerationConfig, ServerConfig, ServiceConfig, StorageConfig},
    context::AppContext,
    server::build_router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::path::PathBuf;
use tower::ServiceExt;

const SECRET: &str = "integration-secret-integration-secret";

fn config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "127.0.0.1".to_string(),
            port: 0,
            version: "test".to_string(),
            request_timeout_secs: 5,
        },
        storage: StorageConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        authentication: AuthConfig {
            jwt_secret: SECRET.to_string(),
            admin_user_ids: vec![ADMIN],
        },
        moderation: ModerationConfig {
            default_suspension_days: 7,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            json: false,
        },
    }
}

async fn app() -> (Harness, Router) {
    let h = harness().await;
    let ctx = AppContext::with_parts(config(), h.db.clone(), h.content.clone());
    (h, build_router(ctx))
}

fn bearer(user_id: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + 600;
    let token = encode(
        &Header::default(),
        &json!({ "sub": user_id, "exp": exp }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, caller: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = caller {
        builder = builder.header(header::AUTHORIZATION, bearer(user));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, caller: i64, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(caller))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let (_h, app) = app().await;
    let (status, body) = send(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_token_is_authentication_required() {
    let (_h, app) = app().await;
    let (status, body) = send(&app, get("/api/moderation/queue", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AuthenticationRequired");
}

#[tokio::test]
async fn bad_token_on_public_route_is_rejected() {
    let (h, app) = app().await;
    h.topic(3, 30);

    let request = Request::builder()
        .method("GET")
        .uri("/api/moderation/content/topic/3/visibility")
        .header(header::AUTHORIZATION, "Bearer not-a-real-token")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AuthenticationRequired");

    let (status, _) = send(&app, get("/api/moderation/content/topic/3/visibility", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn non_moderator_gets_unauthorized_code() {
    let (_h, app) = app().await;
    let (status, body) = send(&app, get("/api/moderation/queue/stats", Some(77))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn flag_round_trip_over_http() {
    let (h, app) = app().await;
    h.topic(77, 30);

    let (status, flag) = send(
        &app,
        post(
            "/api/moderation/flags",
            20,
            json!({
                "target": { "kind": "topic", "id": 77 },
                "flag_type": "spam",
                "description": "selling things"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flag["status"], "pending");

    let (status, page) = send(
        &app,
        get("/api/moderation/flags?status=pending&pageSize=5", Some(MODERATOR)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["pageSize"], 5);
    assert_eq!(page["pages"], 1);

    let id = flag["id"].as_i64().unwrap();
    let (status, reviewed) = send(
        &app,
        post(
            &format!("/api/moderation/flags/{}/review", id),
            MODERATOR,
            json!({ "status": "approved", "notes": "clear spam" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["status"], "approved");

    let (status, visibility) = send(
        &app,
        get("/api/moderation/content/topic/77/visibility", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(visibility["visibility"], "hidden");
}

#[tokio::test]
async fn bad_input_is_invalid_request() {
    let (h, app) = app().await;
    h.topic(5, 30);

    let (status, body) = send(
        &app,
        post(
            "/api/moderation/flags",
            20,
            json!({ "target": { "kind": "topic", "id": 5 }, "flag_type": "nonsense" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidRequest");

    let (status, body) = send(
        &app,
        get("/api/moderation/content/group/1/visibility", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidRequest");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (_h, app) = app().await;
    let (status, body) = send(&app, get("/api/moderation/nowhere", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn metrics_are_exposed() {
    let (_h, app) = app().await;
    let response = app.oneshot(get("/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
