//! Router tests: authentication, status codes and error bodies.

mod test_utils;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use pipes::auth::WorkspaceResolver;
use pipes::config::AppConfig;
use pipes::pipes::PipeId;
use pipes::server::{AppState, create_app};
use test_utils::{Harness, SharedPlatform, user};

const WS: i64 = 1;
const TOKEN: &str = "tok";

struct TestApp {
    harness: Harness,
    router: Router,
    shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn app() -> TestApp {
    let harness = Harness::new().await.unwrap();
    harness
        .platform
        .workspaces
        .lock()
        .unwrap()
        .insert(TOKEN.to_string(), WS);

    let shutdown = CancellationToken::new();
    let (service, _workers) = harness.service(shutdown.clone());
    let state = AppState {
        config: Arc::new(AppConfig::default()),
        service,
        workspaces: Arc::new(WorkspaceResolver::new(
            Arc::new(SharedPlatform(harness.platform.clone())),
            16,
        )),
    };
    TestApp {
        router: create_app(state),
        harness,
        shutdown,
    }
}

fn basic(token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{token}:api_token")))
}

fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, basic(TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn json_of(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = app().await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["status"], "ok");
}

#[tokio::test]
async fn ready_reports_platform_outage() {
    let app = app().await;
    *app.harness.platform.ping_error.lock().unwrap() = Some(502);
    let request = Request::builder().uri("/ready").body(Body::empty()).unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let body = json_of(&body);
    assert_eq!(body["ready"], false);
    assert_eq!(body["problems"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn integration_routes_require_a_token() {
    let app = app().await;
    let request = Request::builder()
        .uri("/api/v1/integrations")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_of(&body)["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn unknown_token_is_unauthorized() {
    let app = app().await;
    let request = Request::builder()
        .uri("/api/v1/integrations")
        .header(header::AUTHORIZATION, "Bearer nobody")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn integrations_are_listed_for_the_caller() {
    let app = app().await;

    let (status, body) = send(&app, request("GET", "/api/v1/integrations", "")).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_of(&body);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["asana", "freshbooks"]);
    assert_eq!(body[0]["authorized"], false);
    assert_eq!(body[0]["pipes"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn users_run_without_payload_is_a_validation_error() {
    let app = app().await;
    app.harness.authorize_valid(WS).await.unwrap();
    app.harness
        .configure(WS, PipeId::Users, Value::Null)
        .await
        .unwrap();

    let (status, body) = send(
        &app,
        request("POST", "/api/v1/integrations/asana/pipes/users/run", ""),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = json_of(&body);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["message"], "Missing request payload");
    assert!(app.harness.vendor.calls().is_empty());
}

#[tokio::test]
async fn running_an_unconfigured_pipe_is_rejected() {
    let app = app().await;

    let (status, body) = send(
        &app,
        request("POST", "/api/v1/integrations/asana/pipes/projects/run", ""),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["code"], "PIPE_NOT_CONFIGURED");
}

#[tokio::test]
async fn projects_run_is_queued() {
    let app = app().await;
    app.harness
        .configure(WS, PipeId::Projects, Value::Null)
        .await
        .unwrap();

    let (status, body) = send(
        &app,
        request("POST", "/api/v1/integrations/asana/pipes/projects/run", ""),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json_of(&body), json!({"status": "queued"}));
}

#[tokio::test]
async fn log_without_runs_is_no_content() {
    let app = app().await;

    let (status, body) = send(
        &app,
        request("GET", "/api/v1/integrations/asana/pipes/projects/log", ""),
    )
    .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
}

#[tokio::test]
async fn created_pipe_is_returned_as_configured() {
    let app = app().await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/integrations/asana/pipes/projects",
            r#"{"account_id": 12}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json_of(&body)["configured"], true);

    let (status, body) = send(
        &app,
        request("GET", "/api/v1/integrations/asana/pipes/projects", ""),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = json_of(&body);
    assert_eq!(body["id"], "projects");
    assert_eq!(body["configured"], true);
    assert_eq!(body["service_params"]["account_id"], 12);

    let (status, _) = send(
        &app,
        request("DELETE", "/api/v1/integrations/asana/pipes/projects", ""),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn invalid_pipe_params_are_rejected() {
    let app = app().await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/integrations/asana/pipes/projects",
            r#"{"account_id": 0}"#,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["message"], "Missing account_id");
}

#[tokio::test]
async fn unknown_vendor_and_pipe_are_bad_requests() {
    let app = app().await;

    let (status, _) = send(
        &app,
        request("GET", "/api/v1/integrations/trello/pipes/projects", ""),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        request("GET", "/api/v1/integrations/asana/pipes/invoices", ""),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staged_users_are_served() {
    let app = app().await;
    app.harness.authorize_valid(WS).await.unwrap();
    app.harness
        .configure(WS, PipeId::Users, Value::Null)
        .await
        .unwrap();
    app.harness.vendor.data.lock().unwrap().users = vec![user("42", "ada@example.com")];
    let pipe = app
        .harness
        .pipes
        .load(WS, "asana:users")
        .await
        .unwrap()
        .unwrap();
    let auth = app
        .harness
        .authorizations
        .load(WS, pipes::integrations::Vendor::Asana)
        .await
        .unwrap();
    app.harness
        .executor
        .sync()
        .fetch_users(&pipe, &auth)
        .await
        .unwrap();

    let (status, body) = send(&app, request("GET", "/api/v1/integrations/asana/users", "")).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_of(&body);
    assert_eq!(body["users"][0]["foreign_id"], "42");
}

#[tokio::test]
async fn users_without_authorization_is_a_bad_request() {
    let app = app().await;

    let (status, body) = send(&app, request("GET", "/api/v1/integrations/asana/users", "")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["code"], "AUTHORIZATION_NOT_FOUND");
}

#[tokio::test]
async fn authorization_is_created_and_deleted() {
    let app = app().await;

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/integrations/asana/authorizations",
            r#"{"code": "abc"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let auth = app
        .harness
        .authorizations
        .load(WS, pipes::integrations::Vendor::Asana)
        .await
        .unwrap();
    assert_eq!(auth.workspace_token, TOKEN);
    assert_eq!(auth.oauth2_token().unwrap().access_token, "access-for-abc");

    let (status, _) = send(
        &app,
        request("DELETE", "/api/v1/integrations/asana/authorizations", ""),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = app().await;
    let request = Request::builder()
        .uri("/openapi.json")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let doc = json_of(&body);
    assert!(doc["paths"]["/api/v1/integrations/{vendor}/pipes/{pipe}/run"].is_object());
    assert!(doc["components"]["securitySchemes"]["api_token"].is_object());
}
