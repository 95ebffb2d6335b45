//! Shared test fixtures: unique temp dirs and an in-process stub of the
//! household API served by axum on an ephemeral localhost port.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde_json::{Value, json};

use crate::config::{ClientConfig, Timeouts};
use crate::net::api::ApiClient;
use crate::net::types::Identity;
use crate::storage::MemoryStorage;

pub const SESSION_COOKIE: &str = "sid=abc123";

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn unique_temp_dir(label: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("household-test-{label}-{}-{n}", std::process::id()))
}

pub fn test_config(base_url: &str) -> ClientConfig {
    ClientConfig {
        base_url: base_url.to_owned(),
        storage_dir: unique_temp_dir("cfg"),
        timeouts: Timeouts { request: Some(Duration::from_secs(10)), connect: Some(Duration::from_secs(5)) },
    }
}

pub fn test_client(base_url: &str) -> (ApiClient, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let client = ApiClient::new(&test_config(base_url), storage.clone()).unwrap();
    (client, storage)
}

pub fn maru() -> Identity {
    Identity { id: 1, email: "a@b.com".into(), name: "maru".into(), family_id: "f1".into() }
}

/// Serve `router` on `127.0.0.1:0` and return its base URL.
pub async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

// =============================================================================
// REQUEST CAPTURE
// =============================================================================

/// Headers and body of one request as the stub saw it.
#[derive(Clone, Debug, Default)]
pub struct SeenRequest {
    pub path: String,
    pub content_type: Option<String>,
    pub cookie: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

pub type SeenLog = Arc<Mutex<Vec<SeenRequest>>>;

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

pub fn record(log: &SeenLog, path: &str, headers: &HeaderMap, body: &str) {
    let seen = SeenRequest {
        path: path.to_owned(),
        content_type: header_str(headers, CONTENT_TYPE),
        cookie: header_str(headers, COOKIE),
        headers: headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_owned(), v.to_owned())))
            .collect(),
        body: body.to_owned(),
    };
    log.lock().unwrap().push(seen);
}

fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(';').any(|pair| pair.trim() == SESSION_COOKIE))
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, axum::Json(json!({ "message": text }))).into_response()
}

// =============================================================================
// STUB API
// =============================================================================

/// Stub of the household API.
///
/// - `POST /api/login`: `a@b.com` / `x` succeeds and sets the session cookie.
/// - `POST /api/register`: `taken@b.com` conflicts; otherwise echoes an identity.
/// - `POST /api/logout`: requires the session cookie, then expires it.
/// - `GET /api/me`: requires the session cookie.
/// - `DELETE /api/items/{id}`: 204 with an empty body.
pub fn stub_api(log: SeenLog) -> Router {
    let login_log = log.clone();
    let register_log = log.clone();
    let logout_log = log.clone();
    let me_log = log;

    Router::new()
        .route(
            "/api/login",
            post(move |headers: HeaderMap, body: String| async move {
                record(&login_log, "/api/login", &headers, &body);
                let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                if parsed["email"] == "a@b.com" && parsed["password"] == "x" {
                    let cookie = format!("{SESSION_COOKIE}; Path=/; HttpOnly");
                    ([(SET_COOKIE, cookie)], axum::Json(json!(maru()))).into_response()
                } else {
                    message(StatusCode::UNAUTHORIZED, "invalid credentials")
                }
            }),
        )
        .route(
            "/api/register",
            post(move |headers: HeaderMap, body: String| async move {
                record(&register_log, "/api/register", &headers, &body);
                let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                if parsed["email"] == "taken@b.com" {
                    return message(StatusCode::CONFLICT, "Email already exists");
                }
                let identity = json!({
                    "id": 2,
                    "email": parsed["email"],
                    "name": parsed["name"],
                    "familyId": parsed.get("familyId").cloned().unwrap_or_else(|| json!("new-family")),
                });
                let cookie = format!("{SESSION_COOKIE}; Path=/; HttpOnly");
                (StatusCode::CREATED, [(SET_COOKIE, cookie)], axum::Json(identity)).into_response()
            }),
        )
        .route(
            "/api/logout",
            post(move |headers: HeaderMap, body: String| async move {
                record(&logout_log, "/api/logout", &headers, &body);
                if !has_session(&headers) {
                    return message(StatusCode::UNAUTHORIZED, "Not authenticated");
                }
                ([(SET_COOKIE, "sid=; Path=/; Max-Age=0")], StatusCode::OK).into_response()
            }),
        )
        .route(
            "/api/me",
            get(move |headers: HeaderMap| async move {
                record(&me_log, "/api/me", &headers, "");
                if has_session(&headers) {
                    axum::Json(json!(maru())).into_response()
                } else {
                    message(StatusCode::UNAUTHORIZED, "Not authenticated")
                }
            }),
        )
        .route("/api/items/{id}", delete(|| async { StatusCode::NO_CONTENT }))
}
