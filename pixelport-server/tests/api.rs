// Copyright 2025 Pixelport (https://github.com/pixelport)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! End-to-end API scenarios driven through the router.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use pixelport_cache::{memory::MemoryCache, CacheClient};
use pixelport_core::{Error, Result as CoreResult};
use pixelport_server::api::{self, AppState};
use pixelport_server::auth::{self, RateLimiter};
use pixelport_server::config::ServerConfig;
use pixelport_server::prompt::{AiRequest, PromptClient, PromptPipeline};
use pixelport_store::{Store, StoreConfig};

/// Mock AI whose next response is set by each test step.
#[derive(Default)]
struct ScriptedClient {
    next: Mutex<Option<CoreResult<String>>>,
}

impl ScriptedClient {
    fn respond_with(&self, response: &str) {
        *self.next.lock().unwrap() = Some(Ok(response.to_string()));
    }
}

#[async_trait]
impl PromptClient for ScriptedClient {
    async fn complete(&self, _request: AiRequest) -> CoreResult<String> {
        self.next
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(Error::server("no scripted response")))
    }
}

struct Harness {
    router: Router,
    ai: Arc<ScriptedClient>,
    _dir: tempfile::TempDir,
}

async fn harness(maintenance: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.store.database = dir.path().join("api.db").display().to_string();
    config.server.maintenance = maintenance;

    let cache = Arc::new(CacheClient::with_backend(Arc::new(MemoryCache::new(4096))));
    let store = Store::connect(config.store.clone(), cache.clone())
        .await
        .unwrap();
    auth::bootstrap(&store, &config.auth).await.unwrap();

    let ai = Arc::new(ScriptedClient::default());
    let pipeline = Arc::new(PromptPipeline::new(
        store.clone(),
        ai.clone(),
        config.prompt.clone(),
    ));

    let state = AppState {
        store,
        cache,
        limiter: Arc::new(RateLimiter::new(&config.auth.rate_limit)),
        pipeline,
        config: Arc::new(config),
        started_at: Instant::now(),
    };
    Harness {
        router: api::router(state),
        ai,
        _dir: dir,
    }
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

async fn login(router: &Router, scope: &str) -> String {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/login/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "username=admin&password=admin&scope={}",
            scope.replace(' ', "+")
        )))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    json["access_token"].as_str().unwrap().to_string()
}

fn game_body(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "subject": {
            "id": "p", "name": "player", "hidden": false,
            "x": 10, "y": 10, "z": 1, "w": 16, "h": 16, "r": 0,
            "image": "p", "data": null
        },
        "images": {
            "p": {"id": "p", "name": "player", "data": "cG5n", "w": 16, "h": 16}
        }
    })
}

#[tokio::test]
async fn auth_and_read_self() {
    let h = harness(false).await;

    let token = login(&h.router, "account:read").await;
    let (status, account) =
        send(&h.router, Method::GET, "/api/v1/account", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["name"], "default");
    // The AI credential never leaves the service.
    assert!(account.get("ai_api_key").is_none());
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let h = harness(false).await;
    let (status, envelope) = send(&h.router, Method::GET, "/api/v1/account", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["code"], "InvalidHeader");

    let (status, envelope) =
        send(&h.router, Method::GET, "/api/v1/account", Some("bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(envelope["code"], "Unauthorized");
}

#[tokio::test]
async fn scope_is_enforced() {
    let h = harness(false).await;
    let token = login(&h.router, "account:read").await;
    let (status, envelope) = send(
        &h.router,
        Method::GET,
        "/api/v1/games",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(envelope["code"], "Forbidden");
}

#[tokio::test]
async fn game_limit_forbids_second_game() {
    let h = harness(false).await;
    let token = login(&h.router, "account:admin games:write").await;

    let (status, _) = send(
        &h.router,
        Method::POST,
        "/api/v1/account",
        Some(&token),
        Some(serde_json::json!({ "game_limit": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &h.router,
        Method::POST,
        "/api/v1/games",
        Some(&token),
        Some(game_body("g1")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, envelope) = send(
        &h.router,
        Method::POST,
        "/api/v1/games",
        Some(&token),
        Some(game_body("g2")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(envelope["code"], "Forbidden");
}

#[tokio::test]
async fn prompt_undo_redo_cycle() {
    let h = harness(false).await;
    let admin = login(&h.router, "account:admin games:read games:write").await;

    // The account needs an AI credential for the pipeline.
    let (status, _) = send(
        &h.router,
        Method::POST,
        "/api/v1/account",
        Some(&admin),
        Some(serde_json::json!({ "ai_api_key": "sk-test" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, h1) = send(
        &h.router,
        Method::POST,
        "/api/v1/games",
        Some(&admin),
        Some(game_body("g1")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let h1_id = h1["id"].as_str().unwrap().to_string();
    let h1_w = h1["subject"]["w"].as_i64().unwrap();

    // Scenario: the AI doubles the subject width.
    let mut doubled = h1.clone();
    doubled["subject"]["w"] = serde_json::json!(h1_w * 2);
    h.ai.respond_with(&doubled.to_string());

    let (status, h2) = send(
        &h.router,
        Method::POST,
        "/api/v1/games/prompt",
        Some(&admin),
        Some(serde_json::json!({
            "game_id": h1_id,
            "prompt": "double subject width"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h2["previous_id"], h1["id"]);
    assert_eq!(h2["subject"]["w"].as_i64().unwrap(), h1_w * 2);
    assert_eq!(h2["prompts"]["current"]["prompt"], "double subject width");

    // The old head stays active and reachable.
    let (status, old) = send(
        &h.router,
        Method::GET,
        &format!("/api/v1/games/{h1_id}"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(old["id"], h2["id"]); // resolves to the chain head

    // Undo: head becomes H1 again.
    let (status, head) = send(
        &h.router,
        Method::POST,
        "/api/v1/games/undo",
        Some(&admin),
        Some(serde_json::json!({ "game_id": h1_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(head["id"], h1["id"]);

    // A second undo has nothing to expose.
    let (status, envelope) = send(
        &h.router,
        Method::POST,
        "/api/v1/games/undo",
        Some(&admin),
        Some(serde_json::json!({ "game_id": h1_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(envelope["code"], "NotFound");

    // Redo: head becomes H2 again.
    let (status, head) = send(
        &h.router,
        Method::POST,
        "/api/v1/games/undo",
        Some(&admin),
        Some(serde_json::json!({ "game_id": h1_id, "action": "redo" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(head["id"], h2["id"]);
    assert_eq!(head["status"], "active");
}

#[tokio::test]
async fn prompt_validation_failure_keeps_head() {
    let h = harness(false).await;
    let admin = login(&h.router, "account:admin games:read games:write").await;
    send(
        &h.router,
        Method::POST,
        "/api/v1/account",
        Some(&admin),
        Some(serde_json::json!({ "ai_api_key": "sk-test" })),
    )
    .await;

    let (_, h1) = send(
        &h.router,
        Method::POST,
        "/api/v1/games",
        Some(&admin),
        Some(game_body("g1")),
    )
    .await;
    let h1_id = h1["id"].as_str().unwrap().to_string();

    // The AI returns a document with a dangling image reference.
    let mut broken = h1.clone();
    broken["subject"]["image"] = serde_json::json!("ghost");
    h.ai.respond_with(&broken.to_string());

    let (status, envelope) = send(
        &h.router,
        Method::POST,
        "/api/v1/games/prompt",
        Some(&admin),
        Some(serde_json::json!({ "game_id": h1_id, "prompt": "break" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["code"], "InvalidRequest");

    // No new version; the head carries the recorded error.
    let (_, head) = send(
        &h.router,
        Method::GET,
        &format!("/api/v1/games/{h1_id}"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(head["id"], h1["id"]);
    assert_eq!(head["status"], "active");
    assert!(head["prompts"]["error"].is_object());
}

#[tokio::test]
async fn maintenance_blocks_mutations() {
    let h = harness(true).await;
    let token = login(&h.router, "games:read games:write").await;

    // Reads still work.
    let (status, _) = send(&h.router, Method::GET, "/api/v1/games", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, envelope) = send(
        &h.router,
        Method::POST,
        "/api/v1/games",
        Some(&token),
        Some(game_body("g1")),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(envelope["code"], "Maintenance");
    assert!(envelope["data"]["retry_after_secs"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn put_with_stale_if_match_conflicts() {
    let h = harness(false).await;
    let token = login(&h.router, "games:read games:write").await;
    let (_, game) = send(
        &h.router,
        Method::POST,
        "/api/v1/games",
        Some(&token),
        Some(game_body("g1")),
    )
    .await;
    let id = game["id"].as_str().unwrap();

    let request = Request::builder()
        .method(Method::PUT)
        .uri(format!("/api/v1/games/{id}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("If-Match", "2001-01-01T00:00:00+00:00")
        .body(Body::from(game_body("g1").to_string()))
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn tags_and_copy_round_trip() {
    let h = harness(false).await;
    let token = login(
        &h.router,
        "games:read games:write resource:read resource:write",
    )
    .await;

    let (_, game) = send(
        &h.router,
        Method::POST,
        "/api/v1/games",
        Some(&token),
        Some(game_body("g1")),
    )
    .await;
    let id = game["id"].as_str().unwrap().to_string();

    let (status, tags) = send(
        &h.router,
        Method::POST,
        &format!("/api/v1/games/{id}/tags"),
        Some(&token),
        Some(serde_json::json!({ "tags": ["genre:puzzle"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tags, serde_json::json!(["genre:puzzle"]));

    let (status, copy) = send(
        &h.router,
        Method::POST,
        "/api/v1/games/copy",
        Some(&token),
        Some(serde_json::json!({ "game_id": id, "name": "g1-copy" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(copy["name"], "g1-copy");
    assert!(copy.get("previous_id").is_none());
}
