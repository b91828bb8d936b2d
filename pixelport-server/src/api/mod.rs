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

//! The versioned HTTP surface under `/api/v1`.
//!
//! Handlers are thin: scope check, decode, one store or pipeline call,
//! encode. Failures travel as the platform error envelope; the HTTP status
//! comes from the deepest error kind. Cancellations from client
//! disconnects are counted, never logged as server errors.

pub mod account;
pub mod games;
pub mod health;
pub mod login;
pub mod user;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, warn};

use pixelport_cache::CacheClient;
use pixelport_core::{Error, ErrorKind};
use pixelport_store::Store;

use crate::auth::{self, RateLimiter};
use crate::config::ServerConfig;
use crate::prompt::PromptPipeline;

/// Server name stamped into error envelopes.
static SERVER_NAME: OnceLock<String> = OnceLock::new();

pub fn set_server_name(name: &str) {
    let _ = SERVER_NAME.set(name.to_string());
}

fn server_name() -> &'static str {
    SERVER_NAME.get().map(String::as_str).unwrap_or("pixelport")
}

/// Count of dropped client cancellations, reported by the health endpoint.
pub static CANCELED_REQUESTS: AtomicU64 = AtomicU64::new(0);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub cache: Arc<CacheClient>,
    pub config: Arc<ServerConfig>,
    pub pipeline: Arc<PromptPipeline>,
    pub limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

/// A platform error bound to the procedure that produced it.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub procedure: &'static str,
}

impl ApiError {
    pub fn new(procedure: &'static str, error: Error) -> Self {
        Self { error, procedure }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.error.is_context() {
            // Client went away or the deadline passed; count and drop.
            CANCELED_REQUESTS.fetch_add(1, Ordering::Relaxed);
            debug!(procedure = self.procedure, "request canceled");
        } else if status.is_server_error() {
            warn!(procedure = self.procedure, error = %self.error, "request failed");
        } else {
            debug!(procedure = self.procedure, error = %self.error, "request refused");
        }

        let envelope = self.error.envelope(self.procedure, server_name());
        (status, Json(envelope)).into_response()
    }
}

/// Attach a procedure name to store/pipeline results.
pub trait Procedure<T> {
    fn procedure(self, name: &'static str) -> Result<T, ApiError>;
}

impl<T> Procedure<T> for Result<T, Error> {
    fn procedure(self, name: &'static str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::new(name, e))
    }
}

/// Bearer authentication: resolve the token to its cached principal and
/// stash it in request extensions.
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError::new(
                "auth",
                Error::new(ErrorKind::InvalidHeader, "missing bearer token"),
            )
        })?;

    let context = auth::authenticate(&state.cache, token)
        .await
        .procedure("auth")?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Maintenance mode: mutating routes return 503 with a retry hint.
async fn maintenance_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.config.server.maintenance && request.method() != Method::GET {
        let retry = state.config.server.maintenance_retry_secs;
        return Err(ApiError::new(
            "maintenance",
            Error::new(ErrorKind::Maintenance, "service is under maintenance")
                .with_data(serde_json::json!({ "retry_after_secs": retry })),
        ));
    }
    Ok(next.run(request).await)
}

/// Build the full `/api/v1` router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/account",
            get(account::get_account).post(account::post_account),
        )
        .route(
            "/user",
            get(user::get_user)
                .patch(user::patch_user)
                .put(user::put_user),
        )
        .route("/games", get(games::search_games).post(games::create_game))
        .route(
            "/games/copy",
            post(games::copy_game),
        )
        .route(
            "/games/prompt",
            post(games::prompt_game),
        )
        .route(
            "/games/undo",
            post(games::undo_game),
        )
        .route(
            "/games/:id",
            get(games::get_game)
                .patch(games::patch_game)
                .put(games::put_game)
                .delete(games::delete_game),
        )
        .route(
            "/games/:id/tags",
            get(games::get_tags)
                .post(games::post_tags)
                .delete(games::delete_tags),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            maintenance_middleware,
        ));

    let public = Router::new()
        .route("/login/token", post(login::token))
        .route("/health", get(health::health_check));

    Router::new()
        .nest("/api/v1", public.merge(protected))
        .with_state(state)
}
