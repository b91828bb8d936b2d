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

//! Game routes: search, CRUD on the chain head, tags, copy, AI prompt, and
//! undo/redo. Mutations on a chain take the per-game lock for the duration
//! of load, validate, and write.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;

use pixelport_core::{
    game, Error, Game, GamePatch, GameSource, GameStatus, Image, Object,
};

use crate::api::{ApiError, AppState, Procedure};
use crate::auth::AuthContext;
use crate::prompt::PromptRequest;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub skip: i64,
    #[serde(default)]
    pub sort: String,
}

/// Creation/replacement payload: the caller owns the content fields,
/// the service assigns identity, provenance, and audit fields.
#[derive(Debug, Deserialize)]
pub struct GameDocument {
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_w")]
    pub w: i64,
    #[serde(default = "default_h")]
    pub h: i64,
    pub subject: Object,
    #[serde(default)]
    pub objects: HashMap<String, Object>,
    #[serde(default)]
    pub images: HashMap<String, Image>,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn default_w() -> i64 {
    game::DEFAULT_CANVAS_W
}

fn default_h() -> i64 {
    game::DEFAULT_CANVAS_H
}

impl GameDocument {
    fn into_game(self, account_id: &str, created_by: &str) -> Game {
        let now = Utc::now();
        Game {
            id: String::new(),
            account_id: account_id.to_string(),
            public: self.public,
            name: self.name,
            version: 0,
            description: self.description,
            debug: self.debug,
            w: self.w,
            h: self.h,
            status: GameStatus::Active,
            status_data: serde_json::Value::Null,
            subject: self.subject,
            objects: self.objects,
            images: self.images,
            script: self.script,
            source: GameSource::App,
            commit_hash: String::new(),
            tags: self.tags,
            prompts: None,
            data: self.data,
            previous_id: None,
            created_at: now,
            created_by: created_by.to_string(),
            updated_at: now,
            updated_by: created_by.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CopyRequest {
    pub game_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UndoRequest {
    pub game_id: String,
    /// `"undo"` (default) or `"redo"`.
    #[serde(default)]
    pub action: String,
}

/// GET /api/v1/games (scope games:read)
pub async fn search_games(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:read").procedure("search_games")?;
    let games = state
        .store
        .search_games(
            &context.account_id,
            &params.search,
            params.size,
            params.skip,
            &params.sort,
        )
        .await
        .procedure("search_games")?;
    Ok(Json(games))
}

/// POST /api/v1/games (scope games:write)
pub async fn create_game(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(doc): Json<GameDocument>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:write").procedure("create_game")?;
    let game = state
        .store
        .create_game(
            doc.into_game(&context.account_id, &context.user_id),
            &context.user_id,
        )
        .await
        .procedure("create_game")?;
    Ok((StatusCode::CREATED, Json(game)))
}

/// GET /api/v1/games/:id (scope games:read)
pub async fn get_game(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:read").procedure("get_game")?;
    let game = state
        .store
        .get_game(&context.account_id, &id)
        .await
        .procedure("get_game")?;
    Ok(Json(game))
}

/// PATCH /api/v1/games/:id (scope games:write)
pub async fn patch_game(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(patch): Json<GamePatch>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:write").procedure("patch_game")?;
    let guard = state.store.lock_game(&id).await;
    let result = state
        .store
        .update_game(&context.account_id, &id, patch, &context.user_id)
        .await;
    drop(guard);
    state.store.game_locks().retire(&id);
    Ok(Json(result.procedure("patch_game")?))
}

/// PUT /api/v1/games/:id (scope games:write)
///
/// The runtime's sync worker sends `If-Match` with the `updated_at` it
/// last saw; a mismatch is a conflict, not a lost update.
pub async fn put_game(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(doc): Json<GameDocument>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:write").procedure("put_game")?;
    let replacement = doc.into_game(&context.account_id, &context.user_id);
    let guard = state.store.lock_game(&id).await;
    let result = async {
        if let Some(expected) = headers.get("if-match").and_then(|v| v.to_str().ok()) {
            let head = state.store.get_game(&context.account_id, &id).await?;
            if head.updated_at.to_rfc3339() != expected {
                return Err(Error::conflict(format!(
                    "game {id:?} was updated at {}, not {expected:?}",
                    head.updated_at.to_rfc3339()
                )));
            }
        }
        state
            .store
            .replace_game(&context.account_id, &id, replacement, &context.user_id)
            .await
    }
    .await;
    drop(guard);
    state.store.game_locks().retire(&id);
    Ok(Json(result.procedure("put_game")?))
}

/// DELETE /api/v1/games/:id (scope games:write)
pub async fn delete_game(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:write").procedure("delete_game")?;
    let guard = state.store.lock_game(&id).await;
    let result = state.store.delete_game(&context.account_id, &id).await;
    drop(guard);
    state.store.game_locks().retire(&id);
    result.procedure("delete_game")?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/games/:id/tags (scope resource:read)
pub async fn get_tags(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("resource:read").procedure("get_tags")?;
    let tags = state
        .store
        .list_game_tags(&context.account_id, &id)
        .await
        .procedure("get_tags")?;
    Ok(Json(tags))
}

/// POST /api/v1/games/:id/tags (scope resource:write)
pub async fn post_tags(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(request): Json<TagsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("resource:write").procedure("post_tags")?;
    let tags = state
        .store
        .add_game_tags(&context.account_id, &id, &request.tags, &context.user_id)
        .await
        .procedure("post_tags")?;
    Ok(Json(tags))
}

/// DELETE /api/v1/games/:id/tags (scope resource:write)
pub async fn delete_tags(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(request): Json<TagsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("resource:write").procedure("delete_tags")?;
    let tags = state
        .store
        .delete_game_tags(&context.account_id, &id, &request.tags, &context.user_id)
        .await
        .procedure("delete_tags")?;
    Ok(Json(tags))
}

/// POST /api/v1/games/copy (scope games:write)
pub async fn copy_game(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<CopyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:write").procedure("copy_game")?;
    if request.name.is_empty() {
        return Err(ApiError::new(
            "copy_game",
            Error::invalid_request("copy needs a new name"),
        ));
    }
    let game = state
        .store
        .copy_game(
            &context.account_id,
            &request.game_id,
            &request.name,
            &context.user_id,
        )
        .await
        .procedure("copy_game")?;
    Ok((StatusCode::CREATED, Json(game)))
}

/// POST /api/v1/games/prompt (scope games:write)
pub async fn prompt_game(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<PromptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:write").procedure("prompt_game")?;
    let game = state
        .pipeline
        .submit(&context, request)
        .await
        .procedure("prompt_game")?;
    Ok(Json(game))
}

/// POST /api/v1/games/undo (scope games:write)
pub async fn undo_game(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<UndoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("games:write").procedure("undo_game")?;
    let guard = state.store.lock_game(&request.game_id).await;
    let result = match request.action.as_str() {
        "" | "undo" => {
            state
                .store
                .undo_game(&context.account_id, &request.game_id)
                .await
        }
        "redo" => {
            state
                .store
                .redo_game(&context.account_id, &request.game_id)
                .await
        }
        other => Err(Error::invalid_request(format!(
            "unknown undo action {other:?}"
        ))),
    };
    drop(guard);
    state.store.game_locks().retire(&request.game_id);
    Ok(Json(result.procedure("undo_game")?))
}
