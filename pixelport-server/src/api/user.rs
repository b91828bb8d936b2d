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

//! User routes. Callers read and update themselves; tolerant fields are
//! the only update mechanism, so PATCH and PUT share one path.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use pixelport_core::UserPatch;

use crate::api::{ApiError, AppState, Procedure};
use crate::auth::AuthContext;

/// GET /api/v1/user (scope user:read)
pub async fn get_user(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("user:read").procedure("get_user")?;
    let user = state
        .store
        .get_user(&context.user_id)
        .await
        .procedure("get_user")?;
    Ok(Json(user))
}

/// PATCH /api/v1/user (scope user:write)
pub async fn patch_user(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(patch): Json<UserPatch>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("user:write").procedure("patch_user")?;
    let user = state
        .store
        .update_user(&context.user_id, patch, &context.user_id)
        .await
        .procedure("patch_user")?;
    Ok(Json(user))
}

/// PUT /api/v1/user (scope user:write)
pub async fn put_user(
    state: State<AppState>,
    context: Extension<AuthContext>,
    patch: Json<UserPatch>,
) -> Result<impl IntoResponse, ApiError> {
    patch_user(state, context, patch).await
}
