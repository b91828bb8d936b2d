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

//! Account routes. Callers always operate on their own account.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use pixelport_core::{Account, AccountPatch};

use crate::api::{ApiError, AppState, Procedure};
use crate::auth::AuthContext;

/// The AI credential never leaves the service.
fn sanitize(mut account: Account) -> Account {
    account.ai_api_key.clear();
    account
}

/// GET /api/v1/account (scope account:read)
pub async fn get_account(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("account:read").procedure("get_account")?;
    let account = state
        .store
        .get_account(&context.account_id)
        .await
        .procedure("get_account")?;
    Ok(Json(sanitize(account)))
}

/// POST /api/v1/account (scope account:admin)
///
/// Applies a tolerant patch to the caller's account; a tolerant patch is
/// also how the account is (re)configured after bootstrap.
pub async fn post_account(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(patch): Json<AccountPatch>,
) -> Result<impl IntoResponse, ApiError> {
    context.require("account:admin").procedure("post_account")?;
    let account = state
        .store
        .update_account(&context.account_id, patch, &context.user_id)
        .await
        .procedure("post_account")?;
    Ok(Json(sanitize(account)))
}
