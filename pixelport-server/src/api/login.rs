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

//! The OAuth2 password-grant token endpoint.

use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::{Form, Json};
use std::net::SocketAddr;

use crate::api::{ApiError, AppState, Procedure};
use crate::auth::{issue_token, TokenRequest};

/// POST /api/v1/login/token (form: username, password, scope)
pub async fn token(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Form(request): Form<TokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    state.limiter.check(&client).procedure("login_token")?;

    let response = issue_token(&state.store, &state.cache, &state.config.auth, &request)
        .await
        .procedure("login_token")?;
    Ok(Json(response))
}
