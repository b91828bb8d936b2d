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

//! Service health endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::atomic::Ordering;

use pixelport_cache::CacheStats;

use crate::api::{AppState, CANCELED_REQUESTS};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub maintenance: bool,
    pub storage: StorageHealth,
    pub cache: CacheStats,
    pub canceled_requests: u64,
}

#[derive(Debug, Serialize)]
pub struct StorageHealth {
    pub reachable: bool,
}

/// GET /api/v1/health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_reachable = state.store.ping().await.is_ok();

    let health = HealthResponse {
        status: if storage_reachable { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        maintenance: state.config.server.maintenance,
        storage: StorageHealth {
            reachable: storage_reachable,
        },
        cache: state.cache.stats(),
        canceled_requests: CANCELED_REQUESTS.load(Ordering::Relaxed),
    };

    let status = if storage_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}
