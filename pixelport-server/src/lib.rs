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

pub mod api;
pub mod auth;
pub mod config;
pub mod import;
pub mod prompt;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixelport_cache::CacheClient;
use pixelport_store::Store;

use api::AppState;
use auth::RateLimiter;
use config::ServerConfig;
use prompt::{AnthropicClient, PromptPipeline};

pub async fn run_server(config: ServerConfig) -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixelport_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Pixelport Server");
    config.validate()?;
    api::set_server_name(&config.server.name);

    // Cache layer, then the store reading through it.
    let cache = Arc::new(CacheClient::connect(&config.cache).await?);
    let store = Store::connect(config.store.clone(), cache.clone()).await?;
    auth::bootstrap(&store, &config.auth).await?;

    // Prompt pipeline with the production AI client.
    let ai_client = Arc::new(AnthropicClient::new(&config.prompt)?);
    let pipeline = Arc::new(PromptPipeline::new(
        store.clone(),
        ai_client,
        config.prompt.clone(),
    ));

    // Background workers, stopped through the shutdown channel.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let import_worker = tokio::spawn(import::run_import_loop(
        store.clone(),
        config.import.clone(),
        shutdown_rx.clone(),
    ));
    let reconciler = tokio::spawn(prompt::run_reconciler(
        store.clone(),
        config.prompt.clone(),
        shutdown_rx,
    ));

    let state = AppState {
        store,
        cache,
        limiter: Arc::new(RateLimiter::new(&config.auth.rate_limit)),
        pipeline,
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    let mut router = api::router(state).layer(TraceLayer::new_for_http());
    if config.server.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!(addr = %config.server.listen_addr, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await?;

    // Unwind the workers.
    let _ = shutdown_tx.send(true);
    import_worker.abort();
    reconciler.abort();
    Ok(())
}
