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

use clap::Parser;
use macroquad::color::{BLACK, GREEN, RED};
use macroquad::text::draw_text;
use macroquad::time::get_fps;
use macroquad::window::{clear_background, next_frame, request_new_screen_size, Conf};
use tracing::{error, info, warn};

use pixelport_core::GameStatus;
use pixelport_runtime::images::ImageCache;
use pixelport_runtime::script::{ScriptHost, ScriptLimits};
use pixelport_runtime::state::World;
use pixelport_runtime::{document, input, render};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Game document: a file path, or a backend game URL on native builds
    #[arg(default_value = "game.json")]
    game: String,

    /// Backend endpoint for state sync (PUT per sync interval)
    #[arg(long, env = "PIXELPORT_API_URL")]
    api_url: Option<String>,

    /// Bearer token for fetch and sync
    #[arg(long, env = "PIXELPORT_API_TOKEN")]
    api_token: Option<String>,

    /// Frames between sync snapshots
    #[arg(long, default_value_t = 60)]
    sync_frames: u64,

    /// Decoded image cache cap in megabytes
    #[arg(long, default_value_t = 256)]
    image_cache_mb: u64,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Pixelport".to_string(),
        window_width: pixelport_core::game::DEFAULT_CANVAS_W as i32,
        window_height: pixelport_core::game::DEFAULT_CANVAS_H as i32,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pixelport_runtime=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut game = match load_game(&args).await {
        Ok(game) => game,
        Err(e) => {
            error!("could not load game: {e:#}");
            return;
        }
    };
    request_new_screen_size(game.w as f32, game.h as f32);
    info!(game = %game.name, version = game.version, "game loaded");

    // The script is optional; a game without one is a static scene.
    let host = match game.decode_script() {
        Ok(source) if !source.trim().is_empty() => {
            match ScriptHost::new(&source, ScriptLimits::default()) {
                Ok(host) => Some(host),
                Err(e) => {
                    warn!("script rejected: {e}");
                    fail(&mut game, &e.to_string());
                    None
                }
            }
        }
        Ok(_) => None,
        Err(e) => {
            warn!("script undecodable: {e}");
            fail(&mut game, &e.message);
            None
        }
    };

    let images = ImageCache::new(args.image_cache_mb << 20);

    #[cfg(not(target_arch = "wasm32"))]
    let sync = args.api_url.as_ref().map(|url| {
        pixelport_runtime::sync::SyncWorker::start(
            url.clone(),
            args.api_token.clone().unwrap_or_default(),
            4,
        )
    });

    let mut frame: u64 = 0;
    loop {
        // Input, update, draw, sync; fixed order every frame.
        let keys = input::held_keys();

        if game.status != GameStatus::Error {
            if let Some(host) = &host {
                match host.update(&World::from_game(&game, keys)) {
                    Ok(world) => world.apply_to(&mut game),
                    Err(e) => {
                        // Side effects of the failed frame are discarded.
                        warn!("script error: {e}");
                        fail(&mut game, &e.to_string());
                    }
                }
            }
        }

        clear_background(BLACK);
        render::draw_game(&game, &images);
        if game.status == GameStatus::Error {
            draw_text("script error - see log", 16.0, 24.0, 24.0, RED);
        } else if game.debug {
            draw_text(&format!("fps {}", get_fps()), 16.0, 24.0, 20.0, GREEN);
        }

        frame += 1;
        #[cfg(not(target_arch = "wasm32"))]
        if let Some(sync) = &sync {
            if frame % args.sync_frames.max(1) == 0 {
                sync.push(&game);
            }
        }

        next_frame().await;
    }
}

fn fail(game: &mut pixelport_core::Game, reason: &str) {
    game.status = GameStatus::Error;
    game.status_data = serde_json::json!({ "error": reason });
}

async fn load_game(args: &Args) -> anyhow::Result<pixelport_core::Game> {
    #[cfg(not(target_arch = "wasm32"))]
    if document::is_url(&args.game) {
        return document::fetch(&args.game, args.api_token.as_deref());
    }
    let raw = macroquad::file::load_string(&args.game)
        .await
        .map_err(|e| anyhow::anyhow!("could not read {}: {e}", args.game))?;
    document::parse(&raw)
}
