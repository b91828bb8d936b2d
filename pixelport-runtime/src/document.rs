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

//! Game document loading: a local file everywhere, the backend's game
//! endpoint on native builds.

use anyhow::{Context, Result};

use pixelport_core::Game;

/// Parse a serialized game document and check its internal invariants.
pub fn parse(raw: &str) -> Result<Game> {
    let game: Game = serde_json::from_str(raw).context("game document is not valid JSON")?;
    game.validate(0)
        .map_err(|e| anyhow::anyhow!("game document is invalid: {e}"))?;
    Ok(game)
}

/// True when the source names a backend endpoint rather than a file.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Fetch a game from the backend (native only).
#[cfg(not(target_arch = "wasm32"))]
pub fn fetch(url: &str, token: Option<&str>) -> Result<Game> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().context("game fetch failed")?;
    anyhow::ensure!(
        response.status().is_success(),
        "game fetch returned {}",
        response.status()
    );
    let raw = response.text()?;
    parse(&raw)
}
