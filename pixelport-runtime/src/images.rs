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

//! Decoded bitmap cache.
//!
//! Decoding is lazy (first draw); eviction is LRU under a byte cap, with
//! every access counting as a use. A decode failure renders a visible
//! placeholder and logs once per image id.

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use macroquad::texture::{FilterMode, Texture2D};
use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::warn;

use pixelport_core::Image;

struct CachedTexture {
    texture: Texture2D,
    bytes: u32,
}

pub struct ImageCache {
    textures: Cache<String, Arc<CachedTexture>>,
    placeholder: Texture2D,
    failed: Mutex<HashSet<String>>,
}

impl ImageCache {
    /// `max_bytes` caps the decoded bitmap memory held at once.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            textures: Cache::builder()
                .max_capacity(max_bytes)
                .weigher(|_key, value: &Arc<CachedTexture>| value.bytes)
                .build(),
            placeholder: placeholder_texture(),
            failed: Mutex::new(HashSet::new()),
        }
    }

    /// Fetch the decoded texture for an image, decoding on first use.
    /// Failures yield the placeholder.
    pub fn get(&self, image: &Image) -> Texture2D {
        if let Some(cached) = self.textures.get(&image.id) {
            return cached.texture.clone();
        }
        match decode(image) {
            Ok((texture, bytes)) => {
                self.textures.insert(
                    image.id.clone(),
                    Arc::new(CachedTexture {
                        texture: texture.clone(),
                        bytes,
                    }),
                );
                texture
            }
            Err(reason) => {
                let mut failed = self.failed.lock();
                if failed.insert(image.id.clone()) {
                    warn!(image_id = %image.id, reason = %reason, "image decode failed");
                }
                self.placeholder.clone()
            }
        }
    }

    /// Drop cached state for a reloaded game.
    pub fn clear(&self) {
        self.textures.invalidate_all();
        self.failed.lock().clear();
    }
}

fn decode(image: &Image) -> Result<(Texture2D, u32), String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&image.data)
        .map_err(|e| format!("invalid base64: {e}"))?;

    if looks_like_svg(&bytes) {
        // Vector assets carry their pixel size in the document; rasterizing
        // them is not supported, so they render as placeholders.
        return Err("svg rasterization not supported".to_string());
    }

    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| format!("decode failed: {e}"))?
        .to_rgba8();
    let (w, h) = decoded.dimensions();
    let texture = Texture2D::from_rgba8(w as u16, h as u16, &decoded);
    texture.set_filter(FilterMode::Nearest);
    Ok((texture, w * h * 4))
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head: &[u8] = &bytes[..bytes.len().min(256)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let trimmed = text.trim_start();
    trimmed.starts_with("<svg") || trimmed.starts_with("<?xml")
}

/// A loud magenta/black checker so a broken asset is unmissable.
fn placeholder_texture() -> Texture2D {
    const SIZE: usize = 8;
    let mut pixels = Vec::with_capacity(SIZE * SIZE * 4);
    for y in 0..SIZE {
        for x in 0..SIZE {
            if (x / 2 + y / 2) % 2 == 0 {
                pixels.extend_from_slice(&[255, 0, 255, 255]);
            } else {
                pixels.extend_from_slice(&[0, 0, 0, 255]);
            }
        }
    }
    let texture = Texture2D::from_rgba8(SIZE as u16, SIZE as u16, &pixels);
    texture.set_filter(FilterMode::Nearest);
    texture
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn svg_detection() {
        assert!(looks_like_svg(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>"));
        assert!(looks_like_svg(b"  <?xml version=\"1.0\"?><svg/>"));
        assert!(!looks_like_svg(&[0x89, b'P', b'N', b'G']));
    }
}
