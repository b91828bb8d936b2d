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

//! Sprite rendering: ascending z, hidden skipped, rotation about the
//! object center, the subject drawn after objects sharing its z so the
//! player stays visible.

use macroquad::color::WHITE;
use macroquad::math::vec2;
use macroquad::texture::{draw_texture_ex, DrawTextureParams};

use pixelport_core::{Game, Object};

use crate::images::ImageCache;

/// Stable draw order for one frame: objects ascending by z (ties broken by
/// id), the subject after every object with its z.
pub fn draw_order(game: &Game) -> Vec<&Object> {
    let mut objects: Vec<&Object> = game.objects.values().collect();
    objects.sort_by(|a, b| a.z.cmp(&b.z).then_with(|| a.id.cmp(&b.id)));

    let mut ordered = Vec::with_capacity(objects.len() + 1);
    let mut subject_placed = false;
    for object in objects {
        if !subject_placed && object.z > game.subject.z {
            ordered.push(&game.subject);
            subject_placed = true;
        }
        ordered.push(object);
    }
    if !subject_placed {
        ordered.push(&game.subject);
    }
    ordered
}

/// Draw one frame.
pub fn draw_game(game: &Game, cache: &ImageCache) {
    for object in draw_order(game) {
        if object.hidden {
            continue;
        }
        let Some(image) = game.images.get(&object.image) else {
            continue;
        };
        let texture = cache.get(image);
        draw_texture_ex(
            &texture,
            object.x as f32,
            object.y as f32,
            WHITE,
            DrawTextureParams {
                dest_size: Some(vec2(object.w as f32, object.h as f32)),
                rotation: (object.r as f32).to_radians(),
                ..Default::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use chrono::Utc;
    use pixelport_core::{GameSource, GameStatus, Image};
    use std::collections::HashMap;

    fn object(id: &str, z: i64) -> Object {
        Object {
            id: id.into(),
            name: String::new(),
            hidden: false,
            x: 0,
            y: 0,
            z,
            w: 8,
            h: 8,
            r: 0,
            image: "p".into(),
            data: serde_json::Value::Null,
        }
    }

    fn game_with(objects: Vec<Object>, subject_z: i64) -> Game {
        let image = Image {
            id: "p".into(),
            name: "p".into(),
            data: base64::engine::general_purpose::STANDARD.encode(b"x"),
            w: 8,
            h: 8,
        };
        let mut subject = object("player", subject_z);
        subject.id = "player".into();
        Game {
            id: "g".into(),
            account_id: "a".into(),
            public: false,
            name: "g".into(),
            version: 1,
            description: String::new(),
            debug: false,
            w: 800,
            h: 600,
            status: GameStatus::Active,
            status_data: serde_json::Value::Null,
            subject,
            objects: objects.into_iter().map(|o| (o.id.clone(), o)).collect(),
            images: HashMap::from([("p".to_string(), image)]),
            script: String::new(),
            source: GameSource::App,
            commit_hash: String::new(),
            tags: Vec::new(),
            prompts: None,
            data: serde_json::Value::Null,
            previous_id: None,
            created_at: Utc::now(),
            created_by: "sys".into(),
            updated_at: Utc::now(),
            updated_by: "sys".into(),
        }
    }

    #[test]
    fn order_is_ascending_z_with_subject_last_in_its_layer() {
        let game = game_with(
            vec![object("a", 0), object("b", 1), object("c", 2)],
            1,
        );
        let ids: Vec<&str> = draw_order(&game).iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "player", "c"]);
    }

    #[test]
    fn subject_draws_last_when_topmost() {
        let game = game_with(vec![object("a", 0)], 5);
        let ids: Vec<&str> = draw_order(&game).iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "player"]);
    }

    #[test]
    fn ties_break_by_id_for_determinism() {
        let game = game_with(vec![object("b", 0), object("a", 0)], 3);
        let ids: Vec<&str> = draw_order(&game).iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "player"]);
    }
}
