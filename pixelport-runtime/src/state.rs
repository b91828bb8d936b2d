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

//! The script-visible world state and its write-back rules.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use pixelport_core::{Game, Object};

/// Image metadata exposed to scripts; pixel data never crosses the
/// interpreter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub id: String,
    pub name: String,
    pub w: i64,
    pub h: i64,
}

/// The table passed to `Update(game)` each frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    pub subject: Object,
    pub objects: HashMap<String, Object>,
    pub images: HashMap<String, ImageMeta>,
    /// Key codes held this frame, ascending.
    pub keys: Vec<u8>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl World {
    /// Snapshot the script-visible view of a game plus this frame's input.
    pub fn from_game(game: &Game, keys: Vec<u8>) -> Self {
        Self {
            subject: game.subject.clone(),
            objects: game.objects.clone(),
            images: game
                .images
                .iter()
                .map(|(id, image)| {
                    (
                        id.clone(),
                        ImageMeta {
                            id: image.id.clone(),
                            name: image.name.clone(),
                            w: image.w,
                            h: image.h,
                        },
                    )
                })
                .collect(),
            keys,
            data: game.data.clone(),
        }
    }

    /// Write the script's result back into the game. Positions clamp to the
    /// canvas; image references must survive, so an object whose image was
    /// clobbered keeps its old one.
    pub fn apply_to(mut self, game: &mut Game) {
        clamp_object(&mut self.subject, game.w, game.h);
        if !game.images.contains_key(&self.subject.image) {
            self.subject.image = game.subject.image.clone();
        }
        game.subject = self.subject;

        for object in self.objects.values_mut() {
            clamp_object(object, game.w, game.h);
            if !game.images.contains_key(&object.image) {
                if let Some(old) = game.objects.get(&object.id) {
                    object.image = old.image.clone();
                }
            }
        }
        // Scripts may create and destroy objects; ones with unresolvable
        // images are dropped rather than rendered broken.
        self.objects
            .retain(|_, object| game.images.contains_key(&object.image));
        game.objects = self.objects;
        game.data = self.data;
    }
}

fn clamp_object(object: &mut Object, w: i64, h: i64) {
    object.x = object.x.clamp(0, (w - 1).max(0));
    object.y = object.y.clamp(0, (h - 1).max(0));
    object.w = object.w.clamp(0, w);
    object.h = object.h.clamp(0, h);
    object.r = object.r.rem_euclid(360);
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use chrono::Utc;
    use pixelport_core::{GameSource, GameStatus, Image};

    fn test_game() -> Game {
        let image = Image {
            id: "p".into(),
            name: "player".into(),
            data: base64::engine::general_purpose::STANDARD.encode(b"png"),
            w: 16,
            h: 16,
        };
        Game {
            id: "g-1".into(),
            account_id: "a-1".into(),
            public: false,
            name: "g1".into(),
            version: 1,
            description: String::new(),
            debug: false,
            w: 800,
            h: 600,
            status: GameStatus::Active,
            status_data: serde_json::Value::Null,
            subject: Object {
                id: "p".into(),
                name: "player".into(),
                hidden: false,
                x: 10,
                y: 10,
                z: 1,
                w: 16,
                h: 16,
                r: 0,
                image: "p".into(),
                data: serde_json::Value::Null,
            },
            objects: HashMap::new(),
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
    fn world_snapshot_carries_meta_not_bytes() {
        let game = test_game();
        let world = World::from_game(&game, vec![0, 31]);
        assert_eq!(world.keys, vec![0, 31]);
        assert_eq!(world.images["p"].w, 16);
        let encoded = serde_json::to_string(&world).unwrap();
        assert!(!encoded.contains("cG5n"));
    }

    #[test]
    fn write_back_clamps_positions() {
        let mut game = test_game();
        let mut world = World::from_game(&game, Vec::new());
        world.subject.x = -50;
        world.subject.y = 4000;
        world.subject.r = 370;
        world.apply_to(&mut game);
        assert_eq!(game.subject.x, 0);
        assert_eq!(game.subject.y, 599);
        assert_eq!(game.subject.r, 10);
    }

    #[test]
    fn write_back_keeps_resolvable_images() {
        let mut game = test_game();
        let mut world = World::from_game(&game, Vec::new());
        world.subject.image = "ghost".into();
        world.objects.insert(
            "npc".into(),
            Object {
                id: "npc".into(),
                name: String::new(),
                hidden: false,
                x: 1,
                y: 1,
                z: 0,
                w: 8,
                h: 8,
                r: 0,
                image: "ghost".into(),
                data: serde_json::Value::Null,
            },
        );
        world.apply_to(&mut game);
        // The subject keeps its previous image; the new object with an
        // unresolvable image is dropped.
        assert_eq!(game.subject.image, "p");
        assert!(game.objects.is_empty());
    }

    #[test]
    fn write_back_carries_script_data() {
        let mut game = test_game();
        let mut world = World::from_game(&game, Vec::new());
        world.data = serde_json::json!({ "score": 10 });
        world.apply_to(&mut game);
        assert_eq!(game.data["score"], 10);
    }
}
