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

//! Game version documents.
//!
//! A game version is immutable once written. Its identity is the pair
//! `(id, version)`; the chain of versions is a singly-linked list through
//! `previous_id`, append-only by construction. The distinguished `subject`
//! object is the player and lives outside `objects`. Coordinates are
//! top-left origin, `(x, y)` in `[0, w) x [0, h)`.

use std::collections::HashMap;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::{Field, FieldDecode};
use crate::impl_field_decode_serde;

/// Default canvas size for new games.
pub const DEFAULT_CANVAS_W: i64 = 800;
pub const DEFAULT_CANVAS_H: i64 = 600;

/// Hard ceiling on canvas dimensions.
pub const MAX_CANVAS: i64 = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Active,
    Inactive,
    #[default]
    New,
    Updating,
    Error,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Active => "active",
            GameStatus::Inactive => "inactive",
            GameStatus::New => "new",
            GameStatus::Updating => "updating",
            GameStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(GameStatus::Active),
            "inactive" => Ok(GameStatus::Inactive),
            "new" => Ok(GameStatus::New),
            "updating" => Ok(GameStatus::Updating),
            "error" => Ok(GameStatus::Error),
            other => Err(Error::invalid_request(format!(
                "invalid game status {other:?}"
            ))),
        }
    }
}

/// Provenance of a game version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameSource {
    #[default]
    App,
    Git,
    Sys,
}

impl GameSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameSource::App => "app",
            GameSource::Git => "git",
            GameSource::Sys => "sys",
        }
    }
}

impl FieldDecode for GameStatus {
    fn decode(value: serde_json::Value) -> std::result::Result<Self, String> {
        let s = String::decode(value)?;
        GameStatus::parse(&s).map_err(|e| e.message)
    }
}

/// A drawable, scriptable object. `data` is free-form and consumed only by
/// scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default)]
    pub z: i64,
    #[serde(default)]
    pub w: i64,
    #[serde(default)]
    pub h: i64,
    /// Rotation in degrees about the object center.
    #[serde(default)]
    pub r: i64,
    pub image: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// An image asset, exclusively owned by its game version. `data` is base64
/// raster or SVG bytes; `w`/`h` are resolved pixel dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub w: i64,
    #[serde(default)]
    pub h: i64,
}

/// One prompt/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTurn {
    pub prompt: String,
    #[serde(default)]
    pub response: String,
}

/// Per-game AI conversation record. History is append-only within a version
/// chain and bounded by the configured history size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<PromptTurn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<PromptTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Prompts {
    /// Fold `current` into the head of history and install a new current
    /// turn, truncating to `max_history`.
    pub fn advance(&self, turn: PromptTurn, max_history: usize) -> Prompts {
        let mut history = Vec::with_capacity(self.history.len() + 1);
        if let Some(current) = &self.current {
            history.push(current.clone());
        }
        history.extend(self.history.iter().cloned());
        history.truncate(max_history);
        Prompts {
            current: Some(turn),
            history,
            error: None,
            data: self.data.clone(),
        }
    }
}

impl_field_decode_serde!(Object, Image, Prompts, HashMap<String, Object>, HashMap<String, Image>);

/// An immutable game version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub account_id: String,
    #[serde(default)]
    pub public: bool,
    pub name: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_w")]
    pub w: i64,
    #[serde(default = "default_h")]
    pub h: i64,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub status_data: serde_json::Value,
    pub subject: Object,
    #[serde(default)]
    pub objects: HashMap<String, Object>,
    #[serde(default)]
    pub images: HashMap<String, Image>,
    /// Base64-encoded Lua source.
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub source: GameSource,
    #[serde(default)]
    pub commit_hash: String,
    /// `key:value` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Prompts>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    /// The version this one supersedes; unset for a fresh chain head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

fn default_w() -> i64 {
    DEFAULT_CANVAS_W
}

fn default_h() -> i64 {
    DEFAULT_CANVAS_H
}

impl Game {
    /// Decode the script body. Must be valid base64 wrapping valid UTF-8.
    pub fn decode_script(&self) -> Result<String> {
        if self.script.is_empty() {
            return Ok(String::new());
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.script)
            .map_err(|e| Error::invalid_request(format!("script is not valid base64: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|_| Error::invalid_request("script is not valid UTF-8"))
    }

    /// Validate the invariants every stored game version must satisfy.
    /// `max_bytes` caps the serialized document size; zero disables the cap.
    pub fn validate(&self, max_bytes: usize) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::invalid_request("game id must not be empty"));
        }
        if self.account_id.is_empty() {
            return Err(Error::invalid_request("game account_id must not be empty"));
        }
        if self.name.is_empty() {
            return Err(Error::invalid_request("game name must not be empty"));
        }
        if self.w < 1 || self.w > MAX_CANVAS || self.h < 1 || self.h > MAX_CANVAS {
            return Err(Error::invalid_request(format!(
                "canvas {}x{} out of range 1..={MAX_CANVAS}",
                self.w, self.h
            )));
        }
        if self.source == GameSource::Git && self.commit_hash.is_empty() {
            return Err(Error::invalid_request(
                "git-sourced game must carry a commit hash",
            ));
        }

        self.validate_object(&self.subject, "subject")?;
        for (id, object) in &self.objects {
            if *id != object.id {
                return Err(Error::invalid_request(format!(
                    "object map key {id:?} does not match object id {:?}",
                    object.id
                )));
            }
            self.validate_object(object, "object")?;
        }
        for (id, image) in &self.images {
            if *id != image.id {
                return Err(Error::invalid_request(format!(
                    "image map key {id:?} does not match image id {:?}",
                    image.id
                )));
            }
        }

        for tag in &self.tags {
            let mut parts = tag.splitn(2, ':');
            let key = parts.next().unwrap_or_default();
            if key.is_empty() || parts.next().map_or(true, str::is_empty) {
                return Err(Error::invalid_request(format!(
                    "tag {tag:?} is not key:value"
                )));
            }
        }

        self.decode_script()?;

        if max_bytes > 0 {
            let size = serde_json::to_vec(self)
                .map_err(|e| Error::server(format!("game encode failed: {e}")))?
                .len();
            if size > max_bytes {
                return Err(Error::invalid_request(format!(
                    "game document is {size} bytes, cap is {max_bytes}"
                ))
                .with_data(serde_json::json!({ "size": size, "max": max_bytes })));
            }
        }
        Ok(())
    }

    fn validate_object(&self, object: &Object, what: &str) -> Result<()> {
        if object.id.is_empty() {
            return Err(Error::invalid_request(format!("{what} id must not be empty")));
        }
        if !self.images.contains_key(&object.image) {
            return Err(Error::invalid_request(format!(
                "{what} {:?} references unknown image {:?}",
                object.id, object.image
            ))
            .with_data(serde_json::json!({ "object": object.id, "image": object.image })));
        }
        if object.w < 0 || object.h < 0 {
            return Err(Error::invalid_request(format!(
                "{what} {:?} has negative size",
                object.id
            )));
        }
        Ok(())
    }
}

/// Tolerant patch for game updates. Identity, provenance, and chain fields
/// are not patchable; those change only through create/prompt/import.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GamePatch {
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub public: Field<bool>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub name: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub description: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub debug: Field<bool>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub w: Field<i64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub h: Field<i64>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub status: Field<GameStatus>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub status_data: Field<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub subject: Field<Object>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub objects: Field<HashMap<String, Object>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub images: Field<HashMap<String, Image>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub script: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub tags: Field<Vec<String>>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub prompts: Field<Prompts>,
    #[serde(default, skip_serializing_if = "Field::is_unset")]
    pub data: Field<serde_json::Value>,
}

impl GamePatch {
    pub fn is_empty(&self) -> bool {
        self.public.is_unset()
            && self.name.is_unset()
            && self.description.is_unset()
            && self.debug.is_unset()
            && self.w.is_unset()
            && self.h.is_unset()
            && self.status.is_unset()
            && self.status_data.is_unset()
            && self.subject.is_unset()
            && self.objects.is_unset()
            && self.images.is_unset()
            && self.script.is_unset()
            && self.tags.is_unset()
            && self.prompts.is_unset()
            && self.data.is_unset()
    }
}
