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

//! The Lua script host.
//!
//! Scripts get the math/string/table libraries and nothing else: no file
//! I/O, no network, no process access. Each frame runs under a deadline
//! enforced by an instruction-count hook, a memory cap on the interpreter,
//! and depth/size caps on the returned structure. A limit violation
//! surfaces as an error; the caller discards the frame's side effects.

use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, Value, VmState};
use thiserror::Error;

use crate::state::World;

/// Resource limits for one script instance.
#[derive(Debug, Clone)]
pub struct ScriptLimits {
    /// Wall-clock budget for one `Update` call.
    pub frame_deadline: Duration,
    /// Interpreter heap cap in bytes.
    pub memory_bytes: usize,
    /// Maximum nesting depth of the returned structure.
    pub table_depth: usize,
    /// Maximum bytes for any single returned string.
    pub string_bytes: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            frame_deadline: Duration::from_millis(4),
            memory_bytes: 32 << 20,
            table_depth: 16,
            string_bytes: 64 << 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script failed to load: {0}")]
    Load(String),
    #[error("script does not define Update(game)")]
    MissingUpdate,
    #[error("script runtime error: {0}")]
    Runtime(String),
    #[error("frame deadline exceeded")]
    Deadline,
    #[error("script memory limit exceeded")]
    Memory,
    #[error("returned structure exceeds depth limit {0}")]
    Depth(usize),
    #[error("returned string exceeds size limit {0}")]
    StringSize(usize),
    #[error("script returned an invalid world: {0}")]
    Marshal(String),
}

fn map_lua_error(e: mlua::Error) -> ScriptError {
    match &e {
        mlua::Error::MemoryError(_) => ScriptError::Memory,
        _ => {
            let message = e.to_string();
            if message.contains("frame deadline exceeded") {
                ScriptError::Deadline
            } else {
                ScriptError::Runtime(message)
            }
        }
    }
}

#[derive(Debug)]
pub struct ScriptHost {
    lua: Lua,
    update: Function,
    limits: ScriptLimits,
}

impl ScriptHost {
    /// Load a script and resolve its `Update` function. The standard
    /// library subset excludes io, os, and package by construction.
    pub fn new(source: &str, limits: ScriptLimits) -> Result<Self, ScriptError> {
        let lua = Lua::new_with(
            StdLib::MATH | StdLib::STRING | StdLib::TABLE,
            LuaOptions::default(),
        )
        .map_err(|e| ScriptError::Load(e.to_string()))?;
        lua.set_memory_limit(limits.memory_bytes)
            .map_err(|e| ScriptError::Load(e.to_string()))?;

        lua.load(source)
            .set_name("game script")
            .exec()
            .map_err(|e| ScriptError::Load(e.to_string()))?;

        let update: Function = lua
            .globals()
            .get("Update")
            .map_err(|_| ScriptError::MissingUpdate)?;

        Ok(Self { lua, update, limits })
    }

    /// Run one frame: marshal the world in, call `Update`, marshal the
    /// result out. The script may mutate the passed table or return a new
    /// one; a returned table wins.
    pub fn update(&self, world: &World) -> Result<World, ScriptError> {
        let table: Value = self
            .lua
            .to_value(world)
            .map_err(|e| ScriptError::Marshal(e.to_string()))?;

        let started = Instant::now();
        let deadline = self.limits.frame_deadline;
        self.lua
            .set_hook(HookTriggers::new().every_nth_instruction(512), move |_, _| {
                if started.elapsed() > deadline {
                    Err(mlua::Error::RuntimeError(
                        "frame deadline exceeded".to_string(),
                    ))
                } else {
                    Ok(VmState::Continue)
                }
            });
        let result = self.update.call::<Value>(table.clone());
        self.lua.remove_hook();

        let returned = result.map_err(map_lua_error)?;
        let world_value = match returned {
            Value::Table(_) => returned,
            _ => table,
        };

        let mut json: serde_json::Value = self
            .lua
            .from_value(world_value)
            .map_err(|e| ScriptError::Marshal(e.to_string()))?;
        check_limits(&json, self.limits.table_depth, self.limits.string_bytes)?;

        // An empty Lua table is indistinguishable from an empty sequence;
        // the map-valued fields must come back as maps.
        for field in ["objects", "images"] {
            if json[field].as_array().is_some_and(|a| a.is_empty()) {
                json[field] = serde_json::Value::Object(Default::default());
            }
        }
        if json["keys"].as_object().is_some_and(|m| m.is_empty()) {
            json["keys"] = serde_json::Value::Array(Vec::new());
        }

        serde_json::from_value(json).map_err(|e| ScriptError::Marshal(e.to_string()))
    }
}

fn check_limits(
    value: &serde_json::Value,
    max_depth: usize,
    max_string: usize,
) -> Result<(), ScriptError> {
    fn walk(
        value: &serde_json::Value,
        depth: usize,
        max_depth: usize,
        max_string: usize,
    ) -> Result<(), ScriptError> {
        if depth > max_depth {
            return Err(ScriptError::Depth(max_depth));
        }
        match value {
            serde_json::Value::String(s) if s.len() > max_string => {
                Err(ScriptError::StringSize(max_string))
            }
            serde_json::Value::Array(items) => items
                .iter()
                .try_for_each(|v| walk(v, depth + 1, max_depth, max_string)),
            serde_json::Value::Object(map) => map
                .values()
                .try_for_each(|v| walk(v, depth + 1, max_depth, max_string)),
            _ => Ok(()),
        }
    }
    walk(value, 0, max_depth, max_string)
}
