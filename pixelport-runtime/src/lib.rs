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

//! The Pixelport game runtime.
//!
//! A deterministic per-frame loop: collect input, marshal the world into
//! the embedded Lua interpreter, invoke `Update(game)`, clamp and write the
//! result back, draw sprites in z order, and optionally ship state
//! snapshots to the backend from a separate worker. Logic and rendering
//! run on one thread; scripts are never preempted.

pub mod document;
pub mod images;
pub mod input;
pub mod render;
pub mod script;
pub mod state;
#[cfg(not(target_arch = "wasm32"))]
pub mod sync;
