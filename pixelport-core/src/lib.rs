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

//! Shared data model for the Pixelport platform.
//!
//! Everything that crosses a component boundary lives here: the document
//! types (accounts, users, game versions), the tolerant-field encoding used
//! for partial updates, the error taxonomy with its wire envelope, the game
//! search query language, cache key builders, and the fixed key-code table
//! shared with game scripts.

pub mod account;
pub mod cachekey;
pub mod error;
pub mod field;
pub mod game;
pub mod keys;
pub mod search;
pub mod user;

pub use account::{Account, AccountPatch, AccountStatus, RepoStatus};
pub use error::{Envelope, Error, ErrorKind, Result};
pub use field::Field;
pub use game::{Game, GamePatch, GameSource, GameStatus, Image, Object, PromptTurn, Prompts};
pub use user::{User, UserPatch, UserStatus};
