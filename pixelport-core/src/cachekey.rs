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

//! Cache key builders.
//!
//! All cache keys follow the `Namespace::Id` convention and are built here
//! so a namespace change is a one-line edit.

/// `Account::<id>`
pub fn account(id: &str) -> String {
    format!("Account::{id}")
}

/// `AccountName::<name>` for the by-name lookup path.
pub fn account_name(name: &str) -> String {
    format!("AccountName::{name}")
}

/// `User::<id>`
pub fn user(id: &str) -> String {
    format!("User::{id}")
}

/// `Token::Auth::<token>`
pub fn token_auth(token: &str) -> String {
    format!("Token::Auth::{token}")
}

/// `Game::<id>`
pub fn game(id: &str) -> String {
    format!("Game::{id}")
}
