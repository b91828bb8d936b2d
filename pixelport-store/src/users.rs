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

//! User persistence. Users belong to an account; scope strings are checked
//! against the closed set on every write.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use pixelport_cache::Item;
use pixelport_core::{cachekey, Error, Result, User, UserPatch, UserStatus};

use crate::{db_error, fmt_time, parse_json, parse_time, Store};

/// SHA-256 digest used for stored passwords.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        user_id: row.try_get("user_id").map_err(db_error)?,
        account_id: row.try_get("account_id").map_err(db_error)?,
        email: row.try_get("email").map_err(db_error)?,
        first_name: row.try_get("first_name").map_err(db_error)?,
        last_name: row.try_get("last_name").map_err(db_error)?,
        status: UserStatus::parse(row.try_get::<String, _>("status").map_err(db_error)?.as_str())?,
        scopes: row.try_get("scopes").map_err(db_error)?,
        password: row.try_get("password").map_err(db_error)?,
        data: parse_json(row.try_get::<String, _>("data").map_err(db_error)?.as_str())?,
        created_at: parse_time(row.try_get::<String, _>("created_at").map_err(db_error)?.as_str())?,
        created_by: row.try_get("created_by").map_err(db_error)?,
        updated_at: parse_time(row.try_get::<String, _>("updated_at").map_err(db_error)?.as_str())?,
        updated_by: row.try_get("updated_by").map_err(db_error)?,
    })
}

impl Store {
    /// Fetch a user by id, reading through the cache.
    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        let key = cachekey::user(user_id);
        if let Ok(bytes) = self.cache().get(&key).await {
            if let Ok(user) = serde_json::from_slice::<CachedUser>(&bytes) {
                return Ok(user.into());
            }
        }

        let row = sqlx::query("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error)?
            .ok_or_else(|| Error::not_found("user", user_id))?;
        let user = user_from_row(&row)?;

        if let Ok(bytes) = serde_json::to_vec(&CachedUser::from(&user)) {
            let _ = self.cache().set(Item::new(&key, bytes, self.cache_ttl())).await;
        }
        Ok(user)
    }

    /// Create a user. The owning account must exist.
    pub async fn create_user(&self, mut user: User) -> Result<User> {
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;
        if user.email.is_empty() {
            user.email = user.user_id.clone();
        }
        user.validate()?;
        self.get_account(&user.account_id).await?;

        sqlx::query(
            "INSERT INTO users (user_id, account_id, email, first_name, last_name,
                status, scopes, password, data, created_at, created_by, updated_at,
                updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                status = excluded.status,
                scopes = excluded.scopes,
                password = excluded.password,
                data = excluded.data,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by",
        )
        .bind(&user.user_id)
        .bind(&user.account_id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.status.as_str())
        .bind(&user.scopes)
        .bind(&user.password)
        .bind(user.data.to_string())
        .bind(fmt_time(user.created_at))
        .bind(&user.created_by)
        .bind(fmt_time(user.updated_at))
        .bind(&user.updated_by)
        .execute(self.pool())
        .await
        .map_err(db_error)?;

        let _ = self.cache().delete(&cachekey::user(&user.user_id)).await;
        debug!(user_id = %user.user_id, "user created");
        Ok(user)
    }

    /// Apply a tolerant patch. Empty patches are no-ops.
    pub async fn update_user(
        &self,
        user_id: &str,
        patch: UserPatch,
        updated_by: &str,
    ) -> Result<User> {
        let mut user = self.get_user(user_id).await?;
        if patch.is_empty() {
            return Ok(user);
        }
        patch.validate()?;

        patch.email.apply(&mut user.email);
        patch.first_name.apply(&mut user.first_name);
        patch.last_name.apply(&mut user.last_name);
        if let Some(status) = patch.status.value() {
            user.status = *status;
        }
        patch.scopes.apply(&mut user.scopes);
        if let Some(password) = patch.password.value() {
            user.password = hash_password(password);
        }
        if patch.data.is_set() {
            user.data = patch.data.into_value().unwrap_or(serde_json::Value::Null);
        }

        user.updated_at = Utc::now();
        user.updated_by = updated_by.to_string();
        user.validate()?;

        sqlx::query(
            "UPDATE users SET email = ?, first_name = ?, last_name = ?, status = ?,
                scopes = ?, password = ?, data = ?, updated_at = ?, updated_by = ?
             WHERE user_id = ?",
        )
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.status.as_str())
        .bind(&user.scopes)
        .bind(&user.password)
        .bind(user.data.to_string())
        .bind(fmt_time(user.updated_at))
        .bind(&user.updated_by)
        .bind(user_id)
        .execute(self.pool())
        .await
        .map_err(db_error)?;

        let _ = self.cache().delete(&cachekey::user(user_id)).await;
        Ok(user)
    }

    /// Look up a user by credentials for the token endpoint. Returns
    /// `Unauthorized` on any mismatch so callers cannot probe user ids.
    pub async fn authenticate_user(&self, user_id: &str, password: &str) -> Result<User> {
        let user = self
            .get_user(user_id)
            .await
            .map_err(|_| Error::unauthorized("unknown user or bad password"))?;
        if user.status != UserStatus::Active || user.password != hash_password(password) {
            return Err(Error::unauthorized("unknown user or bad password"));
        }
        Ok(user)
    }
}

/// Cache representation that keeps the password digest; the public `User`
/// serializer drops it, which would corrupt cache round trips.
#[derive(serde::Serialize, serde::Deserialize)]
struct CachedUser {
    user: User,
    password: String,
}

impl From<&User> for CachedUser {
    fn from(user: &User) -> Self {
        Self {
            user: user.clone(),
            password: user.password.clone(),
        }
    }
}

impl From<CachedUser> for User {
    fn from(cached: CachedUser) -> Self {
        let mut user = cached.user;
        user.password = cached.password;
        user
    }
}
