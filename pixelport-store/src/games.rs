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

//! Game version persistence.
//!
//! Versions are immutable rows linked into a chain by `previous_id`. The
//! chain head is the version with no live successor; undo tombstones the
//! head, redo reactivates the most recent tombstoned successor. Creating a
//! new chain head is gated by the account's game limit. Every query is
//! scoped to the owning account.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use pixelport_core::{
    cachekey, search, Error, ErrorKind, Game, GamePatch, GameSource, GameStatus, Prompts, Result,
};

use crate::query::{self, Param};
use crate::{db_error, fmt_time, parse_json, parse_time, Store};

/// Walk guard: chains are append-only lists, but a corrupt database must
/// not hang the server.
const MAX_CHAIN_WALK: usize = 10_000;

/// A version is live unless tombstoned.
const LIVE: &str = "status != 'inactive'";

/// A live row with no live successor is a chain head.
const HEAD: &str =
    "status != 'inactive' AND NOT EXISTS (SELECT 1 FROM games c WHERE c.previous_id = games.id AND c.status != 'inactive')";

fn game_from_row(row: &SqliteRow) -> Result<Game> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let source: String = row.try_get("source").map_err(db_error)?;
    let prompts: Option<String> = row.try_get("prompts").map_err(db_error)?;
    Ok(Game {
        id: row.try_get("id").map_err(db_error)?,
        account_id: row.try_get("account_id").map_err(db_error)?,
        public: row.try_get::<i64, _>("public").map_err(db_error)? != 0,
        name: row.try_get("name").map_err(db_error)?,
        version: row.try_get("version").map_err(db_error)?,
        description: row.try_get("description").map_err(db_error)?,
        debug: row.try_get::<i64, _>("debug").map_err(db_error)? != 0,
        w: row.try_get("w").map_err(db_error)?,
        h: row.try_get("h").map_err(db_error)?,
        status: GameStatus::parse(&status)?,
        status_data: parse_json(row.try_get::<String, _>("status_data").map_err(db_error)?.as_str())?,
        subject: serde_json::from_str(row.try_get::<String, _>("subject").map_err(db_error)?.as_str())
            .map_err(|e| Error::new(ErrorKind::Database, format!("bad stored subject: {e}")))?,
        objects: serde_json::from_str(row.try_get::<String, _>("objects").map_err(db_error)?.as_str())
            .map_err(|e| Error::new(ErrorKind::Database, format!("bad stored objects: {e}")))?,
        images: serde_json::from_str(row.try_get::<String, _>("images").map_err(db_error)?.as_str())
            .map_err(|e| Error::new(ErrorKind::Database, format!("bad stored images: {e}")))?,
        script: row.try_get("script").map_err(db_error)?,
        source: match source.as_str() {
            "app" => GameSource::App,
            "git" => GameSource::Git,
            "sys" => GameSource::Sys,
            other => {
                return Err(Error::new(
                    ErrorKind::Database,
                    format!("bad stored source {other:?}"),
                ))
            }
        },
        commit_hash: row.try_get("commit_hash").map_err(db_error)?,
        tags: serde_json::from_str(row.try_get::<String, _>("tags").map_err(db_error)?.as_str())
            .map_err(|e| Error::new(ErrorKind::Database, format!("bad stored tags: {e}")))?,
        prompts: match prompts {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::new(ErrorKind::Database, format!("bad stored prompts: {e}")))?,
            None => None,
        },
        data: parse_json(row.try_get::<String, _>("data").map_err(db_error)?.as_str())?,
        previous_id: row.try_get("previous_id").map_err(db_error)?,
        created_at: parse_time(row.try_get::<String, _>("created_at").map_err(db_error)?.as_str())?,
        created_by: row.try_get("created_by").map_err(db_error)?,
        updated_at: parse_time(row.try_get::<String, _>("updated_at").map_err(db_error)?.as_str())?,
        updated_by: row.try_get("updated_by").map_err(db_error)?,
    })
}

impl Store {
    /// Fetch one version row by id within an account, reading through the
    /// cache. Status and prompt transitions invalidate the entry.
    pub async fn get_game_version(&self, account_id: &str, id: &str) -> Result<Game> {
        let key = cachekey::game(id);
        if let Ok(bytes) = self.cache().get(&key).await {
            if let Ok(game) = serde_json::from_slice::<Game>(&bytes) {
                if game.account_id == account_id {
                    return Ok(game);
                }
            }
        }

        let row = sqlx::query("SELECT * FROM games WHERE id = ? AND account_id = ?")
            .bind(id)
            .bind(account_id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error)?
            .ok_or_else(|| Error::not_found("game", id))?;
        let game = game_from_row(&row)?;

        if let Ok(bytes) = serde_json::to_vec(&game) {
            let _ = self
                .cache()
                .set(pixelport_cache::Item::new(&key, bytes, self.cache_ttl()))
                .await;
        }
        Ok(game)
    }

    async fn invalidate_game(&self, id: &str) {
        let _ = self.cache().delete(&cachekey::game(id)).await;
    }

    async fn live_child(&self, id: &str) -> Result<Option<Game>> {
        let row = sqlx::query(&format!(
            "SELECT * FROM games WHERE previous_id = ? AND {LIVE}"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error)?;
        row.as_ref().map(game_from_row).transpose()
    }

    /// Resolve the chain head reachable from any version id: walk forward
    /// over live successors, then back off tombstones.
    pub async fn get_game(&self, account_id: &str, id: &str) -> Result<Game> {
        let mut current = self.get_game_version(account_id, id).await?;

        for _ in 0..MAX_CHAIN_WALK {
            match self.live_child(&current.id).await? {
                Some(child) => current = child,
                None => break,
            }
        }
        let mut walked = 0;
        while current.status == GameStatus::Inactive {
            walked += 1;
            if walked > MAX_CHAIN_WALK {
                return Err(Error::new(ErrorKind::Database, "version chain cycle"));
            }
            match current.previous_id.clone() {
                Some(previous) => current = self.get_game_version(account_id, &previous).await?,
                None => return Err(Error::not_found("game", id)),
            }
        }
        Ok(current)
    }

    /// The chain head for an account/name pair, if one is live.
    pub async fn get_game_by_name(&self, account_id: &str, name: &str) -> Result<Option<Game>> {
        let row = sqlx::query(&format!(
            "SELECT * FROM games WHERE account_id = ? AND name = ? AND {HEAD}"
        ))
        .bind(account_id)
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error)?;
        row.as_ref().map(game_from_row).transpose()
    }

    /// Count live chain heads for the limit check.
    pub async fn count_game_heads(&self, account_id: &str) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM games WHERE account_id = ? AND {HEAD}"
        ))
        .bind(account_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_error)?;
        row.try_get("n").map_err(db_error)
    }

    async fn enforce_game_limit(&self, account_id: &str) -> Result<()> {
        let account = self.get_account(account_id).await?;
        let limit = if account.game_limit > 0 {
            account.game_limit
        } else {
            self.config().game_limit
        };
        let heads = self.count_game_heads(account_id).await?;
        if heads >= limit {
            return Err(Error::forbidden(format!(
                "game limit of {limit} reached for account {account_id}"
            ))
            .with_data(serde_json::json!({ "limit": limit, "games": heads })));
        }
        Ok(())
    }

    async fn insert_game(&self, game: &Game) -> Result<()> {
        sqlx::query(
            "INSERT INTO games (id, account_id, public, name, version, description,
                debug, w, h, status, status_data, subject, objects, images, script,
                source, commit_hash, tags, prompts, data, previous_id, created_at,
                created_by, updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&game.id)
        .bind(&game.account_id)
        .bind(game.public as i64)
        .bind(&game.name)
        .bind(game.version)
        .bind(&game.description)
        .bind(game.debug as i64)
        .bind(game.w)
        .bind(game.h)
        .bind(game.status.as_str())
        .bind(game.status_data.to_string())
        .bind(serde_json::to_string(&game.subject).unwrap_or_default())
        .bind(serde_json::to_string(&game.objects).unwrap_or_default())
        .bind(serde_json::to_string(&game.images).unwrap_or_default())
        .bind(&game.script)
        .bind(game.source.as_str())
        .bind(&game.commit_hash)
        .bind(serde_json::to_string(&game.tags).unwrap_or_default())
        .bind(
            game.prompts
                .as_ref()
                .map(|p| serde_json::to_string(p).unwrap_or_default()),
        )
        .bind(game.data.to_string())
        .bind(&game.previous_id)
        .bind(fmt_time(game.created_at))
        .bind(&game.created_by)
        .bind(fmt_time(game.updated_at))
        .bind(&game.updated_by)
        .execute(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref d) if d.message().contains("UNIQUE") => Error::conflict(
                format!("game {:?} version {} already exists", game.name, game.version),
            ),
            other => db_error(other),
        })?;
        Ok(())
    }

    /// Create a fresh chain head. Fails with `Forbidden` at the game limit.
    pub async fn create_game(&self, mut game: Game, created_by: &str) -> Result<Game> {
        self.enforce_game_limit(&game.account_id).await?;

        if game.id.is_empty() {
            game.id = Uuid::new_v4().to_string();
        }
        game.version = 1;
        game.previous_id = None;
        let now = Utc::now();
        game.created_at = now;
        game.created_by = created_by.to_string();
        game.updated_at = now;
        game.updated_by = created_by.to_string();
        game.validate(self.config().max_game_bytes)?;

        if self.get_game_by_name(&game.account_id, &game.name).await?.is_some() {
            return Err(Error::conflict(format!(
                "game {:?} already exists",
                game.name
            )));
        }

        self.insert_game(&game).await?;
        debug!(game_id = %game.id, name = %game.name, "game created");
        Ok(game)
    }

    /// Append a new version to an existing chain. The caller holds the
    /// per-game lock; `base` must be the current head.
    pub async fn create_game_version(&self, base: &Game, mut next: Game) -> Result<Game> {
        next.id = Uuid::new_v4().to_string();
        next.account_id = base.account_id.clone();
        next.name = base.name.clone();
        next.version = base.version + 1;
        next.previous_id = Some(base.id.clone());
        let now = Utc::now();
        next.created_at = now;
        next.updated_at = now;
        next.validate(self.config().max_game_bytes)?;

        self.insert_game(&next).await?;
        debug!(
            game_id = %next.id,
            previous_id = %base.id,
            version = next.version,
            "game version appended"
        );
        Ok(next)
    }

    /// Replace the mutable content of the head version in place. Identity,
    /// provenance, and chain fields are preserved.
    pub async fn replace_game(
        &self,
        account_id: &str,
        id: &str,
        doc: Game,
        updated_by: &str,
    ) -> Result<Game> {
        let head = self.get_game(account_id, id).await?;
        let mut next = doc;
        next.id = head.id.clone();
        next.account_id = head.account_id.clone();
        next.version = head.version;
        next.previous_id = head.previous_id.clone();
        next.source = head.source;
        next.commit_hash = head.commit_hash.clone();
        next.created_at = head.created_at;
        next.created_by = head.created_by.clone();
        next.updated_at = Utc::now();
        next.updated_by = updated_by.to_string();
        next.validate(self.config().max_game_bytes)?;

        self.write_game_row(&next).await?;
        Ok(next)
    }

    /// Apply a tolerant patch to the head version. An empty patch does not
    /// touch `updated_at`.
    pub async fn update_game(
        &self,
        account_id: &str,
        id: &str,
        patch: GamePatch,
        updated_by: &str,
    ) -> Result<Game> {
        let mut game = self.get_game(account_id, id).await?;
        if patch.is_empty() {
            return Ok(game);
        }

        if patch.name.is_null() || patch.subject.is_null() || patch.images.is_null() {
            return Err(Error::invalid_request(
                "name, subject, and images cannot be null",
            ));
        }
        patch.name.apply(&mut game.name);
        if let Some(public) = patch.public.value() {
            game.public = *public;
        }
        patch.description.apply(&mut game.description);
        if let Some(debug_flag) = patch.debug.value() {
            game.debug = *debug_flag;
        }
        if let Some(w) = patch.w.value() {
            game.w = *w;
        }
        if let Some(h) = patch.h.value() {
            game.h = *h;
        }
        if let Some(status) = patch.status.value() {
            game.status = *status;
        }
        if patch.status_data.is_set() {
            game.status_data = patch
                .status_data
                .into_value()
                .unwrap_or(serde_json::Value::Null);
        }
        if let Some(subject) = patch.subject.into_value() {
            game.subject = subject;
        }
        if patch.objects.is_set() {
            game.objects = patch.objects.into_value().unwrap_or_default();
        }
        if let Some(images) = patch.images.into_value() {
            game.images = images;
        }
        patch.script.apply(&mut game.script);
        if patch.tags.is_set() {
            game.tags = patch.tags.into_value().unwrap_or_default();
        }
        if patch.prompts.is_set() {
            game.prompts = patch.prompts.into_value();
        }
        if patch.data.is_set() {
            game.data = patch.data.into_value().unwrap_or(serde_json::Value::Null);
        }

        game.updated_at = Utc::now();
        game.updated_by = updated_by.to_string();
        game.validate(self.config().max_game_bytes)?;
        self.write_game_row(&game).await?;
        Ok(game)
    }

    async fn write_game_row(&self, game: &Game) -> Result<()> {
        let result = sqlx::query(
            "UPDATE games SET public = ?, name = ?, description = ?, debug = ?,
                w = ?, h = ?, status = ?, status_data = ?, subject = ?, objects = ?,
                images = ?, script = ?, tags = ?, prompts = ?, data = ?,
                updated_at = ?, updated_by = ?
             WHERE id = ?",
        )
        .bind(game.public as i64)
        .bind(&game.name)
        .bind(&game.description)
        .bind(game.debug as i64)
        .bind(game.w)
        .bind(game.h)
        .bind(game.status.as_str())
        .bind(game.status_data.to_string())
        .bind(serde_json::to_string(&game.subject).unwrap_or_default())
        .bind(serde_json::to_string(&game.objects).unwrap_or_default())
        .bind(serde_json::to_string(&game.images).unwrap_or_default())
        .bind(&game.script)
        .bind(serde_json::to_string(&game.tags).unwrap_or_default())
        .bind(
            game.prompts
                .as_ref()
                .map(|p| serde_json::to_string(p).unwrap_or_default()),
        )
        .bind(game.data.to_string())
        .bind(fmt_time(game.updated_at))
        .bind(&game.updated_by)
        .bind(&game.id)
        .execute(self.pool())
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("game", &game.id));
        }
        self.invalidate_game(&game.id).await;
        Ok(())
    }

    /// Status transition on one version row, used by the prompt pipeline
    /// and the watchdog reconciler.
    pub async fn set_game_status(
        &self,
        id: &str,
        status: GameStatus,
        status_data: serde_json::Value,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE games SET status = ?, status_data = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(status_data.to_string())
        .bind(fmt_time(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("game", id));
        }
        self.invalidate_game(id).await;
        Ok(())
    }

    /// Overwrite the prompts record on one version row; used to record a
    /// pipeline failure on the old head.
    pub async fn set_game_prompts(&self, id: &str, prompts: &Prompts) -> Result<()> {
        sqlx::query("UPDATE games SET prompts = ? WHERE id = ?")
            .bind(serde_json::to_string(prompts).unwrap_or_default())
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_error)?;
        self.invalidate_game(id).await;
        Ok(())
    }

    /// Tombstone the whole chain. The head slips out of the partial unique
    /// index so the name can be reused; redo cannot reach a dead chain.
    pub async fn delete_game(&self, account_id: &str, id: &str) -> Result<()> {
        let head = self.get_game(account_id, id).await?;
        let name = head.name.clone();
        let mut current = Some(head);
        let mut walked = 0;
        while let Some(game) = current {
            walked += 1;
            if walked > MAX_CHAIN_WALK {
                return Err(Error::new(ErrorKind::Database, "version chain cycle"));
            }
            self.set_game_status(&game.id, GameStatus::Inactive, serde_json::Value::Null)
                .await?;
            current = match game.previous_id {
                Some(previous) => Some(self.get_game_version(account_id, &previous).await?),
                None => None,
            };
        }
        // Tombstoned siblings from past undos also die with the chain.
        let siblings = sqlx::query("SELECT id FROM games WHERE account_id = ? AND name = ?")
            .bind(account_id)
            .bind(&name)
            .fetch_all(self.pool())
            .await
            .map_err(db_error)?;
        sqlx::query("UPDATE games SET status = 'inactive' WHERE account_id = ? AND name = ?")
            .bind(account_id)
            .bind(&name)
            .execute(self.pool())
            .await
            .map_err(db_error)?;
        for row in &siblings {
            let sibling_id: String = row.try_get("id").map_err(db_error)?;
            self.invalidate_game(&sibling_id).await;
        }
        debug!(game_id = %id, "game deleted");
        Ok(())
    }

    /// Copy the head of `src_id` into a fresh chain under a new name.
    pub async fn copy_game(
        &self,
        account_id: &str,
        src_id: &str,
        new_name: &str,
        created_by: &str,
    ) -> Result<Game> {
        let mut copy = self.get_game(account_id, src_id).await?;
        copy.id = String::new();
        copy.name = new_name.to_string();
        copy.source = GameSource::App;
        copy.commit_hash = String::new();
        copy.status = GameStatus::New;
        copy.status_data = serde_json::Value::Null;
        copy.prompts = None;
        self.create_game(copy, created_by).await
    }

    /// Undo: tombstone the head, exposing its predecessor. `NotFound` when
    /// the chain has no predecessor.
    pub async fn undo_game(&self, account_id: &str, id: &str) -> Result<Game> {
        let head = self.get_game(account_id, id).await?;
        let previous = head
            .previous_id
            .clone()
            .ok_or_else(|| Error::not_found("previous game version", id))?;
        self.set_game_status(&head.id, GameStatus::Inactive, serde_json::Value::Null)
            .await?;
        debug!(game_id = %head.id, "game version tombstoned by undo");
        self.get_game_version(account_id, &previous).await
    }

    /// Redo: reactivate the most recent tombstoned successor of the current
    /// head. `NotFound` when there is none.
    pub async fn redo_game(&self, account_id: &str, id: &str) -> Result<Game> {
        let head = self.get_game(account_id, id).await?;
        let row = sqlx::query(
            "SELECT * FROM games
             WHERE previous_id = ? AND status = 'inactive'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(&head.id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_error)?
        .ok_or_else(|| Error::not_found("tombstoned game version", id))?;
        let successor = game_from_row(&row)?;
        self.set_game_status(&successor.id, GameStatus::Active, serde_json::Value::Null)
            .await?;
        debug!(game_id = %successor.id, "game version reactivated by redo");
        self.get_game_version(account_id, &successor.id).await
    }

    /// Search live chain heads for an account. `size` clamps to the
    /// configured maximum; the account scope is always enforced.
    pub async fn search_games(
        &self,
        account_id: &str,
        query_str: &str,
        size: i64,
        skip: i64,
        sort: &str,
    ) -> Result<Vec<Game>> {
        let size = if size <= 0 {
            self.config().search_size
        } else {
            size.min(self.config().search_max_size)
        };
        let skip = skip.max(0);

        let mut sql = format!("SELECT * FROM games WHERE account_id = ? AND {HEAD}");
        let mut params = Vec::new();
        if let Some(parsed) = search::parse(query_str)? {
            let (condition, compiled) = query::compile(&parsed)?;
            sql.push_str(" AND ");
            sql.push_str(&condition);
            params = compiled;
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&query::compile_sort(&search::parse_sort(sort))?);
        sql.push_str(" LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql).bind(account_id);
        for param in params {
            q = match param {
                Param::Text(s) => q.bind(s),
                Param::Int(i) => q.bind(i),
            };
        }
        let rows = q
            .bind(size)
            .bind(skip)
            .fetch_all(self.pool())
            .await
            .map_err(db_error)?;
        rows.iter().map(game_from_row).collect()
    }

    /// Tag helpers operating on the head version.
    pub async fn list_game_tags(&self, account_id: &str, id: &str) -> Result<Vec<String>> {
        Ok(self.get_game(account_id, id).await?.tags)
    }

    pub async fn add_game_tags(
        &self,
        account_id: &str,
        id: &str,
        tags: &[String],
        updated_by: &str,
    ) -> Result<Vec<String>> {
        let mut game = self.get_game(account_id, id).await?;
        for tag in tags {
            if !game.tags.contains(tag) {
                game.tags.push(tag.clone());
            }
        }
        game.updated_at = Utc::now();
        game.updated_by = updated_by.to_string();
        game.validate(self.config().max_game_bytes)?;
        self.write_game_row(&game).await?;
        Ok(game.tags)
    }

    pub async fn delete_game_tags(
        &self,
        account_id: &str,
        id: &str,
        tags: &[String],
        updated_by: &str,
    ) -> Result<Vec<String>> {
        let mut game = self.get_game(account_id, id).await?;
        game.tags.retain(|t| !tags.contains(t));
        game.updated_at = Utc::now();
        game.updated_by = updated_by.to_string();
        self.write_game_row(&game).await?;
        Ok(game.tags)
    }

    /// Games stuck in `updating` since before `cutoff`; the reconciler
    /// flags these as errored.
    pub async fn stale_updating_games(
        &self,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Vec<Game>> {
        let rows = sqlx::query(
            "SELECT * FROM games WHERE status = 'updating' AND updated_at < ?",
        )
        .bind(fmt_time(cutoff))
        .fetch_all(self.pool())
        .await
        .map_err(db_error)?;
        rows.iter().map(game_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use base64::Engine;
    use pixelport_core::{Account, AccountStatus, Field, Image, Object, RepoStatus};
    use std::collections::HashMap;

    async fn seed_account(store: &Store, limit: i64) -> Account {
        store
            .create_account(Account {
                account_id: String::new(),
                name: "acme".into(),
                status: AccountStatus::Active,
                repo: String::new(),
                repo_status: RepoStatus::Inactive,
                repo_status_data: serde_json::Value::Null,
                game_commit_hash: String::new(),
                game_limit: limit,
                ai_api_key: String::new(),
                ai_max_tokens: 0,
                ai_thinking_budget: 0,
                data: serde_json::Value::Null,
                created_at: Utc::now(),
                created_by: "test".into(),
                updated_at: Utc::now(),
                updated_by: "test".into(),
            })
            .await
            .unwrap()
    }

    fn new_game(account_id: &str, name: &str) -> Game {
        let image = Image {
            id: "p".into(),
            name: "player".into(),
            data: base64::engine::general_purpose::STANDARD.encode(b"png"),
            w: 16,
            h: 16,
        };
        Game {
            id: String::new(),
            account_id: account_id.into(),
            public: false,
            name: name.into(),
            version: 0,
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
                x: 0,
                y: 0,
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
            created_by: "test".into(),
            updated_at: Utc::now(),
            updated_by: "test".into(),
        }
    }

    #[tokio::test]
    async fn create_and_resolve_head() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 10).await;
        let created = store
            .create_game(new_game(&account.account_id, "g1"), "test")
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let head = store.get_game(&account.account_id, &created.id).await.unwrap();
        assert_eq!(head.id, created.id);
    }

    #[tokio::test]
    async fn game_limit_is_enforced_and_released() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 1).await;
        let g1 = store
            .create_game(new_game(&account.account_id, "g1"), "test")
            .await
            .unwrap();

        let err = store
            .create_game(new_game(&account.account_id, "g2"), "test")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);

        store.delete_game(&account.account_id, &g1.id).await.unwrap();
        store
            .create_game(new_game(&account.account_id, "g2"), "test")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn version_chain_walks_to_head() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 10).await;
        let v1 = store
            .create_game(new_game(&account.account_id, "g1"), "test")
            .await
            .unwrap();

        let mut next = v1.clone();
        next.description = "second".into();
        let v2 = store.create_game_version(&v1, next).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.previous_id.as_deref(), Some(v1.id.as_str()));

        // Head resolves from either end of the chain.
        assert_eq!(store.get_game(&account.account_id, &v1.id).await.unwrap().id, v2.id);
        assert_eq!(store.get_game(&account.account_id, &v2.id).await.unwrap().id, v2.id);
        // Only one head counts against the limit.
        assert_eq!(store.count_game_heads(&account.account_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn undo_redo_round_trip() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 10).await;
        let v1 = store
            .create_game(new_game(&account.account_id, "g1"), "test")
            .await
            .unwrap();
        let mut next = v1.clone();
        next.description = "second".into();
        let v2 = store.create_game_version(&v1, next).await.unwrap();

        // Undo exposes v1 and tombstones v2.
        let head = store.undo_game(&account.account_id, &v2.id).await.unwrap();
        assert_eq!(head.id, v1.id);
        let v2_row = store.get_game_version(&account.account_id, &v2.id).await.unwrap();
        assert_eq!(v2_row.status, GameStatus::Inactive);

        // A second undo has no predecessor.
        let err = store.undo_game(&account.account_id, &v1.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        // Redo reactivates v2.
        let head = store.redo_game(&account.account_id, &v1.id).await.unwrap();
        assert_eq!(head.id, v2.id);
        assert_eq!(head.status, GameStatus::Active);

        // Undo then redo is the identity on the head pointer.
        assert_eq!(
            store.get_game(&account.account_id, &v1.id).await.unwrap().id,
            v2.id
        );
    }

    #[tokio::test]
    async fn patch_is_tolerant_and_noop_safe() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 10).await;
        let created = store
            .create_game(new_game(&account.account_id, "g1"), "test")
            .await
            .unwrap();

        let unchanged = store
            .update_game(&account.account_id, &created.id, GamePatch::default(), "test")
            .await
            .unwrap();
        assert_eq!(unchanged.updated_at, created.updated_at);

        let patch = GamePatch {
            description: Field::some("now with plot".into()),
            ..GamePatch::default()
        };
        let updated = store
            .update_game(&account.account_id, &created.id, patch, "test")
            .await
            .unwrap();
        assert_eq!(updated.description, "now with plot");
        assert!(updated.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn search_scopes_and_clamps() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 10).await;
        store
            .create_game(new_game(&account.account_id, "alpha"), "test")
            .await
            .unwrap();
        let mut tagged = new_game(&account.account_id, "beta");
        tagged.tags = vec!["genre:puzzle".into()];
        store.create_game(tagged, "test").await.unwrap();

        let all = store
            .search_games(&account.account_id, "", 0, 0, "")
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let named = store
            .search_games(&account.account_id, "alp", 10, 0, "name")
            .await
            .unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name, "alpha");

        let tagged = store
            .search_games(&account.account_id, "tags:genre:puzzle", 10, 0, "")
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].name, "beta");

        // Oversized page sizes clamp instead of erroring.
        let clamped = store
            .search_games(&account.account_id, "", 100_000, 0, "")
            .await
            .unwrap();
        assert_eq!(clamped.len(), 2);

        // Another account sees nothing.
        let other = store
            .search_games("other-account", "", 0, 0, "")
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn copy_starts_a_fresh_chain() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 10).await;
        let v1 = store
            .create_game(new_game(&account.account_id, "g1"), "test")
            .await
            .unwrap();
        let mut next = v1.clone();
        next.commit_hash.clear();
        let v2 = store.create_game_version(&v1, next).await.unwrap();

        let copy = store
            .copy_game(&account.account_id, &v2.id, "g1-copy", "test")
            .await
            .unwrap();
        assert_eq!(copy.version, 1);
        assert_eq!(copy.previous_id, None);
        assert_eq!(copy.source, GameSource::App);
        assert_ne!(copy.id, v2.id);
        assert_eq!(copy.name, "g1-copy");
    }

    #[tokio::test]
    async fn tags_add_and_delete() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 10).await;
        let game = store
            .create_game(new_game(&account.account_id, "g1"), "test")
            .await
            .unwrap();

        let tags = store
            .add_game_tags(
                &account.account_id,
                &game.id,
                &["genre:puzzle".into(), "mode:solo".into()],
                "test",
            )
            .await
            .unwrap();
        assert_eq!(tags.len(), 2);

        let tags = store
            .delete_game_tags(&account.account_id, &game.id, &["mode:solo".into()], "test")
            .await
            .unwrap();
        assert_eq!(tags, vec!["genre:puzzle".to_string()]);
    }

    #[tokio::test]
    async fn stale_updating_games_are_found() {
        let (store, _dir) = testutil::store().await;
        let account = seed_account(&store, 10).await;
        let game = store
            .create_game(new_game(&account.account_id, "g1"), "test")
            .await
            .unwrap();
        store
            .set_game_status(&game.id, GameStatus::Updating, serde_json::Value::Null)
            .await
            .unwrap();

        let stale = store
            .stale_updating_games(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        let none = store
            .stale_updating_games(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
