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

//! The durable boundary: typed, versioned account/user/game documents over
//! SQLite. All reads are concurrent; writes on one game's version chain are
//! serialized by an in-memory lock keyed by game id. Hot account, user, and
//! game-version documents read through the cache layer.

pub mod accounts;
pub mod games;
pub mod query;
pub mod users;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};

use pixelport_cache::CacheClient;
use pixelport_core::{Error, ErrorKind, Result};

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path.
    #[serde(default = "default_database")]
    pub database: String,

    /// TTL in seconds for cached account/user/token documents.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Default per-account game limit for new accounts.
    #[serde(default = "default_game_limit")]
    pub game_limit: i64,

    /// Byte cap on a serialized game document; zero disables the cap.
    #[serde(default = "default_max_game_bytes")]
    pub max_game_bytes: usize,

    /// Default and maximum search page sizes.
    #[serde(default = "default_search_size")]
    pub search_size: i64,
    #[serde(default = "default_search_max_size")]
    pub search_max_size: i64,
}

fn default_database() -> String {
    "pixelport.db".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_game_limit() -> i64 {
    10
}

fn default_max_game_bytes() -> usize {
    4 << 20
}

fn default_search_size() -> i64 {
    100
}

fn default_search_max_size() -> i64 {
    1000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            cache_ttl_secs: default_cache_ttl_secs(),
            game_limit: default_game_limit(),
            max_game_bytes: default_max_game_bytes(),
            search_size: default_search_size(),
            search_max_size: default_search_max_size(),
        }
    }
}

/// Per-id async mutexes created on demand and retired when idle.
#[derive(Default)]
pub struct LockMap {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockMap {
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the mutex for `key` if nobody holds or waits on it.
    pub fn retire(&self, key: &str) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// The store. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    cache: Arc<CacheClient>,
    config: StoreConfig,
    game_locks: Arc<LockMap>,
}

impl Store {
    /// Open the database, apply the schema, and wire the cache client.
    pub async fn connect(config: StoreConfig, cache: Arc<CacheClient>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        let store = Self {
            pool,
            cache,
            config,
            game_locks: Arc::new(LockMap::default()),
        };
        store.apply_schema().await?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn cache(&self) -> &CacheClient {
        &self.cache
    }

    pub(crate) fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.cache_ttl_secs)
    }

    /// The per-game lock registry; callers retire locks they are done with.
    pub fn game_locks(&self) -> &LockMap {
        &self.game_locks
    }

    /// Serialize writes for one game's version chain. Held across
    /// load-head / validate / write-new-head sequences.
    pub async fn lock_game(&self, game_id: &str) -> OwnedMutexGuard<()> {
        self.game_locks.acquire(game_id).await
    }

    async fn apply_schema(&self) -> Result<()> {
        // The schema is several statements; raw_sql runs them unprepared.
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Basic liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'active',
    repo TEXT NOT NULL DEFAULT '',
    repo_status TEXT NOT NULL DEFAULT 'inactive',
    repo_status_data TEXT NOT NULL DEFAULT 'null',
    game_commit_hash TEXT NOT NULL DEFAULT '',
    game_limit INTEGER NOT NULL DEFAULT 10,
    ai_api_key TEXT NOT NULL DEFAULT '',
    ai_max_tokens INTEGER NOT NULL DEFAULT 0,
    ai_thinking_budget INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL DEFAULT 'null',
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'active',
    scopes TEXT NOT NULL DEFAULT '',
    password TEXT NOT NULL DEFAULT '',
    data TEXT NOT NULL DEFAULT 'null',
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    public INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    description TEXT NOT NULL DEFAULT '',
    debug INTEGER NOT NULL DEFAULT 0,
    w INTEGER NOT NULL DEFAULT 800,
    h INTEGER NOT NULL DEFAULT 600,
    status TEXT NOT NULL DEFAULT 'new',
    status_data TEXT NOT NULL DEFAULT 'null',
    subject TEXT NOT NULL,
    objects TEXT NOT NULL DEFAULT '{}',
    images TEXT NOT NULL DEFAULT '{}',
    script TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT 'app',
    commit_hash TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '[]',
    prompts TEXT,
    data TEXT NOT NULL DEFAULT 'null',
    previous_id TEXT,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL DEFAULT ''
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_games_account_name_version
    ON games (account_id, name, version) WHERE status != 'inactive';
CREATE INDEX IF NOT EXISTS idx_games_previous ON games (previous_id);
CREATE INDEX IF NOT EXISTS idx_games_account ON games (account_id);
"#;

/// Tag a database failure with the `Database` kind.
pub(crate) fn db_error(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::RowNotFound => Error::new(ErrorKind::NotFound, "row not found"),
        other => Error::new(ErrorKind::Database, format!("database failure: {other}")),
    }
}

/// Timestamps are stored as RFC3339 text with microsecond precision so
/// round trips are bit-identical.
pub(crate) fn fmt_time(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| {
            Error::new(ErrorKind::Database, format!("bad stored timestamp {s:?}: {e}"))
        })
}

pub(crate) fn parse_json(s: &str) -> Result<serde_json::Value> {
    serde_json::from_str(s)
        .map_err(|e| Error::new(ErrorKind::Database, format!("bad stored json: {e}")))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use pixelport_cache::memory::MemoryCache;

    /// A throwaway store on a temp file with a memory cache.
    pub async fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            database: dir.path().join("test.db").display().to_string(),
            ..StoreConfig::default()
        };
        let cache = Arc::new(CacheClient::with_backend(Arc::new(MemoryCache::new(1024))));
        let store = Store::connect(config, cache).await.unwrap();
        (store, dir)
    }
}
