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

//! Account persistence with cache-through reads.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use pixelport_cache::Item;
use pixelport_core::{cachekey, Account, AccountPatch, AccountStatus, Error, RepoStatus, Result};

use crate::{db_error, fmt_time, parse_json, parse_time, Store};

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    Ok(Account {
        account_id: row.try_get("account_id").map_err(db_error)?,
        name: row.try_get("name").map_err(db_error)?,
        status: AccountStatus::parse(row.try_get::<String, _>("status").map_err(db_error)?.as_str())?,
        repo: row.try_get("repo").map_err(db_error)?,
        repo_status: RepoStatus::parse(
            row.try_get::<String, _>("repo_status").map_err(db_error)?.as_str(),
        )?,
        repo_status_data: parse_json(
            row.try_get::<String, _>("repo_status_data").map_err(db_error)?.as_str(),
        )?,
        game_commit_hash: row.try_get("game_commit_hash").map_err(db_error)?,
        game_limit: row.try_get("game_limit").map_err(db_error)?,
        ai_api_key: row.try_get("ai_api_key").map_err(db_error)?,
        ai_max_tokens: row.try_get("ai_max_tokens").map_err(db_error)?,
        ai_thinking_budget: row.try_get("ai_thinking_budget").map_err(db_error)?,
        data: parse_json(row.try_get::<String, _>("data").map_err(db_error)?.as_str())?,
        created_at: parse_time(row.try_get::<String, _>("created_at").map_err(db_error)?.as_str())?,
        created_by: row.try_get("created_by").map_err(db_error)?,
        updated_at: parse_time(row.try_get::<String, _>("updated_at").map_err(db_error)?.as_str())?,
        updated_by: row.try_get("updated_by").map_err(db_error)?,
    })
}

impl Store {
    /// Fetch an account by id, reading through the cache.
    pub async fn get_account(&self, account_id: &str) -> Result<Account> {
        let key = cachekey::account(account_id);
        if let Ok(bytes) = self.cache().get(&key).await {
            if let Ok(account) = serde_json::from_slice::<Account>(&bytes) {
                return Ok(account);
            }
        }

        let row = sqlx::query("SELECT * FROM accounts WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error)?
            .ok_or_else(|| Error::not_found("account", account_id))?;
        let account = account_from_row(&row)?;
        self.cache_account(&key, &account).await;
        Ok(account)
    }

    /// Fetch an account by its unique display name.
    pub async fn get_account_by_name(&self, name: &str) -> Result<Account> {
        let key = cachekey::account_name(name);
        if let Ok(bytes) = self.cache().get(&key).await {
            if let Ok(account) = serde_json::from_slice::<Account>(&bytes) {
                return Ok(account);
            }
        }

        let row = sqlx::query("SELECT * FROM accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error)?
            .ok_or_else(|| Error::not_found("account", name))?;
        let account = account_from_row(&row)?;
        self.cache_account(&key, &account).await;
        Ok(account)
    }

    async fn cache_account(&self, key: &str, account: &Account) {
        if let Ok(bytes) = serde_json::to_vec(account) {
            let _ = self
                .cache()
                .set(Item::new(key, bytes, self.cache_ttl()))
                .await;
        }
    }

    async fn invalidate_account(&self, account: &Account) {
        let _ = self.cache().delete(&cachekey::account(&account.account_id)).await;
        let _ = self.cache().delete(&cachekey::account_name(&account.name)).await;
    }

    /// Create an account. The id is assigned when blank; name uniqueness is
    /// enforced by the store.
    pub async fn create_account(&self, mut account: Account) -> Result<Account> {
        if account.account_id.is_empty() {
            account.account_id = Uuid::new_v4().to_string();
        }
        if account.game_limit == 0 {
            account.game_limit = self.config().game_limit;
        }
        let now = Utc::now();
        account.created_at = now;
        account.updated_at = now;
        account.validate()?;

        let existing = sqlx::query("SELECT account_id FROM accounts WHERE name = ?")
            .bind(&account.name)
            .fetch_optional(self.pool())
            .await
            .map_err(db_error)?;
        if let Some(row) = existing {
            let id: String = row.try_get("account_id").map_err(db_error)?;
            if id != account.account_id {
                return Err(Error::conflict(format!(
                    "account name {:?} already exists",
                    account.name
                )));
            }
        }

        sqlx::query(
            "INSERT INTO accounts (account_id, name, status, repo, repo_status,
                repo_status_data, game_commit_hash, game_limit, ai_api_key,
                ai_max_tokens, ai_thinking_budget, data, created_at, created_by,
                updated_at, updated_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                repo = excluded.repo,
                game_limit = excluded.game_limit,
                ai_api_key = excluded.ai_api_key,
                ai_max_tokens = excluded.ai_max_tokens,
                ai_thinking_budget = excluded.ai_thinking_budget,
                data = excluded.data,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by",
        )
        .bind(&account.account_id)
        .bind(&account.name)
        .bind(account.status.as_str())
        .bind(&account.repo)
        .bind(account.repo_status.as_str())
        .bind(account.repo_status_data.to_string())
        .bind(&account.game_commit_hash)
        .bind(account.game_limit)
        .bind(&account.ai_api_key)
        .bind(account.ai_max_tokens)
        .bind(account.ai_thinking_budget)
        .bind(account.data.to_string())
        .bind(fmt_time(account.created_at))
        .bind(&account.created_by)
        .bind(fmt_time(account.updated_at))
        .bind(&account.updated_by)
        .execute(self.pool())
        .await
        .map_err(db_error)?;

        self.invalidate_account(&account).await;
        debug!(account_id = %account.account_id, "account created");
        self.get_account(&account.account_id).await
    }

    /// Apply a tolerant patch. A patch with no set fields is a no-op and
    /// does not touch `updated_at`.
    pub async fn update_account(
        &self,
        account_id: &str,
        patch: AccountPatch,
        updated_by: &str,
    ) -> Result<Account> {
        let mut account = self.get_account(account_id).await?;
        if patch.is_empty() {
            return Ok(account);
        }

        // Names must stay unique and non-null.
        if patch.name.is_null() {
            return Err(Error::invalid_request("account name cannot be null"));
        }
        let old_name = account.name.clone();

        patch.name.apply(&mut account.name);
        if let Some(status) = patch.status.value() {
            account.status = *status;
        }
        patch.repo.apply(&mut account.repo);
        if let Some(repo_status) = patch.repo_status.value() {
            account.repo_status = *repo_status;
        }
        if patch.repo_status_data.is_set() {
            account.repo_status_data = patch
                .repo_status_data
                .into_value()
                .unwrap_or(serde_json::Value::Null);
        }
        patch.game_commit_hash.apply(&mut account.game_commit_hash);
        if let Some(limit) = patch.game_limit.value() {
            account.game_limit = *limit;
        }
        patch.ai_api_key.apply(&mut account.ai_api_key);
        if let Some(tokens) = patch.ai_max_tokens.value() {
            account.ai_max_tokens = *tokens;
        }
        if let Some(budget) = patch.ai_thinking_budget.value() {
            account.ai_thinking_budget = *budget;
        }
        if patch.data.is_set() {
            account.data = patch.data.into_value().unwrap_or(serde_json::Value::Null);
        }

        account.updated_at = Utc::now();
        account.updated_by = updated_by.to_string();
        account.validate()?;

        let result = sqlx::query(
            "UPDATE accounts SET name = ?, status = ?, repo = ?, repo_status = ?,
                repo_status_data = ?, game_commit_hash = ?, game_limit = ?,
                ai_api_key = ?, ai_max_tokens = ?, ai_thinking_budget = ?,
                data = ?, updated_at = ?, updated_by = ?
             WHERE account_id = ?",
        )
        .bind(&account.name)
        .bind(account.status.as_str())
        .bind(&account.repo)
        .bind(account.repo_status.as_str())
        .bind(account.repo_status_data.to_string())
        .bind(&account.game_commit_hash)
        .bind(account.game_limit)
        .bind(&account.ai_api_key)
        .bind(account.ai_max_tokens)
        .bind(account.ai_thinking_budget)
        .bind(account.data.to_string())
        .bind(fmt_time(account.updated_at))
        .bind(&account.updated_by)
        .bind(account_id)
        .execute(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref d) if d.message().contains("UNIQUE") => {
                Error::conflict(format!("account name {:?} already exists", account.name))
            }
            other => db_error(other),
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("account", account_id));
        }

        let _ = self.cache().delete(&cachekey::account_name(&old_name)).await;
        self.invalidate_account(&account).await;
        Ok(account)
    }

    /// Typed repo-status transition used only by the import loop.
    pub async fn set_repo_status(
        &self,
        account_id: &str,
        status: RepoStatus,
        status_data: serde_json::Value,
    ) -> Result<()> {
        let account = self.get_account(account_id).await?;
        sqlx::query(
            "UPDATE accounts SET repo_status = ?, repo_status_data = ?, updated_at = ?
             WHERE account_id = ?",
        )
        .bind(status.as_str())
        .bind(status_data.to_string())
        .bind(fmt_time(Utc::now()))
        .bind(account_id)
        .execute(self.pool())
        .await
        .map_err(db_error)?;
        self.invalidate_account(&account).await;
        Ok(())
    }

    /// All accounts with a configured import repository.
    pub async fn accounts_with_repos(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE repo != '' AND status = 'active'")
            .fetch_all(self.pool())
            .await
            .map_err(db_error)?;
        rows.iter().map(account_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use pixelport_core::{ErrorKind, Field};

    fn new_account(name: &str) -> Account {
        Account {
            account_id: String::new(),
            name: name.into(),
            status: AccountStatus::Active,
            repo: String::new(),
            repo_status: RepoStatus::Inactive,
            repo_status_data: serde_json::Value::Null,
            game_commit_hash: String::new(),
            game_limit: 0,
            ai_api_key: String::new(),
            ai_max_tokens: 0,
            ai_thinking_budget: 0,
            data: serde_json::Value::Null,
            created_at: Utc::now(),
            created_by: "test".into(),
            updated_at: Utc::now(),
            updated_by: "test".into(),
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let (store, _dir) = testutil::store().await;
        let created = store.create_account(new_account("acme")).await.unwrap();
        assert!(!created.account_id.is_empty());
        assert_eq!(created.game_limit, store.config().game_limit);

        let by_id = store.get_account(&created.account_id).await.unwrap();
        assert_eq!(by_id.name, "acme");
        let by_name = store.get_account_by_name("acme").await.unwrap();
        assert_eq!(by_name.account_id, created.account_id);
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let (store, _dir) = testutil::store().await;
        store.create_account(new_account("acme")).await.unwrap();
        let err = store.create_account(new_account("acme")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn noop_patch_does_not_touch_updated_at() {
        let (store, _dir) = testutil::store().await;
        let created = store.create_account(new_account("acme")).await.unwrap();
        let after = store
            .update_account(&created.account_id, AccountPatch::default(), "test")
            .await
            .unwrap();
        assert_eq!(after.updated_at, created.updated_at);
    }

    #[tokio::test]
    async fn patch_updates_only_set_fields() {
        let (store, _dir) = testutil::store().await;
        let created = store.create_account(new_account("acme")).await.unwrap();

        let patch = AccountPatch {
            game_limit: Field::some(3),
            ..AccountPatch::default()
        };
        let updated = store
            .update_account(&created.account_id, patch, "test")
            .await
            .unwrap();
        assert_eq!(updated.game_limit, 3);
        assert_eq!(updated.name, "acme");
        assert!(updated.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let (store, _dir) = testutil::store().await;
        let err = store.get_account("nope").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn repo_status_transition() {
        let (store, _dir) = testutil::store().await;
        let mut account = new_account("acme");
        account.repo = "github://u:t@github.com/acme/games".into();
        let created = store.create_account(account).await.unwrap();

        store
            .set_repo_status(
                &created.account_id,
                RepoStatus::Importing,
                serde_json::Value::Null,
            )
            .await
            .unwrap();
        let reloaded = store.get_account(&created.account_id).await.unwrap();
        assert_eq!(reloaded.repo_status, RepoStatus::Importing);

        let with_repos = store.accounts_with_repos().await.unwrap();
        assert_eq!(with_repos.len(), 1);
    }
}
