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

//! The repository import loop.
//!
//! One worker per process. Every interval it visits each account with a
//! configured repository, compares the last imported commit to the live
//! commit, and mirrors changed games into the catalog: each top-level
//! directory is one game (`game.json`/`game.yaml` manifest, `script.lua`,
//! assets under `images/`). A changed game becomes a new version chained to
//! its head; versions are never mutated. The account's `repo_status` is the
//! cross-process lock: `importing` while in flight, `active` on success,
//! `error` with structured data on failure. Cancellation is honored between
//! games.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use pixelport_core::{
    Account, Error, ErrorKind, Game, GameSource, GameStatus, Image, Object, RepoStatus, Result,
};
use pixelport_repo::Repo;
use pixelport_store::Store;

use crate::config::ImportConfig;

/// Game manifest carried in the repository. Everything the repository does
/// not own (identity, provenance, audit) is assigned at import time.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    description: String,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_w")]
    w: i64,
    #[serde(default = "default_h")]
    h: i64,
    subject: Object,
    #[serde(default)]
    objects: HashMap<String, Object>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    data: serde_json::Value,
}

fn default_w() -> i64 {
    pixelport_core::game::DEFAULT_CANVAS_W
}

fn default_h() -> i64 {
    pixelport_core::game::DEFAULT_CANVAS_H
}

/// Long-running worker entry point.
pub async fn run_import_loop(
    store: Store,
    config: ImportConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    if config.interval_secs == 0 {
        return;
    }
    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
        sweep(&store, &shutdown).await;
    }
}

/// One pass over every account with a repository.
pub async fn sweep(store: &Store, shutdown: &watch::Receiver<bool>) {
    let accounts = match store.accounts_with_repos().await {
        Ok(accounts) => accounts,
        Err(e) => {
            warn!(error = %e, "import sweep could not list accounts");
            return;
        }
    };
    for account in accounts {
        if *shutdown.borrow() {
            return;
        }
        if let Err(e) = import_account(store, &account, shutdown).await {
            // The account is already flagged; a failed import never stops
            // the sweep.
            warn!(account_id = %account.account_id, error = %e, "import failed");
        }
    }
}

/// Import one account's repository. Returns `Ok(false)` when the commit is
/// unchanged and nothing was touched.
pub async fn import_account(
    store: &Store,
    account: &Account,
    shutdown: &watch::Receiver<bool>,
) -> Result<bool> {
    let adapter = pixelport_repo::open(&account.repo)?;
    import_account_with(store, account, adapter.as_ref(), shutdown).await
}

/// The import body, separated from adapter construction so tests can
/// substitute a repository fixture.
pub async fn import_account_with(
    store: &Store,
    account: &Account,
    adapter: &dyn Repo,
    shutdown: &watch::Receiver<bool>,
) -> Result<bool> {
    // Reentrancy: `importing` doubles as a cross-process lock.
    if account.repo_status == RepoStatus::Importing {
        return Ok(false);
    }

    let commit = adapter.commit().await?;
    if commit == account.game_commit_hash {
        return Ok(false);
    }

    info!(
        account_id = %account.account_id,
        commit = %commit,
        "importing repository"
    );
    store
        .set_repo_status(
            &account.account_id,
            RepoStatus::Importing,
            serde_json::Value::Null,
        )
        .await?;

    match import_games(store, account, adapter, &commit, shutdown).await {
        Ok(imported) => {
            let patch = pixelport_core::AccountPatch {
                game_commit_hash: pixelport_core::Field::some(commit.clone()),
                repo_status: pixelport_core::Field::some(RepoStatus::Active),
                repo_status_data: pixelport_core::Field::some(serde_json::Value::Null),
                ..Default::default()
            };
            store
                .update_account(&account.account_id, patch, "sys")
                .await?;
            info!(
                account_id = %account.account_id,
                commit = %commit,
                imported,
                "import complete"
            );
            Ok(true)
        }
        Err(e) => {
            let status_data = serde_json::json!({
                "commit": commit,
                "error": e.message,
                "data": e.data,
            });
            store
                .set_repo_status(&account.account_id, RepoStatus::Error, status_data)
                .await?;
            Err(e)
        }
    }
}

async fn import_games(
    store: &Store,
    account: &Account,
    adapter: &dyn Repo,
    commit: &str,
    shutdown: &watch::Receiver<bool>,
) -> Result<usize> {
    let entries = adapter.list_all("/").await.map_err(|e| {
        Error::wrap(ErrorKind::Import, "repository listing failed", e)
    })?;

    // Each top-level directory is one game; the directory name is the
    // canonical game name.
    let mut game_dirs: Vec<String> = entries
        .iter()
        .filter(|e| e.is_dir() && !e.path.contains('/'))
        .map(|e| e.path.clone())
        .collect();
    game_dirs.sort();

    let mut imported = 0;
    for dir in game_dirs {
        if *shutdown.borrow() {
            return Err(Error::new(
                ErrorKind::Canceled,
                "import canceled between games",
            )
            .with_data(serde_json::json!({ "path": dir })));
        }
        if import_game(store, account, adapter, commit, &dir)
            .await
            .map_err(|e| {
                Error::wrap(ErrorKind::Import, format!("importing {dir:?} failed"), e)
                    .with_data(serde_json::json!({ "path": dir }))
            })?
        {
            imported += 1;
        }
    }
    Ok(imported)
}

/// Import one game directory. Returns false when its head already carries
/// the live commit.
async fn import_game(
    store: &Store,
    account: &Account,
    adapter: &dyn Repo,
    commit: &str,
    dir: &str,
) -> Result<bool> {
    let head = store.get_game_by_name(&account.account_id, dir).await?;
    if let Some(head) = &head {
        if head.commit_hash == commit {
            return Ok(false);
        }
    }

    let manifest = read_manifest(adapter, dir).await?;

    let script = match adapter.get(&format!("{dir}/script.lua")).await {
        Ok(bytes) => {
            let text = String::from_utf8(bytes)
                .map_err(|_| Error::invalid_request("script.lua is not UTF-8"))?;
            base64::engine::general_purpose::STANDARD.encode(text)
        }
        Err(e) if e.kind == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let images = read_images(adapter, dir).await?;

    let game = Game {
        id: String::new(),
        account_id: account.account_id.clone(),
        public: manifest.public,
        name: dir.to_string(),
        version: 0,
        description: manifest.description,
        debug: manifest.debug,
        w: manifest.w,
        h: manifest.h,
        status: GameStatus::Active,
        status_data: serde_json::Value::Null,
        subject: manifest.subject,
        objects: manifest.objects,
        images,
        script,
        source: GameSource::Git,
        commit_hash: commit.to_string(),
        tags: manifest.tags,
        prompts: None,
        data: manifest.data,
        previous_id: None,
        created_at: chrono::Utc::now(),
        created_by: "sys".into(),
        updated_at: chrono::Utc::now(),
        updated_by: "sys".into(),
    };

    match head {
        Some(head) => {
            // Serialize with any concurrent writer on this chain.
            let guard = store.lock_game(&head.id).await;
            let result = store.create_game_version(&head, game).await;
            drop(guard);
            store.game_locks().retire(&head.id);
            result?;
        }
        None => {
            store.create_game(game, "sys").await?;
        }
    }
    Ok(true)
}

async fn read_manifest(adapter: &dyn Repo, dir: &str) -> Result<Manifest> {
    match adapter.get(&format!("{dir}/game.json")).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| Error::invalid_request(format!("game.json is invalid: {e}"))),
        Err(e) if e.kind == ErrorKind::NotFound => {
            let bytes = adapter.get(&format!("{dir}/game.yaml")).await.map_err(|e| {
                if e.kind == ErrorKind::NotFound {
                    Error::new(
                        ErrorKind::NotFound,
                        format!("{dir:?} has no game.json or game.yaml"),
                    )
                } else {
                    e
                }
            })?;
            serde_yaml::from_slice(&bytes)
                .map_err(|e| Error::invalid_request(format!("game.yaml is invalid: {e}")))
        }
        Err(e) => Err(e),
    }
}

async fn read_images(adapter: &dyn Repo, dir: &str) -> Result<HashMap<String, Image>> {
    let prefix = format!("{dir}/images");
    let entries = match adapter.list(&prefix).await {
        Ok(entries) => entries,
        Err(e) if e.kind == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e),
    };

    let mut images = HashMap::new();
    for entry in entries {
        if entry.is_dir() {
            continue;
        }
        let bytes = adapter.get(&entry.path).await?;
        let stem = entry
            .name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&entry.name)
            .to_string();
        images.insert(
            stem.clone(),
            Image {
                id: stem.clone(),
                name: stem,
                data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                w: 0,
                h: 0,
            },
        );
    }
    Ok(images)
}
