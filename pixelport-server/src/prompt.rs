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

//! The AI prompt pipeline.
//!
//! Per game there is a logical FIFO of prompts: the per-game lock is a fair
//! mutex, so waiters run in arrival order and at most one prompt is in
//! flight per game. A global semaphore bounds fan-out across games. Each
//! prompt snapshots the head version, marks it `updating` (the marker
//! doubles as a crash-durable lock), calls the AI service with bounded
//! retries, validates the returned document, and commits it as a new
//! version chained to the old head. Any failure after staging restores the
//! head and records the error in the head's prompts record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use pixelport_core::{
    keys, Error, ErrorKind, Game, GameSource, GameStatus, PromptTurn, Result,
};
use pixelport_store::Store;

use crate::auth::AuthContext;
use crate::config::PromptConfig;

/// One queued prompt.
#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub game_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiMessage {
    pub role: String,
    pub content: String,
}

/// One AI completion request.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub api_key: String,
    pub model: String,
    pub max_tokens: i64,
    pub thinking_budget: i64,
    pub system: String,
    pub messages: Vec<AiMessage>,
}

/// The AI adapter seam; mocked in tests.
#[async_trait]
pub trait PromptClient: Send + Sync {
    async fn complete(&self, request: AiRequest) -> Result<String>;
}

/// Retry policy for transient AI failures: 3 attempts, exponential backoff
/// base 500 ms factor 2, jitter plus or minus 20 percent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter = 1.0 + (rand::thread_rng().gen::<f64>() - 0.5) * 2.0 * self.jitter;
        Duration::from_secs_f64(base * jitter)
    }
}

/// Production client speaking an Anthropic-style messages API.
pub struct AnthropicClient {
    endpoint: String,
    model: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(config: &PromptConfig) -> Result<Self> {
        Ok(Self {
            endpoint: config.ai_endpoint.clone(),
            model: config.ai_model.clone(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.ai_timeout_secs))
                .build()
                .map_err(|e| Error::server(format!("ai client build failed: {e}")))?,
        })
    }
}

#[async_trait]
impl PromptClient for AnthropicClient {
    async fn complete(&self, request: AiRequest) -> Result<String> {
        let mut body = serde_json::json!({
            "model": if request.model.is_empty() { &self.model } else { &request.model },
            "max_tokens": request.max_tokens.max(1024),
            "system": request.system,
            "messages": request.messages,
        });
        if request.thinking_budget > 0 {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": request.thinking_budget,
            });
        }

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::new(ErrorKind::Timeout, format!("ai request timed out: {e}"))
                } else {
                    Error::new(ErrorKind::Client, format!("ai request failed: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let kind = match status {
                408 => ErrorKind::Timeout,
                429 => ErrorKind::RateLimit,
                s if s >= 500 => ErrorKind::Unavailable,
                _ => ErrorKind::Client,
            };
            let mut err = Error::new(kind, format!("ai service returned {status}: {body}"));
            if let Some(secs) = retry_after {
                err = err.with_data(serde_json::json!({ "retry_after_secs": secs }));
            }
            return Err(err);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::new(ErrorKind::Client, format!("ai decode failed: {e}")))?;
        // Thinking blocks precede the text block; take the first text.
        let content = json["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return Err(Error::new(ErrorKind::Client, "ai response had no text content"));
        }
        Ok(content)
    }
}

pub struct PromptPipeline {
    store: Store,
    client: Arc<dyn PromptClient>,
    config: PromptConfig,
    retry: RetryPolicy,
    fanout: Arc<Semaphore>,
}

impl PromptPipeline {
    pub fn new(store: Store, client: Arc<dyn PromptClient>, config: PromptConfig) -> Self {
        let fanout = Arc::new(Semaphore::new(config.fanout.max(1)));
        Self {
            store,
            client,
            config,
            retry: RetryPolicy::default(),
            fanout,
        }
    }

    /// Run one prompt through the full lifecycle and return the new head.
    pub async fn submit(&self, context: &AuthContext, request: PromptRequest) -> Result<Game> {
        if request.prompt.trim().is_empty() {
            return Err(Error::invalid_request("prompt must not be empty"));
        }

        // FIFO per game: the fair mutex orders waiters. The semaphore bounds
        // concurrent dispatches across games.
        let game_guard = self.store.lock_game(&request.game_id).await;
        let _permit = self
            .fanout
            .acquire()
            .await
            .map_err(|_| Error::new(ErrorKind::Unavailable, "prompt pipeline shut down"))?;

        let result = self.run(context, &request).await;

        drop(game_guard);
        self.store.game_locks().retire(&request.game_id);
        result
    }

    async fn run(&self, context: &AuthContext, request: &PromptRequest) -> Result<Game> {
        // Admission: snapshot the head, confirm ownership, refuse reentry.
        let head = self
            .store
            .get_game(&context.account_id, &request.game_id)
            .await?;
        if head.status == GameStatus::Updating {
            return Err(Error::conflict(format!(
                "game {:?} already has a prompt in flight",
                head.name
            )));
        }
        let account = self.store.get_account(&context.account_id).await?;

        // Staging: the updating marker survives a crash and is cleared by
        // the reconciler.
        self.store
            .set_game_status(&head.id, GameStatus::Updating, serde_json::Value::Null)
            .await?;

        match self.dispatch_and_commit(context, request, &head, &account).await {
            Ok(next) => {
                // The old head keeps its pre-staging status; it stays
                // reachable through previous_id for undo.
                self.store
                    .set_game_status(&head.id, head.status, head.status_data.clone())
                    .await?;
                info!(game_id = %next.id, previous_id = %head.id, "prompt committed");
                Ok(next)
            }
            Err(e) => {
                self.store
                    .set_game_status(&head.id, head.status, head.status_data.clone())
                    .await?;
                let mut prompts = head.prompts.clone().unwrap_or_default();
                prompts.error = Some(serde_json::json!({
                    "prompt": request.prompt,
                    "error": e.message,
                    "code": e.deepest_kind().code(),
                    "time": Utc::now().to_rfc3339(),
                }));
                if let Err(record) = self.store.set_game_prompts(&head.id, &prompts).await {
                    warn!(game_id = %head.id, error = %record, "failed to record prompt error");
                }
                Err(e)
            }
        }
    }

    async fn dispatch_and_commit(
        &self,
        context: &AuthContext,
        request: &PromptRequest,
        head: &Game,
        account: &pixelport_core::Account,
    ) -> Result<Game> {
        let ai_request = self.build_request(request, head, account)?;
        let content = self.dispatch(ai_request).await?;
        let next = self.validate_response(head, &content)?;

        let mut next = next;
        next.status = GameStatus::Active;
        next.status_data = serde_json::Value::Null;
        next.source = GameSource::App;
        next.commit_hash = String::new();
        next.created_by = context.user_id.clone();
        next.updated_by = context.user_id.clone();
        next.prompts = Some(
            head.prompts.clone().unwrap_or_default().advance(
                PromptTurn {
                    prompt: request.prompt.clone(),
                    response: content,
                },
                self.config.history_size,
            ),
        );

        self.store.create_game_version(head, next).await
    }

    fn build_request(
        &self,
        request: &PromptRequest,
        head: &Game,
        account: &pixelport_core::Account,
    ) -> Result<AiRequest> {
        if account.ai_api_key.is_empty() {
            return Err(Error::invalid_request(
                "account has no AI credential configured",
            ));
        }

        let mut game_doc = head.clone();
        game_doc.prompts = None;
        let serialized = serde_json::to_string_pretty(&game_doc)
            .map_err(|e| Error::server(format!("game encode failed: {e}")))?;

        let mut messages = Vec::new();
        if let Some(prompts) = &head.prompts {
            // History is stored newest-first; the conversation is replayed
            // oldest-first with the most recent turns kept.
            for turn in prompts.history.iter().take(self.config.history_size).rev() {
                messages.push(AiMessage {
                    role: "user".into(),
                    content: turn.prompt.clone(),
                });
                messages.push(AiMessage {
                    role: "assistant".into(),
                    content: turn.response.clone(),
                });
            }
            if let Some(current) = &prompts.current {
                messages.push(AiMessage {
                    role: "user".into(),
                    content: current.prompt.clone(),
                });
                messages.push(AiMessage {
                    role: "assistant".into(),
                    content: current.response.clone(),
                });
            }
        }
        messages.push(AiMessage {
            role: "user".into(),
            content: format!(
                "Current game document:\n{serialized}\n\nRequest: {}",
                request.prompt
            ),
        });

        Ok(AiRequest {
            api_key: account.ai_api_key.clone(),
            model: String::new(),
            max_tokens: account.ai_max_tokens,
            thinking_budget: account.ai_thinking_budget,
            system: system_description(head),
            messages,
        })
    }

    async fn dispatch(&self, request: AiRequest) -> Result<String> {
        let mut last_error = None;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = last_error
                    .as_ref()
                    .and_then(|e: &Error| e.data["retry_after_secs"].as_u64())
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.retry.delay_for_attempt(attempt - 1));
                tokio::time::sleep(delay).await;
            }
            match self.client.complete(request.clone()).await {
                Ok(content) => return Ok(content),
                Err(e) if e.transient() => {
                    debug!(attempt, error = %e, "transient ai failure, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::wrap(
            ErrorKind::Client,
            format!("ai dispatch failed after {} attempts", self.retry.max_attempts),
            last_error.unwrap_or_else(|| Error::server("no attempts made")),
        ))
    }

    /// Parse and validate the returned document. The AI owns the mutable
    /// content; identity and chain fields always come from the head.
    fn validate_response(&self, head: &Game, content: &str) -> Result<Game> {
        let raw = extract_json(content).ok_or_else(|| {
            Error::invalid_request("ai response did not contain a JSON document")
        })?;
        let mut next: Game = serde_json::from_str(raw)
            .map_err(|e| Error::invalid_request(format!("ai response is not a game: {e}")))?;

        next.id = head.id.clone();
        next.account_id = head.account_id.clone();
        next.name = head.name.clone();
        next.version = head.version;
        next.previous_id = head.previous_id.clone();
        next.created_at = head.created_at;
        next.updated_at = head.updated_at;
        next.validate(self.store.config().max_game_bytes)?;
        Ok(next)
    }
}

/// The engine contract sent with every prompt: canvas, key codes, document
/// schema, and the replacement instruction.
fn system_description(head: &Game) -> String {
    format!(
        "You modify declarative 2D game documents for a game engine.\n\
         The canvas is {w}x{h} pixels, origin top-left, x in [0,{w}), y in [0,{h}).\n\
         A game document is JSON with fields: account_id, public, id, name, version, \
         description, debug, w, h, status, source, commit_hash, subject (object), \
         objects (map id->object), images (map id->image), script (base64 Lua), \
         tags (array of \"k:v\" strings), created_at, created_by, updated_at, updated_by.\n\
         Every object has id, name, hidden, x, y, z, w, h, r (rotation degrees), \
         image (an id present in images), data.\n\
         Every image has id, name, data (base64), w, h.\n\
         The subject is the player object and is separate from objects.\n\
         The script defines Update(game) called once per frame; key codes held this \
         frame are game.keys, using the fixed mapping KeyA..KeyZ=0..25, AltLeft=26, \
         AltRight=27, ArrowDown=28, ArrowLeft=29, ArrowRight=30, ArrowUp=31, \
         Digit0..Digit9=43..52, through {max_code}.\n\
         Return a complete game document that replaces the current one. \
         Respond with only the JSON document.",
        w = head.w,
        h = head.h,
        max_code = keys::KEY_NAMES.len() - 1,
    )
}

/// Pull the first JSON object out of a response that may be fenced or
/// surrounded by prose.
fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

/// Background reconciler: games stuck in `updating` past the watchdog
/// deadline are flagged as errored so the next prompt can proceed.
pub async fn run_reconciler(
    store: Store,
    config: PromptConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    if config.reconcile_interval_secs == 0 {
        return;
    }
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.reconcile_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        let cutoff = Utc::now() - chrono::Duration::seconds(config.watchdog_secs as i64);
        let stale = match store.stale_updating_games(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = %e, "reconciler scan failed");
                continue;
            }
        };
        for game in stale {
            warn!(game_id = %game.id, "reconciling game stuck in updating");
            let status_data = serde_json::json!({
                "reason": "prompt watchdog expired",
                "stuck_since": game.updated_at.to_rfc3339(),
            });
            if let Err(e) = store
                .set_game_status(&game.id, GameStatus::Error, status_data)
                .await
            {
                warn!(game_id = %game.id, error = %e, "reconcile failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Mock client returning scripted outcomes in order, then repeating the
    /// last one.
    pub struct MockClient {
        outcomes: Mutex<Vec<Result<String>>>,
        pub calls: AtomicU32,
    }

    impl MockClient {
        pub fn new(outcomes: Vec<Result<String>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PromptClient for MockClient {
        async fn complete(&self, _request: AiRequest) -> Result<String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes[0].clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::MockClient;
    use super::*;
    use base64::Engine;
    use pixelport_core::{Account, AccountStatus, Image, Object, RepoStatus};
    use std::collections::HashMap;

    async fn seed(store: &Store) -> (Account, Game) {
        let account = store
            .create_account(Account {
                account_id: String::new(),
                name: "acme".into(),
                status: AccountStatus::Active,
                repo: String::new(),
                repo_status: RepoStatus::Inactive,
                repo_status_data: serde_json::Value::Null,
                game_commit_hash: String::new(),
                game_limit: 10,
                ai_api_key: "sk-test".into(),
                ai_max_tokens: 4096,
                ai_thinking_budget: 0,
                data: serde_json::Value::Null,
                created_at: Utc::now(),
                created_by: "test".into(),
                updated_at: Utc::now(),
                updated_by: "test".into(),
            })
            .await
            .unwrap();

        let image = Image {
            id: "p".into(),
            name: "player".into(),
            data: base64::engine::general_purpose::STANDARD.encode(b"png"),
            w: 16,
            h: 16,
        };
        let game = store
            .create_game(
                Game {
                    id: String::new(),
                    account_id: account.account_id.clone(),
                    public: false,
                    name: "g1".into(),
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
                },
                "test",
            )
            .await
            .unwrap();
        (account, game)
    }

    fn context(account: &Account) -> AuthContext {
        AuthContext {
            account_id: account.account_id.clone(),
            user_id: "admin@pixelport.dev".into(),
            scopes: "games:write".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    fn pipeline(store: &Store, client: Arc<dyn PromptClient>) -> PromptPipeline {
        PromptPipeline::new(store.clone(), client, PromptConfig::default())
    }

    async fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = pixelport_store::StoreConfig {
            database: dir.path().join("test.db").display().to_string(),
            ..Default::default()
        };
        let cache = Arc::new(pixelport_cache::CacheClient::with_backend(Arc::new(
            pixelport_cache::memory::MemoryCache::new(1024),
        )));
        let store = Store::connect(config, cache).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn prompt_commits_a_new_version() {
        let (store, _dir) = test_store().await;
        let (account, game) = seed(&store).await;

        let mut doubled = game.clone();
        doubled.subject.w *= 2;
        let client = Arc::new(MockClient::new(vec![Ok(
            serde_json::to_string(&doubled).unwrap()
        )]));
        let pipeline = pipeline(&store, client);

        let next = pipeline
            .submit(
                &context(&account),
                PromptRequest {
                    game_id: game.id.clone(),
                    prompt: "double subject width".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(next.previous_id.as_deref(), Some(game.id.as_str()));
        assert_eq!(next.subject.w, game.subject.w * 2);
        assert_eq!(
            next.prompts.as_ref().unwrap().current.as_ref().unwrap().prompt,
            "double subject width"
        );

        // The old head keeps its status and stays reachable for undo.
        let old = store
            .get_game_version(&account.account_id, &game.id)
            .await
            .unwrap();
        assert_eq!(old.status, GameStatus::Active);

        let head = store.get_game(&account.account_id, &game.id).await.unwrap();
        assert_eq!(head.id, next.id);
    }

    #[tokio::test]
    async fn validation_failure_restores_head_and_records_error() {
        let (store, _dir) = test_store().await;
        let (account, game) = seed(&store).await;

        let mut broken = game.clone();
        broken.subject.image = "ghost".into();
        let client = Arc::new(MockClient::new(vec![Ok(
            serde_json::to_string(&broken).unwrap()
        )]));
        let pipeline1 = pipeline(&store, client);

        let err = pipeline1
            .submit(
                &context(&account),
                PromptRequest {
                    game_id: game.id.clone(),
                    prompt: "break it".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.deepest_kind(), ErrorKind::InvalidRequest);

        // No new version; the head status is restored and the error is on
        // the head's prompts record.
        let head = store.get_game(&account.account_id, &game.id).await.unwrap();
        assert_eq!(head.id, game.id);
        assert_eq!(head.status, GameStatus::Active);
        assert!(head.prompts.unwrap().error.is_some());

        // The per-game lock was released: a good prompt now succeeds.
        let mut fixed = game.clone();
        fixed.description = "fixed".into();
        let client = Arc::new(MockClient::new(vec![Ok(
            serde_json::to_string(&fixed).unwrap()
        )]));
        let pipeline2 = pipeline(&store, client);
        pipeline2
            .submit(
                &context(&account),
                PromptRequest {
                    game_id: game.id.clone(),
                    prompt: "fix it".into(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let (store, _dir) = test_store().await;
        let (account, game) = seed(&store).await;

        let mut pipeline = pipeline(
            &store,
            Arc::new(MockClient::new(vec![
                Err(Error::new(ErrorKind::Unavailable, "upstream 503")),
                Err(Error::new(ErrorKind::RateLimit, "429")),
                Ok(serde_json::to_string(&game).unwrap()),
            ])),
        );
        pipeline.retry.base_delay = Duration::from_millis(1);

        pipeline
            .submit(
                &context(&account),
                PromptRequest {
                    game_id: game.id.clone(),
                    prompt: "nudge".into(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_transient_failures_do_not_retry() {
        let (store, _dir) = test_store().await;
        let (account, game) = seed(&store).await;

        let client = Arc::new(MockClient::new(vec![Err(Error::new(
            ErrorKind::Client,
            "400 bad request",
        ))]));
        let calls = client.clone();
        let pipeline = pipeline(&store, client);

        pipeline
            .submit(
                &context(&account),
                PromptRequest {
                    game_id: game.id.clone(),
                    prompt: "nudge".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(calls.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_is_truncated() {
        let (store, _dir) = test_store().await;
        let (account, game) = seed(&store).await;

        let mut config = PromptConfig::default();
        config.history_size = 2;
        let mut current = game.clone();
        for i in 0..4 {
            let client = Arc::new(MockClient::new(vec![Ok(
                serde_json::to_string(&game).unwrap()
            )]));
            let pipeline =
                PromptPipeline::new(store.clone(), client, config.clone());
            current = pipeline
                .submit(
                    &context(&account),
                    PromptRequest {
                        game_id: current.id.clone(),
                        prompt: format!("step {i}"),
                    },
                )
                .await
                .unwrap();
        }
        let prompts = current.prompts.unwrap();
        assert_eq!(prompts.current.unwrap().prompt, "step 3");
        assert!(prompts.history.len() <= 2);
    }

    #[test]
    fn json_extraction_handles_fences() {
        assert_eq!(extract_json(r#"{"a":1}"#), Some(r#"{"a":1}"#));
        assert_eq!(
            extract_json("```json\n{\"a\":1}\n```"),
            Some("{\"a\":1}")
        );
        assert_eq!(extract_json("no json here"), None);
    }
}
