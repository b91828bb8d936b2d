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

//! Bearer authentication with opaque tokens.
//!
//! The token endpoint implements the OAuth2 password grant. Issued tokens
//! are opaque random strings; the decoded principal is cached under
//! `Token::Auth::<token>` with the token's TTL, so authentication on the
//! hot path is one cache read. The token endpoint is rate limited per
//! client address.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::sync::Cache as MokaCache;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use pixelport_cache::{CacheClient, Item};
use pixelport_core::user::{scope_allows, validate_scopes, SCOPES};
use pixelport_core::{cachekey, Account, AccountStatus, Error, Result, User, UserStatus};
use pixelport_store::users::hash_password;
use pixelport_store::Store;

use crate::config::AuthConfig;

/// Domain appended to bare login names so user ids stay email-shaped.
pub const DEFAULT_USER_DOMAIN: &str = "pixelport.dev";

/// The decoded principal cached per token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub account_id: String,
    pub user_id: String,
    pub scopes: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    /// Enforce a scope; `superuser` passes everything.
    pub fn require(&self, scope: &str) -> Result<()> {
        if scope_allows(&self.scopes, scope) {
            Ok(())
        } else {
            Err(Error::forbidden(format!("scope {scope:?} required")))
        }
    }
}

/// OAuth2 password-grant request form.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub scope: String,
}

fn expand_username(username: &str) -> String {
    if username.contains('@') {
        username.to_string()
    } else {
        format!("{username}@{DEFAULT_USER_DOMAIN}")
    }
}

/// Issue a token for a username/password pair. The granted scope is the
/// requested scope intersected with the user's scopes; an empty request
/// grants everything the user holds.
pub async fn issue_token(
    store: &Store,
    cache: &CacheClient,
    config: &AuthConfig,
    request: &TokenRequest,
) -> Result<TokenResponse> {
    let user_id = expand_username(&request.username);
    let user = store.authenticate_user(&user_id, &request.password).await?;

    let granted = if request.scope.trim().is_empty() {
        user.scopes.clone()
    } else {
        validate_scopes(&request.scope)?;
        let granted: Vec<&str> = request
            .scope
            .split_whitespace()
            .filter(|s| scope_allows(&user.scopes, s))
            .collect();
        if granted.is_empty() {
            return Err(Error::forbidden("requested scopes not held by user"));
        }
        granted.join(" ")
    };

    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let token = hex::encode(raw);

    let ttl = Duration::from_secs(config.token_ttl_secs);
    let context = AuthContext {
        account_id: user.account_id.clone(),
        user_id: user.user_id.clone(),
        scopes: granted.clone(),
        expires_at: Utc::now() + chrono::Duration::seconds(config.token_ttl_secs as i64),
    };
    cache
        .set(Item::new(
            cachekey::token_auth(&token),
            serde_json::to_vec(&context)
                .map_err(|e| Error::server(format!("token encode failed: {e}")))?,
            ttl,
        ))
        .await?;

    info!(user_id = %user.user_id, "token issued");
    Ok(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        expires_in: config.token_ttl_secs,
        scope: granted,
    })
}

/// Resolve a bearer token to its cached principal.
pub async fn authenticate(cache: &CacheClient, token: &str) -> Result<AuthContext> {
    let bytes = cache
        .get(&cachekey::token_auth(token))
        .await
        .map_err(|_| Error::unauthorized("invalid or expired token"))?;
    let context: AuthContext = serde_json::from_slice(&bytes)
        .map_err(|_| Error::unauthorized("invalid or expired token"))?;
    if context.expires_at < Utc::now() {
        return Err(Error::unauthorized("invalid or expired token"));
    }
    Ok(context)
}

/// Create the `default` account and admin user on first start so a fresh
/// deployment can log in.
pub async fn bootstrap(store: &Store, config: &AuthConfig) -> Result<()> {
    let account = match store.get_account_by_name("default").await {
        Ok(account) => account,
        Err(_) => {
            info!("bootstrapping default account");
            store
                .create_account(Account {
                    account_id: String::new(),
                    name: "default".into(),
                    status: AccountStatus::Active,
                    repo: String::new(),
                    repo_status: Default::default(),
                    repo_status_data: serde_json::Value::Null,
                    game_commit_hash: String::new(),
                    game_limit: 0,
                    ai_api_key: String::new(),
                    ai_max_tokens: 4096,
                    ai_thinking_budget: 0,
                    data: serde_json::Value::Null,
                    created_at: Utc::now(),
                    created_by: "sys".into(),
                    updated_at: Utc::now(),
                    updated_by: "sys".into(),
                })
                .await?
        }
    };

    let admin_id = expand_username(&config.admin_user);
    if store.get_user(&admin_id).await.is_err() {
        info!(user_id = %admin_id, "bootstrapping admin user");
        store
            .create_user(User {
                user_id: admin_id.clone(),
                account_id: account.account_id,
                email: admin_id,
                first_name: "Admin".into(),
                last_name: String::new(),
                status: UserStatus::Active,
                scopes: SCOPES.join(" "),
                password: hash_password(&config.admin_password),
                data: serde_json::Value::Null,
                created_at: Utc::now(),
                created_by: "sys".into(),
                updated_at: Utc::now(),
                updated_by: "sys".into(),
            })
            .await?;
    }
    Ok(())
}

/// Token bucket, lock-free: tokens scaled by 1000 in an atomic, refilled
/// from elapsed time on each check.
struct TokenBucket {
    tokens_milli: AtomicU64,
    last_refill_ms: AtomicU64,
    start: Instant,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration) -> Self {
        Self {
            tokens_milli: AtomicU64::new(capacity as u64 * 1000),
            last_refill_ms: AtomicU64::new(0),
            start: Instant::now(),
            capacity: capacity as f64,
            refill_rate: capacity as f64 / window.as_secs_f64(),
        }
    }

    fn refill(&self) {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last_ms = self.last_refill_ms.swap(now_ms, Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms) as f64 / 1000.0;
        let current = self.tokens_milli.load(Ordering::Relaxed) as f64 / 1000.0;
        let next = (current + elapsed * self.refill_rate).min(self.capacity);
        self.tokens_milli
            .store((next * 1000.0) as u64, Ordering::Relaxed);
    }

    fn try_consume(&self) -> bool {
        self.refill();
        if self.tokens_milli.load(Ordering::Relaxed) >= 1000 {
            self.tokens_milli.fetch_sub(1000, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

/// Per-client rate limiter for the token endpoint.
pub struct RateLimiter {
    buckets: MokaCache<String, Arc<TokenBucket>>,
    max_requests: u32,
    window: Duration,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &crate::config::RateLimitConfig) -> Self {
        Self {
            buckets: MokaCache::builder()
                .max_capacity(100_000)
                .time_to_idle(Duration::from_secs(config.window_secs * 4))
                .build(),
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            enabled: config.enabled,
        }
    }

    /// Check one request from `client`. Returns `RateLimit` when exhausted.
    pub fn check(&self, client: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let bucket = self.buckets.get_with(client.to_string(), || {
            Arc::new(TokenBucket::new(self.max_requests, self.window))
        });
        if bucket.try_consume() {
            Ok(())
        } else {
            Err(Error::new(
                pixelport_core::ErrorKind::RateLimit,
                "too many token requests",
            )
            .with_data(serde_json::json!({
                "retry_after_secs": self.window.as_secs(),
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_expansion() {
        assert_eq!(expand_username("admin"), "admin@pixelport.dev");
        assert_eq!(expand_username("a@b.dev"), "a@b.dev");
    }

    #[test]
    fn rate_limiter_exhausts_and_isolates_clients() {
        let limiter = RateLimiter::new(&crate::config::RateLimitConfig {
            enabled: true,
            max_requests: 3,
            window_secs: 60,
        });
        for _ in 0..3 {
            limiter.check("1.2.3.4").unwrap();
        }
        assert!(limiter.check("1.2.3.4").is_err());
        limiter.check("5.6.7.8").unwrap();
    }

    #[test]
    fn disabled_rate_limiter_always_passes() {
        let limiter = RateLimiter::new(&crate::config::RateLimitConfig {
            enabled: false,
            max_requests: 1,
            window_secs: 60,
        });
        for _ in 0..10 {
            limiter.check("1.2.3.4").unwrap();
        }
    }

    #[test]
    fn context_scope_enforcement() {
        let context = AuthContext {
            account_id: "a-1".into(),
            user_id: "u@x.dev".into(),
            scopes: "games:read".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        context.require("games:read").unwrap();
        assert!(context.require("games:write").is_err());
    }
}
